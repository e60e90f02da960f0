use criterion::{black_box, criterion_group, criterion_main, Criterion};
use media_squeeze::engine::args::EncoderOptions;
use media_squeeze::engine::{render_args, JobPaths};
use media_squeeze::job::JobId;
use media_squeeze::media::{MediaKind, SourceFile};
use media_squeeze::metadata::{Resolution, SourceMetadata};
use media_squeeze::settings::{compute_settings, JobPlan, SizePreset};

fn sample_metadata() -> SourceMetadata {
    SourceMetadata::derive("match_h264.mp4", 300 * 1024 * 1024, 600.0, Resolution::new(1920, 1080), Some(60))
}

/// Benchmark the settings calculator across every preset
fn bench_compute_settings(c: &mut Criterion) {
    let meta = sample_metadata();
    let presets = [
        SizePreset::Maximum,
        SizePreset::High,
        SizePreset::Balanced,
        SizePreset::Light,
    ];

    c.bench_function("compute_settings_all_presets", |b| {
        b.iter(|| {
            for preset in &presets {
                black_box(compute_settings(black_box(preset.target_bytes()), black_box(&meta), false));
            }
        })
    });
}

/// Benchmark plan to argv rendering
fn bench_render_args(c: &mut Criterion) {
    let source = SourceFile::from_bytes("match_h264.mp4", None, Vec::new());
    let paths = JobPaths::for_job(&JobId::new(), &source, MediaKind::Video);
    let plan = JobPlan::Video(compute_settings(SizePreset::High.target_bytes(), &sample_metadata(), false));
    let options = EncoderOptions::default();

    c.bench_function("render_video_args", |b| {
        b.iter(|| black_box(render_args(black_box(&plan), black_box(&paths), &options)))
    });
}

criterion_group!(benches, bench_compute_settings, bench_render_args);
criterion_main!(benches);
