//! Rendering job plans into engine argument vectors

use crate::job::JobId;
use crate::media::{ImageFormat, MediaKind, SourceFile};
use crate::settings::{AudioSettings, CompressionSettings, ImageSettings, JobPlan};

/// Engine-relative locations for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub mount_dir: String,
    pub input: String,
    pub output: String,
}

impl JobPaths {
    /// Every name embeds the job id so no two jobs share a mount point
    pub fn for_job(id: &JobId, source: &SourceFile, kind: MediaKind) -> Self {
        let mount_dir = format!("input-{}", id);
        let input = format!("{}/{}", mount_dir, source.name());
        let output = format!("output-{}.{}", id, kind.output_extension(&source.extension()));
        Self {
            mount_dir,
            input,
            output,
        }
    }
}

/// Encoder knobs that are not derived per job
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub video_codec: String,
    pub preset: String,
    pub threads: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            threads: 1,
        }
    }
}

/// Build the full argv for a plan
pub fn render_args(plan: &JobPlan, paths: &JobPaths, options: &EncoderOptions) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), paths.input.clone()];

    match plan {
        JobPlan::Video(settings) => push_video(&mut args, settings, options),
        JobPlan::Audio(settings) => push_audio(&mut args, settings),
        JobPlan::Image(settings) => push_image(&mut args, settings),
    }

    if options.threads > 1 && !matches!(plan, JobPlan::Image(_)) {
        args.push("-threads".into());
        args.push(options.threads.to_string());
    }

    args.push(paths.output.clone());
    args
}

fn push_video(args: &mut Vec<String>, s: &CompressionSettings, options: &EncoderOptions) {
    // Capped CRF: quality target with a hard rate ceiling
    args.extend([
        "-c:v".to_string(),
        options.video_codec.clone(),
        "-preset".to_string(),
        options.preset.clone(),
        "-crf".to_string(),
        s.constant_rate_factor.to_string(),
        "-maxrate".to_string(),
        format!("{}k", s.video_bitrate_kbps),
        "-bufsize".to_string(),
        format!("{}k", s.buffer_size_kbps),
        "-vf".to_string(),
        format!("scale={}:{}", s.target_resolution.width, s.target_resolution.height),
        "-r".to_string(),
        s.target_frame_rate.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", s.audio_bitrate_kbps),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]);
}

fn push_audio(args: &mut Vec<String>, s: &AudioSettings) {
    args.extend([
        "-vn".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", s.bitrate_kbps),
    ]);
}

fn push_image(args: &mut Vec<String>, s: &ImageSettings) {
    if let Some(res) = s.target_resolution {
        args.push("-vf".into());
        args.push(format!("scale={}:{}", res.width, res.height));
    }

    match s.format {
        ImageFormat::Jpeg => {
            args.push("-q:v".into());
            args.push(jpeg_qscale(s.quality).to_string());
        }
        ImageFormat::Webp => {
            args.push("-quality".into());
            args.push(s.quality.to_string());
        }
        ImageFormat::Png => {
            // Lossless; quality only affects effort
            args.push("-compression_level".into());
            args.push("9".into());
        }
    }
    args.push("-frames:v".into());
    args.push("1".into());
}

/// Map 1..=100 quality onto the MJPEG 31..=2 qscale range
pub fn jpeg_qscale(quality: u8) -> u32 {
    let q = quality.clamp(1, 100) as f64;
    (31.0 - (q - 1.0) * 29.0 / 99.0).round() as u32
}

/// Short description of a plan for logs
pub fn describe_plan(plan: &JobPlan) -> String {
    match plan {
        JobPlan::Video(s) => format!(
            "{} {} @ {}fps, video {}k, audio {}k, crf {}",
            s.tier.label(),
            s.target_resolution,
            s.target_frame_rate,
            s.video_bitrate_kbps,
            s.audio_bitrate_kbps,
            s.constant_rate_factor
        ),
        JobPlan::Audio(s) => format!("audio {}k", s.bitrate_kbps),
        JobPlan::Image(s) => format!("{:?} quality {}", s.format, s.quality),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Resolution;
    use crate::settings::SizeTier;

    fn paths() -> JobPaths {
        JobPaths {
            mount_dir: "input-1".to_string(),
            input: "input-1/clip.mov".to_string(),
            output: "output-1.mp4".to_string(),
        }
    }

    #[test]
    fn test_video_args_carry_every_setting() {
        let plan = JobPlan::Video(CompressionSettings {
            video_bitrate_kbps: 2668,
            audio_bitrate_kbps: 128,
            target_resolution: Resolution::new(1440, 810),
            constant_rate_factor: 16,
            buffer_size_kbps: 8004,
            target_frame_rate: 30,
            tier: SizeTier::High,
        });
        let options = EncoderOptions { threads: 4, ..EncoderOptions::default() };
        let args = render_args(&plan, &paths(), &options);
        let joined = args.join(" ");

        assert!(joined.starts_with("-y -i input-1/clip.mov"));
        assert!(joined.contains("-crf 16"));
        assert!(joined.contains("-maxrate 2668k"));
        assert!(joined.contains("-bufsize 8004k"));
        assert!(joined.contains("scale=1440:810"));
        assert!(joined.contains("-r 30"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.contains("-threads 4"));
        assert_eq!(args.last().map(String::as_str), Some("output-1.mp4"));
    }

    #[test]
    fn test_image_args_use_format_specific_quality() {
        let plan = JobPlan::Image(ImageSettings {
            quality: 100,
            target_resolution: None,
            format: ImageFormat::Jpeg,
        });
        let args = render_args(&plan, &paths(), &EncoderOptions::default());
        assert!(args.windows(2).any(|w| w[0] == "-q:v" && w[1] == "2"));
        assert!(!args.contains(&"-threads".to_string()));
    }

    #[test]
    fn test_jpeg_qscale_bounds() {
        assert_eq!(jpeg_qscale(1), 31);
        assert_eq!(jpeg_qscale(100), 2);
        assert_eq!(jpeg_qscale(0), 31);
    }

    #[test]
    fn test_job_paths_embed_id() {
        let id = JobId::new();
        let source = SourceFile::from_bytes("song.wav", None, vec![1, 2, 3]);
        let paths = JobPaths::for_job(&id, &source, MediaKind::Audio);
        assert_eq!(paths.input, format!("input-{}/song.wav", id));
        assert_eq!(paths.output, format!("output-{}.m4a", id));
    }
}
