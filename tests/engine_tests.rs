mod common;

use common::FakeEngine;
use media_squeeze::engine::{with_mount, Engine, EngineHandle, EngineState, FfmpegEngine};
use media_squeeze::error::EngineError;
use media_squeeze::media::SourceFile;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_err;

#[tokio::test]
async fn test_with_mount_cleans_up_after_success() {
    let engine = FfmpegEngine::new("ffmpeg").unwrap();
    let file = SourceFile::from_bytes("clip.mp4", None, b"bytes".to_vec());
    let cleanup = vec!["output-1.mp4".to_string()];

    let read = with_mount(&engine, "input-1", &[file], &cleanup, || async {
        tokio::fs::write(engine.root().join("output-1.mp4"), b"encoded").await?;
        engine.read_file("output-1.mp4").await
    })
    .await
    .unwrap();

    assert_eq!(read, b"encoded".to_vec());
    assert!(!engine.root().join("input-1").exists());
    assert!(!engine.root().join("output-1.mp4").exists());
}

#[tokio::test]
async fn test_with_mount_cleans_up_after_panic() {
    let engine = FfmpegEngine::new("ffmpeg").unwrap();
    let file = SourceFile::from_bytes("clip.mp4", None, b"bytes".to_vec());

    let outcome: Result<(), EngineError> = with_mount(&engine, "input-2", &[file], &[], || async {
        if engine.root().exists() {
            panic!("decoder blew up");
        }
        Ok(())
    })
    .await;

    match outcome {
        Err(EngineError::Panicked(message)) => assert!(message.contains("decoder blew up")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!engine.root().join("input-2").exists());
}

#[tokio::test]
async fn test_disk_sources_are_mounted_by_link_or_copy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("song.wav");
    tokio::fs::write(&path, b"RIFFdata").await.unwrap();

    let source = SourceFile::from_path(&path).await.unwrap();
    assert_eq!(source.size_bytes(), 8);

    let engine = FfmpegEngine::new("ffmpeg").unwrap();
    engine.mount("input-3", &[source]).await.unwrap();
    assert_eq!(engine.read_file("input-3/song.wav").await.unwrap(), b"RIFFdata".to_vec());

    engine.unmount("input-3").await.unwrap();
    // Original stays untouched
    assert!(path.exists());
}

#[tokio::test]
async fn test_with_mount_removes_partial_mount_on_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gone.wav");
    tokio::fs::write(&path, b"RIFF").await.unwrap();
    let vanished = SourceFile::from_path(&path).await.unwrap();
    tokio::fs::remove_file(&path).await.unwrap();

    let engine = FfmpegEngine::new("ffmpeg").unwrap();
    let files = [SourceFile::from_bytes("first.wav", None, b"RIFF".to_vec()), vanished];
    let body_ran = AtomicBool::new(false);

    let outcome = with_mount(&engine, "input-4", &files, &[], || async {
        body_ran.store(true, Ordering::SeqCst);
        Ok(())
    })
    .await;

    assert!(matches!(outcome, Err(EngineError::Io(_))));
    assert!(!body_ran.load(Ordering::SeqCst));
    assert!(!engine.root().join("input-4").exists());
}

#[tokio::test]
async fn test_with_mount_refuses_traversing_names() {
    let engine = FfmpegEngine::new("ffmpeg").unwrap();
    let file = SourceFile::from_bytes("../../escaped.mp4", None, b"bytes".to_vec());

    let outcome = with_mount(&engine, "input-5", &[file], &[], || async { Ok(()) }).await;

    assert_err!(outcome);
    assert!(!engine.root().join("input-5").exists());
    assert!(!engine.root().parent().unwrap().join("escaped.mp4").exists());
}

#[tokio::test]
async fn test_bootstrap_is_idempotent_once_ready() {
    let engine = Arc::new(FakeEngine::new());
    let handle = EngineHandle::new(Arc::clone(&engine) as Arc<dyn Engine>);
    let mut states = handle.watch_state();

    handle.bootstrap(&[]).await.unwrap();
    handle.bootstrap(&[]).await.unwrap();

    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), EngineState::Ready);
    assert_eq!(engine.calls().iter().filter(|c| *c == "load").count(), 1);
}

#[tokio::test]
async fn test_failed_bootstrap_can_be_retried() {
    let handle = EngineHandle::new(Arc::new(FakeEngine::failing_load("no binary")));
    assert_err!(handle.bootstrap(&[]).await);
    assert!(matches!(handle.state(), EngineState::Failed(_)));
    assert!(!handle.is_ready());

    // A second attempt goes back through Loading and fails again
    assert_err!(handle.bootstrap(&[]).await);
    assert!(matches!(handle.state(), EngineState::Failed(_)));
}

#[tokio::test]
async fn test_native_engine_load_reports_missing_binary() {
    let engine = FfmpegEngine::new("definitely-not-ffmpeg-binary").unwrap();
    match engine.load(&[]).await {
        Err(EngineError::Load(message)) => assert!(message.contains("definitely-not-ffmpeg-binary")),
        other => panic!("unexpected result {:?}", other),
    }
}
