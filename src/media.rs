//! Source file handles and media kind classification

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of media a job carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

impl MediaKind {
    /// Extension used for the engine output file
    pub fn output_extension(&self, source_extension: &str) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Audio => "m4a",
            MediaKind::Image => ImageFormat::from_extension(source_extension).extension(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
        }
    }
}

/// Still image container kept across compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Anything that is not PNG or WebP is re-encoded as JPEG
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" => ImageFormat::Png,
            "webp" => ImageFormat::Webp,
            _ => ImageFormat::Jpeg,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }
}

/// Where the bytes of a source file live
#[derive(Debug, Clone)]
pub enum SourceContent {
    Memory(Arc<[u8]>),
    Disk(PathBuf),
}

/// Immutable handle to a user-submitted file
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    mime_type: Option<String>,
    size_bytes: u64,
    content: SourceContent,
}

impl SourceFile {
    /// Wrap an in-memory blob
    pub fn from_bytes(name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len() as u64;
        Self {
            name: name.into(),
            mime_type,
            size_bytes,
            content: SourceContent::Memory(Arc::from(bytes)),
        }
    }

    /// Reference a file on disk without reading it
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            name,
            mime_type: None,
            size_bytes: metadata.len(),
            content: SourceContent::Disk(path.to_path_buf()),
        })
    }

    /// Declared size, used for the size ceiling and the bitrate estimate
    pub fn with_declared_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn content(&self) -> &SourceContent {
        &self.content
    }

    /// Lowercased extension, empty when the name has none
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
            .to_string()
    }
}

/// Extension allow-lists per media kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowList {
    pub video_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
}

impl Default for AllowList {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            video_extensions: owned(&["mp4", "mov", "mkv", "webm", "avi", "m4v", "wmv", "flv", "3gp"]),
            audio_extensions: owned(&["mp3", "wav", "aac", "m4a", "flac", "ogg", "opus"]),
            image_extensions: owned(&["jpg", "jpeg", "png", "webp", "bmp", "gif"]),
        }
    }
}

impl AllowList {
    /// Classify a file: MIME prefix first, then the extension lists
    pub fn classify(&self, file: &SourceFile) -> Option<MediaKind> {
        if let Some(mime) = file.mime_type() {
            let mime = mime.to_ascii_lowercase();
            if mime.starts_with("video/") {
                return Some(MediaKind::Video);
            }
            if mime.starts_with("audio/") {
                return Some(MediaKind::Audio);
            }
            if mime.starts_with("image/") {
                return Some(MediaKind::Image);
            }
        }

        let ext = file.extension();
        if ext.is_empty() {
            return None;
        }

        let contains = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(&ext));
        if contains(&self.video_extensions) {
            Some(MediaKind::Video)
        } else if contains(&self.audio_extensions) {
            Some(MediaKind::Audio)
        } else if contains(&self.image_extensions) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }
}
