//! Source media fetching and probing.

use std::path::{Path, PathBuf};

use crate::error::{EmojiGridError, EmojiGridResult};

/// Failures of fetching the source media for a request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("file not provided")]
    FileNotProvided,

    #[error("file of invalid type: {0}")]
    FileOfInvalidType(String),

    #[error("get file from platform failed: {0}")]
    GetFailed(String),

    #[error("file download failed: {0}")]
    DownloadFailed(String),
}

/// MIME types a source file may have.
pub const ALLOWED_MIME_TYPES: [&str; 7] = [
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/webp",
    "video/mp4",
    "video/webm",
    "video/mpeg",
];

/// File extension (with the dot) a downloaded source is stored under.
pub fn extension_for_mime(mime: &str) -> Result<&'static str, MediaError> {
    match mime {
        "image/gif" => Ok(".gif"),
        "image/jpeg" => Ok(".jpg"),
        "image/png" => Ok(".png"),
        "image/webp" => Ok(".webp"),
        "video/mp4" => Ok(".mp4"),
        "video/webm" => Ok(".webm"),
        "video/mpeg" => Ok(".mpeg"),
        other => Err(MediaError::FileOfInvalidType(other.to_string())),
    }
}

/// Fetches the media a request refers to into a local working directory.
#[async_trait::async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, work_dir: &Path) -> Result<PathBuf, MediaError>;
}

/// A source that is already on local disk.
#[derive(Clone, Debug)]
pub struct LocalFile(pub PathBuf);

#[async_trait::async_trait]
impl MediaSource for LocalFile {
    async fn fetch(&self, _work_dir: &Path) -> Result<PathBuf, MediaError> {
        if !self.0.is_file() {
            return Err(MediaError::FileNotProvided);
        }
        Ok(self.0.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceDimensions {
    pub width: u32,
    pub height: u32,
}

fn is_still_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref(),
        Some("png" | "jpg" | "jpeg" | "gif" | "webp")
    )
}

/// Reads the pixel size of a source: stills are read directly, videos go through `ffprobe`.
pub fn probe_dimensions(path: &Path, ffprobe_bin: &Path) -> EmojiGridResult<SourceDimensions> {
    if is_still_image(path) {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            EmojiGridError::validation(format!(
                "failed to read image dimensions of '{}': {e}",
                path.display()
            ))
        })?;
        return Ok(SourceDimensions { width, height });
    }
    probe_video(path, ffprobe_bin)
}

fn probe_video(path: &Path, ffprobe_bin: &Path) -> EmojiGridResult<SourceDimensions> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
    }

    let out = std::process::Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-print_format",
            "json",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| EmojiGridError::render(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(EmojiGridError::render(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    parse_probe_output(&out.stdout).and_then(|parsed: ProbeOut| {
        let stream = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| EmojiGridError::validation("no video stream found in source"))?;
        match (stream.width, stream.height) {
            (Some(width), Some(height)) => Ok(SourceDimensions { width, height }),
            _ => Err(EmojiGridError::render("missing video dimensions from ffprobe")),
        }
    })
}

fn parse_probe_output<T: serde::de::DeserializeOwned>(stdout: &[u8]) -> EmojiGridResult<T> {
    serde_json::from_slice(stdout)
        .map_err(|e| EmojiGridError::serde(format!("ffprobe json parse failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_map_covers_allowed_types() {
        for mime in ALLOWED_MIME_TYPES {
            assert!(extension_for_mime(mime).is_ok(), "{mime}");
        }
        assert_eq!(
            extension_for_mime("application/pdf"),
            Err(MediaError::FileOfInvalidType("application/pdf".to_string()))
        );
    }

    #[test]
    fn still_images_are_probed_without_ffprobe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        image::RgbaImage::new(320, 180).save(&path).unwrap();

        let dims = probe_dimensions(&path, Path::new("/nonexistent/ffprobe")).unwrap();
        assert_eq!(
            dims,
            SourceDimensions {
                width: 320,
                height: 180
            }
        );
    }

    #[tokio::test]
    async fn local_file_requires_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = LocalFile(dir.path().join("nope.mp4"));
        assert_eq!(
            missing.fetch(dir.path()).await,
            Err(MediaError::FileNotProvided)
        );

        let present = dir.path().join("clip.mp4");
        std::fs::write(&present, b"x").unwrap();
        let fetched = LocalFile(present.clone()).fetch(dir.path()).await.unwrap();
        assert_eq!(fetched, present);
    }
}
