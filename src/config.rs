use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::error::{EmojiGridError, EmojiGridResult};

/// Highest CRF accepted by libvpx-vp9.
pub const MAX_VP9_CRF: u32 = 63;

/// Engine-wide tunables.
///
/// Every field has a default, so a config file only needs to name what it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Renderer pool size. Independent of the number of tiles.
    pub workers: usize,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// CRF used at quality level 0.
    pub base_crf: u32,
    /// CRF added per quality level after an oversized-media restart.
    pub crf_step_per_quality: u32,
    /// Quality level past which the publisher gives up instead of restarting again.
    pub max_quality_level: u32,
    /// Length of every rendered tile clip, in seconds.
    pub clip_seconds: f32,
    pub fps: u32,
    /// Fill used to pad the partial last row back to a full tile.
    pub pad_color: String,
    pub background_similarity: String,
    pub background_blend: String,
    /// Added to the wait the platform advertises on rate limiting.
    pub rate_limit_margin_secs: u64,
    /// Wait used when a rate-limit response carries no parseable duration.
    pub default_retry_after_secs: u64,
    /// Emoji attached to every sticker in the pack.
    pub sticker_emoji: String,
    /// Parent directory for per-request working directories.
    pub work_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            base_crf: 24,
            crf_step_per_quality: 4,
            max_quality_level: 6,
            clip_seconds: 3.0,
            fps: 10,
            pad_color: "#04F404@0.1".to_string(),
            background_similarity: "0.1".to_string(),
            background_blend: "0.1".to_string(),
            rate_limit_margin_secs: 5,
            default_retry_after_secs: 5,
            sticker_emoji: "⭐️".to_string(),
            work_root: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> EmojiGridResult<Self> {
        let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| EmojiGridError::serde(format!("parse config '{}': {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> EmojiGridResult<()> {
        if self.workers == 0 {
            return Err(EmojiGridError::validation("config 'workers' must be >= 1"));
        }
        if self.fps == 0 {
            return Err(EmojiGridError::validation("config 'fps' must be non-zero"));
        }
        if self.clip_seconds.is_nan() || self.clip_seconds <= 0.0 {
            return Err(EmojiGridError::validation(
                "config 'clip_seconds' must be positive",
            ));
        }
        if self.base_crf > MAX_VP9_CRF {
            return Err(EmojiGridError::validation(format!(
                "config 'base_crf' must be <= {MAX_VP9_CRF}"
            )));
        }
        if self.sticker_emoji.is_empty() {
            return Err(EmojiGridError::validation(
                "config 'sticker_emoji' must not be empty",
            ));
        }
        Ok(())
    }

    /// CRF for the given quality level; higher levels trade quality for smaller tiles.
    pub fn crf_for_quality(&self, quality_level: u32) -> u32 {
        self.base_crf
            .saturating_add(quality_level.saturating_mul(self.crf_step_per_quality))
            .min(MAX_VP9_CRF)
    }
}
