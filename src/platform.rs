//! The hosting platform seam: sticker uploads, pack creation/extension and pack listing.
//!
//! Transport is not modelled here. Implementations hand back the platform's raw error text
//! through [`PlatformError::classify`] so retry decisions are made in one place.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    error::{EmojiGridError, EmojiGridResult},
};

pub mod memory;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("rate limited (retry_after {retry_after_secs:?})")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("STICKER_VIDEO_BIG: rendered sticker exceeds the platform size limit")]
    VideoTooBig,

    #[error("STICKER_VIDEO_NOWEBM: sticker is not a webm video")]
    NoWebm,

    #[error("STICKERSET_INVALID: sticker set is invalid or does not exist")]
    StickerSetInvalid,

    #[error("owner cannot be reached by the platform: {0}")]
    PeerInvalid(String),

    #[error("{0}")]
    Other(String),
}

impl PlatformError {
    /// Maps the platform's raw error text onto a variant.
    pub fn classify(text: &str) -> Self {
        if let Some(idx) = text.find("retry_after") {
            let tail = &text[idx + "retry_after".len()..];
            let digits: String = tail
                .trim_start_matches(|c: char| c == ' ' || c == ':' || c == '=')
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            return Self::RateLimited {
                retry_after_secs: digits.parse().ok(),
            };
        }
        if text.contains("STICKER_VIDEO_BIG") {
            return Self::VideoTooBig;
        }
        if text.contains("STICKER_VIDEO_NOWEBM") {
            return Self::NoWebm;
        }
        if text.contains("STICKERSET_INVALID") {
            return Self::StickerSetInvalid;
        }
        if text.contains("PEER_ID_INVALID")
            || text.contains("user not found")
            || text.contains("bot was blocked by the user")
        {
            return Self::PeerInvalid(text.to_string());
        }
        Self::Other(text.to_string())
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// One sticker as submitted to a create/extend call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSticker {
    /// Platform reference returned by [`StickerPlatform::upload_sticker_file`].
    pub file_id: String,
    pub emoji: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSticker {
    pub file_id: String,
    pub custom_emoji_id: String,
}

/// A pack as listed by the platform, stickers in pack order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerSet {
    pub name: String,
    pub title: String,
    pub stickers: Vec<PackSticker>,
}

#[async_trait::async_trait]
pub trait StickerPlatform: Send + Sync {
    async fn upload_sticker_file(
        &self,
        owner_id: i64,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<String, PlatformError>;

    async fn create_sticker_set(
        &self,
        owner_id: i64,
        pack: &str,
        title: &str,
        stickers: &[InputSticker],
    ) -> Result<(), PlatformError>;

    async fn add_sticker_to_set(
        &self,
        owner_id: i64,
        pack: &str,
        sticker: &InputSticker,
    ) -> Result<(), PlatformError>;

    async fn get_sticker_set(&self, pack: &str) -> Result<StickerSet, PlatformError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Added on top of every advertised wait.
    pub margin: Duration,
    /// Wait used when the rate-limit response carries no duration.
    pub default_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(5),
            default_wait: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            margin: Duration::from_secs(cfg.rate_limit_margin_secs),
            default_wait: Duration::from_secs(cfg.default_retry_after_secs),
        }
    }

    pub fn wait_for(&self, retry_after_secs: Option<u64>) -> Duration {
        retry_after_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_wait)
            + self.margin
    }
}

/// Runs `call` until it succeeds or fails with anything other than rate limiting.
///
/// Rate-limited calls sleep for the advertised wait and retry the same call with no upper
/// bound. Cancellation is honoured between attempts and during the sleep.
pub async fn with_rate_limit_retry<T, F, Fut>(
    what: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut call: F,
) -> EmojiGridResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(EmojiGridError::Cancelled);
        }

        match call().await {
            Ok(v) => return Ok(v),
            Err(PlatformError::RateLimited { retry_after_secs }) => {
                let wait = policy.wait_for(retry_after_secs);
                tracing::info!(
                    call = what,
                    retry_after_secs = wait.as_secs(),
                    "rate limited, waiting before retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EmojiGridError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(e) => {
                tracing::debug!(call = what, error = %e, "platform call failed");
                return Err(e.into());
            }
        }
    }
}
