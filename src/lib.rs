//! Emojigrid cuts short videos, GIFs and images into 100×100 animated tiles and publishes them
//! as a platform-hosted custom-emoji pack.
//!
//! The flow for one request:
//!
//! - Plan the tile grid for the source ([`plan_tiles`])
//! - Render every tile on a fixed worker pool through an external transcoder ([`TileRenderer`])
//! - Wait for the global [`AdmissionGate`], then upload and publish ([`PackBuilder`])
//! - Pick the tiles an outbound message shows ([`select_composition`])
//!
//! [`Publisher`] drives all of it, including the lower-quality restart on oversized tiles.
#![forbid(unsafe_code)]

mod foundation;

pub mod admission;
pub mod compose;
pub mod config;
pub mod media;
pub mod pipeline;
pub mod plan;
pub mod platform;
pub mod render;
pub mod transcode_ffmpeg;
pub mod upload;

pub use crate::foundation::{error, limits};

pub use crate::admission::{Admission, AdmissionGate, AdmissionPermit, AdmissionTicket};
pub use crate::compose::select_composition;
pub use crate::config::EngineConfig;
pub use crate::error::{EmojiGridError, EmojiGridResult};
pub use crate::media::{LocalFile, MediaError, MediaSource, SourceDimensions, probe_dimensions};
pub use crate::pipeline::{PublishedPack, Publisher, WorkDir};
pub use crate::plan::{GridPadding, TileCell, TilePlan, plan_tiles};
pub use crate::platform::{
    InputSticker, PackSticker, PlatformError, RetryPolicy, StickerPlatform, StickerSet,
    memory::MemoryPlatform, with_rate_limit_retry,
};
pub use crate::render::{
    BackgroundKey, RenderOptions, RenderedTile, TileJob, TileRenderer, TileTranscoder,
};
pub use crate::transcode_ffmpeg::FfmpegTranscoder;
pub use crate::upload::{
    BuildOutcome, BuiltPack, EmojiMatrix, PackBuilder, PublishRequest, TileUploadMeta,
};
