//! Batch uploader and pack builder.
//!
//! Rendered tiles are uploaded one by one, laid out in a row-major matrix padded to the default
//! width with filler, then submitted as a new pack (first batch plus single extensions) or
//! appended to an existing one. Platform-assigned emoji ids are correlated back by position.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{EmojiGridError, EmojiGridResult},
    limits::{DEFAULT_COLUMNS, MAX_STICKERS_IN_BATCH, MAX_STICKERS_TOTAL},
    plan::grid_padding,
    platform::{
        InputSticker, PlatformError, RetryPolicy, StickerPlatform, StickerSet,
        with_rate_limit_retry,
    },
    render::BackgroundKey,
};

pub const FILLER_FILE_NAME: &str = "transparent.webm";

/// One cell of the upload matrix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TileUploadMeta {
    /// Platform reference of the uploaded resource.
    pub file_id: String,
    /// Custom-emoji id, known once the pack listing has been correlated.
    pub document_id: Option<String>,
    pub file_name: String,
    pub is_filler: bool,
}

/// Row-major upload layout, one row per planned tile row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmojiMatrix {
    rows: Vec<Vec<TileUploadMeta>>,
}

impl EmojiMatrix {
    pub fn rows(&self) -> &[Vec<TileUploadMeta>] {
        &self.rows
    }

    pub fn flatten(&self) -> impl Iterator<Item = &TileUploadMeta> {
        self.rows.iter().flatten()
    }

    fn flatten_mut(&mut self) -> impl Iterator<Item = &mut TileUploadMeta> {
        self.rows.iter_mut().flatten()
    }

    /// Number of cells, fillers included.
    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn filler_count(&self) -> usize {
        self.flatten().filter(|m| m.is_filler).count()
    }
}

/// One publish invocation. Only `quality_level` changes across pipeline restarts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRequest {
    pub pack: String,
    pub title: String,
    pub is_new_pack: bool,
    pub owner_id: i64,
    pub quality_level: u32,
    /// Requested grid width in tiles; 0 keeps the source's own width.
    pub columns: u32,
    pub background: Option<BackgroundKey>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltPack {
    pub set: StickerSet,
    pub matrix: EmojiMatrix,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    Published(BuiltPack),
    /// The platform rejected a rendered tile as oversized; re-render at the next quality level.
    NeedsQualityRetry,
}

/// Filler cells the matrix will hold for `tiles` real tiles at `columns` per row.
pub fn filler_count(tiles: usize, columns: u32) -> usize {
    if columns == 0 || columns >= DEFAULT_COLUMNS {
        return 0;
    }
    let rows = tiles.div_ceil(columns as usize);
    (DEFAULT_COLUMNS - columns) as usize * rows
}

/// Rejects a build that could not fit in one pack, before anything is uploaded.
pub fn check_capacity(tiles: usize, columns: u32, existing: usize) -> EmojiGridResult<()> {
    if tiles == 0 {
        return Err(EmojiGridError::validation("no tiles to upload"));
    }
    if tiles > MAX_STICKERS_TOTAL {
        return Err(EmojiGridError::validation(format!(
            "too many tiles for one pack: {tiles} > {MAX_STICKERS_TOTAL}"
        )));
    }

    let uploaded = tiles + filler_count(tiles, columns);
    if existing + uploaded > MAX_STICKERS_TOTAL {
        let counts = if existing > 0 {
            format!("{existing} + {uploaded}")
        } else {
            uploaded.to_string()
        };
        return Err(EmojiGridError::validation(format!(
            "too many stickers for one pack: {counts} > {MAX_STICKERS_TOTAL}"
        )));
    }
    Ok(())
}

/// Index in the final pack listing of the first uploaded sticker.
///
/// Extensions start one entry before the first appended sticker; the platform's listing has
/// been seen to drift by one right after an append.
pub fn correlation_start(is_new_pack: bool, pack_len: usize, uploaded: usize) -> usize {
    if is_new_pack {
        0
    } else {
        pack_len.saturating_sub(uploaded).saturating_sub(1)
    }
}

/// Copies platform emoji ids into the matrix, in row-major order.
pub fn correlate(
    matrix: &mut EmojiMatrix,
    set: &StickerSet,
    is_new_pack: bool,
) -> EmojiGridResult<()> {
    let uploaded = matrix.len();
    let start = correlation_start(is_new_pack, set.stickers.len(), uploaded);
    for (offset, meta) in matrix.flatten_mut().enumerate() {
        let idx = start + offset;
        let sticker = set.stickers.get(idx).ok_or_else(|| {
            EmojiGridError::Platform(PlatformError::Other(format!(
                "pack '{}' lists {} stickers, no entry {idx} for uploaded tile {offset}",
                set.name,
                set.stickers.len()
            )))
        })?;
        meta.document_id = Some(sticker.custom_emoji_id.clone());
    }
    Ok(())
}

pub struct PackBuilder {
    platform: Arc<dyn StickerPlatform>,
    policy: RetryPolicy,
    emoji: String,
}

impl PackBuilder {
    pub fn new(platform: Arc<dyn StickerPlatform>, policy: RetryPolicy, emoji: String) -> Self {
        Self {
            platform,
            policy,
            emoji,
        }
    }

    pub fn platform(&self) -> &dyn StickerPlatform {
        self.platform.as_ref()
    }

    /// Uploads `tiles` (planner order, `columns` per row) and publishes them to the pack.
    ///
    /// `filler` is the blank clip used for padding cells; it is required whenever the grid is
    /// narrower than the default width.
    #[tracing::instrument(
        skip_all,
        fields(pack = %request.pack, owner = request.owner_id, quality = request.quality_level, tiles = tiles.len())
    )]
    pub async fn build(
        &self,
        request: &PublishRequest,
        tiles: &[PathBuf],
        columns: u32,
        filler: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> EmojiGridResult<BuildOutcome> {
        match self.build_pack(request, tiles, columns, filler, cancel).await {
            Ok(built) => Ok(BuildOutcome::Published(built)),
            Err(EmojiGridError::Platform(PlatformError::VideoTooBig)) => {
                tracing::warn!("platform rejected an oversized tile, restart at lower quality");
                Ok(BuildOutcome::NeedsQualityRetry)
            }
            Err(e) => Err(e),
        }
    }

    async fn build_pack(
        &self,
        request: &PublishRequest,
        tiles: &[PathBuf],
        columns: u32,
        filler: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> EmojiGridResult<BuiltPack> {
        let existing = if request.is_new_pack {
            0
        } else {
            self.fetch_set(&request.pack, cancel).await?.stickers.len()
        };
        check_capacity(tiles.len(), columns, existing)?;

        let mut matrix = self
            .upload_matrix(request.owner_id, tiles, columns, filler, cancel)
            .await?;
        let stickers: Vec<InputSticker> = matrix
            .flatten()
            .map(|m| InputSticker {
                file_id: m.file_id.clone(),
                emoji: self.emoji.clone(),
            })
            .collect();

        if request.is_new_pack {
            self.create_pack(request, &stickers, cancel).await?;
        } else {
            self.extend_pack(request, &stickers, cancel).await?;
        }

        let set = self.fetch_set(&request.pack, cancel).await?;
        correlate(&mut matrix, &set, request.is_new_pack)?;
        tracing::info!(
            stickers = set.stickers.len(),
            uploaded = stickers.len(),
            fillers = matrix.filler_count(),
            "pack published"
        );
        Ok(BuiltPack { set, matrix })
    }

    async fn upload_matrix(
        &self,
        owner_id: i64,
        tiles: &[PathBuf],
        columns: u32,
        filler: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> EmojiGridResult<EmojiMatrix> {
        let per_row = columns.max(1) as usize;
        let padding = grid_padding(columns);
        let filler = match (padding.total(), filler) {
            (0, _) => None,
            (_, Some(bytes)) => Some(bytes),
            (_, None) => {
                return Err(EmojiGridError::validation(
                    "grid narrower than the default width needs a filler clip",
                ));
            }
        };

        let mut rows = Vec::with_capacity(tiles.len().div_ceil(per_row));
        for chunk in tiles.chunks(per_row) {
            let row_len = (columns.max(DEFAULT_COLUMNS) as usize).max(chunk.len());
            let mut row = Vec::with_capacity(row_len);

            // One filler upload per row, shared by all of that row's padding cells.
            let filler_meta = match filler {
                Some(bytes) => {
                    let file_id = self.upload(owner_id, FILLER_FILE_NAME, bytes, cancel).await?;
                    Some(TileUploadMeta {
                        file_id,
                        document_id: None,
                        file_name: FILLER_FILE_NAME.to_string(),
                        is_filler: true,
                    })
                }
                None => None,
            };

            if let Some(meta) = &filler_meta {
                row.extend(std::iter::repeat_n(meta.clone(), padding.left as usize));
            }
            for tile in chunk {
                let bytes = tokio::fs::read(tile)
                    .await
                    .with_context(|| format!("read rendered tile '{}'", tile.display()))?;
                let name = display_name(tile);
                let file_id = self.upload(owner_id, &name, &bytes, cancel).await?;
                row.push(TileUploadMeta {
                    file_id,
                    document_id: None,
                    file_name: name,
                    is_filler: false,
                });
            }
            if let Some(meta) = &filler_meta {
                let right = row_len.saturating_sub(row.len());
                row.extend(std::iter::repeat_n(meta.clone(), right));
            }
            rows.push(row);
        }

        tracing::debug!(rows = rows.len(), "tiles uploaded");
        Ok(EmojiMatrix { rows })
    }

    async fn upload(
        &self,
        owner_id: i64,
        file_name: &str,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> EmojiGridResult<String> {
        with_rate_limit_retry("upload_sticker_file", &self.policy, cancel, || {
            self.platform
                .upload_sticker_file(owner_id, file_name, bytes.to_vec())
        })
        .await
    }

    async fn create_pack(
        &self,
        request: &PublishRequest,
        stickers: &[InputSticker],
        cancel: &CancellationToken,
    ) -> EmojiGridResult<()> {
        let mut first = stickers.len().min(MAX_STICKERS_IN_BATCH);
        let created = self.create(request, &stickers[..first], cancel).await;
        match created {
            Ok(()) => {}
            Err(EmojiGridError::Platform(PlatformError::NoWebm)) if first > 1 => {
                tracing::warn!(batch = first, "batch creation rejected as non-webm, retrying with one sticker");
                first = 1;
                self.create(request, &stickers[..first], cancel).await?;
            }
            Err(e) => return Err(e),
        }
        tracing::debug!(batch = first, remaining = stickers.len() - first, "pack created");

        for sticker in &stickers[first..] {
            self.add(request, sticker, cancel).await?;
        }
        Ok(())
    }

    async fn extend_pack(
        &self,
        request: &PublishRequest,
        stickers: &[InputSticker],
        cancel: &CancellationToken,
    ) -> EmojiGridResult<()> {
        for sticker in stickers {
            self.add(request, sticker, cancel).await?;
        }
        Ok(())
    }

    async fn create(
        &self,
        request: &PublishRequest,
        batch: &[InputSticker],
        cancel: &CancellationToken,
    ) -> EmojiGridResult<()> {
        with_rate_limit_retry("create_sticker_set", &self.policy, cancel, || {
            self.platform
                .create_sticker_set(request.owner_id, &request.pack, &request.title, batch)
        })
        .await
    }

    async fn add(
        &self,
        request: &PublishRequest,
        sticker: &InputSticker,
        cancel: &CancellationToken,
    ) -> EmojiGridResult<()> {
        with_rate_limit_retry("add_sticker_to_set", &self.policy, cancel, || {
            self.platform
                .add_sticker_to_set(request.owner_id, &request.pack, sticker)
        })
        .await
    }

    async fn fetch_set(&self, pack: &str, cancel: &CancellationToken) -> EmojiGridResult<StickerSet> {
        with_rate_limit_retry("get_sticker_set", &self.policy, cancel, || {
            self.platform.get_sticker_set(pack)
        })
        .await
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
