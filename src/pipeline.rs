//! End-to-end publishing: fetch, probe, plan, render, admit, build, select.
//!
//! [`Publisher::publish`] owns the restart loop. An oversized tile sends the whole request back
//! to rendering one quality level lower; every other failure is final.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::{
    admission::AdmissionGate,
    compose::select_composition,
    config::EngineConfig,
    error::{EmojiGridError, EmojiGridResult},
    media::{MediaSource, probe_dimensions},
    plan::{TilePlan, plan_tiles},
    platform::{RetryPolicy, StickerPlatform, StickerSet},
    render::{RenderOptions, TileRenderer, TileTranscoder},
    upload::{BuildOutcome, EmojiMatrix, FILLER_FILE_NAME, PackBuilder, PublishRequest, TileUploadMeta},
};

pub const RESIZED_FILE_NAME: &str = "resized.webm";

/// Per-request scratch directory, removed on drop unless kept.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Creates `<root>/emojigrid_<owner>_<unix-seconds>`, suffixed when that name is taken.
    pub fn create(root: &Path, owner_id: i64) -> EmojiGridResult<Self> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        std::fs::create_dir_all(root)
            .with_context(|| format!("create work root '{}'", root.display()))?;

        let base = format!("emojigrid_{owner_id}_{secs}");
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{attempt}")
            };
            let path = root.join(name);
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path, keep: false }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("create work dir '{}'", path.display()))
                        .into());
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leaves the directory on disk and returns its path.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove work dir");
        }
    }
}

/// What a successful publish hands back to the message sender.
#[derive(Clone, Debug)]
pub struct PublishedPack {
    pub set: StickerSet,
    pub matrix: EmojiMatrix,
    /// Entries to render in the outbound message, in order.
    pub selection: Vec<TileUploadMeta>,
    /// Stickers in the pack after this publish.
    pub emoji_count: usize,
    /// Resolved grid width in tiles.
    pub columns: u32,
    /// Quality level the pack was finally rendered at.
    pub quality_level: u32,
}

pub struct Publisher {
    cfg: EngineConfig,
    renderer: Arc<TileRenderer>,
    builder: PackBuilder,
    gate: Arc<AdmissionGate>,
}

impl Publisher {
    pub fn new(
        cfg: EngineConfig,
        transcoder: Arc<dyn TileTranscoder>,
        platform: Arc<dyn StickerPlatform>,
        gate: Arc<AdmissionGate>,
    ) -> EmojiGridResult<Self> {
        cfg.validate()?;
        let renderer = Arc::new(TileRenderer::new(cfg.workers, transcoder)?);
        let builder = PackBuilder::new(
            platform,
            RetryPolicy::from_config(&cfg),
            cfg.sticker_emoji.clone(),
        );
        Ok(Self {
            cfg,
            renderer,
            builder,
            gate,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    #[tracing::instrument(
        skip_all,
        fields(pack = %request.pack, owner = request.owner_id, new_pack = request.is_new_pack)
    )]
    pub async fn publish(
        &self,
        mut request: PublishRequest,
        source: &dyn MediaSource,
        cancel: &CancellationToken,
    ) -> EmojiGridResult<PublishedPack> {
        let work = WorkDir::create(&self.cfg.work_root, request.owner_id)?;
        let fetched = source.fetch(work.path()).await?;

        let dims = {
            let (path, ffprobe) = (fetched.clone(), self.cfg.ffprobe_bin.clone());
            blocking("probe", move || probe_dimensions(&path, &ffprobe)).await?
        };
        let plan = plan_tiles(dims.width, dims.height, request.columns)?;
        tracing::info!(
            source_width = dims.width,
            source_height = dims.height,
            columns = plan.columns,
            tiles = plan.tile_count(),
            "planned"
        );

        let resized = work.path().join(RESIZED_FILE_NAME);
        {
            let renderer = Arc::clone(&self.renderer);
            let (input, output) = (fetched, resized.clone());
            let (w, h) = (plan.width, plan.height);
            blocking("resize", move || {
                renderer.transcoder().resize_source(&input, &output, w, h)
            })
            .await?;
        }

        let tiles_dir = work.path().join("tiles");
        std::fs::create_dir_all(&tiles_dir)
            .with_context(|| format!("create tile dir '{}'", tiles_dir.display()))?;

        loop {
            if cancel.is_cancelled() {
                return Err(EmojiGridError::Cancelled);
            }

            let opts = RenderOptions::new(
                &self.cfg,
                request.background.clone(),
                request.quality_level,
            );
            let tiles = self.render_tiles(&plan, &resized, &tiles_dir, &opts).await?;
            let filler = self.render_filler(&plan, work.path(), &opts).await?;

            let permit = self.gate.enter(&request.pack, cancel).await?;
            let outcome = self
                .builder
                .build(&request, &tiles, plan.columns, filler.as_deref(), cancel)
                .await;
            drop(permit);

            match outcome? {
                BuildOutcome::Published(built) => {
                    let selection = select_composition(&built.matrix, &built.set, &request);
                    let emoji_count = built.set.stickers.len();
                    tracing::info!(
                        emoji_count,
                        selected = selection.len(),
                        quality = request.quality_level,
                        "publish complete"
                    );
                    return Ok(PublishedPack {
                        set: built.set,
                        matrix: built.matrix,
                        selection,
                        emoji_count,
                        columns: plan.columns,
                        quality_level: request.quality_level,
                    });
                }
                BuildOutcome::NeedsQualityRetry => {
                    if request.quality_level >= self.cfg.max_quality_level {
                        return Err(EmojiGridError::validation(format!(
                            "tiles are still too large for the platform at quality level {}",
                            request.quality_level
                        )));
                    }
                    request.quality_level += 1;
                    tracing::info!(
                        quality = request.quality_level,
                        "restarting pipeline at lower quality"
                    );
                }
            }
        }
    }

    async fn render_tiles(
        &self,
        plan: &TilePlan,
        source: &Path,
        out_dir: &Path,
        opts: &RenderOptions,
    ) -> EmojiGridResult<Vec<PathBuf>> {
        let renderer = Arc::clone(&self.renderer);
        let (plan, source, out_dir, opts) = (
            plan.clone(),
            source.to_path_buf(),
            out_dir.to_path_buf(),
            opts.clone(),
        );
        blocking("render", move || {
            renderer.render(&plan, &source, &out_dir, &opts)
        })
        .await
    }

    async fn render_filler(
        &self,
        plan: &TilePlan,
        work: &Path,
        opts: &RenderOptions,
    ) -> EmojiGridResult<Option<Vec<u8>>> {
        if plan.transparent_spacing() == 0 {
            return Ok(None);
        }
        let renderer = Arc::clone(&self.renderer);
        let path = work.join(FILLER_FILE_NAME);
        let (out, opts) = (path.clone(), opts.clone());
        blocking("filler", move || {
            renderer.transcoder().render_filler(&out, &opts)
        })
        .await?;

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read filler clip '{}'", path.display()))?;
        Ok(Some(bytes))
    }
}

async fn blocking<T, F>(what: &'static str, f: F) -> EmojiGridResult<T>
where
    F: FnOnce() -> EmojiGridResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EmojiGridError::render(format!("{what} task failed: {e}")))?
}
