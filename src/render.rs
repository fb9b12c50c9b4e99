//! Parallel tile rendering.
//!
//! Every planned cell becomes one transcoder invocation on a fixed-size worker pool. Results
//! arrive in completion order and are put back into planner order after the pool joins.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
};

use crate::{
    config::EngineConfig,
    error::{EmojiGridError, EmojiGridResult},
    plan::{TileCell, TilePlan},
};

/// Colour-key removal applied to every tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackgroundKey {
    /// `0xRRGGBB` or any colour the transcoder understands.
    pub color: String,
    pub similarity: String,
    pub blend: String,
}

impl BackgroundKey {
    /// Builds a key from user options, filling unset thresholds from `cfg`.
    ///
    /// Thresholds without a colour are rejected: they only refine a colour key.
    pub fn resolve(
        color: Option<&str>,
        similarity: Option<&str>,
        blend: Option<&str>,
        cfg: &EngineConfig,
    ) -> EmojiGridResult<Option<Self>> {
        let Some(color) = color.filter(|c| !c.is_empty()) else {
            if similarity.is_some() || blend.is_some() {
                return Err(EmojiGridError::validation(
                    "background similarity and blend refine a background colour; \
                     set a background colour to use them",
                ));
            }
            return Ok(None);
        };

        Ok(Some(Self {
            color: color_to_hex(color),
            similarity: normalize_threshold(similarity.unwrap_or(&cfg.background_similarity)),
            blend: normalize_threshold(blend.unwrap_or(&cfg.background_blend)),
        }))
    }
}

// Users write "0,2" as often as "0.2".
fn normalize_threshold(v: &str) -> String {
    v.trim().replace(',', ".")
}

const NAMED_COLORS: [(&str, &str); 13] = [
    ("black", "0x000000"),
    ("white", "0xFFFFFF"),
    ("red", "0xFF0000"),
    ("green", "0x00FF00"),
    ("blue", "0x0000FF"),
    ("yellow", "0xFFFF00"),
    ("cyan", "0x00FFFF"),
    ("magenta", "0xFF00FF"),
    ("gray", "0x808080"),
    ("purple", "0x800080"),
    ("orange", "0xFFA500"),
    ("brown", "0x8B4513"),
    ("pink", "0xFFC0CB"),
];

/// Resolves a colour name to `0xRRGGBB`. Hex input passes through; unknown names become black.
pub fn color_to_hex(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    if let Some((_, hex)) = NAMED_COLORS.iter().find(|(n, _)| *n == lower) {
        return (*hex).to_string();
    }
    if lower.starts_with("0x") {
        return name.trim().to_string();
    }
    "0x000000".to_string()
}

/// Per-build settings shared by every tile.
#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub background: Option<BackgroundKey>,
    /// Fill for the partial last row; keyed out when no background key is set.
    pub pad_key: BackgroundKey,
    pub crf: u32,
    pub clip_seconds: f32,
    pub fps: u32,
}

impl RenderOptions {
    pub fn new(cfg: &EngineConfig, background: Option<BackgroundKey>, quality_level: u32) -> Self {
        Self {
            background,
            pad_key: BackgroundKey {
                color: cfg.pad_color.clone(),
                similarity: cfg.background_similarity.clone(),
                blend: cfg.background_blend.clone(),
            },
            crf: cfg.crf_for_quality(quality_level),
            clip_seconds: cfg.clip_seconds,
            fps: cfg.fps,
        }
    }

    /// Colour key applied to `cell`, if any.
    pub fn key_for(&self, cell: &TileCell) -> Option<&BackgroundKey> {
        match &self.background {
            Some(key) => Some(key),
            None if cell.is_partial_last_row => Some(&self.pad_key),
            None => None,
        }
    }

    /// Fill for the partial last row: the background colour when one is set, so the same key
    /// removes it.
    pub fn pad_color(&self) -> &str {
        self.background
            .as_ref()
            .map_or(&self.pad_key.color, |k| &k.color)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileJob {
    pub position: usize,
    pub cell: TileCell,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Result of one worker. Either `error` is set or `output_path` holds the rendered tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedTile {
    pub position: usize,
    pub output_path: PathBuf,
    pub error: Option<String>,
}

/// External media-transform tool.
pub trait TileTranscoder: Send + Sync {
    /// Crops, keys and encodes one tile into `job.output`.
    fn transcode_tile(&self, job: &TileJob, opts: &RenderOptions) -> EmojiGridResult<()>;

    /// Scales the source to the planned size.
    fn resize_source(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
    ) -> EmojiGridResult<()>;

    /// Renders a blank, fully transparent tile used as grid filler.
    fn render_filler(&self, output: &Path, opts: &RenderOptions) -> EmojiGridResult<()>;
}

pub fn tile_file_name(cell: &TileCell) -> String {
    format!("emoji_{}_{}.webm", cell.row, cell.col)
}

/// Puts rendered tiles back into planner order, whatever order they completed in.
pub fn reassemble(mut tiles: Vec<RenderedTile>) -> Vec<RenderedTile> {
    tiles.sort_by_key(|t| t.position);
    tiles
}

pub struct TileRenderer {
    pool: rayon::ThreadPool,
    transcoder: Arc<dyn TileTranscoder>,
}

impl TileRenderer {
    pub fn new(workers: usize, transcoder: Arc<dyn TileTranscoder>) -> EmojiGridResult<Self> {
        Ok(Self {
            pool: build_thread_pool(workers)?,
            transcoder,
        })
    }

    pub fn transcoder(&self) -> &dyn TileTranscoder {
        self.transcoder.as_ref()
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Renders every cell of `plan` from `source` into `out_dir`.
    ///
    /// Returns the tile paths in planner order. Failed tiles are logged and skipped by the
    /// workers; any shortfall against the planned count fails the whole render.
    #[tracing::instrument(skip(self, plan, opts), fields(tiles = plan.tile_count()))]
    pub fn render(
        &self,
        plan: &TilePlan,
        source: &Path,
        out_dir: &Path,
        opts: &RenderOptions,
    ) -> EmojiGridResult<Vec<PathBuf>> {
        let jobs: Vec<TileJob> = plan
            .cells
            .iter()
            .map(|cell| TileJob {
                position: plan.position(cell),
                cell: *cell,
                input: source.to_path_buf(),
                output: out_dir.join(tile_file_name(cell)),
            })
            .collect();

        let rendered = reassemble(self.run_jobs(&jobs, opts));

        let mut paths = Vec::with_capacity(rendered.len());
        let mut failures = Vec::new();
        for tile in rendered {
            match tile.error {
                None => paths.push(tile.output_path),
                Some(err) => failures.push((tile.position, err)),
            }
        }

        if paths.len() != jobs.len() {
            let first = failures
                .first()
                .map(|(pos, err)| format!(" (first: tile {pos}: {err})"))
                .unwrap_or_default();
            return Err(EmojiGridError::render(format!(
                "encountered {} errors during processing, rendered {} of {} tiles{first}",
                failures.len(),
                paths.len(),
                jobs.len()
            )));
        }

        tracing::debug!(rendered = paths.len(), "tile render complete");
        Ok(paths)
    }

    fn run_jobs(&self, jobs: &[TileJob], opts: &RenderOptions) -> Vec<RenderedTile> {
        let (tx, rx) = mpsc::channel::<RenderedTile>();
        let transcoder = self.transcoder.as_ref();

        self.pool.scope(|s| {
            for job in jobs {
                let tx = tx.clone();
                s.spawn(move |_| {
                    let error = match transcoder.transcode_tile(job, opts) {
                        Ok(()) => None,
                        Err(e) => {
                            tracing::warn!(
                                position = job.position,
                                row = job.cell.row,
                                col = job.cell.col,
                                error = %e,
                                "tile transcode failed"
                            );
                            Some(e.to_string())
                        }
                    };
                    // The receiver outlives the scope, so this send cannot fail.
                    let _ = tx.send(RenderedTile {
                        position: job.position,
                        output_path: job.output.clone(),
                        error,
                    });
                });
            }
        });
        drop(tx);

        rx.into_iter().collect()
    }
}

fn build_thread_pool(workers: usize) -> EmojiGridResult<rayon::ThreadPool> {
    if workers == 0 {
        return Err(EmojiGridError::validation(
            "renderer 'workers' must be >= 1",
        ));
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("emojigrid-render-{i}"))
        .build()
        .map_err(|e| EmojiGridError::render(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::Mutex,
        time::Duration,
    };

    use super::*;
    use crate::plan::plan_tiles;

    /// Sleeps longer for earlier tiles so completion order is reversed.
    struct SlowFirst {
        total: usize,
        fail: HashSet<usize>,
        seen: Mutex<Vec<usize>>,
    }

    impl TileTranscoder for SlowFirst {
        fn transcode_tile(&self, job: &TileJob, _opts: &RenderOptions) -> EmojiGridResult<()> {
            std::thread::sleep(Duration::from_millis(((self.total - job.position) * 2) as u64));
            self.seen.lock().unwrap().push(job.position);
            if self.fail.contains(&job.position) {
                return Err(EmojiGridError::render("ffmpeg exited with status 1"));
            }
            Ok(())
        }

        fn resize_source(&self, _: &Path, _: &Path, _: u32, _: u32) -> EmojiGridResult<()> {
            Ok(())
        }

        fn render_filler(&self, _: &Path, _: &RenderOptions) -> EmojiGridResult<()> {
            Ok(())
        }
    }

    fn opts() -> RenderOptions {
        RenderOptions::new(&EngineConfig::default(), None, 0)
    }

    #[test]
    fn output_follows_planner_order() {
        let plan = plan_tiles(400, 300, 0).unwrap();
        let transcoder = Arc::new(SlowFirst {
            total: plan.tile_count(),
            fail: HashSet::new(),
            seen: Mutex::new(Vec::new()),
        });
        let renderer = TileRenderer::new(4, transcoder.clone()).unwrap();

        let paths = renderer
            .render(&plan, Path::new("src.webm"), Path::new("out"), &opts())
            .unwrap();

        let expected: Vec<PathBuf> = plan
            .cells
            .iter()
            .map(|c| Path::new("out").join(tile_file_name(c)))
            .collect();
        assert_eq!(paths, expected);
        assert_eq!(transcoder.seen.lock().unwrap().len(), plan.tile_count());
    }

    #[test]
    fn one_failed_tile_does_not_stop_siblings_but_fails_the_render() {
        let plan = plan_tiles(300, 200, 0).unwrap();
        let transcoder = Arc::new(SlowFirst {
            total: plan.tile_count(),
            fail: HashSet::from([2]),
            seen: Mutex::new(Vec::new()),
        });
        let renderer = TileRenderer::new(2, transcoder.clone()).unwrap();

        let err = renderer
            .render(&plan, Path::new("src.webm"), Path::new("out"), &opts())
            .unwrap_err();
        assert!(matches!(err, EmojiGridError::Render(_)));
        assert!(err.to_string().contains("rendered 5 of 6"));
        assert_eq!(transcoder.seen.lock().unwrap().len(), 6);
    }

    #[test]
    fn reassemble_is_a_stable_sort_by_position() {
        let tile = |position| RenderedTile {
            position,
            output_path: PathBuf::from(format!("{position}.webm")),
            error: None,
        };
        let out = reassemble(vec![tile(3), tile(0), tile(2), tile(1)]);
        let order: Vec<usize> = out.iter().map(|t| t.position).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let transcoder = Arc::new(SlowFirst {
            total: 0,
            fail: HashSet::new(),
            seen: Mutex::new(Vec::new()),
        });
        assert!(TileRenderer::new(0, transcoder).is_err());
    }

    #[test]
    fn background_thresholds_require_a_colour() {
        let cfg = EngineConfig::default();
        assert!(BackgroundKey::resolve(None, Some("0.2"), None, &cfg).is_err());
        assert_eq!(BackgroundKey::resolve(None, None, None, &cfg).unwrap(), None);

        let key = BackgroundKey::resolve(Some("White"), Some("0,3"), None, &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(key.color, "0xFFFFFF");
        assert_eq!(key.similarity, "0.3");
        assert_eq!(key.blend, "0.1");
    }

    #[test]
    fn colour_names_resolve() {
        assert_eq!(color_to_hex("red"), "0xFF0000");
        assert_eq!(color_to_hex("0x123456"), "0x123456");
        assert_eq!(color_to_hex("chartreuse-ish"), "0x000000");
    }

    #[test]
    fn partial_row_is_keyed_on_pad_colour_without_background() {
        let plan = plan_tiles(200, 150, 0).unwrap();
        let o = opts();
        assert!(o.key_for(&plan.cells[0]).is_none());
        assert_eq!(o.key_for(&plan.cells[3]), Some(&o.pad_key));
    }
}
