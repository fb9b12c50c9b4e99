use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::{
    error::{EmojiGridError, EmojiGridResult},
    limits::TILE_SIZE,
    plan::TileCell,
    render::{RenderOptions, TileJob, TileTranscoder},
};

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> EmojiGridResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// `-vf` chain for one tile.
///
/// A partial last-row cell is cropped to its real height, then padded back to a full tile with
/// the pad colour below the content. The pad takes the background colour when one is set.
pub fn tile_filter_chain(cell: &TileCell, opts: &RenderOptions) -> String {
    let mut vf = Vec::with_capacity(4);
    if cell.is_partial_last_row {
        vf.push(format!(
            "crop={}:{}:{}:{}",
            cell.width, cell.height, cell.source_x, cell.source_y
        ));
        vf.push(format!("scale={TILE_SIZE}:{}", cell.height));
        vf.push(format!(
            "pad={TILE_SIZE}:{TILE_SIZE}:0:0:color={}",
            opts.pad_color()
        ));
    } else {
        vf.push(format!(
            "crop={}:{}:{}:{}",
            cell.width, cell.height, cell.source_x, cell.source_y
        ));
    }

    if let Some(key) = opts.key_for(cell) {
        vf.push(format!(
            "colorkey={}:similarity={}:blend={}",
            key.color, key.similarity, key.blend
        ));
    }
    vf.push("setsar=1:1".to_string());
    vf.join(",")
}

fn vp9_output_args(opts: &RenderOptions) -> Vec<String> {
    vec![
        "-c:v".into(),
        "libvpx-vp9".into(),
        "-crf".into(),
        opts.crf.to_string(),
        "-b:v".into(),
        "0".into(),
        "-t".into(),
        format!("{:.1}", opts.clip_seconds),
        "-r".into(),
        opts.fps.to_string(),
        "-auto-alt-ref".into(),
        "1".into(),
        "-metadata:s:v:0".into(),
        "alpha_mode=1".into(),
        "-an".into(),
    ]
}

/// Full argument list for one tile, without the program name.
pub fn tile_args(job: &TileJob, opts: &RenderOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into()];
    args.push("-i".into());
    args.push(job.input.clone().into_os_string());
    args.extend(vp9_output_args(opts).into_iter().map(OsString::from));
    args.push("-vf".into());
    args.push(tile_filter_chain(&job.cell, opts).into());
    args.push(job.output.clone().into_os_string());
    args
}

/// Drives the system `ffmpeg` binary.
#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    ffmpeg_bin: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    fn run(&self, args: &[OsString], what: &str) -> EmojiGridResult<()> {
        let output = Command::new(&self.ffmpeg_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                EmojiGridError::render(format!(
                    "failed to spawn ffmpeg for {what} (is it installed and on PATH?): {e}"
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EmojiGridError::render(format!(
                "ffmpeg {what} exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl TileTranscoder for FfmpegTranscoder {
    fn transcode_tile(&self, job: &TileJob, opts: &RenderOptions) -> EmojiGridResult<()> {
        self.run(&tile_args(job, opts), "tile")
    }

    fn resize_source(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
    ) -> EmojiGridResult<()> {
        ensure_parent_dir(output)?;
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-vf".into(),
            format!("scale={width}:{height}").into(),
            output.as_os_str().to_owned(),
        ];
        self.run(&args, "resize")
    }

    fn render_filler(&self, output: &Path, opts: &RenderOptions) -> EmojiGridResult<()> {
        ensure_parent_dir(output)?;
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!(
                "color=c=black@0.0:s={TILE_SIZE}x{TILE_SIZE}:r={}:d={:.1},format=yuva420p",
                opts.fps, opts.clip_seconds
            )
            .into(),
            "-pix_fmt".into(),
            "yuva420p".into(),
        ];
        args.extend(vp9_output_args(opts).into_iter().map(OsString::from));
        args.push(output.as_os_str().to_owned());
        self.run(&args, "filler")
    }
}
