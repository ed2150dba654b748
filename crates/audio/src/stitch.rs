//! Stitches chunk-rendered audio segments into a single track.
//!
//! Two mutually exclusive strategies, selected by
//! [`CombineAudioParams::seamless`]: re-encoding the ordered segments into
//! the target codec, or stream-copying them with frame-aligned trim
//! windows so no generation loss occurs. Both hand a concat manifest to
//! the external encoder, follow its stderr for progress, and resolve with
//! the output path on a zero exit status. One encode runs per manifest;
//! there is no internal parallelism.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use renderweld_common::{AssemblyConfig, WeldError, WeldResult};

use crate::codec::AudioCodec;
use crate::manifest::{plain_entries, render_manifest, seamless_entries};
use crate::progress::parse_encode_progress;

/// Name of the manifest file written into the scratch directory.
const MANIFEST_FILE_NAME: &str = "audio-files.txt";

/// Bitrate used when the caller does not request one.
const DEFAULT_AUDIO_BITRATE: &str = "320k";

/// One audio combine request.
#[derive(Debug, Clone)]
pub struct CombineAudioParams {
    /// Stream-copy with frame-aligned trims instead of re-encoding.
    pub seamless: bool,

    /// Segment files in playback order.
    pub files: Vec<PathBuf>,

    /// Final output file.
    pub output: PathBuf,

    /// Scratch directory the manifest is written into. Deleted when a
    /// re-encode fails; otherwise the caller owns its lifetime.
    pub scratch_dir: PathBuf,

    /// Nominal duration of one chunk render in seconds.
    pub chunk_duration_secs: f64,

    /// Target codec for the re-encode strategy.
    pub codec: AudioCodec,

    /// Requested bitrate (e.g. "320k").
    pub bitrate: Option<String>,

    /// Optional comment tag embedded in the output metadata.
    pub metadata_comment: Option<String>,
}

/// Runs the external encoder over concat manifests.
pub struct AudioStitcher {
    encoder_bin: PathBuf,
}

impl AudioStitcher {
    pub fn new(config: &AssemblyConfig) -> Self {
        Self {
            encoder_bin: config.encoder_bin.clone(),
        }
    }

    pub fn with_encoder(encoder_bin: impl Into<PathBuf>) -> Self {
        Self {
            encoder_bin: encoder_bin.into(),
        }
    }

    /// Check that the encoder binary is callable.
    pub fn is_available(&self) -> bool {
        Command::new(&self.encoder_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Combine the segments, returning the output path.
    pub fn combine(&self, params: &CombineAudioParams) -> WeldResult<PathBuf> {
        if params.seamless {
            self.combine_seamless(params)
        } else {
            self.encode(params)
        }
    }

    fn encode(&self, params: &CombineAudioParams) -> WeldResult<PathBuf> {
        let manifest = render_manifest(&plain_entries(&params.files))?;
        let manifest_path = write_manifest(&params.scratch_dir, &manifest)?;

        let args = encode_args(params, &manifest_path);
        match self.run_encoder(&args) {
            Ok(()) => Ok(params.output.clone()),
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&params.scratch_dir) {
                    tracing::warn!(error = %cleanup, "Failed to remove manifest scratch dir");
                }
                Err(e)
            }
        }
    }

    fn combine_seamless(&self, params: &CombineAudioParams) -> WeldResult<PathBuf> {
        let entries = seamless_entries(&params.files, params.chunk_duration_secs);
        let manifest = render_manifest(&entries)?;
        tracing::debug!(manifest = %manifest, "Seamless concat manifest");
        let manifest_path = write_manifest(&params.scratch_dir, &manifest)?;

        let args = seamless_args(params, &manifest_path);
        self.run_encoder(&args)?;
        Ok(params.output.clone())
    }

    fn run_encoder(&self, args: &[String]) -> WeldResult<()> {
        tracing::debug!(bin = %self.encoder_bin.display(), args = ?args, "Running audio encoder");

        let mut child = Command::new(&self.encoder_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                WeldError::encode(format!(
                    "failed to start encoder {}: {e}",
                    self.encoder_bin.display()
                ))
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| WeldError::encode("failed to capture encoder stderr"))?;

        // Stats lines are CR-terminated while diagnostics end in LF; split
        // on either.
        let mut captured = String::new();
        let mut pending = String::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = stderr
                .read(&mut buf)
                .map_err(|e| WeldError::encode(format!("failed reading encoder stderr: {e}")))?;
            if n == 0 {
                break;
            }
            pending.push_str(&String::from_utf8_lossy(&buf[..n]));
            while let Some(pos) = pending.find(['\r', '\n']) {
                let line: String = pending.drain(..=pos).collect();
                handle_stderr_line(line.trim_end_matches(['\r', '\n']), &mut captured);
            }
        }
        if !pending.trim().is_empty() {
            handle_stderr_line(pending.trim_end(), &mut captured);
        }

        let status = child
            .wait()
            .map_err(|e| WeldError::encode(format!("failed to wait on encoder: {e}")))?;
        if !status.success() {
            return Err(WeldError::encode(format!(
                "encoder failed (status {status}): {}",
                captured.trim()
            )));
        }
        Ok(())
    }
}

fn handle_stderr_line(line: &str, captured: &mut String) {
    if line.is_empty() {
        return;
    }
    match parse_encode_progress(line) {
        Some(seconds) => tracing::debug!(seconds, "Encoded audio"),
        None => tracing::debug!(target: "encoder", "{line}"),
    }
    captured.push_str(line);
    captured.push('\n');
}

fn write_manifest(scratch_dir: &Path, manifest: &str) -> WeldResult<PathBuf> {
    std::fs::create_dir_all(scratch_dir)?;
    let path = scratch_dir.join(MANIFEST_FILE_NAME);
    std::fs::write(&path, manifest)?;
    Ok(path)
}

fn concat_input_args(manifest_path: &Path) -> Vec<String> {
    vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest_path.display().to_string(),
    ]
}

fn encode_args(params: &CombineAudioParams, manifest_path: &Path) -> Vec<String> {
    let mut args = concat_input_args(manifest_path);
    args.push("-c:a".to_string());
    args.push(params.codec.ffmpeg_encoder_name().to_string());
    if let Some(cutoff) = params.codec.cutoff_hz() {
        args.push("-cutoff".to_string());
        args.push(cutoff.to_string());
    }
    args.push("-b:a".to_string());
    args.push(
        params
            .bitrate
            .clone()
            .unwrap_or_else(|| DEFAULT_AUDIO_BITRATE.to_string()),
    );
    args.push("-vn".to_string());
    push_metadata(&mut args, params.metadata_comment.as_deref());
    args.push("-y".to_string());
    args.push(params.output.display().to_string());
    args
}

fn seamless_args(params: &CombineAudioParams, manifest_path: &Path) -> Vec<String> {
    let mut args = concat_input_args(manifest_path);
    args.push("-c:a".to_string());
    args.push("copy".to_string());
    args.push("-vn".to_string());
    push_metadata(&mut args, params.metadata_comment.as_deref());
    args.push("-y".to_string());
    args.push(params.output.display().to_string());
    args
}

fn push_metadata(args: &mut Vec<String>, comment: Option<&str>) {
    if let Some(comment) = comment {
        args.push("-metadata".to_string());
        args.push(format!("comment={comment}"));
    }
}
