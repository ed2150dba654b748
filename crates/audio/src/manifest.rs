//! Concat-demuxer manifests with frame-accurate trim points.
//!
//! Chunk renders are encoded independently, so every segment boundary must
//! land exactly on an encoded-frame boundary or the stream-copied track
//! drifts against the video. All times in this module are microseconds.

use std::path::PathBuf;

use renderweld_common::{WeldError, WeldResult};

/// Sample rate every chunk render encodes at.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Samples per encoded audio frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

/// Frames trimmed from the head of every non-first segment. The chunk
/// renderer requests two frames of padding and its encoder prepends more
/// priming silence on top; together they amount to five frames. That
/// padding is a contract owed by the chunk renderer and cannot be verified
/// here.
pub const SEGMENT_PADDING_FRAMES: u32 = 5;

/// Duration of one encoded audio frame in microseconds.
pub fn frame_duration_us() -> f64 {
    f64::from(SAMPLES_PER_FRAME) / f64::from(DEFAULT_SAMPLE_RATE) * 1_000_000.0
}

/// Snap `target_us` to the nearest encoded-frame boundary.
pub fn closest_aligned_time(target_us: f64) -> f64 {
    let frames = target_us / frame_duration_us();
    frames.round() * frame_duration_us()
}

/// One entry of a concat manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub path: PathBuf,

    /// Trim start within the file, inclusive.
    pub inpoint_us: Option<f64>,

    /// Trim end within the file, exclusive.
    pub outpoint_us: Option<f64>,
}

impl ManifestEntry {
    fn render(&self, out: &mut String) {
        out.push_str(&format!("file '{}'\n", self.path.display()));
        if let Some(inpoint) = self.inpoint_us {
            out.push_str(&format!("inpoint {inpoint}us\n"));
        }
        if let Some(outpoint) = self.outpoint_us {
            out.push_str(&format!("outpoint {outpoint}us\n"));
        }
    }
}

/// Entries for the re-encode strategy: plain ordered concatenation.
pub fn plain_entries(files: &[PathBuf]) -> Vec<ManifestEntry> {
    files
        .iter()
        .map(|path| ManifestEntry {
            path: path.clone(),
            inpoint_us: None,
            outpoint_us: None,
        })
        .collect()
}

/// Entries for the seamless strategy.
///
/// Segment `i` of nominal duration `chunk_duration_secs` covers the ideal
/// window `[i·D, (i+1)·D)`; both ends are snapped to frame boundaries and
/// the snapped width is the segment's real duration. Non-first segments
/// start [`SEGMENT_PADDING_FRAMES`] frames into the file to drop the
/// padding the chunk renderer prepends.
pub fn seamless_entries(files: &[PathBuf], chunk_duration_secs: f64) -> Vec<ManifestEntry> {
    files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let ideal_start = i as f64 * chunk_duration_secs * 1_000_000.0;
            let ideal_end = (i + 1) as f64 * chunk_duration_secs * 1_000_000.0;

            let start = closest_aligned_time(ideal_start);
            let end = closest_aligned_time(ideal_end);
            let real_duration = end - start;

            let inpoint = if i == 0 {
                0.0
            } else {
                f64::from(SEGMENT_PADDING_FRAMES) * frame_duration_us()
            };
            let outpoint = inpoint + real_duration;

            ManifestEntry {
                path: path.clone(),
                inpoint_us: Some(inpoint),
                outpoint_us: Some(outpoint),
            }
        })
        .collect()
}

/// Render entries into concat-demuxer text.
pub fn render_manifest(entries: &[ManifestEntry]) -> WeldResult<String> {
    if entries.is_empty() {
        return Err(WeldError::manifest("no audio segments to combine"));
    }

    let mut out = String::new();
    for entry in entries {
        entry.render(&mut out);
    }
    Ok(out)
}
