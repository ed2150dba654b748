//! Renderweld Audio Stitcher
//!
//! Merges independently rendered audio chunks into one continuous,
//! drift-free track: either re-encoded into a target codec, or
//! stream-copied with frame-aligned trim windows so chunk boundaries stay
//! inaudible and no generation loss occurs.

pub mod codec;
pub mod manifest;
pub mod progress;
pub mod stitch;

pub use codec::AudioCodec;
pub use manifest::{
    closest_aligned_time, frame_duration_us, ManifestEntry, SEGMENT_PADDING_FRAMES,
};
pub use stitch::{AudioStitcher, CombineAudioParams};
