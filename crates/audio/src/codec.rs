//! Audio codec selection for the stitcher.

use std::fmt;
use std::str::FromStr;

use renderweld_common::WeldError;
use serde::{Deserialize, Serialize};

/// Target codec for the re-encode strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
    #[serde(rename = "pcm-16")]
    Pcm16,
}

impl AudioCodec {
    /// Name of the ffmpeg encoder implementing this codec.
    pub fn ffmpeg_encoder_name(self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Mp3 => "libmp3lame",
            Self::Opus => "libopus",
            Self::Pcm16 => "pcm_s16le",
        }
    }

    /// Low-pass cutoff override, where the encoder needs one. The native
    /// AAC encoder caps its default cutoff well below audible range at
    /// higher bitrates; 18 kHz keeps the full band.
    pub fn cutoff_hz(self) -> Option<u32> {
        match self {
            Self::Aac => Some(18_000),
            _ => None,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Pcm16 => "pcm-16",
        };
        f.write_str(name)
    }
}

impl FromStr for AudioCodec {
    type Err = WeldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aac" => Ok(Self::Aac),
            "mp3" => Ok(Self::Mp3),
            "opus" => Ok(Self::Opus),
            "pcm-16" => Ok(Self::Pcm16),
            other => Err(WeldError::unsupported(format!(
                "unknown audio codec: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_names() {
        assert_eq!(AudioCodec::Aac.ffmpeg_encoder_name(), "aac");
        assert_eq!(AudioCodec::Mp3.ffmpeg_encoder_name(), "libmp3lame");
        assert_eq!(AudioCodec::Opus.ffmpeg_encoder_name(), "libopus");
        assert_eq!(AudioCodec::Pcm16.ffmpeg_encoder_name(), "pcm_s16le");
    }

    #[test]
    fn test_only_aac_gets_a_cutoff() {
        assert_eq!(AudioCodec::Aac.cutoff_hz(), Some(18_000));
        assert_eq!(AudioCodec::Mp3.cutoff_hz(), None);
        assert_eq!(AudioCodec::Opus.cutoff_hz(), None);
        assert_eq!(AudioCodec::Pcm16.cutoff_hz(), None);
    }

    #[test]
    fn test_round_trips_through_strings() {
        for codec in [
            AudioCodec::Aac,
            AudioCodec::Mp3,
            AudioCodec::Opus,
            AudioCodec::Pcm16,
        ] {
            assert_eq!(codec.to_string().parse::<AudioCodec>().unwrap(), codec);
        }
    }

    #[test]
    fn test_serde_uses_kebab_names() {
        let json = serde_json::to_string(&AudioCodec::Pcm16).unwrap();
        assert_eq!(json, "\"pcm-16\"");
    }
}
