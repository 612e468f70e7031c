//! Video codec selection and per-codec frame production profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{FRAME_HEIGHT, FRAME_WIDTH, MJPEG_QUALITY, VIDEO_FPS};
use crate::error::MemvidError;

/// Codecs a build can request.
///
/// `Png` and `Mjpeg` are produced in-process inside an AVI envelope. The remaining
/// codecs are high-density and need the external backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// Lossless PNG frames; the baseline every fallback lands on.
    #[default]
    Png,
    Mjpeg,
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    pub const ALL: [Self; 5] = [Self::Png, Self::Mjpeg, Self::H264, Self::H265, Self::Av1];

    /// The codec that is always available in-process.
    #[must_use]
    pub fn baseline() -> Self {
        Self::Png
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Mjpeg => "mjpeg",
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Av1 => "av1",
        }
    }

    #[must_use]
    pub fn is_high_density(self) -> bool {
        matches!(self, Self::H264 | Self::H265 | Self::Av1)
    }

    /// ffmpeg encoder name passed to the external backend.
    #[must_use]
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Mjpeg => "mjpeg",
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Av1 => "libaom-av1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VideoCodec {
    type Err = MemvidError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" | "mpng" | "lossless" => Ok(Self::Png),
            "mjpeg" | "mjpg" => Ok(Self::Mjpeg),
            "h264" | "avc" | "libx264" => Ok(Self::H264),
            "h265" | "hevc" | "libx265" => Ok(Self::H265),
            "av1" | "libaom-av1" => Ok(Self::Av1),
            other => Err(MemvidError::config(format!("unknown video codec '{other}'"))),
        }
    }
}

/// Resolution, rate, and compression parameters governing frame production for one codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecProfile {
    pub codec: VideoCodec,
    pub file_extension: String,
    pub fps: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// JPEG quality for `Mjpeg`, CRF for the external codecs, ignored for `Png`.
    pub quality_factor: u8,
    pub compression_preset: String,
    pub pixel_format: String,
    #[serde(default)]
    pub extra_params: Vec<String>,
}

impl CodecProfile {
    #[must_use]
    pub fn for_codec(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::Png => Self::in_process(codec, 100),
            VideoCodec::Mjpeg => Self::in_process(codec, MJPEG_QUALITY),
            VideoCodec::H265 => Self {
                codec,
                file_extension: "mkv".into(),
                fps: VIDEO_FPS,
                frame_width: FRAME_WIDTH,
                frame_height: FRAME_HEIGHT,
                quality_factor: 28,
                compression_preset: "slower".into(),
                pixel_format: "yuv420p".into(),
                extra_params: vec![
                    "-x265-params".into(),
                    "keyint=1:tune=stillimage:no-scenecut:strong-intra-smoothing:constrained-intra"
                        .into(),
                ],
            },
            VideoCodec::H264 => Self {
                codec,
                file_extension: "mkv".into(),
                fps: VIDEO_FPS,
                frame_width: FRAME_WIDTH,
                frame_height: FRAME_HEIGHT,
                quality_factor: 28,
                compression_preset: "slower".into(),
                pixel_format: "yuv420p".into(),
                extra_params: vec!["-tune".into(), "stillimage".into(), "-g".into(), "1".into()],
            },
            VideoCodec::Av1 => Self {
                codec,
                file_extension: "mkv".into(),
                fps: 60,
                frame_width: 720,
                frame_height: 720,
                quality_factor: 28,
                compression_preset: "medium".into(),
                pixel_format: "yuv420p".into(),
                extra_params: vec!["-cpu-used".into(), "5".into(), "-g".into(), "1".into()],
            },
        }
    }

    fn in_process(codec: VideoCodec, quality_factor: u8) -> Self {
        Self {
            codec,
            file_extension: "avi".into(),
            fps: VIDEO_FPS,
            frame_width: FRAME_WIDTH,
            frame_height: FRAME_HEIGHT,
            quality_factor,
            compression_preset: "none".into(),
            pixel_format: "gray".into(),
            extra_params: Vec::new(),
        }
    }

    /// Numeric sanity checks that do not depend on QR geometry.
    pub(crate) fn check_basics(&self) -> crate::Result<()> {
        if self.fps == 0 {
            return Err(MemvidError::config(format!(
                "profile {}: fps must be non-zero",
                self.codec
            )));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(MemvidError::config(format!(
                "profile {}: frame dimensions must be non-zero",
                self.codec
            )));
        }
        if self.codec == VideoCodec::Mjpeg && !(1..=100).contains(&self.quality_factor) {
            return Err(MemvidError::config(format!(
                "profile {}: JPEG quality must be within 1..=100",
                self.codec
            )));
        }
        if self.file_extension.trim().is_empty() {
            return Err(MemvidError::config(format!(
                "profile {}: file extension must not be empty",
                self.codec
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_aliases_parse() {
        assert_eq!("HEVC".parse::<VideoCodec>().unwrap(), VideoCodec::H265);
        assert_eq!("libx264".parse::<VideoCodec>().unwrap(), VideoCodec::H264);
        assert_eq!("mjpg".parse::<VideoCodec>().unwrap(), VideoCodec::Mjpeg);
        assert!("mp4v".parse::<VideoCodec>().is_err());
    }

    #[test]
    fn only_external_codecs_are_high_density() {
        let dense: Vec<_> = VideoCodec::ALL
            .into_iter()
            .filter(|codec| codec.is_high_density())
            .collect();
        assert_eq!(dense, vec![VideoCodec::H264, VideoCodec::H265, VideoCodec::Av1]);
        assert!(!VideoCodec::baseline().is_high_density());
    }

    #[test]
    fn default_profiles_pass_basic_checks() {
        for codec in VideoCodec::ALL {
            CodecProfile::for_codec(codec).check_basics().unwrap();
        }
    }
}
