//! Frame codec: chunk payload to QR raster and back.
//!
//! A frame is a grayscale raster of the profile's resolution with one QR code centered on a
//! white canvas. The QR carries the compact JSON form of a [`Chunk`], so a decoded frame can
//! verify its own id and frame number. Decoding never fails loudly: callers get a
//! [`FrameFault`] or `None` and decide what to do with the batch.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use qrcode::types::QrError;
use qrcode::{Color, QrCode, Version};

use crate::constants::QR_MAX_VERSION;
use crate::error::{MemvidError, Result};
use crate::types::{Chunk, CodecProfile, FrameFault, FrameNumber, QrSettings};

/// One video frame.
pub type Raster = GrayImage;

/// Byte-mode capacity of a version 40 code at EC level L.
const QR_MAX_PAYLOAD_BYTES: usize = 2953;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

fn modules_for_version(version: i16) -> u32 {
    17 + 4 * version as u32
}

/// Pixel extent of a rendered QR code including its quiet zone.
#[must_use]
pub fn pattern_extent(version: i16, qr: &QrSettings) -> u32 {
    (modules_for_version(version) + 2 * qr.border) * qr.box_size
}

/// Largest QR version whose rendered extent fits the profile's frame.
///
/// With a fixed version this checks that version; otherwise it searches for the largest
/// version that fits. Failure is a configuration error.
pub fn max_qr_version(qr: &QrSettings, profile: &CodecProfile) -> Result<i16> {
    let side = profile.frame_width.min(profile.frame_height);
    let fits = |version: i16| pattern_extent(version, qr) <= side;
    match qr.version {
        Some(version) if fits(version) => Ok(version),
        Some(version) => Err(MemvidError::config(format!(
            "QR version {version} needs {} px but profile {} frames are {}x{}",
            pattern_extent(version, qr),
            profile.codec,
            profile.frame_width,
            profile.frame_height
        ))),
        None => (1..=QR_MAX_VERSION).rev().find(|v| fits(*v)).ok_or_else(|| {
            MemvidError::config(format!(
                "profile {} frames ({}x{}) cannot hold a QR code at box size {} with border {}",
                profile.codec, profile.frame_width, profile.frame_height, qr.box_size, qr.border
            ))
        }),
    }
}

/// Encoder/decoder for one codec profile. Geometry is validated once, at construction.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    qr: QrSettings,
    width: u32,
    height: u32,
    max_version: i16,
}

impl FrameCodec {
    pub fn new(qr: &QrSettings, profile: &CodecProfile) -> Result<Self> {
        let max_version = max_qr_version(qr, profile)?;
        Ok(Self {
            qr: qr.clone(),
            width: profile.frame_width,
            height: profile.frame_height,
            max_version,
        })
    }

    #[must_use]
    pub fn max_version(&self) -> i16 {
        self.max_version
    }

    #[must_use]
    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// JSON-escaped chunk text, in bytes, that one frame carries for any chunk id.
    ///
    /// The envelope is sized for the widest id and frame number, so the bound holds for
    /// every position in the container.
    #[must_use]
    pub fn text_budget(&self) -> usize {
        let envelope = Chunk::new(u64::MAX, "")
            .to_payload()
            .map_or(0, |payload| payload.len());
        self.payload_capacity().saturating_sub(envelope)
    }

    /// Largest byte-mode payload that fits the maximum version at the configured EC level.
    fn payload_capacity(&self) -> usize {
        let ec = self.qr.error_correction.to_qr();
        let version = Version::Normal(self.max_version);
        // Lower-case letters force byte mode.
        let fits = |len: usize| QrCode::with_version(vec![b'a'; len], version, ec).is_ok();
        let (mut low, mut high) = (0usize, QR_MAX_PAYLOAD_BYTES);
        while low < high {
            let mid = (low + high).div_ceil(2);
            if fits(mid) {
                low = mid;
            } else {
                high = mid - 1;
            }
        }
        low
    }

    /// Fail with `CapacityExceeded` if the chunk cannot be carried by one frame.
    pub fn check_capacity(&self, chunk: &Chunk) -> Result<()> {
        self.build_code(chunk).map(|_| ())
    }

    fn build_code(&self, chunk: &Chunk) -> Result<QrCode> {
        let payload = chunk.to_payload()?;
        let ec = self.qr.error_correction.to_qr();
        let too_long = || MemvidError::CapacityExceeded {
            chunk_id: chunk.id,
            bytes: payload.len(),
            max_version: self.max_version,
        };
        let code = match self.qr.version {
            Some(version) => QrCode::with_version(payload.as_bytes(), Version::Normal(version), ec),
            None => QrCode::with_error_correction_level(payload.as_bytes(), ec),
        }
        .map_err(|err| match err {
            QrError::DataTooLong => too_long(),
            other => MemvidError::config(format!("QR encoding failed: {other}")),
        })?;
        match code.version() {
            Version::Normal(version) if version > self.max_version => Err(too_long()),
            _ => Ok(code),
        }
    }

    /// Serialize the chunk into a QR raster of the profile's frame size.
    pub fn encode(&self, chunk: &Chunk) -> Result<Raster> {
        let code = self.build_code(chunk)?;
        Ok(self.rasterize(&code))
    }

    fn rasterize(&self, code: &QrCode) -> Raster {
        let modules = code.width() as u32;
        let box_size = self.qr.box_size;
        let border = self.qr.border;
        let extent = (modules + 2 * border) * box_size;

        let mut pattern = GrayImage::from_pixel(extent, extent, LIGHT);
        for (idx, color) in code.to_colors().into_iter().enumerate() {
            if color != Color::Dark {
                continue;
            }
            let mx = idx as u32 % modules + border;
            let my = idx as u32 / modules + border;
            for dy in 0..box_size {
                for dx in 0..box_size {
                    pattern.put_pixel(mx * box_size + dx, my * box_size + dy, DARK);
                }
            }
        }

        // Nearest-neighbor keeps module edges hard.
        let side = self.width.min(self.height);
        let scaled = if extent == side {
            pattern
        } else {
            imageops::resize(&pattern, side, side, FilterType::Nearest)
        };
        if side == self.width && side == self.height {
            return scaled;
        }
        let mut canvas = GrayImage::from_pixel(self.width, self.height, LIGHT);
        let x = i64::from((self.width - side) / 2);
        let y = i64::from((self.height - side) / 2);
        imageops::overlay(&mut canvas, &scaled, x, y);
        canvas
    }

    /// Recover the chunk stored in `raster`, or `None` if the frame is unreadable or belongs
    /// to a different frame number.
    #[must_use]
    pub fn decode(&self, raster: &Raster, expected: FrameNumber) -> Option<Chunk> {
        self.decode_detailed(raster, expected).ok()
    }

    /// Like [`decode`](Self::decode) but reports why a frame failed.
    pub fn decode_detailed(
        &self,
        raster: &Raster,
        expected: FrameNumber,
    ) -> std::result::Result<Chunk, FrameFault> {
        let (width, height) = raster.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                raster.get_pixel(x as u32, y as u32).0[0]
            });
        let grids = prepared.detect_grids();

        let mut fault = FrameFault::NoPattern;
        for grid in grids {
            let Ok((_, content)) = grid.decode() else {
                continue;
            };
            match serde_json::from_str::<Chunk>(&content) {
                Ok(chunk) if chunk.id == expected && chunk.frame == expected => return Ok(chunk),
                Ok(chunk) => {
                    fault = FrameFault::Mismatch {
                        id: chunk.id,
                        frame: chunk.frame,
                    };
                }
                Err(_) => fault = FrameFault::Malformed,
            }
        }
        Err(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCorrection, VideoCodec};

    fn baseline() -> FrameCodec {
        FrameCodec::new(
            &QrSettings::default(),
            &CodecProfile::for_codec(VideoCodec::baseline()),
        )
        .expect("baseline codec")
    }

    #[test]
    fn roundtrip_preserves_all_fields() {
        let codec = baseline();
        let chunk = Chunk::new(7, "The quick brown fox jumps over the lazy dog.");
        let raster = codec.encode(&chunk).expect("encode");
        assert_eq!(raster.dimensions(), (512, 512));
        assert_eq!(codec.decode(&raster, 7), Some(chunk));
    }

    #[test]
    fn roundtrip_unicode_text() {
        let codec = baseline();
        let chunk = Chunk::new(0, "naïve café, 日本語, emoji 🚀 and \"quotes\"");
        let raster = codec.encode(&chunk).expect("encode");
        assert_eq!(codec.decode(&raster, 0), Some(chunk));
    }

    #[test]
    fn frame_number_mismatch_is_a_decode_failure() {
        let codec = baseline();
        let raster = codec.encode(&Chunk::new(3, "three")).expect("encode");
        assert_eq!(codec.decode(&raster, 4), None);
        assert_eq!(
            codec.decode_detailed(&raster, 4),
            Err(FrameFault::Mismatch { id: 3, frame: 3 })
        );
    }

    #[test]
    fn blank_frame_has_no_pattern() {
        let codec = baseline();
        let blank = GrayImage::from_pixel(512, 512, LIGHT);
        assert_eq!(codec.decode_detailed(&blank, 0), Err(FrameFault::NoPattern));
    }

    #[test]
    fn oversized_payload_is_capacity_error() {
        let qr = QrSettings {
            version: Some(1),
            error_correction: ErrorCorrection::H,
            ..QrSettings::default()
        };
        let codec =
            FrameCodec::new(&qr, &CodecProfile::for_codec(VideoCodec::Png)).expect("codec");
        let err = codec
            .check_capacity(&Chunk::new(0, "x".repeat(200)))
            .expect_err("200 bytes cannot fit version 1");
        assert!(matches!(err, MemvidError::CapacityExceeded { chunk_id: 0, .. }));
    }

    #[test]
    fn auto_version_is_bounded_by_resolution() {
        let codec = baseline();
        // (17 + 4v + 8) * 4 <= 512  =>  v <= 25
        assert_eq!(codec.max_version(), 25);
        let err = codec
            .check_capacity(&Chunk::new(1, "y".repeat(4000)))
            .expect_err("too large for any version");
        assert!(err.is_config_error());
    }

    #[test]
    fn text_budget_fits_the_widest_chunk_id() {
        let codec = baseline();
        let budget = codec.text_budget();
        // Version 25 at EC level M carries 997 bytes, less the id/frame envelope.
        assert!(budget > 900 && budget < 997, "budget {budget}");
        codec
            .check_capacity(&Chunk::new(u64::MAX, "q".repeat(budget)))
            .expect("a full budget fits");
        assert!(
            codec
                .check_capacity(&Chunk::new(u64::MAX, "q".repeat(budget + 40)))
                .is_err()
        );

        let multibyte = "語".repeat(budget / 3);
        codec
            .check_capacity(&Chunk::new(9, multibyte))
            .expect("budget counts bytes, not chars");
    }

    #[test]
    fn non_square_frames_center_the_pattern() {
        let mut profile = CodecProfile::for_codec(VideoCodec::Png);
        profile.frame_width = 640;
        profile.frame_height = 480;
        let codec = FrameCodec::new(&QrSettings::default(), &profile).expect("codec");
        let chunk = Chunk::new(2, "wide frame");
        let raster = codec.encode(&chunk).expect("encode");
        assert_eq!(raster.dimensions(), (640, 480));
        assert_eq!(raster.get_pixel(0, 0), &LIGHT);
        assert_eq!(codec.decode(&raster, 2), Some(chunk));
    }
}
