//! Container writer and reader.
//!
//! The writer produces the in-process AVI envelope for the `Png` and `Mjpeg` profiles. The
//! reader sniffs the file: AVI is parsed here, anything else goes through `ffmpeg`.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;

use super::avi::{self, AviIndex, AviWriter, FOURCC_JPEG, FOURCC_PNG, FrameSpan};
use super::ffmpeg::FfmpegReader;
use crate::codec::Raster;
use crate::constants::DECODE_TIMEOUT;
use crate::error::{MemvidError, Result};
use crate::types::{CodecProfile, FrameNumber, VideoCodec};

/// Sequential frame writer for one container path.
///
/// Frames land in call order. A failed write poisons the writer; dropping an unfinished
/// writer finalizes what was written so far.
#[derive(Debug)]
pub struct ContainerWriter {
    inner: Option<AviWriter>,
    path: PathBuf,
    profile: CodecProfile,
    poisoned: bool,
}

impl ContainerWriter {
    pub fn create(path: impl AsRef<Path>, profile: &CodecProfile) -> Result<Self> {
        let path = path.as_ref();
        let fourcc = match profile.codec {
            VideoCodec::Png => FOURCC_PNG,
            VideoCodec::Mjpeg => FOURCC_JPEG,
            other => {
                return Err(MemvidError::config(format!(
                    "codec {other} cannot be written in-process"
                )));
            }
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }
        let inner = AviWriter::create(
            path,
            profile.frame_width,
            profile.frame_height,
            profile.fps,
            fourcc,
        )?;
        tracing::debug!(
            target = "memvid::container",
            path = %path.display(),
            codec = %profile.codec,
            "container opened"
        );
        Ok(Self {
            inner: Some(inner),
            path: path.to_path_buf(),
            profile: profile.clone(),
            poisoned: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| u64::from(inner.frames()))
    }

    /// Append one frame. Rasters must match the profile's frame size; any failure, including
    /// a size mismatch, poisons the writer.
    pub fn write(&mut self, raster: &Raster) -> Result<()> {
        if self.poisoned {
            return Err(MemvidError::ContainerPoisoned);
        }
        let expected = (self.profile.frame_width, self.profile.frame_height);
        if raster.dimensions() != expected {
            self.poisoned = true;
            return Err(MemvidError::config(format!(
                "frame is {}x{} but profile {} expects {}x{}",
                raster.width(),
                raster.height(),
                self.profile.codec,
                expected.0,
                expected.1
            )));
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(MemvidError::ContainerPoisoned);
        };

        let result = encode_image(raster, &self.profile).and_then(|bytes| inner.write_frame(&bytes));
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Flush, write the frame index and patch the headers. Returns the file size in bytes.
    pub fn finish(mut self) -> Result<u64> {
        let inner = self.inner.take().ok_or(MemvidError::ContainerPoisoned)?;
        let size = inner.finish()?;
        if self.poisoned {
            return Err(MemvidError::ContainerPoisoned);
        }
        tracing::debug!(
            target = "memvid::container",
            path = %self.path.display(),
            bytes = size,
            "container finalized"
        );
        Ok(size)
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(err) = inner.finish() {
                tracing::warn!(
                    target = "memvid::container",
                    path = %self.path.display(),
                    error = %err,
                    "failed to finalize container on drop"
                );
            }
        }
    }
}

fn encode_image(raster: &Raster, profile: &CodecProfile) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match profile.codec {
        VideoCodec::Mjpeg => {
            JpegEncoder::new_with_quality(&mut bytes, profile.quality_factor.clamp(1, 100))
                .encode_image(raster)?;
        }
        _ => raster.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?,
    }
    Ok(bytes)
}

/// Read access to a finished container.
#[derive(Debug, Clone)]
pub enum ContainerReader {
    Avi { path: PathBuf, index: AviIndex },
    External(FfmpegReader),
}

impl ContainerReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, DECODE_TIMEOUT)
    }

    /// Open with an explicit timeout for `ffmpeg`-backed reads.
    pub fn open_with_timeout(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let mut prefix = [0u8; 12];
        let read = fs_err::File::open(path)?.read(&mut prefix)?;
        if read < prefix.len() {
            return Err(MemvidError::InvalidContainer {
                path: path.to_path_buf(),
                reason: "file too short".into(),
            });
        }
        if avi::is_avi(&prefix) {
            let index = avi::read_index(path)?;
            Ok(Self::Avi {
                path: path.to_path_buf(),
                index,
            })
        } else {
            Ok(Self::External(FfmpegReader::open(path, timeout)?))
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        match self {
            Self::Avi { index, .. } => index.frames.len() as u64,
            Self::External(reader) => reader.frame_count(),
        }
    }

    /// Byte span of a frame's stored image, for in-process containers.
    #[must_use]
    pub fn frame_span(&self, n: FrameNumber) -> Option<FrameSpan> {
        match self {
            Self::Avi { index, .. } => usize::try_from(n)
                .ok()
                .and_then(|n| index.frames.get(n).copied()),
            Self::External(_) => None,
        }
    }

    /// Frame `n` as a grayscale raster; `None` when out of range or undecodable.
    /// Each call uses its own file handle.
    #[must_use]
    pub fn frame(&self, n: FrameNumber) -> Option<Raster> {
        match self {
            Self::Avi { path, .. } => {
                let span = self.frame_span(n)?;
                let bytes = avi::read_span(path, span).ok()?;
                image::load_from_memory(&bytes)
                    .ok()
                    .map(|img| img.to_luma8())
            }
            Self::External(reader) => reader.frame(n),
        }
    }
}

/// Decode a single frame from a container file; absence on any failure.
#[must_use]
pub fn extract_frame(path: impl AsRef<Path>, n: FrameNumber) -> Option<Raster> {
    ContainerReader::open(path).ok()?.frame(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn raster(shade: u8) -> Raster {
        GrayImage::from_fn(512, 512, |x, _| {
            if x < 256 { Luma([shade]) } else { Luma([255]) }
        })
    }

    #[test]
    fn png_frames_are_lossless() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("frames.avi");
        let profile = CodecProfile::for_codec(VideoCodec::Png);
        let mut writer = ContainerWriter::create(&path, &profile).expect("create");
        for shade in [0, 64, 128] {
            writer.write(&raster(shade)).expect("write");
        }
        writer.finish().expect("finish");

        let reader = ContainerReader::open(&path).expect("open");
        assert_eq!(reader.frame_count(), 3);
        assert_eq!(reader.frame(1), Some(raster(64)));
        assert_eq!(reader.frame(3), None);
    }

    #[test]
    fn mismatched_frame_size_poisons_the_writer() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("bad.avi");
        let profile = CodecProfile::for_codec(VideoCodec::Mjpeg);
        let mut writer = ContainerWriter::create(&path, &profile).expect("create");
        let err = writer
            .write(&GrayImage::new(100, 100))
            .expect_err("wrong size");
        assert!(err.is_config_error());
        assert!(matches!(
            writer.write(&raster(0)),
            Err(MemvidError::ContainerPoisoned)
        ));
        assert!(matches!(writer.finish(), Err(MemvidError::ContainerPoisoned)));
    }

    #[test]
    fn dropped_writer_leaves_readable_container() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("dropped.avi");
        {
            let profile = CodecProfile::for_codec(VideoCodec::Png);
            let mut writer = ContainerWriter::create(&path, &profile).expect("create");
            writer.write(&raster(10)).expect("write");
        }
        assert_eq!(ContainerReader::open(&path).expect("open").frame_count(), 1);
    }

    #[test]
    fn poisoned_writer_refuses_frames() {
        let dir = tempfile::tempdir().expect("tmp");
        let profile = CodecProfile::for_codec(VideoCodec::Png);
        let mut writer = ContainerWriter::create(dir.path().join("p.avi"), &profile).expect("create");
        writer.poisoned = true;
        assert!(matches!(
            writer.write(&raster(0)),
            Err(MemvidError::ContainerPoisoned)
        ));
        assert!(matches!(writer.finish(), Err(MemvidError::ContainerPoisoned)));
    }

    #[test]
    fn high_density_codecs_are_not_written_in_process() {
        let dir = tempfile::tempdir().expect("tmp");
        let profile = CodecProfile::for_codec(VideoCodec::H265);
        assert!(ContainerWriter::create(dir.path().join("x.mkv"), &profile).is_err());
    }

    #[test]
    fn extract_frame_is_absent_for_missing_files() {
        let dir = tempfile::tempdir().expect("tmp");
        assert!(extract_frame(dir.path().join("missing.avi"), 0).is_none());
    }
}
