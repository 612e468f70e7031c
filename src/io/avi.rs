//! Minimal RIFF/AVI envelope for in-process frame storage.
//!
//! Layout: `RIFF 'AVI '` → `LIST hdrl` (`avih`, `LIST strl` with `strh` + `strf`) →
//! `LIST movi` with one `00dc` chunk per frame → `idx1`. Each frame chunk holds a complete
//! PNG or JPEG image. Offsets in `idx1` are relative to the `movi` fourcc.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{MemvidError, Result};

pub const FOURCC_PNG: [u8; 4] = *b"MPNG";
pub const FOURCC_JPEG: [u8; 4] = *b"MJPG";

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const FRAME_CKID: [u8; 4] = *b"00dc";

const AVIH_SIZE: u32 = 56;
const STRH_SIZE: u32 = 56;
const STRF_SIZE: u32 = 40;
const STRL_SIZE: u32 = 4 + (8 + STRH_SIZE) + (8 + STRF_SIZE);
const HDRL_SIZE: u32 = 4 + (8 + AVIH_SIZE) + (8 + STRL_SIZE);
/// Offset of the `LIST` header that opens the `movi` list.
const MOVI_LIST_OFFSET: u64 = 12 + 8 + HDRL_SIZE as u64;
/// Offset of the `movi` fourcc; `idx1` offsets are relative to this position.
const MOVI_OFFSET: u64 = MOVI_LIST_OFFSET + 8;
const HEADER_LEN: u64 = MOVI_OFFSET + 4;
const IDX1_ENTRY_SIZE: usize = 16;

/// Location of one stored frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    /// Absolute file offset of the image bytes.
    pub offset: u64,
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamHeader {
    width: u32,
    height: u32,
    fps: u32,
    fourcc: [u8; 4],
    frames: u32,
    max_frame_bytes: u32,
}

impl StreamHeader {
    fn encode(&self, riff_size: u32, movi_size: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN as usize);
        let put = |out: &mut Vec<u8>, value: u32| out.extend_from_slice(&value.to_le_bytes());

        out.extend_from_slice(b"RIFF");
        put(&mut out, riff_size);
        out.extend_from_slice(b"AVI ");

        out.extend_from_slice(b"LIST");
        put(&mut out, HDRL_SIZE);
        out.extend_from_slice(b"hdrl");

        out.extend_from_slice(b"avih");
        put(&mut out, AVIH_SIZE);
        put(&mut out, 1_000_000 / self.fps.max(1));
        put(&mut out, self.max_frame_bytes.saturating_mul(self.fps));
        put(&mut out, 0);
        put(&mut out, AVIF_HASINDEX);
        put(&mut out, self.frames);
        put(&mut out, 0);
        put(&mut out, 1);
        put(&mut out, self.max_frame_bytes);
        put(&mut out, self.width);
        put(&mut out, self.height);
        for _ in 0..4 {
            put(&mut out, 0);
        }

        out.extend_from_slice(b"LIST");
        put(&mut out, STRL_SIZE);
        out.extend_from_slice(b"strl");

        out.extend_from_slice(b"strh");
        put(&mut out, STRH_SIZE);
        out.extend_from_slice(b"vids");
        out.extend_from_slice(&self.fourcc);
        put(&mut out, 0); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // priority
        out.extend_from_slice(&0u16.to_le_bytes()); // language
        put(&mut out, 0); // initial frames
        put(&mut out, 1); // scale
        put(&mut out, self.fps);
        put(&mut out, 0); // start
        put(&mut out, self.frames);
        put(&mut out, self.max_frame_bytes);
        put(&mut out, u32::MAX); // quality: driver default
        put(&mut out, 0); // sample size
        for value in [0u16, 0, clamp_u16(self.width), clamp_u16(self.height)] {
            out.extend_from_slice(&value.to_le_bytes());
        }

        out.extend_from_slice(b"strf");
        put(&mut out, STRF_SIZE);
        put(&mut out, STRF_SIZE);
        put(&mut out, self.width);
        put(&mut out, self.height);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&self.fourcc);
        put(&mut out, self.width.saturating_mul(self.height).saturating_mul(3));
        for _ in 0..4 {
            put(&mut out, 0);
        }

        out.extend_from_slice(b"LIST");
        put(&mut out, movi_size);
        out.extend_from_slice(b"movi");
        debug_assert_eq!(out.len() as u64, HEADER_LEN);
        out
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn riff_u32(path: &Path, value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| MemvidError::InvalidContainer {
        path: path.to_path_buf(),
        reason: format!("{what} exceeds the 4 GiB RIFF limit"),
    })
}

/// Appends image frames to a new AVI file. Sizes and counts are patched by [`finish`].
///
/// [`finish`]: AviWriter::finish
#[derive(Debug)]
pub struct AviWriter {
    path: PathBuf,
    file: BufWriter<File>,
    header: StreamHeader,
    /// Current write position (absolute).
    position: u64,
    index: Vec<(u32, u32)>,
}

impl AviWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: u32, fourcc: [u8; 4]) -> Result<Self> {
        let file = fs_err::File::create(path)?.into_parts().0;
        let header = StreamHeader {
            width,
            height,
            fps,
            fourcc,
            frames: 0,
            max_frame_bytes: 0,
        };
        let mut file = BufWriter::new(file);
        file.write_all(&header.encode(0, 4))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            position: HEADER_LEN,
            index: Vec::new(),
        })
    }

    pub fn frames(&self) -> u32 {
        self.header.frames
    }

    /// Append one encoded image as the next frame.
    pub fn write_frame(&mut self, image: &[u8]) -> Result<()> {
        let len = riff_u32(&self.path, image.len() as u64, "frame")?;
        let relative = riff_u32(&self.path, self.position - MOVI_OFFSET, "movi list")?;

        self.file.write_all(&FRAME_CKID)?;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(image)?;
        let mut written = 8 + u64::from(len);
        if len % 2 == 1 {
            self.file.write_all(&[0])?;
            written += 1;
        }

        self.position += written;
        self.index.push((relative, len));
        self.header.frames += 1;
        self.header.max_frame_bytes = self.header.max_frame_bytes.max(len);
        Ok(())
    }

    /// Write `idx1`, patch the headers and sync. Returns the final file size.
    pub fn finish(mut self) -> Result<u64> {
        let movi_size = riff_u32(&self.path, self.position - MOVI_LIST_OFFSET - 8, "movi list")?;

        let mut idx1 = Vec::with_capacity(8 + self.index.len() * IDX1_ENTRY_SIZE);
        idx1.extend_from_slice(b"idx1");
        let idx1_len = riff_u32(
            &self.path,
            (self.index.len() * IDX1_ENTRY_SIZE) as u64,
            "idx1",
        )?;
        idx1.extend_from_slice(&idx1_len.to_le_bytes());
        for (offset, len) in &self.index {
            idx1.extend_from_slice(&FRAME_CKID);
            idx1.extend_from_slice(&AVIIF_KEYFRAME.to_le_bytes());
            idx1.extend_from_slice(&offset.to_le_bytes());
            idx1.extend_from_slice(&len.to_le_bytes());
        }
        self.file.write_all(&idx1)?;
        let total = self.position + idx1.len() as u64;
        let riff_size = riff_u32(&self.path, total - 8, "file")?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.encode(riff_size, movi_size))?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(total)
    }
}

/// Parsed frame table of an AVI file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AviIndex {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: [u8; 4],
    pub frames: Vec<FrameSpan>,
}

/// Whether `prefix` starts like a RIFF/AVI file.
pub fn is_avi(prefix: &[u8]) -> bool {
    prefix.len() >= 12 && &prefix[..4] == b"RIFF" && &prefix[8..12] == b"AVI "
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    bytes
        .get(at..at + 4)
        .and_then(|slice| slice.try_into().ok())
        .map_or(0, u32::from_le_bytes)
}

fn is_frame_ckid(ckid: &[u8]) -> bool {
    ckid.len() == 4 && (&ckid[2..4] == b"dc" || &ckid[2..4] == b"db")
}

/// Read the frame table from `path`, from `idx1` when present, otherwise by scanning `movi`.
pub fn read_index(path: &Path) -> Result<AviIndex> {
    let invalid = |reason: &str| MemvidError::InvalidContainer {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut file = fs_err::File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut riff = [0u8; 12];
    file.read_exact(&mut riff)
        .map_err(|_| invalid("file shorter than a RIFF header"))?;
    if !is_avi(&riff) {
        return Err(invalid("not a RIFF/AVI file"));
    }

    let mut index = AviIndex {
        width: 0,
        height: 0,
        fps: 0,
        fourcc: [0; 4],
        frames: Vec::new(),
    };
    let mut movi: Option<(u64, u64)> = None;
    let mut idx1: Option<Vec<u8>> = None;

    let mut cursor = 12u64;
    while cursor + 8 <= file_len {
        file.seek(SeekFrom::Start(cursor))?;
        let mut head = [0u8; 12];
        let available = (file_len - cursor).min(12) as usize;
        file.read_exact(&mut head[..available])?;
        let size = u64::from(read_u32(&head, 4));
        match &head[..4] {
            b"LIST" if &head[8..12] == b"hdrl" => {
                let len = usize::try_from(size.min(file_len - cursor - 8))
                    .map_err(|_| invalid("oversized header list"))?;
                let mut hdrl = vec![0u8; len];
                file.seek(SeekFrom::Start(cursor + 8))?;
                file.read_exact(&mut hdrl)?;
                parse_hdrl(&hdrl, &mut index);
            }
            b"LIST" if &head[8..12] == b"movi" => {
                // An unfinished writer leaves the placeholder size; use the file end.
                let end = if size <= 4 {
                    file_len
                } else {
                    (cursor + 8 + size).min(file_len)
                };
                movi = Some((cursor + 8, end));
                if size <= 4 {
                    break;
                }
            }
            b"idx1" => {
                let len = usize::try_from(size.min(file_len - cursor - 8))
                    .map_err(|_| invalid("oversized idx1"))?;
                let mut entries = vec![0u8; len];
                file.seek(SeekFrom::Start(cursor + 8))?;
                file.read_exact(&mut entries)?;
                idx1 = Some(entries);
            }
            _ => {}
        }
        cursor += 8 + size + (size % 2);
    }

    let (movi_offset, movi_end) = movi.ok_or_else(|| invalid("missing movi list"))?;
    index.frames = match idx1 {
        Some(entries) => frames_from_idx1(&mut file, &entries, movi_offset, file_len)?,
        None => {
            tracing::debug!(
                target = "memvid::container",
                path = %path.display(),
                "idx1 missing; scanning movi"
            );
            scan_movi(&mut file, movi_offset + 4, movi_end)?
        }
    };
    Ok(index)
}

fn parse_hdrl(hdrl: &[u8], index: &mut AviIndex) {
    // hdrl payload starts with the list type, then avih.
    let mut at = 4usize;
    while at + 8 <= hdrl.len() {
        let id = &hdrl[at..at + 4];
        let size = read_u32(hdrl, at + 4) as usize;
        let body = at + 8;
        match id {
            b"avih" => {
                index.width = read_u32(hdrl, body + 32);
                index.height = read_u32(hdrl, body + 36);
            }
            b"LIST" => {
                // Descend into strl.
                at = body + 4;
                continue;
            }
            b"strh" => {
                if let Some(handler) = hdrl.get(body + 4..body + 8) {
                    index.fourcc.copy_from_slice(handler);
                }
                let scale = read_u32(hdrl, body + 20).max(1);
                index.fps = read_u32(hdrl, body + 24) / scale;
            }
            _ => {}
        }
        at = body + size + (size % 2);
    }
}

fn frames_from_idx1(
    file: &mut fs_err::File,
    entries: &[u8],
    movi_offset: u64,
    file_len: u64,
) -> Result<Vec<FrameSpan>> {
    let records: Vec<(u64, u32)> = entries
        .chunks_exact(IDX1_ENTRY_SIZE)
        .filter(|entry| is_frame_ckid(&entry[..4]))
        .map(|entry| (u64::from(read_u32(entry, 8)), read_u32(entry, 12)))
        .collect();

    // Some writers store absolute offsets; check the first record against both bases.
    let mut base = movi_offset;
    if let Some((first, _)) = records.first() {
        if !chunk_is_frame(file, movi_offset + first)? && chunk_is_frame(file, *first)? {
            base = 0;
        }
    }
    Ok(records
        .into_iter()
        .map(|(offset, len)| FrameSpan {
            offset: base + offset + 8,
            len,
        })
        .filter(|span| span.offset + u64::from(span.len) <= file_len)
        .collect())
}

fn chunk_is_frame(file: &mut fs_err::File, at: u64) -> Result<bool> {
    let mut ckid = [0u8; 4];
    file.seek(SeekFrom::Start(at))?;
    Ok(file.read_exact(&mut ckid).is_ok() && is_frame_ckid(&ckid))
}

fn scan_movi(file: &mut fs_err::File, start: u64, end: u64) -> Result<Vec<FrameSpan>> {
    let mut frames = Vec::new();
    let mut cursor = start;
    while cursor + 8 <= end {
        let mut head = [0u8; 8];
        file.seek(SeekFrom::Start(cursor))?;
        file.read_exact(&mut head)?;
        let size = read_u32(&head, 4);
        if &head[..4] == b"LIST" {
            // 'rec ' groups: step inside.
            cursor += 12;
            continue;
        }
        let data = cursor + 8;
        if data + u64::from(size) > end {
            break;
        }
        if is_frame_ckid(&head[..4]) {
            frames.push(FrameSpan {
                offset: data,
                len: size,
            });
        }
        cursor = data + u64::from(size) + u64::from(size % 2);
    }
    Ok(frames)
}

/// Read the raw bytes of one frame with a fresh file handle.
pub fn read_span(path: &Path, span: FrameSpan) -> Result<Vec<u8>> {
    let mut file = fs_err::File::open(path)?;
    file.seek(SeekFrom::Start(span.offset))?;
    let mut bytes = vec![0u8; span.len as usize];
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(path: &Path, frames: &[&[u8]]) -> u64 {
        let mut writer = AviWriter::create(path, 64, 48, 30, FOURCC_PNG).expect("create");
        for frame in frames {
            writer.write_frame(frame).expect("write");
        }
        writer.finish().expect("finish")
    }

    #[test]
    fn index_matches_written_frames() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("sample.avi");
        let size = write_sample(&path, &[b"abc", b"defg", b"h"]);
        assert_eq!(size, std::fs::metadata(&path).expect("meta").len());

        let index = read_index(&path).expect("index");
        assert_eq!((index.width, index.height, index.fps), (64, 48, 30));
        assert_eq!(index.fourcc, FOURCC_PNG);
        assert_eq!(index.frames.len(), 3);
        assert_eq!(read_span(&path, index.frames[0]).expect("read"), b"abc");
        assert_eq!(read_span(&path, index.frames[1]).expect("read"), b"defg");
        assert_eq!(read_span(&path, index.frames[2]).expect("read"), b"h");
    }

    #[test]
    fn riff_sizes_are_patched() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("sizes.avi");
        let size = write_sample(&path, &[b"12345"]);
        let bytes = std::fs::read(&path).expect("read");
        assert!(is_avi(&bytes));
        assert_eq!(u64::from(read_u32(&bytes, 4)), size - 8);
        // avih total frames
        assert_eq!(read_u32(&bytes, 48), 1);
    }

    #[test]
    fn unfinished_file_is_scanned() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("partial.avi");
        let mut writer = AviWriter::create(&path, 64, 48, 30, FOURCC_JPEG).expect("create");
        writer.write_frame(b"one").expect("write");
        writer.write_frame(b"two!").expect("write");
        writer.file.flush().expect("flush");
        drop(writer);

        let index = read_index(&path).expect("index");
        assert_eq!(index.frames.len(), 2);
        assert_eq!(read_span(&path, index.frames[1]).expect("read"), b"two!");
    }

    #[test]
    fn non_avi_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, b"definitely not a riff file").expect("write");
        assert!(matches!(
            read_index(&path),
            Err(MemvidError::InvalidContainer { .. })
        ));
    }
}
