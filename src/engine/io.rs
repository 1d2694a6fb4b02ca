// src/engine/io.rs
//
// I/O operations: Source enum, file loading, ICC profile extraction, atomic writes.

use crate::engine::common::EngineResult;
use crate::error::ResizeOpError;
use image::DynamicImage;
use img_parts::{jpeg::Jpeg, png::Png, webp::WebP, ImageICC};
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Where a task's input comes from.
#[derive(Clone, Debug)]
pub enum Source {
    /// Already decoded bitmap; decoding is a no-op
    Image(Arc<DynamicImage>),
    /// Encoded image bytes held in memory
    Memory(Arc<Vec<u8>>),
    /// Memory-mapped file (zero-copy access)
    Mapped(Arc<Mmap>),
    /// File path, read only when the task runs
    Path(PathBuf),
}

impl Source {
    /// Memory-map `path` now. Missing files map to `FileNotFound`.
    pub fn map_path(path: &Path) -> EngineResult<Self> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        // SAFETY: the mapping is read-only; truncation by another process while mapped
        // is outside what this crate can guard against, as with any mmap reader.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| ResizeOpError::mmap_failed(path_label(path), e))?;
        Ok(Source::Mapped(Arc::new(mmap)))
    }

    /// Encoded bytes for this source. `Image` sources have none.
    pub fn load(&self) -> EngineResult<Option<Cow<'_, [u8]>>> {
        match self {
            Source::Image(_) => Ok(None),
            Source::Memory(data) => Ok(Some(Cow::Borrowed(data.as_slice()))),
            Source::Mapped(mmap) => Ok(Some(Cow::Borrowed(mmap.as_ref()))),
            Source::Path(path) => {
                let data = std::fs::read(path).map_err(|e| open_error(path, e))?;
                Ok(Some(Cow::Owned(data)))
            }
        }
    }

    /// Length of encoded data when known without I/O
    pub fn known_len(&self) -> Option<u64> {
        match self {
            Source::Memory(data) => Some(data.len() as u64),
            Source::Mapped(mmap) => Some(mmap.len() as u64),
            Source::Path(path) => std::fs::metadata(path).ok().map(|m| m.len()),
            Source::Image(_) => None,
        }
    }

    /// Bytes available without I/O (Memory and Mapped sources).
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Source::Memory(data) => Some(data.as_slice()),
            Source::Mapped(mmap) => Some(mmap.as_ref()),
            Source::Image(_) | Source::Path(_) => None,
        }
    }
}

fn path_label(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn open_error(path: &Path, e: std::io::Error) -> ResizeOpError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ResizeOpError::file_not_found(path_label(path))
    } else {
        ResizeOpError::file_read_failed(path_label(path), e)
    }
}

/// Extract ICC profile from image data.
/// Supports JPEG (APP2 marker), PNG (iCCP chunk), and WebP (ICCP chunk).
pub fn extract_icc_profile(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 12 {
        return None;
    }

    let icc_data = if data[0] == 0xFF && data[1] == 0xD8 {
        Jpeg::from_bytes(data.to_vec().into())
            .ok()?
            .icc_profile()?
            .to_vec()
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        Png::from_bytes(data.to_vec().into())
            .ok()?
            .icc_profile()?
            .to_vec()
    } else if &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        WebP::from_bytes(data.to_vec().into())
            .ok()?
            .icc_profile()?
            .to_vec()
    } else {
        return None;
    };

    if validate_icc_profile(&icc_data) {
        Some(icc_data)
    } else {
        None
    }
}

/// Validate the 128-byte ICC header: declared size and ASCII signature fields.
pub(crate) fn validate_icc_profile(icc_data: &[u8]) -> bool {
    if icc_data.len() < 128 {
        return false;
    }

    let profile_size =
        u32::from_be_bytes([icc_data[0], icc_data[1], icc_data[2], icc_data[3]]) as usize;
    if profile_size != icc_data.len() {
        return false;
    }

    // Major version is typically 2, 4 or 5
    if icc_data[8] > 10 {
        return false;
    }

    // CMM type, profile class, data color space, PCS
    let is_sig_byte = |b: &u8| (32..=126).contains(b) || *b == 0;
    [4..8, 12..16, 16..20, 20..24]
        .into_iter()
        .all(|range| icc_data[range].iter().all(is_sig_byte))
}

/// Write `data` to `path` atomically: temp file in the same directory, fsync, rename.
///
/// An existing file at `path` is replaced. Readers never observe a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> EngineResult<u64> {
    let output_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    // Same directory as the target so rename() never crosses filesystems
    let mut temp_file = NamedTempFile::new_in(output_dir)
        .map_err(|e| ResizeOpError::file_write_failed(path_label(output_dir), e))?;
    let temp_path = temp_file.path().to_path_buf();

    temp_file
        .write_all(data)
        .map_err(|e| ResizeOpError::file_write_failed(path_label(&temp_path), e))?;
    temp_file
        .as_file_mut()
        .sync_all()
        .map_err(|e| ResizeOpError::file_write_failed(path_label(&temp_path), e))?;

    // tempfile removes the temp file if persisting fails
    temp_file
        .persist(path)
        .map_err(|e| ResizeOpError::file_write_failed(path_label(path), e.error))?;

    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::RgbImage;
    use std::io::Cursor;

    fn create_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn minimal_icc() -> Vec<u8> {
        let mut data = vec![0u8; 128];
        data[3] = 0x80;
        data[4..8].copy_from_slice(b"ADBE");
        data[8] = 2;
        data[12..16].copy_from_slice(b"mntr");
        data[16..20].copy_from_slice(b"RGB ");
        data[20..24].copy_from_slice(b"XYZ ");
        data
    }

    #[test]
    fn validate_icc_profile_accepts_minimal_header() {
        assert!(validate_icc_profile(&minimal_icc()));
    }

    #[test]
    fn validate_icc_profile_rejects_bad_headers() {
        assert!(!validate_icc_profile(&[0u8; 127]));

        let mut size_mismatch = minimal_icc();
        size_mismatch[3] = 0xFF;
        assert!(!validate_icc_profile(&size_mismatch));

        let mut bad_version = minimal_icc();
        bad_version[8] = 20;
        assert!(!validate_icc_profile(&bad_version));

        let mut bad_sig = minimal_icc();
        bad_sig[13] = 0x01;
        assert!(!validate_icc_profile(&bad_sig));
    }

    #[test]
    fn extract_icc_profile_none_for_plain_png() {
        assert_eq!(extract_icc_profile(&create_png()), None);
        assert_eq!(extract_icc_profile(b"short"), None);
    }

    #[test]
    fn extract_icc_profile_roundtrips_through_jpeg() {
        let icc = minimal_icc();
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let jpeg = crate::engine::encoder::encode_jpeg(&img, 80, Some(&icc)).unwrap();
        assert_eq!(extract_icc_profile(&jpeg), Some(icc));
    }

    #[test]
    fn path_source_missing_file_is_not_found() {
        let src = Source::Path(PathBuf::from("/definitely/not/here.png"));
        let err = src.load().unwrap_err();
        assert!(matches!(err, ResizeOpError::FileNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn memory_and_mapped_sources_expose_bytes() {
        let png = create_png();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.png");
        std::fs::write(&path, &png).unwrap();

        let mapped = Source::map_path(&path).unwrap();
        assert_eq!(mapped.as_bytes(), Some(png.as_slice()));
        assert_eq!(mapped.known_len(), Some(png.len() as u64));

        let memory = Source::Memory(Arc::new(png.clone()));
        assert_eq!(memory.load().unwrap().as_deref(), Some(png.as_slice()));

        let by_path = Source::Path(path.clone());
        assert_eq!(by_path.known_len(), Some(png.len() as u64));
        assert_eq!(by_path.load().unwrap().as_deref(), Some(png.as_slice()));
    }

    #[test]
    fn map_path_missing_file_is_not_found() {
        let err = Source::map_path(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, ResizeOpError::FileNotFound { .. }));
    }

    #[test]
    fn write_atomic_creates_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        assert_eq!(write_atomic(&path, b"first").unwrap(), 5);
        assert_eq!(write_atomic(&path, b"second!").unwrap(), 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"second!");
        // No temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_atomic_missing_directory_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.jpg");
        let err = write_atomic(&path, b"data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
    }
}
