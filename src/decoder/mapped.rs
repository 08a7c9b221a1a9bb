//! Memory-mapped pixel data regions.
//!
//! A [`MappedRegion`] owns a read-only mapping of a byte range of a file. The
//! mapping is released when the region is dropped, which
//! [`super::FrameSource::close`] does explicitly.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memmap2::{Mmap, MmapOptions};

use crate::config::DecoderConfig;
use crate::error::{BlackoutError, Result};

/// Read-only mapping of `len` bytes of a file starting at `offset`.
pub struct MappedRegion {
    map: Mmap,
    path: PathBuf,
    offset: u64,
}

impl MappedRegion {
    /// Map a region of `path`, retrying transient failures as configured.
    pub fn open<P: AsRef<Path>>(
        path: P,
        offset: u64,
        len: usize,
        config: &DecoderConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let end = offset.checked_add(len as u64);
        if len == 0 || end.map_or(true, |end| end > file_len) {
            return Err(BlackoutError::InvalidRequest(format!(
                "region {}+{} outside {} ({} bytes)",
                offset,
                len,
                path.display(),
                file_len
            )));
        }

        let map = map_with_retries(
            config.memory_mapper_number_of_retries,
            Duration::from_millis(config.memory_mapper_retry_delay_ms),
            || {
                // SAFETY: the mapping is read-only and the region was checked to
                // lie within the file. Truncation of the file by another process
                // while mapped is outside what this crate can guard against.
                unsafe { MmapOptions::new().offset(offset).len(len).map(&file) }
            },
        )?;

        log::debug!(
            "Mapped {} bytes of {} at offset {}",
            len,
            path.display(),
            offset
        );

        Ok(Self {
            map,
            path: path.to_path_buf(),
            offset,
        })
    }

    /// Mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Length of the mapped region.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// File the region belongs to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the region within the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("len", &self.map.len())
            .finish()
    }
}

/// Failures worth another attempt: address space or descriptor pressure.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::OutOfMemory | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Run `attempt` up to `retries` times while it fails transiently.
pub(crate) fn map_with_retries<T, F>(retries: u32, delay: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let retries = retries.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                if tries >= retries {
                    return Err(BlackoutError::ResourceExhausted(format!(
                        "memory mapping failed after {} attempts: {}",
                        tries, err
                    )));
                }
                log::warn!(
                    "Memory mapping attempt {}/{} failed ({}), retrying",
                    tries,
                    retries,
                    err
                );
                std::thread::sleep(delay);
            }
            Err(err) => return Err(BlackoutError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_retry_then_succeed() {
        let mut calls = 0;
        let value = map_with_retries(3, Duration::ZERO, || {
            calls += 1;
            if calls < 3 {
                Err(io::Error::from(io::ErrorKind::OutOfMemory))
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_bound_gives_resource_exhausted() {
        let mut calls = 0;
        let result: Result<()> = map_with_retries(4, Duration::ZERO, || {
            calls += 1;
            Err(io::Error::from(io::ErrorKind::OutOfMemory))
        });
        assert!(matches!(result, Err(BlackoutError::ResourceExhausted(_))));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let mut calls = 0;
        let result: Result<()> = map_with_retries(5, Duration::ZERO, || {
            calls += 1;
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });
        assert!(matches!(result, Err(BlackoutError::Io(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_map_region() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[9u8; 16]).unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        file.flush().unwrap();

        let region = MappedRegion::open(file.path(), 16, 4, &DecoderConfig::default()).unwrap();
        assert_eq!(region.bytes(), &[1, 2, 3, 4]);
        assert_eq!(region.offset(), 16);

        let beyond = MappedRegion::open(file.path(), 18, 4, &DecoderConfig::default());
        assert!(matches!(beyond, Err(BlackoutError::InvalidRequest(_))));
    }
}
