use snafu::ResultExt;
use std::cmp::min;
use std::io;

use crate::{NotEnoughDataSnafu, ReadFailedSnafu, Result, WriteFailedSnafu};

/// Random-access, read-only view of a container.
///
/// Each call specifies its own offset, so there is no cursor to keep in sync
/// between the detection walk and the reads of individual sub-blocks.
pub trait Stream {
    /// Reads bytes at `offset` into `buf`.
    ///
    /// Returns the number of bytes actually read. A short read indicates the
    /// end of the stream was reached.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Returns the total length of the stream in bytes.
    fn len(&self) -> u64;

    /// Returns `true` if the stream is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`Stream`] that also accepts positioned writes.
///
/// Writes never grow the stream: the patch engine only overwrites fields that
/// already exist, so writing past the end is an error.
pub trait StreamMut: Stream {
    /// Writes `buf` at `offset`, returning how many bytes were accepted.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize>;
}

impl<S: Stream + ?Sized> Stream for &S {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

impl<S: Stream + ?Sized> Stream for &mut S {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

impl<S: StreamMut + ?Sized> StreamMut for &mut S {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        (**self).write_at(offset, buf)
    }
}

/// A stream backed by any byte container (a `Vec<u8>`, a memory map, ...).
///
/// Reads are pure slice indexing. When the container is also `AsMut<[u8]>`
/// (e.g. `memmap2::MmapMut`) the stream is writable in place.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream<T> {
    data: T,
}

impl<T> MemoryStream<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    /// Returns a reference to the backing container.
    pub fn get_ref(&self) -> &T {
        &self.data
    }

    /// Consumes the stream, returning the backing container.
    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: AsRef<[u8]>> Stream for MemoryStream<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.as_ref();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };

        if start >= data.len() {
            return Ok(0);
        }

        let n = min(buf.len(), data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);

        Ok(n)
    }

    fn len(&self) -> u64 {
        self.data.as_ref().len() as u64
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> StreamMut for MemoryStream<T> {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let data = self.data.as_mut();
        let start = usize::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

        if start >= data.len() {
            return Ok(0);
        }

        let n = min(buf.len(), data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);

        Ok(n)
    }
}

/// Reads exactly `buf.len()` bytes at `offset`.
///
/// A short read is reported as [`Error::NotEnoughData`](crate::Error::NotEnoughData)
/// with the number of bytes the stream did return.
pub(crate) fn read_exact_at<S: Stream + ?Sized>(stream: &S, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut total = 0;

    while total < buf.len() {
        let n = match stream.read_at(offset + total as u64, &mut buf[total..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(e).context(ReadFailedSnafu {
                    offset,
                    length: buf.len() as u64,
                });
            }
        };

        if n == 0 {
            return NotEnoughDataSnafu {
                offset,
                requested: buf.len() as u64,
                actual: total as u64,
            }
            .fail();
        }

        total += n;
    }

    Ok(())
}

/// Reads `length` bytes at `offset` into a freshly allocated buffer.
pub(crate) fn read_vec_at<S: Stream + ?Sized>(stream: &S, offset: u64, length: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    read_into_vec(stream, offset, length, &mut buf)?;
    Ok(buf)
}

/// Reads `length` bytes at `offset`, reusing the allocation of `buf`.
///
/// The declared length is checked against the stream length before any
/// allocation so a corrupt size cannot trigger a huge allocation.
pub(crate) fn read_into_vec<S: Stream + ?Sized>(
    stream: &S,
    offset: u64,
    length: u64,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let available = stream.len().saturating_sub(offset);

    if length > available {
        return NotEnoughDataSnafu {
            offset,
            requested: length,
            actual: available,
        }
        .fail();
    }

    buf.clear();
    buf.resize(length as usize, 0);
    read_exact_at(stream, offset, buf)
}

/// Writes all of `buf` at `offset`.
pub(crate) fn write_all_at<S: StreamMut + ?Sized>(stream: &mut S, offset: u64, buf: &[u8]) -> Result<()> {
    let mut total = 0;

    while total < buf.len() {
        let n = match stream.write_at(offset + total as u64, &buf[total..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(e).context(WriteFailedSnafu {
                    offset,
                    length: buf.len() as u64,
                });
            }
        };

        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero)).context(WriteFailedSnafu {
                offset,
                length: buf.len() as u64,
            });
        }

        total += n;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn short_read_reports_actual_count() {
        let stream = MemoryStream::new(vec![0u8; 10]);
        let mut buf = [0u8; 8];

        let err = read_exact_at(&stream, 4, &mut buf).unwrap_err();

        match err {
            Error::NotEnoughData {
                offset,
                requested,
                actual,
            } => {
                assert_eq!(offset, 4);
                assert_eq!(requested, 8);
                assert_eq!(actual, 6);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn oversized_length_is_rejected_before_allocation() {
        let stream = MemoryStream::new(vec![0u8; 16]);

        let err = read_vec_at(&stream, 8, u64::MAX).unwrap_err();

        assert!(err.is_io());
        assert_eq!(err.offset(), 8);
    }

    #[test]
    fn writes_never_grow_the_stream() {
        let mut stream = MemoryStream::new(vec![0u8; 4]);

        write_all_at(&mut stream, 2, &[1, 2]).unwrap();
        assert_eq!(stream.get_ref(), &[0, 0, 1, 2]);

        let err = write_all_at(&mut stream, 3, &[9, 9]).unwrap_err();
        assert!(matches!(err, Error::WriteFailed { offset: 3, length: 2, .. }));
    }
}
