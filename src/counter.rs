//! Pass-through reader/writer that counts the bytes going through it
//!
//! The writer uses this to learn each section's length
//! without buffering the section or seeking back over it.

use std::io;
use std::io::prelude::*;

/// Forwards reads and writes to `inner`, counting how many bytes made it.
pub struct Counter<T> {
    inner: T,
    count: u64,
}

impl<T> Counter<T> {
    pub fn new(inner: T) -> Counter<T> {
        Counter { inner, count: 0 }
    }

    /// Bytes read or written so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<W: Write> Write for Counter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<R: Read> Read for Counter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Accepts at most three bytes per write, like a stingy pipe.
    struct Stingy(Vec<u8>);

    impl Write for Stingy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn counts_partial_writes() {
        let mut writer = Counter::new(Stingy(Vec::new()));
        assert_eq!(writer.write(b"12345").unwrap(), 3);
        assert_eq!(writer.count(), 3);
        writer.write_all(b"6789").unwrap();
        assert_eq!(writer.count(), 7);
        assert_eq!(writer.into_inner().0, b"1236789");
    }

    #[test]
    fn counts_reads() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 3];

        let mut reader = Counter::new(data);
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        // Can keep reading 0 bytes after the end
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.count(), 4);
    }

    #[test]
    fn write_errors_dont_count() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "nope"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut writer = Counter::new(Broken);
        assert!(writer.write(b"abc").is_err());
        assert_eq!(writer.count(), 0);
    }
}
