//! Stream framing between a client and a persistent daemon.
//!
//! Each direction carries frames of `[u32 length][bytes]` in little endian,
//! ended by a zero-length frame. The reply is followed by the activation's
//! exit status as an `i32` and one frame holding its error message, empty on
//! success.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rtcore::error::{Result, RtError};
use std::io::{self, BufRead, Read, Write};

/// Largest frame accepted from a peer.
pub const MAX_FRAME: usize = 1 << 24;

/// Splits written bytes into frames.
pub struct FrameWriter<W: Write> {
    /// Underlying stream; taken by `finish()`.
    inner: Option<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Creates a new `FrameWriter`.
    ///
    /// * `inner` - Underlying stream.
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    /// Writes the terminating frame and returns the underlying stream.
    pub fn finish(mut self) -> io::Result<W> {
        let mut inner = self.inner.take().ok_or_else(finished)?;
        inner.write_u32::<LittleEndian>(0)?;
        inner.flush()?;
        Ok(inner)
    }

    fn stream(&mut self) -> io::Result<&mut W> {
        self.inner.as_mut().ok_or_else(finished)
    }
}

fn finished() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "frame stream finished")
}

impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(MAX_FRAME);
        let inner = self.stream()?;
        inner.write_u32::<LittleEndian>(n as u32)?;
        inner.write_all(&buf[..n])?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

impl<W: Write> Drop for FrameWriter<W> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            let terminated = inner.write_u32::<LittleEndian>(0).and_then(|_| inner.flush());
            if let Err(e) = terminated {
                debug!("frame stream: {e}");
            }
        }
    }
}

/// Reads the payload of a frame stream, reporting end of file at the
/// terminating frame.
pub struct FrameReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    /// Creates a new `FrameReader`.
    ///
    /// * `inner` - Underlying stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Returns true after the terminating frame has been read.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the underlying stream. Only positioned after the payload once
    /// `is_done()`.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn next_frame(&mut self) -> io::Result<()> {
        let len = self.inner.read_u32::<LittleEndian>()? as usize;
        if len == 0 {
            self.done = true;
            return Ok(());
        }
        if len > MAX_FRAME {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes is too large"),
            ));
        }
        self.buf.resize(len, 0);
        self.inner.read_exact(&mut self.buf)?;
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for FrameReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.buf.len() && !self.done {
            self.next_frame()?;
        }
        if self.pos >= self.buf.len() {
            return Ok(&[]);
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}

/// Writes the status trailer of a reply.
///
/// * `w`       - Stream positioned after the reply payload.
/// * `code`    - Exit status.
/// * `message` - Error message, empty on success.
pub fn write_status<W: Write>(w: &mut W, code: i32, message: &str) -> Result<()> {
    w.write_i32::<LittleEndian>(code)?;
    let bytes = message.as_bytes();
    let n = bytes.len().min(MAX_FRAME);
    w.write_u32::<LittleEndian>(n as u32)?;
    w.write_all(&bytes[..n])?;
    w.flush()?;
    Ok(())
}

/// Reads the status trailer of a reply.
///
/// * `r` - Stream positioned after the reply payload.
pub fn read_status<R: Read>(r: &mut R) -> Result<(i32, String)> {
    let code = r
        .read_i32::<LittleEndian>()
        .map_err(|e| RtError::system("persistent process ended without a status", e))?;
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > MAX_FRAME {
        return Err(RtError::Format(format!("status message of {len} bytes is too large")));
    }
    let mut msg = vec![0; len];
    r.read_exact(&mut msg)?;
    Ok((code, String::from_utf8_lossy(&msg).into_owned()))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
