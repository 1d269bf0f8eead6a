//! Byte sources and sinks the codec reads from and writes to.
//!
//! Sources come in two flavours:
//! * [`SliceSource`] walks a [`SharedBytes`] view (heap buffer or memory map).
//!   It can hand out independent child views over compressed ranges, so those
//!   ranges may be inflated on worker threads.
//! * [`ReadSource`] wraps any forward-only `std::io::Read`. Its children borrow
//!   the parent stream and are always consumed on the calling thread.
//!
//! Sinks implement [`ByteSink`]: a `Write` that tracks its position and can
//! patch bytes it already emitted.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Take, Write};
use std::ops::{Deref, Range};
use std::sync::Arc;

use flate2::read::ZlibDecoder;

use crate::allocator::Buffer;
use crate::error::{MatError, Result};
use crate::format::ByteOrder;

/// Largest single allocation made while reading a source of unknown length.
const READ_CHUNK: usize = 1 << 16;

/// Sequential reader of primitive values with a switchable byte order.
pub trait ByteSource {
    /// Current byte order.
    fn order(&self) -> ByteOrder;

    /// Switches the byte order for everything read from now on.
    fn set_order(&mut self, order: ByteOrder);

    /// Number of bytes consumed so far.
    fn position(&self) -> u64;

    /// Fills `buf` completely.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Discards `n` bytes.
    fn skip(&mut self, n: u64) -> Result<()> {
        let mut scratch = [0u8; 4096];
        let mut left = n;
        while left > 0 {
            let step = left.min(scratch.len() as u64) as usize;
            self.read_bytes(&mut scratch[..step])?;
            left -= step as u64;
        }
        Ok(())
    }

    /// Returns true once no bytes remain.
    fn is_exhausted(&mut self) -> Result<bool>;

    /// Bytes left to read, for sources that know their length.
    fn remaining(&self) -> Option<u64> {
        None
    }

    /// Fails with `UnexpectedEof` if the source knows it holds fewer than
    /// `len` more bytes.
    fn ensure_available(&self, len: u64) -> Result<()> {
        match self.remaining() {
            Some(left) if left < len => Err(eof(format!(
                "need {len} bytes at position {}, only {left} remain",
                self.position()
            ))),
            _ => Ok(()),
        }
    }

    /// Reads `len` bytes into a new vector. Sources of unknown length are read
    /// in bounded chunks, so a corrupt length fails at end of input instead of
    /// allocating up front.
    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.remaining().is_some() {
            self.ensure_available(len as u64)?;
            let mut out = vec![0u8; len];
            self.read_bytes(&mut out)?;
            return Ok(out);
        }
        let mut out = Vec::with_capacity(len.min(READ_CHUNK));
        while out.len() < len {
            let start = out.len();
            out.resize(start + (len - start).min(READ_CHUNK), 0);
            self.read_bytes(&mut out[start..])?;
        }
        Ok(out)
    }

    /// Opens a child source that inflates the next `len` compressed bytes.
    ///
    /// The parent is advanced past the compressed range immediately. The child
    /// must be [`finish`](ByteSource::finish)ed before the parent is used again.
    fn inflate(&mut self, len: u64) -> Result<Box<dyn ByteSource + '_>>;

    /// True if [`detach`](ByteSource::detach) hands out views that are safe to
    /// consume on another thread.
    fn supports_detached_children(&self) -> bool {
        false
    }

    /// Splits off the next `len` bytes as an independent view, advancing the
    /// parent past them. Returns `None` for sources that cannot do this.
    fn detach(&mut self, _len: u64) -> Result<Option<SharedBytes>> {
        Ok(None)
    }

    /// Releases a child source, discarding what it did not consume.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reads one unsigned byte.
    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    /// Reads a 16-bit unsigned integer in the current byte order.
    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(self.order().u16_from(b))
    }

    /// Reads a 32-bit unsigned integer in the current byte order.
    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(self.order().u32_from(b))
    }

    /// Reads a 32-bit signed integer in the current byte order.
    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a 64-bit unsigned integer in the current byte order.
    fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(self.order().u64_from(b))
    }

    /// Reads a 64-bit float in the current byte order.
    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads `len` bytes into an allocator-backed buffer.
    fn read_buffer(&mut self, buffer: &mut Buffer) -> Result<()> {
        self.read_bytes(buffer)
    }
}

// --- Shared byte views ---

enum Backing {
    Memory(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mapped(memmap2::Mmap),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Memory(v) => v,
            #[cfg(feature = "mmap")]
            Self::Mapped(m) => m,
        }
    }
}

/// A cheaply cloneable, thread-safe view into an immutable byte range.
#[derive(Clone)]
pub struct SharedBytes {
    backing: Arc<Backing>,
    range: Range<usize>,
}

impl SharedBytes {
    /// Wraps an owned buffer.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let range = 0..bytes.len();
        Self { backing: Arc::new(Backing::Memory(bytes)), range }
    }

    /// Wraps a memory map.
    #[cfg(feature = "mmap")]
    pub fn from_mmap(map: memmap2::Mmap) -> Self {
        let range = 0..map.len();
        Self { backing: Arc::new(Backing::Mapped(map)), range }
    }

    /// A sub-view relative to this view.
    ///
    /// # Errors
    /// Returns `MatError::Io` (`UnexpectedEof`) if the range exceeds the view.
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.len() {
            return Err(eof(format!(
                "range {}..{} exceeds view of {} bytes",
                range.start,
                range.end,
                self.len()
            )));
        }
        Ok(Self {
            backing: Arc::clone(&self.backing),
            range: self.range.start + range.start..self.range.start + range.end,
        })
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.backing.bytes()[self.range.clone()]
    }
}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedBytes({}..{})", self.range.start, self.range.end)
    }
}

fn eof(msg: String) -> MatError {
    MatError::from(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
}

// --- Random access source ---

/// A source over shared, immutable bytes.
#[derive(Debug, Clone)]
pub struct SliceSource {
    bytes: SharedBytes,
    pos: usize,
    order: ByteOrder,
}

impl SliceSource {
    /// Creates a source over a shared view.
    pub fn new(bytes: SharedBytes, order: ByteOrder) -> Self {
        Self { bytes, pos: 0, order }
    }

    /// Creates a source that owns `bytes`.
    pub fn from_vec(bytes: Vec<u8>, order: ByteOrder) -> Self {
        Self::new(SharedBytes::from_vec(bytes), order)
    }

    /// Total length of the underlying view.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the underlying view is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take_range(&mut self, len: u64) -> Result<Range<usize>> {
        let len = usize::try_from(len)
            .map_err(|_| MatError::Unsupported(format!("range of {len} bytes")))?;
        let end = self.pos.checked_add(len).filter(|end| *end <= self.bytes.len());
        let Some(end) = end else {
            return Err(eof(format!(
                "need {len} bytes at position {}, only {} remain",
                self.pos,
                self.bytes.len() - self.pos
            )));
        };
        let range = self.pos..end;
        self.pos = end;
        Ok(range)
    }
}

impl ByteSource for SliceSource {
    fn order(&self) -> ByteOrder {
        self.order
    }

    fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let range = self.take_range(buf.len() as u64)?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.take_range(n).map(|_| ())
    }

    fn is_exhausted(&mut self) -> Result<bool> {
        Ok(self.pos >= self.bytes.len())
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.bytes.len().saturating_sub(self.pos) as u64)
    }

    fn inflate(&mut self, len: u64) -> Result<Box<dyn ByteSource + '_>> {
        let range = self.take_range(len)?;
        let compressed: &[u8] = &self.bytes[range];
        Ok(Box::new(InflateSource::new(compressed, len, self.order)))
    }

    fn supports_detached_children(&self) -> bool {
        true
    }

    fn detach(&mut self, len: u64) -> Result<Option<SharedBytes>> {
        let range = self.take_range(len)?;
        self.bytes.slice(range).map(Some)
    }
}

// --- Forward-only source ---

/// A source over a forward-only stream.
#[derive(Debug)]
pub struct ReadSource<R: Read> {
    inner: R,
    pos: u64,
    order: ByteOrder,
    lookahead: Option<u8>,
}

impl<R: Read> ReadSource<R> {
    /// Wraps a stream.
    pub fn new(inner: R, order: ByteOrder) -> Self {
        Self { inner, pos: 0, order, lookahead: None }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn order(&self) -> ByteOrder {
        self.order
    }

    fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        if let Some(first) = buf.first_mut()
            && let Some(b) = self.lookahead.take()
        {
            *first = b;
            filled = 1;
        }
        self.inner.read_exact(&mut buf[filled..])?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn is_exhausted(&mut self) -> Result<bool> {
        if self.lookahead.is_some() {
            return Ok(false);
        }
        let mut b = [0u8; 1];
        loop {
            match self.inner.read(&mut b) {
                Ok(0) => return Ok(true),
                Ok(_) => {
                    self.lookahead = Some(b[0]);
                    return Ok(false);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn inflate(&mut self, len: u64) -> Result<Box<dyn ByteSource + '_>> {
        if len == 0 {
            return Err(MatError::format(format!(
                "empty compressed entry at position {}",
                self.pos
            )));
        }
        self.pos += len;
        let order = self.order;
        let prefix = self.lookahead.take();
        let stream = LookaheadRead { first: prefix, inner: &mut self.inner };
        Ok(Box::new(InflateSource::new(stream, len, order)))
    }
}

/// Replays a byte taken by [`ReadSource::is_exhausted`] before the stream.
struct LookaheadRead<'a, R: Read> {
    first: Option<u8>,
    inner: &'a mut R,
}

impl<R: Read> Read for LookaheadRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = self.first.take() {
            buf[0] = b;
            return Ok(1);
        }
        self.inner.read(buf)
    }
}

// --- Inflating child source ---

/// A child source that inflates a zlib stream of known compressed length.
pub struct InflateSource<R: Read> {
    decoder: ZlibDecoder<Take<R>>,
    pos: u64,
    order: ByteOrder,
}

impl<R: Read> InflateSource<R> {
    /// Inflates at most `len` bytes of `compressed`.
    pub fn new(compressed: R, len: u64, order: ByteOrder) -> Self {
        Self { decoder: ZlibDecoder::new(compressed.take(len)), pos: 0, order }
    }
}

impl<R: Read> ByteSource for InflateSource<R> {
    fn order(&self) -> ByteOrder {
        self.order
    }

    fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.decoder.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => MatError::from(e),
            _ => MatError::Compression(e.to_string()),
        })?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn is_exhausted(&mut self) -> Result<bool> {
        // Only used at root level; a compressed entry holds exactly one element.
        Ok(false)
    }

    fn inflate(&mut self, _len: u64) -> Result<Box<dyn ByteSource + '_>> {
        Err(MatError::format(format!(
            "nested compressed element at inflated position {}",
            self.pos
        )))
    }

    fn finish(&mut self) -> Result<()> {
        let mut extra = [0u8; 1];
        match self.decoder.read(&mut extra) {
            Ok(0) => {}
            Ok(_) => log::warn!("ignoring trailing data after compressed element"),
            Err(e) => return Err(MatError::Compression(e.to_string())),
        }
        io::copy(self.decoder.get_mut(), &mut io::sink())?;
        Ok(())
    }
}

// --- Sinks ---

/// A positioned, patchable byte sink.
pub trait ByteSink: Write {
    /// Byte order of everything written.
    fn order(&self) -> ByteOrder;

    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Overwrites bytes at an earlier position without moving the write cursor.
    fn patch(&mut self, position: u64, bytes: &[u8]) -> Result<()>;
}

/// A [`ByteSink`] over any seekable writer.
#[derive(Debug)]
pub struct SeekSink<W: Write + Seek> {
    inner: W,
    start: u64,
    pos: u64,
    order: ByteOrder,
}

impl<W: Write + Seek> SeekSink<W> {
    /// Wraps a writer. Positions are relative to its current offset.
    pub fn new(mut inner: W, order: ByteOrder) -> Result<Self> {
        let start = inner.stream_position()?;
        Ok(Self { inner, start, pos: 0, order })
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Write for SeekSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> ByteSink for SeekSink<W> {
    fn order(&self) -> ByteOrder {
        self.order
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn patch(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        if position + bytes.len() as u64 > self.pos {
            return Err(MatError::Internal(format!(
                "patch at {position} extends past write cursor {}",
                self.pos
            )));
        }
        self.inner.seek(SeekFrom::Start(self.start + position))?;
        self.inner.write_all(bytes)?;
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        Ok(())
    }
}
