//! The write-side engine.
//!
//! [`MatWriter`] emits a header followed by one root element per
//! [`write_entry`](MatWriter::write_entry) call. Element sizes are computed
//! up front by walking the array tree, so tags are written before their
//! payload and nothing but compressed lengths and the header's subsystem
//! offset ever needs back-patching.
//!
//! ## Concurrency
//! With a pool configured, compressed entries are deflated on workers into
//! private buffers while the calling thread keeps submitting. Buffers are
//! committed to the sink strictly in submission order; uncompressed entries
//! submitted behind pending ones wait their turn in the same queue.

use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use rayon::ThreadPool;

use crate::allocator::{BufferAllocator, default_allocator};
use crate::array::{Array, Entry, NumericArray, OpaqueContent, StructArray};
use crate::charset;
use crate::compression::Compression;
use crate::error::{MatError, Result};
use crate::executor::OrderedQueue;
use crate::format::{
    ArrayClass, ArrayFlags, ByteOrder, FileHeader, HeaderKind, MatType, SUBSYSTEM_OFFSET_POSITION,
    Tag,
};
use crate::io::{ByteSink, SeekSink};
use crate::mcos::{McosReference, Subsystem};
use crate::number::NumberStore;

/// Write configuration.
#[derive(Clone)]
pub struct WriteOptions {
    pub(crate) compression: Compression,
    pub(crate) order: ByteOrder,
    pub(crate) reduced_header: bool,
    pub(crate) description: Option<String>,
    pub(crate) pool: Option<Arc<ThreadPool>>,
    pub(crate) allocator: Arc<dyn BufferAllocator>,
}

impl WriteOptions {
    /// Uncompressed, native byte order, full header, sequential.
    pub fn new() -> Self {
        Self {
            compression: Compression::None,
            order: ByteOrder::native(),
            reduced_header: false,
            description: None,
            pool: None,
            allocator: default_allocator(),
        }
    }

    /// Sets the compression applied to root entries.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the byte order of the output.
    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Writes the 8-byte reduced header instead of the 128-byte one.
    pub fn with_reduced_header(mut self, reduced: bool) -> Self {
        self.reduced_header = reduced;
        self
    }

    /// Overrides the header description text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Compresses entries on `pool`.
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Allocates scratch number buffers from `allocator`.
    pub fn with_allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    fn header(&self) -> FileHeader {
        if self.reduced_header {
            return FileHeader::reduced(self.order);
        }
        let mut header = FileHeader::full(self.order);
        if let (Some(text), HeaderKind::Full { description, .. }) =
            (&self.description, &mut header.kind)
        {
            *description = text.clone();
        }
        header
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("compression", &self.compression)
            .field("order", &self.order)
            .field("reduced_header", &self.reduced_header)
            .field("threads", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .finish()
    }
}

/// An encoded root element waiting for its turn.
#[derive(Debug)]
struct Chunk {
    bytes: Vec<u8>,
    subsystem: bool,
}

/// Streaming MAT5 writer.
///
/// Under a reduced header the subsystem has no offset field and is found
/// by position: it is the second root element. A subsystem handed over
/// before the first entry is held back until that entry is written. When a
/// second entry arrives and no subsystem was given, an empty `UInt8`
/// placeholder takes its slot.
pub struct MatWriter<K: ByteSink> {
    sink: K,
    options: WriteOptions,
    header: FileHeader,
    queue: OrderedQueue<Chunk>,
    subsystem_at: Option<u64>,
    subsystem_written: bool,
    pending_subsystem: Option<Subsystem>,
    entries: usize,
}

impl MatWriter<SeekSink<std::io::BufWriter<std::fs::File>>> {
    /// Creates (or truncates) a file and writes the header.
    pub fn create(path: impl AsRef<std::path::Path>, options: WriteOptions) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        let sink = SeekSink::new(std::io::BufWriter::new(file), options.order)?;
        Self::new(sink, options)
    }
}

impl MatWriter<SeekSink<std::io::Cursor<Vec<u8>>>> {
    /// A writer producing an in-memory buffer.
    pub fn in_memory(options: WriteOptions) -> Result<Self> {
        let sink = SeekSink::new(std::io::Cursor::new(Vec::new()), options.order)?;
        Self::new(sink, options)
    }
}

impl<K: ByteSink> MatWriter<K> {
    /// Writes the header to `sink`.
    ///
    /// # Errors
    /// Returns `MatError::Internal` if the sink's byte order differs from the
    /// options.
    pub fn new(mut sink: K, options: WriteOptions) -> Result<Self> {
        if sink.order() != options.order {
            return Err(MatError::Internal(format!(
                "sink order {:?} differs from requested {:?}",
                sink.order(),
                options.order
            )));
        }
        let header = options.header();
        sink.write_all(&header.to_bytes())?;
        log::debug!("wrote {:?} header, order {:?}", header.kind, options.order);
        Ok(Self {
            sink,
            options,
            header,
            queue: OrderedQueue::new(),
            subsystem_at: None,
            subsystem_written: false,
            pending_subsystem: None,
            entries: 0,
        })
    }

    /// The header being written.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Writes a root entry with the configured compression.
    pub fn write_entry(&mut self, entry: Entry) -> Result<()> {
        let compression = self.options.compression;
        self.write_entry_with(entry, compression)
    }

    /// Writes a root entry with an explicit compression setting.
    ///
    /// The entry is consumed: its number buffers are converted to the output
    /// byte order in place.
    pub fn write_entry_with(&mut self, mut entry: Entry, compression: Compression) -> Result<()> {
        normalize(&mut entry.value, self.options.order);
        self.before_entry()?;
        self.submit(Cow::Owned(entry), compression, false)
    }

    /// Writes a borrowed root entry with the configured compression.
    ///
    /// Nothing is copied when the entry is encoded on the calling thread;
    /// stores in the other byte order are swapped one at a time as they are
    /// written. Entries deflated on the pool are cloned, since the worker
    /// needs to own them.
    pub fn write_entry_ref(&mut self, entry: &Entry) -> Result<()> {
        let compression = self.options.compression;
        self.before_entry()?;
        self.submit(Cow::Borrowed(entry), compression, false)
    }

    /// Writes the subsystem and records its position.
    ///
    /// With a full header the subsystem is written where the call falls and
    /// its offset is patched into the header by [`finish`](Self::finish).
    /// With a reduced header it must be the second root element, so it may
    /// be given before any entry or right after the first one.
    ///
    /// # Errors
    /// Returns `MatError::Format` if a subsystem was already written, or if a
    /// reduced-header writer already holds two or more entries.
    pub fn write_subsystem(&mut self, subsystem: Subsystem) -> Result<()> {
        let reduced = self.header.is_reduced();
        if reduced && self.entries > 1 {
            return Err(MatError::format(format!(
                "a reduced-header subsystem must be the second element, {} entries already written",
                self.entries
            )));
        }
        if self.subsystem_written || self.pending_subsystem.is_some() {
            return Err(MatError::format("subsystem written twice"));
        }
        if reduced && self.entries == 0 {
            self.pending_subsystem = Some(subsystem);
            return Ok(());
        }
        self.emit_subsystem(subsystem.bytes())
    }

    /// Fills the reduced-header subsystem slot ahead of the second entry.
    fn before_entry(&mut self) -> Result<()> {
        if self.header.is_reduced() && self.entries == 1 && !self.subsystem_written {
            let pending = self.pending_subsystem.take();
            let bytes = pending.map(Subsystem::into_bytes).unwrap_or_default();
            self.emit_subsystem(&bytes)?;
        }
        self.entries += 1;
        Ok(())
    }

    fn emit_subsystem(&mut self, bytes: &[u8]) -> Result<()> {
        self.subsystem_written = true;
        let (order, allocator) = (self.options.order, &self.options.allocator);
        let store = NumberStore::from_bytes(MatType::UInt8, bytes, order, allocator)?;
        let value = NumericArray::new(ArrayClass::UInt8, vec![1, bytes.len()], store)?;
        let compression = self.options.compression;
        self.submit(Cow::Owned(Entry::new("", Array::Numeric(value))), compression, true)
    }

    fn submit(&mut self, entry: Cow<'_, Entry>, compression: Compression, subsystem: bool) -> Result<()> {
        let order = self.options.order;
        self.commit_ready()?;

        if compression.is_enabled()
            && let Some(pool) = self.options.pool.clone()
        {
            let mut entry = entry.into_owned();
            normalize(&mut entry.value, order);
            self.queue.spawn(&pool, move || {
                let bytes = encode_compressed(&entry, order, compression)?;
                Ok(Chunk { bytes, subsystem })
            });
            return Ok(());
        }

        if self.queue.is_empty() {
            if subsystem {
                self.subsystem_at = Some(self.sink.position());
            }
            return if compression.is_enabled() {
                self.write_compressed_direct(&entry, compression)
            } else {
                write_root_matrix(&mut self.sink, &entry, order)
            };
        }

        let bytes = if compression.is_enabled() {
            encode_compressed(&entry, order, compression)?
        } else {
            let mut bytes = Vec::new();
            write_root_matrix(&mut bytes, &entry, order)?;
            bytes
        };
        self.queue.push_ready(Chunk { bytes, subsystem });
        Ok(())
    }

    /// Streams deflate output straight into the sink, then patches the length.
    fn write_compressed_direct(&mut self, entry: &Entry, compression: Compression) -> Result<()> {
        let order = self.options.order;
        let tag_at = self.sink.position();
        Tag::unpacked(MatType::Compressed, 0).write(&mut self.sink, order)?;
        {
            let mut encoder = ZlibEncoder::new(&mut self.sink, compression.flate_level());
            write_root_matrix(&mut encoder, entry, order)?;
            encoder.finish().map_err(|e| MatError::Compression(e.to_string()))?;
        }
        let len = self.sink.position() - tag_at - 8;
        let len = checked_len(len as usize, &entry.name)?;
        self.sink.patch(tag_at + 4, &order.u32_bytes(len))
    }

    fn commit(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.subsystem {
            self.subsystem_at = Some(self.sink.position());
        }
        self.sink.write_all(&chunk.bytes)?;
        Ok(())
    }

    fn commit_ready(&mut self) -> Result<()> {
        while let Some(result) = self.queue.try_pop() {
            let chunk = match result {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.queue.drain(|_| Ok(())).ok();
                    return Err(e);
                }
            };
            self.commit(chunk)?;
        }
        Ok(())
    }

    /// Waits for pending entries, patches the header and returns the sink.
    pub fn finish(mut self) -> Result<K> {
        if let Some(subsystem) = self.pending_subsystem.take() {
            if self.entries == 0 {
                log::warn!("dropping the subsystem of a reduced-header file without entries");
            } else {
                self.emit_subsystem(subsystem.bytes())?;
            }
        }
        let mut queue = std::mem::replace(&mut self.queue, OrderedQueue::new());
        queue.drain(|chunk| self.commit(chunk))?;
        if let (Some(position), false) = (self.subsystem_at, self.header.is_reduced()) {
            let order = self.options.order;
            self.sink.patch(SUBSYSTEM_OFFSET_POSITION, &order.u64_bytes(position))?;
            if let HeaderKind::Full { subsystem_offset, .. } = &mut self.header.kind {
                *subsystem_offset = Some(position);
            }
        }
        self.sink.flush()?;
        log::debug!(
            "finished writing {} entries, subsystem at {:?}",
            self.entries,
            self.subsystem_at
        );
        Ok(self.sink)
    }
}

impl<K: ByteSink> fmt::Debug for MatWriter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatWriter")
            .field("options", &self.options)
            .field("entries", &self.entries)
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Encodes one uncompressed root element into `out` (used for sub-files).
pub(crate) fn encode_element(out: &mut Vec<u8>, mut entry: Entry, order: ByteOrder) -> Result<()> {
    normalize(&mut entry.value, order);
    write_root_matrix(out, &entry, order)
}

fn encode_compressed(entry: &Entry, order: ByteOrder, compression: Compression) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    write_root_matrix(&mut raw, entry, order)?;
    let mut out = vec![0u8; 8];
    compression.compressor().compress_append(&raw, &mut out)?;
    let len = checked_len(out.len() - 8, &entry.name)?;
    let mut tag = Vec::with_capacity(8);
    Tag::unpacked(MatType::Compressed, len).write(&mut tag, order)?;
    out[..8].copy_from_slice(&tag);
    Ok(out)
}

// --- Element encoding ---

fn checked_len(size: usize, name: &str) -> Result<u32> {
    let len = u32::try_from(size).map_err(|_| {
        MatError::range(format!("element '{name}' needs {size} bytes, more than a tag can describe"))
    })?;
    if size > i32::MAX as usize {
        log::warn!("element '{name}' is {size} bytes; readers using signed lengths will reject it");
    }
    Ok(len)
}

/// Bytes occupied by a sub-element holding `len` payload bytes.
fn element_size(ty: MatType, len: usize) -> usize {
    if !ty.is_container() && len > 0 && len <= 4 {
        8
    } else {
        8 + len.div_ceil(8) * 8
    }
}

fn string_size(s: &str) -> usize {
    element_size(MatType::Int8, s.len())
}

fn store_size(store: &NumberStore) -> usize {
    element_size(store.physical_type(), store.num_bytes())
}

fn field_width(names: &[String]) -> usize {
    names.iter().map(String::len).max().unwrap_or(0) + 1
}

/// Payload size of a `Matrix` element and of every matrix nested in it.
///
/// Measured once per root element, then consumed top-down by the writer so
/// no subtree is walked twice.
#[derive(Debug)]
struct Layout {
    size: usize,
    nested: Vec<Layout>,
}

impl Layout {
    fn leaf(size: usize) -> Self {
        Self { size, nested: Vec::new() }
    }

    fn with_nested(head: usize, nested: Vec<Layout>) -> Self {
        let size = head + nested.iter().map(|n| 8 + n.size).sum::<usize>();
        Self { size, nested }
    }

    fn only_nested(&self) -> Result<&Layout> {
        match self.nested.as_slice() {
            [inner] => Ok(inner),
            other => Err(MatError::Internal(format!("expected one nested layout, found {}", other.len()))),
        }
    }
}

/// Flags, optional dimensions and name.
fn header_size(name: &str, ndims: Option<usize>) -> usize {
    16 + string_size(name) + ndims.map_or(0, |n| element_size(MatType::Int32, 4 * n))
}

fn numeric_size(a: &NumericArray) -> usize {
    store_size(&a.real) + a.imaginary.as_ref().map_or(0, store_size)
}

fn reference_words(reference: &McosReference) -> usize {
    3 + reference.dims().len() + reference.object_ids().len()
}

fn measure(name: &str, array: &Array) -> Result<Layout> {
    let ndims = (!matches!(array, Array::Opaque(_))).then(|| array.dims().len());
    let head = header_size(name, ndims);
    let layout = match array {
        Array::Numeric(a) => Layout::leaf(head + numeric_size(a)),
        Array::Char(a) => {
            Layout::leaf(head + element_size(a.encoding, charset::encoded_len(a.encoding, &a.chars)?))
        }
        Array::Sparse(a) => {
            let m = &a.matrix;
            Layout::leaf(
                head + element_size(MatType::Int32, 4 * m.row_indices().len())
                    + element_size(MatType::Int32, 4 * m.col_indices().len())
                    + store_size(m.real())
                    + m.imaginary().map_or(0, store_size),
            )
        }
        Array::Cell(a) => {
            let nested = a.cells.iter().map(|c| measure("", c)).collect::<Result<Vec<_>>>()?;
            Layout::with_nested(head, nested)
        }
        Array::Struct(s) => measure_struct(head, s)?,
        Array::Object(o) => measure_struct(head + string_size(&o.class_name), &o.fields)?,
        Array::FunctionHandle(h) => {
            let content = measure_struct(header_size("", Some(h.content.dims.len())), &h.content)?;
            Layout::with_nested(head, vec![content])
        }
        Array::Opaque(o) => {
            let inner = match &o.content {
                OpaqueContent::Reference(r) => Layout::leaf(
                    header_size("", Some(2)) + element_size(MatType::UInt32, 4 * reference_words(r)),
                ),
                OpaqueContent::Java(bytes) => {
                    Layout::leaf(header_size("", Some(bytes.dims.len())) + numeric_size(bytes))
                }
                OpaqueContent::FileWrapper(inner) | OpaqueContent::Generic(inner) => measure("", inner)?,
            };
            let head = head + string_size(&o.object_type) + string_size(&o.class_name);
            Layout::with_nested(head, vec![inner])
        }
    };
    Ok(layout)
}

fn measure_struct(head: usize, s: &StructArray) -> Result<Layout> {
    let names = 8 + element_size(MatType::Int8, field_width(&s.field_names) * s.field_names.len());
    let nested = s.values.iter().map(|v| measure("", v)).collect::<Result<Vec<_>>>()?;
    Ok(Layout::with_nested(head + names, nested))
}

/// Converts every number buffer in the tree to `order`.
fn normalize(array: &mut Array, order: ByteOrder) {
    match array {
        Array::Numeric(a) => {
            a.real.convert_order(order);
            if let Some(imag) = &mut a.imaginary {
                imag.convert_order(order);
            }
        }
        Array::Sparse(a) => {
            let (real, imag) = a.matrix.stores_mut();
            real.convert_order(order);
            if let Some(imag) = imag {
                imag.convert_order(order);
            }
        }
        Array::Char(_) => {}
        Array::Cell(a) => a.cells.iter_mut().for_each(|c| normalize(c, order)),
        Array::Struct(s) => s.values.iter_mut().for_each(|v| normalize(v, order)),
        Array::Object(o) => o.fields.values.iter_mut().for_each(|v| normalize(v, order)),
        Array::FunctionHandle(h) => h.content.values.iter_mut().for_each(|v| normalize(v, order)),
        Array::Opaque(o) => match &mut o.content {
            OpaqueContent::Java(bytes) => bytes.real.convert_order(order),
            OpaqueContent::FileWrapper(inner) | OpaqueContent::Generic(inner) => normalize(inner, order),
            OpaqueContent::Reference(_) => {}
        },
    }
}

fn write_sub(out: &mut dyn Write, ty: MatType, bytes: &[u8], order: ByteOrder) -> Result<()> {
    let tag = Tag::new(ty, checked_len(bytes.len(), "")?);
    tag.write(out, order)?;
    out.write_all(bytes)?;
    out.write_all(&[0u8; 8][..tag.padding()])?;
    Ok(())
}

fn write_store(out: &mut dyn Write, store: &NumberStore, order: ByteOrder) -> Result<()> {
    if store.order() == order {
        write_sub(out, store.physical_type(), store.as_bytes(), order)
    } else {
        let mut converted = store.clone();
        converted.convert_order(order);
        write_sub(out, converted.physical_type(), converted.as_bytes(), order)
    }
}

fn write_i32s(out: &mut dyn Write, values: impl Iterator<Item = i32>, order: ByteOrder) -> Result<()> {
    let bytes: Vec<u8> = values.flat_map(|v| order.u32_bytes(v as u32)).collect();
    write_sub(out, MatType::Int32, &bytes, order)
}

fn write_root_matrix(out: &mut dyn Write, entry: &Entry, order: ByteOrder) -> Result<()> {
    let layout = measure(&entry.name, &entry.value)?;
    let global = entry.global || entry.value.is_global();
    write_matrix(out, &entry.name, &entry.value, global, &layout, order)
}

fn numeric_flags(a: &NumericArray, global: bool) -> ArrayFlags {
    let mut flags = ArrayFlags::new(a.class);
    flags.global = global;
    flags.complex = a.imaginary.is_some();
    flags.logical = a.logical;
    flags
}

fn array_flags(array: &Array, global: bool) -> Result<ArrayFlags> {
    if let Array::Numeric(a) = array {
        return Ok(numeric_flags(a, global));
    }
    let mut flags = ArrayFlags::new(array.class());
    flags.global = global;
    if let Array::Sparse(a) = array {
        flags.complex = a.matrix.imaginary().is_some();
        flags.logical = a.logical;
        flags.nz_max = u32::try_from(a.matrix.nz_max().max(a.matrix.nnz()).max(1))
            .map_err(|_| MatError::range("sparse nz_max exceeds 32 bits"))?;
    }
    Ok(flags)
}

/// Tag, flags, dimensions (absent for opaque elements) and name.
fn write_header(
    out: &mut dyn Write,
    name: &str,
    size: usize,
    flags: ArrayFlags,
    dims: Option<&[usize]>,
    order: ByteOrder,
) -> Result<()> {
    Tag::unpacked(MatType::Matrix, checked_len(size, name)?).write(out, order)?;
    let mut flag_bytes = Vec::with_capacity(8);
    flag_bytes.extend_from_slice(&order.u32_bytes(flags.word()));
    flag_bytes.extend_from_slice(&order.u32_bytes(flags.nz_max));
    write_sub(out, MatType::UInt32, &flag_bytes, order)?;
    if let Some(dims) = dims {
        let dims = dims
            .iter()
            .map(|d| i32::try_from(*d).map_err(|_| MatError::range(format!("dimension {d} exceeds i32"))))
            .collect::<Result<Vec<_>>>()?;
        write_i32s(out, dims.into_iter(), order)?;
    }
    write_sub(out, MatType::Int8, name.as_bytes(), order)
}

fn write_numeric_body(out: &mut dyn Write, a: &NumericArray, order: ByteOrder) -> Result<()> {
    write_store(out, &a.real, order)?;
    if let Some(imag) = &a.imaginary {
        write_store(out, imag, order)?;
    }
    Ok(())
}

fn write_matrix(
    out: &mut dyn Write,
    name: &str,
    array: &Array,
    global: bool,
    layout: &Layout,
    order: ByteOrder,
) -> Result<()> {
    let dims = (!matches!(array, Array::Opaque(_))).then(|| array.dims());
    write_header(out, name, layout.size, array_flags(array, global)?, dims, order)?;

    match array {
        Array::Numeric(a) => write_numeric_body(out, a, order)?,
        Array::Char(a) => {
            let bytes = charset::encode(a.encoding, &a.chars, order)?;
            write_sub(out, a.encoding, &bytes, order)?;
        }
        Array::Sparse(a) => {
            let m = &a.matrix;
            write_i32s(out, m.row_indices().iter().copied(), order)?;
            write_i32s(out, m.col_indices().iter().copied(), order)?;
            write_store(out, m.real(), order)?;
            if let Some(imag) = m.imaginary() {
                write_store(out, imag, order)?;
            }
        }
        Array::Cell(a) => {
            for (cell, nested) in a.cells.iter().zip(&layout.nested) {
                write_matrix(out, "", cell, cell.is_global(), nested, order)?;
            }
        }
        Array::Struct(s) => write_struct(out, s, &layout.nested, order)?,
        Array::Object(o) => {
            write_sub(out, MatType::Int8, o.class_name.as_bytes(), order)?;
            write_struct(out, &o.fields, &layout.nested, order)?;
        }
        Array::FunctionHandle(h) => {
            let content = layout.only_nested()?;
            let flags = ArrayFlags::new(ArrayClass::Struct);
            write_header(out, "", content.size, flags, Some(&h.content.dims), order)?;
            write_struct(out, &h.content, &content.nested, order)?;
        }
        Array::Opaque(o) => {
            write_sub(out, MatType::Int8, o.object_type.as_bytes(), order)?;
            write_sub(out, MatType::Int8, o.class_name.as_bytes(), order)?;
            let inner = layout.only_nested()?;
            match &o.content {
                OpaqueContent::Reference(r) => {
                    let words = r.to_payload();
                    let flags = ArrayFlags::new(ArrayClass::UInt32);
                    write_header(out, "", inner.size, flags, Some(&[words.len(), 1]), order)?;
                    let bytes: Vec<u8> = words.iter().flat_map(|w| order.u32_bytes(*w)).collect();
                    write_sub(out, MatType::UInt32, &bytes, order)?;
                }
                OpaqueContent::Java(bytes) => {
                    write_header(out, "", inner.size, numeric_flags(bytes, false), Some(&bytes.dims), order)?;
                    write_numeric_body(out, bytes, order)?;
                }
                OpaqueContent::FileWrapper(value) | OpaqueContent::Generic(value) => {
                    write_matrix(out, "", value, value.is_global(), inner, order)?;
                }
            }
        }
    }
    Ok(())
}

fn write_struct(out: &mut dyn Write, s: &StructArray, nested: &[Layout], order: ByteOrder) -> Result<()> {
    let width = field_width(&s.field_names);
    let width_word = u32::try_from(width).map_err(|_| MatError::range("field name too long"))?;
    write_sub(out, MatType::Int32, &order.u32_bytes(width_word), order)?;
    let mut names = Vec::with_capacity(width * s.field_names.len());
    for name in &s.field_names {
        let start = names.len();
        names.extend_from_slice(name.as_bytes());
        names.resize(start + width, 0);
    }
    write_sub(out, MatType::Int8, &names, order)?;
    for (value, layout) in s.values.iter().zip(nested) {
        write_matrix(out, "", value, value.is_global(), layout, order)?;
    }
    Ok(())
}
