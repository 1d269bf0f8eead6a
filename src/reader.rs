//! The read-side engine.
//!
//! [`read_file`] validates the header, then walks the root entries until the
//! source is exhausted. Each root element is decoded by an [`ElementReader`],
//! either on the calling thread or, for compressed entries of a random-access
//! source, on the configured rayon pool. Results are merged in file order.
//!
//! Object references met during decoding are recorded in a per-read
//! [`ReferenceRegistry`]; only when it is non-empty is the subsystem parsed
//! and every reference bound to the resulting [`ObjectArena`].

use std::fmt;
use std::sync::Arc;

use rayon::ThreadPool;
use serde::Serialize;

use crate::allocator::{BufferAllocator, default_allocator};
use crate::array::{
    Array, CellArray, CharArray, Entry, FunctionHandle, NumericArray, ObjectArray, OpaqueArray,
    OpaqueContent, SparseArray, StructArray, element_count,
};
use crate::charset;
use crate::error::{MatError, Result};
use crate::executor::OrderedQueue;
use crate::file::MatFile;
use crate::format::{ArrayClass, ArrayFlags, FileHeader, MatType, Tag};
use crate::io::{ByteSource, SliceSource};
use crate::mcos::{self, McosReference, ReferenceRegistry, Subsystem};
use crate::number::NumberStore;
use crate::sparse::SparseMatrix;

/// Object type string of class objects stored in the subsystem.
pub(crate) const MCOS_TYPE: &str = "MCOS";
/// Class name of the subsystem's object table.
pub(crate) const FILE_WRAPPER_CLASS: &str = "FileWrapper__";
const JAVA_TYPE: &str = "java";

/// What a filter sees of a root entry before its payload is decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryHeader {
    /// Variable name.
    pub name: String,
    /// Array class.
    pub class: ArrayClass,
    /// Dimensions (`[1, 1]` for opaque entries, which carry none).
    pub dims: Vec<usize>,
    /// Global flag.
    pub global: bool,
    /// Logical flag.
    pub logical: bool,
    /// Complex flag.
    pub complex: bool,
}

/// Decides which root entries get decoded. Rejected entries are skipped.
pub type EntryFilter = Arc<dyn Fn(&EntryHeader) -> bool + Send + Sync>;

/// Read configuration. Cheap to clone: everything is shared.
#[derive(Clone)]
pub struct ReadOptions {
    pub(crate) pool: Option<Arc<ThreadPool>>,
    pub(crate) filter: Option<EntryFilter>,
    pub(crate) allocator: Arc<dyn BufferAllocator>,
    pub(crate) reduced_header: bool,
}

impl ReadOptions {
    /// Sequential decoding, no filter, heap allocation, full header.
    pub fn new() -> Self {
        Self { pool: None, filter: None, allocator: default_allocator(), reduced_header: false }
    }

    /// Decodes compressed entries on `pool`.
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Installs an entry filter.
    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Allocates number buffers from `allocator`.
    pub fn with_allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Expects the 8-byte reduced header instead of the 128-byte one.
    pub fn with_reduced_header(mut self, reduced: bool) -> Self {
        self.reduced_header = reduced;
        self
    }

    pub(crate) fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("threads", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .field("filter", &self.filter.is_some())
            .field("allocator", &self.allocator)
            .field("reduced_header", &self.reduced_header)
            .finish()
    }
}

/// Outcome of decoding one root element.
#[derive(Debug)]
struct Decoded {
    entry: Option<Entry>,
    registry: ReferenceRegistry,
    subsystem: bool,
}

/// Reads a whole file from `src`.
///
/// # Errors
/// Propagates the first failure in file order. Without a pool, decoding stops
/// at the first failure; with one, in-flight workers are awaited first.
pub fn read_file(src: &mut dyn ByteSource, options: &ReadOptions) -> Result<MatFile> {
    let header = FileHeader::read(src, options.reduced_header)?;
    let subsystem_at = header.subsystem_offset();
    log::debug!("read header: {:?}, subsystem at {subsystem_at:?}", header.kind);

    let mut queue: OrderedQueue<Decoded> = OrderedQueue::new();
    let mut first_error = None;
    let mut index = 0usize;
    while !src.is_exhausted()? {
        let start = src.position();
        // Reduced headers carry no offset: the second root entry is the subsystem.
        let subsystem = subsystem_at == Some(start) || (header.is_reduced() && index == 1);
        if let Err(e) = submit_root(src, options, subsystem, &mut queue) {
            first_error = Some(e);
            break;
        }
        index += 1;
    }

    let mut entries = Vec::new();
    let mut registry = ReferenceRegistry::new();
    let mut subsystem_entry = None;
    let drained = queue.drain(|decoded| {
        registry.merge(decoded.registry);
        match (decoded.subsystem, decoded.entry) {
            (true, Some(entry)) => subsystem_entry = Some(entry),
            (false, Some(entry)) => entries.push(entry),
            (_, None) => {}
        }
        Ok(())
    });
    drained?;
    if let Some(e) = first_error {
        return Err(e);
    }

    if subsystem_at.is_some() && subsystem_entry.is_none() {
        return Err(MatError::format(format!(
            "header names a subsystem at {subsystem_at:?} but no entry starts there"
        )));
    }
    // An empty slot holds the subsystem position of a reduced file without one.
    let subsystem = subsystem_entry
        .map(|e| subsystem_bytes(e.value))
        .transpose()?
        .filter(|s| !s.bytes().is_empty());

    let objects = mcos::resolve(&mut entries, &registry, subsystem.as_ref(), options)?;
    log::debug!(
        "decoded {} entries, {} references, {} objects",
        entries.len(),
        registry.len(),
        objects.len()
    );
    Ok(MatFile::from_parts(header, entries, subsystem, objects))
}

fn subsystem_bytes(value: Array) -> Result<Subsystem> {
    match value {
        Array::Numeric(n) if n.real.physical_type() == MatType::UInt8 => {
            Ok(Subsystem::from_bytes(n.real.as_bytes().to_vec()))
        }
        other => Err(MatError::format(format!(
            "subsystem entry is a {:?} array, expected UInt8 bytes",
            other.class()
        ))),
    }
}

fn submit_root(
    src: &mut dyn ByteSource,
    options: &ReadOptions,
    subsystem: bool,
    queue: &mut OrderedQueue<Decoded>,
) -> Result<()> {
    let tag = Tag::read(src)?;
    match tag.ty {
        MatType::Compressed
            if !subsystem && options.pool.is_some() && src.supports_detached_children() =>
        {
            let len = u64::from(tag.num_bytes);
            let order = src.order();
            let view = src
                .detach(len)?
                .ok_or_else(|| MatError::Internal("source refused to detach".into()))?;
            let worker_options = options.clone();
            if let Some(pool) = &options.pool {
                queue.spawn(pool, move || {
                    let mut outer = SliceSource::new(view, order);
                    let mut reader = ElementReader::new(&worker_options);
                    let entry = reader.read_root(&mut outer, tag, false)?;
                    Ok(Decoded { entry, registry: reader.into_registry(), subsystem: false })
                });
            }
            Ok(())
        }
        MatType::Matrix | MatType::Compressed => {
            let mut reader = ElementReader::new(options);
            let entry = reader.read_root(src, tag, subsystem)?;
            queue.push_ready(Decoded { entry, registry: reader.into_registry(), subsystem });
            Ok(())
        }
        other => Err(MatError::format(format!(
            "root element at position {} has type {other}, expected Matrix or Compressed",
            src.position() - tag.header_size() as u64
        ))),
    }
}

/// Decodes a subsystem blob (reduced header plus root entries) into its first
/// element.
pub(crate) fn read_subsystem_root(bytes: Vec<u8>, options: &ReadOptions) -> Result<Array> {
    let mut src = SliceSource::from_vec(bytes, crate::format::ByteOrder::native());
    FileHeader::read(&mut src, true)?;
    let tag = Tag::read(&mut src)?;
    if !matches!(tag.ty, MatType::Matrix | MatType::Compressed) {
        return Err(MatError::format(format!("subsystem starts with a {} element", tag.ty)));
    }
    let mut reader = ElementReader::new(options);
    reader
        .read_root(&mut src, tag, true)?
        .map(|e| e.value)
        .ok_or_else(|| MatError::Internal("subsystem entry was filtered".into()))
}

struct MatrixHeader {
    flags: ArrayFlags,
    dims: Vec<usize>,
    name: String,
}

/// Recursive element decoder.
pub struct ElementReader<'o> {
    options: &'o ReadOptions,
    registry: ReferenceRegistry,
}

impl<'o> ElementReader<'o> {
    /// Creates a reader with an empty reference registry.
    pub fn new(options: &'o ReadOptions) -> Self {
        Self { options, registry: ReferenceRegistry::new() }
    }

    /// References recorded so far.
    pub fn into_registry(self) -> ReferenceRegistry {
        self.registry
    }

    /// Decodes a root element whose tag has already been read. Returns `None`
    /// when the filter rejects the entry.
    pub fn read_root(
        &mut self,
        src: &mut dyn ByteSource,
        tag: Tag,
        bypass_filter: bool,
    ) -> Result<Option<Entry>> {
        match tag.ty {
            MatType::Matrix => self.read_root_matrix(src, tag, bypass_filter),
            MatType::Compressed => {
                let position = src.position();
                let mut child = src.inflate(u64::from(tag.num_bytes))?;
                let inner = Tag::read(&mut *child)?;
                if inner.ty != MatType::Matrix {
                    return Err(MatError::format(format!(
                        "compressed entry at {position} holds a {} element",
                        inner.ty
                    )));
                }
                let entry = self.read_root_matrix(&mut *child, inner, bypass_filter)?;
                child.finish()?;
                Ok(entry)
            }
            other => Err(MatError::format(format!("{other} is not a root element type"))),
        }
    }

    fn read_root_matrix(
        &mut self,
        src: &mut dyn ByteSource,
        tag: Tag,
        bypass_filter: bool,
    ) -> Result<Option<Entry>> {
        let start = src.position();
        if tag.num_bytes == 0 {
            return Ok(Some(Entry { name: String::new(), global: false, value: Array::empty() }));
        }
        let header = self.read_matrix_header(src)?;
        if !bypass_filter
            && !header.name.is_empty()
            && let Some(filter) = &self.options.filter
        {
            let preview = EntryHeader {
                name: header.name.clone(),
                class: header.flags.class,
                dims: header.dims.clone(),
                global: header.flags.global,
                logical: header.flags.logical,
                complex: header.flags.complex,
            };
            if !filter(&preview) {
                let consumed = src.position() - start;
                let rest = u64::from(tag.num_bytes).checked_sub(consumed).ok_or_else(|| {
                    MatError::format(format!("entry '{}' header overruns its element", header.name))
                })?;
                log::trace!("filter skipped '{}' ({rest} bytes)", header.name);
                src.skip(rest)?;
                return Ok(None);
            }
        }
        let name = header.name.clone();
        let global = header.flags.global;
        let value = self.read_body(src, header)?;
        check_consumed(src, start, tag)?;
        Ok(Some(Entry { name, global, value }))
    }

    /// Reads only the flags, dimensions and name opening a `Matrix` payload.
    pub(crate) fn peek_header(&mut self, src: &mut dyn ByteSource) -> Result<EntryHeader> {
        let header = self.read_matrix_header(src)?;
        Ok(EntryHeader {
            name: header.name,
            class: header.flags.class,
            dims: header.dims,
            global: header.flags.global,
            logical: header.flags.logical,
            complex: header.flags.complex,
        })
    }

    fn read_nested(&mut self, src: &mut dyn ByteSource) -> Result<Array> {
        let tag = Tag::read(src)?;
        if tag.ty != MatType::Matrix {
            return Err(MatError::format(format!(
                "nested element at {} is {}, expected Matrix",
                src.position(),
                tag.ty
            )));
        }
        if tag.num_bytes == 0 {
            return Ok(Array::empty());
        }
        let start = src.position();
        let header = self.read_matrix_header(src)?;
        let value = self.read_body(src, header)?;
        check_consumed(src, start, tag)?;
        Ok(value)
    }

    fn read_matrix_header(&mut self, src: &mut dyn ByteSource) -> Result<MatrixHeader> {
        let tag = expect_tag(src, &[MatType::UInt32], "array flags")?;
        if tag.num_bytes != ArrayFlags::SIZE {
            return Err(MatError::format(format!("array flags of {} bytes", tag.num_bytes)));
        }
        let word = src.read_u32()?;
        let nz_max = src.read_u32()?;
        let flags = ArrayFlags::from_words(word, nz_max)?;

        let dims = if flags.class == ArrayClass::Opaque {
            vec![1, 1]
        } else {
            let position = src.position();
            let tag = expect_tag(src, &[MatType::Int32], "dimensions")?;
            let dims = read_words(src, tag, "dimensions")?
                .into_iter()
                .map(|d| {
                    let d = d as i32;
                    usize::try_from(d).map_err(|_| {
                        MatError::format(format!("negative dimension {d} at {position}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if dims.len() < 2 {
                return Err(MatError::format(format!("array with {} dimensions", dims.len())));
            }
            dims
        };
        let name = read_string(src, "array name")?;
        Ok(MatrixHeader { flags, dims, name })
    }

    fn read_body(&mut self, src: &mut dyn ByteSource, header: MatrixHeader) -> Result<Array> {
        let MatrixHeader { flags, dims, .. } = header;
        let count = element_count(&dims)?;
        let value = match flags.class {
            ArrayClass::Cell => {
                src.ensure_available(count.saturating_mul(8) as u64)?;
                let cells = (0..count).map(|_| self.read_nested(src)).collect::<Result<_>>()?;
                Array::Cell(CellArray::new(dims, cells)?)
            }
            ArrayClass::Struct => Array::Struct(self.read_struct_fields(src, dims)?),
            ArrayClass::Object => {
                let class_name = read_string(src, "object class name")?;
                let fields = self.read_struct_fields(src, dims)?;
                Array::Object(ObjectArray { class_name, fields })
            }
            ArrayClass::Char => {
                let tag = Tag::read(src)?;
                let bytes = src.read_vec(tag.num_bytes as usize)?;
                skip_padding(src, tag)?;
                let chars = charset::decode(tag.ty, &bytes, src.order())?;
                let mut array = CharArray::new(dims, chars)?;
                if tag.ty.is_text() {
                    array.encoding = tag.ty;
                }
                Array::Char(array)
            }
            ArrayClass::Sparse => Array::Sparse(self.read_sparse(src, flags, dims)?),
            ArrayClass::Function => match self.read_nested(src)? {
                Array::Struct(content) => Array::FunctionHandle(FunctionHandle { global: false, content }),
                other => {
                    return Err(MatError::format(format!(
                        "function handle wraps a {:?} array, expected Struct",
                        other.class()
                    )));
                }
            },
            ArrayClass::Opaque => Array::Opaque(self.read_opaque(src)?),
            numeric => {
                let real = self.read_numbers(src, count, "real part")?;
                let imaginary = if flags.complex {
                    Some(self.read_numbers(src, count, "imaginary part")?)
                } else {
                    None
                };
                Array::Numeric(NumericArray {
                    class: numeric,
                    dims,
                    global: false,
                    logical: flags.logical,
                    real,
                    imaginary,
                })
            }
        };
        let mut value = value;
        value.set_global(flags.global);
        Ok(value)
    }

    fn read_store(&mut self, src: &mut dyn ByteSource, what: &str) -> Result<NumberStore> {
        let tag = Tag::read(src)?;
        if !tag.ty.is_numeric() {
            return Err(MatError::format(format!("{what} stored as {}", tag.ty)));
        }
        let store = NumberStore::read(src, tag.ty, tag.num_bytes, self.options.allocator())?;
        skip_padding(src, tag)?;
        Ok(store)
    }

    fn read_numbers(&mut self, src: &mut dyn ByteSource, count: usize, what: &str) -> Result<NumberStore> {
        let store = self.read_store(src, what)?;
        if store.len() != count {
            return Err(MatError::format(format!(
                "{what} holds {} values, dimensions need {count}",
                store.len()
            )));
        }
        Ok(store)
    }

    fn read_struct_fields(&mut self, src: &mut dyn ByteSource, dims: Vec<usize>) -> Result<StructArray> {
        let tag = expect_tag(src, &[MatType::Int32], "field name length")?;
        if tag.num_bytes != 4 {
            return Err(MatError::format(format!("field name length of {} bytes", tag.num_bytes)));
        }
        let width = src.read_u32()? as usize;
        skip_padding(src, tag)?;

        let tag = expect_tag(src, &[MatType::Int8, MatType::UInt8], "field names")?;
        let raw = src.read_vec(tag.num_bytes as usize)?;
        skip_padding(src, tag)?;
        let field_names: Vec<String> = if width == 0 {
            Vec::new()
        } else {
            if raw.len() % width != 0 {
                return Err(MatError::format(format!(
                    "{} bytes of field names are not a multiple of {width}",
                    raw.len()
                )));
            }
            raw.chunks(width)
                .map(|chunk| {
                    let end = chunk.iter().position(|b| *b == 0).unwrap_or(chunk.len());
                    String::from_utf8_lossy(&chunk[..end]).into_owned()
                })
                .collect()
        };

        let total = element_count(&dims)?.checked_mul(field_names.len()).ok_or_else(|| {
            MatError::format(format!("struct {dims:?} with {} fields is too large", field_names.len()))
        })?;
        src.ensure_available(total.saturating_mul(8) as u64)?;
        let values = (0..total).map(|_| self.read_nested(src)).collect::<Result<_>>()?;
        StructArray::from_values(dims, field_names, values)
    }

    fn read_sparse(&mut self, src: &mut dyn ByteSource, flags: ArrayFlags, dims: Vec<usize>) -> Result<SparseArray> {
        if dims.len() != 2 {
            return Err(MatError::format(format!("sparse matrix with dims {dims:?}")));
        }
        let row_indices = read_i32_vec(src, "sparse row indices")?;
        let col_indices = read_i32_vec(src, "sparse column indices")?;
        let real = self.read_store(src, "sparse values")?;
        let imaginary =
            if flags.complex { Some(self.read_store(src, "sparse imaginary values")?) } else { None };
        let matrix = SparseMatrix::from_parts(
            dims[0],
            dims[1],
            flags.nz_max as usize,
            row_indices,
            col_indices,
            real,
            imaginary,
        )?;
        Ok(SparseArray { dims, global: false, logical: flags.logical, matrix })
    }

    fn read_opaque(&mut self, src: &mut dyn ByteSource) -> Result<OpaqueArray> {
        let object_type = read_string(src, "opaque object type")?;
        let class_name = read_string(src, "opaque class name")?;
        let inner = self.read_nested(src)?;
        let content = match (object_type.as_str(), inner) {
            (MCOS_TYPE, inner) if class_name == FILE_WRAPPER_CLASS => {
                OpaqueContent::FileWrapper(Box::new(inner))
            }
            (MCOS_TYPE, Array::Numeric(words)) if words.real.physical_type() == MatType::UInt32 => {
                let payload: Vec<u32> =
                    words.real.to_i64_vec().into_iter().map(|w| w as u32).collect();
                let reference = McosReference::from_payload(&payload)?;
                self.registry.register(&reference);
                OpaqueContent::Reference(reference)
            }
            (MCOS_TYPE, other) => {
                return Err(MatError::format(format!(
                    "object reference '{class_name}' carries a {:?} payload, expected UInt32 words",
                    other.class()
                )));
            }
            (JAVA_TYPE, Array::Numeric(bytes)) => OpaqueContent::Java(bytes),
            (_, inner) => OpaqueContent::Generic(Box::new(inner)),
        };
        Ok(OpaqueArray { global: false, object_type, class_name, content })
    }
}

fn expect_tag(src: &mut dyn ByteSource, allowed: &[MatType], what: &str) -> Result<Tag> {
    let position = src.position();
    let tag = Tag::read(src)?;
    if allowed.contains(&tag.ty) {
        Ok(tag)
    } else {
        Err(MatError::format(format!("{what} at {position} stored as {}", tag.ty)))
    }
}

fn skip_padding(src: &mut dyn ByteSource, tag: Tag) -> Result<()> {
    let pad = tag.padding();
    if pad > 0 {
        src.skip(pad as u64)?;
    }
    Ok(())
}

fn read_string(src: &mut dyn ByteSource, what: &str) -> Result<String> {
    let tag = expect_tag(src, &[MatType::Int8, MatType::UInt8, MatType::Utf8], what)?;
    let bytes = src.read_vec(tag.num_bytes as usize)?;
    skip_padding(src, tag)?;
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn read_i32_vec(src: &mut dyn ByteSource, what: &str) -> Result<Vec<i32>> {
    let tag = expect_tag(src, &[MatType::Int32, MatType::UInt32], what)?;
    Ok(read_words(src, tag, what)?.into_iter().map(|w| w as i32).collect())
}

/// Reads the 4-byte words of the element whose tag was just read.
fn read_words(src: &mut dyn ByteSource, tag: Tag, what: &str) -> Result<Vec<u32>> {
    if tag.num_bytes % 4 != 0 {
        return Err(MatError::format(format!("{what} of {} bytes is not whole words", tag.num_bytes)));
    }
    let bytes = src.read_vec(tag.num_bytes as usize)?;
    skip_padding(src, tag)?;
    let order = src.order();
    Ok(bytes.chunks_exact(4).map(|w| order.u32_from([w[0], w[1], w[2], w[3]])).collect())
}

fn check_consumed(src: &dyn ByteSource, start: u64, tag: Tag) -> Result<()> {
    let consumed = src.position() - start;
    if consumed != u64::from(tag.num_bytes) {
        return Err(MatError::format(format!(
            "element at {} declares {} bytes but {consumed} were consumed",
            start.saturating_sub(tag.header_size() as u64),
            tag.num_bytes
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ByteOrder;

    fn tag(out: &mut Vec<u8>, ty: MatType, len: u32) {
        Tag::new(ty, len).write(out, ByteOrder::Little).unwrap();
    }

    /// Hand-assembles `x = [1 2 3]` stored as UInt8 under a Double class.
    fn tiny_matrix(name: &str) -> Vec<u8> {
        let mut body = Vec::new();
        tag(&mut body, MatType::UInt32, 8);
        body.extend_from_slice(&u32::from(ArrayClass::Double.id()).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        tag(&mut body, MatType::Int32, 8);
        body.extend_from_slice(&1i32.to_le_bytes());
        body.extend_from_slice(&3i32.to_le_bytes());
        tag(&mut body, MatType::Int8, name.len() as u32);
        body.extend_from_slice(name.as_bytes());
        body.resize(body.len().div_ceil(8) * 8, 0);
        tag(&mut body, MatType::UInt8, 3);
        body.extend_from_slice(&[1, 2, 3, 0]);
        let mut out = Vec::new();
        Tag::unpacked(MatType::Matrix, body.len() as u32).write(&mut out, ByteOrder::Little).unwrap();
        out.extend(body);
        out
    }

    fn file(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = FileHeader::full(ByteOrder::Little).to_bytes();
        entries.iter().for_each(|e| bytes.extend_from_slice(e));
        bytes
    }

    fn sub(out: &mut Vec<u8>, ty: MatType, payload: &[u8]) {
        let t = Tag::new(ty, payload.len() as u32);
        t.write(out, ByteOrder::Little).unwrap();
        out.extend_from_slice(payload);
        out.resize(out.len() + t.padding(), 0);
    }

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// A `Matrix` element; opaque classes pass `None` for the dimensions.
    fn matrix(class: ArrayClass, nz_max: u32, dims: Option<&[u32]>, name: &str, body: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        sub(&mut payload, MatType::UInt32, &words(&[u32::from(class.id()), nz_max]));
        if let Some(dims) = dims {
            sub(&mut payload, MatType::Int32, &words(dims));
        }
        sub(&mut payload, MatType::Int8, name.as_bytes());
        payload.extend_from_slice(body);
        let mut out = Vec::new();
        Tag::unpacked(MatType::Matrix, payload.len() as u32).write(&mut out, ByteOrder::Little).unwrap();
        out.extend(payload);
        out
    }

    fn mcos_opaque(name: &str, inner: Vec<u8>) -> Vec<u8> {
        let mut body = Vec::new();
        sub(&mut body, MatType::Int8, MCOS_TYPE.as_bytes());
        sub(&mut body, MatType::Int8, b"Point");
        body.extend(inner);
        matrix(ArrayClass::Opaque, 0, None, name, &body)
    }

    fn read(bytes: Vec<u8>, options: &ReadOptions) -> Result<MatFile> {
        read_file(&mut SliceSource::from_vec(bytes, ByteOrder::Little), options)
    }

    #[test]
    fn decodes_narrow_physical_storage() {
        let bytes = file(&[tiny_matrix("x")]);
        let mut src = SliceSource::from_vec(bytes, ByteOrder::Little);
        let mat = read_file(&mut src, &ReadOptions::new()).unwrap();
        let x = mat.get("x").and_then(Array::as_numeric).unwrap();
        assert_eq!(x.class, ArrayClass::Double);
        assert_eq!(x.real.physical_type(), MatType::UInt8);
        assert_eq!(x.real.to_f64_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(x.dims, vec![1, 3]);
    }

    #[test]
    fn length_mismatch_is_a_format_error() {
        let mut entry = tiny_matrix("x");
        // Claim 8 more bytes than the body holds, then supply them as junk.
        let len = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]) + 8;
        entry[4..8].copy_from_slice(&len.to_le_bytes());
        entry.extend_from_slice(&[0; 8]);
        let mut src = SliceSource::from_vec(file(&[entry]), ByteOrder::Little);
        assert!(matches!(read_file(&mut src, &ReadOptions::new()), Err(MatError::Format(_))));
    }

    #[test]
    fn non_container_roots_are_rejected() {
        let mut entry = Vec::new();
        tag(&mut entry, MatType::Double, 8);
        entry.extend_from_slice(&1.0f64.to_le_bytes());
        let mut src = SliceSource::from_vec(file(&[entry]), ByteOrder::Little);
        assert!(matches!(read_file(&mut src, &ReadOptions::new()), Err(MatError::Format(_))));
    }

    #[test]
    fn filter_skips_rejected_entries() {
        let bytes = file(&[tiny_matrix("keep"), tiny_matrix("drop"), tiny_matrix("also")]);
        let filter: EntryFilter = Arc::new(|h: &EntryHeader| h.name != "drop");
        let options = ReadOptions::new().with_filter(filter);
        let mut src = SliceSource::from_vec(bytes, ByteOrder::Little);
        let mat = read_file(&mut src, &options).unwrap();
        let names: Vec<_> = mat.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["keep", "also"]);
    }

    #[test]
    fn overflowing_dimensions_are_format_errors() {
        let entry = matrix(ArrayClass::Double, 0, Some(&[65_536; 4]), "big", &[]);
        assert!(matches!(read(file(&[entry]), &ReadOptions::new()), Err(MatError::Format(_))));
    }

    #[test]
    fn declared_lengths_are_checked_against_the_input() {
        let mut body = Vec::new();
        Tag::unpacked(MatType::Double, 0xFFFF_FFF8).write(&mut body, ByteOrder::Little).unwrap();
        body.extend_from_slice(&[0; 16]);
        let bytes = file(&[matrix(ArrayClass::Double, 0, Some(&[1, 1]), "x", &body)]);

        let pool = Arc::new(crate::allocator::PooledAllocator::new(1 << 20));
        let options = ReadOptions::new().with_allocator(pool.clone());
        assert!(read(bytes.clone(), &options).unwrap_err().is_eof());
        let mut stream = crate::io::ReadSource::new(std::io::Cursor::new(bytes), ByteOrder::Little);
        assert!(read_file(&mut stream, &options).unwrap_err().is_eof());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn sparse_nz_max_of_one_without_rows_decodes_empty() {
        let mut body = Vec::new();
        sub(&mut body, MatType::Int32, &[]);
        sub(&mut body, MatType::Int32, &words(&[0, 0, 0]));
        sub(&mut body, MatType::Double, &[]);
        let entry = matrix(ArrayClass::Sparse, 1, Some(&[5, 2]), "sp", &body);
        let mat = read(file(&[entry]), &ReadOptions::new()).unwrap();
        let Some(Array::Sparse(sparse)) = mat.get("sp") else {
            panic!("expected a sparse entry");
        };
        assert_eq!(sparse.matrix.nnz(), 0);
        assert_eq!(sparse.matrix.nz_max(), 1);
        assert_eq!(sparse.matrix.get(4, 1).unwrap(), 0.0);
        let mut visited = 0;
        sparse.matrix.for_each(|_, _, _, _| visited += 1).unwrap();
        assert_eq!(visited, 0);
    }

    #[test]
    fn malformed_object_references_are_format_errors() {
        let mut bad_magic = Vec::new();
        sub(&mut bad_magic, MatType::UInt32, &words(&[0x1234, 2, 1, 1, 1, 1]));
        let bad_magic = matrix(ArrayClass::UInt32, 0, Some(&[6, 1]), "", &bad_magic);

        let mut doubles = Vec::new();
        sub(&mut doubles, MatType::Double, &1.0f64.to_le_bytes());
        let doubles = matrix(ArrayClass::Double, 0, Some(&[1, 1]), "", &doubles);

        for inner in [bad_magic, doubles] {
            let bytes = file(&[mcos_opaque("obj", inner)]);
            assert!(matches!(read(bytes, &ReadOptions::new()), Err(MatError::Format(_))));
        }
    }

    #[test]
    fn reduced_headers_take_the_second_entry_as_subsystem() {
        let mut bytes = FileHeader::reduced(ByteOrder::Little).to_bytes();
        for name in ["a", "blob", "c"] {
            bytes.extend(tiny_matrix(name));
        }
        let only_c: EntryFilter = Arc::new(|h: &EntryHeader| h.name == "c");
        let options = ReadOptions::new().with_reduced_header(true).with_filter(only_c);
        let mat = read(bytes, &options).unwrap();
        assert_eq!(mat.names().collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(mat.subsystem().map(Subsystem::bytes), Some(&[1u8, 2, 3][..]));

        let mut text = Vec::new();
        sub(&mut text, MatType::UInt16, &[b'h', 0, b'i', 0]);
        let mut bytes = FileHeader::reduced(ByteOrder::Little).to_bytes();
        bytes.extend(tiny_matrix("a"));
        bytes.extend(matrix(ArrayClass::Char, 0, Some(&[1, 2]), "t", &text));
        let options = ReadOptions::new().with_reduced_header(true);
        assert!(matches!(read(bytes, &options), Err(MatError::Format(_))));
    }

    #[test]
    fn truncated_input_is_an_io_error() {
        let mut bytes = file(&[tiny_matrix("x")]);
        bytes.truncate(bytes.len() - 5);
        let mut src = SliceSource::from_vec(bytes, ByteOrder::Little);
        assert!(read_file(&mut src, &ReadOptions::new()).unwrap_err().is_eof());
    }
}
