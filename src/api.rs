use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use rayon::ThreadPool;

use crate::allocator::{BufferAllocator, default_allocator};
use crate::compression::Compression;
use crate::error::Result;
use crate::executor::build_pool;
use crate::file::MatFile;
use crate::format::ByteOrder;
use crate::io::{ByteSink, ReadSource, SeekSink, SharedBytes, SliceSource};
use crate::reader::{EntryFilter, EntryHeader, ReadOptions, read_file};
use crate::writer::{MatWriter, WriteOptions};

/// The main entry point for reading and writing MAT5 files.
///
/// The associated functions use default settings: sequential, uncompressed,
/// native byte order. [`Mat5::builder`] configures everything else.
#[derive(Debug)]
pub struct Mat5;

impl Mat5 {
    /// Starts a configuration.
    pub fn builder() -> Mat5Builder {
        Mat5Builder::default()
    }

    /// Reads a file, memory-mapping it when the `mmap` feature is enabled.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MatFile> {
        Self::builder().open(path)
    }

    /// Decodes an in-memory file.
    pub fn read_bytes(bytes: Vec<u8>) -> Result<MatFile> {
        Self::builder().read_bytes(bytes)
    }

    /// Decodes a file from a forward-only stream.
    pub fn read_from<R: Read>(reader: R) -> Result<MatFile> {
        Self::builder().read_from(reader)
    }

    /// Writes `file` to `path`.
    pub fn save<P: AsRef<Path>>(path: P, file: &MatFile) -> Result<()> {
        Self::builder().save(path, file)
    }

    /// Encodes `file` into a byte vector.
    pub fn to_bytes(file: &MatFile) -> Result<Vec<u8>> {
        Self::builder().to_bytes(file)
    }
}

/// Read and write configuration.
///
/// ```rust
/// use mat5::{ByteOrder, Compression, Mat5};
///
/// let config = Mat5::builder()
///     .threads(4)
///     .compression(Compression::Deflate(6))
///     .byte_order(ByteOrder::Big)
///     .filter(|h| h.name != "scratch");
/// # let _ = config;
/// ```
#[derive(Clone, Default)]
pub struct Mat5Builder {
    threads: usize,
    pool: Option<Arc<ThreadPool>>,
    compression: Compression,
    order: Option<ByteOrder>,
    filter: Option<EntryFilter>,
    allocator: Option<Arc<dyn BufferAllocator>>,
    reduced_header: bool,
    description: Option<String>,
}

impl Mat5Builder {
    /// Uses a dedicated pool of `n` workers. `0` means sequential.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    /// Uses an existing pool. Takes precedence over [`threads`](Self::threads).
    pub fn pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Compression applied to every written entry.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Byte order of written files.
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Decodes only root entries accepted by `filter`.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&EntryHeader) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Allocates number buffers from `allocator`.
    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Reads and writes the 8-byte reduced header.
    pub fn reduced_header(mut self) -> Self {
        self.reduced_header = true;
        self
    }

    /// Header text of written files.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    fn resolve_pool(&self) -> Result<Option<Arc<ThreadPool>>> {
        match (&self.pool, self.threads) {
            (Some(pool), _) => Ok(Some(Arc::clone(pool))),
            (None, 0) => Ok(None),
            (None, n) => build_pool(n).map(Some),
        }
    }

    fn allocator_or_default(&self) -> Arc<dyn BufferAllocator> {
        self.allocator.clone().unwrap_or_else(default_allocator)
    }

    /// The equivalent [`ReadOptions`].
    pub fn read_options(&self) -> Result<ReadOptions> {
        let mut options = ReadOptions::new()
            .with_allocator(self.allocator_or_default())
            .with_reduced_header(self.reduced_header);
        if let Some(pool) = self.resolve_pool()? {
            options = options.with_pool(pool);
        }
        if let Some(filter) = &self.filter {
            options = options.with_filter(Arc::clone(filter));
        }
        Ok(options)
    }

    /// The equivalent [`WriteOptions`].
    pub fn write_options(&self) -> Result<WriteOptions> {
        let mut options = WriteOptions::new()
            .with_compression(self.compression)
            .with_order(self.order.unwrap_or_else(ByteOrder::native))
            .with_reduced_header(self.reduced_header)
            .with_allocator(self.allocator_or_default());
        if let Some(pool) = self.resolve_pool()? {
            options = options.with_pool(pool);
        }
        if let Some(text) = &self.description {
            options = options.with_description(text.clone());
        }
        Ok(options)
    }

    /// Reads a file, memory-mapping it when the `mmap` feature is enabled.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<MatFile> {
        let path = path.as_ref();
        log::debug!("opening {}", path.display());
        let bytes = map_file(path)?;
        let mut src = SliceSource::new(bytes, ByteOrder::native());
        read_file(&mut src, &self.read_options()?)
    }

    /// Decodes an in-memory file.
    pub fn read_bytes(&self, bytes: Vec<u8>) -> Result<MatFile> {
        let mut src = SliceSource::from_vec(bytes, ByteOrder::native());
        read_file(&mut src, &self.read_options()?)
    }

    /// Decodes a forward-only stream. Entries are always decoded on the
    /// calling thread.
    pub fn read_from<R: Read>(&self, reader: R) -> Result<MatFile> {
        let mut src = ReadSource::new(reader, ByteOrder::native());
        read_file(&mut src, &self.read_options()?)
    }

    /// Writes `file` to `path`, creating or truncating it.
    pub fn save<P: AsRef<Path>>(&self, path: P, file: &MatFile) -> Result<()> {
        let out = std::io::BufWriter::new(File::create(path)?);
        self.write_to(out, file)?;
        Ok(())
    }

    /// Encodes `file` into a byte vector.
    pub fn to_bytes(&self, file: &MatFile) -> Result<Vec<u8>> {
        Ok(self.write_to(std::io::Cursor::new(Vec::new()), file)?.into_inner())
    }

    /// Encodes `file` into a seekable writer and returns it.
    ///
    /// `file` is not copied. With a pool and compression enabled, each entry
    /// is cloned once so a worker can deflate it.
    pub fn write_to<W: Write + Seek>(&self, out: W, file: &MatFile) -> Result<W> {
        let writer = self.writer(out)?;
        Ok(write_file(writer, file)?.into_inner())
    }

    /// A streaming writer over `out` with this configuration.
    pub fn writer<W: Write + Seek>(&self, out: W) -> Result<MatWriter<SeekSink<W>>> {
        let options = self.write_options()?;
        let sink = SeekSink::new(out, options.order)?;
        MatWriter::new(sink, options)
    }
}

impl fmt::Debug for Mat5Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mat5Builder")
            .field("threads", &self.threads)
            .field("pool", &self.pool.is_some())
            .field("compression", &self.compression)
            .field("order", &self.order)
            .field("filter", &self.filter.is_some())
            .field("reduced_header", &self.reduced_header)
            .finish()
    }
}

/// Writes every entry of `file` and its subsystem, which lands second under
/// a reduced header and last otherwise. Entries are borrowed.
fn write_file<K: ByteSink>(mut writer: MatWriter<K>, file: &MatFile) -> Result<K> {
    let mut subsystem = file.subsystem().cloned();
    if writer.header().is_reduced()
        && let Some(subsystem) = subsystem.take()
    {
        writer.write_subsystem(subsystem)?;
    }
    for entry in file.iter() {
        writer.write_entry_ref(entry)?;
    }
    if let Some(subsystem) = subsystem {
        writer.write_subsystem(subsystem)?;
    }
    writer.finish()
}

#[cfg(feature = "mmap")]
fn map_file(path: &Path) -> Result<SharedBytes> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(SharedBytes::from_vec(Vec::new()));
    }
    // Safety: the map is read-only; concurrent truncation by another process
    // is outside what this library can guard against.
    #[allow(unsafe_code)]
    let map = unsafe { memmap2::Mmap::map(&file)? };
    Ok(SharedBytes::from_mmap(map))
}

#[cfg(not(feature = "mmap"))]
fn map_file(path: &Path) -> Result<SharedBytes> {
    Ok(SharedBytes::from_vec(std::fs::read(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Array, NumericArray};

    #[test]
    fn builder_options_reflect_settings() {
        let builder = Mat5::builder()
            .threads(2)
            .compression(Compression::deflate())
            .byte_order(ByteOrder::Big)
            .reduced_header()
            .description("MATLAB 5.0 MAT-file, test");
        let write = builder.write_options().unwrap();
        assert_eq!(write.order, ByteOrder::Big);
        assert!(write.reduced_header);
        assert!(write.pool.is_some());
        let read = builder.read_options().unwrap();
        assert!(read.reduced_header);
        assert!(read.filter.is_none());
    }

    #[test]
    fn bytes_round_trip_through_the_facade() {
        let alloc = default_allocator();
        let mut file = MatFile::new();
        file.insert("v", Array::Numeric(NumericArray::from_f64(vec![1, 2], &[0.5, 7.0], &alloc).unwrap()));
        let bytes = Mat5::to_bytes(&file).unwrap();
        let back = Mat5::read_bytes(bytes.clone()).unwrap();
        assert_eq!(back.get("v"), file.get("v"));
        let streamed = Mat5::read_from(bytes.as_slice()).unwrap();
        assert_eq!(streamed.len(), 1);
    }

    #[test]
    fn saving_borrows_the_file() {
        let alloc = default_allocator();
        let mut file = MatFile::new();
        file.insert("v", Array::Numeric(NumericArray::from_f64(vec![1, 3], &[0.25, 1e9, -3.0], &alloc).unwrap()));
        let before = file.clone();
        let swapped = ByteOrder::native().swapped();
        for threads in [0, 4] {
            let config = Mat5::builder().threads(threads).byte_order(swapped).compression(Compression::deflate());
            let bytes = config.to_bytes(&file).unwrap();
            assert!(file.iter().eq(before.iter()));
            assert_eq!(Mat5::read_bytes(bytes).unwrap().get("v"), before.get("v"));
        }
    }
}
