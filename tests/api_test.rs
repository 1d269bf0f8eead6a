#![allow(missing_docs)]

use std::sync::Arc;

use mat5::{
    Array, ByteOrder, CharArray, Compression, Mat5, Mat5Inspector, MatError, MatFile, NumericArray,
    PooledAllocator, Result, default_allocator,
};

fn sample() -> Result<MatFile> {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    let values: Vec<f64> = (0..10_000).map(|i| f64::from(i) * 0.25).collect();
    file.insert("signal", Array::Numeric(NumericArray::from_f64(vec![10_000, 1], &values, &alloc)?));
    file.insert("label", Array::Char(CharArray::from_text("run 7")));
    file.insert("scratch", Array::Numeric(NumericArray::scalar(-1.0, &alloc)?));
    Ok(file)
}

// --- TESTS ---

/// Standard file IO through the memory-mapped source.
#[test]
fn test_standard_file_io() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("std_io.mat");
    let file = sample()?;

    Mat5::save(&path, &file)?;
    let loaded = Mat5::open(&path)?;

    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.get("signal"), file.get("signal"));
    assert_eq!(loaded.get("label"), file.get("label"));
    Ok(())
}

/// Compressed, pooled, big-endian file IO.
#[test]
fn test_configured_file_io() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("configured.mat");
    let file = sample()?;
    let config = Mat5::builder()
        .threads(4)
        .compression(Compression::Deflate(6))
        .byte_order(ByteOrder::Big)
        .description("MATLAB 5.0 MAT-file, written by the api tests");

    config.save(&path, &file)?;
    let loaded = config.open(&path)?;

    assert_eq!(loaded.header().order, ByteOrder::Big);
    assert_eq!(loaded.iter().collect::<Vec<_>>(), file.iter().collect::<Vec<_>>());
    let raw_len = std::fs::metadata(&path)?.len();
    assert!(raw_len < 10_000 * 8, "deflate should shrink the signal, got {raw_len} bytes");
    Ok(())
}

/// Forward-only streams are decoded on the calling thread even with a pool.
#[test]
fn test_stream_source() -> Result<()> {
    let bytes = Mat5::builder().compression(Compression::deflate()).to_bytes(&sample()?)?;
    let from_stream = Mat5::builder().threads(4).read_from(std::io::Cursor::new(bytes.clone()))?;
    let from_bytes = Mat5::read_bytes(bytes)?;
    assert_eq!(from_stream.iter().collect::<Vec<_>>(), from_bytes.iter().collect::<Vec<_>>());
    Ok(())
}

/// Filtered entries are skipped, compressed or not.
#[test]
fn test_entry_filter() -> Result<()> {
    for compression in [Compression::None, Compression::deflate()] {
        let bytes = Mat5::builder().compression(compression).to_bytes(&sample()?)?;
        let loaded = Mat5::builder().filter(|h| h.name != "scratch").read_bytes(bytes.clone())?;
        assert_eq!(loaded.names().collect::<Vec<_>>(), ["signal", "label"]);

        let only_vectors = Mat5::builder().filter(|h| h.dims.iter().product::<usize>() > 1).read_bytes(bytes)?;
        assert_eq!(only_vectors.names().collect::<Vec<_>>(), ["signal", "label"]);
    }
    Ok(())
}

/// Reduced headers on both sides.
#[test]
fn test_reduced_header() -> Result<()> {
    let config = Mat5::builder().reduced_header();
    let bytes = config.to_bytes(&sample()?)?;
    assert_eq!(&bytes[2..4], match ByteOrder::native() {
        ByteOrder::Little => b"IM",
        ByteOrder::Big => b"MI",
    });
    let loaded = config.read_bytes(bytes.clone())?;
    assert!(loaded.header().is_reduced());
    assert_eq!(loaded.len(), 3);
    assert!(matches!(Mat5::read_bytes(bytes), Err(MatError::Io(_) | MatError::Format(_))));
    Ok(())
}

/// A pooled allocator gets every buffer back once the file is dropped.
#[test]
fn test_pooled_allocator() -> Result<()> {
    let pool = Arc::new(PooledAllocator::new(1 << 20));
    let bytes = Mat5::to_bytes(&sample()?)?;
    let loaded = Mat5::builder().allocator(pool.clone()).read_bytes(bytes)?;
    assert!(pool.outstanding() > 0);
    drop(loaded);
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}

/// A damaged entry fails a pooled read as a whole and leaks no buffers.
#[test]
fn test_pooled_read_of_a_damaged_entry() -> Result<()> {
    let alloc = default_allocator();
    let mut file = sample()?;
    for i in 0..6 {
        let values: Vec<f64> = (0..2_000).map(|v| f64::from(v * (i + 1)) + 0.5).collect();
        let block = NumericArray::from_f64(vec![2_000, 1], &values, &alloc)?;
        file.insert(format!("block{i}"), Array::Numeric(block));
    }
    let mut bytes = Mat5::builder().threads(4).compression(Compression::deflate()).to_bytes(&file)?;

    let report = Mat5Inspector::inspect_bytes(bytes.clone(), false)?;
    let damaged = &report.entries[4];
    assert!(damaged.compressed);
    // Keep the zlib header, then fill the stream with reserved block types.
    let start = damaged.offset as usize + 8 + 2;
    let end = damaged.offset as usize + 8 + damaged.stored_length as usize;
    bytes[start..end].fill(0xFF);

    let pool = Arc::new(PooledAllocator::new(1 << 20));
    let config = Mat5::builder().threads(8).allocator(pool.clone());
    let err = config.read_bytes(bytes.clone()).unwrap_err();
    assert!(
        matches!(err, MatError::Compression(_) | MatError::Format(_) | MatError::Io(_)),
        "unexpected error {err}"
    );
    assert_eq!(pool.outstanding(), 0);

    assert!(Mat5::builder().allocator(pool.clone()).read_bytes(bytes).is_err());
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}

/// The inspector sees the on-disk layout.
#[test]
fn test_inspector_report() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("inspect.mat");
    Mat5::builder().compression(Compression::deflate()).save(&path, &sample()?)?;

    let report = Mat5Inspector::inspect(&path)?;
    assert_eq!(report.file_size, std::fs::metadata(&path)?.len());
    assert_eq!(report.entries.len(), 3);
    assert!(report.entries.iter().all(|e| e.compressed));
    assert_eq!(report.entries[0].offset, 128);
    assert_eq!(report.entries[1].name, "label");
    assert!(report.subsystem_offset.is_none());
    println!("{report}");
    Ok(())
}

/// Opening a missing file is an I/O error.
#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Mat5::open(dir.path().join("absent.mat")).unwrap_err();
    assert!(matches!(err, MatError::Io(_)));
}
