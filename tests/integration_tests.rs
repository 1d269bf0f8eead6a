#![allow(missing_docs)]

use mat5::{
    Array, ArrayClass, ByteOrder, CellArray, CharArray, Compression, Entry, FunctionHandle, Mat5,
    MatError, MatFile, MatType, NumberStore, NumericArray, ObjectArray, OpaqueArray, OpaqueContent,
    Result, SparseArray, SparseBuilder, StructArray, default_allocator,
};

// --- FIXTURES ---

fn every_kind() -> Result<MatFile> {
    let alloc = default_allocator();
    let mut file = MatFile::new();

    file.insert("scalar", Array::Numeric(NumericArray::scalar(std::f64::consts::PI, &alloc)?));
    file.insert(
        "ints",
        Array::Numeric(NumericArray::new(
            ArrayClass::Int16,
            vec![2, 3],
            NumberStore::from_i64(MatType::Int16, &[-3, -2, -1, 0, 1, 30_000], &alloc)?,
        )?),
    );
    file.insert(
        "cplx",
        Array::Numeric(
            NumericArray::from_f64(vec![1, 2], &[1.5, -2.5], &alloc)?
                .with_imaginary(NumberStore::from_f64(MatType::Double, &[0.5, 4.0], &alloc)?)?,
        ),
    );
    file.insert("mask", Array::Numeric(NumericArray::logical(vec![1, 3], &[true, false, true], &alloc)?));
    file.insert("text", Array::Char(CharArray::from_text("héllo, wörld")));
    file.insert(
        "page",
        Array::Char(CharArray::new(vec![2, 2], "abcd".encode_utf16().collect())?),
    );

    let mut builder = SparseBuilder::new(4, 3);
    builder.insert(0, 0, 1.0)?.insert(3, 0, 2.0)?.insert(2, 2, -7.25)?;
    file.insert("sp", Array::Sparse(SparseArray::new(builder.build(MatType::Double, &alloc)?)));

    let mut s = StructArray::new(vec![1, 2], vec!["a".into(), "longer_name".into()]);
    s.set_field(0, "a", Array::Numeric(NumericArray::scalar(1.0, &alloc)?))?;
    s.set_field(1, "longer_name", Array::Char(CharArray::from_text("x")))?;
    file.insert("st", Array::Struct(s.clone()));

    file.insert(
        "cells",
        Array::Cell(CellArray::new(
            vec![2, 1],
            vec![Array::Struct(s.clone()), Array::Cell(CellArray::new(vec![0, 0], Vec::new())?)],
        )?),
    );
    file.insert(
        "obj",
        Array::Object(ObjectArray { class_name: "inventory".into(), fields: s.clone() }),
    );

    let mut handle = StructArray::new(vec![1, 1], Vec::new());
    handle.set_field(0, "function", Array::Char(CharArray::from_text("sin")))?;
    file.insert("fh", Array::FunctionHandle(FunctionHandle { global: false, content: handle }));

    let blob = NumberStore::from_i64(MatType::UInt8, &[0xAC, 0xED, 0, 5], &alloc)?;
    file.insert(
        "jobj",
        Array::Opaque(OpaqueArray {
            global: false,
            object_type: "java".into(),
            class_name: "java.io.File".into(),
            content: OpaqueContent::Java(NumericArray::new(ArrayClass::UInt8, vec![4, 1], blob)?),
        }),
    );
    file.insert("nothing", Array::empty());
    Ok(file)
}

fn assert_same_entries(a: &MatFile, b: &MatFile) {
    let left: Vec<&Entry> = a.iter().collect();
    let right: Vec<&Entry> = b.iter().collect();
    assert_eq!(left, right);
}

// --- TESTS ---

#[test]
fn every_array_kind_survives_a_round_trip() -> Result<()> {
    let file = every_kind()?;
    let back = Mat5::read_bytes(Mat5::to_bytes(&file)?)?;
    assert_same_entries(&file, &back);

    let text = back.get("text").and_then(Array::as_char).map(CharArray::to_text);
    assert_eq!(text.as_deref(), Some("héllo, wörld"));
    let page = back.get("page").and_then(Array::as_char).unwrap();
    assert_eq!(page.row(1).as_deref(), Some("bd"));
    Ok(())
}

#[test]
fn compressed_and_swapped_outputs_decode_identically() -> Result<()> {
    let file = every_kind()?;
    for order in [ByteOrder::Little, ByteOrder::Big] {
        for compression in [Compression::None, Compression::Deflate(1), Compression::Deflate(9)] {
            let bytes = Mat5::builder().byte_order(order).compression(compression).to_bytes(&file)?;
            let back = Mat5::read_bytes(bytes)?;
            assert_eq!(back.header().order, order);
            assert_same_entries(&file, &back);
        }
    }
    Ok(())
}

#[test]
fn pooled_decoding_matches_sequential_decoding() -> Result<()> {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    for i in 0..24 {
        let values: Vec<f64> = (0..2_000).map(|v| f64::from(v * i) / 3.0).collect();
        file.insert(format!("v{i:02}"), Array::Numeric(NumericArray::from_f64(vec![2_000, 1], &values, &alloc)?));
    }
    let bytes = Mat5::builder().compression(Compression::deflate()).threads(8).to_bytes(&file)?;

    let sequential = Mat5::builder().threads(0).read_bytes(bytes.clone())?;
    let pooled = Mat5::builder().threads(8).read_bytes(bytes)?;
    assert_same_entries(&sequential, &pooled);
    assert_same_entries(&file, &pooled);
    let names: Vec<&str> = pooled.names().collect();
    let expected: Vec<String> = (0..24).map(|i| format!("v{i:02}")).collect();
    assert_eq!(names, expected);
    Ok(())
}

#[test]
fn pooled_writes_keep_submission_order_with_mixed_compression() -> Result<()> {
    let alloc = default_allocator();
    let mut writer = Mat5::builder()
        .threads(4)
        .compression(Compression::deflate())
        .writer(std::io::Cursor::new(Vec::new()))?;
    for i in 0..12u32 {
        let entry = Entry::new(format!("e{i}"), Array::Numeric(NumericArray::scalar(f64::from(i), &alloc)?));
        if i % 3 == 0 {
            writer.write_entry_with(entry, Compression::None)?;
        } else {
            writer.write_entry(entry)?;
        }
    }
    let bytes = writer.finish()?.into_inner().into_inner();
    let back = Mat5::read_bytes(bytes)?;
    for (i, entry) in back.iter().enumerate() {
        assert_eq!(entry.name, format!("e{i}"));
        assert_eq!(entry.value.as_numeric().unwrap().get_f64(0)?, i as f64);
    }
    Ok(())
}

#[test]
fn doubles_are_stored_in_the_narrowest_exact_type() -> Result<()> {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    file.insert("small", Array::Numeric(NumericArray::from_f64(vec![1, 3], &[1.0, 2.0, 255.0], &alloc)?));
    file.insert("neg", Array::Numeric(NumericArray::from_f64(vec![1, 2], &[-1.0, 1000.0], &alloc)?));
    file.insert("frac", Array::Numeric(NumericArray::from_f64(vec![1, 2], &[0.5, 1.0], &alloc)?));

    let back = Mat5::read_bytes(Mat5::to_bytes(&file)?)?;
    let physical = |name: &str| back.get(name).and_then(Array::as_numeric).map(|a| (a.class, a.real.physical_type()));
    assert_eq!(physical("small"), Some((ArrayClass::Double, MatType::UInt8)));
    assert_eq!(physical("neg"), Some((ArrayClass::Double, MatType::Int16)));
    assert_eq!(physical("frac"), Some((ArrayClass::Double, MatType::Double)));
    let small = back.get("small").and_then(Array::as_numeric).unwrap();
    assert_eq!(small.real.to_f64_vec(), vec![1.0, 2.0, 255.0]);
    Ok(())
}

#[test]
fn short_names_use_packed_tags() -> Result<()> {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    file.insert("a", Array::Numeric(NumericArray::scalar(1.0, &alloc)?));
    let bytes = Mat5::builder().byte_order(ByteOrder::Little).to_bytes(&file)?;

    // header, matrix tag, flags (8 + 8), dims (8 + 8)
    let name_at = 128 + 8 + 16 + 16;
    assert_eq!(&bytes[name_at..name_at + 8], &[1, 0, 1, 0, b'a', 0, 0, 0]);
    assert_eq!(bytes.len() % 8, 0);
    Ok(())
}

#[test]
fn sparse_defaults_apply_to_missing_entries() -> Result<()> {
    let alloc = default_allocator();
    let mut builder = SparseBuilder::new(3, 3);
    builder.insert(1, 1, 5.0)?;
    let mut file = MatFile::new();
    file.insert("s", Array::Sparse(SparseArray::new(builder.build(MatType::Double, &alloc)?)));

    let mut back = Mat5::read_bytes(Mat5::to_bytes(&file)?)?;
    let Some(Array::Sparse(sparse)) = back.get_mut("s") else {
        panic!("expected a sparse entry");
    };
    assert_eq!(sparse.matrix.get(1, 1)?, 5.0);
    assert_eq!(sparse.matrix.get(0, 2)?, 0.0);
    sparse.matrix.set_default_value(f64::NAN);
    assert!(sparse.matrix.get(0, 2)?.is_nan());
    assert_eq!(sparse.matrix.get(1, 1)?, 5.0);
    assert!(matches!(sparse.matrix.get(3, 0), Err(MatError::Range(_))));
    Ok(())
}

#[test]
fn global_flags_round_trip() -> Result<()> {
    let alloc = default_allocator();
    let mut value = Array::Numeric(NumericArray::scalar(2.0, &alloc)?);
    value.set_global(true);
    let mut file = MatFile::new();
    file.push(Entry::new("g", value));
    let back = Mat5::read_bytes(Mat5::to_bytes(&file)?)?;
    let entry = back.entry("g").unwrap();
    assert!(entry.global);
    assert!(entry.value.is_global());
    Ok(())
}

#[test]
fn truncated_files_fail_with_eof() -> Result<()> {
    let mut bytes = Mat5::to_bytes(&every_kind()?)?;
    bytes.truncate(bytes.len() - 20);
    let err = Mat5::read_bytes(bytes).unwrap_err();
    assert!(err.is_eof(), "unexpected error {err}");
    Ok(())
}

#[test]
fn foreign_headers_are_rejected() {
    let mut bytes = vec![b' '; 128];
    bytes[..10].copy_from_slice(b"NOT A MAT!");
    assert!(matches!(Mat5::read_bytes(bytes), Err(MatError::Format(_))));
}
