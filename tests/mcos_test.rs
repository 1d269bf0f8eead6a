#![allow(missing_docs)]

use mat5::{
    Array, ByteOrder, CharArray, Compression, Mat5, Mat5Inspector, MatError, MatFile, McosObject,
    McosReference, NumericArray, OpaqueArray, OpaqueContent, Result, default_allocator,
};

fn point(x: f64) -> Result<McosObject> {
    let alloc = default_allocator();
    Ok(McosObject::new("Point").with_field("x", Array::Numeric(NumericArray::scalar(x, &alloc)?)))
}

fn raw_reference(ids: Vec<u32>, class_id: u32) -> Result<Array> {
    let n = ids.len();
    Ok(Array::Opaque(OpaqueArray {
        global: false,
        object_type: "MCOS".into(),
        class_name: "Point".into(),
        content: OpaqueContent::Reference(McosReference::new(vec![1, n], ids, class_id)?),
    }))
}

fn file_with_objects(order: ByteOrder) -> Result<MatFile> {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    file.insert("plain", Array::Char(CharArray::from_text("not an object")));
    file.set_objects(
        vec![
            point(1.0)?,
            point(2.0)?,
            McosObject::new("Label")
                .with_package("ui")
                .with_field("text", Array::Char(CharArray::from_text("origin")))
                .with_field("anchor", raw_reference(vec![1], 1)?),
        ],
        order,
        &alloc,
    )?;
    let points = file.reference_to(vec![1, 2], vec![1, 2])?;
    let label = file.reference_to(vec![1, 1], vec![3])?;
    file.insert("pts", points);
    file.insert("lbl", label);
    Ok(file)
}

// --- TESTS ---

#[test]
fn references_resolve_after_a_round_trip() -> Result<()> {
    for order in [ByteOrder::Little, ByteOrder::Big] {
        for threads in [0, 8] {
            let config = Mat5::builder()
                .byte_order(order)
                .threads(threads)
                .compression(Compression::deflate());
            let file = file_with_objects(order)?;
            let back = config.read_bytes(config.to_bytes(&file)?)?;

            assert!(back.header().subsystem_offset().is_some());
            assert_eq!(back.names().collect::<Vec<_>>(), ["plain", "pts", "lbl"]);
            assert_eq!(back.objects().len(), 3);

            let x = back.object_field("pts", 1, "x")?.and_then(Array::as_numeric).unwrap();
            assert_eq!(x.get_f64(0)?, 2.0);
            let pts = back.get("pts").and_then(Array::as_reference).unwrap();
            assert_eq!(pts.dims(), &[1, 2]);
            assert_eq!(pts.class_id(), 1);
            assert_eq!(pts.field_names(back.objects())?, vec!["x"]);

            let label = back.get("lbl").and_then(Array::as_reference).unwrap();
            assert_eq!(label.object(back.objects(), 0)?.qualified_name(), "ui.Label");
            let anchor = label
                .field(back.objects(), 0, "anchor")?
                .and_then(Array::as_reference)
                .unwrap();
            assert!(anchor.is_resolved());
            assert_eq!(anchor.field(back.objects(), 0, "x")?.and_then(Array::as_numeric).unwrap().get_f64(0)?, 1.0);
        }
    }
    Ok(())
}

#[test]
fn reduced_header_subsystem_is_the_second_root_element() -> Result<()> {
    for threads in [0, 8] {
        let config = Mat5::builder().reduced_header().threads(threads).compression(Compression::deflate());
        let file = file_with_objects(ByteOrder::native())?;
        let bytes = config.to_bytes(&file)?;

        let report = Mat5Inspector::inspect_bytes(bytes.clone(), true)?;
        let names: Vec<_> = report.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["plain", "", "pts", "lbl"]);
        assert!(report.entries[1].is_subsystem);
        assert_eq!(report.entries.iter().filter(|e| e.is_subsystem).count(), 1);

        let back = config.read_bytes(bytes)?;
        assert_eq!(back.names().collect::<Vec<_>>(), ["plain", "pts", "lbl"]);
        assert_eq!(back.subsystem(), file.subsystem());
        let x = back.object_field("pts", 0, "x")?.and_then(Array::as_numeric).unwrap();
        assert_eq!(x.get_f64(0)?, 1.0);
    }
    Ok(())
}

#[test]
fn reduced_header_subsystem_ignores_the_entry_filter() -> Result<()> {
    let config = Mat5::builder().reduced_header();
    let bytes = config.to_bytes(&file_with_objects(ByteOrder::native())?)?;
    let back = config.filter(|h| h.name == "lbl").read_bytes(bytes)?;
    assert_eq!(back.names().collect::<Vec<_>>(), ["lbl"]);
    let label = back.get("lbl").and_then(Array::as_reference).unwrap();
    assert_eq!(label.object(back.objects(), 0)?.qualified_name(), "ui.Label");
    Ok(())
}

#[test]
fn subsystem_bytes_pass_through_unchanged() -> Result<()> {
    let first = Mat5::read_bytes(Mat5::to_bytes(&file_with_objects(ByteOrder::Big)?)?)?;
    let second = Mat5::read_bytes(Mat5::to_bytes(&first)?)?;
    assert_eq!(first.subsystem(), second.subsystem());
    assert_eq!(first.objects(), second.objects());
    Ok(())
}

#[test]
fn references_without_a_subsystem_are_format_errors() -> Result<()> {
    let mut file = MatFile::new();
    file.insert("dangling", raw_reference(vec![1], 1)?);
    let err = Mat5::read_bytes(Mat5::to_bytes(&file)?).unwrap_err();
    assert!(matches!(err, MatError::Format(_)), "unexpected error {err}");
    Ok(())
}

#[test]
fn references_past_the_object_table_are_format_errors() -> Result<()> {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    file.set_objects(vec![point(0.0)?], ByteOrder::native(), &alloc)?;
    file.insert("bad", raw_reference(vec![1, 4], 1)?);
    let err = Mat5::read_bytes(Mat5::to_bytes(&file)?).unwrap_err();
    assert!(matches!(err, MatError::Format(_)), "unexpected error {err}");
    Ok(())
}

#[test]
fn files_without_references_ignore_the_subsystem() -> Result<()> {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    file.insert("x", Array::Numeric(NumericArray::scalar(1.0, &alloc)?));
    file.set_objects(vec![point(3.0)?], ByteOrder::native(), &alloc)?;
    let back = Mat5::read_bytes(Mat5::to_bytes(&file)?)?;
    assert!(back.subsystem().is_some());
    assert!(back.objects().is_empty());
    Ok(())
}
