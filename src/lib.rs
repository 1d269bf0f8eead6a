//! # mat5
//!
//! A reader and writer for MAT5, the binary container format that stores named, typed,
//! N-dimensional arrays: numeric matrices, sparse matrices, character arrays, cells, structs,
//! function handles and the undocumented "opaque" class objects.
//!
//! ## Overview
//!
//! A MAT5 file is a header followed by a flat sequence of root entries. Every entry is one
//! tagged element; container elements nest further elements. Root entries may be deflated
//! individually, which makes them independent units of work: this crate inflates and deflates
//! them concurrently on a rayon pool while keeping results in file order.
//!
//! ### Key Features
//!
//! *   **Both byte orders:** files are read in whatever order their header announces and can be
//!     written in either.
//! *   **Parallel (De)compression:** compressed root entries are decoded on worker threads when
//!     the source can hand out independent views (memory maps, byte buffers). On write, entries
//!     compress in parallel and are committed strictly in submission order.
//! *   **Storage Compaction:** numeric arrays keep the narrowest physical type that holds their
//!     values exactly, independent of their logical class.
//! *   **Class Objects:** handle objects stored in the file's subsystem are resolved after the
//!     main stream is parsed. References carry ids into an arena, never pointers.
//! *   **Entry Filtering:** a predicate sees each root entry's name, class and dimensions before
//!     its payload is decoded; rejected entries are skipped.
//!
//! ## File Layout
//!
//! ```text
//! [Header: 128 bytes (or 8, reduced)] [Entry 1] [Entry 2] ... [Subsystem entry (optional)]
//! ```
//!
//! Each element starts with an 8-byte tag (type, length), or a 4-byte packed tag when its payload
//! fits in 4 bytes. Payloads are padded to 8 bytes. A full header records the absolute offset of
//! the subsystem entry.
//!
//! ## Usage Patterns
//!
//! ### Reading
//!
//! ```rust,no_run
//! use mat5::{Array, Mat5};
//!
//! let file = Mat5::open("data.mat")?;
//! for entry in &file {
//!     println!("{}: {:?} {:?}", entry.name, entry.value.class(), entry.value.dims());
//! }
//! if let Some(Array::Numeric(x)) = file.get("x") {
//!     println!("x(1) = {}", x.get_f64(0)?);
//! }
//! # Ok::<(), mat5::MatError>(())
//! ```
//!
//! ### Writing
//!
//! ```rust,no_run
//! use mat5::{Array, Compression, Mat5, MatFile, NumericArray, default_allocator};
//!
//! let alloc = default_allocator();
//! let mut file = MatFile::new();
//! file.insert("x", Array::Numeric(NumericArray::from_f64(vec![2, 2], &[1.0, 2.0, 3.0, 4.0], &alloc)?));
//!
//! Mat5::builder()
//!     .threads(4)
//!     .compression(Compression::deflate())
//!     .save("out.mat", &file)?;
//! # Ok::<(), mat5::MatError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` block maps a file into memory.
//! * **No Panics:** no `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** every failure is a [`MatError`].

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
/// The `Mat5` façade and its builder.
pub mod api;
pub mod array;
pub mod compression;
pub mod error;
pub mod file;
pub mod format;
pub mod inspector;
pub mod mcos;
pub mod reader;
pub mod writer;

// --- SUPPORT MODULES ---
pub mod allocator;
pub mod charset;
pub mod io;
pub mod number;
pub mod sparse;

// Private modules
mod executor;

// --- RE-EXPORTS ---

pub use allocator::{BufferAllocator, HeapAllocator, PooledAllocator, default_allocator};
pub use api::{Mat5, Mat5Builder};
pub use array::{
    Array, CellArray, CharArray, Entry, FunctionHandle, NumericArray, ObjectArray, OpaqueArray,
    OpaqueContent, SparseArray, StructArray,
};
pub use compression::{Compression, Compressor, NoCompression, ZlibCompressor};
pub use error::{MatError, Result};
pub use file::MatFile;
pub use format::{ArrayClass, ByteOrder, FileHeader, HeaderKind, MatType};
pub use inspector::{DebugReport, Mat5Inspector};
pub use mcos::{McosObject, McosReference, ObjectArena, ObjectId, Subsystem};
pub use number::NumberStore;
pub use reader::{EntryFilter, EntryHeader, ReadOptions};
pub use sparse::{SparseBuilder, SparseMatrix};
pub use writer::{MatWriter, WriteOptions};
