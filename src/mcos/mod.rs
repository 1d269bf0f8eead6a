//! Class objects stored in the subsystem.
//!
//! A class-object value in the main file is only a placeholder: an opaque
//! element whose payload is an [`McosReference`] listing object ids. The
//! objects themselves live in the subsystem entry, a nested MAT sub-file whose
//! first element holds the `FileWrapper__` object table.
//!
//! Resolution is deferred until the whole file has been read, because the
//! subsystem is usually the last entry. Objects are owned by an
//! [`ObjectArena`] indexed by [`ObjectId`]; references hold ids, never
//! pointers, so cycles between objects are harmless.

/// Defines the `ObjectId` type.
pub mod id;
/// Backing objects and their arena.
pub mod object;
/// Placeholders and the per-read registry.
pub mod reference;
/// The subsystem blob and reference resolution.
pub mod subsystem;
pub(crate) mod wrapper;

pub use id::ObjectId;
pub use object::{McosObject, ObjectArena};
pub use reference::{McosReference, ReferenceRegistry};
pub use subsystem::Subsystem;
pub(crate) use subsystem::resolve;
pub(crate) use wrapper::class_table;
