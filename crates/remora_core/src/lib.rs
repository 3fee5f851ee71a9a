//! # Remora Core
//!
//! Local document model for entities mirrored from a remote REST store.
//!
//! This crate provides:
//! - `Value`, a tagged field value (scalars, sequences, mappings, dates,
//!   file references and embedded entity references)
//! - `Entity`, a shared handle on one remote resource instance
//! - The wire codec translating entities to and from server JSON
//! - `EntityRegistry`, the polymorphic entity factory
//! - A CBOR snapshot codec for persisting entities across restarts
//!
//! This crate performs no I/O; see `remora_sync` for the operation
//! scheduler and paginator.
//!
//! ## Usage
//!
//! ```
//! use remora_core::{wire, Entity, Value};
//!
//! let entry = Entity::entry("inst42");
//! entry.put("title", "hello").put("views", 3);
//!
//! let body = wire::encode(&entry);
//! assert!(!body.multipart);
//! assert_eq!(body.document["title"], "hello");
//! assert_eq!(entry.get("views").unwrap(), Value::Integer(3));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod acl;
mod date;
mod entity;
mod error;
mod factory;
mod file;
mod kind;
pub mod snapshot;
mod value;
pub mod wire;

pub use acl::Acl;
pub use date::{Timestamp, DATE_FORMAT, DATE_LEN};
pub use entity::{Entity, OperationGuard};
pub use error::{CoreError, CoreResult};
pub use factory::{instance_id_from_url_path, Constructor, EntityRegistry};
pub use file::FileRef;
pub use kind::{EntityKind, Shape};
pub use value::{Fields, Value};
pub use wire::{EncodedBody, FilePart, WireDocument};
