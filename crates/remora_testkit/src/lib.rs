//! # Remora Testkit
//!
//! Test utilities for Remora.
//!
//! This crate provides:
//! - `MockServer`, an in-memory implementation of the REST API usable as a
//!   `Transport`, with pagination, error injection and latency
//! - Fixtures for clients and server documents
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```
//! use remora_core::Entity;
//! use remora_testkit::prelude::*;
//!
//! let server = MockServer::shared();
//! let client = client_for(&server);
//!
//! let member = Entity::member("club");
//! member.put("name", "ann");
//! client.push(&member).unwrap();
//! assert_eq!(server.len("club", "members"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
