//! # Remora Sync
//!
//! Network operations for entities of `remora_core`.
//!
//! This crate provides:
//! - `Client`, the operation scheduler (`fetch`, `push`, `delete`, `find`)
//!   in blocking and callback form
//! - The `Transport` abstraction plus an HTTP adapter and a scripted mock
//! - The paginator behind `find`
//! - Callback dispatchers for hosts with their own event loop
//!
//! ## Threading
//!
//! Each call runs on a dedicated named worker thread. Blocking calls wait
//! for it (optionally bounded by `ClientConfig::wait_timeout`); background
//! calls return immediately and invoke their callback exactly once through
//! the client's `Dispatch`.
//!
//! ## Usage
//!
//! ```
//! use remora_core::Entity;
//! use remora_sync::{Client, MockTransport};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.push_json(200, json!({"refid": "m1", "name": "ann"}));
//!
//! let client = Client::from_shared(transport.clone());
//! let member = Entity::member("club");
//! member.put("name", "ann");
//! client.push(&member).unwrap();
//!
//! assert_eq!(member.refid(), "m1");
//! assert_eq!(transport.requests()[0].path, "club/members");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod dispatch;
mod error;
mod find;
mod http;
mod response;
mod transport;
mod worker;

pub use client::Client;
pub use config::{
    ClientConfig, Credentials, DEFAULT_API_VERSION, DEFAULT_SCHEME, DEFAULT_WORKER_NAME,
};
#[cfg(feature = "tokio")]
pub use dispatch::TokioDispatcher;
pub use dispatch::{Dispatch, InlineDispatcher, Job, QueueDispatcher};
pub use error::{RemoteError, RemoteErrorKind, SyncError, SyncResult};
pub use find::{FindQuery, FETCH_ALL_LIMIT};
pub use http::{
    HttpClient, HttpRequest, HttpTransport, ACCESS_TOKEN_HEADER, APP_ID_HEADER, APP_KEY_HEADER,
    JSON_PART_NAME,
};
pub use transport::{
    flatten_query, Method, MockTransport, Request, RequestBody, Response, Transport,
    TransportError,
};
