//! Access control values.

use crate::wire::WireDocument;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// An access control list as exchanged with the server.
///
/// The server owns the ACL schema; entries are kept as JSON keyed by
/// principal (`"all"`, a member refid, a group refid, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Acl {
    entries: WireDocument,
}

impl Acl {
    /// Creates an empty ACL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an ACL object received from the server.
    pub fn from_wire(object: &WireDocument) -> Self {
        Self {
            entries: object.clone(),
        }
    }

    /// Sets the permission entry for a principal.
    #[must_use]
    pub fn with(mut self, principal: impl Into<String>, permission: impl Into<Json>) -> Self {
        self.set(principal, permission);
        self
    }

    /// Sets the permission entry for a principal.
    pub fn set(&mut self, principal: impl Into<String>, permission: impl Into<Json>) {
        self.entries.insert(principal.into(), permission.into());
    }

    /// Returns the permission entry for a principal.
    pub fn get(&self, principal: &str) -> Option<&Json> {
        self.entries.get(principal)
    }

    /// Removes the entry for a principal.
    pub fn remove(&mut self, principal: &str) -> Option<Json> {
        self.entries.remove(principal)
    }

    /// Iterates over principals and their permissions.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Json)> {
        self.entries.iter()
    }

    /// Returns true if no principal has an entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON sent under the `acl` key.
    pub fn to_wire(&self) -> Json {
        Json::Object(self.entries.clone())
    }
}
