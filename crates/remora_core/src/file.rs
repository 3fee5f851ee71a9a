//! File references stored in entity fields.

use crate::wire::WireDocument;
use bytes::Bytes;
use serde_json::Value as Json;

/// A file attached to an entity field.
///
/// A file known to the server carries its remote representation (the
/// `_type: "file"` object the server returned). A file about to be uploaded
/// carries a local payload; any local payload switches the whole push to
/// multipart encoding. Local payloads never leave the process except as a
/// form part.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileRef {
    remote: Option<WireDocument>,
    file_name: Option<String>,
    content_type: Option<String>,
    local: Option<Bytes>,
}

impl FileRef {
    /// Creates a file that will be uploaded on the next push.
    pub fn from_bytes(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            remote: None,
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            local: Some(bytes.into()),
        }
    }

    /// Wraps a file object received from the server.
    pub fn from_wire(object: &WireDocument) -> Self {
        let text = |key: &str| object.get(key).and_then(Json::as_str).map(str::to_string);
        Self {
            file_name: text("file_name"),
            content_type: text("content_type"),
            remote: Some(object.clone()),
            local: None,
        }
    }

    /// Builds a file reference from its individual parts.
    pub fn from_parts(
        remote: Option<WireDocument>,
        file_name: Option<String>,
        content_type: Option<String>,
        local: Option<Bytes>,
    ) -> Self {
        Self {
            remote,
            file_name,
            content_type,
            local,
        }
    }

    /// The server's representation, if this file has been uploaded.
    pub fn remote(&self) -> Option<&WireDocument> {
        self.remote.as_ref()
    }

    /// The download URL reported by the server.
    pub fn url(&self) -> Option<&str> {
        self.remote
            .as_ref()
            .and_then(|remote| remote.get("url"))
            .and_then(Json::as_str)
    }

    /// File name, if known.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// MIME type, if known.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The local payload waiting to be uploaded.
    pub fn local_bytes(&self) -> Option<&Bytes> {
        self.local.as_ref()
    }

    /// Returns true if the next push must upload this file.
    pub fn has_local_payload(&self) -> bool {
        self.local.is_some()
    }

    /// Attaches a payload to upload on the next push.
    pub fn set_local_bytes(&mut self, bytes: impl Into<Bytes>) {
        self.local = Some(bytes.into());
    }

    /// Drops the pending payload.
    pub fn clear_local_bytes(&mut self) {
        self.local = None;
    }

    /// JSON sent in place of this file when it has no local payload.
    pub fn to_wire(&self) -> Json {
        self.remote.clone().map_or(Json::Null, Json::Object)
    }
}
