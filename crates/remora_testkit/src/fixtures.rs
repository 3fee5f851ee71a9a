//! Test fixtures: clients, documents and tracing setup.

use crate::server::MockServer;
use remora_core::WireDocument;
use remora_sync::{Client, ClientConfig, Transport};
use serde_json::{json, Value as Json};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber writing through the test harness.
///
/// Controlled by `RUST_LOG`; defaults to `warn`. Safe to call from every
/// test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A client with inline callbacks talking to `server`.
pub fn client_for(server: &Arc<MockServer>) -> Client {
    init_tracing();
    let transport: Arc<dyn Transport> = server.clone();
    Client::from_shared(transport)
}

/// A client with a custom configuration talking to `server`.
pub fn client_with_config(server: &Arc<MockServer>, config: ClientConfig) -> Client {
    client_for(server).with_config(config)
}

/// Converts a `json!` object literal into a document.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn document(value: Json) -> WireDocument {
    match value {
        Json::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A member as the server returns it.
pub fn member_document(instance_id: &str, refid: &str, login_id: &str) -> WireDocument {
    document(json!({
        "refid": refid,
        "resource_type": "member",
        "url_path": format!("/{instance_id}/members/{refid}"),
        "login_id": login_id,
        "created": "2024-01-01 09:00:00",
        "modified": "2024-01-02 10:30:00"
    }))
}

/// An embedded instance object, as found inside `contents`.
pub fn embedded_instance(resource_type: &str, instance_id: &str, path_segment: &str, refid: &str) -> Json {
    json!({
        "_type": "instance",
        "refid": refid,
        "resource_type": resource_type,
        "url_path": format!("/{instance_id}/{path_segment}/{refid}")
    })
}

/// A server file object, as found inside `contents`.
pub fn file_object(file_name: &str, content_type: &str) -> Json {
    json!({
        "_type": "file",
        "file_name": file_name,
        "content_type": content_type,
        "url": format!("https://files.mock/{file_name}")
    })
}

/// One page of a list response.
pub fn page_document(list_key: &str, items: Vec<Json>, page: i64, page_count: i64) -> Json {
    let mut body = WireDocument::new();
    body.insert(list_key.to_string(), Json::Array(items));
    body.insert(
        "paginate".to_string(),
        json!({"page": page, "pageCount": page_count}),
    );
    Json::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_document_shape() {
        let doc = member_document("club", "m1", "ann");
        assert_eq!(doc["url_path"], "/club/members/m1");
        assert_eq!(doc["resource_type"], "member");
    }

    #[test]
    fn page_document_shape() {
        let page = page_document("entries", vec![json!({"refid": "e1"})], 1, 2);
        assert_eq!(page["paginate"]["pageCount"], 2);
        assert_eq!(page["entries"][0]["refid"], "e1");
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
