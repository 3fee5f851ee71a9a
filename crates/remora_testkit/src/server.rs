//! An in-memory implementation of the REST API.
//!
//! `MockServer` stores resources per `(instance, resource type)` and
//! answers the requests the scheduler and paginator send: list with
//! `limit`/`page`, create, read, update and delete. Tree kinds
//! (`categories`, `groups`) are answered in tree form on reads. Scripted
//! responses, injected failures and artificial latency let tests drive
//! the error paths.

use parking_lot::Mutex;
use remora_core::{EntityKind, FilePart, Timestamp, WireDocument};
use remora_sync::{Method, Request, RequestBody, Response, Transport, TransportError};
use serde_json::{json, Value as Json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Page size used when a list request carries no `limit`.
pub const DEFAULT_PAGE_SIZE: usize = 20;

type Collection = BTreeMap<String, WireDocument>;

#[derive(Default)]
struct Store {
    collections: HashMap<(String, String), Collection>,
    next_id: u64,
}

/// In-memory REST server.
#[derive(Default)]
pub struct MockServer {
    store: Mutex<Store>,
    script: Mutex<VecDeque<Result<Response, TransportError>>>,
    log: Mutex<Vec<Request>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty server behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // Seeding and inspection

    /// Stores a resource directly and returns its refid.
    pub fn insert(&self, instance_id: &str, resource_type: &str, document: WireDocument) -> String {
        let mut store = self.store.lock();
        let refid = next_refid(&mut store);
        let stored = stamp_new(document, instance_id, resource_type, &refid);
        store
            .collections
            .entry(key(instance_id, resource_type))
            .or_default()
            .insert(refid.clone(), stored);
        refid
    }

    /// Stores `count` resources built by `make` and returns their refids.
    pub fn seed<F>(&self, instance_id: &str, resource_type: &str, count: usize, make: F) -> Vec<String>
    where
        F: Fn(usize) -> WireDocument,
    {
        (0..count)
            .map(|i| self.insert(instance_id, resource_type, make(i)))
            .collect()
    }

    /// A stored resource.
    pub fn get(&self, instance_id: &str, resource_type: &str, refid: &str) -> Option<WireDocument> {
        self.store
            .lock()
            .collections
            .get(&key(instance_id, resource_type))
            .and_then(|c| c.get(refid))
            .cloned()
    }

    /// Number of stored resources in a collection.
    pub fn len(&self, instance_id: &str, resource_type: &str) -> usize {
        self.store
            .lock()
            .collections
            .get(&key(instance_id, resource_type))
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self, instance_id: &str, resource_type: &str) -> bool {
        self.len(instance_id, resource_type) == 0
    }

    // Scripting

    /// Answers the next request with `response`, bypassing the store.
    pub fn enqueue_response(&self, response: Response) {
        self.script.lock().push_back(Ok(response));
    }

    /// Answers the next request with a JSON body, bypassing the store.
    pub fn enqueue_json(&self, status: u16, body: Json) {
        self.enqueue_response(Response::json(status, &body));
    }

    /// Answers the next request with a structured server error.
    pub fn enqueue_error(&self, status: u16, code: i64, message: &str) {
        self.enqueue_json(status, json!({"error_code": code, "error_message": message}));
    }

    /// Fails the next request at the transport level.
    pub fn enqueue_transport_error(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(TransportError::new(message)));
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    // Observation

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Highest number of requests that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    // Request handling

    fn handle(&self, request: &Request) -> Response {
        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        match (request.method, segments.as_slice()) {
            (Method::Get, [instance, resource_type]) => {
                self.list(instance, resource_type, request)
            }
            (Method::Post, [instance, resource_type]) => {
                self.create(instance, resource_type, &request.body)
            }
            (Method::Get, [instance, resource_type, refid]) => {
                self.read(instance, resource_type, refid)
            }
            (Method::Put, [instance, resource_type, refid]) => {
                self.update(instance, resource_type, refid, &request.body)
            }
            (Method::Delete, [instance, resource_type, refid]) => {
                self.remove(instance, resource_type, refid)
            }
            _ => error(405, 405, "Method not allowed."),
        }
    }

    fn list(&self, instance: &str, resource_type: &str, request: &Request) -> Response {
        let limit = query_number(request, "limit")
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let page = query_number(request, "page").filter(|&n| n > 0).unwrap_or(1);

        let store = self.store.lock();
        let items: Vec<Json> = store
            .collections
            .get(&key(instance, resource_type))
            .map(|c| {
                c.values()
                    .map(|doc| Json::Object(render(&store, instance, resource_type, doc)))
                    .collect()
            })
            .unwrap_or_default();
        drop(store);

        let total = items.len();
        let page_count = total.div_ceil(limit).max(1);
        let start = (page - 1).saturating_mul(limit).min(total);
        let end = start.saturating_add(limit).min(total);

        let mut body = WireDocument::new();
        body.insert(resource_type.to_string(), Json::Array(items[start..end].to_vec()));
        body.insert(
            "paginate".to_string(),
            json!({"page": page, "pageCount": page_count, "total": total}),
        );
        Response::json(200, &Json::Object(body))
    }

    fn create(&self, instance: &str, resource_type: &str, body: &RequestBody) -> Response {
        let mut store = self.store.lock();
        let refid = next_refid(&mut store);
        let mut document = stamp_new(
            body.document().cloned().unwrap_or_default(),
            instance,
            resource_type,
            &refid,
        );
        if let RequestBody::Multipart { files, .. } = body {
            attach_files(&mut document, files, instance, &refid);
        }
        let rendered = render(&store, instance, resource_type, &document);
        store
            .collections
            .entry(key(instance, resource_type))
            .or_default()
            .insert(refid, document);
        Response::json(200, &Json::Object(rendered))
    }

    fn read(&self, instance: &str, resource_type: &str, refid: &str) -> Response {
        let store = self.store.lock();
        let found = store
            .collections
            .get(&key(instance, resource_type))
            .and_then(|c| c.get(refid))
            .map(|doc| render(&store, instance, resource_type, doc));
        drop(store);
        match found {
            Some(document) if is_tree(resource_type) => {
                let mut node = document;
                node.insert("children".to_string(), json!([]));
                let mut tree = WireDocument::new();
                tree.insert(
                    resource_type.to_string(),
                    Json::Array(vec![Json::Object(node)]),
                );
                Response::json(200, &Json::Object(tree))
            }
            Some(document) => Response::json(200, &Json::Object(document)),
            None => not_found(),
        }
    }

    fn update(&self, instance: &str, resource_type: &str, refid: &str, body: &RequestBody) -> Response {
        let mut store = self.store.lock();
        let Some(stored) = store
            .collections
            .get_mut(&key(instance, resource_type))
            .and_then(|c| c.get_mut(refid))
        else {
            return not_found();
        };
        if let Some(changes) = body.document() {
            for (name, value) in changes {
                if !is_server_field(name) {
                    stored.insert(name.clone(), value.clone());
                }
            }
        }
        if let RequestBody::Multipart { files, .. } = body {
            attach_files(stored, files, instance, refid);
        }
        stored.insert("modified".to_string(), Json::String(Timestamp::now().to_wire_string()));
        let updated = stored.clone();
        let rendered = render(&store, instance, resource_type, &updated);
        Response::json(200, &Json::Object(rendered))
    }

    fn remove(&self, instance: &str, resource_type: &str, refid: &str) -> Response {
        let mut store = self.store.lock();
        let removed = store
            .collections
            .get_mut(&key(instance, resource_type))
            .and_then(|c| c.remove(refid));
        let removed = removed.map(|doc| render(&store, instance, resource_type, &doc));
        drop(store);
        match removed {
            Some(document) => Response::json(200, &Json::Object(document)),
            None => not_found(),
        }
    }
}

impl Transport for MockServer {
    fn request(&self, request: &Request) -> Result<Response, TransportError> {
        self.log.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let scripted = self.script.lock().pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => Ok(self.handle(request)),
        };
        trace!(method = %request.method, path = %request.path, "mock server answered");

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn key(instance: &str, resource_type: &str) -> (String, String) {
    (instance.to_string(), resource_type.to_string())
}

fn next_refid(store: &mut Store) -> String {
    store.next_id += 1;
    format!("id{:06}", store.next_id)
}

fn wire_tag(resource_type: &str) -> String {
    EntityKind::builtins()
        .into_iter()
        .find(|kind| kind.resource_type() == resource_type)
        .map_or_else(|| resource_type.to_string(), |kind| kind.wire_tag().to_string())
}

fn is_tree(resource_type: &str) -> bool {
    EntityKind::builtins()
        .iter()
        .any(|kind| kind.is_tree() && kind.resource_type() == resource_type)
}

fn is_contents(resource_type: &str) -> bool {
    EntityKind::builtins()
        .iter()
        .any(|kind| kind.is_contents() && kind.resource_type() == resource_type)
}

/// The document as sent to clients: contents kinds store category refids
/// and answer with the category objects.
fn render(store: &Store, instance: &str, resource_type: &str, document: &WireDocument) -> WireDocument {
    let mut rendered = document.clone();
    if !is_contents(resource_type) {
        return rendered;
    }
    if let Some(Json::Array(refids)) = document.get("categories") {
        let categories = store.collections.get(&key(instance, "categories"));
        let expanded = refids
            .iter()
            .filter_map(Json::as_str)
            .map(|refid| {
                categories
                    .and_then(|c| c.get(refid))
                    .cloned()
                    .map_or_else(|| json!({ "refid": refid }), Json::Object)
            })
            .collect();
        rendered.insert("categories".to_string(), Json::Array(expanded));
    }
    rendered
}

fn is_server_field(name: &str) -> bool {
    matches!(name, "refid" | "resource_type" | "url_path" | "created" | "modified")
}

fn stamp_new(mut document: WireDocument, instance: &str, resource_type: &str, refid: &str) -> WireDocument {
    document.retain(|name, _| !is_server_field(name));
    let now = Timestamp::now().to_wire_string();
    let mut stamped = WireDocument::new();
    stamped.insert("refid".to_string(), Json::String(refid.to_string()));
    stamped.insert("resource_type".to_string(), Json::String(wire_tag(resource_type)));
    stamped.insert(
        "url_path".to_string(),
        Json::String(format!("/{instance}/{resource_type}/{refid}")),
    );
    stamped.insert("created".to_string(), Json::String(now.clone()));
    stamped.insert("modified".to_string(), Json::String(now));
    stamped.extend(document);
    stamped
}

/// Stores uploaded files as server file objects at their field paths
/// (`contents[gallery][2]`).
fn attach_files(document: &mut WireDocument, files: &[FilePart], instance: &str, refid: &str) {
    for part in files {
        let segments: Vec<&str> = part
            .name
            .split(|c: char| c == '[' || c == ']')
            .filter(|s| !s.is_empty())
            .collect();
        let file_object = json!({
            "_type": "file",
            "file_name": part.file.file_name(),
            "content_type": part.file.content_type(),
            "size": part.file.local_bytes().map_or(0, |b| b.len()),
            "url": format!("https://files.mock/{instance}/{refid}/{}", part.name),
        });
        if let Some((first, rest)) = segments.split_first() {
            if let Some(slot) = document.get_mut(*first) {
                place(slot, rest, file_object);
            }
        }
    }
}

fn place(slot: &mut Json, path: &[&str], value: Json) {
    let Some((head, rest)) = path.split_first() else {
        *slot = value;
        return;
    };
    let next = match slot {
        Json::Object(map) => map.get_mut(*head),
        Json::Array(items) => head.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    };
    if let Some(next) = next {
        place(next, rest, value);
    }
}

fn query_number(request: &Request, name: &str) -> Option<usize> {
    request.query_param(name).and_then(|v| v.parse().ok())
}

fn error(status: u16, code: i64, message: &str) -> Response {
    Response::json(status, &json!({"error_code": code, "error_message": message}))
}

fn not_found() -> Response {
    error(404, 404, "Resource not found.")
}
