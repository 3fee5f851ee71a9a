//! Translation between entities and the server's JSON documents.
//!
//! Encoding is a total conversion over [`Value`]: every field, at any
//! depth, is rendered to plain JSON. Decoding replaces the field map
//! wholesale and interprets the special wire types (`_type: "file"`,
//! `_type: "instance"` and date strings) inside `contents`.

use crate::acl::Acl;
use crate::date::{Timestamp, DATE_LEN};
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::factory::EntityRegistry;
use crate::file::FileRef;
use crate::kind::{EntityKind, Shape};
use crate::value::{refid_to_json, Fields, Value};
use serde_json::{Number, Value as Json};
use tracing::{trace, warn};

/// A JSON object as exchanged with the server.
pub type WireDocument = serde_json::Map<String, Json>;

const READ_ONLY_FIELDS: [&str; 2] = ["created", "modified"];
const ACL_FIELD: &str = "acl";
const CONTENTS_FIELD: &str = "contents";
const CATEGORIES_FIELD: &str = "categories";
const CHILDREN_FIELD: &str = "children";
const PARENT_REFID_FIELD: &str = "parent_refid";

/// A local file payload that must travel as a multipart part.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    /// Form field name, derived from the field path (`contents[photo]`).
    pub name: String,
    /// The file, including its local bytes.
    pub file: FileRef,
}

/// Result of encoding an entity for a push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedBody {
    /// JSON body (or the `json` part of a multipart body).
    pub document: WireDocument,
    /// True when at least one file carries a local payload.
    pub multipart: bool,
    /// Files to attach, in field order.
    pub files: Vec<FilePart>,
    /// True when a staged ACL was embedded.
    pub acl_sent: bool,
    /// True when a staged parent was sent as `parent_refid`.
    pub parent_sent: bool,
}

/// Encodes an entity for a push.
pub fn encode(entity: &Entity) -> EncodedBody {
    // Referenced entities are read after the lock is released, so an
    // entity that refers to itself cannot deadlock.
    let state = entity.read_state().clone();
    let kind = entity.kind();

    let mut body = EncodedBody::default();

    if let Some(acl) = &state.pending_acl {
        body.document.insert(ACL_FIELD.to_string(), acl.to_wire());
        body.acl_sent = true;
    }

    for (name, value) in state.fields.iter() {
        if READ_ONLY_FIELDS.contains(&name.as_str()) {
            continue;
        }
        if name == ACL_FIELD && body.acl_sent {
            continue;
        }
        let json = match (kind.shape(), name.as_str(), value) {
            (Shape::Contents, CATEGORIES_FIELD, Value::Array(items)) => category_refids(items),
            _ => encode_value(value, name, &mut body.files),
        };
        body.document.insert(name.clone(), json);
    }

    if kind.is_tree() {
        if let Some(parent) = &state.pending_parent {
            let parent_refid = parent.refid();
            if !parent_refid.is_empty() {
                body.document
                    .insert(PARENT_REFID_FIELD.to_string(), Json::String(parent_refid));
                body.parent_sent = true;
            }
        }
    }

    body.multipart = !body.files.is_empty();
    trace!(
        kind = %kind,
        fields = body.document.len(),
        files = body.files.len(),
        "encoded entity"
    );
    body
}

fn category_refids(items: &[Value]) -> Json {
    Json::Array(
        items
            .iter()
            .filter_map(|item| match item {
                Value::Reference(category) => Some(category.refid()),
                Value::Text(refid) => Some(refid.clone()),
                _ => None,
            })
            .filter(|refid| !refid.is_empty())
            .map(Json::String)
            .collect(),
    )
}

fn encode_value(value: &Value, path: &str, files: &mut Vec<FilePart>) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(n) => Json::from(*n),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| encode_value(item, &format!("{path}[{i}]"), files))
                .collect(),
        ),
        Value::Map(fields) => Json::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v, &format!("{path}[{k}]"), files)))
                .collect(),
        ),
        Value::Date(ts) => Json::String(ts.to_wire_string()),
        Value::File(file) if file.has_local_payload() => {
            files.push(FilePart {
                name: path.to_string(),
                file: file.clone(),
            });
            Json::Null
        }
        Value::File(file) => file.to_wire(),
        Value::Reference(entity) => refid_to_json(&entity.refid()),
    }
}

/// Decodes a server document into `entity`, replacing all of its fields.
///
/// # Errors
///
/// Returns a data format error if the source is absent, not an object, or
/// violates the shape rules of the entity's kind. The entity is left
/// untouched on error.
pub fn decode(source: Option<&Json>, entity: &Entity, registry: &EntityRegistry) -> CoreResult<()> {
    match source {
        Some(Json::Object(document)) => decode_document(document, entity, registry),
        Some(other) => Err(CoreError::data_format(format!(
            "expected an object, got `{other}`"
        ))),
        None => Err(CoreError::data_format("no data to decode")),
    }
}

pub(crate) fn decode_document(
    document: &WireDocument,
    entity: &Entity,
    registry: &EntityRegistry,
) -> CoreResult<()> {
    let kind = entity.kind();
    let node = match kind.shape() {
        Shape::Tree => tree_node(document, kind)?,
        _ => document,
    };

    let mut fields = Fields::with_capacity(node.len());
    let mut current_acl = None;

    for (name, json) in node {
        match name.as_str() {
            "created" | "modified" => {
                if let Some(ts) = json.as_str().and_then(|s| Timestamp::parse(s).ok()) {
                    fields.insert(name.clone(), ts);
                }
            }
            ACL_FIELD => {
                if let Some(object) = json.as_object() {
                    current_acl = Some(Acl::from_wire(object));
                }
            }
            CONTENTS_FIELD => {
                if let Some(object) = json.as_object() {
                    fields.insert(name.clone(), decode_contents(object, registry));
                }
            }
            CHILDREN_FIELD if kind.is_tree() => {}
            _ => {
                fields.insert(name.clone(), Value::from_json(json));
            }
        }
    }

    if kind.is_contents() {
        if let Some(json) = node.get(CATEGORIES_FIELD) {
            let categories = decode_categories(json, entity.instance_id(), registry)?;
            fields.insert(CATEGORIES_FIELD, categories);
        }
    }

    let mut state = entity.write_state();
    state.fields = fields;
    if current_acl.is_some() {
        state.current_acl = current_acl;
    }
    Ok(())
}

fn tree_node<'a>(document: &'a WireDocument, kind: &EntityKind) -> CoreResult<&'a WireDocument> {
    match document.get(kind.list_key()) {
        Some(Json::Array(nodes)) => nodes
            .first()
            .and_then(Json::as_object)
            .ok_or_else(|| CoreError::data_format(format!("empty `{}` tree", kind.list_key()))),
        _ => Ok(document),
    }
}

fn decode_contents(object: &WireDocument, registry: &EntityRegistry) -> Value {
    let mut fields = Fields::with_capacity(object.len());
    for (name, json) in object {
        let value = match json {
            Json::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| decode_special(item, registry))
                    .collect(),
            )),
            other => decode_special(other, registry),
        };
        if let Some(value) = value {
            fields.insert(name.clone(), value);
        }
    }
    Value::Map(fields)
}

/// `None` means the element could not be built and must be dropped.
fn decode_special(json: &Json, registry: &EntityRegistry) -> Option<Value> {
    match json {
        Json::Object(object) => match object.get("_type").and_then(Json::as_str) {
            Some("file") => Some(Value::File(FileRef::from_wire(object))),
            Some("instance") => match registry.create(json) {
                Some(entity) => Some(Value::Reference(entity)),
                None => {
                    warn!(
                        refid = object.get("refid").and_then(Json::as_str).unwrap_or(""),
                        "dropping embedded instance that could not be built"
                    );
                    None
                }
            },
            _ => Some(Value::from_json(json)),
        },
        Json::String(s) if s.len() == DATE_LEN => Some(
            Timestamp::parse(s)
                .map(Value::Date)
                .unwrap_or_else(|_| Value::Text(s.clone())),
        ),
        other => Some(Value::from_json(other)),
    }
}

fn decode_categories(json: &Json, instance_id: &str, registry: &EntityRegistry) -> CoreResult<Value> {
    let items = json
        .as_array()
        .ok_or_else(|| CoreError::data_format("invalid data type for field `categories`"))?;

    let mut categories = Vec::with_capacity(items.len());
    for item in items {
        let object = item
            .as_object()
            .ok_or_else(|| CoreError::data_format("invalid data type for field `categories`"))?;
        let refid = object.get("refid").and_then(Json::as_str).unwrap_or("");
        if refid.is_empty() {
            continue;
        }
        let kind = registry
            .kind(EntityKind::CATEGORY.wire_tag())
            .unwrap_or_else(EntityKind::category);
        let category = Entity::from_wire(kind, instance_id, refid, object, registry)?;
        categories.push(Value::Reference(category));
    }
    Ok(Value::Array(categories))
}

/// Applies a fetch response: full overwrite.
///
/// # Errors
///
/// See [`decode`].
pub fn apply_fetched(
    entity: &Entity,
    document: &WireDocument,
    registry: &EntityRegistry,
) -> CoreResult<()> {
    decode_document(document, entity, registry)
}

/// Applies a push response: adopts the returned refid, decodes, then clears
/// the staged values that went out with `body`.
///
/// # Errors
///
/// See [`decode`]. Staged values are kept when decoding fails.
pub fn apply_pushed(
    entity: &Entity,
    document: &WireDocument,
    body: &EncodedBody,
    registry: &EntityRegistry,
) -> CoreResult<()> {
    let previous = entity.refid();
    if let Some(refid) = document.get("refid").and_then(Json::as_str) {
        if !refid.is_empty() {
            entity.write_state().refid = refid.to_string();
        }
    }
    if let Err(e) = decode_document(document, entity, registry) {
        entity.write_state().refid = previous;
        return Err(e);
    }

    let mut state = entity.write_state();
    if body.acl_sent {
        state.pending_acl = None;
    }
    if body.parent_sent {
        state.pending_parent = None;
    }
    Ok(())
}

/// Applies a delete response: clears the refid and decodes whatever the
/// server returned.
///
/// # Errors
///
/// See [`decode`]. The refid is cleared even when decoding fails, since the
/// resource is gone.
pub fn apply_deleted(
    entity: &Entity,
    document: &WireDocument,
    registry: &EntityRegistry,
) -> CoreResult<()> {
    entity.write_state().refid.clear();
    decode_document(document, entity, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn object(value: Json) -> WireDocument {
        match value {
            Json::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn encode_skips_read_only_fields() {
        let entry = Entity::entry("blog");
        entry
            .put("title", "t")
            .put("created", Timestamp::now())
            .put("modified", "x");

        let body = encode(&entry);
        assert_eq!(Json::Object(body.document), json!({"title": "t"}));
        assert!(!body.multipart);
    }

    #[test]
    fn encode_special_values() {
        let linked = Entity::with_refid(EntityKind::member(), "club", "m7");
        let unsaved = Entity::member("club");
        let date = Timestamp::parse("2024-02-29 12:00:00").unwrap();
        let contents: Fields = [
            ("author", Value::from(&linked)),
            ("draft", Value::from(&unsaved)),
            ("published", Value::from(date)),
            ("items", Value::from(vec![Value::from(&linked), Value::from(1)])),
        ]
        .into_iter()
        .collect();

        let entry = Entity::entry("blog");
        entry.put("contents", contents);

        let body = encode(&entry);
        assert_eq!(
            body.document["contents"],
            json!({
                "author": "m7",
                "draft": null,
                "published": "2024-02-29 12:00:00",
                "items": ["m7", 1]
            })
        );
    }

    #[test]
    fn local_payload_triggers_multipart() {
        let mut gallery_file = FileRef::from_bytes("b.png", "image/png", Bytes::from_static(b"png"));
        let remote = FileRef::from_wire(&object(json!({"_type": "file", "url": "http://x/a"})));
        let contents: Fields = [
            ("photo", Value::from(FileRef::from_bytes("a.jpg", "image/jpeg", Bytes::from_static(b"jpg")))),
            ("banner", Value::from(remote)),
            (
                "gallery",
                Value::from(vec![Value::Null, Value::Null, Value::from(gallery_file.clone())]),
            ),
        ]
        .into_iter()
        .collect();
        let record = Entity::record("db");
        record.put("contents", contents);

        let body = encode(&record);
        assert!(body.multipart);
        let names: Vec<_> = body.files.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["contents[photo]", "contents[gallery][2]"]);
        assert_eq!(body.document["contents"]["photo"], Json::Null);
        assert_eq!(body.document["contents"]["banner"]["url"], "http://x/a");

        gallery_file.clear_local_bytes();
        assert_eq!(Value::from(gallery_file).to_json(), Json::Null);
    }

    #[test]
    fn encode_embeds_staged_acl_and_parent() {
        let parent = Entity::with_refid(EntityKind::category(), "blog", "c1");
        let node = Entity::category("blog");
        node.put("name", "child");
        node.set_new_acl(Acl::new().with("all", json!({"get": true})));
        node.set_new_parent(&parent).unwrap();

        let body = encode(&node);
        assert!(body.acl_sent);
        assert!(body.parent_sent);
        assert_eq!(body.document["parent_refid"], "c1");
        assert_eq!(body.document["acl"], json!({"all": {"get": true}}));

        let unsaved_parent = Entity::category("blog");
        node.set_new_parent(&unsaved_parent).unwrap();
        assert!(!encode(&node).parent_sent);
    }

    #[test]
    fn encode_contents_categories_as_refids() {
        let saved = Entity::with_refid(EntityKind::category(), "blog", "c1");
        let entry = Entity::entry("blog");
        entry.put(
            "categories",
            vec![Value::from(&saved), Value::from(Entity::category("blog")), Value::from("c9")],
        );
        assert_eq!(encode(&entry).document["categories"], json!(["c1", "c9"]));
    }

    #[test]
    fn decode_replaces_fields() {
        let registry = EntityRegistry::default();
        let member = Entity::member("club");
        member.put("stale", true);

        decode(
            Some(&json!({
                "refid": "m1",
                "created": "2024-01-01 00:00:00",
                "modified": "garbage",
                "acl": {"owner": {"put": true}},
                "name": "ann"
            })),
            &member,
            &registry,
        )
        .unwrap();

        assert!(!member.has("stale"));
        assert!(!member.has("modified"));
        assert!(!member.has("acl"));
        assert!(matches!(member.get("created").unwrap(), Value::Date(_)));
        assert_eq!(member.get_string("name").unwrap(), "ann");
        assert!(member.acl().unwrap().get("owner").is_some());
    }

    #[test]
    fn decode_rejects_absent_source() {
        let registry = EntityRegistry::default();
        let member = Entity::member("club");
        assert!(decode(None, &member, &registry).unwrap_err().is_data_format());
        assert!(decode(Some(&json!([1])), &member, &registry).is_err());
    }

    #[test]
    fn decode_special_types_in_contents() {
        let registry = EntityRegistry::default();
        let record = Entity::record("db");
        decode(
            Some(&json!({
                "refid": "r1",
                "contents": {
                    "photo": {"_type": "file", "url": "http://x/p.png", "file_name": "p.png"},
                    "owner": {"_type": "instance", "refid": "m1", "resource_type": "member", "url_path": "/club/members/m1"},
                    "broken": {"_type": "instance", "refid": "x", "resource_type": "unknown", "url_path": "/club/x/x"},
                    "when": "2024-03-01 10:20:30",
                    "label": "not a date string",
                    "list": [
                        {"_type": "instance", "refid": "m2", "resource_type": "member", "url_path": "/club/members/m2"},
                        {"_type": "instance", "resource_type": "member"},
                        "2024-13-45 99:99:99"
                    ]
                }
            })),
            &record,
            &registry,
        )
        .unwrap();

        let contents = record.get_map("contents").unwrap();
        assert_eq!(contents.get("photo").unwrap().as_file().unwrap().file_name(), Some("p.png"));
        let owner = contents.get("owner").unwrap().as_reference().unwrap();
        assert_eq!(owner.refid(), "m1");
        assert_eq!(owner.instance_id(), "club");
        assert!(!contents.contains_key("broken"));
        assert!(matches!(contents.get("when"), Some(Value::Date(_))));
        assert!(matches!(contents.get("label"), Some(Value::Text(_))));

        let list = contents.get("list").unwrap().as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].as_reference().unwrap().refid(), "m2");
        assert_eq!(list[1], Value::from("2024-13-45 99:99:99"));
    }

    #[test]
    fn decode_contents_categories() {
        let registry = EntityRegistry::default();
        let entry = Entity::entry("blog");
        decode(
            Some(&json!({
                "refid": "e1",
                "categories": [{"refid": "c1", "name": "news"}, {"name": "no refid"}]
            })),
            &entry,
            &registry,
        )
        .unwrap();
        let categories = entry.get_array("categories").unwrap();
        assert_eq!(categories.len(), 1);
        let category = categories[0].as_reference().unwrap();
        assert_eq!(category.refid(), "c1");
        assert_eq!(category.get_string("name").unwrap(), "news");

        let err = decode(Some(&json!({"categories": ["c1"]})), &entry, &registry).unwrap_err();
        assert!(err.is_data_format());
        // failed decode leaves the previous state alone
        assert_eq!(entry.get_array("categories").unwrap().len(), 1);

        decode(Some(&json!({"refid": "e1"})), &entry, &registry).unwrap();
        assert!(!entry.has("categories"));
    }

    #[test]
    fn contents_without_categories_is_accepted() {
        let registry = EntityRegistry::default();
        let entry = Entity::entry("blog");
        decode(
            Some(&json!({"refid": "e1", "contents": {"title": "hello"}})),
            &entry,
            &registry,
        )
        .unwrap();
        assert!(!entry.has("categories"));
        assert_eq!(
            entry.get_map("contents").unwrap().get("title"),
            Some(&Value::from("hello"))
        );
    }

    #[test]
    fn decode_tree_form() {
        let registry = EntityRegistry::default();
        let group = Entity::with_refid(EntityKind::group(), "club", "g1");
        decode(
            Some(&json!({"groups": [{"refid": "g1", "name": "admins", "children": [{"refid": "g2"}]}]})),
            &group,
            &registry,
        )
        .unwrap();
        assert_eq!(group.get_string("name").unwrap(), "admins");
        assert!(!group.has("children"));

        let err = decode(Some(&json!({"groups": []})), &group, &registry).unwrap_err();
        assert!(err.is_data_format());

        decode(Some(&json!({"refid": "g1", "name": "plain"})), &group, &registry).unwrap();
        assert_eq!(group.get_string("name").unwrap(), "plain");
    }

    #[test]
    fn pushed_response_clears_staged_values() {
        let registry = EntityRegistry::default();
        let parent = Entity::with_refid(EntityKind::category(), "blog", "c1");
        let node = Entity::category("blog");
        node.set_new_acl(Acl::new().with("all", json!({"get": true})));
        node.set_new_parent(&parent).unwrap();

        let body = encode(&node);
        apply_pushed(&node, &object(json!({"refid": "c2", "name": "n"})), &body, &registry).unwrap();
        assert_eq!(node.refid(), "c2");
        assert!(node.pending_acl().is_none());
        assert!(node.pending_parent().is_none());
    }

    #[test]
    fn pushed_response_without_refid_keeps_existing() {
        let registry = EntityRegistry::default();
        let member = Entity::with_refid(EntityKind::member(), "club", "m1");
        let body = encode(&member);
        apply_pushed(&member, &object(json!({"name": "x"})), &body, &registry).unwrap();
        assert_eq!(member.refid(), "m1");
    }

    #[test]
    fn deleted_response_clears_refid() {
        let registry = EntityRegistry::default();
        let member = Entity::with_refid(EntityKind::member(), "club", "m1");
        apply_deleted(&member, &object(json!({"refid": "m1", "name": "gone"})), &registry).unwrap();
        assert_eq!(member.refid(), "");
        assert_eq!(member.get_string("name").unwrap(), "gone");
    }

    #[test]
    fn self_reference_does_not_deadlock() {
        let member = Entity::with_refid(EntityKind::member(), "club", "m1");
        member.put("me", &member);
        assert_eq!(encode(&member).document["me"], "m1");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn scalar() -> impl Strategy<Value = Json> {
            prop_oneof![
                Just(Json::Null),
                any::<bool>().prop_map(Json::Bool),
                any::<i64>().prop_map(Json::from),
                "[a-z ]{0,12}".prop_map(Json::String),
            ]
        }

        fn document() -> impl Strategy<Value = WireDocument> {
            let leaf = scalar();
            let json = leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Json::Array),
                    prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(|m| Json::Object(m.into_iter().collect())),
                ]
            });
            prop::collection::btree_map("[a-z]{1,8}", json, 0..6).prop_map(|m| {
                m.into_iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "acl" | "contents" | "created" | "modified"))
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn plain_documents_round_trip(doc in document()) {
                let registry = EntityRegistry::default();
                let member = Entity::member("club");
                decode_document(&doc, &member, &registry).unwrap();
                prop_assert_eq!(encode(&member).document, doc);
            }
        }
    }
}
