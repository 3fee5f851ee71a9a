//! CBOR snapshots of entities.
//!
//! A snapshot captures everything needed to rebuild an entity in another
//! process: kind, instance, refid, fields, ACLs and the staged parent.
//! Local file payloads are kept. Embedded entities are stored as detached
//! references (kind, instance and refid only).

use crate::acl::Acl;
use crate::date::Timestamp;
use crate::entity::{Entity, EntityState};
use crate::error::{CoreError, CoreResult};
use crate::factory::EntityRegistry;
use crate::file::FileRef;
use crate::kind::{EntityKind, Shape};
use crate::value::{Fields, Value};
use crate::wire::WireDocument;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct EntitySnapshot {
    version: u8,
    kind: KindSnapshot,
    instance_id: String,
    refid: String,
    fields: Vec<(String, SnapshotValue)>,
    current_acl: Option<Acl>,
    pending_acl: Option<Acl>,
    pending_parent: Option<ReferenceSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KindSnapshot {
    wire_tag: String,
    resource_type: String,
    list_key: String,
    shape: ShapeSnapshot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ShapeSnapshot {
    Plain,
    Contents,
    Tree,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReferenceSnapshot {
    kind: KindSnapshot,
    instance_id: String,
    refid: String,
}

#[derive(Debug, Serialize, Deserialize)]
enum SnapshotValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Array(Vec<SnapshotValue>),
    Map(Vec<(String, SnapshotValue)>),
    Date(String),
    File {
        remote: Option<WireDocument>,
        file_name: Option<String>,
        content_type: Option<String>,
        local: Option<Bytes>,
    },
    Reference(ReferenceSnapshot),
}

/// Serializes an entity to CBOR bytes.
///
/// # Errors
///
/// Returns a snapshot error if serialization fails.
pub fn encode(entity: &Entity) -> CoreResult<Vec<u8>> {
    let state = entity.read_state().clone();
    let snapshot = EntitySnapshot {
        version: SNAPSHOT_VERSION,
        kind: KindSnapshot::from_kind(entity.kind()),
        instance_id: entity.instance_id().to_string(),
        refid: state.refid,
        fields: fields_to_snapshot(&state.fields),
        current_acl: state.current_acl,
        pending_acl: state.pending_acl,
        pending_parent: state.pending_parent.as_ref().map(ReferenceSnapshot::from_entity),
    };

    let mut out = Vec::new();
    ciborium::into_writer(&snapshot, &mut out).map_err(|e| CoreError::snapshot(e.to_string()))?;
    Ok(out)
}

/// Rebuilds an entity from CBOR bytes.
///
/// Kinds are resolved through `registry` first, so custom constructors
/// apply; unknown tags fall back to the kind stored in the snapshot.
///
/// # Errors
///
/// Returns a snapshot error if the bytes are not a snapshot of a supported
/// version or a stored date is malformed.
pub fn decode(bytes: &[u8], registry: &EntityRegistry) -> CoreResult<Entity> {
    let snapshot: EntitySnapshot =
        ciborium::from_reader(bytes).map_err(|e| CoreError::snapshot(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(CoreError::snapshot(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    let state = EntityState {
        refid: snapshot.refid,
        fields: fields_from_snapshot(snapshot.fields, registry)?,
        current_acl: snapshot.current_acl,
        pending_acl: snapshot.pending_acl,
        pending_parent: snapshot
            .pending_parent
            .map(|parent| parent.into_entity(registry)),
    };

    let kind = registry
        .kind(&snapshot.kind.wire_tag)
        .unwrap_or_else(|| snapshot.kind.into_kind());
    Ok(Entity::from_state(kind, snapshot.instance_id, state))
}

impl KindSnapshot {
    fn from_kind(kind: &EntityKind) -> Self {
        Self {
            wire_tag: kind.wire_tag().to_string(),
            resource_type: kind.resource_type().to_string(),
            list_key: kind.list_key().to_string(),
            shape: match kind.shape() {
                Shape::Plain => ShapeSnapshot::Plain,
                Shape::Contents => ShapeSnapshot::Contents,
                Shape::Tree => ShapeSnapshot::Tree,
            },
        }
    }

    fn into_kind(self) -> EntityKind {
        let shape = match self.shape {
            ShapeSnapshot::Plain => Shape::Plain,
            ShapeSnapshot::Contents => Shape::Contents,
            ShapeSnapshot::Tree => Shape::Tree,
        };
        EntityKind::new(self.wire_tag, self.resource_type, shape).with_list_key(self.list_key)
    }
}

impl ReferenceSnapshot {
    fn from_entity(entity: &Entity) -> Self {
        Self {
            kind: KindSnapshot::from_kind(entity.kind()),
            instance_id: entity.instance_id().to_string(),
            refid: entity.refid(),
        }
    }

    fn into_entity(self, registry: &EntityRegistry) -> Entity {
        registry
            .construct(&self.kind.wire_tag, &self.instance_id, &self.refid)
            .unwrap_or_else(|| Entity::with_refid(self.kind.into_kind(), self.instance_id, self.refid))
    }
}

fn fields_to_snapshot(fields: &Fields) -> Vec<(String, SnapshotValue)> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value_to_snapshot(value)))
        .collect()
}

fn value_to_snapshot(value: &Value) -> SnapshotValue {
    match value {
        Value::Null => SnapshotValue::Null,
        Value::Bool(b) => SnapshotValue::Bool(*b),
        Value::Integer(n) => SnapshotValue::Integer(*n),
        Value::Float(f) => SnapshotValue::Float(*f),
        Value::Text(s) => SnapshotValue::Text(s.clone()),
        Value::Array(items) => SnapshotValue::Array(items.iter().map(value_to_snapshot).collect()),
        Value::Map(fields) => SnapshotValue::Map(fields_to_snapshot(fields)),
        Value::Date(ts) => SnapshotValue::Date(ts.to_wire_string()),
        Value::File(file) => SnapshotValue::File {
            remote: file.remote().cloned(),
            file_name: file.file_name().map(str::to_string),
            content_type: file.content_type().map(str::to_string),
            local: file.local_bytes().cloned(),
        },
        Value::Reference(entity) => SnapshotValue::Reference(ReferenceSnapshot::from_entity(entity)),
    }
}

fn fields_from_snapshot(
    fields: Vec<(String, SnapshotValue)>,
    registry: &EntityRegistry,
) -> CoreResult<Fields> {
    let mut out = Fields::with_capacity(fields.len());
    for (name, value) in fields {
        out.insert(name, value_from_snapshot(value, registry)?);
    }
    Ok(out)
}

fn value_from_snapshot(value: SnapshotValue, registry: &EntityRegistry) -> CoreResult<Value> {
    Ok(match value {
        SnapshotValue::Null => Value::Null,
        SnapshotValue::Bool(b) => Value::Bool(b),
        SnapshotValue::Integer(n) => Value::Integer(n),
        SnapshotValue::Float(f) => Value::Float(f),
        SnapshotValue::Text(s) => Value::Text(s),
        SnapshotValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| value_from_snapshot(item, registry))
                .collect::<CoreResult<_>>()?,
        ),
        SnapshotValue::Map(fields) => Value::Map(fields_from_snapshot(fields, registry)?),
        SnapshotValue::Date(s) => Value::Date(
            Timestamp::parse(&s).map_err(|e| CoreError::snapshot(e.to_string()))?,
        ),
        SnapshotValue::File {
            remote,
            file_name,
            content_type,
            local,
        } => Value::File(FileRef::from_parts(remote, file_name, content_type, local)),
        SnapshotValue::Reference(reference) => Value::Reference(reference.into_entity(registry)),
    })
}
