//! Local mirror of a remote resource.

use crate::acl::Acl;
use crate::date::Timestamp;
use crate::error::{CoreError, CoreResult};
use crate::factory::EntityRegistry;
use crate::file::FileRef;
use crate::kind::EntityKind;
use crate::value::{Fields, Value};
use crate::wire::{self, WireDocument};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A shared handle on one remote resource instance.
///
/// Cloning an `Entity` clones the handle, not the resource: every clone
/// observes the same fields, refid and ACL. Two handles compare equal only
/// if they point at the same instance.
///
/// Each instance owns one exclusion lock. Every network operation on the
/// entity holds it for its whole duration (see [`Entity::lock_operations`]),
/// so operations on the same entity never interleave. Field setters do not
/// take that lock.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

struct EntityInner {
    local_id: Uuid,
    instance_id: String,
    kind: EntityKind,
    operations: Mutex<()>,
    state: RwLock<EntityState>,
}

/// Mutable part of an entity.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityState {
    pub(crate) refid: String,
    pub(crate) fields: Fields,
    pub(crate) current_acl: Option<Acl>,
    pub(crate) pending_acl: Option<Acl>,
    pub(crate) pending_parent: Option<Entity>,
}

/// Proof that the holder is the only operation running on an entity.
pub struct OperationGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl Entity {
    /// Creates a new, unsaved entity.
    pub fn new(kind: EntityKind, instance_id: impl Into<String>) -> Self {
        Self::from_state(kind, instance_id.into(), EntityState::default())
    }

    /// Creates a handle on an existing resource without fetching it.
    pub fn with_refid(
        kind: EntityKind,
        instance_id: impl Into<String>,
        refid: impl Into<String>,
    ) -> Self {
        let refid = refid.into();
        let mut fields = Fields::new();
        if !refid.is_empty() {
            fields.insert("refid", refid.as_str());
        }
        Self::from_state(
            kind,
            instance_id.into(),
            EntityState {
                refid,
                fields,
                ..EntityState::default()
            },
        )
    }

    /// Creates an existing entity and decodes a server document into it.
    ///
    /// # Errors
    ///
    /// Returns a data format error if the document cannot be decoded for
    /// this kind.
    pub fn from_wire(
        kind: EntityKind,
        instance_id: impl Into<String>,
        refid: impl Into<String>,
        document: &WireDocument,
        registry: &EntityRegistry,
    ) -> CoreResult<Self> {
        let entity = Self::with_refid(kind, instance_id, refid);
        wire::decode_document(document, &entity, registry)?;
        Ok(entity)
    }

    pub(crate) fn from_state(kind: EntityKind, instance_id: String, state: EntityState) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                local_id: Uuid::new_v4(),
                instance_id,
                kind,
                operations: Mutex::new(()),
                state: RwLock::new(state),
            }),
        }
    }

    /// New blog entry.
    pub fn entry(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::entry(), instance_id)
    }

    /// New database record.
    pub fn record(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::record(), instance_id)
    }

    /// New member.
    pub fn member(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::member(), instance_id)
    }

    /// New content category.
    pub fn category(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::category(), instance_id)
    }

    /// New member group.
    pub fn group(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::group(), instance_id)
    }

    // Identity

    /// Process-local identifier, stable for the lifetime of the handle.
    pub fn local_id(&self) -> Uuid {
        self.inner.local_id
    }

    /// Owning instance (tenant / collection).
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Kind of resource.
    pub fn kind(&self) -> &EntityKind {
        &self.inner.kind
    }

    /// Path segment of the resource collection.
    pub fn resource_type(&self) -> &str {
        self.inner.kind.resource_type()
    }

    /// Server-assigned id; empty until the first successful push.
    pub fn refid(&self) -> String {
        self.inner.state.read().refid.clone()
    }

    /// Returns true if the entity exists on the server.
    pub fn is_persisted(&self) -> bool {
        !self.inner.state.read().refid.is_empty()
    }

    /// `{instance}/{type}/{refid}`, or `{instance}/{type}` when unsaved.
    pub fn resource_path(&self) -> String {
        self.inner
            .kind
            .resource_path(&self.inner.instance_id, &self.refid())
    }

    /// Returns true if both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Acquires the exclusion lock, blocking while another operation on
    /// this entity is running.
    pub fn lock_operations(&self) -> OperationGuard<'_> {
        OperationGuard {
            _guard: self.inner.operations.lock(),
        }
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, EntityState> {
        self.inner.state.read()
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.inner.state.write()
    }

    // Access control

    /// ACL reported by the last successful fetch or push.
    pub fn acl(&self) -> Option<Acl> {
        self.inner.state.read().current_acl.clone()
    }

    /// Stages a new ACL, sent with the next push.
    pub fn set_new_acl(&self, acl: Acl) {
        self.inner.state.write().pending_acl = Some(acl);
    }

    /// The staged ACL, if any.
    pub fn pending_acl(&self) -> Option<Acl> {
        self.inner.state.read().pending_acl.clone()
    }

    /// Stages a new parent node, sent as `parent_refid` with the next push.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless both entities are tree nodes of the
    /// same kind.
    pub fn set_new_parent(&self, parent: &Entity) -> CoreResult<()> {
        if !self.inner.kind.is_tree() {
            return Err(CoreError::invalid_operation(format!(
                "`{}` entities have no parent",
                self.inner.kind
            )));
        }
        if parent.kind() != self.kind() {
            return Err(CoreError::invalid_operation(format!(
                "a `{}` cannot be the parent of a `{}`",
                parent.kind(),
                self.kind()
            )));
        }
        self.inner.state.write().pending_parent = Some(parent.clone());
        Ok(())
    }

    /// The staged parent, if any.
    pub fn pending_parent(&self) -> Option<Entity> {
        self.inner.state.read().pending_parent.clone()
    }

    // Field map

    /// Sets a field, replacing any previous value.
    pub fn put(&self, name: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.inner.state.write().fields.insert(name, value);
        self
    }

    /// Sets a field only when a value is given.
    pub fn put_opt<V: Into<Value>>(&self, name: impl Into<String>, value: Option<V>) -> &Self {
        if let Some(value) = value {
            self.put(name, value);
        }
        self
    }

    /// Appends to the array under `name`, turning a scalar into a two
    /// element array, or inserts the value if the field is absent.
    pub fn accumulate(&self, name: impl Into<String>, value: impl Into<Value>) -> &Self {
        let name = name.into();
        let value = value.into();
        let mut state = self.inner.state.write();
        match state.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = std::mem::replace(existing, Value::Null);
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                state.fields.insert(name, value);
            }
        }
        drop(state);
        self
    }

    /// Removes a field, returning its value.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.inner.state.write().fields.remove(name)
    }

    /// Returns true if the field is present (it may be null).
    pub fn has(&self, name: &str) -> bool {
        self.inner.state.read().fields.contains_key(name)
    }

    /// Returns true if the field is absent or null.
    pub fn is_null(&self, name: &str) -> bool {
        self.inner
            .state
            .read()
            .fields
            .get(name)
            .map_or(true, Value::is_null)
    }

    /// Field names in order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .state
            .read()
            .fields
            .keys()
            .map(str::to_string)
            .collect()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.inner.state.read().fields.len()
    }

    /// Returns true if the entity has no fields.
    pub fn is_empty(&self) -> bool {
        self.inner.state.read().fields.is_empty()
    }

    /// Copy of the whole field map.
    pub fn fields(&self) -> Fields {
        self.inner.state.read().fields.clone()
    }

    /// Compact JSON rendering of the field map.
    pub fn to_json_string(&self) -> String {
        Value::Map(self.fields()).to_json().to_string()
    }

    // Strict getters

    fn strict<T>(
        &self,
        name: &str,
        expected: &'static str,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> CoreResult<T> {
        let state = self.inner.state.read();
        let value = state
            .fields
            .get(name)
            .ok_or_else(|| CoreError::missing_field(name))?;
        convert(value).ok_or_else(|| CoreError::field_access(name, expected))
    }

    /// Returns the raw value of a field.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` if the field is absent.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        self.strict(name, "set", |v| Some(v.clone()))
    }

    /// Returns a field coerced to a boolean.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not coercible.
    pub fn get_bool(&self, name: &str) -> CoreResult<bool> {
        self.strict(name, "a boolean", Value::coerce_bool)
    }

    /// Returns a field coerced to an i32.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent, not numeric, or out of range.
    pub fn get_i32(&self, name: &str) -> CoreResult<i32> {
        self.strict(name, "an i32", |v| {
            v.coerce_i64().and_then(|n| i32::try_from(n).ok())
        })
    }

    /// Returns a field coerced to an i64.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not numeric.
    pub fn get_i64(&self, name: &str) -> CoreResult<i64> {
        self.strict(name, "an i64", Value::coerce_i64)
    }

    /// Returns a field coerced to an f64.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not numeric.
    pub fn get_f64(&self, name: &str) -> CoreResult<f64> {
        self.strict(name, "a number", Value::coerce_f64)
    }

    /// Returns a field coerced to a string.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent, null, or not a scalar.
    pub fn get_string(&self, name: &str) -> CoreResult<String> {
        self.strict(name, "a string", Value::coerce_string)
    }

    /// Returns an array field.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not an array.
    pub fn get_array(&self, name: &str) -> CoreResult<Vec<Value>> {
        self.strict(name, "an array", |v| v.as_array().map(<[Value]>::to_vec))
    }

    /// Returns a map field.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not a map.
    pub fn get_map(&self, name: &str) -> CoreResult<Fields> {
        self.strict(name, "a map", |v| v.as_map().cloned())
    }

    /// Returns a date field; a well-formed date string also qualifies.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not a date.
    pub fn get_date(&self, name: &str) -> CoreResult<Timestamp> {
        self.strict(name, "a date", |v| match v {
            Value::Date(ts) => Some(*ts),
            Value::Text(s) => Timestamp::parse(s).ok(),
            _ => None,
        })
    }

    /// Returns a file field.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not a file.
    pub fn get_file(&self, name: &str) -> CoreResult<FileRef> {
        self.strict(name, "a file", |v| v.as_file().cloned())
    }

    /// Returns an embedded entity.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or not an entity reference.
    pub fn get_reference(&self, name: &str) -> CoreResult<Entity> {
        self.strict(name, "an entity reference", |v| v.as_reference().cloned())
    }

    // Lenient getters

    fn lenient<T>(&self, name: &str, convert: impl FnOnce(&Value) -> Option<T>) -> Option<T> {
        self.inner.state.read().fields.get(name).and_then(convert)
    }

    /// Returns the raw value of a field, if present.
    pub fn opt(&self, name: &str) -> Option<Value> {
        self.lenient(name, |v| Some(v.clone()))
    }

    /// Boolean value or `false`.
    pub fn opt_bool(&self, name: &str) -> bool {
        self.opt_bool_or(name, false)
    }

    /// Boolean value or `fallback`.
    pub fn opt_bool_or(&self, name: &str, fallback: bool) -> bool {
        self.lenient(name, Value::coerce_bool).unwrap_or(fallback)
    }

    /// i32 value or `0`.
    pub fn opt_i32(&self, name: &str) -> i32 {
        self.opt_i32_or(name, 0)
    }

    /// i32 value or `fallback`.
    pub fn opt_i32_or(&self, name: &str, fallback: i32) -> i32 {
        self.lenient(name, |v| v.coerce_i64().and_then(|n| i32::try_from(n).ok()))
            .unwrap_or(fallback)
    }

    /// i64 value or `0`.
    pub fn opt_i64(&self, name: &str) -> i64 {
        self.opt_i64_or(name, 0)
    }

    /// i64 value or `fallback`.
    pub fn opt_i64_or(&self, name: &str, fallback: i64) -> i64 {
        self.lenient(name, Value::coerce_i64).unwrap_or(fallback)
    }

    /// f64 value or NaN.
    pub fn opt_f64(&self, name: &str) -> f64 {
        self.opt_f64_or(name, f64::NAN)
    }

    /// f64 value or `fallback`.
    pub fn opt_f64_or(&self, name: &str, fallback: f64) -> f64 {
        self.lenient(name, Value::coerce_f64).unwrap_or(fallback)
    }

    /// String value or the empty string.
    pub fn opt_string(&self, name: &str) -> String {
        self.opt_string_or(name, "")
    }

    /// String value or `fallback`.
    pub fn opt_string_or(&self, name: &str, fallback: &str) -> String {
        self.lenient(name, Value::coerce_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Array value, if the field holds one.
    pub fn opt_array(&self, name: &str) -> Option<Vec<Value>> {
        self.lenient(name, |v| v.as_array().map(<[Value]>::to_vec))
    }

    /// Map value, if the field holds one.
    pub fn opt_map(&self, name: &str) -> Option<Fields> {
        self.lenient(name, |v| v.as_map().cloned())
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Entity");
        out.field("kind", &self.inner.kind.wire_tag())
            .field("instance_id", &self.inner.instance_id);
        // Never block inside Debug; a writer may be this very thread.
        match self.inner.state.try_read() {
            Some(state) => out
                .field("refid", &state.refid)
                .field("fields", &state.fields.len()),
            None => out.field("state", &"<locked>"),
        };
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_is_unsaved() {
        let entity = Entity::entry("blog");
        assert_eq!(entity.refid(), "");
        assert!(!entity.is_persisted());
        assert!(entity.is_empty());
        assert_eq!(entity.resource_path(), "blog/entries");
    }

    #[test]
    fn existing_entity_carries_refid_field() {
        let entity = Entity::with_refid(EntityKind::member(), "club", "m1");
        assert!(entity.is_persisted());
        assert_eq!(entity.get_string("refid").unwrap(), "m1");
        assert_eq!(entity.resource_path(), "club/members/m1");
    }

    #[test]
    fn clones_share_state() {
        let a = Entity::record("db");
        let b = a.clone();
        a.put("name", "x");
        assert_eq!(b.get_string("name").unwrap(), "x");
        assert_eq!(a, b);
        assert_ne!(a, Entity::record("db"));
    }

    #[test]
    fn strict_getters_fail() {
        let entity = Entity::member("club");
        entity.put("age", "not a number").put("active", "yes");

        assert!(entity.get_i32("missing").unwrap_err().is_field_access());
        assert!(matches!(
            entity.get_i32("age"),
            Err(CoreError::FieldAccess { .. })
        ));
        assert!(entity.get_bool("active").is_err());
        assert!(entity.get_array("age").is_err());
    }

    #[test]
    fn strict_getters_coerce() {
        let entity = Entity::member("club");
        entity
            .put("age", "42")
            .put("ratio", 3)
            .put("flag", "true")
            .put("count", 7);

        assert_eq!(entity.get_i32("age").unwrap(), 42);
        assert_eq!(entity.get_f64("ratio").unwrap(), 3.0);
        assert!(entity.get_bool("flag").unwrap());
        assert_eq!(entity.get_string("count").unwrap(), "7");
    }

    #[test]
    fn lenient_getters_fall_back() {
        let entity = Entity::member("club");
        entity.put("name", Value::Null);

        assert_eq!(entity.opt_i32("missing"), 0);
        assert_eq!(entity.opt_i32_or("missing", 9), 9);
        assert!(!entity.opt_bool("missing"));
        assert!(entity.opt_f64("missing").is_nan());
        assert_eq!(entity.opt_string("missing"), "");
        assert_eq!(entity.opt_string_or("name", "anon"), "anon");
        assert!(entity.opt_array("missing").is_none());
        assert!(entity.has("name"));
        assert!(entity.is_null("name"));
        assert!(entity.is_null("missing"));
    }

    #[test]
    fn accumulate_builds_arrays() {
        let entity = Entity::record("db");
        entity.accumulate("tags", "a");
        assert_eq!(entity.get("tags").unwrap(), Value::from("a"));

        entity.accumulate("tags", "b").accumulate("tags", "c");
        assert_eq!(
            entity.get_array("tags").unwrap(),
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
    }

    #[test]
    fn keys_and_remove() {
        let entity = Entity::record("db");
        entity.put("b", 1).put("a", 2);
        assert_eq!(entity.keys(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(entity.remove("b"), Some(Value::Integer(1)));
        assert_eq!(entity.len(), 1);
        assert_eq!(entity.to_json_string(), r#"{"a":2}"#);
    }

    #[test]
    fn parent_only_for_tree_nodes() {
        let parent = Entity::category("blog");
        let child = Entity::category("blog");
        assert!(child.set_new_parent(&parent).is_ok());
        assert!(child.pending_parent().unwrap().ptr_eq(&parent));

        let entry = Entity::entry("blog");
        assert!(entry.set_new_parent(&parent).is_err());
        assert!(child.set_new_parent(&Entity::group("club")).is_err());
    }

    #[test]
    fn staging_acl() {
        let entity = Entity::entry("blog");
        assert!(entity.acl().is_none());
        entity.set_new_acl(Acl::new().with("all", serde_json::json!({"get": true})));
        assert!(entity.pending_acl().is_some());
        assert!(entity.acl().is_none());
    }
}
