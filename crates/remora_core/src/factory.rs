//! Polymorphic construction of entities from server documents.

use crate::entity::Entity;
use crate::kind::EntityKind;
use crate::wire;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds an existing entity from `(instance_id, refid)`.
pub type Constructor = Arc<dyn Fn(&str, &str) -> Entity + Send + Sync>;

/// Maps wire tags (`resource_type` values) to entity constructors.
///
/// The default registry knows the five built-in kinds. Further kinds are
/// added with [`register`](Self::register), or with
/// [`register_constructor`](Self::register_constructor) when a custom
/// constructor is needed.
#[derive(Clone)]
pub struct EntityRegistry {
    constructors: HashMap<String, Constructor>,
    kinds: HashMap<String, EntityKind>,
}

impl EntityRegistry {
    /// Creates a registry with no kinds at all.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
            kinds: HashMap::new(),
        }
    }

    /// Registers a kind under its wire tag, replacing any previous entry.
    pub fn register(&mut self, kind: EntityKind) -> &mut Self {
        let tag = kind.wire_tag().to_string();
        let ctor_kind = kind.clone();
        self.constructors.insert(
            tag.clone(),
            Arc::new(move |instance_id: &str, refid: &str| {
                Entity::with_refid(ctor_kind.clone(), instance_id, refid)
            }),
        );
        self.kinds.insert(tag, kind);
        self
    }

    /// Registers a custom constructor for a wire tag.
    pub fn register_constructor(
        &mut self,
        wire_tag: impl Into<String>,
        constructor: Constructor,
    ) -> &mut Self {
        self.constructors.insert(wire_tag.into(), constructor);
        self
    }

    /// Returns true if the tag has a constructor.
    pub fn contains(&self, wire_tag: &str) -> bool {
        self.constructors.contains_key(wire_tag)
    }

    /// The kind registered under a tag, if it was registered with
    /// [`register`](Self::register).
    pub fn kind(&self, wire_tag: &str) -> Option<EntityKind> {
        self.kinds.get(wire_tag).cloned()
    }

    /// Builds an empty existing entity of the given tag.
    pub fn construct(&self, wire_tag: &str, instance_id: &str, refid: &str) -> Option<Entity> {
        self.constructors
            .get(wire_tag)
            .map(|ctor| ctor(instance_id, refid))
    }

    /// Builds and decodes an entity from an embedded instance object.
    ///
    /// The object must carry `refid`, `resource_type` and a `url_path`
    /// whose first segment names the instance. Returns `None` when any of
    /// them is missing, the refid is empty, the tag is unknown, or decoding
    /// fails.
    pub fn create(&self, json: &Json) -> Option<Entity> {
        let Some(object) = json.as_object() else {
            debug!("embedded instance is not an object");
            return None;
        };
        let text = |key: &str| object.get(key).and_then(Json::as_str);

        let (Some(refid), Some(tag), Some(url_path)) =
            (text("refid"), text("resource_type"), text("url_path"))
        else {
            debug!("embedded instance lacks refid, resource_type or url_path");
            return None;
        };
        if refid.is_empty() {
            debug!(resource_type = tag, "embedded instance has an empty refid");
            return None;
        }
        let Some(instance_id) = instance_id_from_url_path(url_path) else {
            debug!(url_path, "embedded instance has a malformed url_path");
            return None;
        };
        let Some(entity) = self.construct(tag, instance_id, refid) else {
            debug!(resource_type = tag, "no constructor for embedded instance");
            return None;
        };
        match wire::decode_document(object, &entity, self) {
            Ok(()) => Some(entity),
            Err(e) => {
                debug!(refid, error = %e, "embedded instance failed to decode");
                None
            }
        }
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in EntityKind::builtins() {
            registry.register(kind);
        }
        registry
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("EntityRegistry").field("tags", &tags).finish()
    }
}

/// Extracts the instance id from a `url_path` such as `/inst42/members/x1`.
pub fn instance_id_from_url_path(url_path: &str) -> Option<&str> {
    let rest = url_path.strip_prefix('/')?;
    let segment = rest.split('/').next()?;
    (!segment.is_empty()).then_some(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Shape;
    use serde_json::json;

    #[test]
    fn url_path_pattern() {
        assert_eq!(instance_id_from_url_path("/inst42/members/x1"), Some("inst42"));
        assert_eq!(instance_id_from_url_path("/inst42"), Some("inst42"));
        assert_eq!(instance_id_from_url_path("inst42/members"), None);
        assert_eq!(instance_id_from_url_path("//members"), None);
        assert_eq!(instance_id_from_url_path(""), None);
    }

    #[test]
    fn creates_member() {
        let registry = EntityRegistry::default();
        let entity = registry
            .create(&json!({
                "refid": "x1",
                "resource_type": "member",
                "url_path": "/inst42/members/x1",
                "login_id": "ann"
            }))
            .unwrap();
        assert_eq!(entity.kind(), &EntityKind::member());
        assert_eq!(entity.instance_id(), "inst42");
        assert_eq!(entity.refid(), "x1");
        assert_eq!(entity.get_string("login_id").unwrap(), "ann");
    }

    #[test]
    fn swallows_bad_input() {
        let registry = EntityRegistry::default();
        assert!(registry.create(&json!("x1")).is_none());
        assert!(registry
            .create(&json!({"refid": "x1", "resource_type": "member"}))
            .is_none());
        assert!(registry
            .create(&json!({"refid": "", "resource_type": "member", "url_path": "/i/members/"}))
            .is_none());
        assert!(registry
            .create(&json!({"refid": "x1", "resource_type": "member", "url_path": "members"}))
            .is_none());
        assert!(registry
            .create(&json!({"refid": "x1", "resource_type": "widget", "url_path": "/i/w/x1"}))
            .is_none());
        assert!(registry
            .create(&json!({"refid": "g1", "resource_type": "group", "url_path": "/i/groups/g1", "groups": []}))
            .is_none());
    }

    #[test]
    fn custom_kinds() {
        let mut registry = EntityRegistry::empty();
        assert!(registry.construct("member", "i", "m").is_none());

        let widget = EntityKind::new("widget", "widgets", Shape::Plain);
        registry.register(widget.clone());
        registry.register_constructor(
            "gadget",
            Arc::new(|instance: &str, refid: &str| {
                Entity::with_refid(EntityKind::new("gadget", "gadgets", Shape::Plain), instance, refid)
            }),
        );

        assert_eq!(registry.kind("widget"), Some(widget));
        assert!(registry.kind("gadget").is_none());
        let gadget = registry
            .create(&json!({"refid": "g", "resource_type": "gadget", "url_path": "/i/gadgets/g"}))
            .unwrap();
        assert_eq!(gadget.resource_type(), "gadgets");
    }
}
