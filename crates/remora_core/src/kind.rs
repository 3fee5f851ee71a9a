//! Resource kinds.

use std::borrow::Cow;
use std::fmt;

/// How a kind of entity deviates from the plain document model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Fields are sent and received as is.
    Plain,
    /// Content objects (entries, records): the `categories` field holds
    /// references to category entities.
    Contents,
    /// Tree nodes (categories, groups): responses may arrive in tree form,
    /// children are discarded and a staged parent is sent as
    /// `parent_refid`.
    Tree,
}

/// Describes one kind of remote resource.
///
/// The wire tag is what the server reports in `resource_type`; the
/// resource type is the path segment used to address the collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKind {
    wire_tag: Cow<'static, str>,
    resource_type: Cow<'static, str>,
    list_key: Cow<'static, str>,
    shape: Shape,
}

impl EntityKind {
    /// Blog entries.
    pub const ENTRY: EntityKind = EntityKind::builtin("entry", "entries", Shape::Contents);
    /// Database records.
    pub const RECORD: EntityKind = EntityKind::builtin("record", "records", Shape::Contents);
    /// Members.
    pub const MEMBER: EntityKind = EntityKind::builtin("member", "members", Shape::Plain);
    /// Content categories.
    pub const CATEGORY: EntityKind = EntityKind::builtin("category", "categories", Shape::Tree);
    /// Member groups.
    pub const GROUP: EntityKind = EntityKind::builtin("group", "groups", Shape::Tree);

    const fn builtin(wire_tag: &'static str, resource_type: &'static str, shape: Shape) -> Self {
        Self {
            wire_tag: Cow::Borrowed(wire_tag),
            resource_type: Cow::Borrowed(resource_type),
            list_key: Cow::Borrowed(resource_type),
            shape,
        }
    }

    /// Creates a custom kind. The list key defaults to the resource type.
    pub fn new(
        wire_tag: impl Into<Cow<'static, str>>,
        resource_type: impl Into<Cow<'static, str>>,
        shape: Shape,
    ) -> Self {
        let resource_type = resource_type.into();
        Self {
            wire_tag: wire_tag.into(),
            list_key: resource_type.clone(),
            resource_type,
            shape,
        }
    }

    /// Overrides the name of the array field holding list results.
    #[must_use]
    pub fn with_list_key(mut self, list_key: impl Into<Cow<'static, str>>) -> Self {
        self.list_key = list_key.into();
        self
    }

    /// Shorthand for [`EntityKind::ENTRY`].
    pub fn entry() -> Self {
        Self::ENTRY
    }

    /// Shorthand for [`EntityKind::RECORD`].
    pub fn record() -> Self {
        Self::RECORD
    }

    /// Shorthand for [`EntityKind::MEMBER`].
    pub fn member() -> Self {
        Self::MEMBER
    }

    /// Shorthand for [`EntityKind::CATEGORY`].
    pub fn category() -> Self {
        Self::CATEGORY
    }

    /// Shorthand for [`EntityKind::GROUP`].
    pub fn group() -> Self {
        Self::GROUP
    }

    /// The kinds every default registry knows.
    pub fn builtins() -> [EntityKind; 5] {
        [
            Self::ENTRY,
            Self::RECORD,
            Self::MEMBER,
            Self::CATEGORY,
            Self::GROUP,
        ]
    }

    /// Discriminator reported by the server in `resource_type`.
    pub fn wire_tag(&self) -> &str {
        &self.wire_tag
    }

    /// Path segment of the collection.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Array field holding results on list endpoints.
    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    /// Structural behavior of this kind.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Returns true for tree nodes.
    pub fn is_tree(&self) -> bool {
        self.shape == Shape::Tree
    }

    /// Returns true for content objects.
    pub fn is_contents(&self) -> bool {
        self.shape == Shape::Contents
    }

    /// `{instance_id}/{resource_type}`
    pub fn collection_path(&self, instance_id: &str) -> String {
        format!("{}/{}", instance_id, self.resource_type)
    }

    /// `{instance_id}/{resource_type}/{refid}`, or the collection path when
    /// `refid` is empty.
    pub fn resource_path(&self, instance_id: &str, refid: &str) -> String {
        if refid.is_empty() {
            self.collection_path(instance_id)
        } else {
            format!("{}/{}/{}", instance_id, self.resource_type, refid)
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kinds() {
        assert_eq!(EntityKind::member().resource_type(), "members");
        assert_eq!(EntityKind::category().wire_tag(), "category");
        assert_eq!(EntityKind::group().list_key(), "groups");
        assert!(EntityKind::group().is_tree());
        assert!(EntityKind::record().is_contents());
        assert_eq!(EntityKind::builtins().len(), 5);
    }

    #[test]
    fn paths() {
        let kind = EntityKind::entry();
        assert_eq!(kind.collection_path("blog"), "blog/entries");
        assert_eq!(kind.resource_path("blog", "e1"), "blog/entries/e1");
        assert_eq!(kind.resource_path("blog", ""), "blog/entries");
    }

    #[test]
    fn custom_kind() {
        let kind = EntityKind::new("coupon", "coupons", Shape::Plain).with_list_key("items");
        assert_eq!(kind.resource_type(), "coupons");
        assert_eq!(kind.list_key(), "items");
        assert_eq!(kind.to_string(), "coupon");
    }
}
