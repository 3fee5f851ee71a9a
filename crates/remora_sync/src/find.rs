//! Collection queries with automatic pagination.

use crate::error::{SyncError, SyncResult};
use crate::response::{interpret, lenient_int};
use crate::transport::{Request, Transport};
use remora_core::{wire, Entity, EntityKind, EntityRegistry, WireDocument};
use serde_json::Value as Json;
use tracing::{debug, trace};

/// Limit sent when every page is requested.
pub const FETCH_ALL_LIMIT: i64 = i32::MAX as i64;

/// A query against one collection.
///
/// Without a `limit` (or with `limit` 0) the paginator requests
/// [`FETCH_ALL_LIMIT`] items per page and follows `paginate` until the last
/// page. With a positive limit a single page is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    kind: EntityKind,
    instance_id: String,
    params: WireDocument,
}

impl FindQuery {
    /// Queries the collection of `kind` in an instance.
    pub fn new(kind: EntityKind, instance_id: impl Into<String>) -> Self {
        Self {
            kind,
            instance_id: instance_id.into(),
            params: WireDocument::new(),
        }
    }

    /// Blog entries.
    pub fn entries(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::entry(), instance_id)
    }

    /// Database records.
    pub fn records(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::record(), instance_id)
    }

    /// Members.
    pub fn members(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::member(), instance_id)
    }

    /// Categories.
    pub fn categories(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::category(), instance_id)
    }

    /// Member groups.
    pub fn groups(instance_id: impl Into<String>) -> Self {
        Self::new(EntityKind::group(), instance_id)
    }

    /// Sets a query parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replaces all query parameters.
    #[must_use]
    pub fn with_params(mut self, params: WireDocument) -> Self {
        self.params = params;
        self
    }

    /// Fetches a single page of at most `limit` items.
    #[must_use]
    pub fn with_limit(self, limit: u32) -> Self {
        self.with_param("limit", limit)
    }

    /// Starts at the given page.
    #[must_use]
    pub fn with_page(self, page: u32) -> Self {
        self.with_param("page", page)
    }

    /// Kind of the queried collection.
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Owning instance.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Query parameters.
    pub fn params(&self) -> &WireDocument {
        &self.params
    }

    fn fetches_all(&self) -> bool {
        self.params.get("limit").map_or(0, lenient_int) == 0
    }
}

/// Runs a query, appending each built entity to `found`.
///
/// On error `found` keeps what was accumulated before the failure.
pub(crate) fn run(
    transport: &dyn Transport,
    registry: &EntityRegistry,
    query: FindQuery,
    found: &mut Vec<Entity>,
) -> SyncResult<()> {
    let fetch_all = query.fetches_all();
    let FindQuery {
        kind,
        instance_id,
        mut params,
    } = query;
    if fetch_all {
        params.insert("limit".to_string(), Json::from(FETCH_ALL_LIMIT));
    }

    let path = kind.collection_path(&instance_id);
    let mut previous_page = 0;

    loop {
        trace!(path = %path, page = previous_page + 1, "requesting page");
        let request = Request::get(path.clone()).with_query(&params);
        let response = interpret(transport.request(&request))?;

        let items = response
            .get(kind.list_key())
            .and_then(Json::as_array)
            .ok_or_else(|| {
                SyncError::data_format(format!("response has no `{}` list", kind.list_key()))
            })?;

        for item in items {
            let object = item.as_object().ok_or_else(|| {
                SyncError::data_format(format!("`{}` element is not an object", kind.list_key()))
            })?;
            let refid = object.get("refid").and_then(Json::as_str).unwrap_or("");
            if refid.is_empty() {
                return Err(SyncError::data_format(format!(
                    "`{}` element has no refid",
                    kind.list_key()
                )));
            }
            let entity = registry
                .construct(kind.wire_tag(), &instance_id, refid)
                .unwrap_or_else(|| Entity::with_refid(kind.clone(), instance_id.as_str(), refid));
            wire::apply_fetched(&entity, object, registry)?;
            found.push(entity);
        }

        if !fetch_all {
            break;
        }

        let paginate = response
            .get("paginate")
            .and_then(Json::as_object)
            .ok_or_else(|| SyncError::data_format("response has no `paginate` object"))?;
        let page = paginate.get("page").map_or(0, lenient_int);
        if page != previous_page + 1 {
            return Err(SyncError::data_format(format!(
                "expected page {}, got {page}",
                previous_page + 1
            )));
        }
        let page_count = paginate.get("pageCount").map_or(0, lenient_int);
        if page_count <= 0 {
            return Err(SyncError::data_format(format!(
                "invalid pageCount {page_count}"
            )));
        }
        if page >= page_count {
            break;
        }
        previous_page = page;
        params.insert("page".to_string(), Json::from(page + 1));
    }

    debug!(path = %path, found = found.len(), "find complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    fn page(items: Json, page: i64, page_count: i64) -> Json {
        json!({"members": items, "paginate": {"page": page, "pageCount": page_count}})
    }

    fn run_query(transport: &MockTransport, query: FindQuery) -> (Vec<Entity>, SyncResult<()>) {
        let mut found = Vec::new();
        let result = run(transport, &EntityRegistry::default(), query, &mut found);
        (found, result)
    }

    #[test]
    fn fetches_all_pages() {
        let transport = MockTransport::new();
        transport.push_json(200, page(json!([{"refid": "a"}]), 1, 3));
        transport.push_json(200, page(json!([{"refid": "b"}]), 2, 3));
        transport.push_json(200, page(json!([{"refid": "c"}]), 3, 3));

        let (found, result) = run_query(&transport, FindQuery::members("club"));
        result.unwrap();
        let refids: Vec<_> = found.iter().map(Entity::refid).collect();
        assert_eq!(refids, ["a", "b", "c"]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].path, "club/members");
        assert_eq!(requests[0].query_param("limit"), Some("2147483647"));
        assert_eq!(requests[0].query_param("page"), None);
        assert_eq!(requests[1].query_param("page"), Some("2"));
        assert_eq!(requests[2].query_param("page"), Some("3"));
    }

    #[test]
    fn repeated_page_is_fatal() {
        let transport = MockTransport::new();
        transport.push_json(200, page(json!([{"refid": "a"}]), 1, 3));
        transport.push_json(200, page(json!([{"refid": "b"}]), 1, 3));

        let (found, result) = run_query(&transport, FindQuery::members("club"));
        assert!(result.unwrap_err().is_data_format());
        assert_eq!(found.len(), 2);
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn explicit_limit_fetches_one_page() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"members": [{"refid": "a"}, {"refid": "b"}]}));

        let (found, result) = run_query(&transport, FindQuery::members("club").with_limit(2));
        result.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(transport.requests()[0].query_param("limit"), Some("2"));
    }

    #[test]
    fn zero_limit_means_all() {
        let query = FindQuery::members("club").with_limit(0);
        assert!(query.fetches_all());
        assert!(!FindQuery::members("club").with_param("limit", "5").fetches_all());
    }

    #[test]
    fn strict_element_checks() {
        for body in [
            json!({"members": [{"name": "no refid"}], "paginate": {"page": 1, "pageCount": 1}}),
            json!({"members": [{"refid": ""}], "paginate": {"page": 1, "pageCount": 1}}),
            json!({"members": ["a"], "paginate": {"page": 1, "pageCount": 1}}),
            json!({"paginate": {"page": 1, "pageCount": 1}}),
            json!({"members": []}),
            json!({"members": [], "paginate": {"page": 1, "pageCount": 0}}),
        ] {
            let transport = MockTransport::new();
            transport.push_json(200, body);
            let (_, result) = run_query(&transport, FindQuery::members("club"));
            assert!(result.unwrap_err().is_data_format());
        }
    }

    #[test]
    fn empty_collection() {
        let transport = MockTransport::new();
        transport.push_json(200, page(json!([]), 1, 1));
        let (found, result) = run_query(&transport, FindQuery::members("club"));
        result.unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn elements_are_decoded() {
        let transport = MockTransport::new();
        transport.push_json(
            200,
            json!({
                "entries": [{"refid": "e1", "title": "hi", "created": "2024-01-02 03:04:05", "categories": []}],
                "paginate": {"page": 1, "pageCount": 1}
            }),
        );
        let (found, result) = run_query(&transport, FindQuery::entries("blog"));
        result.unwrap();
        assert_eq!(found[0].kind(), &EntityKind::entry());
        assert_eq!(found[0].get_string("title").unwrap(), "hi");
        assert!(found[0].get_date("created").is_ok());
    }
}
