//! The operation scheduler.

use crate::config::ClientConfig;
use crate::dispatch::{Dispatch, InlineDispatcher};
use crate::error::{SyncError, SyncResult};
use crate::find::{self, FindQuery};
use crate::response::interpret;
use crate::transport::{Method, Request, RequestBody, Transport};
use crate::worker;
use remora_core::{wire, Entity, EntityRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Runs `fetch`, `push`, `delete` and `find` against the REST API.
///
/// Every call runs on its own named worker thread. The blocking variants
/// wait for that thread; the `*_in_background` variants return at once and
/// hand the outcome to a callback through the configured [`Dispatch`].
///
/// Operations on one entity are serialized by the entity's operation lock,
/// held for the whole encode, request and decode cycle. Operations on
/// different entities run in parallel. Nothing is retried.
///
/// `Client` is cheap to clone; clones share the transport, registry and
/// dispatcher.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    registry: Arc<EntityRegistry>,
    dispatch: Arc<dyn Dispatch>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Creates a client with the default registry, inline callbacks and
    /// default configuration.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    /// Creates a client over a shared transport.
    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: Arc::new(EntityRegistry::default()),
            dispatch: Arc::new(InlineDispatcher),
            config: Arc::new(ClientConfig::default()),
        }
    }

    /// Uses a custom entity registry.
    #[must_use]
    pub fn with_registry(mut self, registry: EntityRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Delivers background callbacks through `dispatch`.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// The entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // Blocking operations

    /// Replaces the entity's fields with the server's copy.
    ///
    /// # Errors
    ///
    /// `NotPersisted` if the entity has no refid; otherwise any transport,
    /// remote or decode error.
    pub fn fetch(&self, entity: &Entity) -> SyncResult<()> {
        let client = self.clone();
        let entity = entity.clone();
        worker::run(&self.config, "fetch", move || client.fetch_now(&entity))
    }

    /// Creates (no refid) or updates the resource.
    ///
    /// # Errors
    ///
    /// Any transport, remote or decode error. Staged ACL and parent are
    /// kept on failure.
    pub fn push(&self, entity: &Entity) -> SyncResult<()> {
        let client = self.clone();
        let entity = entity.clone();
        worker::run(&self.config, "push", move || client.push_now(&entity))
    }

    /// Deletes the resource and clears the entity's refid.
    ///
    /// # Errors
    ///
    /// `NotPersisted` if the entity has no refid; otherwise any transport,
    /// remote or decode error.
    pub fn delete(&self, entity: &Entity) -> SyncResult<()> {
        let client = self.clone();
        let entity = entity.clone();
        worker::run(&self.config, "delete", move || client.delete_now(&entity))
    }

    /// Lists a collection.
    ///
    /// # Errors
    ///
    /// Any transport or remote error, or a data format error when the
    /// response breaks the list or pagination contract.
    pub fn find(&self, query: FindQuery) -> SyncResult<Vec<Entity>> {
        let client = self.clone();
        worker::run(&self.config, "find", move || {
            let mut found = Vec::new();
            find::run(client.transport.as_ref(), &client.registry, query, &mut found)?;
            Ok(found)
        })
    }

    // Background operations

    /// Background [`fetch`](Self::fetch).
    pub fn fetch_in_background<F>(&self, entity: &Entity, callback: F)
    where
        F: FnOnce(Entity, SyncResult<()>) + Send + 'static,
    {
        let client = self.clone();
        self.in_background("fetch", entity, callback, move |e| client.fetch_now(e));
    }

    /// Background [`push`](Self::push).
    pub fn push_in_background<F>(&self, entity: &Entity, callback: F)
    where
        F: FnOnce(Entity, SyncResult<()>) + Send + 'static,
    {
        let client = self.clone();
        self.in_background("push", entity, callback, move |e| client.push_now(e));
    }

    /// Background [`delete`](Self::delete).
    pub fn delete_in_background<F>(&self, entity: &Entity, callback: F)
    where
        F: FnOnce(Entity, SyncResult<()>) + Send + 'static,
    {
        let client = self.clone();
        self.in_background("delete", entity, callback, move |e| client.delete_now(e));
    }

    /// Background [`find`](Self::find). The callback receives everything
    /// accumulated before a failure together with the error.
    pub fn find_in_background<F>(&self, query: FindQuery, callback: F)
    where
        F: FnOnce(Vec<Entity>, SyncResult<()>) + Send + 'static,
    {
        let client = self.clone();
        worker::spawn(
            &self.config,
            "find",
            self.dispatch.clone(),
            move || {
                let mut found = Vec::new();
                let result =
                    find::run(client.transport.as_ref(), &client.registry, query, &mut found);
                Ok((found, result))
            },
            move |outcome| match outcome {
                Ok((found, result)) => callback(found, result),
                Err(e) => callback(Vec::new(), Err(e)),
            },
        );
    }

    fn in_background<F, W>(&self, label: &str, entity: &Entity, callback: F, work: W)
    where
        F: FnOnce(Entity, SyncResult<()>) + Send + 'static,
        W: FnOnce(&Entity) -> SyncResult<()> + Send + 'static,
    {
        let target = entity.clone();
        let delivered = entity.clone();
        worker::spawn(
            &self.config,
            label,
            self.dispatch.clone(),
            move || work(&target),
            move |outcome| callback(delivered, outcome),
        );
    }

    // Operation bodies, run on the worker thread

    fn fetch_now(&self, entity: &Entity) -> SyncResult<()> {
        let _guard = entity.lock_operations();
        if !entity.is_persisted() {
            return Err(SyncError::NotPersisted);
        }
        let path = entity.resource_path();
        debug!(path = %path, "fetch started");

        let document = interpret(self.transport.request(&Request::get(path.as_str())))?;
        wire::apply_fetched(entity, &document, &self.registry)?;

        debug!(path = %path, "fetch finished");
        Ok(())
    }

    fn push_now(&self, entity: &Entity) -> SyncResult<()> {
        let _guard = entity.lock_operations();
        let body = wire::encode(entity);
        let method = if entity.is_persisted() {
            Method::Put
        } else {
            Method::Post
        };
        let path = entity.resource_path();
        debug!(%method, path = %path, multipart = body.multipart, "push started");

        let request_body = if body.multipart {
            RequestBody::Multipart {
                document: body.document.clone(),
                files: body.files.clone(),
            }
        } else {
            RequestBody::Json(body.document.clone())
        };
        let request = Request::new(method, path.as_str()).with_body(request_body);
        let document = interpret(self.transport.request(&request))?;
        wire::apply_pushed(entity, &document, &body, &self.registry)?;

        debug!(refid = %entity.refid(), path = %path, "push finished");
        Ok(())
    }

    fn delete_now(&self, entity: &Entity) -> SyncResult<()> {
        let _guard = entity.lock_operations();
        if !entity.is_persisted() {
            return Err(SyncError::NotPersisted);
        }
        let path = entity.resource_path();
        debug!(path = %path, "delete started");

        let document = interpret(self.transport.request(&Request::delete(path.as_str())))?;
        wire::apply_deleted(entity, &document, &self.registry)?;

        debug!(path = %path, "delete finished");
        Ok(())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::QueueDispatcher;
    use crate::error::RemoteErrorKind;
    use crate::transport::MockTransport;
    use remora_core::{Acl, EntityKind};
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    fn client() -> (Arc<MockTransport>, Client) {
        let transport = Arc::new(MockTransport::new());
        let client = Client::from_shared(transport.clone());
        (transport, client)
    }

    #[test]
    fn push_creates_then_updates() {
        let (transport, client) = client();
        transport.push_json(200, json!({"refid": "m1", "name": "ann"}));
        transport.push_json(200, json!({"refid": "m1", "name": "bea"}));

        let member = Entity::member("club");
        member.put("name", "ann");
        client.push(&member).unwrap();
        assert_eq!(member.refid(), "m1");

        member.put("name", "bea");
        client.push(&member).unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].path, "club/members");
        assert_eq!(requests[0].body.document().unwrap()["name"], "ann");
        assert_eq!(requests[1].method, Method::Put);
        assert_eq!(requests[1].path, "club/members/m1");
        assert_eq!(member.get_string("name").unwrap(), "bea");
    }

    #[test]
    fn fetch_overwrites() {
        let (transport, client) = client();
        transport.push_json(200, json!({"refid": "r1", "contents": {"x": 1}}));

        let record = Entity::with_refid(EntityKind::record(), "db", "r1");
        record.put("local", true);
        client.fetch(&record).unwrap();

        assert!(!record.has("local"));
        assert_eq!(record.get_map("contents").unwrap().get("x"), Some(&1.into()));
        assert_eq!(transport.requests()[0].method, Method::Get);
        assert_eq!(transport.requests()[0].path, "db/records/r1");
    }

    #[test]
    fn unsaved_entities_are_rejected_locally() {
        let (transport, client) = client();
        let member = Entity::member("club");
        assert_eq!(client.fetch(&member).unwrap_err(), SyncError::NotPersisted);
        assert_eq!(client.delete(&member).unwrap_err(), SyncError::NotPersisted);
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn failed_push_keeps_staged_acl() {
        let (transport, client) = client();
        transport.push_json(
            403,
            json!({"error_code": 12, "error_message": "forbidden"}),
        );

        let entry = Entity::entry("blog");
        entry.set_new_acl(Acl::new().with("all", json!({"get": true})));
        let err = client.push(&entry).unwrap_err();

        let remote = err.as_remote().unwrap();
        assert_eq!(remote.kind, RemoteErrorKind::Server);
        assert_eq!(remote.code, Some(12));
        assert!(entry.pending_acl().is_some());
        assert!(!entry.is_persisted());
    }

    #[test]
    fn transport_failure_surfaces() {
        let (transport, client) = client();
        transport.push_error("connection refused");
        let member = Entity::with_refid(EntityKind::member(), "club", "m1");
        assert!(matches!(
            client.fetch(&member),
            Err(SyncError::Transport(_))
        ));
    }

    #[test]
    fn background_callback_runs_once_on_dispatcher() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"refid": "m9"}));
        let queue = Arc::new(QueueDispatcher::new());
        let client = Client::from_shared(transport.clone()).with_dispatcher(queue.clone());

        let member = Entity::member("club");
        let (tx, rx) = mpsc::channel();
        client.push_in_background(&member, move |entity, result| {
            tx.send((entity.refid(), result)).unwrap();
        });

        assert_eq!(queue.run_until(1, Duration::from_secs(5)), 1);
        let (refid, result) = rx.try_recv().unwrap();
        result.unwrap();
        assert_eq!(refid, "m9");
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn background_find_delivers_partial_results() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            json!({"members": [{"refid": "a"}], "paginate": {"page": 1, "pageCount": 2}}),
        );
        transport.push_error("timeout");
        let client = Client::from_shared(transport);

        let (tx, rx) = mpsc::channel();
        client.find_in_background(FindQuery::members("club"), move |found, result| {
            tx.send((found.len(), result)).unwrap();
        });
        let (count, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(count, 1);
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }
}
