//! The server side: a query entry point and a live-channel entry point
//! over one executable schema.

use crate::transport::{Channel, ChannelControl};
use async_trait::async_trait;
use lgql_runtime::{
    Context, ExecutableSchema, Executor, ExecutorConfig, LiveScope, Publication, PublicationSink,
    Request, Response,
};
use std::fmt;
use std::sync::Arc;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name clients use to reach this server.
    pub endpoint: String,
    /// Maximum query depth.
    pub max_depth: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self {
            endpoint: "/graphql".to_string(),
            max_depth: None,
        }
    }

    /// Sets the endpoint name.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the maximum query depth.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_depth: self.max_depth,
        }
    }
}

/// Serves one executable schema.
pub struct LiveServer {
    executor: Executor,
    config: ServerConfig,
}

impl fmt::Debug for LiveServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LiveServer {
    pub fn new(schema: ExecutableSchema) -> Self {
        Self::with_config(schema, ServerConfig::default())
    }

    pub fn with_config(schema: ExecutableSchema, config: ServerConfig) -> Self {
        let executor = Executor::with_config(Arc::new(schema), config.executor_config());
        Self { executor, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<ExecutableSchema> {
        self.executor.schema()
    }

    /// Runs a query or mutation once. Cursor fields are read, not observed.
    pub async fn query(&self, request: &Request) -> Response {
        let response = self.executor.execute(request, &Context::new()).await;
        if response.has_errors() {
            tracing::debug!(
                operation = request.operation_name.as_deref().unwrap_or("<anonymous>"),
                error = response.first_error().unwrap_or_default(),
                "query finished with errors"
            );
        }
        response
    }

    /// Opens a live channel.
    ///
    /// The request runs once with a live scope, which publishes every
    /// cursor field's documents. The first frame ends with `ready`, or with
    /// `nosub` if the execution reported errors, in which case the
    /// publication stops itself.
    pub async fn publish(&self, request: &Request) -> Channel {
        let (publication, frames) = Publication::new();
        let scope = LiveScope::new(Arc::new(publication.clone()));
        let ctx = Context::new().with_live(scope.clone());
        {
            let _gate = scope.gate().await;
            let response = self.executor.execute(request, &ctx).await;
            match response.first_error() {
                None => publication.ready(),
                Some(error) => publication.fail(error.to_string()),
            }
        }
        tracing::info!(
            endpoint = %self.config.endpoint,
            observations = scope.observation_count(),
            published = publication.published_count(),
            "publication opened"
        );
        Channel::new(frames, Arc::new(LivePublication { publication, scope }))
    }
}

/// Server half of a channel.
struct LivePublication {
    publication: Publication,
    scope: LiveScope,
}

#[async_trait]
impl ChannelControl for LivePublication {
    async fn stop(&self) {
        if self.publication.is_stopped() {
            return;
        }
        let _gate = self.scope.gate().await;
        self.publication.stop();
        tracing::info!("publication closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgql_runtime::{DataMessage, MemoryStore, ResolverMap};
    use serde_json::json;

    fn server(store: &MemoryStore) -> LiveServer {
        let fruits = store.collection("fruits");
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "fruits", move |_, _, _, _| Ok(fruits.find(json!({}))));
        let schema = ExecutableSchema::builder()
            .type_defs("type Fruit { _id: ID! name: String } type Query { fruits: [Fruit] @cursor }")
            .resolvers(resolvers)
            .build()
            .unwrap();
        LiveServer::new(schema)
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.endpoint, "/graphql");
        assert_eq!(config.max_depth, None);
        assert_eq!(ServerConfig::new().max_depth(3).max_depth, Some(3));
    }

    #[tokio::test]
    async fn test_query_reads_without_publishing() {
        let store = MemoryStore::new();
        store.collection("fruits").insert(json!({"_id": "a", "name": "apple"})).unwrap();
        let response = server(&store).query(&Request::new("{ fruits { name } }")).await;
        assert_eq!(response, Response::data(json!({"fruits": [{"name": "apple"}]})));
        assert_eq!(store.collection("fruits").observer_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_sends_ready() {
        let store = MemoryStore::new();
        store.collection("fruits").insert(json!({"_id": "a", "name": "apple"})).unwrap();
        let server = server(&store);
        let mut channel = server.publish(&Request::new("{ fruits { name } }")).await;
        let frame = channel.next().await.unwrap();
        assert_eq!(frame.last(), Some(&DataMessage::Ready));
        assert_eq!(frame.len(), 2);

        channel.stop().await;
        assert_eq!(
            channel.next().await.unwrap(),
            vec![DataMessage::Removed {
                collection: "fruits".into(),
                id: "a".into()
            }]
        );
        assert_eq!(store.collection("fruits").observer_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_execution_sends_nosub() {
        let store = MemoryStore::new();
        let server = server(&store);
        let mut channel = server.publish(&Request::new("{ nope }")).await;
        assert_eq!(
            channel.next().await.unwrap(),
            vec![DataMessage::Nosub {
                error: "cannot query field `nope` on type `Query`".into()
            }]
        );
    }
}
