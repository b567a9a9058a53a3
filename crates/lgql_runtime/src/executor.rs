//! Query execution.
//!
//! Fields are resolved one after another in selection order. Live cursor
//! fields open their observations in the same order they appear in the
//! query, so a live request publishes deterministically.

use crate::error::RequestError;
use crate::executable::ExecutableSchema;
use crate::live::LiveScope;
use crate::resolver::{Resolved, ResolverArgs, ResolverInfo};
use crate::schema::{Schema, TypeDef, TypeRef};
use crate::selection::{FieldSelection, SelectionTree};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Executor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Maximum field nesting depth. `None` means unlimited.
    pub max_depth: Option<usize>,
}

impl ExecutorConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

/// A GraphQL request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub query: String,
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: Map::new(),
        }
    }

    /// Sets the variables. Anything but a JSON object clears them.
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = match variables {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// The query executor.
#[derive(Clone)]
pub struct Executor {
    schema: Arc<ExecutableSchema>,
    config: ExecutorConfig,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates a new executor.
    pub fn new(schema: Arc<ExecutableSchema>) -> Self {
        Self::with_config(schema, ExecutorConfig::default())
    }

    /// Creates an executor with configuration.
    pub fn with_config(schema: Arc<ExecutableSchema>, config: ExecutorConfig) -> Self {
        Self { schema, config }
    }

    pub fn schema(&self) -> &Arc<ExecutableSchema> {
        &self.schema
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Parses, validates and executes a request.
    pub async fn execute(&self, request: &Request, ctx: &Context) -> Response {
        match SelectionTree::parse(
            &request.query,
            request.operation_name.as_deref(),
            &request.variables,
            &self.config,
        ) {
            Ok(tree) => self.execute_tree(&tree, ctx).await,
            Err(error) => Response::request_error(&error),
        }
    }

    /// Executes an already built selection tree.
    pub async fn execute_tree(&self, tree: &SelectionTree, ctx: &Context) -> Response {
        let schema = self.schema.schema();
        let Some(root_type) = schema.root_type(tree.operation) else {
            return Response::request_error(&RequestError::UnsupportedOperation(
                tree.operation.as_str(),
            ));
        };
        if let Err(error) = validate(schema, root_type, &tree.root) {
            return Response::request_error(&error);
        }

        let mut ctx = ctx.clone();
        ctx.variables.clone_from(&tree.variables);
        let exec_ctx = ExecutionContext {
            schema: Arc::clone(&self.schema),
            ctx,
            errors: Arc::new(RwLock::new(Vec::new())),
        };

        let root_value = Value::Object(Map::new());
        let data = execute_fields(&tree.root, root_type, &root_value, &[], &exec_ctx)
            .await
            .map_or(Value::Null, Value::Object);

        let errors = exec_ctx.errors.read().await;
        Response {
            data: Some(data),
            errors: if errors.is_empty() {
                None
            } else {
                Some(errors.clone())
            },
        }
    }
}

/// Checks field existence and leaf/composite selections.
fn validate(
    schema: &Schema,
    parent_type: &str,
    fields: &[Arc<FieldSelection>],
) -> Result<(), RequestError> {
    for field in fields {
        if field.name == "__typename" {
            continue;
        }
        let owner = field.type_condition.as_deref().unwrap_or(parent_type);
        let Some(def) = schema.field(owner, &field.name) else {
            return Err(RequestError::UnknownField {
                type_name: owner.to_string(),
                field: field.name.clone(),
            });
        };
        let named = def.ty.named_type();
        let composite = schema.get_type(named).is_some_and(TypeDef::is_composite);
        match (composite, field.has_selection_set) {
            (true, false) => {
                return Err(RequestError::MissingSelection {
                    coordinate: format!("{owner}.{}", field.name),
                    ty: def.ty.to_string(),
                })
            }
            (false, true) => {
                return Err(RequestError::UnexpectedSelection {
                    coordinate: format!("{owner}.{}", field.name),
                    ty: def.ty.to_string(),
                })
            }
            (true, true) => validate(schema, named, &field.children)?,
            (false, false) => {}
        }
    }
    Ok(())
}

/// Marks a value that became null because of an error already recorded.
struct Bubble;

type Completion<'a, T> = Pin<Box<dyn Future<Output = Result<T, Bubble>> + Send + 'a>>;

struct ExecutionContext {
    schema: Arc<ExecutableSchema>,
    ctx: Context,
    errors: Arc<RwLock<Vec<FieldError>>>,
}

impl ExecutionContext {
    async fn error(&self, error: FieldError) {
        self.errors.write().await.push(error);
    }
}

/// Executes a selection set against one object.
fn execute_fields<'a>(
    fields: &'a [Arc<FieldSelection>],
    type_name: &'a str,
    parent: &'a Value,
    path: &'a [PathSegment],
    ctx: &'a ExecutionContext,
) -> Completion<'a, Map<String, Value>> {
    Box::pin(async move {
        let schema = ctx.schema.schema();
        let mut result = Map::new();
        for field in fields {
            if let Some(condition) = &field.type_condition {
                if !schema.is_possible_type(condition, type_name) {
                    continue;
                }
            }
            let value = execute_field(field, type_name, parent, path, ctx).await?;
            result.insert(field.response_key().to_string(), value);
        }
        Ok(result)
    })
}

/// Resolves and completes one field.
async fn execute_field(
    selection: &Arc<FieldSelection>,
    parent_type: &str,
    parent: &Value,
    path: &[PathSegment],
    ctx: &ExecutionContext,
) -> Result<Value, Bubble> {
    if selection.name == "__typename" {
        return Ok(Value::String(parent_type.to_string()));
    }

    let mut path = path.to_vec();
    path.push(PathSegment::Field(selection.response_key().to_string()));

    let Some(def) = ctx.schema.schema().field(parent_type, &selection.name) else {
        ctx.error(FieldError::new(format!("unknown field `{parent_type}.{}`", selection.name)).with_path(path))
            .await;
        return Ok(Value::Null);
    };
    let nullable = |bubble: Bubble| {
        if def.ty.is_non_null() {
            Err(bubble)
        } else {
            Ok(Value::Null)
        }
    };

    let args = ResolverArgs::for_field(def, selection);
    let info = ResolverInfo::new(&selection.name, parent_type)
        .with_return_type(def.ty.clone())
        .with_path(path.clone())
        .with_selection(Arc::clone(selection))
        .with_schema(Arc::clone(&ctx.schema));

    let Some(resolver) = ctx.schema.resolvers().get(parent_type, &selection.name) else {
        ctx.error(FieldError::new(format!("no resolver for `{}`", info.coordinate())).with_path(path))
            .await;
        return nullable(Bubble);
    };

    let value = match resolver.resolve(parent, &args, &ctx.ctx, &info).await {
        Ok(Resolved::Value(value)) => value,
        Ok(Resolved::Cursor(_)) => {
            let error = crate::error::ResolverError::UnexpectedCursor(info.coordinate());
            ctx.error(FieldError::from(error).with_path(path)).await;
            return nullable(Bubble);
        }
        Err(error) => {
            ctx.error(FieldError::from(error).with_path(path)).await;
            return nullable(Bubble);
        }
    };

    complete_value(&def.ty, value, selection, &path, ctx, &info.coordinate()).await
}

/// Completes a value. Nullable positions absorb errors from below.
fn complete_value<'a>(
    ty: &'a TypeRef,
    value: Value,
    selection: &'a FieldSelection,
    path: &'a [PathSegment],
    ctx: &'a ExecutionContext,
    coordinate: &'a str,
) -> Completion<'a, Value> {
    Box::pin(async move {
        match ty {
            TypeRef::NonNull(inner) => {
                match complete_inner(inner, value, selection, path, ctx, coordinate).await? {
                    Value::Null => {
                        ctx.error(
                            FieldError::new(format!(
                                "cannot return null for non-nullable field `{coordinate}`"
                            ))
                            .with_path(path.to_vec()),
                        )
                        .await;
                        Err(Bubble)
                    }
                    value => Ok(value),
                }
            }
            _ => Ok(complete_inner(ty, value, selection, path, ctx, coordinate)
                .await
                .unwrap_or(Value::Null)),
        }
    })
}

async fn complete_inner(
    ty: &TypeRef,
    value: Value,
    selection: &FieldSelection,
    path: &[PathSegment],
    ctx: &ExecutionContext,
    coordinate: &str,
) -> Result<Value, Bubble> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match ty {
        TypeRef::NonNull(_) => complete_value(ty, value, selection, path, ctx, coordinate).await,
        TypeRef::List(item) => {
            let Value::Array(items) = value else {
                ctx.error(
                    FieldError::new(format!("expected a list for `{coordinate}`"))
                        .with_path(path.to_vec()),
                )
                .await;
                return Err(Bubble);
            };
            let mut completed = Vec::with_capacity(items.len());
            for (index, item_value) in items.into_iter().enumerate() {
                let mut item_path = path.to_vec();
                item_path.push(PathSegment::Index(index));
                completed.push(
                    complete_value(item, item_value, selection, &item_path, ctx, coordinate).await?,
                );
            }
            Ok(Value::Array(completed))
        }
        TypeRef::Named(name) => {
            let schema = ctx.schema.schema();
            let concrete = match schema.get_type(name) {
                Some(TypeDef::Object(_)) => name.clone(),
                Some(TypeDef::Interface(_) | TypeDef::Union(_)) => {
                    match value.get("__typename").and_then(Value::as_str) {
                        Some(concrete) if schema.is_possible_type(name, concrete) => {
                            concrete.to_string()
                        }
                        _ => {
                            ctx.error(
                                FieldError::new(format!(
                                    "cannot determine the concrete type of `{name}` for `{coordinate}`"
                                ))
                                .with_path(path.to_vec()),
                            )
                            .await;
                            return Err(Bubble);
                        }
                    }
                }
                _ => return Ok(value),
            };
            execute_fields(&selection.children, &concrete, &value, path, ctx)
                .await
                .map(Value::Object)
        }
    }
}

/// Execution context.
#[derive(Clone, Default)]
pub struct Context {
    /// Request-scoped data.
    pub data: HashMap<String, Value>,
    /// Variables from the request.
    pub variables: Map<String, Value>,
    live: Option<LiveScope>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("data", &self.data)
            .field("variables", &self.variables)
            .field("live", &self.live.is_some())
            .finish()
    }
}

impl Context {
    /// Creates a new context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with variables.
    pub fn with_variables(variables: Map<String, Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    /// Attaches a live scope. Cursor fields resolved under this context
    /// publish to the scope's sink instead of fetching once.
    pub fn with_live(mut self, scope: LiveScope) -> Self {
        self.live = Some(scope);
        self
    }

    /// The live scope, if this is a live request.
    pub fn live(&self) -> Option<&LiveScope> {
        self.live.as_ref()
    }

    /// Sets a value in the context.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
    }

    /// Gets a value from the context.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// A GraphQL response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// The errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl Response {
    /// Creates a successful response with data.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }

    /// Creates an error response.
    pub fn error(error: FieldError) -> Self {
        Self {
            data: None,
            errors: Some(vec![error]),
        }
    }

    /// An error response for a request that could not be executed.
    pub fn request_error(error: &RequestError) -> Self {
        Self::error(FieldError::new(error.to_string()).with_code(error.code()))
    }

    /// Returns true if the response has errors.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// The first error message, if any.
    pub fn first_error(&self) -> Option<&str> {
        self.errors
            .as_ref()
            .and_then(|e| e.first())
            .map(|e| e.message.as_str())
    }
}

/// A field error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// The error message.
    pub message: String,

    /// The path to the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Error extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Adds a path to the error.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", Value::String(code.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolverError;
    use crate::memory::MemoryStore;
    use crate::resolver::ResolverMap;
    use serde_json::json;

    const SCHEMA: &str = r#"
        type User { _id: ID! name: String! email: String }
        type Entry { _id: ID! content: String author: User }
        union Item = User | Entry
        type Query {
          hello: String!
          user(id: ID!): User
          entries: [Entry!]!
          broken: String!
          items: [Item]
          users: [User]
        }
    "#;

    fn executor(store: &MemoryStore) -> Executor {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "hello", |_, _, _, _| Ok(json!("Hello, World!")));
        resolvers.register_fn("Query", "user", |_, args, _, _| {
            let id: String = args.require("id")?;
            Ok(json!({"_id": id, "name": "Ada", "email": null}))
        });
        resolvers.register_fn("Query", "entries", |_, _, _, _| {
            Ok(json!([{"_id": "e1", "content": "hi", "author": {"_id": "u1", "name": "Ada"}}]))
        });
        resolvers.register_fn("Query", "broken", |_, _, _, _| {
            Err::<Value, _>(ResolverError::custom("exploded"))
        });
        resolvers.register_fn("Query", "items", |_, _, _, _| {
            Ok(json!([{"__typename": "User", "_id": "u1", "name": "Ada"}, {"__typename": "Entry", "_id": "e1", "content": "hi"}]))
        });
        let users = store.collection("users");
        resolvers.register_fn("Query", "users", move |_, _, _, _| Ok(users.find(json!({}))));

        let schema = ExecutableSchema::builder()
            .type_defs(SCHEMA)
            .resolvers(resolvers)
            .build()
            .unwrap();
        Executor::new(Arc::new(schema))
    }

    async fn run(query: &str) -> Response {
        executor(&MemoryStore::new())
            .execute(&Request::new(query), &Context::new())
            .await
    }

    #[tokio::test]
    async fn test_execute_simple_query() {
        let response = run(r#"{ hello user(id: "u1") { _id name } }"#).await;
        assert_eq!(
            response,
            Response::data(json!({"hello": "Hello, World!", "user": {"_id": "u1", "name": "Ada"}}))
        );
    }

    #[tokio::test]
    async fn test_aliases_typename_and_lists() {
        let response = run("{ all: entries { __typename text: content author { name } } }").await;
        assert_eq!(
            response.data,
            Some(json!({"all": [{"__typename": "Entry", "text": "hi", "author": {"name": "Ada"}}]}))
        );
    }

    #[tokio::test]
    async fn test_union_type_conditions() {
        let response =
            run("{ items { __typename ... on User { name } ... on Entry { content } } }").await;
        assert_eq!(
            response.data,
            Some(json!({"items": [
                {"__typename": "User", "name": "Ada"},
                {"__typename": "Entry", "content": "hi"}
            ]}))
        );
    }

    #[tokio::test]
    async fn test_non_null_error_bubbles_to_data() {
        let response = run("{ hello broken }").await;
        assert_eq!(response.data, Some(Value::Null));
        let errors = response.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "exploded");
        assert_eq!(errors[0].path, Some(vec![PathSegment::Field("broken".into())]));
    }

    #[tokio::test]
    async fn test_cursor_from_unmarked_field_is_an_error() {
        let response = run("{ users { name } }").await;
        assert_eq!(response.data, Some(json!({"users": null})));
        assert_eq!(
            response.first_error(),
            Some("`Query.users` returned a cursor but is not marked @cursor")
        );
    }

    #[tokio::test]
    async fn test_request_errors_carry_codes() {
        let response = run("{ hello").await;
        assert!(response.data.is_none());
        let error = &response.errors.unwrap()[0];
        assert_eq!(
            error.extensions.as_ref().unwrap()["code"],
            json!("GRAPHQL_PARSE_FAILED")
        );

        let response = run("{ nope }").await;
        assert_eq!(
            response.first_error(),
            Some("cannot query field `nope` on type `Query`")
        );

        let response = run("{ entries }").await;
        assert!(response.first_error().unwrap().contains("must have a selection"));

        let response = run("{ hello { length } }").await;
        assert!(response.first_error().unwrap().contains("must not have a selection"));

        let response = run("mutation { hello }").await;
        assert_eq!(
            response.first_error(),
            Some("schema does not support mutation operations")
        );
    }

    #[test]
    fn test_response_serialization() {
        let response = Response::error(
            FieldError::new("boom").with_path(vec![PathSegment::Field("a".into()), PathSegment::Index(0)]),
        );
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"errors": [{"message": "boom", "path": ["a", 0]}]})
        );
    }
}
