//! Resolver system.
//!
//! This module provides the resolver trait and infrastructure for field
//! resolution. A resolver returns either a plain JSON value or a
//! [`LiveCursor`]; only fields marked `@cursor` may return cursors.

use crate::cursor::LiveCursor;
use crate::error::ResolverError;
use crate::executable::ExecutableSchema;
use crate::executor::{Context, FieldError, PathSegment};
use crate::memory::MemoryCursor;
use crate::schema::{FieldDef, TypeRef};
use crate::selection::FieldSelection;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: IndexMap<String, Value>,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the arguments of one field invocation. Declared defaults
    /// fill in arguments the query left out.
    pub fn for_field(field: &FieldDef, selection: &FieldSelection) -> Self {
        let mut args = selection.arguments.clone();
        for (name, argument) in &field.arguments {
            if !args.contains_key(name) {
                if let Some(default) = &argument.default_value {
                    args.insert(name.clone(), default.clone());
                }
            }
        }
        Self { args }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
            })
    }

    /// Returns all arguments.
    pub fn all(&self) -> &IndexMap<String, Value> {
        &self.args
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

/// Info about the field being resolved.
#[derive(Clone)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The parent type name.
    pub parent_type: String,

    /// The declared return type.
    pub return_type: TypeRef,

    /// Path to this field.
    pub path: Vec<PathSegment>,

    /// This field's node in the request's selection tree.
    pub selection: Arc<FieldSelection>,

    /// The schema being executed, when resolving inside an executor.
    pub schema: Option<Arc<ExecutableSchema>>,
}

impl ResolverInfo {
    /// Creates new resolver info.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            selection: Arc::new(FieldSelection::leaf(field_name.clone())),
            field_name,
            parent_type: parent_type.into(),
            return_type: TypeRef::named("String"),
            path: Vec::new(),
            schema: None,
        }
    }

    /// Sets the return type.
    pub fn with_return_type(mut self, ty: TypeRef) -> Self {
        self.return_type = ty;
        self
    }

    /// Sets the path.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Sets the selection node.
    pub fn with_selection(mut self, selection: Arc<FieldSelection>) -> Self {
        self.selection = selection;
        self
    }

    /// Sets the schema.
    pub fn with_schema(mut self, schema: Arc<ExecutableSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// `Type.field`, the coordinate of the field being resolved.
    pub fn coordinate(&self) -> String {
        format!("{}.{}", self.parent_type, self.field_name)
    }
}

impl Debug for ResolverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverInfo")
            .field("field_name", &self.field_name)
            .field("parent_type", &self.parent_type)
            .field("return_type", &self.return_type.to_string())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// What a resolver produced.
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Value),
    Cursor(Arc<dyn LiveCursor>),
}

impl Resolved {
    /// Wraps any cursor.
    pub fn cursor(cursor: impl LiveCursor + 'static) -> Self {
        Self::Cursor(Arc::new(cursor))
    }

    /// The plain value, if this is not a cursor.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Cursor(_) => None,
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<MemoryCursor> for Resolved {
    fn from(cursor: MemoryCursor) -> Self {
        Self::cursor(cursor)
    }
}

impl From<Arc<dyn LiveCursor>> for Resolved {
    fn from(cursor: Arc<dyn LiveCursor>) -> Self {
        Self::Cursor(cursor)
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<Resolved, ResolverError>;

/// Future type for async resolvers.
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

impl From<ResolverError> for FieldError {
    fn from(error: ResolverError) -> Self {
        FieldError::new(error.to_string())
    }
}

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a>;
}

/// A shared resolver.
pub type SharedResolver = Arc<dyn Resolver>;

/// A sync resolver function.
pub type SyncResolverFn =
    Arc<dyn Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync>;

/// A wrapper for sync resolver functions.
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    /// Creates a new function resolver. The function may return anything
    /// convertible to [`Resolved`]: a JSON value or a cursor.
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> Result<R, ResolverError>
            + Send
            + Sync
            + 'static,
        R: Into<Resolved>,
    {
        Self {
            func: Arc::new(
                move |parent: &Value, args: &ResolverArgs, ctx: &Context, info: &ResolverInfo| {
                    f(parent, args, ctx, info).map(Into::into)
                },
            ),
        }
    }
}

impl Resolver for FnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let result = (self.func)(parent, args, ctx, info);
        Box::pin(async move { result })
    }
}

/// An async resolver function type.
pub type AsyncResolverFn = Arc<
    dyn Fn(Value, ResolverArgs, Context, ResolverInfo) -> ResolverFuture<'static> + Send + Sync,
>;

/// A wrapper for async resolver functions.
pub struct AsyncFnResolver {
    func: AsyncResolverFn,
}

impl AsyncFnResolver {
    /// Creates a new async function resolver.
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ResolverError>> + Send + 'static,
        R: Into<Resolved>,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| -> ResolverFuture<'static> {
                let future = f(parent, args, ctx, info);
                Box::pin(async move { future.await.map(Into::into) })
            }),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let parent = parent.clone();
        let args = args.clone();
        let ctx = ctx.clone();
        let info = info.clone();
        let func = Arc::clone(&self.func);
        Box::pin(async move { func(parent, args, ctx, info).await })
    }
}

/// Default resolver that accesses properties from the parent object.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        _args: &'a ResolverArgs,
        _ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let field_name = &info.field_name;
        let result = match parent {
            Value::Object(map) => Ok(map
                .get(field_name)
                .or_else(|| map.get(&to_snake_case(field_name)))
                .cloned()
                .unwrap_or(Value::Null)
                .into()),
            Value::Null => Ok(Value::Null.into()),
            _ => Err(ResolverError::FieldNotFound(field_name.clone())),
        };
        Box::pin(async move { result })
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Storage for resolvers organized by type and field.
#[derive(Clone)]
pub struct ResolverMap {
    /// Resolvers indexed by "TypeName.fieldName".
    resolvers: FxHashMap<String, SharedResolver>,

    /// Resolver for unregistered fields.
    default_resolver: SharedResolver,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    /// Creates a new resolver map.
    pub fn new() -> Self {
        Self {
            resolvers: FxHashMap::default(),
            default_resolver: Arc::new(DefaultResolver),
        }
    }

    /// Registers a resolver for a specific type and field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.resolvers.insert(key, Arc::new(resolver));
    }

    /// Registers a sync function as a resolver.
    pub fn register_fn<F, R>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> Result<R, ResolverError>
            + Send
            + Sync
            + 'static,
        R: Into<Resolved>,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    /// Registers an async function as a resolver.
    pub fn register_async<F, Fut, R>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ResolverError>> + Send + 'static,
        R: Into<Resolved>,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    /// Sets the resolver for a coordinate (`Type.field`).
    pub fn insert_arc(&mut self, coordinate: impl Into<String>, resolver: SharedResolver) {
        self.resolvers.insert(coordinate.into(), resolver);
    }

    /// Gets a resolver for a type and field, falling back to the default.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<SharedResolver> {
        self.get_registered(type_name, field_name)
            .or_else(|| Some(Arc::clone(&self.default_resolver)))
    }

    /// Gets an explicitly registered resolver.
    pub fn get_registered(&self, type_name: &str, field_name: &str) -> Option<SharedResolver> {
        let key = format!("{type_name}.{field_name}");
        self.resolvers.get(&key).cloned()
    }

    /// Registered coordinates.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(String::as_str)
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn value(result: ResolverResult) -> Value {
        match result.unwrap() {
            Resolved::Value(value) => value,
            Resolved::Cursor(cursor) => panic!("unexpected cursor on {}", cursor.collection()),
        }
    }

    #[test]
    fn test_resolver_args() {
        let mut args = ResolverArgs::new();
        args.set("id", json!(123));
        args.set("name", json!("test"));

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert!(matches!(
            args.require::<String>("id"),
            Err(ResolverError::ArgumentParseError(..))
        ));
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("allFruits"), "all_fruits");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[tokio::test]
    async fn test_default_resolver() {
        let resolver = DefaultResolver;
        let parent = json!({"name": "Alice", "created_at": 30});
        let args = ResolverArgs::new();
        let ctx = Context::new();

        let info = ResolverInfo::new("name", "User");
        let result = resolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(value(result), json!("Alice"));

        let info = ResolverInfo::new("createdAt", "User");
        let result = resolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(value(result), json!(30));
    }

    #[tokio::test]
    async fn test_fn_resolver_returns_cursor() {
        let store = MemoryStore::new();
        let fruits = store.collection("fruits");
        let resolver = FnResolver::new(move |_parent, _args, _ctx, _info| Ok(fruits.find(json!({}))));

        let parent = json!({});
        let args = ResolverArgs::new();
        let ctx = Context::new();
        let info = ResolverInfo::new("allFruits", "Query");

        let result = resolver.resolve(&parent, &args, &ctx, &info).await.unwrap();
        let Resolved::Cursor(cursor) = result else {
            panic!("expected a cursor");
        };
        assert_eq!(cursor.collection(), "fruits");
    }

    #[tokio::test]
    async fn test_resolver_map() {
        let mut map = ResolverMap::new();
        map.register_fn("Query", "hello", |_parent, _args, _ctx, _info| Ok(json!("Hello, World!")));
        map.register_async("Query", "later", |_parent, _args, _ctx, _info| async {
            Ok::<_, ResolverError>(json!("done"))
        });

        let parent = json!({});
        let args = ResolverArgs::new();
        let ctx = Context::new();

        let resolver = map.get("Query", "hello").unwrap();
        let info = ResolverInfo::new("hello", "Query");
        assert_eq!(value(resolver.resolve(&parent, &args, &ctx, &info).await), json!("Hello, World!"));

        let resolver = map.get("Query", "later").unwrap();
        let info = ResolverInfo::new("later", "Query");
        assert_eq!(value(resolver.resolve(&parent, &args, &ctx, &info).await), json!("done"));

        let mut keys: Vec<_> = map.keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["Query.hello", "Query.later"]);
    }

    #[tokio::test]
    async fn test_resolver_map_default_fallback() {
        let mut map = ResolverMap::new();
        assert!(map.get_registered("User", "name").is_none());

        let resolver = map.get("User", "name").unwrap();
        let parent = json!({"name": "Bob"});
        let args = ResolverArgs::new();
        let ctx = Context::new();
        let info = ResolverInfo::new("name", "User");
        assert_eq!(value(resolver.resolve(&parent, &args, &ctx, &info).await), json!("Bob"));

        map.register_fn("User", "name", |_, _, _, _| Ok(json!("Alice")));
        let resolver = map.get("User", "name").unwrap();
        assert_eq!(value(resolver.resolve(&parent, &args, &ctx, &info).await), json!("Alice"));
    }
}
