//! Schema directives.
//!
//! A [`SchemaDirective`] rewrites the resolver of every field definition
//! that carries it. `@cursor` is built in: it wraps the field's resolver in
//! a [`CursorResolver`].

use crate::classify::{classify, Classification};
use crate::cursor::LiveCursor;
use crate::error::{ResolverError, SchemaError};
use crate::executor::Context;
use crate::live::{self, LiveObservation, ObservationKey, ObservationTarget};
use crate::projector::selected_field_names;
use crate::resolver::{Resolved, Resolver, ResolverArgs, ResolverFuture, ResolverInfo, SharedResolver};
use crate::schema::{FieldDef, ObjectDef, Schema, TypeRef};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Name of the live-cursor directive.
pub const CURSOR_DIRECTIVE: &str = "cursor";

/// Declaration prepended to user type definitions.
pub const CURSOR_DIRECTIVE_SDL: &str = "directive @cursor on FIELD_DEFINITION";

/// A directive implementation applied while building an executable schema.
pub trait SchemaDirective: Send + Sync {
    /// Returns the resolver to use for `object.field`, given the one
    /// currently installed.
    fn visit_field_definition(
        &self,
        schema: &Schema,
        object: &ObjectDef,
        field: &FieldDef,
        resolver: SharedResolver,
    ) -> Result<SharedResolver, SchemaError>;
}

/// The `@cursor` directive.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorDirective;

impl SchemaDirective for CursorDirective {
    fn visit_field_definition(
        &self,
        schema: &Schema,
        object: &ObjectDef,
        field: &FieldDef,
        resolver: SharedResolver,
    ) -> Result<SharedResolver, SchemaError> {
        let coordinate = format!("{}.{}", object.name, field.name);
        let shape = classify(schema, &field.ty);
        let wrapped = CursorResolver::wrap(resolver, coordinate, shape, &field.ty)?;
        tracing::debug!(coordinate = %wrapped.coordinate, %shape, "wrapping cursor field");
        Ok(Arc::new(wrapped))
    }
}

/// Resolver for a `@cursor` field.
///
/// Plain values from the wrapped resolver pass through. A cursor is read
/// once outside a live request. Inside one it is observed: its documents
/// are published to the request's sink and kept up to date until the
/// request stops.
pub struct CursorResolver {
    inner: SharedResolver,
    coordinate: String,
    shape: Classification,
    target_type: String,
}

impl CursorResolver {
    /// Wraps `inner` for a field declared as `field_type`. Fails when the
    /// shape is neither an object nor a list of objects.
    pub fn wrap(
        inner: SharedResolver,
        coordinate: impl Into<String>,
        shape: Classification,
        field_type: &TypeRef,
    ) -> Result<Self, SchemaError> {
        let coordinate = coordinate.into();
        if !shape.is_valid() {
            return Err(SchemaError::InvalidCursorField {
                coordinate,
                ty: field_type.to_string(),
            });
        }
        Ok(Self {
            inner,
            coordinate,
            shape,
            target_type: field_type.named_type().to_string(),
        })
    }

    pub fn coordinate(&self) -> &str {
        &self.coordinate
    }

    pub fn shape(&self) -> Classification {
        self.shape
    }

    fn fetch(&self, cursor: &dyn LiveCursor) -> Result<Value, ResolverError> {
        let documents = cursor.fetch()?;
        Ok(match self.shape {
            Classification::SingleObject => documents
                .into_iter()
                .next()
                .map_or(Value::Null, Value::Object),
            _ => Value::Array(documents.into_iter().map(Value::Object).collect()),
        })
    }

    async fn observe(
        &self,
        cursor: Arc<dyn LiveCursor>,
        parent: &Value,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> Result<Value, ResolverError> {
        let Some(scope) = ctx.live() else {
            return self.fetch(cursor.as_ref());
        };
        let key = ObservationKey::new(info, parent, args);
        if let Some(existing) = scope.lookup(&key) {
            return Ok(existing.snapshot());
        }
        if scope.sink().is_stopped() {
            return Ok(empty(self.shape));
        }

        let schema = info.schema.clone().ok_or_else(|| {
            ResolverError::Internal(format!("`{}` observed without a schema", self.coordinate))
        })?;
        let object = schema.schema().object(&self.target_type).ok_or_else(|| {
            ResolverError::Internal(format!("`{}` is not an object type", self.target_type))
        })?;
        let selected = selected_field_names(&info.selection, object);

        let (mut events, handle) = cursor.observe()?.into_parts();
        let observation = Arc::new(LiveObservation::new(
            ObservationTarget {
                key: key.clone(),
                collection: cursor.collection().to_string(),
                shape: self.shape,
                target_type: self.target_type.clone(),
                selected,
                info: info.clone(),
                schema: Arc::clone(&schema),
            },
            ctx.clone(),
            handle,
        ));
        scope.register(key, Arc::clone(&observation));

        live::replay(&observation, &mut events).await?;
        tracing::debug!(
            coordinate = %self.coordinate,
            key = %observation.key(),
            "observation ready"
        );
        let snapshot = observation.snapshot();
        tokio::spawn(live::pump(observation, events, scope.clone()));
        Ok(snapshot)
    }
}

fn empty(shape: Classification) -> Value {
    match shape {
        Classification::SingleObject => Value::Null,
        _ => Value::Array(Vec::new()),
    }
}

impl Resolver for CursorResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        Box::pin(async move {
            match self.inner.resolve(parent, args, ctx, info).await? {
                Resolved::Cursor(cursor) => self
                    .observe(cursor, parent, args, ctx, info)
                    .await
                    .map(Resolved::Value),
                value => Ok(value),
            }
        })
    }
}

impl fmt::Debug for CursorResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorResolver")
            .field("coordinate", &self.coordinate)
            .field("shape", &self.shape)
            .field("target_type", &self.target_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::resolver::FnResolver;
    use crate::sdl::build_schema;
    use serde_json::json;

    const SCHEMA: &str = r#"
        directive @cursor on FIELD_DEFINITION
        type Fruit { _id: ID! name: String }
        type Query { fruits: [Fruit] @cursor first: Fruit @cursor label: String @cursor }
    "#;

    fn fruits() -> MemoryStore {
        let store = MemoryStore::new();
        let fruits = store.collection("fruits");
        fruits.insert(json!({"_id": "a", "name": "apple"})).unwrap();
        fruits.insert(json!({"_id": "b", "name": "banana"})).unwrap();
        store
    }

    fn visit(field: &str, store: &MemoryStore) -> Result<SharedResolver, SchemaError> {
        let schema = build_schema(&[SCHEMA]).unwrap();
        let query = schema.object("Query").unwrap();
        let fruits = store.collection("fruits");
        let inner: SharedResolver = Arc::new(FnResolver::new(
            move |_: &Value, _: &ResolverArgs, _: &Context, _: &ResolverInfo| {
                Ok::<_, ResolverError>(fruits.find(json!({})))
            },
        ));
        CursorDirective.visit_field_definition(&schema, query, &query.fields[field], inner)
    }

    #[tokio::test]
    async fn test_one_shot_fetch_by_shape() {
        let store = fruits();
        let info = ResolverInfo::new("fruits", "Query");
        let ctx = Context::new();
        let args = ResolverArgs::new();

        let list = visit("fruits", &store).unwrap();
        let value = list.resolve(&Value::Null, &args, &ctx, &info).await.unwrap();
        assert_eq!(
            value.as_value(),
            Some(&json!([{"_id": "a", "name": "apple"}, {"_id": "b", "name": "banana"}]))
        );

        let single = visit("first", &store).unwrap();
        let value = single.resolve(&Value::Null, &args, &ctx, &info).await.unwrap();
        assert_eq!(value.as_value(), Some(&json!({"_id": "a", "name": "apple"})));
    }

    #[test]
    fn test_invalid_field_is_rejected() {
        let error = visit("label", &MemoryStore::new()).err().unwrap();
        assert_eq!(
            error.to_string(),
            "@cursor cannot be applied to `Query.label` of type `String`: expected an object or a list of objects"
        );
    }

    #[test]
    fn test_wrap_reports_the_declared_type() {
        let inner: SharedResolver = Arc::new(FnResolver::new(
            |_: &Value, _: &ResolverArgs, _: &Context, _: &ResolverInfo| {
                Ok::<_, ResolverError>(Value::Null)
            },
        ));
        let ty = TypeRef::non_null(TypeRef::list(TypeRef::list(TypeRef::named("Fruit"))));
        let error = CursorResolver::wrap(inner, "Query.grid", Classification::Invalid, &ty)
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "@cursor cannot be applied to `Query.grid` of type `[[Fruit]]!`: expected an object or a list of objects"
        );
    }

    #[tokio::test]
    async fn test_plain_values_pass_through() {
        let inner: SharedResolver = Arc::new(FnResolver::new(
            |_: &Value, _: &ResolverArgs, _: &Context, _: &ResolverInfo| {
                Ok::<_, ResolverError>(json!([{"_id": "x"}]))
            },
        ));
        let ty = TypeRef::list(TypeRef::named("Fruit"));
        let resolver =
            CursorResolver::wrap(inner, "Query.fruits", Classification::ListOfObjects, &ty)
                .unwrap();
        let value = resolver
            .resolve(
                &Value::Null,
                &ResolverArgs::new(),
                &Context::new(),
                &ResolverInfo::new("fruits", "Query"),
            )
            .await
            .unwrap();
        assert_eq!(value.as_value(), Some(&json!([{"_id": "x"}])));
    }
}
