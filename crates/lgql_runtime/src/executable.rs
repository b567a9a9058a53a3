//! Executable schemas: type definitions plus resolvers.
//!
//! Building one is a transformation pass. The `@cursor` declaration is
//! prepended to the user's type definitions, the schema is built, and every
//! directive implementation visits the field definitions that use it,
//! replacing their resolvers.

use crate::classify::{classify, Classification};
use crate::directive::{CursorDirective, SchemaDirective, CURSOR_DIRECTIVE, CURSOR_DIRECTIVE_SDL};
use crate::error::SchemaError;
use crate::resolver::{DefaultResolver, ResolverMap, SharedResolver};
use crate::schema::{Schema, TypeDef};
use crate::sdl::build_schema;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Prepends the `@cursor` declaration to a list of type definitions.
pub fn augment_type_defs<S: AsRef<str>>(type_defs: &[S]) -> Vec<String> {
    std::iter::once(CURSOR_DIRECTIVE_SDL.to_string())
        .chain(type_defs.iter().map(|source| source.as_ref().to_string()))
        .collect()
}

/// A schema ready for execution.
pub struct ExecutableSchema {
    schema: Schema,
    resolvers: ResolverMap,
    cursor_fields: IndexMap<String, Classification>,
    type_defs: Vec<String>,
}

impl ExecutableSchema {
    pub fn builder() -> ExecutableSchemaBuilder {
        ExecutableSchemaBuilder::default()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    /// Every `@cursor` field by coordinate, with its classification.
    pub fn cursor_fields(&self) -> &IndexMap<String, Classification> {
        &self.cursor_fields
    }

    pub fn classification(&self, coordinate: &str) -> Option<Classification> {
        self.cursor_fields.get(coordinate).copied()
    }

    /// The type definitions the schema was built from, including the
    /// `@cursor` declaration.
    pub fn type_defs(&self) -> &[String] {
        &self.type_defs
    }
}

impl fmt::Debug for ExecutableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableSchema")
            .field("types", &self.schema.types.len())
            .field("resolvers", &self.resolvers)
            .field("cursor_fields", &self.cursor_fields)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ExecutableSchema`].
#[derive(Default)]
pub struct ExecutableSchemaBuilder {
    type_defs: Vec<String>,
    resolvers: ResolverMap,
    directives: IndexMap<String, Arc<dyn SchemaDirective>>,
}

impl ExecutableSchemaBuilder {
    /// Adds one type definition source. Sources are merged in order.
    pub fn type_defs(mut self, source: impl Into<String>) -> Self {
        self.type_defs.push(source.into());
        self
    }

    pub fn resolvers(mut self, resolvers: ResolverMap) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Registers a directive implementation. `@cursor` is always the
    /// built-in one.
    pub fn directive(mut self, name: impl Into<String>, directive: impl SchemaDirective + 'static) -> Self {
        self.directives.insert(name.into(), Arc::new(directive));
        self
    }

    pub fn build(self) -> Result<ExecutableSchema, SchemaError> {
        let type_defs = augment_type_defs(&self.type_defs);
        let schema = build_schema(&type_defs)?;

        for coordinate in self.resolvers.keys() {
            let known = coordinate
                .split_once('.')
                .is_some_and(|(type_name, field)| schema.field(type_name, field).is_some());
            if !known {
                return Err(SchemaError::UnknownResolver(coordinate.to_string()));
            }
        }

        let mut directives = self.directives;
        directives.shift_remove(CURSOR_DIRECTIVE);
        directives.insert(CURSOR_DIRECTIVE.to_string(), Arc::new(CursorDirective));

        let mut resolvers = self.resolvers;
        let mut cursor_fields = IndexMap::new();
        for type_def in schema.types.values() {
            let TypeDef::Object(object) = type_def else {
                continue;
            };
            for field in object.fields.values() {
                for usage in &field.directives {
                    let Some(directive) = directives.get(&usage.name) else {
                        continue;
                    };
                    let coordinate = format!("{}.{}", object.name, field.name);
                    let current: SharedResolver = resolvers
                        .get_registered(&object.name, &field.name)
                        .unwrap_or_else(|| Arc::new(DefaultResolver));
                    let replaced =
                        directive.visit_field_definition(&schema, object, field, current)?;
                    resolvers.insert_arc(coordinate.clone(), replaced);
                    if usage.name == CURSOR_DIRECTIVE {
                        cursor_fields.insert(coordinate, classify(&schema, &field.ty));
                    }
                }
            }
        }

        tracing::info!(
            types = schema.types.len(),
            cursor_fields = cursor_fields.len(),
            "executable schema built"
        );
        Ok(ExecutableSchema {
            schema,
            resolvers,
            cursor_fields,
            type_defs,
        })
    }
}
