//! Runtime for lgql.
//!
//! This crate turns type definitions into an executable schema and runs
//! queries against it. Fields marked `@cursor` may return live cursors:
//! - `sdl`: type definitions to [`Schema`]
//! - `classify`: which fields can carry `@cursor`
//! - `executable`: the schema transformation pass
//! - `directive`: `@cursor` and the [`SchemaDirective`] seam
//! - `executor`: query execution
//! - `live`: observations that keep a publication in sync with the store
//! - `sink`: publications and their merge box
//! - `memory`: an in-memory document store with live cursors

pub mod classify;
pub mod cursor;
pub mod directive;
pub mod error;
pub mod executable;
pub mod executor;
pub mod live;
pub mod memory;
pub mod projector;
pub mod resolver;
pub mod schema;
pub mod sdl;
pub mod selection;
pub mod sink;

pub use classify::{classify, Classification};
pub use cursor::{ChangeEvent, Document, LiveCursor, Observation, ObservationHandle};
pub use directive::{CursorDirective, CursorResolver, SchemaDirective, CURSOR_DIRECTIVE, CURSOR_DIRECTIVE_SDL};
pub use error::{RequestError, ResolverError, SchemaError, StoreError};
pub use executable::{augment_type_defs, ExecutableSchema, ExecutableSchemaBuilder};
pub use executor::{
    Context, Executor, ExecutorConfig, FieldError, PathSegment, Request, Response,
};
pub use live::{LiveObservation, LiveScope, ObservationKey};
pub use memory::{Collection, MemoryCursor, MemoryStore, Selector, WriteOp};
pub use resolver::{
    Resolved, Resolver, ResolverArgs, ResolverInfo, ResolverMap, ResolverResult, SharedResolver,
};
pub use schema::{FieldDef, ObjectDef, Schema, SchemaBuilder, TypeDef, TypeRef};
pub use sdl::build_schema;
pub use selection::{FieldSelection, SelectionTree};
pub use sink::{DataMessage, Publication, PublicationSink, StopCallback};
