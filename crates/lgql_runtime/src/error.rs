//! Error types for schema construction, request handling and resolution.

use lgql_core::SourceErrors;
use thiserror::Error;

/// Schema construction failures. Raised synchronously by
/// [`ExecutableSchemaBuilder::build`](crate::ExecutableSchemaBuilder::build).
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("syntax error in {0}")]
    Syntax(#[from] SourceErrors),

    #[error("unknown type `{name}` referenced by `{referenced_by}`")]
    UnknownType { name: String, referenced_by: String },

    #[error("type `{0}` is defined more than once")]
    DuplicateType(String),

    #[error("field `{0}` is defined more than once")]
    DuplicateField(String),

    #[error("cannot extend `{0}`: no such type")]
    ExtendUndefined(String),

    #[error("cannot extend `{name}` with a {found} extension")]
    ExtensionKindMismatch { name: String, found: &'static str },

    #[error("directive `@{0}` is declared more than once")]
    DuplicateDirective(String),

    #[error("unknown directive `@{name}` on `{coordinate}`")]
    UnknownDirective { name: String, coordinate: String },

    #[error("directive `@{name}` may not be used on {location} (`{coordinate}`)")]
    MisplacedDirective {
        name: String,
        location: String,
        coordinate: String,
    },

    #[error("@cursor cannot be applied to `{coordinate}` of type `{ty}`: expected an object or a list of objects")]
    InvalidCursorField { coordinate: String, ty: String },

    #[error("`{0}` defined in resolvers, but not in schema")]
    UnknownResolver(String),

    #[error("schema has no query type")]
    MissingQueryType,

    #[error("root operation type `{0}` must be an object type")]
    InvalidRootType(String),

    #[error("type definitions may not contain {0}")]
    ExecutableDefinition(&'static str),
}

/// Operation parsing and validation failures.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("syntax error in {0}")]
    Syntax(#[from] SourceErrors),

    #[error("document contains no operation")]
    NoOperation,

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("document contains several operations; an operation name is required")]
    AmbiguousOperation,

    #[error("unknown fragment `{0}`")]
    UnknownFragment(String),

    #[error("fragment `{0}` spreads itself")]
    FragmentCycle(String),

    #[error("variable `${0}` of required type was not provided")]
    MissingVariable(String),

    #[error("variable `${0}` is not defined by the operation")]
    UndefinedVariable(String),

    #[error("query exceeds the maximum depth of {max}")]
    DepthLimit { max: usize },

    #[error("cannot query field `{field}` on type `{type_name}`")]
    UnknownField { type_name: String, field: String },

    #[error("field `{coordinate}` of type `{ty}` must have a selection of subfields")]
    MissingSelection { coordinate: String, ty: String },

    #[error("field `{coordinate}` must not have a selection since type `{ty}` has no subfields")]
    UnexpectedSelection { coordinate: String, ty: String },

    #[error("schema does not support {0} operations")]
    UnsupportedOperation(&'static str),
}

impl RequestError {
    /// The `extensions.code` value reported alongside this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "GRAPHQL_PARSE_FAILED",
            _ => "GRAPHQL_VALIDATION_FAILED",
        }
    }
}

/// Store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("malformed selector: {0}")]
    MalformedSelector(String),

    #[error("document `{id}` not found in `{collection}`")]
    DocumentNotFound { collection: String, id: String },

    #[error("document `{id}` already exists in `{collection}`")]
    DuplicateId { collection: String, id: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// Error from a resolver.
#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("missing required argument: {0}")]
    MissingArgument(String),

    #[error("failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    #[error("`{0}` returned a cursor but is not marked @cursor")]
    UnexpectedCursor(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Custom(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}
