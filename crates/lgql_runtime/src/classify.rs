//! Output type classification for live-cursor fields.

use crate::schema::{Schema, TypeRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a live-cursor field materializes its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// `User`, `User!`: the first fetched document, or null.
    SingleObject,
    /// `[User]`, `[User!]!`: every fetched document in order.
    ListOfObjects,
    /// Anything else. A cursor cannot produce it.
    Invalid,
}

impl Classification {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SingleObject => "SINGLE_OBJECT",
            Self::ListOfObjects => "LIST_OF_OBJECTS",
            Self::Invalid => "INVALID",
        }
    }

    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a field type.
///
/// Non-null wrappers are transparent at both levels. Nested lists and
/// anything whose named type is not an object type are [`Invalid`].
///
/// [`Invalid`]: Classification::Invalid
pub fn classify(schema: &Schema, ty: &TypeRef) -> Classification {
    let is_object = |ty: &TypeRef| match ty.nullable() {
        TypeRef::Named(name) => schema.object(name).is_some(),
        _ => false,
    };

    match ty.nullable() {
        named @ TypeRef::Named(_) if is_object(named) => Classification::SingleObject,
        TypeRef::List(element) if is_object(element) => Classification::ListOfObjects,
        _ => Classification::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdl::build_schema;

    fn schema() -> Schema {
        build_schema(&[r#"
            type User { name: String }
            interface Node { id: ID }
            enum Color { RED }
            type Query { user: User }
        "#])
        .unwrap()
    }

    fn parse(ty: &str) -> TypeRef {
        let schema = build_schema(&[format!("type User {{ name: String }} interface Node {{ id: ID }} enum Color {{ RED }} type Query {{ sample: {ty} }}")]).unwrap();
        schema.field("Query", "sample").unwrap().ty.clone()
    }

    #[test]
    fn test_single_object() {
        let schema = schema();
        assert_eq!(classify(&schema, &parse("User")), Classification::SingleObject);
        assert_eq!(classify(&schema, &parse("User!")), Classification::SingleObject);
    }

    #[test]
    fn test_list_of_objects() {
        let schema = schema();
        for ty in ["[User]", "[User!]", "[User]!", "[User!]!"] {
            assert_eq!(classify(&schema, &parse(ty)), Classification::ListOfObjects, "{ty}");
        }
    }

    #[test]
    fn test_invalid() {
        let schema = schema();
        for ty in ["String", "String!", "[String]", "Color", "Node", "[[User]]", "[Node!]!"] {
            assert_eq!(classify(&schema, &parse(ty)), Classification::Invalid, "{ty}");
        }
    }
}
