//! Conversion from parsed SDL documents to the [`Schema`] model.

use crate::error::SchemaError;
use crate::schema::{
    DirectiveDefinition, DirectiveUse, EnumDef, EnumValueDef, FieldDef, InputFieldDef,
    InputObjectDef, InterfaceDef, ObjectDef, ScalarDef, Schema, SchemaBuilder, TypeDef, TypeRef,
    UnionDef,
};
use indexmap::IndexMap;
use lgql_core::Interner;
use lgql_syntax::{
    ast, Definition, Description, DirectiveLocation, OperationType, TypeDefinition,
};
use serde_json::{Map, Number, Value};

/// Builds a schema from one or more SDL sources.
///
/// Sources are named `typeDefs[i]` in diagnostics. Type extensions are
/// applied once every source has been read, so an extension may precede the
/// type it extends.
pub fn build_schema<S: AsRef<str>>(sources: &[S]) -> Result<Schema, SchemaError> {
    let interner = Interner::new();
    let mut documents = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        let source = source.as_ref();
        let result = lgql_syntax::parse(source, &interner);
        result
            .diagnostics
            .into_result(&format!("typeDefs[{index}]"), source)?;
        documents.push(result.document);
    }

    let mut lowering = Lowering {
        interner: &interner,
        builder: SchemaBuilder::new(),
        roots: IndexMap::new(),
        defined: Vec::new(),
    };

    let mut extensions = Vec::new();
    for document in &documents {
        for definition in &document.definitions {
            match definition {
                Definition::Schema(schema) => {
                    for op in &schema.operations {
                        lowering
                            .roots
                            .insert(op.operation, interner.get(op.type_name.value));
                    }
                }
                Definition::Type(def) => lowering.define(def)?,
                Definition::TypeExtension(def) => extensions.push(def),
                Definition::Directive(def) => lowering.define_directive(def)?,
                Definition::Operation(_) => {
                    return Err(SchemaError::ExecutableDefinition("operations"))
                }
                Definition::Fragment(_) => {
                    return Err(SchemaError::ExecutableDefinition("fragments"))
                }
            }
        }
    }

    for extension in extensions {
        lowering.extend(extension)?;
    }

    lowering.finish()
}

struct Lowering<'i> {
    interner: &'i Interner,
    builder: SchemaBuilder,
    roots: IndexMap<OperationType, String>,
    /// Names defined by the sources, as opposed to built-ins.
    defined: Vec<String>,
}

impl Lowering<'_> {
    fn name(&self, name: ast::Name) -> String {
        self.interner.get(name.value)
    }

    fn define(&mut self, def: &TypeDefinition<'_>) -> Result<(), SchemaError> {
        let name = self.name(def.name());
        if self.defined.contains(&name) {
            return Err(SchemaError::DuplicateType(name));
        }
        let type_def = self.lower_type(def)?;
        self.defined.push(name);
        self.builder = std::mem::take(&mut self.builder).add_type(type_def);
        Ok(())
    }

    fn lower_type(&self, def: &TypeDefinition<'_>) -> Result<TypeDef, SchemaError> {
        Ok(match def {
            TypeDefinition::Object(object) => {
                let name = self.name(object.name);
                TypeDef::Object(ObjectDef {
                    fields: self.lower_fields(&name, &object.fields)?,
                    description: description(object.description.as_ref()),
                    implements: object.implements.iter().map(|n| self.name(*n)).collect(),
                    name,
                })
            }
            TypeDefinition::Interface(interface) => {
                let name = self.name(interface.name);
                TypeDef::Interface(InterfaceDef {
                    fields: self.lower_fields(&name, &interface.fields)?,
                    description: description(interface.description.as_ref()),
                    implements: interface.implements.iter().map(|n| self.name(*n)).collect(),
                    name,
                })
            }
            TypeDefinition::Union(union) => TypeDef::Union(UnionDef {
                name: self.name(union.name),
                description: description(union.description.as_ref()),
                members: union.members.iter().map(|n| self.name(*n)).collect(),
            }),
            TypeDefinition::Enum(enumeration) => TypeDef::Enum(EnumDef {
                name: self.name(enumeration.name),
                description: description(enumeration.description.as_ref()),
                values: enumeration
                    .values
                    .iter()
                    .map(|v| EnumValueDef {
                        name: self.name(v.name),
                        description: description(v.description.as_ref()),
                    })
                    .collect(),
            }),
            TypeDefinition::Input(input) => {
                let name = self.name(input.name);
                TypeDef::InputObject(InputObjectDef {
                    fields: self.lower_inputs(&name, &input.fields)?,
                    description: description(input.description.as_ref()),
                    name,
                })
            }
            TypeDefinition::Scalar(scalar) => TypeDef::Scalar(ScalarDef {
                name: self.name(scalar.name),
                description: description(scalar.description.as_ref()),
            }),
        })
    }

    fn lower_fields(
        &self,
        owner: &str,
        fields: &[ast::FieldDefinition<'_>],
    ) -> Result<IndexMap<String, FieldDef>, SchemaError> {
        let mut lowered = IndexMap::with_capacity(fields.len());
        for field in fields {
            let name = self.name(field.name);
            if lowered.contains_key(&name) {
                return Err(SchemaError::DuplicateField(format!("{owner}.{name}")));
            }
            let coordinate = format!("{owner}.{name}");
            lowered.insert(
                name.clone(),
                FieldDef {
                    description: description(field.description.as_ref()),
                    ty: type_ref(&field.ty, self.interner),
                    arguments: self.lower_inputs(&coordinate, &field.arguments)?,
                    directives: field
                        .directives
                        .iter()
                        .map(|d| DirectiveUse {
                            name: self.name(d.name),
                            arguments: d
                                .arguments
                                .iter()
                                .map(|a| {
                                    (self.name(a.name), value_to_json(&a.value, self.interner, None))
                                })
                                .collect(),
                        })
                        .collect(),
                    name,
                },
            );
        }
        Ok(lowered)
    }

    fn lower_inputs(
        &self,
        owner: &str,
        inputs: &[ast::InputValueDefinition<'_>],
    ) -> Result<IndexMap<String, InputFieldDef>, SchemaError> {
        let mut lowered = IndexMap::with_capacity(inputs.len());
        for input in inputs {
            let name = self.name(input.name);
            if lowered.contains_key(&name) {
                return Err(SchemaError::DuplicateField(format!("{owner}({name}:)")));
            }
            lowered.insert(
                name.clone(),
                InputFieldDef {
                    description: description(input.description.as_ref()),
                    ty: type_ref(&input.ty, self.interner),
                    default_value: input
                        .default_value
                        .as_ref()
                        .map(|v| value_to_json(v, self.interner, None)),
                    name,
                },
            );
        }
        Ok(lowered)
    }

    fn define_directive(&mut self, def: &ast::DirectiveDefinitionNode<'_>) -> Result<(), SchemaError> {
        let name = self.name(def.name);
        if self.defined.contains(&format!("@{name}")) {
            return Err(SchemaError::DuplicateDirective(name));
        }
        let directive = DirectiveDefinition {
            arguments: self.lower_inputs(&format!("@{name}"), &def.arguments)?,
            description: description(def.description.as_ref()),
            locations: def.locations.clone(),
            repeatable: def.repeatable,
            name: name.clone(),
        };
        self.defined.push(format!("@{name}"));
        self.builder = std::mem::take(&mut self.builder).add_directive(directive);
        Ok(())
    }

    fn extend(&mut self, ext: &TypeDefinition<'_>) -> Result<(), SchemaError> {
        let name = self.name(ext.name());
        let added = self.lower_type(ext)?;
        let Some(existing) = self.builder.type_mut(&name) else {
            return Err(SchemaError::ExtendUndefined(name));
        };

        match (existing, added) {
            (TypeDef::Object(target), TypeDef::Object(added)) => {
                merge_fields(&name, &mut target.fields, added.fields)?;
                target.implements.extend(added.implements);
            }
            (TypeDef::Interface(target), TypeDef::Interface(added)) => {
                merge_fields(&name, &mut target.fields, added.fields)?;
                target.implements.extend(added.implements);
            }
            (TypeDef::Union(target), TypeDef::Union(added)) => {
                target.members.extend(added.members);
            }
            (TypeDef::Enum(target), TypeDef::Enum(added)) => {
                target.values.extend(added.values);
            }
            (TypeDef::InputObject(target), TypeDef::InputObject(added)) => {
                for (field_name, field) in added.fields {
                    if target.fields.contains_key(&field_name) {
                        return Err(SchemaError::DuplicateField(format!("{name}.{field_name}")));
                    }
                    target.fields.insert(field_name, field);
                }
            }
            (TypeDef::Scalar(_), TypeDef::Scalar(_)) => {}
            _ => {
                return Err(SchemaError::ExtensionKindMismatch {
                    name,
                    found: ext.kind_name(),
                })
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Schema, SchemaError> {
        let Lowering {
            builder, mut roots, ..
        } = self;

        for operation in [
            OperationType::Query,
            OperationType::Mutation,
            OperationType::Subscription,
        ] {
            let default = operation.default_type_name();
            if !roots.contains_key(&operation) && builder.has_type(default) {
                roots.insert(operation, default.to_string());
            }
        }

        let mut builder = builder;
        if let Some(name) = roots.get(&OperationType::Query) {
            builder = builder.query_type(name.clone());
        }
        if let Some(name) = roots.get(&OperationType::Mutation) {
            builder = builder.mutation_type(name.clone());
        }
        if let Some(name) = roots.get(&OperationType::Subscription) {
            builder = builder.subscription_type(name.clone());
        }

        let schema = builder.build();
        validate(&schema)?;
        Ok(schema)
    }
}

fn merge_fields(
    owner: &str,
    target: &mut IndexMap<String, FieldDef>,
    added: IndexMap<String, FieldDef>,
) -> Result<(), SchemaError> {
    for (name, field) in added {
        if target.contains_key(&name) {
            return Err(SchemaError::DuplicateField(format!("{owner}.{name}")));
        }
        target.insert(name, field);
    }
    Ok(())
}

fn validate(schema: &Schema) -> Result<(), SchemaError> {
    let Some(query) = schema.query_type.as_deref() else {
        return Err(SchemaError::MissingQueryType);
    };
    for root in [
        Some(query),
        schema.mutation_type.as_deref(),
        schema.subscription_type.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        if schema.object(root).is_none() {
            return Err(SchemaError::InvalidRootType(root.to_string()));
        }
    }

    let ensure = |name: &str, referenced_by: &str| {
        if schema.get_type(name).is_some() {
            Ok(())
        } else {
            Err(SchemaError::UnknownType {
                name: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
        }
    };

    for (type_name, def) in schema.types() {
        let (fields, implements) = match def {
            TypeDef::Object(object) => (&object.fields, &object.implements),
            TypeDef::Interface(interface) => (&interface.fields, &interface.implements),
            TypeDef::Union(union) => {
                for member in &union.members {
                    ensure(member, type_name)?;
                }
                continue;
            }
            TypeDef::InputObject(input) => {
                for (field_name, field) in &input.fields {
                    ensure(field.ty.named_type(), &format!("{type_name}.{field_name}"))?;
                }
                continue;
            }
            TypeDef::Scalar(_) | TypeDef::Enum(_) => continue,
        };

        for interface in implements {
            ensure(interface, type_name)?;
        }

        for (field_name, field) in fields {
            let coordinate = format!("{type_name}.{field_name}");
            ensure(field.ty.named_type(), &coordinate)?;
            for argument in field.arguments.values() {
                ensure(argument.ty.named_type(), &coordinate)?;
            }
            for directive in &field.directives {
                let Some(declared) = schema.directives.get(&directive.name) else {
                    return Err(SchemaError::UnknownDirective {
                        name: directive.name.clone(),
                        coordinate,
                    });
                };
                if !declared
                    .locations
                    .contains(&DirectiveLocation::FieldDefinition)
                {
                    return Err(SchemaError::MisplacedDirective {
                        name: directive.name.clone(),
                        location: DirectiveLocation::FieldDefinition.to_string(),
                        coordinate,
                    });
                }
            }
        }
    }
    Ok(())
}

fn description(description: Option<&Description<'_>>) -> Option<String> {
    description.map(Description::value)
}

/// Converts an AST type to a [`TypeRef`].
pub(crate) fn type_ref(ty: &ast::Type, interner: &Interner) -> TypeRef {
    match ty {
        ast::Type::Named(named) => TypeRef::Named(interner.get(named.name)),
        ast::Type::List(inner, _) => TypeRef::list(type_ref(inner, interner)),
        ast::Type::NonNull(inner, _) => TypeRef::non_null(type_ref(inner, interner)),
    }
}

/// Converts an AST value to JSON. Variables are looked up in `variables`;
/// an unset variable becomes `null`.
pub(crate) fn value_to_json(
    value: &ast::Value,
    interner: &Interner,
    variables: Option<&Map<String, Value>>,
) -> Value {
    match value {
        ast::Value::Variable(name) => variables
            .and_then(|vars| vars.get(&interner.get(name.value)))
            .cloned()
            .unwrap_or(Value::Null),
        ast::Value::Int(n, _) => Value::Number(Number::from(*n)),
        ast::Value::Float(f, _) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        ast::Value::String(s, _) => Value::String(s.clone()),
        ast::Value::Boolean(b, _) => Value::Bool(*b),
        ast::Value::Null(_) => Value::Null,
        ast::Value::Enum(name) => Value::String(interner.get(name.value)),
        ast::Value::List(items, _) => Value::Array(
            items
                .iter()
                .map(|item| value_to_json(item, interner, variables))
                .collect(),
        ),
        ast::Value::Object(fields, _) => Value::Object(
            fields
                .iter()
                .map(|(name, v)| (interner.get(name.value), value_to_json(v, interner, variables)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRUITS: &str = r#"
        directive @cursor on FIELD_DEFINITION

        type Fruit {
          _id: ID!
          name: String
        }

        type Query {
          hello: String!
          allFruits: [Fruit] @cursor
        }
    "#;

    #[test]
    fn test_build_schema() {
        let schema = build_schema(&[FRUITS]).unwrap();
        assert_eq!(schema.query_type.as_deref(), Some("Query"));
        assert!(schema.mutation_type.is_none());
        let field = schema.field("Query", "allFruits").unwrap();
        assert_eq!(field.ty.to_string(), "[Fruit]");
        assert!(field.has_directive("cursor"));
        assert_eq!(schema.field("Query", "hello").unwrap().ty.to_string(), "String!");
    }

    #[test]
    fn test_extension_across_sources() {
        let extension = "extend type Query { fruitCount(min: Int = 0): Int }";
        let schema = build_schema(&[extension, FRUITS]).unwrap();
        let field = schema.field("Query", "fruitCount").unwrap();
        assert_eq!(
            field.arguments["min"].default_value,
            Some(serde_json::json!(0))
        );
    }

    #[test]
    fn test_extend_undefined() {
        let err = build_schema(&[FRUITS, "extend type Basket { size: Int }"]).unwrap_err();
        assert!(matches!(err, SchemaError::ExtendUndefined(name) if name == "Basket"));
    }

    #[test]
    fn test_unknown_type() {
        let err = build_schema(&["type Query { basket: Basket }"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown type `Basket` referenced by `Query.basket`"
        );
    }

    #[test]
    fn test_unknown_and_misplaced_directive() {
        let err = build_schema(&["type Query { hello: String @live }"]).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownDirective { .. }));

        let err = build_schema(&["type Query { hello: String @include(if: true) }"]).unwrap_err();
        assert!(matches!(err, SchemaError::MisplacedDirective { .. }));
    }

    #[test]
    fn test_missing_query_type() {
        let err = build_schema(&["type Fruit { name: String }"]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingQueryType));
    }

    #[test]
    fn test_syntax_error_names_source() {
        let err = build_schema(&[FRUITS, "type Broken {"]).unwrap_err();
        let SchemaError::Syntax(errors) = err else {
            panic!("expected syntax error");
        };
        assert_eq!(errors.name, "typeDefs[1]");
    }

    #[test]
    fn test_executable_definitions_rejected() {
        let err = build_schema(&[FRUITS, "{ hello }"]).unwrap_err();
        assert!(matches!(err, SchemaError::ExecutableDefinition("operations")));
    }
}
