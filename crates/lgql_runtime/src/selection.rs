//! Selection trees.
//!
//! A [`SelectionTree`] is an operation with fragments inlined, `@skip` and
//! `@include` evaluated, variables substituted and duplicate response keys
//! merged. It is built once per request and handed to resolvers through
//! [`ResolverInfo`](crate::ResolverInfo), so a nested cursor field finds its
//! own sub-selection without re-reading the document.

use crate::error::RequestError;
use crate::executor::ExecutorConfig;
use crate::sdl::{type_ref, value_to_json};
use indexmap::IndexMap;
use lgql_core::Interner;
use lgql_syntax::{ast, Document, OperationType, Selection};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// One selected field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: IndexMap<String, Value>,
    pub children: Vec<Arc<FieldSelection>>,
    /// Whether the field had a selection set at all.
    pub has_selection_set: bool,
    /// Set when the field was selected through a fragment on a type.
    pub type_condition: Option<String>,
}

impl FieldSelection {
    /// A field with no arguments or sub-selection.
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: IndexMap::new(),
            children: Vec::new(),
            has_selection_set: false,
            type_condition: None,
        }
    }

    /// The key this field appears under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Finds a direct child by response key.
    pub fn child(&self, response_key: &str) -> Option<&Arc<FieldSelection>> {
        self.children
            .iter()
            .find(|c| c.response_key() == response_key)
    }
}

/// A resolved operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionTree {
    pub operation: OperationType,
    pub name: Option<String>,
    /// Variable values after defaults.
    pub variables: Map<String, Value>,
    pub root: Vec<Arc<FieldSelection>>,
}

impl SelectionTree {
    /// Parses an operation document and builds its tree.
    pub fn parse(
        source: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
        config: &ExecutorConfig,
    ) -> Result<Self, RequestError> {
        let interner = Interner::new();
        let result = lgql_syntax::parse(source, &interner);
        result.diagnostics.into_result("query", source)?;
        Self::build(&result.document, &interner, operation_name, variables, config)
    }

    /// Builds the tree for one operation of a parsed document.
    pub fn build(
        document: &Document<'_>,
        interner: &Interner,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
        config: &ExecutorConfig,
    ) -> Result<Self, RequestError> {
        let operations = document.operations();
        let operation = match operation_name {
            Some(name) => operations
                .iter()
                .find(|op| op.name.is_some_and(|n| interner.is(n.value, name)))
                .ok_or_else(|| RequestError::UnknownOperation(name.to_string()))?,
            None => match operations.as_slice() {
                [] => return Err(RequestError::NoOperation),
                [only] => only,
                _ => return Err(RequestError::AmbiguousOperation),
            },
        };

        let mut values = Map::new();
        for definition in &operation.variables {
            let name = interner.get(definition.name.value);
            if let Some(value) = variables.get(&name) {
                values.insert(name, value.clone());
            } else if let Some(default) = &definition.default_value {
                values.insert(name, value_to_json(default, interner, None));
            } else if type_ref(&definition.ty, interner).is_non_null() {
                return Err(RequestError::MissingVariable(name));
            }
        }
        let declared: Vec<String> = operation
            .variables
            .iter()
            .map(|v| interner.get(v.name.value))
            .collect();

        let walker = Walker {
            interner,
            fragments: document
                .fragments()
                .into_iter()
                .map(|f| (interner.get(f.name.value), f))
                .collect(),
            variables: &values,
            declared: &declared,
            max_depth: config.max_depth,
        };
        let mut root = Vec::new();
        walker.collect(&operation.selection_set, None, 1, &mut Vec::new(), &mut root)?;

        Ok(Self {
            operation: operation.operation,
            name: operation.name.map(|n| interner.get(n.value)),
            variables: values,
            root,
        })
    }

    /// Looks up a field by its path of response keys.
    pub fn lookup(&self, path: &[&str]) -> Option<&Arc<FieldSelection>> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.iter().find(|f| f.response_key() == *first)?;
        for key in rest {
            current = current.child(key)?;
        }
        Some(current)
    }
}

struct Walker<'d, 'a> {
    interner: &'d Interner,
    fragments: IndexMap<String, &'d ast::FragmentDefinition>,
    variables: &'a Map<String, Value>,
    declared: &'a [String],
    max_depth: Option<usize>,
}

impl Walker<'_, '_> {
    fn collect(
        &self,
        set: &ast::SelectionSet,
        type_condition: Option<&str>,
        depth: usize,
        spreading: &mut Vec<String>,
        out: &mut Vec<Arc<FieldSelection>>,
    ) -> Result<(), RequestError> {
        for selection in &set.selections {
            match selection {
                Selection::Field(field) => {
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    if let Some(max) = self.max_depth {
                        if depth > max {
                            return Err(RequestError::DepthLimit { max });
                        }
                    }
                    let mut arguments = IndexMap::new();
                    for argument in &field.arguments {
                        arguments.insert(
                            self.interner.get(argument.name.value),
                            self.value(&argument.value)?,
                        );
                    }
                    let mut children = Vec::new();
                    if let Some(sub) = &field.selection_set {
                        self.collect(sub, None, depth + 1, spreading, &mut children)?;
                    }
                    merge(
                        out,
                        FieldSelection {
                            name: self.interner.get(field.name.value),
                            alias: field.alias.map(|a| self.interner.get(a.value)),
                            arguments,
                            children,
                            has_selection_set: field.selection_set.is_some(),
                            type_condition: type_condition.map(str::to_string),
                        },
                    );
                }
                Selection::InlineFragment(fragment) => {
                    if !self.included(&fragment.directives)? {
                        continue;
                    }
                    let condition = fragment
                        .type_condition
                        .map(|n| self.interner.get(n.value));
                    self.collect(
                        &fragment.selection_set,
                        condition.as_deref().or(type_condition),
                        depth,
                        spreading,
                        out,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let name = self.interner.get(spread.name.value);
                    let Some(fragment) = self.fragments.get(&name) else {
                        return Err(RequestError::UnknownFragment(name));
                    };
                    if spreading.contains(&name) {
                        return Err(RequestError::FragmentCycle(name));
                    }
                    let condition = self.interner.get(fragment.type_condition.value);
                    spreading.push(name);
                    self.collect(
                        &fragment.selection_set,
                        Some(&condition),
                        depth,
                        spreading,
                        out,
                    )?;
                    spreading.pop();
                }
            }
        }
        Ok(())
    }

    /// Evaluates `@skip` and `@include`.
    fn included(&self, directives: &[ast::Directive]) -> Result<bool, RequestError> {
        for directive in directives {
            let skip = self.interner.is(directive.name.value, "skip");
            if !skip && !self.interner.is(directive.name.value, "include") {
                continue;
            }
            let condition = directive
                .arguments
                .iter()
                .find(|a| self.interner.is(a.name.value, "if"))
                .map(|a| self.value(&a.value))
                .transpose()?
                .and_then(|v| v.as_bool())
                .unwrap_or(!skip);
            if condition == skip {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn value(&self, value: &ast::Value) -> Result<Value, RequestError> {
        self.check_variables(value)?;
        Ok(value_to_json(value, self.interner, Some(self.variables)))
    }

    fn check_variables(&self, value: &ast::Value) -> Result<(), RequestError> {
        match value {
            ast::Value::Variable(name) => {
                let name = self.interner.get(name.value);
                if self.declared.contains(&name) {
                    Ok(())
                } else {
                    Err(RequestError::UndefinedVariable(name))
                }
            }
            ast::Value::List(items, _) => items.iter().try_for_each(|v| self.check_variables(v)),
            ast::Value::Object(fields, _) => {
                fields.iter().try_for_each(|(_, v)| self.check_variables(v))
            }
            _ => Ok(()),
        }
    }
}

/// Adds a field, merging it into an earlier field with the same response
/// key and type condition.
fn merge(out: &mut Vec<Arc<FieldSelection>>, field: FieldSelection) {
    let existing = out.iter_mut().find(|f| {
        f.response_key() == field.response_key() && f.type_condition == field.type_condition
    });
    match existing {
        Some(existing) => {
            let existing = Arc::make_mut(existing);
            existing.has_selection_set |= field.has_selection_set;
            for child in field.children {
                merge(
                    &mut existing.children,
                    Arc::try_unwrap(child).unwrap_or_else(|shared| (*shared).clone()),
                );
            }
        }
        None => out.push(Arc::new(field)),
    }
}

impl fmt::Display for SelectionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation.as_str())?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        writeln!(f)?;
        for field in &self.root {
            write_field(f, field, 1)?;
        }
        Ok(())
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, field: &FieldSelection, depth: usize) -> fmt::Result {
    write!(f, "{:width$}", "", width = depth * 2)?;
    if let Some(alias) = &field.alias {
        write!(f, "{alias}: ")?;
    }
    f.write_str(&field.name)?;
    if !field.arguments.is_empty() {
        let arguments: Vec<String> = field
            .arguments
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        write!(f, "({})", arguments.join(", "))?;
    }
    if let Some(condition) = &field.type_condition {
        write!(f, " on {condition}")?;
    }
    writeln!(f)?;
    for child in &field.children {
        write_field(f, child, depth + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(source: &str, variables: Value) -> Result<SelectionTree, RequestError> {
        let Value::Object(variables) = variables else {
            panic!("variables must be an object");
        };
        SelectionTree::parse(source, None, &variables, &ExecutorConfig::default())
    }

    #[test]
    fn test_fragments_and_merging() {
        let tree = tree(
            r#"
            query Entries($withAuthor: Boolean = true) {
              entries: allEntries {
                content
                author @include(if: $withAuthor) { ...AuthorFields }
                author { name }
                ... on Entry { _id }
              }
              hello @skip(if: true)
            }

            fragment AuthorFields on User { email }
            "#,
            json!({}),
        )
        .unwrap();

        insta::assert_snapshot!(tree.to_string(), @r"
        query Entries
          entries: allEntries
            content
            author
              email on User
              name
            _id on Entry
        ");

        let author = tree.lookup(&["entries", "author"]).unwrap();
        assert_eq!(author.children.len(), 2);
        assert!(tree.lookup(&["hello"]).is_none());
        assert_eq!(tree.variables["withAuthor"], json!(true));
    }

    #[test]
    fn test_arguments_use_variables() {
        let tree = tree(
            r#"query($sel: [String!]!) { selectedFruits(selection: $sel) { name } }"#,
            json!({"sel": ["banana"]}),
        )
        .unwrap();
        let field = tree.lookup(&["selectedFruits"]).unwrap();
        assert_eq!(field.arguments["selection"], json!(["banana"]));
        assert!(field.has_selection_set);
    }

    #[test]
    fn test_request_errors() {
        assert!(matches!(
            tree("query($sel: [String!]!) { selectedFruits(selection: $sel) { name } }", json!({})),
            Err(RequestError::MissingVariable(name)) if name == "sel"
        ));
        assert!(matches!(
            tree("{ selectedFruits(selection: $sel) { name } }", json!({})),
            Err(RequestError::UndefinedVariable(_))
        ));
        assert!(matches!(
            tree("{ ...Missing }", json!({})),
            Err(RequestError::UnknownFragment(_))
        ));
        assert!(matches!(
            tree("{ ...A } fragment A on Query { ...A }", json!({})),
            Err(RequestError::FragmentCycle(name)) if name == "A"
        ));
        assert!(matches!(
            tree("query A { hello } query B { hello }", json!({})),
            Err(RequestError::AmbiguousOperation)
        ));
        assert!(matches!(
            tree("fragment A on Query { hello }", json!({})),
            Err(RequestError::NoOperation)
        ));
        assert!(matches!(tree("{ hello", json!({})), Err(RequestError::Syntax(_))));
    }

    #[test]
    fn test_named_operation_and_depth_limit() {
        let source = "query A { hello } query B { allEntries { author { name } } }";
        let config = ExecutorConfig::default().with_max_depth(2);
        let err = SelectionTree::parse(source, Some("B"), &Map::new(), &config).unwrap_err();
        assert!(matches!(err, RequestError::DepthLimit { max: 2 }));

        let tree = SelectionTree::parse(source, Some("A"), &Map::new(), &config).unwrap();
        assert_eq!(tree.name.as_deref(), Some("A"));
        assert!(matches!(
            SelectionTree::parse(source, Some("C"), &Map::new(), &config),
            Err(RequestError::UnknownOperation(_))
        ));
    }
}
