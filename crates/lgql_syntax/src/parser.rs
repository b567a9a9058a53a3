//! Recursive descent parser for GraphQL type system and executable documents.

use crate::ast::*;
use crate::lexer::{block_string_value, string_value, Lexer};
use crate::token::{DirectiveLocation, Token, TokenKind};
use lgql_core::{diagnostics::codes, DiagnosticBag, Interner, Span};

/// Parser over a single source document.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    last_end: u32,
    diagnostics: DiagnosticBag,
}

/// Result of parsing.
pub struct ParseResult<'a> {
    pub document: Document<'a>,
    pub diagnostics: DiagnosticBag,
}

impl ParseResult<'_> {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Parses a source string into a document.
pub fn parse<'a>(source: &'a str, interner: &'a Interner) -> ParseResult<'a> {
    let mut parser = Parser::new(source, interner);
    let document = parser.parse_document();
    ParseResult {
        document,
        diagnostics: parser.diagnostics,
    }
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, interner: &'a Interner) -> Self {
        let mut parser = Self {
            lexer: Lexer::new(source, interner),
            current: Token::new(TokenKind::Eof, Span::at(0)),
            last_end: 0,
            diagnostics: DiagnosticBag::new(),
        };
        parser.current = parser.lex();
        parser
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    /// Pulls the next significant token, reporting lexical errors on the way.
    fn lex(&mut self) -> Token {
        loop {
            let token = self.lexer.next_token();
            if token.kind != TokenKind::Error {
                return token;
            }
            let text = self.lexer.span_text(token.span);
            if text.starts_with('"') {
                self.diagnostics.error(
                    codes::UNTERMINATED_STRING,
                    "unterminated string",
                    token.span,
                    "string is never closed",
                );
            } else {
                self.diagnostics.error(
                    codes::INVALID_SYNTAX,
                    "unexpected character",
                    token.span,
                    format!("`{text}` is not valid here"),
                );
            }
        }
    }

    #[inline]
    fn at(&self) -> TokenKind {
        self.current.kind
    }

    #[inline]
    fn at_kind(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn advance(&mut self) {
        self.last_end = self.current.span.end;
        self.current = self.lex();
    }

    /// Consumes `kind` if present.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at_kind(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.eat(kind) {
            true
        } else {
            self.error_expected(kind.as_str());
            false
        }
    }

    fn span_from(&self, start: u32) -> Span {
        Span::new(start, self.last_end.max(start))
    }

    fn current_text(&self) -> &'a str {
        self.lexer.span_text(self.current.span)
    }

    fn error(&mut self, title: &str, message: impl Into<String>) {
        self.diagnostics
            .error(codes::INVALID_SYNTAX, title, self.current.span, message);
    }

    fn error_expected(&mut self, expected: &str) {
        let (code, found) = if self.at_kind(TokenKind::Eof) {
            (codes::UNEXPECTED_EOF, "<eof>".to_string())
        } else {
            (codes::UNEXPECTED_TOKEN, format!("`{}`", self.current_text()))
        };
        self.diagnostics.error(
            code,
            "unexpected token",
            self.current.span,
            format!("expected {expected}, found {found}"),
        );
    }

    /// Parses a name. Keywords are accepted wherever a name is expected.
    fn parse_name(&mut self) -> Name {
        let span = self.current.span;
        if self.at().is_name() {
            let value = self.lexer.intern_span(span);
            self.advance();
            Name::new(value, span)
        } else {
            self.error_expected("a name");
            Name::new(self.lexer.intern_span(Span::at(span.start)), Span::at(span.start))
        }
    }

    /// Parses `open item* close`, guaranteeing progress on every iteration.
    fn parse_delimited<T>(
        &mut self,
        open: TokenKind,
        close: TokenKind,
        mut item: impl FnMut(&mut Self) -> Option<T>,
    ) -> Vec<T> {
        let mut items = Vec::new();
        if !self.expect(open) {
            return items;
        }
        while !self.at_kind(close) && !self.at_kind(TokenKind::Eof) {
            let before = self.current.span.start;
            if let Some(value) = item(self) {
                items.push(value);
            }
            if self.current.span.start == before && !self.at_kind(close) {
                self.advance();
            }
        }
        self.expect(close);
        items
    }

    // ------------------------------------------------------------------
    // Document
    // ------------------------------------------------------------------

    pub fn parse_document(&mut self) -> Document<'a> {
        let start = self.current.span.start;
        let mut definitions = Vec::new();

        while !self.at_kind(TokenKind::Eof) {
            let before = self.current.span.start;
            if let Some(def) = self.parse_definition() {
                definitions.push(def);
            }
            if self.current.span.start == before {
                // Recovery: skip the offending token
                self.advance();
            }
        }

        Document {
            definitions,
            span: Span::new(start, self.current.span.end),
        }
    }

    fn parse_definition(&mut self) -> Option<Definition<'a>> {
        let description = self.parse_description();

        match self.at() {
            TokenKind::Schema => Some(Definition::Schema(
                self.parse_schema_definition(description),
            )),
            TokenKind::Type
            | TokenKind::Interface
            | TokenKind::Union
            | TokenKind::Enum
            | TokenKind::Input
            | TokenKind::Scalar => self.parse_type_definition(description).map(Definition::Type),
            TokenKind::Extend => {
                let start = self.current.span.start;
                self.advance();
                let mut def = self.parse_type_definition(None)?;
                widen_span(&mut def, start);
                Some(Definition::TypeExtension(def))
            }
            TokenKind::Directive => Some(Definition::Directive(
                self.parse_directive_definition(description),
            )),
            TokenKind::Query | TokenKind::Mutation | TokenKind::Subscription | TokenKind::LBrace => {
                Some(Definition::Operation(self.parse_operation()))
            }
            TokenKind::Fragment => Some(Definition::Fragment(self.parse_fragment_definition())),
            _ => {
                self.error(
                    "expected definition",
                    format!("`{}` cannot start a definition", self.current_text()),
                );
                None
            }
        }
    }

    fn parse_description(&mut self) -> Option<Description<'a>> {
        let block = match self.at() {
            TokenKind::StringLiteral => false,
            TokenKind::BlockStringLiteral => true,
            _ => return None,
        };
        let span = self.current.span;
        let raw = self.current_text();
        self.advance();
        Some(Description::new(raw, block, span))
    }

    // ------------------------------------------------------------------
    // Type system
    // ------------------------------------------------------------------

    fn parse_schema_definition(
        &mut self,
        description: Option<Description<'a>>,
    ) -> SchemaDefinition<'a> {
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        self.advance(); // schema

        let directives = self.parse_directives();
        let operations = self.parse_delimited(TokenKind::LBrace, TokenKind::RBrace, |p| {
            let op_start = p.current.span.start;
            let operation = match p.at() {
                TokenKind::Query => OperationType::Query,
                TokenKind::Mutation => OperationType::Mutation,
                TokenKind::Subscription => OperationType::Subscription,
                _ => {
                    p.error_expected("query, mutation or subscription");
                    return None;
                }
            };
            p.advance();
            p.expect(TokenKind::Colon);
            let type_name = p.parse_name();
            Some(OperationTypeDefinition {
                operation,
                type_name,
                span: p.span_from(op_start),
            })
        });

        SchemaDefinition {
            description,
            directives,
            operations,
            span: self.span_from(start),
        }
    }

    fn parse_type_definition(
        &mut self,
        description: Option<Description<'a>>,
    ) -> Option<TypeDefinition<'a>> {
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        let keyword = self.at();
        match keyword {
            TokenKind::Type | TokenKind::Interface => {
                self.advance();
                let name = self.parse_name();
                let implements = self.parse_implements();
                let directives = self.parse_directives();
                let fields = if self.at_kind(TokenKind::LBrace) {
                    self.parse_delimited(TokenKind::LBrace, TokenKind::RBrace, |p| {
                        Some(p.parse_field_definition())
                    })
                } else {
                    Vec::new()
                };
                let span = self.span_from(start);
                Some(if keyword == TokenKind::Type {
                    TypeDefinition::Object(ObjectTypeDefinition {
                        description,
                        name,
                        implements,
                        directives,
                        fields,
                        span,
                    })
                } else {
                    TypeDefinition::Interface(InterfaceTypeDefinition {
                        description,
                        name,
                        implements,
                        directives,
                        fields,
                        span,
                    })
                })
            }
            TokenKind::Union => {
                self.advance();
                let name = self.parse_name();
                let directives = self.parse_directives();
                let mut members = Vec::new();
                if self.eat(TokenKind::Eq) {
                    self.eat(TokenKind::Pipe);
                    members.push(self.parse_name());
                    while self.eat(TokenKind::Pipe) {
                        members.push(self.parse_name());
                    }
                }
                Some(TypeDefinition::Union(UnionTypeDefinition {
                    description,
                    name,
                    directives,
                    members,
                    span: self.span_from(start),
                }))
            }
            TokenKind::Enum => {
                self.advance();
                let name = self.parse_name();
                let directives = self.parse_directives();
                let values = if self.at_kind(TokenKind::LBrace) {
                    self.parse_delimited(TokenKind::LBrace, TokenKind::RBrace, |p| {
                        let description = p.parse_description();
                        let value_start = description
                            .as_ref()
                            .map_or(p.current.span.start, |d| d.span.start);
                        let name = p.parse_name();
                        let directives = p.parse_directives();
                        Some(EnumValueDefinition {
                            description,
                            name,
                            directives,
                            span: p.span_from(value_start),
                        })
                    })
                } else {
                    Vec::new()
                };
                Some(TypeDefinition::Enum(EnumTypeDefinition {
                    description,
                    name,
                    directives,
                    values,
                    span: self.span_from(start),
                }))
            }
            TokenKind::Input => {
                self.advance();
                let name = self.parse_name();
                let directives = self.parse_directives();
                let fields = if self.at_kind(TokenKind::LBrace) {
                    self.parse_delimited(TokenKind::LBrace, TokenKind::RBrace, |p| {
                        Some(p.parse_input_value_definition())
                    })
                } else {
                    Vec::new()
                };
                Some(TypeDefinition::Input(InputObjectTypeDefinition {
                    description,
                    name,
                    directives,
                    fields,
                    span: self.span_from(start),
                }))
            }
            TokenKind::Scalar => {
                self.advance();
                let name = self.parse_name();
                let directives = self.parse_directives();
                Some(TypeDefinition::Scalar(ScalarTypeDefinition {
                    description,
                    name,
                    directives,
                    span: self.span_from(start),
                }))
            }
            _ => {
                self.error_expected("a type definition");
                None
            }
        }
    }

    fn parse_implements(&mut self) -> Vec<Name> {
        let mut interfaces = Vec::new();
        if self.eat(TokenKind::Implements) {
            self.eat(TokenKind::Amp);
            interfaces.push(self.parse_name());
            while self.eat(TokenKind::Amp) {
                interfaces.push(self.parse_name());
            }
        }
        interfaces
    }

    fn parse_field_definition(&mut self) -> FieldDefinition<'a> {
        let description = self.parse_description();
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        let name = self.parse_name();
        let arguments = self.parse_argument_definitions();
        self.expect(TokenKind::Colon);
        let ty = self.parse_type();
        let directives = self.parse_directives();

        FieldDefinition {
            description,
            name,
            arguments,
            ty,
            directives,
            span: self.span_from(start),
        }
    }

    fn parse_argument_definitions(&mut self) -> Vec<InputValueDefinition<'a>> {
        if !self.at_kind(TokenKind::LParen) {
            return Vec::new();
        }
        self.parse_delimited(TokenKind::LParen, TokenKind::RParen, |p| {
            Some(p.parse_input_value_definition())
        })
    }

    fn parse_input_value_definition(&mut self) -> InputValueDefinition<'a> {
        let description = self.parse_description();
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        let name = self.parse_name();
        self.expect(TokenKind::Colon);
        let ty = self.parse_type();
        let default_value = if self.eat(TokenKind::Eq) {
            Some(self.parse_value(true))
        } else {
            None
        };
        let directives = self.parse_directives();

        InputValueDefinition {
            description,
            name,
            ty,
            default_value,
            directives,
            span: self.span_from(start),
        }
    }

    fn parse_directive_definition(
        &mut self,
        description: Option<Description<'a>>,
    ) -> DirectiveDefinitionNode<'a> {
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        self.advance(); // directive
        self.expect(TokenKind::At);
        let name = self.parse_name();
        let arguments = self.parse_argument_definitions();
        let repeatable = self.eat(TokenKind::Repeatable);
        self.expect(TokenKind::On);

        let mut locations = Vec::new();
        self.eat(TokenKind::Pipe);
        loop {
            if let Some(location) = self.parse_directive_location() {
                locations.push(location);
            }
            if !self.eat(TokenKind::Pipe) {
                break;
            }
        }

        DirectiveDefinitionNode {
            description,
            name,
            arguments,
            repeatable,
            locations,
            span: self.span_from(start),
        }
    }

    fn parse_directive_location(&mut self) -> Option<DirectiveLocation> {
        if !self.at().is_name() {
            self.error_expected("a directive location");
            return None;
        }
        let text = self.current_text();
        let location = DirectiveLocation::parse(text);
        if location.is_none() {
            self.diagnostics.error(
                codes::INVALID_DIRECTIVE,
                "unknown directive location",
                self.current.span,
                format!("`{text}` is not a directive location"),
            );
        }
        self.advance();
        location
    }

    // ------------------------------------------------------------------
    // Types and values
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Type {
        let start = self.current.span.start;
        let base = if self.eat(TokenKind::LBracket) {
            let inner = self.parse_type();
            self.expect(TokenKind::RBracket);
            Type::List(Box::new(inner), self.span_from(start))
        } else {
            let name = self.parse_name();
            Type::Named(NamedType {
                name: name.value,
                span: name.span,
            })
        };

        if self.eat(TokenKind::Bang) {
            Type::NonNull(Box::new(base), self.span_from(start))
        } else {
            base
        }
    }

    /// Parses a value. Variables are rejected when `constant` is set.
    fn parse_value(&mut self, constant: bool) -> Value {
        let span = self.current.span;
        match self.at() {
            TokenKind::Dollar => {
                self.advance();
                let name = self.parse_name();
                if constant {
                    self.diagnostics.error(
                        codes::INVALID_SYNTAX,
                        "unexpected variable",
                        span.to(name.span),
                        "variables are not allowed in constant values",
                    );
                }
                Value::Variable(Name::new(name.value, span.to(name.span)))
            }
            TokenKind::IntLiteral => {
                let text = self.current_text();
                self.advance();
                match text.parse::<i64>() {
                    Ok(value) => Value::Int(value, span),
                    Err(_) => {
                        self.diagnostics.error(
                            codes::INVALID_SYNTAX,
                            "integer out of range",
                            span,
                            format!("`{text}` does not fit in 64 bits"),
                        );
                        Value::Null(span)
                    }
                }
            }
            TokenKind::FloatLiteral => {
                let value = self.current_text().parse::<f64>().unwrap_or(f64::NAN);
                self.advance();
                Value::Float(value, span)
            }
            TokenKind::StringLiteral => {
                let value = string_value(self.current_text());
                self.advance();
                Value::String(value, span)
            }
            TokenKind::BlockStringLiteral => {
                let value = block_string_value(self.current_text());
                self.advance();
                Value::String(value, span)
            }
            TokenKind::True => {
                self.advance();
                Value::Boolean(true, span)
            }
            TokenKind::False => {
                self.advance();
                Value::Boolean(false, span)
            }
            TokenKind::Null => {
                self.advance();
                Value::Null(span)
            }
            TokenKind::LBracket => {
                let items = self.parse_delimited(TokenKind::LBracket, TokenKind::RBracket, |p| {
                    Some(p.parse_value(constant))
                });
                Value::List(items, self.span_from(span.start))
            }
            TokenKind::LBrace => {
                let fields = self.parse_delimited(TokenKind::LBrace, TokenKind::RBrace, |p| {
                    let name = p.parse_name();
                    p.expect(TokenKind::Colon);
                    Some((name, p.parse_value(constant)))
                });
                Value::Object(fields, self.span_from(span.start))
            }
            kind if kind.is_name() => Value::Enum(self.parse_name()),
            _ => {
                self.error_expected("a value");
                Value::Null(Span::at(span.start))
            }
        }
    }

    fn parse_directives(&mut self) -> Vec<Directive> {
        let mut directives = Vec::new();
        while self.at_kind(TokenKind::At) {
            let start = self.current.span.start;
            self.advance();
            let name = self.parse_name();
            let arguments = self.parse_arguments();
            directives.push(Directive {
                name,
                arguments,
                span: self.span_from(start),
            });
        }
        directives
    }

    fn parse_arguments(&mut self) -> Vec<Argument> {
        if !self.at_kind(TokenKind::LParen) {
            return Vec::new();
        }
        self.parse_delimited(TokenKind::LParen, TokenKind::RParen, |p| {
            let start = p.current.span.start;
            let name = p.parse_name();
            p.expect(TokenKind::Colon);
            let value = p.parse_value(false);
            Some(Argument {
                name,
                value,
                span: p.span_from(start),
            })
        })
    }

    // ------------------------------------------------------------------
    // Executable definitions
    // ------------------------------------------------------------------

    fn parse_operation(&mut self) -> OperationDefinition {
        let start = self.current.span.start;

        if self.at_kind(TokenKind::LBrace) {
            let selection_set = self.parse_selection_set();
            return OperationDefinition {
                operation: OperationType::Query,
                name: None,
                variables: Vec::new(),
                directives: Vec::new(),
                selection_set,
                span: self.span_from(start),
            };
        }

        let operation = match self.at() {
            TokenKind::Mutation => OperationType::Mutation,
            TokenKind::Subscription => OperationType::Subscription,
            _ => OperationType::Query,
        };
        self.advance();

        let name = if self.at().is_name() {
            Some(self.parse_name())
        } else {
            None
        };
        let variables = if self.at_kind(TokenKind::LParen) {
            self.parse_delimited(TokenKind::LParen, TokenKind::RParen, |p| {
                Some(p.parse_variable_definition())
            })
        } else {
            Vec::new()
        };
        let directives = self.parse_directives();
        let selection_set = self.parse_selection_set();

        OperationDefinition {
            operation,
            name,
            variables,
            directives,
            selection_set,
            span: self.span_from(start),
        }
    }

    fn parse_variable_definition(&mut self) -> VariableDefinition {
        let start = self.current.span.start;
        self.expect(TokenKind::Dollar);
        let name = self.parse_name();
        self.expect(TokenKind::Colon);
        let ty = self.parse_type();
        let default_value = if self.eat(TokenKind::Eq) {
            Some(self.parse_value(true))
        } else {
            None
        };
        let directives = self.parse_directives();

        VariableDefinition {
            name,
            ty,
            default_value,
            directives,
            span: self.span_from(start),
        }
    }

    fn parse_fragment_definition(&mut self) -> FragmentDefinition {
        let start = self.current.span.start;
        self.advance(); // fragment
        let name = self.parse_name();
        self.expect(TokenKind::On);
        let type_condition = self.parse_name();
        let directives = self.parse_directives();
        let selection_set = self.parse_selection_set();

        FragmentDefinition {
            name,
            type_condition,
            directives,
            selection_set,
            span: self.span_from(start),
        }
    }

    fn parse_selection_set(&mut self) -> SelectionSet {
        let start = self.current.span.start;
        let selections = self.parse_delimited(TokenKind::LBrace, TokenKind::RBrace, |p| {
            p.parse_selection()
        });
        if selections.is_empty() {
            self.diagnostics.error(
                codes::INVALID_SYNTAX,
                "empty selection set",
                self.span_from(start),
                "a selection set must select at least one field",
            );
        }
        SelectionSet {
            selections,
            span: self.span_from(start),
        }
    }

    fn parse_selection(&mut self) -> Option<Selection> {
        let start = self.current.span.start;

        if self.eat(TokenKind::Spread) {
            if self.at().is_name() && !self.at_kind(TokenKind::On) {
                let name = self.parse_name();
                let directives = self.parse_directives();
                return Some(Selection::FragmentSpread(FragmentSpread {
                    name,
                    directives,
                    span: self.span_from(start),
                }));
            }

            let type_condition = if self.eat(TokenKind::On) {
                Some(self.parse_name())
            } else {
                None
            };
            let directives = self.parse_directives();
            let selection_set = self.parse_selection_set();
            return Some(Selection::InlineFragment(InlineFragment {
                type_condition,
                directives,
                selection_set,
                span: self.span_from(start),
            }));
        }

        if !self.at().is_name() {
            self.error_expected("a field");
            return None;
        }

        let first = self.parse_name();
        let (alias, name) = if self.eat(TokenKind::Colon) {
            (Some(first), self.parse_name())
        } else {
            (None, first)
        };
        let arguments = self.parse_arguments();
        let directives = self.parse_directives();
        let selection_set = if self.at_kind(TokenKind::LBrace) {
            Some(self.parse_selection_set())
        } else {
            None
        };

        Some(Selection::Field(FieldSelection {
            alias,
            name,
            arguments,
            directives,
            selection_set,
            span: self.span_from(start),
        }))
    }
}

/// Extends a definition's span back to cover a leading `extend` keyword.
fn widen_span(def: &mut TypeDefinition<'_>, start: u32) {
    let span = match def {
        TypeDefinition::Object(d) => &mut d.span,
        TypeDefinition::Interface(d) => &mut d.span,
        TypeDefinition::Union(d) => &mut d.span,
        TypeDefinition::Enum(d) => &mut d.span,
        TypeDefinition::Input(d) => &mut d.span,
        TypeDefinition::Scalar(d) => &mut d.span,
    };
    span.start = start;
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRUIT_SCHEMA: &str = r#"
        directive @cursor on FIELD_DEFINITION

        "A fruit in the basket."
        type Fruit {
          _id: String
          name: String
        }

        type Query {
          hello: String
          allFruits: [Fruit] @cursor
          selectedFruits(selection: [String!]!): [Fruit] @cursor
        }

        extend type Query {
          fruitCount(minimum: Int = 0): Int
        }
    "#;

    #[test]
    fn test_parse_schema() {
        let interner = Interner::new();
        let result = parse(FRUIT_SCHEMA, &interner);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);

        let defs = &result.document.definitions;
        assert_eq!(defs.len(), 4);

        let Definition::Directive(cursor) = &defs[0] else {
            panic!("expected directive definition");
        };
        assert!(interner.is(cursor.name.value, "cursor"));
        assert_eq!(cursor.locations, vec![DirectiveLocation::FieldDefinition]);

        let Definition::Type(TypeDefinition::Object(fruit)) = &defs[1] else {
            panic!("expected Fruit");
        };
        assert_eq!(
            fruit.description.as_ref().map(Description::value).as_deref(),
            Some("A fruit in the basket.")
        );
        assert_eq!(fruit.fields.len(), 2);

        let Definition::Type(TypeDefinition::Object(query)) = &defs[2] else {
            panic!("expected Query");
        };
        let selected = &query.fields[2];
        assert!(interner.is(selected.name.value, "selectedFruits"));
        assert!(matches!(selected.arguments[0].ty, Type::NonNull(..)));
        assert!(interner.is(selected.directives[0].name.value, "cursor"));

        let Definition::TypeExtension(TypeDefinition::Object(ext)) = &defs[3] else {
            panic!("expected extension");
        };
        assert!(matches!(
            ext.fields[0].arguments[0].default_value,
            Some(Value::Int(0, _))
        ));
    }

    #[test]
    fn test_parse_operation_with_fragments() {
        let interner = Interner::new();
        let source = r#"
            query Entries($withAuthor: Boolean = true) {
              entries: allEntries {
                content
                author @include(if: $withAuthor) { ...AuthorFields }
                ... on Entry { _id }
              }
            }

            fragment AuthorFields on User { email }
        "#;
        let result = parse(source, &interner);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);

        let ops = result.document.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation, OperationType::Query);
        assert_eq!(ops[0].variables.len(), 1);

        let Selection::Field(entries) = &ops[0].selection_set.selections[0] else {
            panic!("expected field");
        };
        assert!(interner.is(entries.alias.map(|a| a.value).unwrap(), "entries"));
        let children = &entries.selection_set.as_ref().unwrap().selections;
        assert_eq!(children.len(), 3);
        assert!(matches!(children[2], Selection::InlineFragment(_)));
        assert_eq!(result.document.fragments().len(), 1);
    }

    #[test]
    fn test_keywords_as_field_names() {
        let interner = Interner::new();
        let result = parse("{ type input query on }", &interner);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.document.operations()[0].selection_set.selections.len(), 4);
    }

    #[test]
    fn test_reports_missing_brace() {
        let interner = Interner::new();
        let source = "type Query { hello: String";
        let result = parse(source, &interner);
        let messages: Vec<String> = result
            .diagnostics
            .errors()
            .map(|d| d.describe(source))
            .collect();
        insta::assert_debug_snapshot!(messages, @r#"
        [
            "E0002 unexpected token at 1:27: expected }, found <eof>",
        ]
        "#);
    }

    #[test]
    fn test_recovers_after_garbage() {
        let interner = Interner::new();
        let result = parse("} type Fruit { name: String }", &interner);
        assert_eq!(result.diagnostics.error_count(), 1);
        assert_eq!(result.document.definitions.len(), 1);
    }

    #[test]
    fn test_unterminated_string() {
        let interner = Interner::new();
        let result = parse("type Q { f(a: String = \"open): Int }", &interner);
        assert!(result
            .diagnostics
            .errors()
            .any(|d| d.code == codes::UNTERMINATED_STRING));
    }
}
