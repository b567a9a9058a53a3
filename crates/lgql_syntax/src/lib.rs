//! Syntax layer for lgql.
//!
//! This crate provides:
//! - `token`: Token kinds and token structures
//! - `lexer`: Tokenization and string value decoding
//! - `ast`: Abstract syntax tree types
//! - `parser`: Recursive descent parser for SDL and operations

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::*;
pub use lexer::Lexer;
pub use parser::{parse, ParseResult, Parser};
pub use token::{DirectiveLocation, Token, TokenKind};
