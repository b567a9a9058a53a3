//! Command-line interface for lgql.
//!
//! # Usage
//!
//! ```bash
//! # Build schemas through the @cursor transformation pass
//! lgql check schema.graphql more.graphql
//!
//! # Show how a query resolves, marking live-cursor fields
//! lgql explain --schema schema.graphql '{ allEntries { content author { name } } }'
//!
//! # Print version information
//! lgql version
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use lgql_runtime::{
    ExecutableSchema, ExecutorConfig, FieldSelection, SchemaError, SelectionTree,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "lgql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build schema files and report errors
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the selection tree of a query against a schema
    Explain {
        /// Schema file path
        #[arg(short, long)]
        schema: PathBuf,

        /// Query text, or `@path` to read it from a file
        query: String,

        /// Variables as a JSON object
        #[arg(long)]
        variables: Option<String>,

        /// Operation to explain when the document has several
        #[arg(long)]
        operation: Option<String>,
    },

    /// Print version information
    Version,
}

pub fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Check { files } => check_files(&files, cli.verbose, cli.quiet),
        Commands::Explain {
            schema,
            query,
            variables,
            operation,
        } => explain_query(&schema, &query, variables.as_deref(), operation.as_deref()),
        Commands::Version => {
            println!("lgql {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn load_schema(path: &Path) -> Result<ExecutableSchema, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    ExecutableSchema::builder()
        .type_defs(source)
        .build()
        .map_err(|error| render(path, &error).into())
}

/// Turns a schema error into printable text. Syntax errors get one
/// `miette` report per diagnostic.
fn render(path: &Path, error: &SchemaError) -> String {
    match error {
        SchemaError::Syntax(errors) => errors
            .reports()
            .iter()
            .map(|report| format!("{report:?}"))
            .collect::<Vec<_>>()
            .join("\n"),
        other => {
            let report = miette::Report::msg(other.to_string())
                .wrap_err(path.display().to_string());
            format!("{report:?}")
        }
    }
}

fn check_files(
    files: &[PathBuf],
    verbose: bool,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut has_errors = false;

    for file in files {
        if verbose {
            println!("{} {}", "Checking".blue(), file.display());
        }

        match load_schema(file) {
            Ok(schema) => {
                if verbose {
                    for (coordinate, shape) in schema.cursor_fields() {
                        println!("  {} {coordinate} {}", "@cursor".cyan(), shape.as_str().dimmed());
                    }
                    println!("{} {}", "OK".green(), file.display());
                }
            }
            Err(error) => {
                has_errors = true;
                eprintln!("{} {}", "Error".red().bold(), file.display());
                eprintln!("{error}");
            }
        }
    }

    if has_errors {
        Ok(1)
    } else {
        if !quiet {
            println!(
                "{} {} file(s) checked",
                "Success:".green().bold(),
                files.len()
            );
        }
        Ok(0)
    }
}

fn explain_query(
    schema_path: &Path,
    query: &str,
    variables: Option<&str>,
    operation: Option<&str>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let schema = match load_schema(schema_path) {
        Ok(schema) => schema,
        Err(error) => {
            eprintln!("{error}");
            return Ok(1);
        }
    };
    let query = match query.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => query.to_string(),
    };
    let variables = match variables {
        Some(text) => match serde_json::from_str(text)? {
            serde_json::Value::Object(map) => map,
            _ => return Err("variables must be a JSON object".into()),
        },
        None => serde_json::Map::new(),
    };

    match SelectionTree::parse(&query, operation, &variables, &ExecutorConfig::default()) {
        Ok(tree) => {
            print!("{}", explain(&schema, &tree));
            Ok(0)
        }
        Err(error) => {
            eprintln!("{} {error}", "Error:".red().bold());
            Ok(1)
        }
    }
}

/// Renders a selection tree with each field's type. Live-cursor fields are
/// marked with their shape.
pub fn explain(schema: &ExecutableSchema, tree: &SelectionTree) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}", tree.operation.as_str());
    if let Some(name) = &tree.name {
        let _ = write!(out, " {name}");
    }
    out.push('\n');
    let root = schema.schema().root_type(tree.operation).unwrap_or_default();
    for field in &tree.root {
        explain_field(&mut out, schema, root, field, 1);
    }
    out
}

fn explain_field(
    out: &mut String,
    schema: &ExecutableSchema,
    owner: &str,
    field: &FieldSelection,
    depth: usize,
) {
    let owner = field.type_condition.as_deref().unwrap_or(owner);
    let _ = write!(out, "{:width$}", "", width = depth * 2);
    if let Some(alias) = &field.alias {
        let _ = write!(out, "{alias}: ");
    }
    out.push_str(&field.name);

    let definition = schema.schema().field(owner, &field.name);
    match definition {
        Some(definition) => {
            let _ = write!(out, ": {}", definition.ty);
            let coordinate = format!("{owner}.{}", field.name);
            if let Some(shape) = schema.classification(&coordinate) {
                let _ = write!(out, " @cursor({shape})");
            }
        }
        None if field.name == "__typename" => out.push_str(": String!"),
        None => out.push_str(": ?"),
    }
    out.push('\n');

    let child_owner = definition.map_or("", |d| d.ty.named_type());
    for child in &field.children {
        explain_field(out, schema, child_owner, child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
        type User { _id: ID! name: String }
        type Entry { _id: ID! content: String author: User @cursor }
        type Query { allEntries: [Entry!]! @cursor latest: Entry }
    "#;

    fn tree(query: &str) -> SelectionTree {
        SelectionTree::parse(query, None, &serde_json::Map::new(), &ExecutorConfig::default())
            .unwrap()
    }

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_explain_marks_cursor_fields() {
        let schema = ExecutableSchema::builder().type_defs(SCHEMA).build().unwrap();
        let rendered = explain(
            &schema,
            &tree("query Feed { entries: allEntries { content author { name } } latest { __typename } }"),
        );
        insta::assert_snapshot!(rendered, @r###"
        query Feed
          entries: allEntries: [Entry!]! @cursor(LIST_OF_OBJECTS)
            content: String
            author: User @cursor(SINGLE_OBJECT)
              name: String
          latest: Entry
            __typename: String!
        "###);
    }

    #[test]
    fn test_render_reports_schema_errors() {
        let error = ExecutableSchema::builder()
            .type_defs("type Query { name: String @cursor }")
            .build()
            .unwrap_err();
        let rendered = render(Path::new("schema.graphql"), &error);
        assert!(rendered.contains("schema.graphql"));
        assert!(rendered.contains("Query.name"));
    }
}
