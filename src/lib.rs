//! A fast configurable LaTeX math parser producing an interned AST
//!
//! This crate parses a substantial subset of LaTeX mathematical notation —
//! `1 + 2`, `\frac{1}{2}`, `\int_0^1 x\,dx`, `\sin^{-1}(x)`, `3\frac{1}{2}`,
//! `1{,}234.56` — into a tree of algebraic, transcendental, relational, and
//! structural operators suitable for equivalence checking, rendering, and
//! symbolic manipulation.
//!
//! ## Usage
//!
//! ```sh
//! cargo add latex-math-parser
//! ```
//!
//! then
//!
//! ```
//! use latex_math_parser::{parse, Options};
//!
//! let ast = parse(Options::default(), r"\frac{1}{2}").unwrap();
//! assert!(ast.flags.is_fraction);
//! ```
//!
//! ## Pipeline
//!
//! Three layers, leaves first:
//!
//! 1. [`scanner`] — a single-pass cursor yielding `(kind, lexeme)` tokens:
//!    Unicode→LaTeX normalization, multi-character control sequences,
//!    separator-aware number scanning, and greedy identifier matching driven
//!    by the [`Environment`]'s key set (this is how multi-character unit
//!    names like `kg` and `\mu g` are recognized without spaces).
//! 2. [`parser`] — a recursive-descent operator-precedence parser, one
//!    function per level from comma sequences down to primaries. All the
//!    engineering lives here: implicit multiplication versus mixed numbers
//!    versus scientific notation, repeating-decimal overlines, integrals
//!    with trailing `dx`, chained relations, French-style intervals, and a
//!    large contextual operator lexicon.
//! 3. [`intern`] — a content-addressable pool mapping structurally
//!    identical subtrees to dense numeric ids.
//!
//! The [`Model`] facade composes the three with an environment stack and a
//! plugin registry; [`render::to_latex`] is the inverse pass.
//!
//! ## Dialect
//!
//! The parser is deliberately lenient: unknown control sequences scan as
//! identifiers, unknown primaries yield an empty node, and an empty input
//! is the canonical NONE node rather than an error. The `strict` option
//! upgrades the lenient choices to fatal diagnostics, and every failure
//! carries a stable numeric code (see [`error::ErrorCode`]) with a
//! formatted message.
//!
//! Number scanning is configurable down to the separator characters:
//! `1{,}234.56` with a `,` thousands separator and `1.234,56` with the
//! European convention both canonicalize to the same literal, and the
//! parser records how the literal was spelled (`separator_count`,
//! `number_format`, the shape flags) so downstream consumers can
//! reconstruct it.
//!
//! ## Tree structure
//!
//! Every construct is a uniform [`Node`]: an [`Op`] tag, ordered children,
//! and the attributes the parser chose while disambiguating (bracket pair,
//! numeric metadata, grammatical-shape flags). Leaves carry their payload
//! string. See [`ast`] for the contracts each operator obeys.
#![warn(missing_docs)]

pub mod ast;
pub mod env;
pub mod error;
pub mod intern;
pub mod model;
pub mod options;
pub mod parser;
pub mod prefix_set;
pub mod render;
pub mod scanner;

pub use ast::{Delim, Location, Node, NodeFlags, NumberFormat, Op};
pub use env::{Environment, Symbol, SymbolKind};
pub use error::{ErrorCode, ParseResult, SyntaxError};
pub use model::{Model, NodeFn, Registry, Source};
pub use options::Options;
pub use parser::Parser;
pub use scanner::{Scanner, Tok, TokenKind};

/// Parse a LaTeX source string with an empty environment
pub fn parse(options: Options, src: &str) -> ParseResult<Node> {
    let env = Environment::new();
    let mut parser = Parser::new(options, src, &env)?;
    parser.expr()
}

/// Parse a LaTeX source string against an environment
///
/// The environment's identifiers drive greedy multi-character matching in
/// the scanner, and the presence of periodic-table elements switches the
/// parser into chemistry mode.
pub fn parse_with_env(options: Options, src: &str, env: &Environment) -> ParseResult<Node> {
    let mut parser = Parser::new(options, src, env)?;
    parser.expr()
}
