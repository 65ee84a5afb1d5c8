//! Expression parser for X DevAPI expression strings
//!
//! Text is tokenized with winnow, then a precedence-climbing descent builds an
//! [`Expr`]. Placeholders (`:name` and `?`) are assigned positions in order of
//! first occurrence; the resulting name table travels with the expression so
//! later fragments of the same statement can continue numbering from it.
//! One expression uses either `:name` or `?`, never both. Nesting deeper than
//! 32 levels is rejected with a [`ParseError`].
//!
//! Operator precedence, lowest to highest:
//!
//! | level | operators |
//! |-------|-----------|
//! | or    | `OR` `\|\|` |
//! | xor   | `XOR` |
//! | and   | `AND` `&&` |
//! | ilri  | `IS [NOT]` `[NOT] IN` `[NOT] LIKE .. [ESCAPE ..]` `[NOT] BETWEEN .. AND ..` `[NOT] REGEXP` `[NOT] OVERLAPS` |
//! | comp  | `=` `==` `!=` `<>` `<` `<=` `>` `>=` |
//! | bit   | `&` `\|` `^` |
//! | shift | `<<` `>>` |
//! | add   | `+` `-` |
//! | mul   | `*` `/` `DIV` `%` `MOD` |
//! | interval | `+ INTERVAL n UNIT`, `- INTERVAL n UNIT` |
//! | unary | `NOT` `!` `-` `+` `~` |

mod grammar;
mod lexer;

use std::fmt;

use crate::ast::{DataModel, Direction, Expr};

use grammar::{Context, Parser};

/// Which production a fragment is parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarStart {
    /// Full boolean/arithmetic expression (criteria, having, values)
    Expr,
    /// Expression followed by an optional `ASC`/`DESC`
    SortExpr,
    /// Expression followed by an optional `AS alias`
    ProjectedExpr,
    /// Column reference (table model) or document path (document model)
    ColumnOrPath,
    /// Document path, regardless of model
    DocumentField,
    /// Additive expression only
    AddSubExpr,
    /// Multiplicative expression only
    MulDivExpr,
}

/// Parser configuration.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// How bare identifiers resolve.
    pub model: DataModel,
    /// Placeholder names already taken by earlier fragments of the same statement.
    pub placeholders: Vec<String>,
}

impl ParseOptions {
    pub fn new(model: DataModel) -> Self {
        Self {
            model,
            placeholders: Vec::new(),
        }
    }

    pub fn with_placeholders(mut self, placeholders: Vec<String>) -> Self {
        self.placeholders = placeholders;
        self
    }
}

/// Output of a successful parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub expr: Expr,
    /// Placeholder names; index is the position used by `Expr::Placeholder`.
    pub placeholders: Vec<String>,
    /// Set by `SortExpr` when a direction keyword is present.
    pub direction: Option<Direction>,
    /// Set by `ProjectedExpr` when `AS alias` is present.
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the parsed text.
    pub offset: usize,
    pub found: String,
    pub expected: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, found: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            offset,
            found: found.into(),
            expected: expected.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at offset {}: expected {}, found {}",
            self.offset, self.expected, self.found
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse `input` in the document model with an empty placeholder table.
pub fn parse(input: &str, start: GrammarStart) -> Result<Parsed, ParseError> {
    parse_with(input, start, ParseOptions::default())
}

pub fn parse_with(
    input: &str,
    start: GrammarStart,
    options: ParseOptions,
) -> Result<Parsed, ParseError> {
    let tokens = lexer::tokenize(input)?;
    let parsed = Parser::new(input, tokens, Context::new(options.model, options.placeholders))
        .run(start)?;
    log::trace!("parsed {start:?} {input:?}: {:?}", parsed.expr);
    Ok(parsed)
}
