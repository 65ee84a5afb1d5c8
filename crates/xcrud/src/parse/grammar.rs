//! Recursive-descent grammar over lexer tokens

use crate::ast::{ColumnIdentifier, DataModel, Direction, Expr, Identifier, PathItem, Scalar};

use super::lexer::{Spanned, Token, tokenize};
use super::{GrammarStart, ParseError, Parsed};

type Result<T> = std::result::Result<T, ParseError>;

const INTERVAL_UNITS: &[&str] = &[
    "MICROSECOND",
    "SECOND",
    "MINUTE",
    "HOUR",
    "DAY",
    "WEEK",
    "MONTH",
    "QUARTER",
    "YEAR",
    "SECOND_MICROSECOND",
    "MINUTE_MICROSECOND",
    "MINUTE_SECOND",
    "HOUR_MICROSECOND",
    "HOUR_SECOND",
    "HOUR_MINUTE",
    "DAY_MICROSECOND",
    "DAY_SECOND",
    "DAY_MINUTE",
    "DAY_HOUR",
    "YEAR_MONTH",
];

/// Keywords that may follow `NOT` at the ilri level.
const NEGATABLE: &[&str] = &["IN", "LIKE", "BETWEEN", "REGEXP", "OVERLAPS"];

/// Deepest nesting of parentheses, brackets, calls and unary operators.
const MAX_DEPTH: usize = 32;

/// (spelling, canonical operator name)
type OpTable = &'static [(&'static str, &'static str)];

const OR_OPS: OpTable = &[("OR", "||"), ("||", "||")];
const XOR_OPS: OpTable = &[("XOR", "xor")];
const AND_OPS: OpTable = &[("AND", "&&"), ("&&", "&&")];
const COMP_OPS: OpTable = &[
    ("==", "=="),
    ("=", "=="),
    ("!=", "!="),
    ("<>", "!="),
    ("<=", "<="),
    ("<", "<"),
    (">=", ">="),
    (">", ">"),
];
const BIT_OPS: OpTable = &[("&", "&"), ("|", "|"), ("^", "^")];
const SHIFT_OPS: OpTable = &[("<<", "<<"), (">>", ">>")];
const ADD_OPS: OpTable = &[("+", "+"), ("-", "-")];
const MUL_OPS: OpTable = &[("*", "*"), ("/", "/"), ("DIV", "/"), ("%", "%"), ("MOD", "%")];

/// Per-parse state. Owned by one parser; never shared.
pub(crate) struct Context {
    model: DataModel,
    placeholders: Vec<String>,
    saw_named: bool,
    saw_positional: bool,
}

impl Context {
    pub(crate) fn new(model: DataModel, placeholders: Vec<String>) -> Self {
        Self {
            model,
            placeholders,
            saw_named: false,
            saw_positional: false,
        }
    }

    fn named(&mut self, name: &str) -> u32 {
        let pos = match self.placeholders.iter().position(|n| n == name) {
            Some(pos) => pos,
            None => {
                self.placeholders.push(name.to_string());
                self.placeholders.len() - 1
            }
        };
        pos as u32
    }

    /// `?` is named after the position it takes in the table. `None` when a
    /// seeded `:name` already spells that name.
    fn positional(&mut self) -> Option<u32> {
        let name = self.placeholders.len().to_string();
        if self.placeholders.contains(&name) {
            return None;
        }
        self.placeholders.push(name);
        Some(self.placeholders.len() as u32 - 1)
    }
}

pub(crate) struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    ctx: Context,
}

impl<'s> Parser<'s> {
    pub(crate) fn new(source: &'s str, tokens: Vec<Spanned>, ctx: Context) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
            ctx,
        }
    }

    pub(crate) fn run(mut self, start: GrammarStart) -> Result<Parsed> {
        let mut direction = None;
        let mut alias = None;
        let expr = match start {
            GrammarStart::Expr => self.expr()?,
            GrammarStart::SortExpr => {
                let expr = self.expr()?;
                if self.eat_keyword("ASC") {
                    direction = Some(Direction::Asc);
                } else if self.eat_keyword("DESC") {
                    direction = Some(Direction::Desc);
                }
                expr
            }
            GrammarStart::ProjectedExpr => {
                let expr = self.expr()?;
                if self.eat_keyword("AS") {
                    alias = Some(self.alias()?);
                }
                expr
            }
            GrammarStart::ColumnOrPath => match self.ctx.model {
                DataModel::Document => self.document_field()?,
                DataModel::Table => self.column()?,
            },
            GrammarStart::DocumentField => self.document_field()?,
            GrammarStart::AddSubExpr => self.add_expr()?,
            GrammarStart::MulDivExpr => self.mul_expr()?,
        };
        if self.pos < self.tokens.len() {
            return Err(self.error("end of input"));
        }
        Ok(Parsed {
            expr,
            placeholders: self.ctx.placeholders,
            direction,
            alias,
        })
    }

    // ============ Token helpers ============

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn nth_is_symbol(&self, n: usize, symbol: &str) -> bool {
        matches!(self.peek_nth(n), Some(Token::Symbol(s)) if *s == symbol)
    }

    fn nth_is_keyword(&self, n: usize, keyword: &str) -> bool {
        matches!(self.peek_nth(n), Some(Token::Ident(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn nth_is_name(&self, n: usize) -> bool {
        matches!(self.peek_nth(n), Some(Token::Ident(_) | Token::Quoted(_)))
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        let hit = self.nth_is_symbol(0, symbol);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let hit = self.nth_is_keyword(0, keyword);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(format!("'{symbol}'")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(keyword))
        }
    }

    /// Whether the token at `pos + 1` starts exactly where the current one ends.
    fn next_is_adjacent(&self) -> bool {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(a), Some(b)) => a.end == b.start,
            _ => false,
        }
    }

    fn eat_operator(&mut self, ops: OpTable) -> Option<&'static str> {
        let name = match self.peek_nth(0)? {
            Token::Symbol(s) => ops.iter().find(|(spelling, _)| spelling == s),
            Token::Ident(word) => ops
                .iter()
                .find(|(spelling, _)| spelling.eq_ignore_ascii_case(word)),
            _ => None,
        }?
        .1;
        self.pos += 1;
        Some(name)
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        self.error_at(self.pos, expected)
    }

    fn error_at(&self, index: usize, expected: impl Into<String>) -> ParseError {
        match self.tokens.get(index) {
            Some(tok) => ParseError::new(tok.start, &self.source[tok.start..tok.end], expected),
            None => ParseError::new(self.source.len(), "end of input", expected),
        }
    }

    // ============ Binary levels ============

    fn left_assoc(&mut self, ops: OpTable, next: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        let mut lhs = next(self)?;
        while let Some(name) = self.eat_operator(ops) {
            let rhs = next(self)?;
            lhs = lhs.binop(name, rhs);
        }
        Ok(lhs)
    }

    /// Run `inner` one nesting level deeper.
    fn nested(&mut self, inner: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("nesting depth <= {MAX_DEPTH}")));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self) -> Result<Expr> {
        self.nested(|p| p.left_assoc(OR_OPS, Self::xor_expr))
    }

    fn xor_expr(&mut self) -> Result<Expr> {
        self.left_assoc(XOR_OPS, Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        self.left_assoc(AND_OPS, Self::ilri_expr)
    }

    fn ilri_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.comp_expr()?;
        loop {
            let negated =
                self.nth_is_keyword(0, "NOT") && NEGATABLE.iter().any(|kw| self.nth_is_keyword(1, kw));
            if negated {
                self.pos += 1;
            }
            let name = |base: &str| {
                if negated {
                    format!("not_{base}")
                } else {
                    base.to_string()
                }
            };

            lhs = if !negated && self.eat_keyword("IS") {
                let not = self.eat_keyword("NOT");
                let rhs = if self.eat_keyword("NULL") {
                    Scalar::Null
                } else if self.eat_keyword("TRUE") {
                    Scalar::Bool(true)
                } else if self.eat_keyword("FALSE") {
                    Scalar::Bool(false)
                } else {
                    return Err(self.error("NULL, TRUE or FALSE"));
                };
                lhs.binop(if not { "is_not" } else { "is" }, Expr::Literal(rhs))
            } else if self.eat_keyword("IN") {
                if self.eat_symbol("(") {
                    let mut params = vec![lhs];
                    params.extend(self.comma_list(")")?);
                    Expr::op(name("in"), params)
                } else {
                    let rhs = self.comp_expr()?;
                    lhs.binop(name("cont_in"), rhs)
                }
            } else if self.eat_keyword("LIKE") {
                let mut params = vec![lhs, self.comp_expr()?];
                if self.eat_keyword("ESCAPE") {
                    params.push(self.comp_expr()?);
                }
                Expr::op(name("like"), params)
            } else if self.eat_keyword("BETWEEN") {
                let low = self.comp_expr()?;
                self.expect_keyword("AND")?;
                let high = self.comp_expr()?;
                Expr::op(name("between"), vec![lhs, low, high])
            } else if self.eat_keyword("REGEXP") {
                let rhs = self.comp_expr()?;
                lhs.binop(name("regexp"), rhs)
            } else if self.eat_keyword("OVERLAPS") {
                let rhs = self.comp_expr()?;
                lhs.binop(name("overlaps"), rhs)
            } else {
                return Ok(lhs);
            };
        }
    }

    fn comp_expr(&mut self) -> Result<Expr> {
        self.left_assoc(COMP_OPS, Self::bit_expr)
    }

    fn bit_expr(&mut self) -> Result<Expr> {
        self.left_assoc(BIT_OPS, Self::shift_expr)
    }

    fn shift_expr(&mut self) -> Result<Expr> {
        self.left_assoc(SHIFT_OPS, Self::add_expr)
    }

    fn add_expr(&mut self) -> Result<Expr> {
        self.left_assoc(ADD_OPS, Self::mul_expr)
    }

    fn mul_expr(&mut self) -> Result<Expr> {
        self.left_assoc(MUL_OPS, Self::interval_expr)
    }

    fn interval_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.unary_expr()?;
        loop {
            let name = if !self.nth_is_keyword(1, "INTERVAL") {
                break;
            } else if self.nth_is_symbol(0, "+") {
                "date_add"
            } else if self.nth_is_symbol(0, "-") {
                "date_sub"
            } else {
                break;
            };
            self.pos += 2;
            let amount = self.nested(Self::bit_expr)?;
            let unit = match self.peek_nth(0) {
                Some(Token::Ident(word))
                    if INTERVAL_UNITS.iter().any(|u| u.eq_ignore_ascii_case(word)) =>
                {
                    word.to_ascii_uppercase()
                }
                _ => return Err(self.error("an interval unit")),
            };
            self.pos += 1;
            lhs = Expr::op(name, vec![lhs, amount, Expr::Literal(Scalar::String(unit))]);
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        let name = if self.eat_symbol("!") || self.eat_keyword("NOT") {
            "not"
        } else if self.eat_symbol("-") {
            "sign_minus"
        } else if self.eat_symbol("+") {
            "sign_plus"
        } else if self.eat_symbol("~") {
            "~"
        } else {
            return self.atomic_expr();
        };
        let operand = self.nested(Self::unary_expr)?;
        Ok(Expr::op(name, vec![operand]))
    }

    // ============ Atoms ============

    fn atomic_expr(&mut self) -> Result<Expr> {
        let Some(token) = self.peek_nth(0).cloned() else {
            return Err(self.error("an expression"));
        };
        match token {
            Token::Symbol(":") => self.named_placeholder(),
            Token::Symbol("?") => {
                let pos = if self.ctx.saw_named {
                    None
                } else {
                    self.ctx.positional()
                };
                let Some(pos) = pos else {
                    return Err(self.error("a `:name` placeholder, not `?`"));
                };
                self.ctx.saw_positional = true;
                self.pos += 1;
                Ok(Expr::Placeholder(pos))
            }
            Token::Symbol("(") => {
                self.pos += 1;
                let expr = self.expr()?;
                self.expect_symbol(")")?;
                Ok(expr)
            }
            Token::Symbol("{") => self.object(),
            Token::Symbol("[") => {
                self.pos += 1;
                Ok(Expr::Array(self.comma_list("]")?))
            }
            Token::Symbol("@") => {
                let adjacent = self.next_is_adjacent();
                self.pos += 1;
                match self.peek_nth(0) {
                    Some(Token::Ident(name) | Token::Quoted(name)) if adjacent => {
                        let name = name.clone();
                        self.pos += 1;
                        Ok(Expr::Variable(name))
                    }
                    _ => Err(self.error("a variable name")),
                }
            }
            Token::Symbol("$") => self.document_field(),
            Token::Int(text) => {
                self.pos += 1;
                Ok(Expr::Literal(int_literal(&text)))
            }
            Token::Float(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::Double(value)))
            }
            Token::Str(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::String(value)))
            }
            Token::Ident(word) => {
                let literal = match word.to_ascii_uppercase().as_str() {
                    "TRUE" => Some(Scalar::Bool(true)),
                    "FALSE" => Some(Scalar::Bool(false)),
                    "NULL" => Some(Scalar::Null),
                    "CAST" if self.nth_is_symbol(1, "(") => return self.cast(),
                    _ => None,
                };
                match literal {
                    Some(scalar) => {
                        self.pos += 1;
                        Ok(Expr::Literal(scalar))
                    }
                    None => self.identifier_or_call(),
                }
            }
            Token::Quoted(_) => self.identifier_or_call(),
            Token::Symbol(_) => Err(self.error("an expression")),
        }
    }

    fn named_placeholder(&mut self) -> Result<Expr> {
        let colon = self.pos;
        let adjacent = self.next_is_adjacent();
        let name = match self.peek_nth(1) {
            Some(Token::Ident(name) | Token::Int(name)) if adjacent => name.clone(),
            _ => return Err(self.error_at(colon, "a placeholder name")),
        };
        if self.ctx.saw_positional {
            return Err(self.error_at(colon, "a `?` placeholder, not `:name`"));
        }
        self.ctx.saw_named = true;
        self.pos += 2;
        Ok(Expr::Placeholder(self.ctx.named(&name)))
    }

    /// Expressions separated by commas up to `close`, which is consumed.
    fn comma_list(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat_symbol(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if !self.eat_symbol(",") {
                break;
            }
        }
        self.expect_symbol(close)?;
        Ok(items)
    }

    fn object(&mut self) -> Result<Expr> {
        self.expect_symbol("{")?;
        let mut fields = Vec::new();
        if self.eat_symbol("}") {
            return Ok(Expr::Object(fields));
        }
        loop {
            let key = match self.peek_nth(0) {
                Some(Token::Str(k) | Token::Ident(k) | Token::Quoted(k)) => k.clone(),
                _ => return Err(self.error("an object key")),
            };
            self.pos += 1;
            self.expect_symbol(":")?;
            fields.push((key, self.expr()?));
            if !self.eat_symbol(",") {
                break;
            }
        }
        self.expect_symbol("}")?;
        Ok(Expr::Object(fields))
    }

    /// `CAST(expr AS type)`; the type is passed through as text.
    fn cast(&mut self) -> Result<Expr> {
        self.pos += 1;
        self.expect_symbol("(")?;
        let value = self.expr()?;
        self.expect_keyword("AS")?;

        let first = self.pos;
        let mut depth = 0usize;
        loop {
            match self.peek_nth(0) {
                None => return Err(self.error("')'")),
                Some(Token::Symbol("(")) => depth += 1,
                Some(Token::Symbol(")")) if depth == 0 => break,
                Some(Token::Symbol(")")) => depth -= 1,
                Some(_) => {}
            }
            self.pos += 1;
        }
        if self.pos == first {
            return Err(self.error("a cast type"));
        }
        let start = self.tokens[first].start;
        let end = self.tokens[self.pos - 1].end;
        let type_text = self.source[start..end]
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        self.pos += 1;
        Ok(Expr::op("cast", vec![value, Expr::Literal(Scalar::octets(type_text))]))
    }

    fn identifier_or_call(&mut self) -> Result<Expr> {
        if self.nth_is_symbol(1, "(") {
            let name = self.name()?;
            return self.call(Identifier::new(name));
        }
        if self.nth_is_symbol(1, ".") && self.nth_is_name(2) && self.nth_is_symbol(3, "(") {
            let schema = self.name()?;
            self.pos += 1;
            let name = self.name()?;
            return self.call(Identifier {
                name,
                schema_name: Some(schema),
            });
        }
        match self.ctx.model {
            DataModel::Document => self.document_field(),
            DataModel::Table => self.column(),
        }
    }

    fn call(&mut self, function: Identifier) -> Result<Expr> {
        self.expect_symbol("(")?;
        let params = if self.nth_is_symbol(0, "*") && self.nth_is_symbol(1, ")") {
            self.pos += 2;
            vec![Expr::op("*", vec![])]
        } else {
            self.comma_list(")")?
        };
        Ok(Expr::FunctionCall(function, params))
    }

    fn name(&mut self) -> Result<String> {
        match self.peek_nth(0) {
            Some(Token::Ident(name) | Token::Quoted(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("an identifier")),
        }
    }

    fn alias(&mut self) -> Result<String> {
        if let Some(Token::Str(alias)) = self.peek_nth(0) {
            let alias = alias.clone();
            self.pos += 1;
            return Ok(alias);
        }
        self.name()
    }

    // ============ Identifiers ============

    /// `[[schema.]table.]column` with an optional `->` / `->>` JSON path.
    fn column(&mut self) -> Result<Expr> {
        let mut parts = vec![self.name()?];
        while parts.len() < 3 && self.nth_is_symbol(0, ".") && self.nth_is_name(1) {
            self.pos += 1;
            parts.push(self.name()?);
        }
        let mut parts = parts.into_iter().rev();
        let mut column = ColumnIdentifier {
            name: parts.next(),
            table_name: parts.next(),
            schema_name: parts.next(),
            ..ColumnIdentifier::default()
        };

        let unquote = if self.eat_symbol("->>") {
            true
        } else if self.eat_symbol("->") {
            false
        } else {
            return Ok(Expr::Ident(column));
        };
        column.document_path = self.json_path()?;
        let ident = Expr::Ident(column);
        Ok(if unquote {
            Expr::call("json_unquote", vec![ident])
        } else {
            ident
        })
    }

    /// Path after `->`: either a quoted `'$...'` string or bare `$...` tokens.
    fn json_path(&mut self) -> Result<Vec<PathItem>> {
        let (text, base) = match self.tokens.get(self.pos) {
            Some(Spanned {
                token: Token::Str(text),
                start,
                ..
            }) => (text.clone(), start + 1),
            _ if self.nth_is_symbol(0, "$") => return self.document_path(),
            _ => return Err(self.error("a JSON path")),
        };
        self.pos += 1;

        let shift = |mut err: ParseError| {
            err.offset += base;
            err
        };
        let tokens = tokenize(&text).map_err(shift)?;
        let mut inner = Parser::new(&text, tokens, Context::new(DataModel::Document, Vec::new()));
        if !inner.nth_is_symbol(0, "$") {
            return Err(shift(inner.error("'$'")));
        }
        let items = inner.document_path().map_err(shift)?;
        if inner.pos < inner.tokens.len() {
            return Err(shift(inner.error("end of JSON path")));
        }
        Ok(items)
    }

    fn document_field(&mut self) -> Result<Expr> {
        Ok(Expr::Ident(ColumnIdentifier::path(self.document_path()?)))
    }

    /// `$` or a leading member, then `.name`, `.*`, `[n]`, `[*]`, `**` steps.
    fn document_path(&mut self) -> Result<Vec<PathItem>> {
        let mut items = Vec::new();
        if !self.eat_symbol("$") {
            items.push(PathItem::Member(self.member_name()?));
        }
        loop {
            if self.eat_symbol(".") {
                if self.eat_symbol("*") {
                    items.push(PathItem::MemberAsterisk);
                } else {
                    items.push(PathItem::Member(self.member_name()?));
                }
            } else if self.eat_symbol("[") {
                if self.eat_symbol("*") {
                    items.push(PathItem::ArrayIndexAsterisk);
                } else {
                    let index = match self.peek_nth(0) {
                        Some(Token::Int(text)) => text.parse::<u32>().ok(),
                        _ => None,
                    };
                    let Some(index) = index else {
                        return Err(self.error("an array index"));
                    };
                    self.pos += 1;
                    items.push(PathItem::ArrayIndex(index));
                }
                self.expect_symbol("]")?;
            } else if self.eat_symbol("**") {
                items.push(PathItem::DoubleAsterisk);
            } else {
                break;
            }
        }
        if items.last() == Some(&PathItem::DoubleAsterisk) {
            return Err(self.error("a path step after '**'"));
        }
        Ok(items)
    }

    fn member_name(&mut self) -> Result<String> {
        match self.peek_nth(0) {
            Some(Token::Ident(name) | Token::Quoted(name) | Token::Str(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("a member name")),
        }
    }
}

/// Signed if it fits, else unsigned, else kept as decimal text.
fn int_literal(text: &str) -> Scalar {
    if let Ok(n) = text.parse::<i64>() {
        Scalar::SInt(n)
    } else if let Ok(n) = text.parse::<u64>() {
        Scalar::UInt(n)
    } else {
        Scalar::String(text.to_string())
    }
}
