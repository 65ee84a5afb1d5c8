//! Expression AST shared by the parser, the compiler and the wire codec
//!
//! The node types mirror the X Protocol `Mysqlx.Expr` and `Mysqlx.Datatypes`
//! messages one-to-one, so encoding is a straight walk over the tree.

use serde::{Deserialize, Serialize};

/// Typed scalar carried by `Expr::Literal`, CRUD `args`, and `Any`.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    SInt(i64),
    UInt(u64),
    Double(f64),
    Float(f32),
    /// Opaque bytes with an optional content type (see [`CONTENT_TYPE_JSON`]).
    Octets {
        value: Vec<u8>,
        content_type: Option<u32>,
    },
    String(String),
}

/// Octets content type for JSON text.
pub const CONTENT_TYPE_JSON: u32 = 2;

impl Scalar {
    pub fn octets(value: impl Into<Vec<u8>>) -> Self {
        Scalar::Octets {
            value: value.into(),
            content_type: None,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Scalar::String(value.into())
    }
}

/// Wire `Any`: what a prepared statement is executed with.
#[derive(Debug, Clone, PartialEq)]
pub enum Any {
    Scalar(Scalar),
    Object(Vec<(String, Any)>),
    Array(Vec<Any>),
}

/// One navigation step of a document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathItem {
    /// `.name`
    Member(String),
    /// `.*`
    MemberAsterisk,
    /// `[n]`
    ArrayIndex(u32),
    /// `[*]`
    ArrayIndexAsterisk,
    /// `**`
    DoubleAsterisk,
}

/// Column or document field reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnIdentifier {
    pub document_path: Vec<PathItem>,
    pub name: Option<String>,
    pub table_name: Option<String>,
    pub schema_name: Option<String>,
}

impl ColumnIdentifier {
    /// A bare column name (table model).
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A document path rooted at the document itself (document model).
    pub fn path(items: Vec<PathItem>) -> Self {
        Self {
            document_path: items,
            ..Self::default()
        }
    }
}

/// Function name, optionally schema qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub schema_name: Option<String>,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference or document path: `name`, `$.a.b[0]`, `t.c->'$.x'`
    Ident(ColumnIdentifier),

    /// Literal value
    Literal(Scalar),

    /// Session variable: `@name`
    Variable(String),

    /// Function call: `concat(a, b)`, `s.f(x)`
    FunctionCall(Identifier, Vec<Expr>),

    /// Operator or control construct, named canonically (`==`, `&&`, `in`, ...)
    Operator(String, Vec<Expr>),

    /// Zero-based index into the statement's argument list
    Placeholder(u32),

    /// JSON object: `{"a": 1}`. Field order is kept.
    Object(Vec<(String, Expr)>),

    /// JSON array: `[1, 2]`
    Array(Vec<Expr>),
}

impl Expr {
    pub fn op(name: impl Into<String>, params: Vec<Expr>) -> Self {
        Expr::Operator(name.into(), params)
    }

    pub fn binop(self, name: impl Into<String>, rhs: Expr) -> Self {
        Expr::Operator(name.into(), vec![self, rhs])
    }

    pub fn call(name: impl Into<String>, params: Vec<Expr>) -> Self {
        Expr::FunctionCall(Identifier::new(name), params)
    }

    pub fn lit(scalar: Scalar) -> Self {
        Expr::Literal(scalar)
    }

    /// Document path of plain members: `Expr::member(["a", "b"])` is `$.a.b`.
    pub fn member<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Ident(ColumnIdentifier::path(
            names
                .into_iter()
                .map(|n| PathItem::Member(n.into()))
                .collect(),
        ))
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expr::Ident(ColumnIdentifier::column(name))
    }

    /// Rewrite every placeholder position in place.
    pub fn map_placeholders<E>(
        &mut self,
        f: &mut impl FnMut(u32) -> Result<u32, E>,
    ) -> Result<(), E> {
        match self {
            Expr::Placeholder(pos) => *pos = f(*pos)?,
            Expr::FunctionCall(_, params) | Expr::Operator(_, params) | Expr::Array(params) => {
                for param in params {
                    param.map_placeholders(f)?;
                }
            }
            Expr::Object(fields) => {
                for (_, value) in fields {
                    value.map_placeholders(f)?;
                }
            }
            Expr::Ident(_) | Expr::Literal(_) | Expr::Variable(_) => {}
        }
        Ok(())
    }

    /// Placeholder positions in tree (pre-order) order, duplicates included.
    pub fn placeholders(&self) -> Vec<u32> {
        let mut out = Vec::new();
        self.collect_placeholders(&mut out);
        out
    }

    fn collect_placeholders(&self, out: &mut Vec<u32>) {
        match self {
            Expr::Placeholder(pos) => out.push(*pos),
            Expr::FunctionCall(_, params) | Expr::Operator(_, params) | Expr::Array(params) => {
                params.iter().for_each(|p| p.collect_placeholders(out))
            }
            Expr::Object(fields) => fields.iter().for_each(|(_, v)| v.collect_placeholders(out)),
            Expr::Ident(_) | Expr::Literal(_) | Expr::Variable(_) => {}
        }
    }
}

/// Whether a statement targets a document collection or a relational table.
///
/// Also selects how the parser resolves bare identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataModel {
    #[default]
    Document,
    Table,
}

/// Sort direction of an `Order` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}
