//! Single-line rendering of expressions, used for logs and the CLI
//!
//! The output reads like the source language but is not guaranteed to parse
//! back: operators are shown under their canonical names.

use std::fmt::{self, Display};

use crate::ast::{Any, ColumnIdentifier, Expr, PathItem, Scalar};

// ============ Scalars ============

impl Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Scalar::SInt(n) => write!(f, "{n}"),
            Scalar::UInt(n) => write!(f, "{n}u"),
            Scalar::Double(n) => write_float(f, *n),
            Scalar::Float(n) => write_float(f, f64::from(*n)),
            Scalar::String(s) => write!(f, "'{}'", escape_string(s)),
            Scalar::Octets {
                value,
                content_type,
            } => {
                let text = String::from_utf8_lossy(value);
                match content_type {
                    Some(ct) => write!(f, "octets<{ct}>'{}'", escape_string(&text)),
                    None => write!(f, "octets'{}'", escape_string(&text)),
                }
            }
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 {
        write!(f, "{n:.1}")
    } else {
        write!(f, "{n}")
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

// ============ Identifiers ============

impl Display for PathItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathItem::Member(name) if is_plain(name) => write!(f, ".{name}"),
            PathItem::Member(name) => write!(f, ".`{name}`"),
            PathItem::MemberAsterisk => write!(f, ".*"),
            PathItem::ArrayIndex(i) => write!(f, "[{i}]"),
            PathItem::ArrayIndexAsterisk => write!(f, "[*]"),
            PathItem::DoubleAsterisk => write!(f, "**"),
        }
    }
}

fn is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_plain(name) {
        write!(f, "{name}")
    } else {
        write!(f, "`{name}`")
    }
}

impl Display for ColumnIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(name) = &self.name else {
            write!(f, "$")?;
            return self.document_path.iter().try_for_each(|item| write!(f, "{item}"));
        };
        for qualifier in [&self.schema_name, &self.table_name].into_iter().flatten() {
            write_name(f, qualifier)?;
            write!(f, ".")?;
        }
        write_name(f, name)?;
        if !self.document_path.is_empty() {
            write!(f, "->'$")?;
            for item in &self.document_path {
                write!(f, "{item}")?;
            }
            write!(f, "'")?;
        }
        Ok(())
    }
}

// ============ Expressions ============

/// Operators rendered infix between their two operands.
const INFIX: &[&str] = &[
    "||", "xor", "&&", "==", "!=", "<", "<=", ">", ">=", "&", "|", "^", "<<", ">>", "+", "-", "*",
    "/", "%", "is", "is_not", "cont_in", "not_cont_in", "regexp", "not_regexp", "overlaps",
    "not_overlaps",
];

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(column) => write!(f, "{column}"),
            Expr::Literal(scalar) => write!(f, "{scalar}"),
            Expr::Variable(name) => write!(f, "@{name}"),
            Expr::Placeholder(pos) => write!(f, "?{pos}"),
            Expr::FunctionCall(function, params) => {
                if let Some(schema) = &function.schema_name {
                    write!(f, "{schema}.")?;
                }
                write!(f, "{}(", function.name)?;
                write_list(f, params)?;
                write!(f, ")")
            }
            Expr::Operator(name, params) => match params.as_slice() {
                [] => write!(f, "{name}"),
                [lhs, rhs] if INFIX.contains(&name.as_str()) => {
                    write_operand(f, lhs)?;
                    write!(f, " {name} ")?;
                    write_operand(f, rhs)
                }
                [operand] => {
                    let symbol = match name.as_str() {
                        "sign_minus" => "-",
                        "sign_plus" => "+",
                        "not" => "!",
                        other => other,
                    };
                    write!(f, "{symbol}")?;
                    write_operand(f, operand)
                }
                _ => {
                    write!(f, "{name}(")?;
                    write_list(f, params)?;
                    write!(f, ")")
                }
            },
            Expr::Object(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {value}", escape_string(key))?;
                }
                write!(f, "}}")
            }
            Expr::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    // Any operator with operands gets parens so grouping is always visible
    if matches!(expr, Expr::Operator(_, params) if !params.is_empty()) {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn write_list<T: Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Any::Scalar(scalar) => write!(f, "{scalar}"),
            Any::Object(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {value}", escape_string(key))?;
                }
                write!(f, "}}")
            }
            Any::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
        }
    }
}
