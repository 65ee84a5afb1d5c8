//! `Mysqlx.Expr` and `Mysqlx.Datatypes` encoding

use super::wire::{Decode, DecodeError, Encode, Reader, Writer};
use crate::ast::{Any, ColumnIdentifier, Expr, Identifier, PathItem, Scalar};

impl Encode for Scalar {
    fn encode(&self, w: &mut Writer) {
        match self {
            Scalar::SInt(n) => {
                w.uint(1, 1);
                w.sint(2, *n);
            }
            Scalar::UInt(n) => {
                w.uint(1, 2);
                w.uint(3, *n);
            }
            Scalar::Null => w.uint(1, 3),
            Scalar::Octets {
                value,
                content_type,
            } => {
                w.uint(1, 4);
                w.message(5, &Octets(value, *content_type));
            }
            Scalar::Double(n) => {
                w.uint(1, 5);
                w.double(6, *n);
            }
            Scalar::Float(n) => {
                w.uint(1, 6);
                w.float(7, *n);
            }
            Scalar::Bool(b) => {
                w.uint(1, 7);
                w.bool(8, *b);
            }
            Scalar::String(s) => {
                w.uint(1, 8);
                w.message(9, &StringValue(s));
            }
        }
    }
}

struct Octets<'a>(&'a [u8], Option<u32>);

impl Encode for Octets<'_> {
    fn encode(&self, w: &mut Writer) {
        w.bytes(1, self.0);
        if let Some(content_type) = self.1 {
            w.uint(2, u64::from(content_type));
        }
    }
}

struct StringValue<'a>(&'a str);

impl Encode for StringValue<'_> {
    fn encode(&self, w: &mut Writer) {
        w.string(1, self.0);
    }
}

impl Decode for Scalar {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let mut kind = None;
        let mut scalar = None;
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => kind = Some(value.as_u64()),
                2 => scalar = Some(Scalar::SInt(value.as_sint())),
                3 => scalar = Some(Scalar::UInt(value.as_u64())),
                5 => {
                    let mut inner = Reader::new(value.as_bytes());
                    let mut bytes = Vec::new();
                    let mut content_type = None;
                    while let Some((f, v)) = inner.next_field()? {
                        match f {
                            1 => bytes = v.as_bytes().to_vec(),
                            2 => content_type = Some(v.as_u64() as u32),
                            _ => {}
                        }
                    }
                    scalar = Some(Scalar::Octets {
                        value: bytes,
                        content_type,
                    });
                }
                6 => scalar = Some(Scalar::Double(value.as_f64())),
                7 => scalar = Some(Scalar::Float(value.as_f32())),
                8 => scalar = Some(Scalar::Bool(value.as_u64() != 0)),
                9 => {
                    let mut inner = Reader::new(value.as_bytes());
                    let mut text = String::new();
                    while let Some((f, v)) = inner.next_field()? {
                        if f == 1 {
                            text = v.as_string();
                        }
                    }
                    scalar = Some(Scalar::String(text));
                }
                _ => {}
            }
        }
        let missing = |field| DecodeError::MissingField {
            message: "Scalar",
            field,
        };
        match kind.ok_or_else(|| missing(1))? {
            3 => Ok(Scalar::Null),
            1 => scalar.ok_or_else(|| missing(2)),
            2 => scalar.ok_or_else(|| missing(3)),
            4 => scalar.ok_or_else(|| missing(5)),
            5 => scalar.ok_or_else(|| missing(6)),
            6 => scalar.ok_or_else(|| missing(7)),
            7 => scalar.ok_or_else(|| missing(8)),
            8 => scalar.ok_or_else(|| missing(9)),
            value => Err(DecodeError::UnknownType {
                message: "Scalar",
                value,
            }),
        }
    }
}

impl Encode for Any {
    fn encode(&self, w: &mut Writer) {
        match self {
            Any::Scalar(scalar) => {
                w.uint(1, 1);
                w.message(2, scalar);
            }
            Any::Object(fields) => {
                w.uint(1, 2);
                w.message(3, &ObjectOf(fields));
            }
            Any::Array(items) => {
                w.uint(1, 3);
                w.message(4, &ArrayOf(items));
            }
        }
    }
}

impl Decode for Any {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let mut kind = None;
        let mut any = None;
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => kind = Some(value.as_u64()),
                2 => any = Some(Any::Scalar(Scalar::decode(value.as_bytes())?)),
                3 => {
                    let mut fields = Vec::new();
                    let mut inner = Reader::new(value.as_bytes());
                    while let Some((f, v)) = inner.next_field()? {
                        if f == 1 {
                            fields.push(decode_object_field(v.as_bytes())?);
                        }
                    }
                    any = Some(Any::Object(fields));
                }
                4 => {
                    let mut items = Vec::new();
                    let mut inner = Reader::new(value.as_bytes());
                    while let Some((f, v)) = inner.next_field()? {
                        if f == 1 {
                            items.push(Any::decode(v.as_bytes())?);
                        }
                    }
                    any = Some(Any::Array(items));
                }
                _ => {}
            }
        }
        match kind {
            Some(1..=3) => any.ok_or(DecodeError::MissingField {
                message: "Any",
                field: 2,
            }),
            Some(value) => Err(DecodeError::UnknownType {
                message: "Any",
                value,
            }),
            None => Err(DecodeError::MissingField {
                message: "Any",
                field: 1,
            }),
        }
    }
}

fn decode_object_field(buf: &[u8]) -> Result<(String, Any), DecodeError> {
    let mut r = Reader::new(buf);
    let mut key = None;
    let mut value = None;
    while let Some((field, v)) = r.next_field()? {
        match field {
            1 => key = Some(v.as_string()),
            2 => value = Some(Any::decode(v.as_bytes())?),
            _ => {}
        }
    }
    let missing = |field| DecodeError::MissingField {
        message: "ObjectField",
        field,
    };
    Ok((key.ok_or_else(|| missing(1))?, value.ok_or_else(|| missing(2))?))
}

/// `Object { repeated ObjectField fld = 1 }`, shared by `Expr` and `Any`.
struct ObjectOf<'a, T>(&'a [(String, T)]);

impl<T: Encode> Encode for ObjectOf<'_, T> {
    fn encode(&self, w: &mut Writer) {
        for (key, value) in self.0 {
            w.message(1, &ObjectField(key, value));
        }
    }
}

struct ObjectField<'a, T>(&'a str, &'a T);

impl<T: Encode> Encode for ObjectField<'_, T> {
    fn encode(&self, w: &mut Writer) {
        w.string(1, self.0);
        w.message(2, self.1);
    }
}

/// `Array { repeated T value = 1 }`
struct ArrayOf<'a, T>(&'a [T]);

impl<T: Encode> Encode for ArrayOf<'_, T> {
    fn encode(&self, w: &mut Writer) {
        w.messages(1, self.0);
    }
}

impl Encode for PathItem {
    fn encode(&self, w: &mut Writer) {
        match self {
            PathItem::Member(name) => {
                w.uint(1, 1);
                w.string(2, name);
            }
            PathItem::MemberAsterisk => w.uint(1, 2),
            PathItem::ArrayIndex(index) => {
                w.uint(1, 3);
                w.uint(3, u64::from(*index));
            }
            PathItem::ArrayIndexAsterisk => w.uint(1, 4),
            PathItem::DoubleAsterisk => w.uint(1, 5),
        }
    }
}

impl Encode for ColumnIdentifier {
    fn encode(&self, w: &mut Writer) {
        w.messages(1, &self.document_path);
        w.opt_string(2, self.name.as_deref());
        w.opt_string(3, self.table_name.as_deref());
        w.opt_string(4, self.schema_name.as_deref());
    }
}

impl Encode for Identifier {
    fn encode(&self, w: &mut Writer) {
        w.string(1, &self.name);
        w.opt_string(2, self.schema_name.as_deref());
    }
}

struct FunctionCall<'a>(&'a Identifier, &'a [Expr]);

impl Encode for FunctionCall<'_> {
    fn encode(&self, w: &mut Writer) {
        w.message(1, self.0);
        w.messages(2, self.1);
    }
}

struct Operator<'a>(&'a str, &'a [Expr]);

impl Encode for Operator<'_> {
    fn encode(&self, w: &mut Writer) {
        w.string(1, self.0);
        w.messages(2, self.1);
    }
}

impl Encode for Expr {
    fn encode(&self, w: &mut Writer) {
        match self {
            Expr::Ident(ident) => {
                w.uint(1, 1);
                w.message(2, ident);
            }
            Expr::Literal(scalar) => {
                w.uint(1, 2);
                w.message(4, scalar);
            }
            Expr::Variable(name) => {
                w.uint(1, 3);
                w.string(3, name);
            }
            Expr::FunctionCall(name, params) => {
                w.uint(1, 4);
                w.message(5, &FunctionCall(name, params));
            }
            Expr::Operator(name, params) => {
                w.uint(1, 5);
                w.message(6, &Operator(name, params));
            }
            Expr::Placeholder(position) => {
                w.uint(1, 6);
                w.uint(7, u64::from(*position));
            }
            Expr::Object(fields) => {
                w.uint(1, 7);
                w.message(8, &ObjectOf(fields));
            }
            Expr::Array(items) => {
                w.uint(1, 8);
                w.message(9, &ArrayOf(items));
            }
        }
    }
}
