//! Host values and their classification into wire literals
//!
//! Classification happens once, here, in a single ordered match over [`Value`].
//! Inside lists and maps, entries that cannot be encoded are dropped instead
//! of failing the whole value.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::ast::{Any, CONTENT_TYPE_JSON, Expr, Scalar};

/// A value supplied by the caller: bound argument, update value, or decoded literal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Integer of arbitrary width, as decimal text.
    BigInt(String),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(OffsetDateTime),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    /// Something the host cannot express as data (a callback, a handle...).
    Unsupported(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot encode {kind} as a literal")]
pub struct NotEncodable {
    pub kind: String,
}

impl NotEncodable {
    fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl Value {
    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Unsupported(kind) => kind,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// JSON rendering used when a composite travels as a single CRUD argument.
    ///
    /// Unsupported entries are dropped, like everywhere else in composites.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as Json;
        Some(match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::UInt(n) => Json::from(*n),
            Value::BigInt(text) => Json::String(text.clone()),
            Value::Float(n) => serde_json::Number::from_f64(f64::from(*n)).map_or(Json::Null, Json::Number),
            Value::Double(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(bytes) => Json::String(BASE64.encode(bytes)),
            Value::DateTime(dt) => Json::String(format_datetime(dt).ok()?),
            Value::List(items) => Json::Array(items.iter().filter_map(Value::to_json).collect()),
            Value::Map(fields) => Json::Object(
                fields
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect(),
            ),
            Value::Unsupported(_) => return None,
        })
    }
}

// ============ Classification ============

/// Classify a value as a wire scalar.
///
/// Lists and maps are not scalars; use [`expr_of`] or [`any_of`] for those.
pub fn scalar_of(value: &Value) -> Result<Scalar, NotEncodable> {
    match value {
        Value::Null => Ok(Scalar::Null),
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Int(n) => Ok(Scalar::SInt(*n)),
        Value::UInt(n) => Ok(Scalar::UInt(*n)),
        Value::BigInt(text) => bigint_scalar(text),
        Value::Float(n) => Ok(Scalar::Float(*n)),
        Value::Double(n) => Ok(Scalar::Double(*n)),
        Value::String(s) => Ok(Scalar::String(s.clone())),
        Value::Bytes(bytes) => Ok(Scalar::octets(bytes.clone())),
        Value::DateTime(dt) => format_datetime(dt)
            .map(Scalar::String)
            .map_err(|_| NotEncodable::new("datetime")),
        Value::List(_) | Value::Map(_) | Value::Unsupported(_) => {
            Err(NotEncodable::new(value.kind()))
        }
    }
}

/// Build an expression for a value: literal, `Array` or `Object`.
pub fn expr_of(value: &Value) -> Result<Expr, NotEncodable> {
    match value {
        Value::List(items) => Ok(Expr::Array(
            items.iter().filter_map(|v| nested(v, expr_of)).collect(),
        )),
        Value::Map(fields) => Ok(Expr::Object(
            fields
                .iter()
                .filter_map(|(k, v)| nested(v, expr_of).map(|e| (k.clone(), e)))
                .collect(),
        )),
        other => scalar_of(other).map(Expr::Literal),
    }
}

/// Build a wire `Any` for a value (prepared statement arguments).
pub fn any_of(value: &Value) -> Result<Any, NotEncodable> {
    match value {
        Value::List(items) => Ok(Any::Array(
            items.iter().filter_map(|v| nested(v, any_of)).collect(),
        )),
        Value::Map(fields) => Ok(Any::Object(
            fields
                .iter()
                .filter_map(|(k, v)| nested(v, any_of).map(|a| (k.clone(), a)))
                .collect(),
        )),
        other => scalar_of(other).map(Any::Scalar),
    }
}

/// Scalar used for a CRUD `args` entry. Composites travel as JSON octets.
pub fn arg_of(value: &Value) -> Result<Scalar, NotEncodable> {
    if value.is_composite() {
        let json = value
            .to_json()
            .ok_or_else(|| NotEncodable::new(value.kind()))?;
        return Ok(Scalar::Octets {
            value: json.to_string().into_bytes(),
            content_type: Some(CONTENT_TYPE_JSON),
        });
    }
    scalar_of(value)
}

/// Map a decoded scalar back into the value domain.
pub fn value_of(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::SInt(n) => Value::Int(*n),
        Scalar::UInt(n) => Value::UInt(*n),
        Scalar::Double(n) => Value::Double(*n),
        Scalar::Float(n) => Value::Float(*n),
        Scalar::Octets { value, .. } => Value::Bytes(value.clone()),
        Scalar::String(s) => Value::String(s.clone()),
    }
}

fn nested<T>(value: &Value, build: fn(&Value) -> Result<T, NotEncodable>) -> Option<T> {
    match build(value) {
        Ok(built) => Some(built),
        Err(e) => {
            debug!("dropping composite entry: {}", e);
            None
        }
    }
}

fn bigint_scalar(text: &str) -> Result<Scalar, NotEncodable> {
    let normalized = normalize_decimal(text).ok_or_else(|| NotEncodable::new("bigint"))?;
    if let Ok(n) = normalized.parse::<i64>() {
        return Ok(Scalar::SInt(n));
    }
    if let Ok(n) = normalized.parse::<u64>() {
        return Ok(Scalar::UInt(n));
    }
    Ok(Scalar::String(normalized))
}

/// Strip sign noise and leading zeros; `None` if `text` is not a decimal integer.
pub(crate) fn normalize_decimal(text: &str) -> Option<String> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = digits.trim_start_matches('0');
    Some(match (negative, digits) {
        (_, "") => "0".to_string(),
        (true, d) => format!("-{d}"),
        (false, d) => d.to_string(),
    })
}

fn beyond_64_bits(f: f64) -> bool {
    f.fract() == 0.0 && (f >= 18_446_744_073_709_551_616.0 || f <= -9_223_372_036_854_775_808.0)
}

fn format_datetime(dt: &OffsetDateTime) -> Result<String, time::error::Format> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    dt.to_offset(UtcOffset::UTC).format(&format)
}

// ============ Conversions ============

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<i128> for Value {
    fn from(value: i128) -> Self {
        if let Ok(n) = i64::try_from(value) {
            Value::Int(n)
        } else if let Ok(n) = u64::try_from(value) {
            Value::UInt(n)
        } else {
            Value::BigInt(value.to_string())
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

#[derive(Error, Debug)]
pub enum JsonValueError {
    #[error("invalid $bytes payload: {0}")]
    Bytes(#[from] base64::DecodeError),
    #[error("invalid $date payload: {0}")]
    Date(#[from] time::error::Parse),
    #[error("invalid $bigint payload: {0}")]
    BigInt(String),
    #[error("integer {0} does not fit in 64 bits; pass it as {{\"$bigint\": \"<digits>\"}}")]
    WideInteger(String),
}

/// JSON input. Single-key objects `{"$bytes": b64}`, `{"$date": rfc3339}` and
/// `{"$bigint": "digits"}` select the values JSON cannot express.
impl TryFrom<serde_json::Value> for Value {
    type Error = JsonValueError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    // serde_json reads integers past 64 bits as doubles.
                    if beyond_64_bits(f) {
                        return Err(JsonValueError::WideInteger(n.to_string()));
                    }
                    Value::Double(f)
                }
            }
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(fields) => {
                if fields.len() == 1 {
                    if let Some(Json::String(payload)) = fields.get("$bytes") {
                        return Ok(Value::Bytes(BASE64.decode(payload)?));
                    }
                    if let Some(Json::String(payload)) = fields.get("$date") {
                        return Ok(Value::DateTime(OffsetDateTime::parse(payload, &Rfc3339)?));
                    }
                    if let Some(Json::String(payload)) = fields.get("$bigint") {
                        return normalize_decimal(payload)
                            .map(Value::BigInt)
                            .ok_or_else(|| JsonValueError::BigInt(payload.clone()));
                    }
                }
                Value::Map(
                    fields
                        .into_iter()
                        .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }
}
