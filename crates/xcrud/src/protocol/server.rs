//! Server replies the lifecycle cares about: `Ok` and `Error`

use thiserror::Error;

use super::wire::{Decode, DecodeError, Encode, Reader, Writer};

/// Server error code for "Can't create more than max_prepared_stmt_count statements".
pub const ER_MAX_PREPARED_STMT_COUNT_REACHED: u32 = 1461;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOk {
    pub msg: Option<String>,
}

/// `Mysqlx.Error`, passed through to callers untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("server error {code} ({sql_state}): {msg}")]
pub struct ServerError {
    pub fatal: bool,
    pub code: u32,
    pub msg: String,
    pub sql_state: String,
}

impl ServerError {
    pub fn is_prepared_capacity_exhausted(&self) -> bool {
        self.code == ER_MAX_PREPARED_STMT_COUNT_REACHED
    }
}

impl ServerError {
    pub fn new(code: u32, msg: impl Into<String>) -> Self {
        Self {
            fatal: false,
            code,
            msg: msg.into(),
            sql_state: "HY000".into(),
        }
    }
}

impl Decode for ServerOk {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let mut msg = None;
        while let Some((field, value)) = r.next_field()? {
            if field == 1 {
                msg = Some(value.as_string());
            }
        }
        Ok(Self { msg })
    }
}

impl Decode for ServerError {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let mut fatal = false;
        let mut code = None;
        let mut msg = None;
        let mut sql_state = None;
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => fatal = value.as_u64() == 1,
                2 => code = Some(value.as_u64() as u32),
                3 => msg = Some(value.as_string()),
                4 => sql_state = Some(value.as_string()),
                _ => {}
            }
        }
        let missing = |field| DecodeError::MissingField {
            message: "Error",
            field,
        };
        Ok(Self {
            fatal,
            code: code.ok_or_else(|| missing(2))?,
            msg: msg.ok_or_else(|| missing(3))?,
            sql_state: sql_state.ok_or_else(|| missing(4))?,
        })
    }
}

// Servers are not written in this crate; encoding exists for test doubles.

impl Encode for ServerOk {
    fn encode(&self, w: &mut Writer) {
        w.opt_string(1, self.msg.as_deref());
    }
}

impl Encode for ServerError {
    fn encode(&self, w: &mut Writer) {
        if self.fatal {
            w.uint(1, 1);
        }
        w.uint(2, u64::from(self.code));
        w.string(3, &self.msg);
        w.string(4, &self.sql_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::Writer;

    #[test]
    fn decodes_capacity_error() {
        let mut w = Writer::new();
        w.uint(2, 1461);
        w.string(3, "Can't create more than max_prepared_stmt_count statements");
        w.string(4, "42000");
        let err = ServerError::decode(&w.finish()).unwrap();
        assert!(err.is_prepared_capacity_exhausted());
        assert!(!err.fatal);
        assert_eq!(err.sql_state, "42000");
    }

    #[test]
    fn error_survives_a_round_trip() {
        let err = ServerError::new(1064, "syntax");
        assert_eq!(ServerError::decode(&err.to_bytes()).unwrap(), err);
    }

    #[test]
    fn error_without_code_is_rejected() {
        let mut w = Writer::new();
        w.string(3, "oops");
        assert!(ServerError::decode(&w.finish()).is_err());
    }
}
