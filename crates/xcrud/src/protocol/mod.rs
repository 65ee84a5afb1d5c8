//! X Protocol wire messages
//!
//! Client messages are a closed enum; each variant encodes itself through
//! [`Encode`]. Framing (length prefix + type byte) belongs to the transport.

pub mod crud;
pub mod expr;
pub mod prepare;
pub mod server;
pub mod wire;

use bytes::Bytes;

pub use crud::{
    Collection, CrudMessage, Delete, Find, Limit, LimitExpr, Order, Projection, RowLock,
    RowLockOptions, Update, UpdateOperation, UpdateType,
};
pub use prepare::{Deallocate, Execute, Prepare};
pub use server::{ER_MAX_PREPARED_STMT_COUNT_REACHED, ServerError, ServerOk};
pub use wire::{Decode, DecodeError, Encode};

/// Client message type ids.
pub mod client_type {
    pub const CRUD_FIND: u8 = 17;
    pub const CRUD_UPDATE: u8 = 19;
    pub const CRUD_DELETE: u8 = 20;
    pub const PREPARE_PREPARE: u8 = 40;
    pub const PREPARE_EXECUTE: u8 = 41;
    pub const PREPARE_DEALLOCATE: u8 = 42;
}

/// Server message type ids.
pub mod server_type {
    pub const OK: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const SQL_STMT_EXECUTE_OK: u8 = 17;
}

/// Everything this crate sends to the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Crud(CrudMessage),
    Prepare(Prepare),
    Execute(Execute),
    Deallocate(Deallocate),
}

impl ClientMessage {
    pub fn message_type(&self) -> u8 {
        match self {
            ClientMessage::Crud(CrudMessage::Find(_)) => client_type::CRUD_FIND,
            ClientMessage::Crud(CrudMessage::Update(_)) => client_type::CRUD_UPDATE,
            ClientMessage::Crud(CrudMessage::Delete(_)) => client_type::CRUD_DELETE,
            ClientMessage::Prepare(_) => client_type::PREPARE_PREPARE,
            ClientMessage::Execute(_) => client_type::PREPARE_EXECUTE,
            ClientMessage::Deallocate(_) => client_type::PREPARE_DEALLOCATE,
        }
    }

    /// Encoded payload (without framing).
    pub fn payload(&self) -> Bytes {
        match self {
            ClientMessage::Crud(m) => m.to_bytes(),
            ClientMessage::Prepare(m) => m.to_bytes(),
            ClientMessage::Execute(m) => m.to_bytes(),
            ClientMessage::Deallocate(m) => m.to_bytes(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Crud(CrudMessage::Find(_)) => "Crud.Find",
            ClientMessage::Crud(CrudMessage::Update(_)) => "Crud.Update",
            ClientMessage::Crud(CrudMessage::Delete(_)) => "Crud.Delete",
            ClientMessage::Prepare(_) => "Prepare.Prepare",
            ClientMessage::Execute(_) => "Prepare.Execute",
            ClientMessage::Deallocate(_) => "Prepare.Deallocate",
        }
    }
}

impl From<CrudMessage> for ClientMessage {
    fn from(message: CrudMessage) -> Self {
        ClientMessage::Crud(message)
    }
}

/// Server replies, decoded as far as the lifecycle needs
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Ok(ServerOk),
    Error(ServerError),
    ExecuteOk,
    /// Anything else (result sets, notices): left to the caller.
    Other(u8),
}

impl ServerMessage {
    pub fn decode(message_type: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(match message_type {
            server_type::OK => ServerMessage::Ok(ServerOk::decode(payload)?),
            server_type::ERROR => ServerMessage::Error(ServerError::decode(payload)?),
            server_type::SQL_STMT_EXECUTE_OK => ServerMessage::ExecuteOk,
            other => ServerMessage::Other(other),
        })
    }
}
