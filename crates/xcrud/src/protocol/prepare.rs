//! `Mysqlx.Prepare` messages

use super::crud::CrudMessage;
use super::wire::{Encode, Writer};
use crate::ast::Any;

/// Register `stmt` on the server under `stmt_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepare {
    pub stmt_id: u32,
    pub stmt: CrudMessage,
}

/// Run a prepared statement with positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Execute {
    pub stmt_id: u32,
    pub args: Vec<Any>,
}

/// Release a prepared statement on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deallocate {
    pub stmt_id: u32,
}

/// `Prepare.OneOfMessage`
struct OneOf<'a>(&'a CrudMessage);

impl Encode for OneOf<'_> {
    fn encode(&self, w: &mut Writer) {
        match self.0 {
            CrudMessage::Find(find) => {
                w.uint(1, 0);
                w.message(2, find);
            }
            CrudMessage::Update(update) => {
                w.uint(1, 2);
                w.message(4, update);
            }
            CrudMessage::Delete(delete) => {
                w.uint(1, 4);
                w.message(5, delete);
            }
        }
    }
}

impl Encode for Prepare {
    fn encode(&self, w: &mut Writer) {
        w.uint(1, u64::from(self.stmt_id));
        w.message(2, &OneOf(&self.stmt));
    }
}

impl Encode for Execute {
    fn encode(&self, w: &mut Writer) {
        w.uint(1, u64::from(self.stmt_id));
        w.messages(2, &self.args);
    }
}

impl Encode for Deallocate {
    fn encode(&self, w: &mut Writer) {
        w.uint(1, u64::from(self.stmt_id));
    }
}
