//! `Mysqlx.Crud` messages: Find, Update, Delete and their parts

use serde::{Deserialize, Serialize};

use super::wire::{Encode, Writer};
use crate::ast::{ColumnIdentifier, DataModel, Direction, Expr, Scalar};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub schema: Option<String>,
}

/// Literal row limit. Only emitted when executing directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub row_count: u64,
    pub offset: Option<u64>,
}

/// Expression row limit. Only emitted when preparing.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitExpr {
    pub row_count: Expr,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub expr: Expr,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub source: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Set = 1,
    ItemRemove = 2,
    ItemSet = 3,
    ItemReplace = 4,
    ItemMerge = 5,
    ArrayInsert = 6,
    ArrayAppend = 7,
    MergePatch = 8,
}

impl UpdateType {
    /// Whether the operation carries a value on the wire.
    pub fn takes_value(self) -> bool {
        self != UpdateType::ItemRemove
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub source: ColumnIdentifier,
    pub operation: UpdateType,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowLock {
    SharedLock = 1,
    ExclusiveLock = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowLockOptions {
    Nowait = 1,
    SkipLocked = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Find {
    pub collection: Collection,
    pub data_model: DataModel,
    pub projection: Vec<Projection>,
    pub criteria: Option<Expr>,
    pub limit: Option<Limit>,
    pub order: Vec<Order>,
    pub grouping: Vec<Expr>,
    pub grouping_criteria: Option<Expr>,
    pub args: Vec<Scalar>,
    pub locking: Option<RowLock>,
    pub locking_options: Option<RowLockOptions>,
    pub limit_expr: Option<LimitExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub collection: Collection,
    pub data_model: DataModel,
    pub criteria: Option<Expr>,
    pub limit: Option<Limit>,
    pub order: Vec<Order>,
    pub operation: Vec<UpdateOperation>,
    pub args: Vec<Scalar>,
    pub limit_expr: Option<LimitExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub collection: Collection,
    pub data_model: DataModel,
    pub criteria: Option<Expr>,
    pub limit: Option<Limit>,
    pub order: Vec<Order>,
    pub args: Vec<Scalar>,
    pub limit_expr: Option<LimitExpr>,
}

/// A compiled CRUD statement.
#[derive(Debug, Clone, PartialEq)]
pub enum CrudMessage {
    Find(Find),
    Update(Update),
    Delete(Delete),
}

impl CrudMessage {
    pub fn collection(&self) -> &Collection {
        match self {
            CrudMessage::Find(m) => &m.collection,
            CrudMessage::Update(m) => &m.collection,
            CrudMessage::Delete(m) => &m.collection,
        }
    }

    pub fn args(&self) -> &[Scalar] {
        match self {
            CrudMessage::Find(m) => &m.args,
            CrudMessage::Update(m) => &m.args,
            CrudMessage::Delete(m) => &m.args,
        }
    }

    pub fn limit(&self) -> Option<&Limit> {
        match self {
            CrudMessage::Find(m) => m.limit.as_ref(),
            CrudMessage::Update(m) => m.limit.as_ref(),
            CrudMessage::Delete(m) => m.limit.as_ref(),
        }
    }

    pub fn limit_expr(&self) -> Option<&LimitExpr> {
        match self {
            CrudMessage::Find(m) => m.limit_expr.as_ref(),
            CrudMessage::Update(m) => m.limit_expr.as_ref(),
            CrudMessage::Delete(m) => m.limit_expr.as_ref(),
        }
    }

    pub fn criteria(&self) -> Option<&Expr> {
        match self {
            CrudMessage::Find(m) => m.criteria.as_ref(),
            CrudMessage::Update(m) => m.criteria.as_ref(),
            CrudMessage::Delete(m) => m.criteria.as_ref(),
        }
    }
}

// ============ Encoding ============

fn data_model_value(model: DataModel) -> u64 {
    match model {
        DataModel::Document => 1,
        DataModel::Table => 2,
    }
}

impl Encode for Collection {
    fn encode(&self, w: &mut Writer) {
        w.string(1, &self.name);
        w.opt_string(2, self.schema.as_deref());
    }
}

impl Encode for Limit {
    fn encode(&self, w: &mut Writer) {
        w.uint(1, self.row_count);
        if let Some(offset) = self.offset {
            w.uint(2, offset);
        }
    }
}

impl Encode for LimitExpr {
    fn encode(&self, w: &mut Writer) {
        w.message(1, &self.row_count);
        w.opt_message(2, self.offset.as_ref());
    }
}

impl Encode for Order {
    fn encode(&self, w: &mut Writer) {
        w.message(1, &self.expr);
        if let Some(direction) = self.direction {
            let value = match direction {
                Direction::Asc => 1,
                Direction::Desc => 2,
            };
            w.uint(2, value);
        }
    }
}

impl Encode for Projection {
    fn encode(&self, w: &mut Writer) {
        w.message(1, &self.source);
        w.opt_string(2, self.alias.as_deref());
    }
}

impl Encode for UpdateOperation {
    fn encode(&self, w: &mut Writer) {
        w.message(1, &self.source);
        w.uint(2, self.operation as u64);
        w.opt_message(3, self.value.as_ref());
    }
}

impl Encode for Find {
    fn encode(&self, w: &mut Writer) {
        w.message(2, &self.collection);
        w.uint(3, data_model_value(self.data_model));
        w.messages(4, &self.projection);
        w.opt_message(5, self.criteria.as_ref());
        w.opt_message(6, self.limit.as_ref());
        w.messages(7, &self.order);
        w.messages(8, &self.grouping);
        w.opt_message(9, self.grouping_criteria.as_ref());
        w.messages(11, &self.args);
        if let Some(locking) = self.locking {
            w.uint(12, locking as u64);
        }
        if let Some(options) = self.locking_options {
            w.uint(13, options as u64);
        }
        w.opt_message(14, self.limit_expr.as_ref());
    }
}

impl Encode for Update {
    fn encode(&self, w: &mut Writer) {
        w.message(2, &self.collection);
        w.uint(3, data_model_value(self.data_model));
        w.opt_message(4, self.criteria.as_ref());
        w.opt_message(5, self.limit.as_ref());
        w.messages(6, &self.order);
        w.messages(7, &self.operation);
        w.messages(8, &self.args);
        w.opt_message(9, self.limit_expr.as_ref());
    }
}

impl Encode for Delete {
    fn encode(&self, w: &mut Writer) {
        w.message(1, &self.collection);
        w.uint(2, data_model_value(self.data_model));
        w.opt_message(3, self.criteria.as_ref());
        w.opt_message(4, self.limit.as_ref());
        w.messages(5, &self.order);
        w.messages(6, &self.args);
        w.opt_message(7, self.limit_expr.as_ref());
    }
}

impl Encode for CrudMessage {
    fn encode(&self, w: &mut Writer) {
        match self {
            CrudMessage::Find(m) => m.encode(w),
            CrudMessage::Update(m) => m.encode(w),
            CrudMessage::Delete(m) => m.encode(w),
        }
    }
}
