//! Statement descriptors and their compilation into CRUD messages
//!
//! A [`Statement`] is what the caller builds: target, text fragments, bound
//! values. [`compile`] turns it into a wire-ready [`CrudMessage`] in one of two
//! modes:
//!
//! - [`Mode::Execute`]: placeholders are resolved against the bound values and
//!   shipped in `args`; the row limit is a literal `Limit`.
//! - [`Mode::Prepare`]: no `args`; the row limit becomes a `LimitExpr` over two
//!   trailing placeholders so that the message shape does not depend on values.
//!
//! All fragments of one statement share a single placeholder table, filled in
//! the order criteria, projection, grouping, grouping criteria, order.

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Deserializer};

use crate::{CompileError, XcrudError};
use crate::ast::{Any, DataModel, Expr, Scalar};
use crate::parse::{GrammarStart, ParseOptions, Parsed, parse_with};
use crate::protocol::{
    Collection, CrudMessage, Delete, Find, Limit, LimitExpr, Order, Projection, RowLock,
    RowLockOptions, Update, UpdateOperation, UpdateType,
};
use crate::value::{Value, any_of, arg_of, expr_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Execute,
    Prepare,
}

/// An expression fragment: source text, or an already parsed tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "String")]
pub enum Fragment {
    Text(String),
    Parsed(Parsed),
}

impl From<String> for Fragment {
    fn from(text: String) -> Self {
        Fragment::Text(text)
    }
}

impl From<&str> for Fragment {
    fn from(text: &str) -> Self {
        Fragment::Text(text.to_string())
    }
}

impl From<Parsed> for Fragment {
    fn from(parsed: Parsed) -> Self {
        Fragment::Parsed(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
}

/// Find-only clauses.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct FindClauses {
    pub projection: Vec<Fragment>,
    pub grouping: Vec<Fragment>,
    pub grouping_criteria: Option<Fragment>,
    pub lock: Option<RowLock>,
    pub lock_options: Option<RowLockOptions>,
}

/// One modification of an update statement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateSpec {
    /// Document path (document model) or column, optionally with a JSON path.
    pub source: String,
    pub kind: UpdateType,
    /// Encoded as a literal, never parsed. A JSON `null` is a present null value.
    #[serde(default, deserialize_with = "present")]
    pub value: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Find(FindClauses),
    Update {
        #[serde(default)]
        operations: Vec<UpdateSpec>,
    },
    Delete,
}

/// Descriptor of a CRUD statement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Statement {
    pub target: Target,
    #[serde(default)]
    pub data_model: DataModel,
    #[serde(default)]
    pub criteria: Option<Fragment>,
    #[serde(default)]
    pub bindings: IndexMap<String, Value>,
    #[serde(default)]
    pub order: Vec<Fragment>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(flatten)]
    pub operation: Operation,
}

// ============ Builder ============

impl Statement {
    fn new(name: impl Into<String>, operation: Operation) -> Self {
        Self {
            target: Target {
                schema: None,
                name: name.into(),
            },
            data_model: DataModel::Document,
            criteria: None,
            bindings: IndexMap::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            operation,
        }
    }

    /// Read a JSON descriptor, e.g.
    /// `{"kind": "find", "target": {"name": "c"}, "criteria": "a > :x", "bindings": {"x": 1}}`.
    pub fn from_json(text: &str) -> Result<Self, XcrudError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn find(name: impl Into<String>) -> Self {
        Self::new(name, Operation::Find(FindClauses::default()))
    }

    pub fn update(name: impl Into<String>) -> Self {
        Self::new(name, Operation::Update { operations: Vec::new() })
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self::new(name, Operation::Delete)
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.target.schema = Some(schema.into());
        self
    }

    /// Target a relational table instead of a document collection.
    pub fn table(mut self) -> Self {
        self.data_model = DataModel::Table;
        self
    }

    pub fn criteria(mut self, criteria: impl Into<Fragment>) -> Self {
        self.criteria = Some(criteria.into());
        self
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn order_by(mut self, sort: impl Into<Fragment>) -> Self {
        self.order.push(sort.into());
        self
    }

    pub fn limit(mut self, row_count: u64) -> Self {
        self.limit = Some(row_count);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Add a projection. Ignored unless this is a find.
    pub fn fields(mut self, projection: impl Into<Fragment>) -> Self {
        if let Operation::Find(clauses) = &mut self.operation {
            clauses.projection.push(projection.into());
        }
        self
    }

    /// Ignored unless this is a find.
    pub fn group_by(mut self, grouping: impl Into<Fragment>) -> Self {
        if let Operation::Find(clauses) = &mut self.operation {
            clauses.grouping.push(grouping.into());
        }
        self
    }

    /// Ignored unless this is a find.
    pub fn having(mut self, criteria: impl Into<Fragment>) -> Self {
        if let Operation::Find(clauses) = &mut self.operation {
            clauses.grouping_criteria = Some(criteria.into());
        }
        self
    }

    /// Ignored unless this is a find.
    pub fn lock(mut self, lock: RowLock, options: Option<RowLockOptions>) -> Self {
        if let Operation::Find(clauses) = &mut self.operation {
            clauses.lock = Some(lock);
            clauses.lock_options = options;
        }
        self
    }

    /// Add an update operation. Ignored unless this is an update.
    pub fn modify(mut self, source: impl Into<String>, kind: UpdateType, value: Option<Value>) -> Self {
        if let Operation::Update { operations } = &mut self.operation {
            operations.push(UpdateSpec {
                source: source.into(),
                kind,
                value,
            });
        }
        self
    }

    pub fn set(self, source: impl Into<String>, value: impl Into<Value>) -> Self {
        self.modify(source, UpdateType::Set, Some(value.into()))
    }

    pub fn unset(self, source: impl Into<String>) -> Self {
        self.modify(source, UpdateType::ItemRemove, None)
    }

    pub fn kind(&self) -> &'static str {
        match self.operation {
            Operation::Find(_) => "find",
            Operation::Update { .. } => "update",
            Operation::Delete => "delete",
        }
    }
}

// ============ Compilation ============

/// Compile `stmt` for the given mode.
pub fn compile(stmt: &Statement, mode: Mode) -> Result<CrudMessage, CompileError> {
    compile_with_table(stmt, mode).map(|(message, _)| message)
}

/// Prepare-mode message plus the placeholder table its positions refer to.
pub fn compile_prepared(stmt: &Statement) -> Result<(CrudMessage, Vec<String>), CompileError> {
    compile_with_table(stmt, Mode::Prepare)
}

/// Arguments for executing the prepared form of `stmt`.
///
/// One entry per placeholder name, then row count and offset when the
/// statement has a limit.
pub fn bind_args(stmt: &Statement, placeholders: &[String]) -> Result<Vec<Any>, CompileError> {
    let mut args = placeholders
        .iter()
        .map(|name| Ok(any_of(lookup(&stmt.bindings, name)?)?))
        .collect::<Result<Vec<_>, CompileError>>()?;
    if let Some(row_count) = stmt.limit {
        args.push(Any::Scalar(Scalar::UInt(row_count)));
        args.push(Any::Scalar(Scalar::UInt(stmt.offset.unwrap_or(0))));
    }
    Ok(args)
}

fn lookup<'a>(bindings: &'a IndexMap<String, Value>, name: &str) -> Result<&'a Value, CompileError> {
    bindings
        .get(name)
        .ok_or_else(|| CompileError::UnboundPlaceholder(name.to_string()))
}

fn compile_with_table(
    stmt: &Statement,
    mode: Mode,
) -> Result<(CrudMessage, Vec<String>), CompileError> {
    if stmt.target.name.is_empty() {
        return Err(CompileError::InvalidDescriptor("target name is empty".into()));
    }
    if stmt.offset.is_some() && stmt.limit.is_none() {
        return Err(CompileError::InvalidDescriptor("offset requires a limit".into()));
    }
    debug!(
        "compiling {} on {} ({:?} mode)",
        stmt.kind(),
        stmt.target.name,
        mode
    );

    let model = stmt.data_model;
    let mut table = PlaceholderTable::new(model);
    let collection = Collection {
        name: stmt.target.name.clone(),
        schema: stmt.target.schema.clone(),
    };

    let criteria = stmt
        .criteria
        .as_ref()
        .map(|c| table.parse(c, GrammarStart::Expr).map(|p| p.expr))
        .transpose()?;

    // Find clauses come before order in the shared table.
    let find_parts = match &stmt.operation {
        Operation::Find(clauses) => Some(find_parts(clauses, &mut table)?),
        _ => None,
    };

    let order = stmt
        .order
        .iter()
        .map(|sort| {
            let parsed = table.parse(sort, GrammarStart::SortExpr)?;
            Ok(Order {
                expr: parsed.expr,
                direction: parsed.direction,
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;

    let placeholders = table.names;
    let (limit, limit_expr, args) = match mode {
        Mode::Execute => {
            let args = placeholders
                .iter()
                .map(|name| Ok(arg_of(lookup(&stmt.bindings, name)?)?))
                .collect::<Result<Vec<_>, CompileError>>()?;
            let limit = stmt.limit.map(|row_count| Limit {
                row_count,
                offset: stmt.offset,
            });
            (limit, None, args)
        }
        Mode::Prepare => {
            let next = placeholders.len() as u32;
            let limit_expr = stmt.limit.map(|_| LimitExpr {
                row_count: Expr::Placeholder(next),
                offset: Some(Expr::Placeholder(next + 1)),
            });
            (None, limit_expr, Vec::new())
        }
    };

    let message = match &stmt.operation {
        Operation::Find(_) => {
            let FindParts {
                projection,
                grouping,
                grouping_criteria,
                locking,
                locking_options,
            } = find_parts.unwrap_or_default();
            CrudMessage::Find(Find {
                collection,
                data_model: model,
                projection,
                criteria,
                limit,
                order,
                grouping,
                grouping_criteria,
                args,
                locking,
                locking_options,
                limit_expr,
            })
        }
        Operation::Update { operations } => CrudMessage::Update(Update {
            collection,
            data_model: model,
            criteria,
            limit,
            order,
            operation: operations
                .iter()
                .map(|spec| update_operation(spec, model))
                .collect::<Result<Vec<_>, _>>()?,
            args,
            limit_expr,
        }),
        Operation::Delete => CrudMessage::Delete(Delete {
            collection,
            data_model: model,
            criteria,
            limit,
            order,
            args,
            limit_expr,
        }),
    };
    Ok((message, placeholders))
}

#[derive(Default)]
struct FindParts {
    projection: Vec<Projection>,
    grouping: Vec<Expr>,
    grouping_criteria: Option<Expr>,
    locking: Option<RowLock>,
    locking_options: Option<RowLockOptions>,
}

fn find_parts(
    clauses: &FindClauses,
    table: &mut PlaceholderTable,
) -> Result<FindParts, CompileError> {
    let projection = clauses
        .projection
        .iter()
        .map(|fragment| {
            let parsed = table.parse(fragment, GrammarStart::ProjectedExpr)?;
            let alias = parsed.alias.or_else(|| match fragment {
                Fragment::Text(text) => Some(text.trim().to_string()),
                Fragment::Parsed(_) => Some(parsed.expr.to_string()),
            });
            Ok(Projection {
                source: parsed.expr,
                alias,
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;
    let grouping = clauses
        .grouping
        .iter()
        .map(|g| table.parse(g, GrammarStart::Expr).map(|p| p.expr))
        .collect::<Result<Vec<_>, _>>()?;
    let grouping_criteria = clauses
        .grouping_criteria
        .as_ref()
        .map(|g| table.parse(g, GrammarStart::Expr).map(|p| p.expr))
        .transpose()?;
    Ok(FindParts {
        projection,
        grouping,
        grouping_criteria,
        locking: clauses.lock,
        locking_options: clauses.lock_options,
    })
}

fn update_operation(spec: &UpdateSpec, model: DataModel) -> Result<UpdateOperation, CompileError> {
    let start = match model {
        DataModel::Document => GrammarStart::DocumentField,
        DataModel::Table => GrammarStart::ColumnOrPath,
    };
    let Expr::Ident(source) = parse_with(&spec.source, start, ParseOptions::new(model))?.expr else {
        return Err(CompileError::InvalidDescriptor(format!(
            "update source {:?} is not a column or document path",
            spec.source
        )));
    };
    let value = match (&spec.value, spec.kind.takes_value()) {
        (Some(value), true) => Some(expr_of(value)?),
        (None, true) => {
            return Err(CompileError::InvalidDescriptor(format!(
                "{:?} on {:?} needs a value",
                spec.kind, spec.source
            )));
        }
        (Some(_), false) => {
            debug!("ignoring value given for item removal of {:?}", spec.source);
            None
        }
        (None, false) => None,
    };
    Ok(UpdateOperation {
        source,
        operation: spec.kind,
        value,
    })
}

/// Placeholder names shared by every fragment of one statement.
struct PlaceholderTable {
    model: DataModel,
    names: Vec<String>,
}

impl PlaceholderTable {
    fn new(model: DataModel) -> Self {
        Self {
            model,
            names: Vec::new(),
        }
    }

    fn parse(&mut self, fragment: &Fragment, start: GrammarStart) -> Result<Parsed, CompileError> {
        match fragment {
            Fragment::Text(text) => {
                let options = ParseOptions::new(self.model).with_placeholders(self.names.clone());
                let parsed = parse_with(text, start, options)?;
                self.names.clone_from(&parsed.placeholders);
                Ok(parsed)
            }
            Fragment::Parsed(parsed) => {
                let mut parsed = parsed.clone();
                let local = &parsed.placeholders;
                let names = &mut self.names;
                parsed.expr.map_placeholders(&mut |pos| {
                    let name = local.get(pos as usize).ok_or_else(|| {
                        CompileError::InvalidDescriptor(format!(
                            "placeholder position {pos} has no name"
                        ))
                    })?;
                    Ok::<u32, CompileError>(intern(names, name))
                })?;
                parsed.placeholders = self.names.clone();
                Ok(parsed)
            }
        }
    }
}

fn intern(names: &mut Vec<String>, name: &str) -> u32 {
    let pos = match names.iter().position(|n| n == name) {
        Some(pos) => pos,
        None => {
            names.push(name.to_string());
            names.len() - 1
        }
    };
    pos as u32
}
