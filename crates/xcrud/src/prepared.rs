//! Per-session prepared-statement bookkeeping
//!
//! The registry decides, for every execution of a statement handle, whether
//! to send the statement directly, prepare it, reuse an earlier preparation,
//! or drop a stale preparation. It never talks to the server itself; the
//! caller sends the messages of the returned [`Plan`] and reports prepare
//! failures back through [`StatementRegistry::prepare_failed`].

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use log::{debug, info, warn};

use crate::CompileError;
use crate::compile::{Mode, Statement, bind_args, compile, compile_prepared};
use crate::protocol::{
    ClientMessage, CrudMessage, Deallocate, Encode, Execute, Prepare, ServerError,
};

/// Identifies one logical statement across executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementState {
    Unprepared,
    /// Prepared on the server under `id`. `signature` is the encoded
    /// prepare-mode message the preparation was made from.
    Prepared { id: u32, signature: Bytes },
    /// The server refused to prepare more statements; always execute directly.
    Unpreparable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Direct,
    Prepare,
    Reuse,
    Deallocate,
}

/// What to send for one execution, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Direct {
        message: CrudMessage,
    },
    Prepare {
        id: u32,
        prepare: Prepare,
        execute: Execute,
    },
    Reuse {
        execute: Execute,
    },
    /// Release a stale preparation, then execute directly.
    Deallocate {
        deallocate: Deallocate,
        message: CrudMessage,
    },
}

impl Plan {
    pub fn decision(&self) -> Decision {
        match self {
            Plan::Direct { .. } => Decision::Direct,
            Plan::Prepare { .. } => Decision::Prepare,
            Plan::Reuse { .. } => Decision::Reuse,
            Plan::Deallocate { .. } => Decision::Deallocate,
        }
    }

    /// Compile mode of the statement body this plan carries.
    pub fn mode(&self) -> Mode {
        match self {
            Plan::Prepare { .. } | Plan::Reuse { .. } => Mode::Prepare,
            Plan::Direct { .. } | Plan::Deallocate { .. } => Mode::Execute,
        }
    }

    /// Server-side id the execution runs under, if any.
    pub fn statement_id(&self) -> Option<u32> {
        match self {
            Plan::Prepare { id, .. } => Some(*id),
            Plan::Reuse { execute } => Some(execute.stmt_id),
            Plan::Direct { .. } | Plan::Deallocate { .. } => None,
        }
    }

    pub fn messages(&self) -> Vec<ClientMessage> {
        match self {
            Plan::Direct { message } => vec![ClientMessage::Crud(message.clone())],
            Plan::Prepare {
                prepare, execute, ..
            } => vec![
                ClientMessage::Prepare(prepare.clone()),
                ClientMessage::Execute(execute.clone()),
            ],
            Plan::Reuse { execute } => vec![ClientMessage::Execute(execute.clone())],
            Plan::Deallocate {
                deallocate,
                message,
            } => vec![
                ClientMessage::Deallocate(*deallocate),
                ClientMessage::Crud(message.clone()),
            ],
        }
    }
}

#[derive(Debug)]
struct Entry {
    state: StatementState,
    executions: u64,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: StatementState::Unprepared,
            executions: 0,
        }
    }
}

/// Prepared-statement state of one session.
#[derive(Debug)]
pub struct StatementRegistry {
    entries: HashMap<StatementHandle, Entry>,
    free_ids: BTreeSet<u32>,
    next_id: u32,
    next_handle: u64,
}

impl Default for StatementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            free_ids: BTreeSet::new(),
            next_id: 1,
            next_handle: 1,
        }
    }

    pub fn register(&mut self) -> StatementHandle {
        let handle = StatementHandle(self.next_handle);
        self.next_handle += 1;
        self.entries.insert(handle, Entry::new());
        handle
    }

    pub fn state(&self, handle: StatementHandle) -> Option<&StatementState> {
        self.entries.get(&handle).map(|e| &e.state)
    }

    pub fn executions(&self, handle: StatementHandle) -> u64 {
        self.entries.get(&handle).map_or(0, |e| e.executions)
    }

    /// Number of statements currently prepared on the server.
    pub fn prepared_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.state, StatementState::Prepared { .. }))
            .count()
    }

    /// Plan the next execution of `handle`.
    ///
    /// Unknown handles are treated as freshly registered. If compilation
    /// fails nothing changes.
    pub fn decide(&mut self, handle: StatementHandle, stmt: &Statement) -> Result<Plan, CompileError> {
        let (state, executions) = match self.entries.get(&handle) {
            Some(entry) => (entry.state.clone(), entry.executions),
            None => (StatementState::Unprepared, 0),
        };

        let (plan, next_state) = match state {
            StatementState::Unpreparable => {
                let message = compile(stmt, Mode::Execute)?;
                (Plan::Direct { message }, StatementState::Unpreparable)
            }
            StatementState::Unprepared if executions == 0 => {
                let message = compile(stmt, Mode::Execute)?;
                debug!("{handle:?}: first execution, sending directly");
                (Plan::Direct { message }, StatementState::Unprepared)
            }
            StatementState::Unprepared => {
                let (message, placeholders) = compile_prepared(stmt)?;
                let args = bind_args(stmt, &placeholders)?;
                let signature = message.to_bytes();
                let id = self.allocate_id();
                info!("{handle:?}: preparing as statement {id}");
                let plan = Plan::Prepare {
                    id,
                    prepare: Prepare {
                        stmt_id: id,
                        stmt: message,
                    },
                    execute: Execute { stmt_id: id, args },
                };
                (plan, StatementState::Prepared { id, signature })
            }
            StatementState::Prepared { id, signature } => {
                let (message, placeholders) = compile_prepared(stmt)?;
                if message.to_bytes() == signature {
                    let args = bind_args(stmt, &placeholders)?;
                    debug!("{handle:?}: reusing statement {id}");
                    let plan = Plan::Reuse {
                        execute: Execute { stmt_id: id, args },
                    };
                    (plan, StatementState::Prepared { id, signature })
                } else {
                    let message = compile(stmt, Mode::Execute)?;
                    info!("{handle:?}: statement shape changed, deallocating {id}");
                    self.free_ids.insert(id);
                    let plan = Plan::Deallocate {
                        deallocate: Deallocate { stmt_id: id },
                        message,
                    };
                    (plan, StatementState::Unprepared)
                }
            }
        };

        let entry = self.entries.entry(handle).or_insert_with(Entry::new);
        entry.state = next_state;
        entry.executions += 1;
        Ok(plan)
    }

    /// The server rejected the prepare of `handle` with `error`.
    ///
    /// Capacity exhaustion makes the handle permanently direct; anything else
    /// lets the next execution try again. Returns whether the caller should
    /// fall back to a direct execution.
    pub fn prepare_failed(&mut self, handle: StatementHandle, error: &ServerError) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        if let StatementState::Prepared { id, .. } = entry.state {
            self.free_ids.insert(id);
        }
        if error.is_prepared_capacity_exhausted() {
            warn!("{handle:?}: server is out of prepared statements, executing directly from now on");
            entry.state = StatementState::Unpreparable;
            true
        } else {
            debug!("{handle:?}: prepare failed with error {}", error.code);
            entry.state = StatementState::Unprepared;
            false
        }
    }

    /// Drop the server-side preparation of `handle`, keeping the handle.
    pub fn deallocate(&mut self, handle: StatementHandle) -> Option<Deallocate> {
        let entry = self.entries.get_mut(&handle)?;
        let StatementState::Prepared { id, .. } = entry.state else {
            return None;
        };
        entry.state = StatementState::Unprepared;
        self.free_ids.insert(id);
        Some(Deallocate { stmt_id: id })
    }

    /// Forget `handle`. Returns the deallocation to send if it was prepared.
    pub fn close(&mut self, handle: StatementHandle) -> Option<Deallocate> {
        let entry = self.entries.remove(&handle)?;
        match entry.state {
            StatementState::Prepared { id, .. } => {
                self.free_ids.insert(id);
                Some(Deallocate { stmt_id: id })
            }
            _ => None,
        }
    }

    /// The connection was lost: nothing prepared survives.
    pub fn reset_session(&mut self) {
        info!(
            "resetting prepared statement state ({} entries)",
            self.entries.len()
        );
        self.entries.clear();
        self.free_ids.clear();
        self.next_id = 1;
    }

    fn allocate_id(&mut self) -> u32 {
        if let Some(id) = self.free_ids.pop_first() {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ER_MAX_PREPARED_STMT_COUNT_REACHED;

    fn stmt() -> Statement {
        Statement::find("c").criteria("a = :a").bind("a", 1)
    }

    #[test]
    fn ids_come_from_the_free_pool_first() {
        let mut registry = StatementRegistry::new();
        let handles: Vec<_> = (0..3).map(|_| registry.register()).collect();
        for &h in &handles {
            registry.decide(h, &stmt()).unwrap();
            registry.decide(h, &stmt()).unwrap();
        }
        assert_eq!(registry.prepared_count(), 3);

        assert_eq!(registry.close(handles[1]), Some(Deallocate { stmt_id: 2 }));
        assert_eq!(registry.close(handles[0]), Some(Deallocate { stmt_id: 1 }));

        let h = registry.register();
        registry.decide(h, &stmt()).unwrap();
        let plan = registry.decide(h, &stmt()).unwrap();
        assert_eq!(plan.statement_id(), Some(1));
    }

    #[test]
    fn failed_compile_leaves_state_alone() {
        let mut registry = StatementRegistry::new();
        let h = registry.register();
        let broken = Statement::find("c").criteria("a = ");
        assert!(registry.decide(h, &broken).is_err());
        assert_eq!(registry.executions(h), 0);

        registry.decide(h, &stmt()).unwrap();
        assert!(registry.decide(h, &broken).is_err());
        assert_eq!(registry.state(h), Some(&StatementState::Unprepared));
        assert_eq!(registry.executions(h), 1);
    }

    #[test]
    fn capacity_error_is_permanent() {
        let mut registry = StatementRegistry::new();
        let h = registry.register();
        registry.decide(h, &stmt()).unwrap();
        let plan = registry.decide(h, &stmt()).unwrap();
        assert_eq!(plan.decision(), Decision::Prepare);

        let full = ServerError::new(ER_MAX_PREPARED_STMT_COUNT_REACHED, "too many statements");
        assert!(registry.prepare_failed(h, &full));
        assert_eq!(registry.state(h), Some(&StatementState::Unpreparable));
        for _ in 0..3 {
            let plan = registry.decide(h, &stmt()).unwrap();
            assert_eq!(plan.decision(), Decision::Direct);
        }

        // The id went back to the pool.
        let other = registry.register();
        registry.decide(other, &stmt()).unwrap();
        assert_eq!(registry.decide(other, &stmt()).unwrap().statement_id(), Some(1));
    }

    #[test]
    fn other_prepare_errors_allow_a_retry() {
        let mut registry = StatementRegistry::new();
        let h = registry.register();
        registry.decide(h, &stmt()).unwrap();
        registry.decide(h, &stmt()).unwrap();
        assert!(!registry.prepare_failed(h, &ServerError::new(1064, "syntax")));
        assert_eq!(registry.state(h), Some(&StatementState::Unprepared));
        let plan = registry.decide(h, &stmt()).unwrap();
        assert_eq!(plan.decision(), Decision::Prepare);
        assert_eq!(plan.statement_id(), Some(1));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut registry = StatementRegistry::new();
        let h = registry.register();
        registry.decide(h, &stmt()).unwrap();
        registry.decide(h, &stmt()).unwrap();
        registry.reset_session();
        assert_eq!(registry.state(h), None);
        assert_eq!(registry.prepared_count(), 0);
        assert_eq!(registry.decide(h, &stmt()).unwrap().decision(), Decision::Direct);
    }

    #[test]
    fn plan_messages_are_ordered() {
        let mut registry = StatementRegistry::new();
        let h = registry.register();
        registry.decide(h, &stmt()).unwrap();
        let names: Vec<_> = registry
            .decide(h, &stmt())
            .unwrap()
            .messages()
            .iter()
            .map(ClientMessage::name)
            .collect();
        assert_eq!(names, vec!["Prepare.Prepare", "Prepare.Execute"]);
        assert_eq!(registry.deallocate(h), Some(Deallocate { stmt_id: 1 }));
        assert_eq!(registry.deallocate(h), None);
    }
}
