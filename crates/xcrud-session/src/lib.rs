//! xcrud-session - runs compiled CRUD statements over an X Protocol connection
//!
//! A [`Session`] owns one transport and the prepared-statement registry of
//! that connection. Each execution holds the session lock for its whole round
//! trip, so registry transitions and the server exchanges they imply never
//! interleave.
//!
//! # Example
//!
//! ```ignore
//! use xcrud::Statement;
//! use xcrud_session::{Session, StreamTransport};
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:33060").await?;
//! let session = Session::new(StreamTransport::new(stream));
//! let handle = session.register().await;
//!
//! let stmt = Statement::find("people").schema("test").criteria("age > :min").bind("min", 18);
//! let outcome = session.execute(handle, &stmt).await?;
//! for frame in outcome.frames { /* result set messages */ }
//! ```

mod transport;

pub use transport::{Frame, StreamTransport, Transport};

use std::io;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;
use xcrud::protocol::{ClientMessage, DecodeError, ServerError, ServerMessage};
use xcrud::{CompileError, Decision, Mode, Plan, Statement, StatementHandle, StatementRegistry};

// ============ Errors ============

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Unexpected server message type {0}")]
    Unexpected(u8),
    #[error("Session is closed")]
    Closed,
}

// ============ Configuration ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Prepare statements that are executed more than once.
    pub prepared_statements: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            prepared_statements: true,
        }
    }
}

impl SessionOptions {
    pub fn with_prepared_statements(mut self, enabled: bool) -> Self {
        self.prepared_statements = enabled;
        self
    }
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub decision: Decision,
    /// Server-side statement id the execution ran under.
    pub statement_id: Option<u32>,
    /// Result frames received before `StmtExecuteOk`, untouched.
    pub frames: Vec<Frame>,
}

// ============ Session ============

pub struct Session<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    transport: T,
    registry: StatementRegistry,
    options: SessionOptions,
    closed: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, SessionOptions::default())
    }

    pub fn with_options(transport: T, options: SessionOptions) -> Self {
        Self {
            inner: Mutex::new(Inner {
                transport,
                registry: StatementRegistry::new(),
                options,
                closed: false,
            }),
        }
    }

    /// New statement handle. Handles stay valid across reconnects.
    pub async fn register(&self) -> StatementHandle {
        self.inner.lock().await.registry.register()
    }

    /// Compile and run `stmt`, preparing it on the server when it repeats.
    pub async fn execute(
        &self,
        handle: StatementHandle,
        stmt: &Statement,
    ) -> Result<Outcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(SessionError::Closed);
        }
        let result = inner.execute(handle, stmt).await;
        inner.check_connection(&result);
        result
    }

    /// Forget `handle`, releasing its server-side statement if it has one.
    pub async fn close_statement(&self, handle: StatementHandle) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let Some(deallocate) = inner.registry.close(handle) else {
            return Ok(());
        };
        if inner.closed {
            return Ok(());
        }
        let result = async {
            inner.send(ClientMessage::Deallocate(deallocate)).await?;
            inner.expect_ok().await
        }
        .await;
        inner.check_connection(&result);
        result
    }

    /// Swap in a fresh connection. Every preparation of the old one is gone.
    pub async fn reconnect(&self, transport: T) {
        let mut inner = self.inner.lock().await;
        inner.transport = transport;
        inner.registry.reset_session();
        inner.closed = false;
    }

    pub async fn prepared_count(&self) -> usize {
        self.inner.lock().await.registry.prepared_count()
    }

    pub fn into_transport(self) -> T {
        self.inner.into_inner().transport
    }
}

impl<T: Transport> Inner<T> {
    async fn execute(
        &mut self,
        handle: StatementHandle,
        stmt: &Statement,
    ) -> Result<Outcome, SessionError> {
        if !self.options.prepared_statements {
            let message = xcrud::compile(stmt, Mode::Execute)?;
            return self.run_direct(ClientMessage::Crud(message)).await;
        }

        match self.registry.decide(handle, stmt)? {
            Plan::Direct { message } => self.run_direct(ClientMessage::Crud(message)).await,
            Plan::Reuse { execute } => {
                let id = execute.stmt_id;
                self.send(ClientMessage::Execute(execute)).await?;
                Ok(Outcome {
                    decision: Decision::Reuse,
                    statement_id: Some(id),
                    frames: self.read_result().await?,
                })
            }
            Plan::Deallocate {
                deallocate,
                message,
            } => {
                self.send(ClientMessage::Deallocate(deallocate)).await?;
                self.expect_ok().await?;
                let mut outcome = self.run_direct(ClientMessage::Crud(message)).await?;
                outcome.decision = Decision::Deallocate;
                Ok(outcome)
            }
            Plan::Prepare {
                id,
                prepare,
                execute,
            } => {
                self.send(ClientMessage::Prepare(prepare)).await?;
                match self.expect_ok().await {
                    Ok(()) => {}
                    Err(SessionError::Server(err)) => {
                        if !self.registry.prepare_failed(handle, &err) {
                            return Err(SessionError::Server(err));
                        }
                        info!("falling back to direct execution for {handle:?}");
                        let message = xcrud::compile(stmt, Mode::Execute)?;
                        return self.run_direct(ClientMessage::Crud(message)).await;
                    }
                    Err(other) => return Err(other),
                }
                self.send(ClientMessage::Execute(execute)).await?;
                Ok(Outcome {
                    decision: Decision::Prepare,
                    statement_id: Some(id),
                    frames: self.read_result().await?,
                })
            }
        }
    }

    async fn run_direct(&mut self, message: ClientMessage) -> Result<Outcome, SessionError> {
        self.send(message).await?;
        Ok(Outcome {
            decision: Decision::Direct,
            statement_id: None,
            frames: self.read_result().await?,
        })
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        debug!("-> {}", message.name());
        self.transport
            .send(message.message_type(), message.payload())
            .await?;
        Ok(())
    }

    /// Collect frames up to the end of a statement's result.
    async fn read_result(&mut self) -> Result<Vec<Frame>, SessionError> {
        let mut frames = Vec::new();
        loop {
            let frame = self.transport.recv().await?;
            match ServerMessage::decode(frame.message_type, &frame.payload)? {
                ServerMessage::ExecuteOk | ServerMessage::Ok(_) => return Ok(frames),
                ServerMessage::Error(err) => return Err(err.into()),
                ServerMessage::Other(_) => frames.push(frame),
            }
        }
    }

    async fn expect_ok(&mut self) -> Result<(), SessionError> {
        let frame = self.transport.recv().await?;
        match ServerMessage::decode(frame.message_type, &frame.payload)? {
            ServerMessage::Ok(_) => Ok(()),
            ServerMessage::Error(err) => Err(err.into()),
            ServerMessage::ExecuteOk | ServerMessage::Other(_) => {
                Err(SessionError::Unexpected(frame.message_type))
            }
        }
    }

    /// Transport failures and unreadable replies leave the stream unusable,
    /// and the server drops every preparation with it.
    fn check_connection<R>(&mut self, result: &Result<R, SessionError>) {
        if let Err(
            err @ (SessionError::Transport(_)
            | SessionError::Decode(_)
            | SessionError::Unexpected(_)),
        ) = result
        {
            warn!("connection lost ({err}); prepared statements discarded");
            self.registry.reset_session();
            self.closed = true;
        }
    }
}
