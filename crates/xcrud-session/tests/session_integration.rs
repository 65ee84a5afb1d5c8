//! Session behaviour against a scripted in-memory server

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use xcrud::protocol::{
    ER_MAX_PREPARED_STMT_COUNT_REACHED, Encode, ServerError, ServerOk, client_type, server_type,
};
use xcrud::{Decision, Statement};
use xcrud_session::{Frame, Session, SessionError, SessionOptions, Transport};

/// Arbitrary result-set frame type passed through by the session.
const ROW: u8 = 13;

#[derive(Default)]
struct ServerState {
    sent: Vec<u8>,
    pending: VecDeque<Frame>,
    prepare_error: Option<u32>,
    prepare_reply: Option<Frame>,
    execute_error: Option<u32>,
    broken: bool,
}

/// Answers each request the way a server would: `Ok` for prepare and
/// deallocate, one row plus `StmtExecuteOk` for executions.
#[derive(Clone, Default)]
struct MockTransport {
    state: Arc<Mutex<ServerState>>,
}

impl MockTransport {
    fn sent(&self) -> Vec<u8> {
        self.state.lock().unwrap().sent.clone()
    }

    fn fail_prepares_with(&self, code: u32) {
        self.state.lock().unwrap().prepare_error = Some(code);
    }

    fn answer_prepares_with(&self, frame: Frame) {
        self.state.lock().unwrap().prepare_reply = Some(frame);
    }

    fn fail_executes_with(&self, code: u32) {
        self.state.lock().unwrap().execute_error = Some(code);
    }

    fn break_connection(&self) {
        self.state.lock().unwrap().broken = true;
    }
}

fn ok() -> Frame {
    Frame::new(server_type::OK, ServerOk { msg: None }.to_bytes())
}

fn error(code: u32) -> Frame {
    Frame::new(server_type::ERROR, ServerError::new(code, "rejected").to_bytes())
}

impl Transport for MockTransport {
    async fn send(&mut self, message_type: u8, _payload: Bytes) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        }
        state.sent.push(message_type);
        match message_type {
            client_type::PREPARE_PREPARE => {
                let reply = match state.prepare_reply.clone() {
                    Some(frame) => frame,
                    None => state.prepare_error.map_or_else(ok, error),
                };
                state.pending.push_back(reply);
            }
            client_type::PREPARE_DEALLOCATE => state.pending.push_back(ok()),
            _ => match state.execute_error {
                Some(code) => state.pending.push_back(error(code)),
                None => {
                    state.pending.push_back(Frame::new(ROW, Bytes::from_static(b"row")));
                    state
                        .pending
                        .push_back(Frame::new(server_type::SQL_STMT_EXECUTE_OK, Bytes::new()));
                }
            },
        }
        Ok(())
    }

    async fn recv(&mut self) -> io::Result<Frame> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        }
        state
            .pending
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no reply"))
    }
}

fn lookup() -> Statement {
    Statement::find("people")
        .schema("test")
        .criteria("_id = :id")
        .bind("id", "a")
}

#[tokio::test]
async fn execute_prepare_reuse() {
    let server = MockTransport::default();
    let session = Session::new(server.clone());
    let handle = session.register().await;

    let first = session.execute(handle, &lookup()).await.unwrap();
    assert_eq!(first.decision, Decision::Direct);
    assert_eq!(first.frames, vec![Frame::new(ROW, Bytes::from_static(b"row"))]);

    let second = session.execute(handle, &lookup().bind("id", "b")).await.unwrap();
    assert_eq!(second.decision, Decision::Prepare);
    assert_eq!(second.statement_id, Some(1));

    let third = session.execute(handle, &lookup().bind("id", "c")).await.unwrap();
    assert_eq!(third.decision, Decision::Reuse);
    assert_eq!(third.statement_id, Some(1));

    assert_eq!(
        server.sent(),
        vec![
            client_type::CRUD_FIND,
            client_type::PREPARE_PREPARE,
            client_type::PREPARE_EXECUTE,
            client_type::PREPARE_EXECUTE,
        ]
    );
}

#[tokio::test]
async fn capacity_error_falls_back_to_direct_execution() {
    let server = MockTransport::default();
    server.fail_prepares_with(ER_MAX_PREPARED_STMT_COUNT_REACHED);
    let session = Session::new(server.clone());
    let handle = session.register().await;

    session.execute(handle, &lookup()).await.unwrap();
    let outcome = session.execute(handle, &lookup()).await.unwrap();
    assert_eq!(outcome.decision, Decision::Direct);
    assert_eq!(outcome.frames.len(), 1);

    let outcome = session.execute(handle, &lookup()).await.unwrap();
    assert_eq!(outcome.decision, Decision::Direct);
    assert_eq!(session.prepared_count().await, 0);

    assert_eq!(
        server.sent(),
        vec![
            client_type::CRUD_FIND,
            client_type::PREPARE_PREPARE,
            client_type::CRUD_FIND,
            client_type::CRUD_FIND,
        ]
    );
}

#[tokio::test]
async fn other_prepare_errors_pass_through() {
    let server = MockTransport::default();
    server.fail_prepares_with(1064);
    let session = Session::new(server.clone());
    let handle = session.register().await;

    session.execute(handle, &lookup()).await.unwrap();
    let err = session.execute(handle, &lookup()).await.unwrap_err();
    let SessionError::Server(err) = err else {
        panic!("expected a server error, got {err:?}");
    };
    assert_eq!(err.code, 1064);
    assert_eq!(session.prepared_count().await, 0);
}

#[tokio::test]
async fn execution_errors_pass_through_unchanged() {
    let server = MockTransport::default();
    server.fail_executes_with(1146);
    let session = Session::new(server.clone());
    let handle = session.register().await;

    let err = session.execute(handle, &lookup()).await.unwrap_err();
    assert!(matches!(err, SessionError::Server(ref e) if e.code == 1146));
}

#[tokio::test]
async fn shape_change_deallocates_then_runs_directly() {
    let server = MockTransport::default();
    let session = Session::new(server.clone());
    let handle = session.register().await;
    session.execute(handle, &lookup()).await.unwrap();
    session.execute(handle, &lookup()).await.unwrap();

    let outcome = session.execute(handle, &lookup().limit(1)).await.unwrap();
    assert_eq!(outcome.decision, Decision::Deallocate);
    assert_eq!(outcome.statement_id, None);
    assert_eq!(
        &server.sent()[3..],
        &[client_type::PREPARE_DEALLOCATE, client_type::CRUD_FIND]
    );
}

#[tokio::test]
async fn lost_connection_resets_prepared_state() {
    let server = MockTransport::default();
    let session = Session::new(server.clone());
    let handle = session.register().await;
    session.execute(handle, &lookup()).await.unwrap();
    session.execute(handle, &lookup()).await.unwrap();
    assert_eq!(session.prepared_count().await, 1);

    server.break_connection();
    let err = session.execute(handle, &lookup()).await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(session.prepared_count().await, 0);
    assert!(matches!(
        session.execute(handle, &lookup()).await,
        Err(SessionError::Closed)
    ));

    let fresh = MockTransport::default();
    session.reconnect(fresh.clone()).await;
    let outcome = session.execute(handle, &lookup()).await.unwrap();
    assert_eq!(outcome.decision, Decision::Direct);
    assert_eq!(fresh.sent(), vec![client_type::CRUD_FIND]);
}

#[tokio::test]
async fn unexpected_prepare_reply_drops_the_preparation() {
    let server = MockTransport::default();
    server.answer_prepares_with(Frame::new(server_type::SQL_STMT_EXECUTE_OK, Bytes::new()));
    let session = Session::new(server.clone());
    let handle = session.register().await;
    session.execute(handle, &lookup()).await.unwrap();

    let err = session.execute(handle, &lookup()).await.unwrap_err();
    assert!(matches!(err, SessionError::Unexpected(server_type::SQL_STMT_EXECUTE_OK)));
    assert_eq!(session.prepared_count().await, 0);
    assert!(matches!(
        session.execute(handle, &lookup()).await,
        Err(SessionError::Closed)
    ));

    // Nothing is reused against the statement the server never acknowledged.
    let fresh = MockTransport::default();
    session.reconnect(fresh.clone()).await;
    let outcome = session.execute(handle, &lookup()).await.unwrap();
    assert_eq!(outcome.decision, Decision::Direct);
    assert_eq!(fresh.sent(), vec![client_type::CRUD_FIND]);
}

#[tokio::test]
async fn disabled_prepared_statements_always_run_directly() {
    let server = MockTransport::default();
    let options = SessionOptions::default().with_prepared_statements(false);
    let session = Session::with_options(server.clone(), options);
    let handle = session.register().await;
    for _ in 0..3 {
        let outcome = session.execute(handle, &lookup()).await.unwrap();
        assert_eq!(outcome.decision, Decision::Direct);
    }
    assert_eq!(server.sent(), vec![client_type::CRUD_FIND; 3]);
}

#[tokio::test]
async fn closing_a_prepared_statement_deallocates_it() {
    let server = MockTransport::default();
    let session = Session::new(server.clone());
    let handle = session.register().await;
    session.execute(handle, &lookup()).await.unwrap();
    session.execute(handle, &lookup()).await.unwrap();

    session.close_statement(handle).await.unwrap();
    assert_eq!(session.prepared_count().await, 0);
    assert_eq!(server.sent().last(), Some(&client_type::PREPARE_DEALLOCATE));

    // Closing again is a no-op.
    session.close_statement(handle).await.unwrap();
    assert_eq!(server.sent().len(), 4);
}

#[tokio::test]
async fn compile_errors_touch_nothing() {
    let server = MockTransport::default();
    let session = Session::new(server.clone());
    let handle = session.register().await;
    let err = session
        .execute(handle, &Statement::find("people").criteria("a ="))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Compile(_)));
    assert!(server.sent().is_empty());
}
