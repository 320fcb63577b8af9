//! Statement execution on a dedicated worker thread
//!
//! The worker owns the query's connection and pushes rows into a bounded
//! channel as SQLite steps the statement, so a large or endless result never
//! has to fit in memory. The header is handed back once the statement has
//! produced its first row (or finished), which keeps a slow first step inside
//! the caller's cancellation window.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use sluice_query::{DataError, Header, Result, Row, Sequence, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Header reported by statements that return no columns
pub const ROWS_AFFECTED: &str = "Rows Affected";

/// Virtual machine instructions between cancellation checks
const PROGRESS_INTERVAL: i32 = 1000;

/// Rows the worker may run ahead of the consumer
const ROW_BUFFER: usize = 256;

type SharedRows = Arc<Mutex<Option<Receiver<Result<Row>>>>>;

/// Counts a query as active until dropped
pub(crate) struct ActiveQuery(Arc<AtomicUsize>);

impl ActiveQuery {
    pub fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveQuery {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle on a running statement
///
/// Dropping it interrupts the statement without waiting for the thread.
pub(crate) struct Worker {
    cancelled: Arc<AtomicBool>,
    interrupt: InterruptHandle,
    rows: SharedRows,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start `sql` on `conn`
    ///
    /// Returns the worker, the cursor its rows arrive on, and a receiver that
    /// resolves to the header (or the statement's error) once the first row
    /// is ready.
    pub fn spawn(
        conn: Connection,
        sql: String,
        active: ActiveQuery,
    ) -> Result<(Self, RowCursor, oneshot::Receiver<Result<Header>>)> {
        let cancelled = Arc::new(AtomicBool::new(false));
        watch_cancellation(&conn, cancelled.clone());
        let interrupt = conn.get_interrupt_handle();

        let (tx, rx) = sync_channel(ROW_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let rows: SharedRows = Arc::new(Mutex::new(Some(rx)));

        let flag = cancelled.clone();
        let handle = thread::Builder::new()
            .name("sluice-sqlite-query".to_string())
            .spawn(move || {
                stream_statement(&conn, &sql, ready_tx, &tx, &flag);
                if let Err((_, e)) = conn.close() {
                    warn!("Failed to close SQLite connection: {}", e);
                }
                drop(active);
                drop(tx);
            })
            .map_err(|e| {
                error!("Failed to spawn SQLite query worker: {}", e);
                DataError::Internal(format!("failed to spawn query worker: {}", e))
            })?;

        let cursor = RowCursor {
            rows: rows.clone(),
            peeked: None,
        };
        let worker = Self {
            cancelled,
            interrupt,
            rows,
            handle: Some(handle),
        };
        Ok((worker, cursor, ready_rx))
    }

    /// Interrupt the statement and wait for the thread to release the connection
    pub fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("SQLite query worker panicked");
            }
        }
    }

    fn signal(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.interrupt.interrupt();
        // unblocks a worker waiting on a full buffer
        drop(self.rows.lock().unwrap_or_else(PoisonError::into_inner).take());
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal();
    }
}

/// Consumer end of a worker's row channel
///
/// `has_next` blocks until the worker sends a row or finishes, then keeps
/// that row for the following `next`.
pub(crate) struct RowCursor {
    rows: SharedRows,
    peeked: Option<Result<Row>>,
}

impl RowCursor {
    fn fill(&mut self) {
        if self.peeked.is_some() {
            return;
        }
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        self.peeked = rows.as_ref().and_then(|rx| rx.recv().ok());
    }
}

impl Sequence<Row> for RowCursor {
    fn next(&mut self) -> Result<Row> {
        self.fill();
        self.peeked.take().unwrap_or(Err(DataError::Exhausted))
    }

    fn has_next(&mut self) -> bool {
        self.fill();
        self.peeked.is_some()
    }
}

/// Abort any statement running on `conn` once `cancelled` is set
fn watch_cancellation(conn: &Connection, cancelled: Arc<AtomicBool>) {
    conn.progress_handler(
        PROGRESS_INTERVAL,
        Some(move || cancelled.load(Ordering::SeqCst)),
    );
}

fn stream_statement(
    conn: &Connection,
    sql: &str,
    ready: oneshot::Sender<Result<Header>>,
    tx: &SyncSender<Result<Row>>,
    cancelled: &AtomicBool,
) {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = ready.send(Err(query_error(e)));
            return;
        }
    };
    let header: Header = stmt.column_names().into_iter().map(String::from).collect();

    if header.is_empty() {
        match stmt.execute([]) {
            Ok(affected) => {
                let _ = tx.send(Ok(vec![Value::Int(affected as i64)]));
                let _ = ready.send(Ok(vec![ROWS_AFFECTED.to_string()]));
            }
            Err(e) => {
                let _ = ready.send(Err(query_error(e)));
            }
        }
        return;
    }

    let width = header.len();
    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = ready.send(Err(query_error(e)));
            return;
        }
    };

    let first = match next_row(&mut rows, width) {
        Ok(Some(first)) => first,
        Ok(None) => {
            let _ = ready.send(Ok(header));
            return;
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if tx.send(Ok(first)).is_err() || ready.send(Ok(header)).is_err() {
        return;
    }

    let mut sent = 1usize;
    while !cancelled.load(Ordering::SeqCst) {
        match next_row(&mut rows, width) {
            Ok(Some(row)) => {
                if tx.send(Ok(row)).is_err() {
                    break;
                }
                sent += 1;
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
    debug!("SQLite worker sent {} rows", sent);
}

fn next_row(rows: &mut rusqlite::Rows<'_>, width: usize) -> Result<Option<Row>> {
    let Some(row) = rows.next().map_err(query_error)? else {
        return Ok(None);
    };
    let mut values = Vec::with_capacity(width);
    for i in 0..width {
        values.push(to_value(row.get_ref(i).map_err(query_error)?));
    }
    Ok(Some(values))
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::Bytes(blob.to_vec()),
    }
}

pub(crate) fn query_error(e: rusqlite::Error) -> DataError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            debug!("SQLite statement interrupted");
            DataError::Cancelled("query interrupted".to_string())
        }
        rusqlite::Error::SqliteFailure(_, Some(msg)) => {
            error!("SQLite statement failed: {}", msg);
            DataError::QueryFailed(msg)
        }
        other => {
            error!("SQLite statement failed: {}", other);
            DataError::QueryFailed(other.to_string())
        }
    }
}
