//! The per-connection session worker.
//!
//! The underlying engine session must only ever be touched from one thread.
//! Rather than taking a lock around engine calls, every operation is funneled
//! through one dedicated thread that owns the session, so temporal
//! exclusivity is structural. Callers submit a closure and block until it
//! completes; the channel is FIFO, so submission order is execution order and
//! shutdown drains all pending work before the session drops.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use ersatzlite_error::{ErsatzError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle};
use tracing::{debug, trace};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

enum Request {
    Run(Job),
    Shutdown,
}

/// One dedicated worker thread owning one engine session.
pub struct SessionWorker {
    requests: Sender<Request>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SessionWorker {
    /// Spawn the worker and open the session on it.
    ///
    /// `open` runs on the new thread; the session never exists on the
    /// calling thread. An interrupt handle is captured at open so `cancel`
    /// can reach an in-flight operation without queueing behind it.
    pub fn spawn<F>(label: &str, open: F) -> Result<(Self, InterruptHandle)>
    where
        F: FnOnce() -> Result<Connection> + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_name = format!("ersatzlite-session-{label}");
        let join = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut session = match open() {
                    Ok(session) => {
                        let _ = ready_tx.send(Ok(session.get_interrupt_handle()));
                        session
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                while let Ok(request) = request_rx.recv() {
                    match request {
                        Request::Run(job) => job(&mut session),
                        Request::Shutdown => break,
                    }
                }
                trace!("session worker drained, dropping session");
            })
            .map_err(|err| ErsatzError::internal(format!("failed to spawn session worker: {err}")))?;

        match ready_rx.recv() {
            Ok(Ok(interrupt)) => {
                debug!(label, "session worker started");
                Ok((
                    Self {
                        requests: request_tx,
                        join: Mutex::new(Some(join)),
                    },
                    interrupt,
                ))
            }
            Ok(Err(err)) => {
                let _ = join.join();
                Err(err)
            }
            Err(_) => {
                let _ = join.join();
                Err(ErsatzError::internal(
                    "session worker exited before opening its session",
                ))
            }
        }
    }

    /// Run one unit of work on the session, blocking until it completes.
    pub fn submit<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let (response_tx, response_rx) = mpsc::channel();
        let job: Job = Box::new(move |session| {
            let _ = response_tx.send(op(session));
        });
        self.requests
            .send(Request::Run(job))
            .map_err(|_| ErsatzError::internal("session worker is gone"))?;
        response_rx
            .recv()
            .map_err(|_| ErsatzError::internal("session worker dropped an in-flight operation"))?
    }

    /// Drain all pending work, drop the session, and join the thread.
    ///
    /// The shutdown request queues behind every previously submitted job, so
    /// nothing in flight observes a disposed session.
    pub fn shutdown(&self) -> Result<()> {
        let _ = self.requests.send(Request::Shutdown);
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| ErsatzError::internal("session worker panicked during shutdown"))?;
        }
        Ok(())
    }
}
