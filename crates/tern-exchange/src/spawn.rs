//! Run an exchange on its own thread so another thread can abandon it.
//!
//! The worker receives the [`CancelToken`] and is expected to open its
//! sessions through `UdpTransport::with_cancel`. Cancelling closes the
//! session out-of-band; the pending receive then fails and the exchange
//! ends with a Receive error rather than being torn down mid-call.

use std::io;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use thiserror::Error;

use crate::transport::CancelToken;

/// The worker thread panicked before producing a result.
#[derive(Debug, Error)]
#[error("exchange worker panicked")]
pub struct WorkerPanicked;

pub struct ExchangeHandle<R> {
    cancel: CancelToken,
    result_rx: Receiver<R>,
    thread: Option<JoinHandle<()>>,
}

/// Spawn `f` on a named thread, handing it a clone of `cancel`.
pub fn spawn_exchange<R, F>(cancel: CancelToken, f: F) -> io::Result<ExchangeHandle<R>>
where
    R: Send + 'static,
    F: FnOnce(CancelToken) -> R + Send + 'static,
{
    let (result_tx, result_rx) = bounded(1);
    let worker_token = cancel.clone();

    let thread = std::thread::Builder::new()
        .name("tern-exchange".into())
        .spawn(move || {
            let result = f(worker_token);
            // Receiver gone means the handle was dropped; nobody wants it
            let _ = result_tx.send(result);
        })?;

    Ok(ExchangeHandle {
        cancel,
        result_rx,
        thread: Some(thread),
    })
}

impl<R> ExchangeHandle<R> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the worker to finish.
    pub fn join(mut self) -> Result<R, WorkerPanicked> {
        let result = self.result_rx.recv().map_err(|_| WorkerPanicked);
        self.reap();
        result
    }

    /// Wait up to `deadline` for the worker, then cancel it and wait for it
    /// to observe the cancellation.
    pub fn join_deadline(mut self, deadline: Duration) -> Result<R, WorkerPanicked> {
        let result = match self.result_rx.recv_timeout(deadline) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!(?deadline, "exchange deadline passed, cancelling");
                self.cancel.cancel();
                self.result_rx.recv().map_err(|_| WorkerPanicked)
            }
            Err(RecvTimeoutError::Disconnected) => Err(WorkerPanicked),
        };
        self.reap();
        result
    }

    fn reap(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
