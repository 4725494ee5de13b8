//! Backend running the engine on a dedicated worker thread
//!
//! Requests and replies travel over a pair of rendezvous-sized crossbeam
//! channels. Each call sends one request and blocks for its reply, so at
//! most one request is in flight and replies arrive in request order.

use super::{AnalysisBackend, InProcessBackend, Request, Response};
use crate::error::{AnalysisError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Name of the analysis worker thread
pub const WORKER_THREAD_NAME: &str = "fluxbeat-analysis";

/// Backend that forwards every request to a worker thread
#[derive(Debug)]
pub struct WorkerBackend {
    requests: Option<Sender<Request>>,
    replies: Receiver<Result<Response>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerBackend {
    /// Spawn the worker thread
    ///
    /// Fails with [`AnalysisError::Offload`] if the thread cannot be created.
    pub fn spawn() -> Result<Self> {
        let (request_tx, request_rx) = bounded::<Request>(1);
        let (reply_tx, reply_rx) = bounded::<Result<Response>>(1);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(request_rx, reply_tx))
            .map_err(|e| AnalysisError::Offload(format!("failed to spawn worker: {}", e)))?;

        debug!("Analysis worker spawned");
        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            thread: Some(thread),
        })
    }

    /// True while the worker can accept requests
    pub fn is_running(&self) -> bool {
        self.requests.is_some() && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Later requests fail with [`AnalysisError::Offload`].
    pub fn shutdown(&mut self) {
        // Dropping the sender ends the worker loop
        self.requests = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Analysis worker panicked before shutdown");
            }
        }
    }
}

fn run_worker(requests: Receiver<Request>, replies: Sender<Result<Response>>) {
    info!("Analysis worker started");
    let mut backend = InProcessBackend::new();
    for request in requests.iter() {
        let reply = backend.handle(request);
        if replies.send(reply).is_err() {
            break;
        }
    }
    info!("Analysis worker stopped");
}

impl AnalysisBackend for WorkerBackend {
    fn name(&self) -> &'static str {
        "worker"
    }

    fn handle(&mut self, request: Request) -> Result<Response> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| AnalysisError::Offload("worker has been shut down".to_string()))?;
        sender
            .send(request)
            .map_err(|_| AnalysisError::Offload("worker is not running".to_string()))?;
        self.replies
            .recv()
            .map_err(|_| AnalysisError::Offload("worker exited before replying".to_string()))?
    }
}

impl Drop for WorkerBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
