//! Running the orchestrator off the calling thread.
//!
//! [`WorkerApi`] is the foreground handle. It starts a background worker
//! thread that owns the [`Api`] and handles one [`Request`] at a time, and a
//! port thread that relays the worker's [`Message`]s: host-output text goes
//! to the foreground sink, and responses resolve pending calls by their
//! correlation id.
//!
//! Correlated calls always get a response, with no payload when the stage
//! failed; the failure itself reaches the user as host-output text.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};

use crate::api::Api;
use crate::canvas::DrawingSurface;
use crate::config::{ApiOptions, AssemblyOptions, Vasm6502Options};
use crate::loader::ResourceLoader;
use crate::output::HostOutput;
use crate::process::Process;

type RequestId = u64;

/// A call from the foreground to the worker.
pub enum Request {
    SetShowTiming(bool),
    SetStdin(String),
    CompileToAssembly {
        id: RequestId,
        options: AssemblyOptions,
    },
    CompileTo6502 {
        id: RequestId,
        options: Vasm6502Options,
    },
    /// Fire-and-forget; results are observed through host output and the
    /// drawing surface.
    CompileLinkRun(String),
    PostCanvas(Box<dyn DrawingSurface>),
    Terminate,
}

/// A message from the worker to the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Write(String),
    Response {
        id: RequestId,
        data: Option<Vec<u8>>,
    },
    /// Sent once, after the orchestrator is constructed (or failed to be).
    Ready(Result<(), String>),
}

/// Errors that can occur when talking to the worker.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("worker is no longer running")]
    Disconnected,

    #[error("request {id} timed out")]
    Timeout { id: RequestId },

    #[error("worker failed to start: {0}")]
    Startup(String),
}

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Option<Vec<u8>>>>>>;
type ReadyState = Option<Result<(), String>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Option<Vec<u8>>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes its pending entry when the waiting call finishes or is dropped.
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: RequestId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// Host output that forwards text to the foreground.
struct PortOutput(mpsc::Sender<Message>);

impl HostOutput for PortOutput {
    fn write(&self, text: &str) {
        // The foreground may already be gone during shutdown.
        let _ = self.0.send(Message::Write(text.to_string()));
    }
}

/// Foreground handle to a background orchestrator.
pub struct WorkerApi {
    requests: mpsc::Sender<Request>,
    next_id: AtomicU64,
    pending: Pending,
    ready: watch::Receiver<ReadyState>,
    timeout: Option<Duration>,
    worker: Option<JoinHandle<()>>,
    port: Option<JoinHandle<()>>,
}

impl WorkerApi {
    /// Start the worker and port threads.
    pub fn spawn(
        options: ApiOptions,
        loader: Box<dyn ResourceLoader>,
        output: Arc<dyn HostOutput>,
    ) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel();
        let (message_tx, message_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = watch::channel(None);
        let pending = Pending::default();
        let timeout = options.request_timeout();

        let worker = thread::Builder::new()
            .name("wasmbox-worker".to_string())
            .spawn(move || serve(options, loader, request_rx, message_tx))?;
        let port = {
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name("wasmbox-port".to_string())
                .spawn(move || relay(message_rx, output, pending, ready_tx))?
        };

        Ok(Self {
            requests: request_tx,
            next_id: AtomicU64::new(0),
            pending,
            ready: ready_rx,
            timeout,
            worker: Some(worker),
            port: Some(port),
        })
    }

    /// Wait until the orchestrator has seeded its filesystem.
    pub async fn ready(&self) -> Result<(), RouterError> {
        let mut ready = self.ready.clone();
        let state = ready
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RouterError::Disconnected)?;
        match &*state {
            Some(Err(message)) => Err(RouterError::Startup(message.clone())),
            _ => Ok(()),
        }
    }

    pub async fn compile_to_assembly(
        &self,
        options: AssemblyOptions,
    ) -> Result<Option<Vec<u8>>, RouterError> {
        self.call(|id| Request::CompileToAssembly { id, options }).await
    }

    pub async fn compile_to_6502(
        &self,
        options: Vasm6502Options,
    ) -> Result<Option<Vec<u8>>, RouterError> {
        self.call(|id| Request::CompileTo6502 { id, options }).await
    }

    /// Compile, link and run `contents`. Does not wait for the result.
    pub fn compile_link_run(&self, contents: impl Into<String>) -> Result<(), RouterError> {
        self.send(Request::CompileLinkRun(contents.into()))
    }

    pub fn post_canvas(&self, surface: Box<dyn DrawingSurface>) -> Result<(), RouterError> {
        self.send(Request::PostCanvas(surface))
    }

    pub fn set_show_timing(&self, show_timing: bool) -> Result<(), RouterError> {
        self.send(Request::SetShowTiming(show_timing))
    }

    pub fn set_stdin(&self, text: impl Into<String>) -> Result<(), RouterError> {
        self.send(Request::SetStdin(text.into()))
    }

    /// Ask the worker to stop after the request it is handling.
    pub fn terminate(&self) -> Result<(), RouterError> {
        self.send(Request::Terminate)
    }

    /// Number of calls still waiting for a response.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    fn send(&self, request: Request) -> Result<(), RouterError> {
        self.requests
            .send(request)
            .map_err(|_| RouterError::Disconnected)
    }

    async fn call(
        &self,
        request: impl FnOnce(RequestId) -> Request,
    ) -> Result<Option<Vec<u8>>, RouterError> {
        self.ready().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };
        self.send(request(id))?;

        let response = match self.timeout {
            Some(budget) => tokio::time::timeout(budget, rx)
                .await
                .map_err(|_| RouterError::Timeout { id })?,
            None => rx.await,
        };
        response.map_err(|_| RouterError::Disconnected)
    }
}

impl Drop for WorkerApi {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Terminate);
        for handle in [self.worker.take(), self.port.take()].into_iter().flatten() {
            if handle.join().is_err() {
                tracing::warn!("router thread panicked");
            }
        }
    }
}

/// Port thread: deliver worker messages until the worker hangs up.
fn relay(
    messages: mpsc::Receiver<Message>,
    output: Arc<dyn HostOutput>,
    pending: Pending,
    ready: watch::Sender<ReadyState>,
) {
    for message in messages {
        match message {
            Message::Write(text) => output.write(&text),
            Message::Response { id, data } => match lock(&pending).remove(&id) {
                // The caller may have timed out in the meantime.
                Some(tx) => drop(tx.send(data)),
                None => tracing::debug!(id, "dropping response with no pending request"),
            },
            Message::Ready(result) => {
                ready.send_replace(Some(result));
            }
        }
    }

    // Waiters see their sender dropped and report Disconnected.
    lock(&pending).clear();
    ready.send_if_modified(|state| match state {
        Some(_) => false,
        None => {
            *state = Some(Err("worker exited before it was ready".to_string()));
            true
        }
    });
}

/// Worker thread: construct the orchestrator and serve requests in order.
fn serve(
    options: ApiOptions,
    loader: Box<dyn ResourceLoader>,
    requests: mpsc::Receiver<Request>,
    messages: mpsc::Sender<Message>,
) {
    let frame_interval = options.frame_interval();
    let output = Arc::new(PortOutput(messages.clone()));
    let mut api = match Api::new(options, loader, output) {
        Ok(api) => api,
        Err(err) => {
            tracing::warn!(error = %err, "orchestrator failed to start");
            let _ = messages.send(Message::Ready(Err(err.to_string())));
            refuse(requests, &messages);
            return;
        }
    };
    let _ = messages.send(Message::Ready(Ok(())));

    let started = Instant::now();
    let mut next_frame = started;
    let mut current: Option<Process> = None;
    loop {
        let request = if api.has_pending_frames() {
            let wait = next_frame.saturating_duration_since(Instant::now());
            match requests.recv_timeout(wait) {
                Ok(request) => Some(request),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match requests.recv() {
                Ok(request) => Some(request),
                Err(_) => break,
            }
        };

        if let Some(request) = request {
            if handle(&mut api, &mut current, &messages, request).is_break() {
                break;
            }
        }

        // Frames are due on schedule even while requests keep arriving.
        let now = Instant::now();
        if api.has_pending_frames() && now >= next_frame {
            api.animation_frame((now - started).as_secs_f64() * 1000.0);
            next_frame = now + frame_interval;
        }
    }
    tracing::debug!("worker stopped");
}

fn handle(
    api: &mut Api,
    current: &mut Option<Process>,
    messages: &mpsc::Sender<Message>,
    request: Request,
) -> ControlFlow<()> {
    match request {
        Request::SetShowTiming(show_timing) => api.set_show_timing(show_timing),
        Request::SetStdin(text) => api.set_stdin(&text),
        Request::CompileToAssembly { id, options } => {
            let data = api.compile_to_assembly(&options);
            respond(messages, id, data.ok());
        }
        Request::CompileTo6502 { id, options } => {
            let data = api.compile_to_6502(&options);
            respond(messages, id, data.ok());
        }
        Request::CompileLinkRun(contents) => {
            if let Some(previous) = current.take() {
                tracing::debug!(process = %previous.id(), "disallowing animation frames from previous process");
                api.release(&previous);
            }
            *current = match api.compile_link_run(&contents) {
                Ok(process) => process,
                Err(err) => {
                    tracing::debug!(error = %err, "compile_link_run failed");
                    None
                }
            };
        }
        Request::PostCanvas(surface) => api.post_canvas(surface),
        Request::Terminate => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

fn respond(messages: &mpsc::Sender<Message>, id: RequestId, data: Option<Vec<u8>>) {
    let _ = messages.send(Message::Response { id, data });
}

/// Answer correlated requests with no payload until told to stop.
fn refuse(requests: mpsc::Receiver<Request>, messages: &mpsc::Sender<Message>) {
    for request in requests {
        match request {
            Request::CompileToAssembly { id, .. } | Request::CompileTo6502 { id, .. } => {
                respond(messages, id, None)
            }
            Request::Terminate => break,
            _ => {}
        }
    }
}
