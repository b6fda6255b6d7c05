use crate::types::{CommunicationEvent, WorkerState};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// An update pushed to external trackers while a run progresses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryUpdate {
    /// A worker changed status.
    WorkerState { task_id: String, state: WorkerState },
    /// An event was appended to the communication log.
    Event {
        task_id: String,
        event: CommunicationEvent,
    },
    /// The run reached a terminal state.
    RunFinished { task_id: String, success: bool },
}

impl TelemetryUpdate {
    pub fn task_id(&self) -> &str {
        match self {
            TelemetryUpdate::WorkerState { task_id, .. }
            | TelemetryUpdate::Event { task_id, .. }
            | TelemetryUpdate::RunFinished { task_id, .. } => task_id,
        }
    }
}

/// Receiver of telemetry updates. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, update: &TelemetryUpdate);

    /// Stop accepting updates. Sinks that write in the background return the
    /// writer task, which finishes once everything published so far is out.
    fn close(&self) -> Option<JoinHandle<()>> {
        None
    }
}

/// Fan-out over every registered sink. Empty by default.
#[derive(Clone, Default)]
pub struct TelemetryHub {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl TelemetryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn emit(&self, update: TelemetryUpdate) {
        for sink in &self.sinks {
            sink.publish(&update);
        }
    }

    /// Close every sink and wait for background writers to drain.
    ///
    /// Updates emitted afterwards are dropped by closed sinks.
    pub async fn shutdown(&self) {
        for sink in &self.sinks {
            if let Some(writer) = sink.close() {
                if let Err(e) = writer.await {
                    warn!(error = %e, "Telemetry writer did not finish cleanly");
                }
            }
        }
    }
}

impl std::fmt::Debug for TelemetryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHub")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Append-only JSONL telemetry log, one update per line.
///
/// Writes happen on a background task fed by an unbounded channel, so
/// publishing never blocks the engine. Call [`shutdown`](Self::shutdown)
/// (or [`TelemetryHub::shutdown`]) before exiting to flush pending lines.
pub struct JsonlTelemetry {
    tx: Mutex<Option<mpsc::UnboundedSender<TelemetryUpdate>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlTelemetry {
    /// Start the writer on the current tokio runtime.
    ///
    /// Outside a runtime the sink is created disabled and drops every update.
    pub fn new(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<TelemetryUpdate>();

        let writer = match Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(write_lines(path, rx))),
            Err(_) => {
                warn!(path = %path.display(), "No tokio runtime; telemetry log disabled");
                None
            }
        };
        let tx = writer.as_ref().map(|_| tx);

        Self {
            tx: Mutex::new(tx),
            writer: Mutex::new(writer),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Close the channel and wait until every queued line is written.
    pub async fn shutdown(&self) {
        if let Some(writer) = self.close() {
            if let Err(e) = writer.await {
                warn!(error = %e, "Telemetry writer did not finish cleanly");
            }
        }
    }
}

impl TelemetrySink for JsonlTelemetry {
    fn publish(&self, update: &TelemetryUpdate) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(update.clone());
        }
    }

    fn close(&self) -> Option<JoinHandle<()>> {
        // Dropping the sender ends the writer loop after the backlog.
        self.tx.lock().take();
        self.writer.lock().take()
    }
}

async fn write_lines(path: PathBuf, mut rx: mpsc::UnboundedReceiver<TelemetryUpdate>) {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Telemetry log unavailable");
            return;
        }
    };

    while let Some(update) = rx.recv().await {
        let Ok(line) = serde_json::to_string(&update) else {
            continue;
        };
        let line = format!("{line}\n");
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to append telemetry line");
            continue;
        }
    }
    if let Err(e) = file.flush().await {
        warn!(error = %e, "Failed to flush telemetry log");
    }
    debug!(path = %path.display(), "Telemetry writer stopped");
}
