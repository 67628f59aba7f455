//! Peripheral actuation: command encoding, the serial channel and dispatch.
//!
//! The peripheral (a GSM modem bridge) accepts one text line per command:
//! `SOS:<phone>` asks it to send an SMS and then place a call, `CALL:<phone>`
//! places a plain call. The channel is a single shared resource, so at most
//! one command is in flight; a concurrent attempt is rejected rather than
//! queued.

use crate::core::escalation::{EscalationDecision, EscalationKind, Priority};
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Actuation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuationError {
    /// The peripheral channel is not open
    Unavailable,
    /// Another command is still in flight
    Busy,
    /// No phone number to dial
    NoPhoneNumber,
    /// Writing to the channel failed
    Io(String),
    /// The write was not acknowledged in time
    Timeout,
}

impl std::fmt::Display for ActuationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActuationError::Unavailable => write!(f, "Peripheral unavailable"),
            ActuationError::Busy => write!(f, "Peripheral busy with another command"),
            ActuationError::NoPhoneNumber => write!(f, "No phone number available"),
            ActuationError::Io(e) => write!(f, "Peripheral IO error: {e}"),
            ActuationError::Timeout => write!(f, "Peripheral command timed out"),
        }
    }
}

impl std::error::Error for ActuationError {}

/// One outbound peripheral command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuationCommand {
    /// SMS plus call
    Sos { phone: String },
    /// Plain call
    Call { phone: String },
}

impl ActuationCommand {
    /// Build the command for a decision, or `None` when it has no number.
    pub fn from_decision(decision: &EscalationDecision) -> Option<Self> {
        let phone = decision.phone.clone()?;
        Some(match decision.kind {
            EscalationKind::Emergency => ActuationCommand::Sos { phone },
            EscalationKind::Call => ActuationCommand::Call { phone },
        })
    }

    pub fn phone(&self) -> &str {
        match self {
            ActuationCommand::Sos { phone } | ActuationCommand::Call { phone } => phone,
        }
    }

    /// Wire encoding, newline terminated.
    pub fn to_line(&self) -> String {
        match self {
            ActuationCommand::Sos { phone } => format!("SOS:{phone}\n"),
            ActuationCommand::Call { phone } => format!("CALL:{phone}\n"),
        }
    }
}

/// A line-oriented command channel to the peripheral.
pub trait Peripheral: Send + Sync {
    /// Whether the channel can currently accept commands.
    fn is_connected(&self) -> bool;

    /// Write one command line and wait for it to be flushed.
    fn send_line(&self, line: String) -> impl Future<Output = Result<(), ActuationError>> + Send;

    /// Release the channel. Later sends fail with `Unavailable`.
    fn close(&mut self) {}
}

struct WriteJob {
    line: String,
    ack: oneshot::Sender<std::io::Result<()>>,
}

/// Character-device peripheral (e.g. `/dev/ttyACM0`) driven by a dedicated
/// writer thread.
pub struct SerialPeripheral {
    path: PathBuf,
    jobs: Option<Sender<WriteJob>>,
    in_flight: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
}

impl SerialPeripheral {
    /// Open the device for writing and start the writer thread.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ActuationError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| ActuationError::Io(format!("{}: {e}", path.display())))?;

        let (tx, rx) = bounded::<WriteJob>(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(true));

        let writer_in_flight = Arc::clone(&in_flight);
        let writer_connected = Arc::clone(&connected);
        let writer = std::thread::Builder::new()
            .name("peripheral-writer".to_string())
            .spawn(move || {
                let mut file = file;
                for job in rx {
                    let result = file
                        .write_all(job.line.as_bytes())
                        .and_then(|_| file.flush());
                    if let Err(ref e) = result {
                        tracing::error!(error = %e, "peripheral write failed");
                        writer_connected.store(false, Ordering::SeqCst);
                    }
                    writer_in_flight.store(false, Ordering::SeqCst);
                    let _ = job.ack.send(result);
                }
            })
            .map_err(|e| ActuationError::Io(format!("Failed to spawn writer: {e}")))?;

        tracing::info!(path = %path.display(), "peripheral channel open");

        Ok(Self {
            path,
            jobs: Some(tx),
            in_flight,
            connected,
            writer: Some(writer),
        })
    }

    fn submit(&self, line: String) -> Result<oneshot::Receiver<std::io::Result<()>>, ActuationError> {
        let jobs = match self.jobs {
            Some(ref jobs) if self.connected.load(Ordering::SeqCst) => jobs,
            _ => return Err(ActuationError::Unavailable),
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ActuationError::Busy);
        }

        let (ack, ack_rx) = oneshot::channel();
        match jobs.try_send(WriteJob { line, ack }) {
            Ok(()) => Ok(ack_rx),
            Err(TrySendError::Full(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                Err(ActuationError::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                Err(ActuationError::Unavailable)
            }
        }
    }
}

impl Drop for SerialPeripheral {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.close();
        }
    }
}

impl Peripheral for SerialPeripheral {
    fn is_connected(&self) -> bool {
        self.jobs.is_some() && self.connected.load(Ordering::SeqCst)
    }

    /// Close the channel. An idle writer is joined; one still blocked in a
    /// write is detached and exits once that write returns.
    fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.jobs.take();
        if let Some(writer) = self.writer.take() {
            if self.in_flight.load(Ordering::SeqCst) {
                tracing::warn!(path = %self.path.display(), "peripheral write still pending, detaching writer");
                drop(writer);
            } else if writer.join().is_err() {
                tracing::error!("peripheral writer thread panicked");
            }
        }
        tracing::info!(path = %self.path.display(), "peripheral channel closed");
    }

    fn send_line(&self, line: String) -> impl Future<Output = Result<(), ActuationError>> + Send {
        let submitted = self.submit(line);
        async move {
            match submitted?.await {
                Ok(result) => result.map_err(|e| ActuationError::Io(e.to_string())),
                Err(_) => Err(ActuationError::Unavailable),
            }
        }
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent(ActuationCommand),
    Failed(ActuationError),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent(_))
    }
}

/// Turns escalation decisions into peripheral commands.
pub struct ActuationDispatcher<P> {
    peripheral: Option<P>,
    timeout: Duration,
}

impl<P: Peripheral> ActuationDispatcher<P> {
    /// `peripheral` is `None` when the channel could not be opened; every
    /// dispatch then fails without side effects.
    pub fn new(peripheral: Option<P>, timeout: Duration) -> Self {
        Self {
            peripheral,
            timeout,
        }
    }

    pub fn peripheral(&self) -> Option<&P> {
        self.peripheral.as_ref()
    }

    pub fn take_peripheral(&mut self) -> Option<P> {
        self.peripheral.take()
    }

    /// Send the command for `decision`. Never fails loudly: every problem is
    /// logged and reported as [`DispatchOutcome::Failed`].
    pub async fn dispatch(&self, device_id: &str, decision: &EscalationDecision) -> DispatchOutcome {
        let Some(command) = ActuationCommand::from_decision(decision) else {
            tracing::warn!(device = %device_id, kind = %decision.kind, "no phone number, nothing dispatched");
            return DispatchOutcome::Failed(ActuationError::NoPhoneNumber);
        };

        let peripheral = match self.peripheral {
            Some(ref p) if p.is_connected() => p,
            _ => {
                tracing::warn!(device = %device_id, kind = %decision.kind, "peripheral unavailable");
                return DispatchOutcome::Failed(ActuationError::Unavailable);
            }
        };

        let result = match tokio::time::timeout(self.timeout, peripheral.send_line(command.to_line())).await {
            Ok(result) => result,
            Err(_) => Err(ActuationError::Timeout),
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    device = %device_id,
                    kind = %decision.kind,
                    priority = ?decision.priority,
                    phone = %command.phone(),
                    "actuation command sent"
                );
                DispatchOutcome::Sent(command)
            }
            Err(e) => {
                match decision.priority {
                    Priority::High => {
                        tracing::error!(device = %device_id, kind = %decision.kind, error = %e, "actuation failed")
                    }
                    Priority::Normal => {
                        tracing::warn!(device = %device_id, kind = %decision.kind, error = %e, "actuation failed")
                    }
                }
                DispatchOutcome::Failed(e)
            }
        }
    }
}
