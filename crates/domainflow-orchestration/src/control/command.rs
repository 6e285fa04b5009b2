//! Control command types for the per-(campaign, phase) bus.

use tokio::sync::oneshot;

use domainflow_shared::OrchestrationResult;

/// Operator signal delivered to a phase worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    Resume,
    Stop,
}

impl ControlSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-use acknowledgement sink paired with a control command
pub type ControlAckSender = oneshot::Sender<OrchestrationResult<()>>;
pub type ControlAckReceiver = oneshot::Receiver<OrchestrationResult<()>>;

/// A signal plus its optional ack sink. The worker writes to the sink when
/// the command has been applied, before consuming the next command.
#[derive(Debug)]
pub struct ControlCommand {
    pub signal: ControlSignal,
    pub ack: Option<ControlAckSender>,
}

impl ControlCommand {
    /// Command whose caller waits on the returned receiver for the ack
    pub fn acknowledged(signal: ControlSignal) -> (Self, ControlAckReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                signal,
                ack: Some(tx),
            },
            rx,
        )
    }

    /// Command nobody waits on
    pub fn fire_and_forget(signal: ControlSignal) -> Self {
        Self { signal, ack: None }
    }

    /// Consume the ack sink, reporting the application result exactly once.
    /// A dropped receiver (caller abandoned the wait) is not an error: the
    /// command was still consumed.
    pub fn acknowledge(&mut self, result: OrchestrationResult<()>) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(result);
        }
    }
}
