//! Run a conversation on its own task and consume it as an ordered event stream.
//!
//! The worker pushes every event onto an unbounded channel and finishes with a
//! `Done` sentinel. Consumers always observe a terminal event: if the worker
//! dies or fails without relaying an `error`, one is synthesized.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::errors::BridgeError;
use crate::events::{AgentEvent, EventEnvelope};
use crate::models::transcript::Transcript;

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Done,
    Failed(String),
}

/// Final state of a run once the worker has finished
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// Provider round trips performed
    pub iterations: usize,
    pub transcript: Transcript,
}

enum BridgeMessage {
    Event(EventEnvelope),
    Done,
}

type ErrorSlot = Arc<Mutex<Option<String>>>;

/// Start `agent` on a new tokio task and return the consumer side.
///
/// Must be called from within a tokio runtime.
pub fn spawn_reply(agent: Agent, transcript: Transcript) -> ReplyStream {
    let run_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    let error_slot: ErrorSlot = Arc::new(Mutex::new(None));

    let worker_run_id = run_id.clone();
    let worker_slot = error_slot.clone();
    let handle = tokio::spawn(async move {
        let mut transcript = transcript;
        let mut status =
            RunStatus::Failed("Conversation ended without a terminal event".to_string());
        let mut iterations = 0;

        {
            let mut events = agent.reply(&mut transcript, &worker_run_id);
            let mut consumer_gone = false;
            while let Some(envelope) = events.next().await {
                iterations = envelope.iteration;
                match &envelope.event {
                    AgentEvent::FinalMessage { .. } => status = RunStatus::Done,
                    AgentEvent::Error { message } => status = RunStatus::Failed(message.clone()),
                    _ => {}
                }
                if tx.send(BridgeMessage::Event(envelope)).is_err() && !consumer_gone {
                    consumer_gone = true;
                    tracing::debug!(run_id = %worker_run_id, "consumer dropped, finishing run anyway");
                }
            }
        }

        if let RunStatus::Failed(message) = &status {
            *worker_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.clone());
        }
        let _ = tx.send(BridgeMessage::Done);

        RunOutcome {
            run_id: worker_run_id,
            status,
            iterations,
            transcript,
        }
    });

    ReplyStream {
        run_id,
        rx,
        error_slot,
        handle,
        saw_error: false,
        saw_terminal: false,
        last_iteration: 0,
        finished: false,
    }
}

/// Consumer side of a spawned run. Dropping it does not stop the worker.
pub struct ReplyStream {
    run_id: String,
    rx: mpsc::UnboundedReceiver<BridgeMessage>,
    error_slot: ErrorSlot,
    handle: JoinHandle<RunOutcome>,
    saw_error: bool,
    saw_terminal: bool,
    last_iteration: usize,
    finished: bool,
}

impl ReplyStream {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wait for the worker and return the final transcript and status
    pub async fn outcome(self) -> Result<RunOutcome, BridgeError> {
        self.handle
            .await
            .map_err(|e| BridgeError::WorkerFailed(e.to_string()))
    }

    /// Iterate events from synchronous code. Blocks the calling thread, so it
    /// must not be used from inside the async runtime.
    pub fn blocking_iter(self) -> BlockingEvents {
        BlockingEvents { inner: self }
    }

    /// Plain text view of the run: token deltas as they arrive, or the final
    /// message once if nothing was streamed. A terminal error becomes `Err`.
    pub fn into_text_stream(self) -> BoxStream<'static, Result<String, BridgeError>> {
        Box::pin(async_stream::stream! {
            let mut events = self;
            let mut streamed = false;
            while let Some(envelope) = events.next().await {
                match envelope.event {
                    AgentEvent::TokenDelta { delta } => {
                        streamed = true;
                        yield Ok(delta);
                    }
                    AgentEvent::FinalMessage { content } => {
                        if !streamed && !content.is_empty() {
                            yield Ok(content);
                        }
                    }
                    AgentEvent::Error { message } => {
                        yield Err(BridgeError::Run(message));
                    }
                    _ => {}
                }
            }
        })
    }

    fn synthesized_error(&mut self, message: String) -> EventEnvelope {
        self.saw_error = true;
        self.saw_terminal = true;
        EventEnvelope::new(AgentEvent::Error { message }, self.run_id.clone(), self.last_iteration)
    }

    /// Turn one channel read into the next event, or `None` once the run is over
    fn on_message(&mut self, message: Option<BridgeMessage>) -> Option<EventEnvelope> {
        if self.finished {
            return None;
        }
        match message {
            Some(BridgeMessage::Event(envelope)) => {
                self.last_iteration = envelope.iteration;
                if envelope.event.is_terminal() {
                    self.saw_terminal = true;
                }
                if matches!(envelope.event, AgentEvent::Error { .. }) {
                    self.saw_error = true;
                }
                Some(envelope)
            }
            Some(BridgeMessage::Done) => {
                self.finished = true;
                let recorded = self
                    .error_slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match recorded {
                    Some(message) if !self.saw_error => Some(self.synthesized_error(message)),
                    _ => None,
                }
            }
            None => {
                self.finished = true;
                if self.saw_terminal {
                    None
                } else {
                    Some(self.synthesized_error(
                        "Conversation worker stopped before finishing".to_string(),
                    ))
                }
            }
        }
    }
}

impl Stream for ReplyStream {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let message = ready!(self.rx.poll_recv(cx));
        Poll::Ready(self.on_message(message))
    }
}

/// Blocking iterator over a run's events, see [`ReplyStream::blocking_iter`]
pub struct BlockingEvents {
    inner: ReplyStream,
}

impl Iterator for BlockingEvents {
    type Item = EventEnvelope;

    fn next(&mut self) -> Option<Self::Item> {
        if self.inner.finished {
            return None;
        }
        let message = self.inner.rx.blocking_recv();
        self.inner.on_message(message)
    }
}
