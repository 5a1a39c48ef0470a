pub mod context;
pub mod runtime;

use crate::flow::dispatch;
use crate::flow::manager::FlowManager;
use crate::flow::state::FlowStateStore;
use crate::flow::{FlowError, NodeConfig};
use crate::message::{ConversationMessage, ToolCall};
use crate::pipeline::context::ConversationContext;
use crate::services::{AudioClip, LanguageModel, LlmReply, ServiceError, TextToSpeech};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Depth of the per-session event queue.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Spoken fallback when something breaks mid-conversation; raw error payloads
/// never reach the participant.
pub const APOLOGY_LINE: &str =
    "I'm sorry, something went wrong on our end. Thanks for your patience, we'll follow up with you soon.";

/// Everything that can drive a session, delivered one at a time to the
/// session's event loop. Completions from the language-model and synthesis
/// stages arrive here as events rather than nested callbacks, which keeps
/// ordering strict and cancellation simple.
#[derive(Debug)]
pub enum SessionEvent {
    /// Participant connected; start the conversation at the entry node.
    Connected,
    /// A finalized user utterance from the speech-to-text stage.
    TranscriptFinal(String),
    /// The flow asked for an assistant turn without waiting for user speech.
    TurnRequested,
    /// A completion arrived from the language-model service.
    LlmCompleted {
        turn_id: u64,
        activation: u64,
        reply: Result<LlmReply, ServiceError>,
    },
    /// The in-flight utterance finished playing out.
    SpeechFinished { turn_id: u64 },
    /// The active node's post-action asked to end the conversation. Queued
    /// behind the node's own turn request, so the closing line still plays.
    EndRequested,
    /// User speech detected while the assistant was speaking.
    BargeIn,
    /// Participant disconnected; force-terminate.
    Disconnected,
}

/// Cancellation surface the flow manager invokes on termination.
pub trait PipelineControl: Send + Sync + Debug {
    fn cancel(&self);
}

/// Cancels the session token, stopping any in-flight generation or synthesis
/// task spawned off this session.
#[derive(Debug)]
pub struct SessionCancel {
    token: CancellationToken,
}

impl SessionCancel {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl PipelineControl for SessionCancel {
    fn cancel(&self) {
        self.token.cancel();
    }
}

/// Outbound half of the transport: delivers one assistant utterance (text
/// plus synthesized audio when available) to the participant.
#[async_trait]
pub trait SpeechSink: Send + Sync + Debug {
    async fn deliver(&self, text: &str, audio: Option<AudioClip>) -> anyhow::Result<()>;
}

/// One in-flight assistant turn: a session-unique id, the activation it was
/// issued against, and the token that kills its generation/synthesis tasks on
/// barge-in or disconnect.
#[derive(Debug)]
struct Turn {
    id: u64,
    activation: u64,
    token: CancellationToken,
}

/// Cooperative event loop for one session.
///
/// Owns the [`FlowManager`] and processes events strictly one at a time, so
/// no two handler invocations for the same session ever run concurrently.
pub struct SessionRunner {
    session_id: String,
    manager: FlowManager,
    context: Arc<dyn ConversationContext>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
    sink: Arc<dyn SpeechSink>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
    start_node: Option<NodeConfig>,
    turn: Option<Turn>,
    turn_seq: u64,
    closing: bool,
}

impl SessionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: &str,
        manager: FlowManager,
        context: Arc<dyn ConversationContext>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        sink: Arc<dyn SpeechSink>,
        events_tx: mpsc::Sender<SessionEvent>,
        events_rx: mpsc::Receiver<SessionEvent>,
        cancel: CancellationToken,
        start_node: NodeConfig,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            manager,
            context,
            llm,
            tts,
            sink,
            events_tx,
            events_rx,
            cancel,
            start_node: Some(start_node),
            turn: None,
            turn_seq: 0,
            closing: false,
        }
    }

    pub async fn run(mut self) {
        info!("session {}: event loop started", self.session_id);
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.manager.terminate("pipeline cancelled");
                    break;
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        self.manager.terminate("event queue closed");
                        break;
                    }
                },
            };

            if self.handle_event(event).await {
                break;
            }

            // The conversation closes once the end has been requested and the
            // final utterance has finished playing out.
            if self.closing && self.turn.is_none() && !self.manager.is_terminated() {
                self.manager.terminate("conversation complete");
                break;
            }
        }

        let collected = self.manager.state().all();
        info!(
            "session {}: closed with {} collected field(s)",
            self.session_id,
            collected.len()
        );
    }

    /// Returns true when the loop should stop.
    async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Connected => {
                let Some(node) = self.start_node.take() else {
                    warn!("session {}: duplicate connect event", self.session_id);
                    return false;
                };
                if let Err(e) = self.manager.initialize(node) {
                    error!("session {}: failed to initialize flow: {e}", self.session_id);
                    return true;
                }
                self.after_transition();
            }
            SessionEvent::TranscriptFinal(text) => {
                if !self.manager.is_active() || self.closing {
                    debug!(
                        "session {}: dropping transcript outside active conversation",
                        self.session_id
                    );
                    return false;
                }
                if let Some(turn) = self.turn.take() {
                    debug!(
                        "session {}: user spoke over the assistant, superseding turn",
                        self.session_id
                    );
                    turn.token.cancel();
                }
                self.context.push_history(ConversationMessage::user(&text));
                self.start_turn();
            }
            SessionEvent::TurnRequested => {
                if !self.manager.is_active() {
                    return false;
                }
                self.start_turn();
            }
            SessionEvent::LlmCompleted { turn_id, activation, reply } => {
                if self.manager.is_terminated() {
                    debug!(
                        "session {}: completion after termination is a no-op",
                        self.session_id
                    );
                    return false;
                }
                let superseded = !self.turn.as_ref().is_some_and(|t| t.id == turn_id)
                    || activation != self.manager.activation();
                if superseded {
                    warn!(
                        "session {}: discarding stale completion (activation {activation}, current {})",
                        self.session_id,
                        self.manager.activation()
                    );
                    return false;
                }
                match reply {
                    Ok(LlmReply::Utterance(text)) => {
                        self.context.push_history(ConversationMessage::assistant(&text));
                        self.speak(text);
                    }
                    Ok(LlmReply::FunctionCall(call)) => {
                        self.turn = None;
                        self.context
                            .push_history(ConversationMessage::tool_request(call.clone()));
                        self.apply_function_call(activation, call).await;
                        self.after_transition();
                    }
                    Err(e) => {
                        error!("session {}: language model failed: {e}", self.session_id);
                        self.turn = None;
                        self.close_with_apology();
                    }
                }
            }
            SessionEvent::SpeechFinished { turn_id } => {
                if self.turn.as_ref().is_some_and(|t| t.id == turn_id) {
                    self.turn = None;
                }
            }
            SessionEvent::EndRequested => {
                self.closing = true;
            }
            SessionEvent::BargeIn => {
                if let Some(turn) = self.turn.take() {
                    info!(
                        "session {}: barge-in, discarding in-flight assistant output",
                        self.session_id
                    );
                    turn.token.cancel();
                }
            }
            SessionEvent::Disconnected => {
                self.manager.terminate("participant disconnected");
                return true;
            }
        }
        false
    }

    async fn apply_function_call(&mut self, activation: u64, call: ToolCall) {
        match self.manager.handle_function_call(activation, &call).await {
            Ok(()) => {}
            Err(err @ (FlowError::UnknownFunction { .. } | FlowError::SchemaValidation { .. })) => {
                // Recoverable: the model re-asks with the error result in view.
                warn!("session {}: {err}", self.session_id);
                self.context.push_history(ConversationMessage::tool_response(
                    call.id(),
                    call.name(),
                    dispatch::error_result(&err),
                ));
                self.context.request_immediate_turn();
            }
            Err(err @ FlowError::StaleTransition { .. }) => {
                warn!("session {}: {err}; discarded", self.session_id);
            }
            Err(FlowError::SessionTerminated) => {
                debug!(
                    "session {}: function call after termination is a no-op",
                    self.session_id
                );
            }
            Err(err @ (FlowError::NotInitialized | FlowError::AlreadyInitialized)) => {
                error!("session {}: {err}", self.session_id);
            }
            Err(err @ FlowError::HandlerFault { .. }) => {
                error!("session {}: {err}", self.session_id);
                self.close_with_apology();
            }
        }
    }

    /// An end-of-conversation post-action becomes an event so it sits behind
    /// the terminal node's own turn request on the queue; the goodbye line is
    /// delivered before the session closes.
    fn after_transition(&mut self) {
        if self.manager.end_pending() && !self.closing {
            if self.events_tx.try_send(SessionEvent::EndRequested).is_err() {
                // Queue full or closed; close without waiting for the turn.
                self.closing = true;
            }
        }
    }

    /// Speak a generic apology, then close the session once it has played.
    fn close_with_apology(&mut self) {
        self.closing = true;
        self.context
            .push_history(ConversationMessage::assistant(APOLOGY_LINE));
        self.speak(APOLOGY_LINE.to_string());
    }

    fn register_turn(&mut self) -> (u64, CancellationToken) {
        self.turn_seq += 1;
        let token = self.cancel.child_token();
        self.turn = Some(Turn {
            id: self.turn_seq,
            activation: self.manager.activation(),
            token: token.clone(),
        });
        (self.turn_seq, token)
    }

    fn start_turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            debug!("session {}: superseding in-flight turn", self.session_id);
            turn.token.cancel();
        }
        let activation = self.manager.activation();
        let request = self.context.snapshot();
        let (turn_id, token) = self.register_turn();

        let llm = self.llm.clone();
        let events = self.events_tx.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("session {session_id}: completion request cancelled");
                }
                reply = llm.complete(request) => {
                    let _ = events
                        .send(SessionEvent::LlmCompleted { turn_id, activation, reply })
                        .await;
                }
            }
        });
    }

    /// Plays one utterance out through synthesis and the transport sink. The
    /// current turn stays in flight until the playout finishes.
    fn speak(&mut self, text: String) {
        let (turn_id, token) = match &self.turn {
            Some(turn) => (turn.id, turn.token.clone()),
            None => self.register_turn(),
        };

        let tts = self.tts.clone();
        let sink = self.sink.clone();
        let events = self.events_tx.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            let playout = async {
                let audio = match tts.synthesize(&text).await {
                    Ok(clip) => Some(clip),
                    Err(e) => {
                        warn!("session {session_id}: synthesis failed, delivering text only: {e}");
                        None
                    }
                };
                if let Err(e) = sink.deliver(&text, audio).await {
                    warn!("session {session_id}: failed to deliver utterance: {e}");
                }
            };
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("session {session_id}: utterance discarded mid-flight");
                }
                _ = playout => {
                    let _ = events.send(SessionEvent::SpeechFinished { turn_id }).await;
                }
            }
        });
    }
}
