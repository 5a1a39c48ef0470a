use crate::flow::dispatch;
use crate::flow::state::FlowState;
use crate::flow::{FlowError, NodeConfig, PostAction};
use crate::message::{ConversationMessage, ToolCall};
use crate::pipeline::context::ConversationContext;
use crate::pipeline::PipelineControl;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Phase {
    Uninitialized,
    Active(NodeConfig),
    Terminated,
}

/// Per-session orchestrator: owns the current node, applies transitions
/// returned by handlers, and couples conversation state to the pipeline
/// lifecycle.
///
/// A `FlowManager` is owned by its session's event loop, so at most one
/// transition is ever being applied at a time.
#[derive(Debug)]
pub struct FlowManager {
    session_id: String,
    state: FlowState,
    context: Arc<dyn ConversationContext>,
    pipeline: Arc<dyn PipelineControl>,
    phase: Phase,
    activation: u64,
    role_installed: bool,
    end_pending: bool,
}

impl FlowManager {
    pub fn new(
        session_id: &str,
        state: FlowState,
        context: Arc<dyn ConversationContext>,
        pipeline: Arc<dyn PipelineControl>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            state,
            context,
            pipeline,
            phase: Phase::Uninitialized,
            activation: 0,
            role_installed: false,
            end_pending: false,
        }
    }

    /// Activates the start node. Role messages are installed here, exactly
    /// once for the whole session.
    pub fn initialize(&mut self, node: NodeConfig) -> Result<(), FlowError> {
        match self.phase {
            Phase::Uninitialized => {}
            Phase::Active(_) => return Err(FlowError::AlreadyInitialized),
            Phase::Terminated => return Err(FlowError::SessionTerminated),
        }
        info!(
            "session {}: starting conversation at node `{}`",
            self.session_id,
            node.name()
        );
        self.activate(node);
        Ok(())
    }

    /// Dispatches a completed function call from the language model.
    ///
    /// `activation` identifies the node installation the call was issued
    /// against; a call from a superseded activation is rejected before it can
    /// touch any state.
    pub async fn handle_function_call(
        &mut self,
        activation: u64,
        call: &ToolCall,
    ) -> Result<(), FlowError> {
        let node = match &self.phase {
            Phase::Active(node) => node.clone(),
            Phase::Terminated => return Err(FlowError::SessionTerminated),
            Phase::Uninitialized => return Err(FlowError::NotInitialized),
        };
        if activation != self.activation {
            return Err(FlowError::StaleTransition {
                got: activation,
                current: self.activation,
            });
        }

        let outcome = dispatch::dispatch(&node, call, &self.state).await?;

        self.context.push_history(ConversationMessage::tool_response(
            call.id(),
            call.name(),
            outcome.result.clone(),
        ));

        match outcome.next {
            Some(next) => {
                info!(
                    "session {}: `{}` selected node `{}`",
                    self.session_id,
                    call.name(),
                    next.name()
                );
                self.activate(next);
            }
            None => debug!(
                "session {}: `{}` completed with no transition",
                self.session_id,
                call.name()
            ),
        }
        Ok(())
    }

    /// Terminal. Idempotent; the pipeline is cancelled at most once even if
    /// a disconnect and an end-conversation post-action overlap.
    pub fn terminate(&mut self, reason: &str) {
        if matches!(self.phase, Phase::Terminated) {
            debug!("session {}: already terminated", self.session_id);
            return;
        }
        info!("session {}: terminating ({reason})", self.session_id);
        self.phase = Phase::Terminated;
        self.end_pending = false;
        self.pipeline.cancel();
    }

    fn activate(&mut self, node: NodeConfig) {
        self.activation += 1;

        if !node.role_messages().is_empty() {
            if self.role_installed {
                warn!(
                    "session {}: node `{}` carries role messages but they are installed once per session; ignoring",
                    self.session_id,
                    node.name()
                );
            } else {
                self.context.install_role_messages(node.role_messages().to_vec());
                self.role_installed = true;
            }
        }

        self.context.replace_task_messages(node.task_messages().to_vec());
        self.context.set_available_functions(node.function_decls());

        info!(
            "session {}: node `{}` active (activation {})",
            self.session_id,
            node.name(),
            self.activation
        );

        let respond = node.responds_immediately();
        let post_actions = node.post_actions().to_vec();
        self.phase = Phase::Active(node);

        if respond {
            self.context.request_immediate_turn();
        }

        // Post-actions run after the node's messages are in the context and
        // its turn has been requested.
        for action in post_actions {
            match action {
                PostAction::EndConversation => {
                    info!(
                        "session {}: end of conversation requested by node post-action",
                        self.session_id
                    );
                    self.end_pending = true;
                }
            }
        }
    }

    pub fn activation(&self) -> u64 {
        self.activation
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active(_))
    }

    /// True once an end-conversation post-action has fired; the session loop
    /// terminates as soon as no assistant turn is in flight.
    pub fn end_pending(&self) -> bool {
        self.end_pending
    }

    pub fn current_node_name(&self) -> Option<&str> {
        match &self.phase {
            Phase::Active(node) => Some(node.name()),
            _ => None,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
