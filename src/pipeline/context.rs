use crate::flow::FunctionDecl;
use crate::message::ConversationMessage;
use crate::pipeline::SessionEvent;
use crate::services::CompletionRequest;
use std::fmt::Debug;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// The conversation-context surface the flow manager programs against.
///
/// Role messages are installed once; task messages are replaced wholesale on
/// every node activation; the available functions always mirror the current
/// node's function set.
pub trait ConversationContext: Send + Sync + Debug {
    fn install_role_messages(&self, messages: Vec<ConversationMessage>);
    fn replace_task_messages(&self, messages: Vec<ConversationMessage>);
    fn set_available_functions(&self, functions: Vec<FunctionDecl>);
    /// Ask for an assistant turn without waiting for new user speech.
    fn request_immediate_turn(&self);
    /// Append one exchange entry (user/assistant/tool) to the history.
    fn push_history(&self, message: ConversationMessage);
    /// Assemble the completion request for the language-model service.
    fn snapshot(&self) -> CompletionRequest;
}

#[derive(Debug, Default)]
struct ContextInner {
    role: Vec<ConversationMessage>,
    task: Vec<ConversationMessage>,
    history: Vec<ConversationMessage>,
    functions: Vec<FunctionDecl>,
}

/// Context implementation feeding the per-session event loop.
///
/// Immediate-turn requests are delivered as session events so they are
/// processed in order with everything else on the queue.
#[derive(Debug)]
pub struct LlmContext {
    inner: Mutex<ContextInner>,
    events: mpsc::Sender<SessionEvent>,
}

impl LlmContext {
    pub fn new(events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            inner: Mutex::new(ContextInner::default()),
            events,
        }
    }
}

impl ConversationContext for LlmContext {
    fn install_role_messages(&self, messages: Vec<ConversationMessage>) {
        self.inner.lock().unwrap().role = messages;
    }

    fn replace_task_messages(&self, messages: Vec<ConversationMessage>) {
        self.inner.lock().unwrap().task = messages;
    }

    fn set_available_functions(&self, functions: Vec<FunctionDecl>) {
        self.inner.lock().unwrap().functions = functions;
    }

    fn request_immediate_turn(&self) {
        if self.events.try_send(SessionEvent::TurnRequested).is_err() {
            warn!("immediate turn request dropped, session queue closed or full");
        }
    }

    fn push_history(&self, message: ConversationMessage) {
        self.inner.lock().unwrap().history.push(message);
    }

    /// Role messages first, then the running exchange, then the current
    /// node's task instructions so they steer the very next completion.
    fn snapshot(&self) -> CompletionRequest {
        let inner = self.inner.lock().unwrap();
        let mut messages =
            Vec::with_capacity(inner.role.len() + inner.history.len() + inner.task.len());
        messages.extend(inner.role.iter().cloned());
        messages.extend(inner.history.iter().cloned());
        messages.extend(inner.task.iter().cloned());
        CompletionRequest {
            messages,
            functions: inner.functions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> (LlmContext, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (LlmContext::new(tx), rx)
    }

    #[test]
    fn test_task_messages_replace_not_append() {
        let (ctx, _rx) = context();
        ctx.replace_task_messages(vec![ConversationMessage::user("ask for the name")]);
        ctx.replace_task_messages(vec![ConversationMessage::user("ask for the salary")]);

        let request = ctx.snapshot();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content(), Some("ask for the salary"));
    }

    #[test]
    fn test_snapshot_orders_role_history_task() {
        let (ctx, _rx) = context();
        ctx.install_role_messages(vec![ConversationMessage::system("persona")]);
        ctx.push_history(ConversationMessage::assistant("hello"));
        ctx.push_history(ConversationMessage::user("hi, I'm Asha"));
        ctx.replace_task_messages(vec![ConversationMessage::user("ask about salary")]);

        let request = ctx.snapshot();
        let contents: Vec<_> = request.messages.iter().map(|m| m.content()).collect();
        assert_eq!(
            contents,
            vec![
                Some("persona"),
                Some("hello"),
                Some("hi, I'm Asha"),
                Some("ask about salary"),
            ]
        );
    }

    #[test]
    fn test_functions_mirror_latest_node() {
        let (ctx, _rx) = context();
        ctx.set_available_functions(vec![FunctionDecl {
            name: "collect_name".into(),
            description: "save the name".into(),
            parameters: json!({"type": "object"}),
        }]);
        ctx.set_available_functions(vec![]);

        assert!(ctx.snapshot().functions.is_empty());
    }

    #[test]
    fn test_immediate_turn_lands_on_the_queue() {
        let (ctx, mut rx) = context();
        ctx.request_immediate_turn();
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::TurnRequested)));
    }
}
