//! End-to-end interview scenarios driven through the real session event loop
//! with a scripted language model and a capturing speech sink.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use voxflow::flow::manager::FlowManager;
use voxflow::flow::state::{FlowState, FlowStateStore, InMemoryFlowState, StateValue};
use voxflow::interview;
use voxflow::message::ToolCall;
use voxflow::pipeline::context::LlmContext;
use voxflow::pipeline::{
    PipelineControl, SessionEvent, SessionRunner, SpeechSink, APOLOGY_LINE, EVENT_QUEUE_DEPTH,
};
use voxflow::services::{
    AudioClip, CompletionRequest, LanguageModel, LlmReply, ServiceError, TextToSpeech,
};

/// Pops one scripted reply per completion request, after an optional delay.
/// An exhausted script behaves like a failing model service.
#[derive(Debug)]
struct ScriptedLlm {
    replies: Mutex<VecDeque<(u64, LlmReply)>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<(u64, LlmReply)>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<LlmReply, ServiceError> {
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some((delay_ms, reply)) => {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Ok(reply)
            }
            None => Err(ServiceError::BadResponse {
                service: "scripted",
                details: "script exhausted".to_string(),
            }),
        }
    }
}

#[derive(Debug)]
struct NullTts;

#[async_trait]
impl TextToSpeech for NullTts {
    async fn synthesize(&self, _text: &str) -> Result<AudioClip, ServiceError> {
        Ok(AudioClip {
            bytes: Vec::new(),
            mime: "audio/wav".to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct RecordingSink {
    utterances: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.utterances.lock().unwrap().len()
    }

    fn last(&self) -> Option<String> {
        self.utterances.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SpeechSink for RecordingSink {
    async fn deliver(&self, text: &str, _audio: Option<AudioClip>) -> anyhow::Result<()> {
        self.utterances.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Debug)]
struct CountingCancel {
    cancels: AtomicUsize,
    token: CancellationToken,
}

impl CountingCancel {
    fn new(token: CancellationToken) -> Self {
        Self {
            cancels: AtomicUsize::new(0),
            token,
        }
    }
}

impl PipelineControl for CountingCancel {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
    }
}

struct Session {
    tx: mpsc::Sender<SessionEvent>,
    state: FlowState,
    sink: Arc<RecordingSink>,
    control: Arc<CountingCancel>,
    done: tokio::task::JoinHandle<()>,
}

fn spawn_session(replies: Vec<(u64, LlmReply)>) -> Session {
    let session_id = "itest";
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let context = Arc::new(LlmContext::new(tx.clone()));
    let state: FlowState = InMemoryFlowState::new();
    let control = Arc::new(CountingCancel::new(cancel.clone()));
    let manager = FlowManager::new(session_id, state.clone(), context.clone(), control.clone());

    let sink = Arc::new(RecordingSink::default());
    let runner = SessionRunner::new(
        session_id,
        manager,
        context,
        Arc::new(ScriptedLlm::new(replies)),
        Arc::new(NullTts),
        sink.clone(),
        tx.clone(),
        rx,
        cancel,
        interview::initial_node(),
    );
    let done = tokio::spawn(runner.run());

    Session {
        tx,
        state,
        sink,
        control,
        done,
    }
}

async fn wait_for_utterances(sink: &RecordingSink, count: usize) {
    timeout(Duration::from_secs(2), async {
        while sink.count() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {count} utterance(s)"));
}

fn utterance(text: &str) -> (u64, LlmReply) {
    (0, LlmReply::Utterance(text.to_string()))
}

fn call(id: &str, name: &str, arguments: serde_json::Value) -> (u64, LlmReply) {
    (0, LlmReply::FunctionCall(ToolCall::new(id, name, arguments)))
}

#[tokio::test]
async fn test_accept_path_collects_all_fields_and_terminates() {
    let session = spawn_session(vec![
        utterance("Hi, I'm from Commotion's HR team. Could I get your full name?"),
        call("call_1", "collect_name", json!({"name": "Asha Rao"})),
        utterance("Thanks Asha. What salary are you expecting, in LPA?"),
        call("call_2", "collect_salary", json!({"salary": 30})),
        utterance("Good to know. What draws you to Commotion?"),
        call(
            "call_3",
            "collect_motivation",
            json!({"motivation": "growth opportunities"}),
        ),
        utterance("Thanks for your time. We'll reach out within 2-3 business days."),
    ]);

    session.tx.send(SessionEvent::Connected).await.unwrap();
    wait_for_utterances(&session.sink, 1).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("Asha Rao".into()))
        .await
        .unwrap();
    wait_for_utterances(&session.sink, 2).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("I'm expecting thirty LPA".into()))
        .await
        .unwrap();
    wait_for_utterances(&session.sink, 3).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal(
            "Mostly the growth opportunities".into(),
        ))
        .await
        .unwrap();
    wait_for_utterances(&session.sink, 4).await;

    // The resolution node's post-action ends the session once the goodbye
    // has played out.
    timeout(Duration::from_secs(2), session.done)
        .await
        .expect("session should terminate after resolution")
        .unwrap();

    assert_eq!(
        session.state.get("name"),
        Some(StateValue::String("Asha Rao".into()))
    );
    assert_eq!(
        session.state.get("salary_expectation"),
        Some(StateValue::Number(30.0))
    );
    assert_eq!(
        session.state.get("motivation"),
        Some(StateValue::String("growth opportunities".into()))
    );
    assert_eq!(session.control.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_high_salary_bypasses_motivation() {
    let session = spawn_session(vec![
        utterance("Hi, I'm from Commotion's HR team. Could I get your full name?"),
        call("call_1", "collect_name", json!({"name": "Asha Rao"})),
        utterance("Thanks Asha. What salary are you expecting, in LPA?"),
        call("call_2", "collect_salary", json!({"salary": 75})),
        utterance("I appreciate your time, but that's above what this role offers."),
    ]);

    session.tx.send(SessionEvent::Connected).await.unwrap();
    wait_for_utterances(&session.sink, 1).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("Asha Rao".into()))
        .await
        .unwrap();
    wait_for_utterances(&session.sink, 2).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("Seventy five".into()))
        .await
        .unwrap();
    wait_for_utterances(&session.sink, 3).await;

    timeout(Duration::from_secs(2), session.done)
        .await
        .expect("session should terminate after rejection")
        .unwrap();

    assert_eq!(
        session.state.get("salary_expectation"),
        Some(StateValue::Number(75.0))
    );
    assert_eq!(session.state.get("motivation"), None);
    assert_eq!(session.control.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_arguments_are_fed_back_for_retry() {
    let session = spawn_session(vec![
        utterance("Hi, I'm from Commotion's HR team. Could I get your full name?"),
        // First attempt misses the required field; the structured error goes
        // back into the conversation and the model retries.
        call("call_1", "collect_name", json!({"full_name": "Asha Rao"})),
        call("call_2", "collect_name", json!({"name": "Asha Rao"})),
        utterance("Thanks Asha. What salary are you expecting, in LPA?"),
    ]);

    session.tx.send(SessionEvent::Connected).await.unwrap();
    wait_for_utterances(&session.sink, 1).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("Asha Rao".into()))
        .await
        .unwrap();
    wait_for_utterances(&session.sink, 2).await;

    assert_eq!(
        session.state.get("name"),
        Some(StateValue::String("Asha Rao".into()))
    );
    session.tx.send(SessionEvent::Disconnected).await.unwrap();
    timeout(Duration::from_secs(2), session.done)
        .await
        .expect("session should close on disconnect")
        .unwrap();
}

#[tokio::test]
async fn test_barge_in_discards_in_flight_result() {
    let session = spawn_session(vec![
        utterance("Hi, I'm from Commotion's HR team. Could I get your full name?"),
        // Slow completion, interrupted before it lands.
        (
            5000,
            LlmReply::FunctionCall(ToolCall::new(
                "call_1",
                "collect_name",
                json!({"name": "Asha Rao"}),
            )),
        ),
    ]);

    session.tx.send(SessionEvent::Connected).await.unwrap();
    wait_for_utterances(&session.sink, 1).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("Asha Rao".into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.tx.send(SessionEvent::BargeIn).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The interrupted call never mutates state.
    assert_eq!(session.state.get("name"), None);

    session.tx.send(SessionEvent::Disconnected).await.unwrap();
    timeout(Duration::from_secs(2), session.done)
        .await
        .expect("session should close on disconnect")
        .unwrap();
    assert_eq!(session.control.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disconnect_mid_turn_cancels_promptly() {
    let session = spawn_session(vec![
        utterance("Hi, I'm from Commotion's HR team. Could I get your full name?"),
        (
            5000,
            LlmReply::Utterance("This reply should never be delivered.".to_string()),
        ),
    ]);

    session.tx.send(SessionEvent::Connected).await.unwrap();
    wait_for_utterances(&session.sink, 1).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("Asha Rao".into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.tx.send(SessionEvent::Disconnected).await.unwrap();

    // The loop must not wait out the in-flight completion.
    timeout(Duration::from_millis(500), session.done)
        .await
        .expect("disconnect should cancel in-flight work")
        .unwrap();

    assert_eq!(session.sink.count(), 1);
    assert_eq!(session.control.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_model_failure_speaks_apology_and_closes() {
    // Only the greeting is scripted; the next completion fails.
    let session = spawn_session(vec![utterance(
        "Hi, I'm from Commotion's HR team. Could I get your full name?",
    )]);

    session.tx.send(SessionEvent::Connected).await.unwrap();
    wait_for_utterances(&session.sink, 1).await;

    session
        .tx
        .send(SessionEvent::TranscriptFinal("Asha Rao".into()))
        .await
        .unwrap();
    wait_for_utterances(&session.sink, 2).await;

    timeout(Duration::from_secs(2), session.done)
        .await
        .expect("session should close after the apology")
        .unwrap();

    assert_eq!(session.sink.last(), Some(APOLOGY_LINE.to_string()));
    assert_eq!(session.control.cancels.load(Ordering::SeqCst), 1);
}
