use crate::flow::manager::FlowManager;
use crate::flow::session::{InMemorySessionStore, SessionHandle, SessionRegistry, SessionStore};
use crate::flow::state::InMemoryFlowState;
use crate::flow::NodeConfig;
use crate::pipeline::context::LlmContext;
use crate::pipeline::{
    SessionCancel, SessionEvent, SessionRunner, SpeechSink, EVENT_QUEUE_DEPTH,
};
use crate::services::{LanguageModel, SpeechToText, TextToSpeech};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Produces the entry node for each new session.
pub type StartNodeFactory = Arc<dyn Fn() -> NodeConfig + Send + Sync>;

/// Bridges transport-level session events onto the flow engine.
///
/// One `Runtime` serves many independent sessions; each gets its own event
/// loop task, flow state, and cancellation token.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    sessions: SessionStore,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
    stt: Arc<dyn SpeechToText>,
    start_node: StartNodeFactory,
}

impl Runtime {
    pub fn new(
        start_node: StartNodeFactory,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        stt: Arc<dyn SpeechToText>,
        session_ttl_secs: u64,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                sessions: InMemorySessionStore::new(session_ttl_secs),
                llm,
                tts,
                stt,
                start_node,
            }),
        }
    }

    /// Participant connected: create the session, spawn its event loop, and
    /// start the conversation at the entry node.
    pub async fn on_connected(&self, sink: Arc<dyn SpeechSink>) -> SessionHandle {
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let context = Arc::new(LlmContext::new(events_tx.clone()));
        let state = InMemoryFlowState::new();
        let manager = FlowManager::new(
            &session_id,
            state,
            context.clone(),
            Arc::new(SessionCancel::new(cancel.clone())),
        );
        let runner = SessionRunner::new(
            &session_id,
            manager,
            context,
            self.inner.llm.clone(),
            self.inner.tts.clone(),
            sink,
            events_tx.clone(),
            events_rx,
            cancel.clone(),
            (self.inner.start_node)(),
        );

        let handle = SessionHandle::new(&session_id, events_tx, cancel);
        self.inner.sessions.insert(handle.clone()).await;

        let sessions = self.inner.sessions.clone();
        let sid = session_id.clone();
        tokio::spawn(async move {
            runner.run().await;
            sessions.remove(&sid).await;
        });

        info!("session {session_id}: participant connected");
        handle.send(SessionEvent::Connected).await;
        handle
    }

    /// Participant disconnected: cancel in-flight work and terminate.
    pub async fn on_disconnected(&self, session_id: &str) {
        match self.inner.sessions.get(session_id).await {
            Some(handle) => {
                info!("session {session_id}: participant disconnected");
                handle.send(SessionEvent::Disconnected).await;
                handle.cancel();
            }
            None => debug!("disconnect for unknown session {session_id}"),
        }
    }

    /// A finalized user utterance (already transcribed).
    pub async fn on_transcript(&self, session_id: &str, text: &str) {
        match self.inner.sessions.get(session_id).await {
            Some(handle) => {
                handle
                    .send(SessionEvent::TranscriptFinal(text.to_string()))
                    .await
            }
            None => debug!("transcript for unknown session {session_id}"),
        }
    }

    /// Raw audio from the transport; runs speech-to-text and feeds the final
    /// transcript back in as an event.
    pub async fn on_audio(&self, session_id: &str, audio: &[u8]) {
        match self.inner.stt.transcribe(audio).await {
            Ok(text) if !text.trim().is_empty() => self.on_transcript(session_id, &text).await,
            Ok(_) => debug!("session {session_id}: no speech in audio segment"),
            Err(e) => warn!("session {session_id}: transcription failed: {e}"),
        }
    }

    /// User speech detected while the assistant is speaking.
    pub async fn on_barge_in(&self, session_id: &str) {
        match self.inner.sessions.get(session_id).await {
            Some(handle) => handle.send(SessionEvent::BargeIn).await,
            None => debug!("barge-in for unknown session {session_id}"),
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionHandle> {
        self.inner.sessions.get(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        AudioClip, CompletionRequest, LanguageModel, LlmReply, ServiceError,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    struct SilentLlm;

    #[async_trait]
    impl LanguageModel for SilentLlm {
        async fn complete(&self, _request: CompletionRequest) -> Result<LlmReply, ServiceError> {
            Ok(LlmReply::Utterance("hello".to_string()))
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

    #[derive(Debug)]
    struct FixedStt(&'static str);

    #[async_trait]
    impl SpeechToText for FixedStt {
        async fn transcribe(&self, _audio: &[u8]) -> Result<String, ServiceError> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        utterances: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSink for RecordingSink {
        async fn deliver(&self, text: &str, _audio: Option<AudioClip>) -> anyhow::Result<()> {
            self.utterances.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn quiet_entry() -> NodeConfig {
        NodeConfig::new("entry")
            .with_task_message("Say hello.")
            .respond_immediately(false)
    }

    fn runtime(stt: Arc<dyn SpeechToText>) -> Runtime {
        Runtime::new(
            Arc::new(quiet_entry),
            Arc::new(SilentLlm),
            Arc::new(NullTts),
            stt,
            60,
        )
    }

    #[tokio::test]
    async fn test_connect_registers_session_and_disconnect_releases_it() {
        let rt = runtime(Arc::new(FixedStt("")));
        let handle = rt.on_connected(Arc::new(RecordingSink::default())).await;
        let id = handle.id().to_string();

        assert!(rt.session(&id).await.is_some());

        rt.on_disconnected(&id).await;
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .expect("session should close on disconnect");

        // The loop removes itself from the store on the way out.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rt.session(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_audio_is_transcribed_and_answered() {
        let sink = Arc::new(RecordingSink::default());
        let rt = runtime(Arc::new(FixedStt("hi there")));
        let handle = rt.on_connected(sink.clone()).await;

        rt.on_audio(handle.id(), &[0u8; 16]).await;

        // One user transcript -> one assistant turn -> one delivered utterance.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !sink.utterances.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("assistant should answer the transcript");

        assert_eq!(sink.utterances.lock().unwrap().as_slice(), ["hello"]);
        rt.on_disconnected(handle.id()).await;
    }

    #[tokio::test]
    async fn test_empty_transcription_is_not_forwarded() {
        let sink = Arc::new(RecordingSink::default());
        let rt = runtime(Arc::new(FixedStt("   ")));
        let handle = rt.on_connected(sink.clone()).await;

        rt.on_audio(handle.id(), &[0u8; 16]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sink.utterances.lock().unwrap().is_empty());
        rt.on_disconnected(handle.id()).await;
    }
}
