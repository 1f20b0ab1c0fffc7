//! Conversation orchestrator.
//!
//! One orchestrator per conversation. A send runs this protocol:
//! 1. Reject empty text and sends issued while a reply is pending
//! 2. Append the user turn and an empty model placeholder as one change
//! 3. Build a request from the whole history and call the model
//! 4. Fill the placeholder with the reply, or with an error message
//! 5. Return to idle
//!
//! Remote failures never escape `send`; they end up as chat messages.

use crate::transcript::{Snapshot, TranscriptStore, TranscriptView};
use crate::turn::Turn;
use parley_ai::{Attachment, GenerateRequest, HistoryEntry, ModelBackend, Role};
use parley_core::{ConversationId, TurnId};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Orchestrator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// How long to wait for the model before giving up, in seconds.
    /// Zero waits forever.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Upper bound on the number of turns sent per request.
    /// Unset sends the whole history.
    #[serde(default)]
    pub max_history_turns: Option<usize>,

    /// System instruction sent with every request.
    #[serde(default)]
    pub system_instruction: Option<String>,

    /// Reply text shown when the model call fails.
    #[serde(default = "default_failure_message")]
    pub failure_message: String,

    /// Reply text shown when the model does not answer in time.
    #[serde(default = "default_timeout_message")]
    pub timeout_message: String,

    /// Reply text shown when a send is cancelled before the model answers.
    #[serde(default = "default_cancelled_message")]
    pub cancelled_message: String,
}

fn default_response_timeout_secs() -> u64 {
    120
}

fn default_failure_message() -> String {
    "Something went wrong. Please try again.".to_string()
}

fn default_timeout_message() -> String {
    "The model took too long to respond. Please try again.".to_string()
}

fn default_cancelled_message() -> String {
    "The request was cancelled.".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout_secs(),
            max_history_turns: None,
            system_instruction: None,
            failure_message: default_failure_message(),
            timeout_message: default_timeout_message(),
            cancelled_message: default_cancelled_message(),
        }
    }
}

impl OrchestratorConfig {
    /// Returns the response timeout, if one is set.
    #[must_use]
    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_secs > 0).then(|| Duration::from_secs(self.response_timeout_secs))
    }

    /// Replaces blank messages with the defaults so a reply is never left empty.
    fn normalized(mut self) -> Self {
        fill_blank(&mut self.failure_message, default_failure_message);
        fill_blank(&mut self.timeout_message, default_timeout_message);
        fill_blank(&mut self.cancelled_message, default_cancelled_message);
        self
    }
}

fn fill_blank(message: &mut String, default: fn() -> String) {
    if message.trim().is_empty() {
        *message = default();
    }
}

/// The result of a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The prompt was appended and the reply has been filled.
    Accepted {
        /// The user turn.
        prompt: TurnId,
        /// The model turn.
        reply: TurnId,
    },
    /// A previous send is still awaiting its reply.
    RejectedBusy,
    /// The text was empty.
    RejectedEmptyInput,
}

impl SendOutcome {
    /// Returns true if the send was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Holds the busy flag for the duration of one send.
struct BusyGuard<'a> {
    busy: &'a watch::Sender<bool>,
}

impl<'a> BusyGuard<'a> {
    /// Sets the flag if it was clear. Check and set happen atomically.
    fn acquire(busy: &'a watch::Sender<bool>) -> Option<Self> {
        busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        })
        .then_some(Self { busy })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.send_replace(false);
    }
}

/// Drives one conversation with a remote model.
pub struct Orchestrator {
    id: ConversationId,
    backend: Arc<dyn ModelBackend>,
    transcript: TranscriptStore,
    busy: watch::Sender<bool>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("id", &self.id)
            .field("model", &self.backend.model())
            .field("turns", &self.transcript.snapshot().len())
            .field("busy", &*self.busy.borrow())
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with an empty transcript.
    #[must_use]
    pub fn new(backend: Arc<dyn ModelBackend>, config: OrchestratorConfig) -> Self {
        let (busy, _rx) = watch::channel(false);
        Self {
            id: ConversationId::new(),
            backend,
            transcript: TranscriptStore::new(),
            busy,
            config: config.normalized(),
        }
    }

    /// Returns the conversation id.
    #[must_use]
    pub fn id(&self) -> ConversationId {
        self.id
    }

    /// Returns the configuration in effect.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns true while a reply is pending.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Subscribes to busy/idle transitions.
    #[must_use]
    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    /// Returns read-only access to the transcript.
    #[must_use]
    pub fn transcript(&self) -> TranscriptView {
        self.transcript.view()
    }

    /// Returns the current turns in append order.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.transcript.snapshot()
    }

    /// Sends a prompt with optional images and waits for the reply.
    ///
    /// Once this returns [`SendOutcome::Accepted`] the reply turn is filled
    /// and the orchestrator is idle again. The attachments are owned by the
    /// transcript from the moment the send is accepted.
    ///
    /// The busy flag is claimed before the prompt and its placeholder are
    /// appended, so a `subscribe_busy` observer may briefly see `true` while
    /// the transcript does not yet hold the new exchange.
    #[instrument(skip_all, fields(conversation = %self.id))]
    pub async fn send(&self, text: impl Into<String>, attachments: Vec<Attachment>) -> SendOutcome {
        let text = text.into();
        if text.is_empty() {
            debug!("ignoring send with empty text");
            return SendOutcome::RejectedEmptyInput;
        }

        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("ignoring send while a reply is pending");
            return SendOutcome::RejectedBusy;
        };

        let images = attachments.len();
        let prompt = Turn::user(text, attachments);
        let prompt_id = prompt.id();
        let pending = self
            .transcript
            .append_exchange(prompt, self.config.cancelled_message.clone());
        let reply_id = pending.id();

        let request = self.build_request();
        info!(
            prompt = %prompt_id,
            reply = %reply_id,
            images,
            history = request.history.len(),
            "sending prompt to model"
        );

        let reply = self.request_reply(&request).await;
        if let Err(report) = pending.fill(reply) {
            error!(reply = %reply_id, error = %report, "failed to fill reply");
        }

        SendOutcome::Accepted {
            prompt: prompt_id,
            reply: reply_id,
        }
    }

    /// Builds a request from the history, oldest first.
    ///
    /// The pending placeholder has no content yet and is left out.
    fn build_request(&self) -> GenerateRequest {
        let snapshot = self.transcript.snapshot();
        let mut history: Vec<HistoryEntry> = snapshot
            .iter()
            .filter(|turn| !turn.is_pending())
            .map(Turn::to_history_entry)
            .collect();

        if let Some(max) = self.config.max_history_turns {
            let max = max.max(1);
            if history.len() > max {
                history.drain(..history.len() - max);
                // Conversations start with the user.
                while history.len() > 1 && history[0].role == Role::Model {
                    history.remove(0);
                }
            }
        }

        let mut request = GenerateRequest::new(history);
        if let Some(system) = &self.config.system_instruction {
            request = request.with_system(system.clone());
        }
        request
    }

    /// Calls the model and returns the text to show in the reply turn.
    async fn request_reply(&self, request: &GenerateRequest) -> String {
        let started = Instant::now();
        let call = self.backend.generate(request);
        let outcome = match self.config.response_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.ok(),
            None => Some(call.await),
        };

        match outcome {
            Some(Ok(response)) if !response.text.is_empty() => {
                info!(
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    output_tokens = response.usage.output_tokens,
                    "model replied"
                );
                response.text
            }
            Some(Ok(_)) => {
                warn!("model returned an empty reply");
                self.config.failure_message.clone()
            }
            Some(Err(report)) => {
                warn!(error = %report, "model request failed");
                self.config.failure_message.clone()
            }
            None => {
                warn!(
                    timeout_secs = self.config.response_timeout_secs,
                    "model request timed out"
                );
                self.config.timeout_message.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_ai::{GenerateResponse, ModelError};
    use parley_core::Result;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Answers from a script and records every request.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<std::result::Result<String, ModelError>>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<std::result::Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn replying(texts: &[&str]) -> Arc<Self> {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        fn requests(&self) -> Vec<GenerateRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelError::EmptyResponse));
            match reply {
                Ok(text) => Ok(GenerateResponse::text(text)),
                Err(e) => Err(e.into()),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// Holds every call until released.
    #[derive(Default)]
    struct GatedBackend {
        release: Notify,
    }

    #[async_trait]
    impl ModelBackend for GatedBackend {
        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, ModelError> {
            self.release.notified().await;
            Ok(GenerateResponse::text("finally"))
        }

        fn model(&self) -> &str {
            "gated"
        }
    }

    /// Never answers.
    struct SilentBackend;

    #[async_trait]
    impl ModelBackend for SilentBackend {
        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, ModelError> {
            std::future::pending().await
        }

        fn model(&self) -> &str {
            "silent"
        }
    }

    fn image(tag: u8) -> Attachment {
        Attachment::from_bytes(vec![0xFF, 0xD8, 0xFF, tag]).expect("jpeg")
    }

    fn network_error() -> ModelError {
        ModelError::RequestFailed {
            status: None,
            reason: "connection reset".to_string(),
        }
    }

    async fn wait_until_busy(orchestrator: &Orchestrator) {
        orchestrator
            .subscribe_busy()
            .wait_for(|busy| *busy)
            .await
            .expect("busy flag");
    }

    #[tokio::test]
    async fn reply_fills_placeholder() {
        let backend = ScriptedBackend::replying(&["Hello!"]);
        let orchestrator = Orchestrator::new(backend, OrchestratorConfig::default());

        let outcome = orchestrator.send("Hi", Vec::new()).await;

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role(), Role::User);
        assert_eq!(snapshot[0].text(), "Hi");
        assert!(snapshot[0].attachments().is_empty());
        assert_eq!(snapshot[1].role(), Role::Model);
        assert_eq!(snapshot[1].text(), "Hello!");
        assert!(snapshot[1].attachments().is_empty());
        assert_eq!(
            outcome,
            SendOutcome::Accepted {
                prompt: snapshot[0].id(),
                reply: snapshot[1].id(),
            }
        );
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let backend = ScriptedBackend::replying(&["unused"]);
        let orchestrator = Orchestrator::new(backend.clone(), OrchestratorConfig::default());

        let outcome = orchestrator.send("", vec![image(1)]).await;

        assert_eq!(outcome, SendOutcome::RejectedEmptyInput);
        assert!(orchestrator.snapshot().is_empty());
        assert!(!orchestrator.is_busy());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn send_while_busy_is_rejected() {
        let backend = Arc::new(GatedBackend::default());
        let orchestrator = Arc::new(Orchestrator::new(
            backend.clone(),
            OrchestratorConfig::default(),
        ));

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.send("Hi", Vec::new()).await }
        });
        wait_until_busy(&orchestrator).await;

        let second = orchestrator
            .send("Describe", vec![image(1), image(2)])
            .await;
        assert_eq!(second, SendOutcome::RejectedBusy);
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.pending_count(), 1);

        backend.release.notify_one();
        assert!(first.await.expect("join").is_accepted());

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].text(), "finally");
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn network_error_becomes_reply_text() {
        let backend = ScriptedBackend::new(vec![Err(network_error())]);
        let orchestrator = Orchestrator::new(backend, OrchestratorConfig::default());

        assert!(orchestrator.send("Hi", Vec::new()).await.is_accepted());

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot[1].text().is_empty());
        assert_eq!(snapshot[1].text(), default_failure_message());
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn failing_backend_always_returns_to_idle() {
        let backend = ScriptedBackend::new(vec![
            Err(network_error()),
            Err(ModelError::Timeout),
            Err(ModelError::RateLimited {
                retry_after_secs: Some(5),
            }),
        ]);
        let orchestrator = Orchestrator::new(backend, OrchestratorConfig::default());

        for (round, prompt) in ["one", "two", "three"].into_iter().enumerate() {
            assert!(orchestrator.send(prompt, Vec::new()).await.is_accepted());
            let snapshot = orchestrator.snapshot();
            assert_eq!(snapshot.len(), 2 * (round + 1));
            assert_eq!(snapshot.pending_count(), 0);
            assert!(snapshot.iter().all(|turn| !turn.text().is_empty()));
            assert!(!orchestrator.is_busy());
        }
    }

    #[tokio::test]
    async fn empty_model_reply_is_a_failure() {
        let backend = ScriptedBackend::replying(&[""]);
        let orchestrator = Orchestrator::new(backend, OrchestratorConfig::default());

        orchestrator.send("Hi", Vec::new()).await;

        assert_eq!(orchestrator.snapshot()[1].text(), default_failure_message());
    }

    #[tokio::test]
    async fn request_carries_full_history_in_order() {
        let backend = ScriptedBackend::replying(&["first reply", "second reply"]);
        let orchestrator = Orchestrator::new(backend.clone(), OrchestratorConfig::default());

        orchestrator.send("first", Vec::new()).await;
        orchestrator.send("second", vec![image(1), image(2)]).await;

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].history, vec![HistoryEntry::user("first", Vec::new())]);
        assert_eq!(
            requests[1].history,
            vec![
                HistoryEntry::user("first", Vec::new()),
                HistoryEntry::model("first reply"),
                HistoryEntry::user("second", vec![image(1), image(2)]),
            ]
        );
        assert_eq!(orchestrator.snapshot().len(), 4);
    }

    #[tokio::test]
    async fn images_stay_on_the_user_turn() {
        let backend = ScriptedBackend::replying(&["Two photos."]);
        let orchestrator = Orchestrator::new(backend, OrchestratorConfig::default());

        orchestrator.send("Describe", vec![image(1), image(2)]).await;

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot[0].attachments(), &[image(1), image(2)]);
        assert!(snapshot[1].attachments().is_empty());
    }

    #[tokio::test]
    async fn history_bound_keeps_latest_turns_starting_with_user() {
        let backend = ScriptedBackend::replying(&["r1", "r2", "r3"]);
        let config = OrchestratorConfig {
            max_history_turns: Some(4),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(backend.clone(), config);

        for prompt in ["p1", "p2", "p3"] {
            orchestrator.send(prompt, Vec::new()).await;
        }

        let last = backend.requests().pop().expect("request");
        assert_eq!(
            last.history,
            vec![
                HistoryEntry::user("p2", Vec::new()),
                HistoryEntry::model("r2"),
                HistoryEntry::user("p3", Vec::new()),
            ]
        );
        assert_eq!(orchestrator.snapshot().len(), 6);
    }

    #[tokio::test]
    async fn system_instruction_is_forwarded() {
        let backend = ScriptedBackend::replying(&["ok"]);
        let config = OrchestratorConfig {
            system_instruction: Some("Keep it short.".to_string()),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(backend.clone(), config);

        orchestrator.send("Hi", Vec::new()).await;

        assert_eq!(
            backend.requests()[0].system.as_deref(),
            Some("Keep it short.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_model_times_out() {
        let config = OrchestratorConfig {
            response_timeout_secs: 30,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(Arc::new(SilentBackend), config);

        assert!(orchestrator.send("Hi", Vec::new()).await.is_accepted());

        assert_eq!(orchestrator.snapshot()[1].text(), default_timeout_message());
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn cancelled_send_closes_placeholder_and_clears_busy() {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(GatedBackend::default()),
            OrchestratorConfig::default(),
        ));

        let task = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.send("Hi", Vec::new()).await }
        });
        wait_until_busy(&orchestrator).await;

        task.abort();
        assert!(task.await.expect_err("aborted").is_cancelled());

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot[1].text(), default_cancelled_message());
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn busy_flag_is_observable() {
        let backend = Arc::new(GatedBackend::default());
        let orchestrator = Arc::new(Orchestrator::new(
            backend.clone(),
            OrchestratorConfig::default(),
        ));
        let mut busy = orchestrator.subscribe_busy();
        assert!(!*busy.borrow_and_update());

        let task = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.send("Hi", Vec::new()).await }
        });

        busy.wait_for(|busy| *busy).await.expect("busy");
        assert_eq!(orchestrator.snapshot().pending_count(), 1);

        backend.release.notify_one();
        busy.wait_for(|busy| !*busy).await.expect("idle");
        task.await.expect("join");
        assert_eq!(orchestrator.snapshot().pending_count(), 0);
    }

    #[tokio::test]
    async fn observers_never_see_more_than_one_placeholder() {
        let backend = ScriptedBackend::replying(&["a", "b", "c"]);
        let orchestrator = Arc::new(Orchestrator::new(backend, OrchestratorConfig::default()));
        let mut subscription = orchestrator.transcript().subscribe();

        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while subscription.changed().await {
                let snapshot = subscription.snapshot();
                seen.push((snapshot.len(), snapshot.pending_count()));
                if snapshot.len() == 6 && snapshot.pending_count() == 0 {
                    break;
                }
            }
            seen
        });

        for prompt in ["one", "two", "three"] {
            orchestrator.send(prompt, Vec::new()).await;
            tokio::task::yield_now().await;
        }

        let seen = observer.await.expect("join");
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|(len, _)| len % 2 == 0));
        assert!(seen.iter().all(|(_, pending)| *pending <= 1));
    }

    #[test]
    fn blank_messages_fall_back_to_defaults() {
        let config = OrchestratorConfig {
            failure_message: "  ".to_string(),
            ..OrchestratorConfig::default()
        }
        .normalized();
        assert_eq!(config.failure_message, default_failure_message());
    }

    #[test]
    fn zero_timeout_disables_the_limit() {
        let config = OrchestratorConfig {
            response_timeout_secs: 0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.response_timeout(), None);
        assert_eq!(
            OrchestratorConfig::default().response_timeout(),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{ "max_history_turns": 10 }"#).expect("deserialize");
        assert_eq!(config.max_history_turns, Some(10));
        assert_eq!(config.response_timeout_secs, 120);
        assert_eq!(config.failure_message, default_failure_message());
    }
}
