//! The operations the UI binds to, over one owned conversation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{ChatMessage, ChatOptions, ChatRequest};
use crate::core::chat_stream::ChatBackend;
use crate::core::config::{LoadedConfig, Prompts, SamplingConfig, SamplingError, SamplingUpdate};
use crate::core::conversation::{ConversationStore, SharedConversation};
use crate::core::history::{ArchiveError, HistoryArchive};
use crate::core::message::{Message, Role};
use crate::core::session::{ChatSession, SessionError, SessionSlot};
use crate::utils::random::random_seed;

/// Choice shown to the user for "load nothing"; never a file in the archive.
pub const NO_HISTORY_CHOICE: &str = "none";

pub struct ChatApp {
    model_name: String,
    conversation: SharedConversation,
    sampling: RwLock<SamplingConfig>,
    archive: HistoryArchive,
    backend: Arc<dyn ChatBackend>,
    slot: SessionSlot,
}

impl ChatApp {
    pub fn new(config: &LoadedConfig, backend: Arc<dyn ChatBackend>) -> Self {
        Self::from_parts(
            config.settings.model_name.clone(),
            &config.prompts,
            config.settings.options,
            HistoryArchive::new(config.paths.history_dir()),
            backend,
        )
    }

    pub fn from_parts(
        model_name: impl Into<String>,
        prompts: &Prompts,
        sampling: SamplingConfig,
        archive: HistoryArchive,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        let conversation =
            ConversationStore::new(prompts.system_prompt.clone(), prompts.greeting.clone())
                .into_shared();
        Self {
            model_name: model_name.into(),
            conversation,
            sampling: RwLock::new(sampling),
            archive,
            backend,
            slot: SessionSlot::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn archive(&self) -> &HistoryArchive {
        &self.archive
    }

    /// Committed messages only; an in-flight reply is not included.
    pub async fn conversation(&self) -> Vec<Message> {
        self.conversation.lock().await.snapshot()
    }

    /// Stops any running reply and restarts from the greeting.
    pub async fn reset_conversation(&self) -> Vec<Message> {
        self.cancel_session();
        let mut conversation = self.conversation.lock().await;
        conversation.reset();
        debug!("conversation reset");
        conversation.snapshot()
    }

    /// Records the user's turn and prepares the reply stream.
    ///
    /// The user message is appended before anything is sent and stays even if
    /// the reply is later cancelled or fails.
    pub async fn start_session(&self, input: &str) -> Result<ChatSession, SessionError> {
        if input.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let lease = self.slot.acquire()?;

        let (messages, generation) = {
            let mut conversation = self.conversation.lock().await;
            conversation.append(Role::User, input);
            let messages: Vec<ChatMessage> =
                conversation.messages().iter().map(ChatMessage::from).collect();
            (messages, conversation.generation())
        };

        let sampling = *self.sampling.read().await;
        let seed = if sampling.uses_random_seed() {
            random_seed()
        } else {
            sampling.seed
        };
        let request = ChatRequest {
            model: self.model_name.clone(),
            messages,
            stream: true,
            options: ChatOptions::from_config(&sampling, seed),
        };

        debug!(stream_id = lease.stream_id(), seed, "starting chat session");
        Ok(ChatSession::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.conversation),
            generation,
            request,
            lease,
        ))
    }

    /// Stops the running reply, if any.
    pub fn cancel_session(&self) -> bool {
        self.slot.cancel()
    }

    pub fn is_streaming(&self) -> bool {
        self.slot.is_busy()
    }

    pub async fn save_history(&self, prefix: &str) -> Result<PathBuf, ArchiveError> {
        let snapshot = self.conversation().await;
        let path = self.archive.save(&snapshot, prefix)?;
        info!(path = %path.display(), "conversation saved");
        Ok(path)
    }

    pub fn list_history_names(&self) -> Result<Vec<String>, ArchiveError> {
        self.archive.list()
    }

    /// Archive names preceded by [`NO_HISTORY_CHOICE`].
    pub fn history_choices(&self) -> Result<Vec<String>, ArchiveError> {
        let mut choices = vec![NO_HISTORY_CHOICE.to_string()];
        choices.extend(self.list_history_names()?);
        Ok(choices)
    }

    /// Replaces the conversation with a saved snapshot. On any error the
    /// current conversation is left as it was.
    pub async fn load_history_by_name(&self, name: &str) -> Result<Vec<Message>, ArchiveError> {
        let messages = self.archive.load(name)?;
        self.cancel_session();
        let mut conversation = self.conversation.lock().await;
        conversation.replace_all(messages);
        info!(name, messages = conversation.len(), "conversation loaded");
        Ok(conversation.snapshot())
    }

    pub async fn sampling_config(&self) -> SamplingConfig {
        *self.sampling.read().await
    }

    /// Changes apply to the next request; a running one keeps its values.
    pub async fn update_sampling_config(
        &self,
        update: SamplingUpdate,
    ) -> Result<SamplingConfig, SamplingError> {
        let mut sampling = self.sampling.write().await;
        sampling.apply(update)?;
        Ok(*sampling)
    }

    pub fn draw_random_seed(&self) -> i64 {
        random_seed()
    }

    /// Cancels any reply and asks the server to unload the model. Failures
    /// are only logged.
    pub async fn shutdown(&self) {
        self.cancel_session();
        match self.backend.unload(&self.model_name).await {
            Ok(()) => info!(model = %self.model_name, "model unloaded"),
            Err(err) => warn!(model = %self.model_name, error = %err, "failed to unload model"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::TransportError;
    use crate::core::session::SessionState;
    use crate::utils::test_utils::{create_test_app, FakeBackend, Script};
    use futures_util::StreamExt;
    use tempfile::TempDir;

    fn greeting() -> Vec<Message> {
        vec![Message::system("S"), Message::assistant("G")]
    }

    #[tokio::test]
    async fn completed_session_commits_the_reply() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["Hi", " there"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let steps: Vec<_> = app
            .start_session("Hello")
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert_eq!(steps, vec![Ok("Hi".to_string()), Ok("Hi there".to_string())]);
        let mut expected = greeting();
        expected.push(Message::user("Hello"));
        expected.push(Message::assistant("Hi there"));
        assert_eq!(app.conversation().await, expected);
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn request_carries_the_whole_conversation() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["ok"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let _: Vec<_> = app
            .start_session("Hello")
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, "test-model");
        assert!(request.stream);
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
        assert_eq!(request.messages[2].content, "Hello");
    }

    #[tokio::test]
    async fn cancel_after_first_fragment_discards_the_reply() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["Hi", " there"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let mut session = app.start_session("Hello").await.unwrap();
        assert_eq!(session.next_snapshot().await, Some(Ok("Hi".to_string())));
        assert!(app.cancel_session());
        assert_eq!(session.next_snapshot().await, None);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.next_snapshot().await, None);

        let mut expected = greeting();
        expected.push(Message::user("Hello"));
        assert_eq!(app.conversation().await, expected);
        assert!(!app.cancel_session());
    }

    #[tokio::test]
    async fn cancel_before_first_poll_sends_nothing_useful() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["never"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let mut session = app.start_session("Hello").await.unwrap();
        app.cancel_session();

        assert_eq!(session.next_snapshot().await, None);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(app.conversation().await.len(), 3);
    }

    #[tokio::test]
    async fn transport_failure_keeps_user_message_only() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::FailMidStream {
            fragments: vec!["partial".to_string()],
            error: TransportError::Stream("reset by peer".to_string()),
        }]);
        let app = create_test_app(&temp_dir, backend.clone());

        let steps: Vec<_> = app
            .start_session("Hello")
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert_eq!(
            steps,
            vec![
                Ok("partial".to_string()),
                Err(SessionError::Transport(TransportError::Stream(
                    "reset by peer".to_string()
                ))),
            ]
        );
        let conversation = app.conversation().await;
        assert_eq!(conversation.len(), 3);
        assert!(conversation[2].is_user());
    }

    #[tokio::test]
    async fn refused_request_fails_without_steps() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::Refuse(TransportError::Request(
            "connection refused".to_string(),
        ))]);
        let app = create_test_app(&temp_dir, backend.clone());

        let mut session = app.start_session("Hello").await.unwrap();
        let first = session.next_snapshot().await;
        assert!(matches!(
            first,
            Some(Err(SessionError::Transport(TransportError::Request(_))))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.next_snapshot().await, None);
        assert_eq!(app.conversation().await.len(), 3);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![]);
        let app = create_test_app(&temp_dir, backend.clone());

        let err = app.start_session("   ").await.unwrap_err();
        assert_eq!(err, SessionError::EmptyInput);
        assert_eq!(app.conversation().await, greeting());
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn second_start_while_streaming_is_busy() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![
            Script::fragments(&["a", "b"]),
            Script::fragments(&["c"]),
        ]);
        let app = create_test_app(&temp_dir, backend.clone());

        let mut first = app.start_session("one").await.unwrap();
        assert_eq!(first.next_snapshot().await, Some(Ok("a".to_string())));

        let err = app.start_session("two").await.unwrap_err();
        assert_eq!(err, SessionError::Busy);
        assert_eq!(app.conversation().await.len(), 3);

        drop(first);
        assert!(!app.is_streaming());

        let steps: Vec<_> = app
            .start_session("two")
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;
        assert_eq!(steps, vec![Ok("c".to_string())]);
    }

    #[tokio::test]
    async fn dropped_stream_is_equivalent_to_cancel() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["Hi", " there"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let mut stream = Box::pin(app.start_session("Hello").await.unwrap().into_stream());
        assert_eq!(stream.next().await, Some(Ok("Hi".to_string())));
        drop(stream);

        assert!(!app.is_streaming());
        let conversation = app.conversation().await;
        assert_eq!(conversation.len(), 3);
        assert!(conversation.last().unwrap().is_user());
    }

    #[tokio::test]
    async fn random_seed_is_resolved_per_request() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![
            Script::fragments(&["a"]),
            Script::fragments(&["b"]),
        ]);
        let app = create_test_app(&temp_dir, backend.clone());
        assert!(app.sampling_config().await.uses_random_seed());

        for input in ["one", "two"] {
            let _: Vec<_> = app
                .start_session(input)
                .await
                .unwrap()
                .into_stream()
                .collect()
                .await;
        }

        let seeds: Vec<i64> = backend
            .requests()
            .iter()
            .map(|r| r.options.seed)
            .collect();
        assert_eq!(seeds.len(), 2);
        assert!(seeds.iter().all(|seed| *seed >= 0));
        // Equal draws are possible but astronomically unlikely.
        assert_ne!(seeds[0], seeds[1]);
    }

    #[tokio::test]
    async fn fixed_seed_and_updated_options_are_sent() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["a"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let updated = app
            .update_sampling_config(SamplingUpdate {
                seed: Some(1234),
                top_k: Some(20),
                ..SamplingUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.seed, 1234);

        let _: Vec<_> = app
            .start_session("hi")
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        let options = backend.requests()[0].options;
        assert_eq!(options.seed, 1234);
        assert_eq!(options.top_k, 20);
    }

    #[tokio::test]
    async fn options_changed_mid_stream_do_not_affect_running_request() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["a", "b"])]);
        let app = create_test_app(&temp_dir, backend.clone());
        app.update_sampling_config(SamplingUpdate {
            temperature: Some(0.5),
            ..SamplingUpdate::default()
        })
        .await
        .unwrap();

        let mut session = app.start_session("hi").await.unwrap();
        session.next_snapshot().await;
        app.update_sampling_config(SamplingUpdate {
            temperature: Some(1.5),
            ..SamplingUpdate::default()
        })
        .await
        .unwrap();
        while session.next_snapshot().await.is_some() {}

        assert_eq!(backend.requests()[0].options.temperature, 0.5);
        assert_eq!(app.sampling_config().await.temperature, 1.5);
    }

    #[tokio::test]
    async fn reset_clears_to_greeting_and_stops_stream() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["a", "b"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let mut session = app.start_session("Hello").await.unwrap();
        session.next_snapshot().await;

        assert_eq!(app.reset_conversation().await, greeting());
        assert_eq!(session.next_snapshot().await, None);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(app.conversation().await, greeting());
    }

    #[tokio::test]
    async fn reply_is_not_committed_into_a_replaced_conversation() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["a"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let mut session = app.start_session("Hello").await.unwrap();
        assert_eq!(session.next_snapshot().await, Some(Ok("a".to_string())));
        // Swap the conversation underneath without going through the facade.
        app.conversation.lock().await.reset();

        assert_eq!(session.next_snapshot().await, None);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(app.conversation().await, greeting());
    }

    #[tokio::test]
    async fn history_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["Hi"])]);
        let app = create_test_app(&temp_dir, backend.clone());

        let _: Vec<_> = app
            .start_session("Hello")
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;
        let saved = app.conversation().await;
        let path = app.save_history("").await.unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();

        app.reset_conversation().await;
        assert_eq!(app.history_choices().unwrap(), vec![NO_HISTORY_CHOICE.to_string(), name.clone()]);

        let loaded = app.load_history_by_name(&name).await.unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(app.conversation().await, saved);
    }

    #[tokio::test]
    async fn loading_missing_history_leaves_conversation_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![Script::fragments(&["Hi"])]);
        let app = create_test_app(&temp_dir, backend.clone());
        let _: Vec<_> = app
            .start_session("Hello")
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;
        let before = app.conversation().await;

        let err = app.load_history_by_name("missing.json").await.unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { .. }));
        assert_eq!(app.conversation().await, before);
    }

    #[tokio::test]
    async fn shutdown_requests_unload_and_swallows_errors() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(vec![]);
        let app = create_test_app(&temp_dir, backend.clone());

        app.shutdown().await;
        assert_eq!(backend.unloaded(), vec!["test-model".to_string()]);

        backend.fail_unload();
        app.shutdown().await;
        assert_eq!(backend.unloaded().len(), 2);
    }

    #[test]
    fn drawn_seeds_are_non_negative() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_test_app(&temp_dir, FakeBackend::new(vec![]));
        assert!(app.draw_random_seed() >= 0);
    }
}
