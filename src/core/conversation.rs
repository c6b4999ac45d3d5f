use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::core::message::{Message, Role};

/// Conversation store shared between the app facade and a running session.
pub type SharedConversation = Arc<Mutex<ConversationStore>>;

/// The live conversation: an ordered log of role-tagged messages that always
/// restarts from the configured system prompt and greeting.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    system_prompt: String,
    greeting: String,
    messages: Vec<Message>,
    generation: u64,
}

impl ConversationStore {
    pub fn new(system_prompt: impl Into<String>, greeting: impl Into<String>) -> Self {
        let mut store = Self {
            system_prompt: system_prompt.into(),
            greeting: greeting.into(),
            messages: Vec::new(),
            generation: 0,
        };
        store.install_greeting();
        store
    }

    pub fn into_shared(self) -> SharedConversation {
        Arc::new(Mutex::new(self))
    }

    /// Discards every message and reinstalls `[system, greeting]`.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.install_greeting();
        self.generation += 1;
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    /// Installs `messages` wholesale. The usual system/greeting/alternation
    /// shape is not enforced, only reported.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        if messages.first().map(|m| m.role) != Some(Role::System) {
            warn!(
                count = messages.len(),
                "installed conversation does not start with a system message"
            );
        }
        self.messages = messages;
        self.generation += 1;
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bumped by `reset` and `replace_all`; a session only commits into the
    /// generation it started in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    fn install_greeting(&mut self) {
        self.messages.push(Message::system(self.system_prompt.clone()));
        self.messages.push(Message::assistant(self.greeting.clone()));
    }
}
