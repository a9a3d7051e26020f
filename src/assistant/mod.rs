pub mod chat;
pub mod thread;

use reqwest::blocking::Client;

use crate::config::{AssistantConfig, Environment};
use crate::error::Result;
use crate::segmenter::{FlushPolicy, ReplySegmenter, SentenceSpeaker};

pub use chat::ChatSession;
pub use thread::ThreadSession;

/// Reply substituted whenever the hosted assistant cannot produce one
pub const FALLBACK_REPLY: &str =
    "Please speak to a customer service agent, as our AI assistant is currently unavailable.";

/// Speaker role for one conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A role-tagged conversation turn
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A persistent conversation with the hosted assistant.
///
/// Implementations stream reply sentences through the speaker as they become
/// available and return the full reply text for the conversation record.
pub trait ConversationSession {
    fn submit(&mut self, user_text: &str, speaker: &mut dyn SentenceSpeaker) -> Result<String>;

    /// Tear down any remote conversation state. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Canned session for DEV runs: no network traffic, fixed greeting reply
pub struct MockSession;

const MOCK_REPLY: &str = "Welcome to Starbucks! What can I get started for you today?";

impl ConversationSession for MockSession {
    fn submit(&mut self, user_text: &str, speaker: &mut dyn SentenceSpeaker) -> Result<String> {
        log::debug!("MockSession: Ignoring user text '{}'", user_text);
        speak_reply(MOCK_REPLY, speaker)?;
        Ok(MOCK_REPLY.to_string())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Route a complete reply through a per-turn segmenter so it is spoken
/// sentence-by-sentence like a streamed one
pub(crate) fn speak_reply(reply: &str, speaker: &mut dyn SentenceSpeaker) -> Result<()> {
    let mut segmenter = ReplySegmenter::new(FlushPolicy::DrainAll);
    segmenter.push(reply, speaker)?;
    segmenter.finish(speaker)
}

/// Build the session the configuration selects: the mock in DEV, a remote
/// thread session when an assistant id is configured, otherwise a
/// local-history chat session.
pub fn create_session(
    client: Client,
    config: &AssistantConfig,
    environment: Environment,
) -> Result<Box<dyn ConversationSession>> {
    if environment == Environment::Dev {
        log::info!("🧪 DEV environment, using mock assistant session");
        return Ok(Box::new(MockSession));
    }

    match &config.id {
        Some(assistant_id) => {
            log::info!("🧵 Using remote thread session with assistant {}", assistant_id);
            let session = ThreadSession::connect(
                client,
                config.base_url.clone(),
                assistant_id.clone(),
            )?;
            Ok(Box::new(session))
        }
        None => {
            log::info!("💬 Using local-history chat session with model {}", config.model);
            Ok(Box::new(ChatSession::new(
                client,
                config.base_url.clone(),
                config.model.clone(),
                &config.instructions,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingSpeaker {
        sentences: Vec<String>,
    }

    impl SentenceSpeaker for CollectingSpeaker {
        fn speak_sentence(&mut self, sentence: &str) -> Result<()> {
            self.sentences.push(sentence.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_role_strings() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_mock_session_speaks_greeting_by_sentence() {
        let mut session = MockSession;
        let mut speaker = CollectingSpeaker::default();

        let reply = session.submit("Hello.", &mut speaker).unwrap();

        assert_eq!(reply, MOCK_REPLY);
        assert_eq!(
            speaker.sentences,
            vec![
                "Welcome to Starbucks!",
                "What can I get started for you today?"
            ]
        );
        assert!(session.close().is_ok());
    }
}
