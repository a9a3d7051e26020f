use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader};

use super::{ConversationSession, ConversationTurn};
use crate::error::{KioskError, Result};
use crate::segmenter::{FlushPolicy, ReplySegmenter, SentenceSpeaker};

/// Explicit-history conversation: every submission carries the whole
/// role-tagged history and the reply streams back as SSE deltas.
///
/// The history is an append-only ordered sequence owned by this session,
/// seeded with the system instruction.
pub struct ChatSession {
    client: Client,
    base_url: String,
    model: String,
    history: Vec<ConversationTurn>,
}

impl ChatSession {
    pub fn new(
        client: Client,
        base_url: String,
        model: String,
        instructions: &str,
    ) -> Self {
        Self {
            client,
            base_url,
            model,
            history: vec![ConversationTurn::system(instructions)],
        }
    }

    /// Number of turns including the system instruction
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn messages_json(&self) -> Vec<Value> {
        self.history
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                })
            })
            .collect()
    }
}

impl ConversationSession for ChatSession {
    fn submit(&mut self, user_text: &str, speaker: &mut dyn SentenceSpeaker) -> Result<String> {
        self.history.push(ConversationTurn::user(user_text));

        let payload = json!({
            "model": self.model,
            "messages": self.messages_json(),
            "temperature": 0.0,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(KioskError::Assistant(format!(
                "chat API error {}: {}",
                status, body
            )));
        }

        // SSE framing: one `data: {json}` line per delta, `data: [DONE]` last
        let reader = BufReader::new(response);
        let mut segmenter = ReplySegmenter::new(FlushPolicy::DrainAll);
        let mut reply = String::new();

        for line in reader.lines() {
            let line = line.map_err(|e| KioskError::Network(e.to_string()))?;

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };

            if data == "[DONE]" {
                break;
            }

            let Ok(event) = serde_json::from_str::<Value>(data) else {
                log::debug!("Skipping malformed stream event: {}", data);
                continue;
            };

            if let Some(content) = event["choices"][0]["delta"]["content"].as_str() {
                segmenter.push(content, speaker)?;
                reply.push_str(content);
            }
        }

        segmenter.finish(speaker)?;

        log::info!("🧠 Assistant reply: '{}'", reply);
        self.history.push(ConversationTurn::assistant(&reply));
        Ok(reply)
    }

    fn close(&mut self) -> Result<()> {
        // Nothing remote to tear down; the history dies with the process
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::Role;

    fn session() -> ChatSession {
        ChatSession::new(
            reqwest::blocking::Client::new(),
            "http://127.0.0.1:9/v1".to_string(),
            "test-model".to_string(),
            "You are a drive-through attendant.",
        )
    }

    #[test]
    fn test_history_seeded_with_system_instruction() {
        let session = session();
        assert_eq!(session.history_len(), 1);
        assert_eq!(session.history[0].role, Role::System);
        assert_eq!(
            session.history[0].content,
            "You are a drive-through attendant."
        );
    }

    #[test]
    fn test_messages_json_shape() {
        let mut session = session();
        session.history.push(ConversationTurn::user("Hello."));
        session
            .history
            .push(ConversationTurn::assistant("Hi, what can I get you?"));

        let messages = session.messages_json();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Hello.");
        assert_eq!(messages[2]["role"], "assistant");
    }
}
