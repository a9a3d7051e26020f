use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use super::{speak_reply, ConversationSession, FALLBACK_REPLY};
use crate::error::{KioskError, Result};
use crate::segmenter::SentenceSpeaker;

/// States reported for a remote assistant run
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Cancelling,
    Completed,
    Failed,
    Expired,
    Cancelled,
    Incomplete,
    /// The run wants tool outputs; the kiosk exposes no tools, so this can
    /// never progress
    RequiresAction,
}

impl RunStatus {
    /// A state the run will never leave on its own
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Expired
                | RunStatus::Cancelled
                | RunStatus::Incomplete
                | RunStatus::RequiresAction
        )
    }
}

/// Reply policy after polling: `None` means the run completed and the real
/// reply should be fetched; otherwise the literal fallback is spoken.
/// `status` is `None` when the poll deadline expired first.
pub fn fallback_for(status: Option<RunStatus>) -> Option<&'static str> {
    match status {
        Some(RunStatus::Completed) => None,
        _ => Some(FALLBACK_REPLY),
    }
}

/// How often a pending run is re-checked
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Deadline after which a run is abandoned and the fallback spoken
const POLL_DEADLINE: Duration = Duration::from_secs(60);

/// Basic identity of the configured assistant, fetched at startup so a bad
/// id fails fast
#[derive(Debug, Clone)]
pub struct AssistantInfo {
    pub id: String,
    pub name: Option<String>,
    pub model: String,
}

fn parse_assistant(json: &Value) -> Result<AssistantInfo> {
    let id = json["id"]
        .as_str()
        .ok_or_else(|| KioskError::Assistant("assistant response missing 'id'".to_string()))?
        .to_string();

    let model = json["model"]
        .as_str()
        .ok_or_else(|| KioskError::Assistant("assistant response missing 'model'".to_string()))?
        .to_string();

    Ok(AssistantInfo {
        id,
        name: json["name"].as_str().map(|s| s.to_string()),
        model,
    })
}

/// Retrieve an assistant by id
pub fn fetch_assistant(client: &Client, base_url: &str, id: &str) -> Result<AssistantInfo> {
    let response = client
        .get(format!("{}/assistants/{}", base_url, id))
        .header("OpenAI-Beta", "assistants=v2")
        .send()?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(KioskError::Assistant(format!(
            "failed to fetch assistant {}: {} {}",
            id, status, body
        )));
    }

    let json: Value = response
        .json()
        .map_err(|e| KioskError::Assistant(format!("invalid assistant response: {}", e)))?;

    parse_assistant(&json)
}

/// Stateful-remote-session conversation: all history lives in one
/// server-side thread created at construction; each submission appends a
/// message, starts a run and polls it to completion under a bounded
/// deadline.
pub struct ThreadSession {
    client: Client,
    base_url: String,
    assistant_id: String,
    thread_id: Option<String>,
}

impl ThreadSession {
    /// Validate the assistant id and create the conversation thread
    pub fn connect(client: Client, base_url: String, assistant_id: String) -> Result<Self> {
        let assistant = fetch_assistant(&client, &base_url, &assistant_id)?;
        log::info!(
            "🧵 Connected to assistant '{}' ({})",
            assistant.name.as_deref().unwrap_or("unnamed"),
            assistant.model
        );

        let response = client
            .post(format!("{}/threads", base_url))
            .header("OpenAI-Beta", "assistants=v2")
            .json(&json!({}))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(KioskError::Assistant(format!(
                "failed to create thread: {} {}",
                status, body
            )));
        }

        let json: Value = response
            .json()
            .map_err(|e| KioskError::Assistant(format!("invalid thread response: {}", e)))?;

        let thread_id = json["id"]
            .as_str()
            .ok_or_else(|| KioskError::Assistant("thread response missing 'id'".to_string()))?
            .to_string();

        log::info!("🧵 Created conversation thread {}", thread_id);

        Ok(Self {
            client,
            base_url,
            assistant_id,
            thread_id: Some(thread_id),
        })
    }

    fn thread_id(&self) -> Result<&str> {
        self.thread_id
            .as_deref()
            .ok_or_else(|| KioskError::Assistant("session is closed".to_string()))
    }

    fn post(&self, path: String, payload: Value) -> Result<Value> {
        let response = self
            .client
            .post(path)
            .header("OpenAI-Beta", "assistants=v2")
            .json(&payload)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(KioskError::Assistant(format!(
                "assistant API error {}: {}",
                status, body
            )));
        }

        response
            .json()
            .map_err(|e| KioskError::Assistant(format!("invalid assistant response: {}", e)))
    }

    fn get(&self, path: String) -> Result<Value> {
        let response = self
            .client
            .get(path)
            .header("OpenAI-Beta", "assistants=v2")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(KioskError::Assistant(format!(
                "assistant API error {}: {}",
                status, body
            )));
        }

        response
            .json()
            .map_err(|e| KioskError::Assistant(format!("invalid assistant response: {}", e)))
    }

    fn create_message(&self, text: &str) -> Result<()> {
        let thread_id = self.thread_id()?;
        self.post(
            format!("{}/threads/{}/messages", self.base_url, thread_id),
            json!({ "role": "user", "content": text }),
        )?;
        Ok(())
    }

    fn create_run(&self) -> Result<(String, RunStatus)> {
        let thread_id = self.thread_id()?;
        let json = self.post(
            format!("{}/threads/{}/runs", self.base_url, thread_id),
            json!({ "assistant_id": self.assistant_id }),
        )?;

        let run_id = json["id"]
            .as_str()
            .ok_or_else(|| KioskError::Assistant("run response missing 'id'".to_string()))?
            .to_string();
        let status = parse_run_status(&json)?;

        Ok((run_id, status))
    }

    /// Poll the run until it reaches a terminal state or the deadline
    /// expires. Returns the last observed status, or `None` on deadline.
    fn poll_run(&self, run_id: &str, initial: RunStatus) -> Result<Option<RunStatus>> {
        let thread_id = self.thread_id()?;
        let started = Instant::now();
        let mut status = initial;

        while !status.is_terminal() {
            if started.elapsed() >= POLL_DEADLINE {
                log::warn!(
                    "⏰ Run {} still '{}' after {:?}, giving up",
                    run_id,
                    status,
                    POLL_DEADLINE
                );
                return Ok(None);
            }

            thread::sleep(POLL_INTERVAL);

            let json = self.get(format!(
                "{}/threads/{}/runs/{}",
                self.base_url, thread_id, run_id
            ))?;
            status = parse_run_status(&json)?;
            log::debug!("🧵 Run {} status: {}", run_id, status);
        }

        Ok(Some(status))
    }

    /// Newest message on the thread (the assistant's reply once a run
    /// completes)
    fn latest_message(&self) -> Result<String> {
        let thread_id = self.thread_id()?;
        let json = self.get(format!(
            "{}/threads/{}/messages?limit=1&order=desc",
            self.base_url, thread_id
        ))?;

        json["data"][0]["content"][0]["text"]["value"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| KioskError::Assistant("thread has no readable reply".to_string()))
    }

    fn run_turn(&self, user_text: &str) -> Result<String> {
        self.create_message(user_text)?;
        let (run_id, initial) = self.create_run()?;
        let status = self.poll_run(&run_id, initial)?;

        match fallback_for(status) {
            None => self.latest_message(),
            Some(fallback) => {
                log::warn!(
                    "⚠️ Run {} ended as {:?}, substituting fallback reply",
                    run_id,
                    status
                );
                Ok(fallback.to_string())
            }
        }
    }
}

fn parse_run_status(json: &Value) -> Result<RunStatus> {
    let raw = json["status"]
        .as_str()
        .ok_or_else(|| KioskError::Assistant("run response missing 'status'".to_string()))?;

    RunStatus::from_str(raw)
        .map_err(|_| KioskError::Assistant(format!("unknown run status '{}'", raw)))
}

impl ConversationSession for ThreadSession {
    fn submit(&mut self, user_text: &str, speaker: &mut dyn SentenceSpeaker) -> Result<String> {
        // Any failure on the way to a reply degrades to the fallback; the
        // kiosk keeps serving
        let reply = match self.run_turn(user_text) {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("❌ Assistant turn failed: {}", e);
                FALLBACK_REPLY.to_string()
            }
        };

        speak_reply(&reply, speaker)?;

        log::info!("🧠 Assistant reply: '{}'", reply);
        Ok(reply)
    }

    fn close(&mut self) -> Result<()> {
        let Some(thread_id) = self.thread_id.take() else {
            return Ok(());
        };

        log::info!("🧵 Deleting conversation thread {}", thread_id);
        let response = self
            .client
            .delete(format!("{}/threads/{}", self.base_url, thread_id))
            .header("OpenAI-Beta", "assistants=v2")
            .send()?;

        if !response.status().is_success() {
            log::warn!(
                "⚠️ Failed to delete thread {}: {}",
                thread_id,
                response.status()
            );
        }

        Ok(())
    }
}
