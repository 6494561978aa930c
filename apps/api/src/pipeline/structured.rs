//! Structured-output repair protocol.
//!
//! Every LLM-calling stage requests a direct JSON object. If the response
//! does not parse, exactly one repair call is issued: a minimal
//! "return only valid JSON" instruction carrying the failed raw output. If
//! the repair also fails to parse, the stage's fields are treated as absent
//! (`None`) and the pipeline continues — a malformed model response never
//! aborts the whole evaluation.
//!
//! Transport failures are a different budget entirely: they have already
//! been retried inside the LLM client and propagate here as errors.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::llm_client::{strip_json_fences, ChatMessage, CompletionClient, CompletionOptions, LlmError};
use crate::pipeline::prompts::REPAIR_SYSTEM;

/// Requests a JSON object matching `T` and applies the one-shot repair
/// protocol. `Ok(None)` means both attempts returned unparseable output.
pub async fn structured_call<T: DeserializeOwned>(
    llm: &dyn CompletionClient,
    system: &str,
    user: String,
    temperature: f32,
) -> Result<Option<T>, LlmError> {
    let messages = [ChatMessage::system(system), ChatMessage::user(user)];
    let raw = llm
        .complete(
            &messages,
            CompletionOptions {
                temperature,
                ..Default::default()
            },
        )
        .await?;

    if let Some(parsed) = parse_json(&raw) {
        return Ok(Some(parsed));
    }

    warn!("structured output failed to parse, issuing repair call");
    let repair = [
        ChatMessage::system(REPAIR_SYSTEM),
        ChatMessage::user(raw.trim().to_string()),
    ];
    let repaired = llm
        .complete(
            &repair,
            CompletionOptions {
                temperature: 0.0,
                ..Default::default()
            },
        )
        .await?;

    let parsed = parse_json(&repaired);
    if parsed.is_none() {
        warn!("repair call output failed to parse as well, degrading to defaults");
    }
    Ok(parsed)
}

fn parse_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(strip_json_fences(raw)).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Probe {
        score: f64,
    }

    /// Test double that replays scripted responses and records every call.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedLlm {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedLlm {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _opts: CompletionOptions,
        ) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push((
                messages[0].content.clone(),
                messages[1].content.clone(),
            ));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("script ran out of responses"))
        }
    }

    #[tokio::test]
    async fn test_valid_json_needs_no_repair() {
        let llm = ScriptedLlm::new(&[r#"{"score": 4.5}"#]);
        let parsed: Option<Probe> = structured_call(&llm, "system", "user".into(), 0.1)
            .await
            .unwrap();
        assert_eq!(parsed.unwrap().score, 4.5);
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fenced_json_parses_without_repair() {
        let llm = ScriptedLlm::new(&["```json\n{\"score\": 3.0}\n```"]);
        let parsed: Option<Probe> = structured_call(&llm, "system", "user".into(), 0.1)
            .await
            .unwrap();
        assert_eq!(parsed.unwrap().score, 3.0);
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_repair_call_carries_failed_output() {
        let llm = ScriptedLlm::new(&["Sure! Here is the score: 4", r#"{"score": 4.0}"#]);
        let parsed: Option<Probe> = structured_call(&llm, "system", "user".into(), 0.1)
            .await
            .unwrap();
        assert_eq!(parsed.unwrap().score, 4.0);

        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, REPAIR_SYSTEM);
        assert!(calls[1].1.contains("Here is the score"));
    }

    #[tokio::test]
    async fn test_double_parse_failure_degrades_to_none() {
        let llm = ScriptedLlm::new(&["not json", "still not json"]);
        let parsed: Option<Probe> = structured_call(&llm, "system", "user".into(), 0.1)
            .await
            .unwrap();
        assert!(parsed.is_none());
        // Exactly one repair attempt, never more.
        assert_eq!(llm.calls().len(), 2);
    }
}
