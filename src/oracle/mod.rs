//! Text-completion oracle used for classification, clustering and
//! translation.
//!
//! # Architecture
//!
//! - [`Oracle`]: one prompt in, free-form text out
//! - [`ChatCompletionsOracle`]: OpenAI-compatible `/chat/completions` client
//!
//! A failed call is reported to the caller once, never repeated in place;
//! the affected articles are picked up again on the next cycle.
//!
//! Replies are expected to carry a JSON object but models like to wrap it in
//! markdown fences or prose. [`extract_json_object`] pulls out the first
//! balanced `{...}` span and [`parse_json_reply`] deserializes it.

mod chat;

pub use chat::ChatCompletionsOracle;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: Option<f32>,
    /// Ask the backend for a strict JSON object reply.
    pub json_mode: bool,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, request: &OracleRequest) -> Result<String>;
}

/// Locate the first balanced JSON object in `text`.
///
/// Braces inside string literals (including escaped quotes) do not count
/// toward nesting.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deserialize the first JSON object found in an oracle reply.
///
/// A reply that opens an object but never closes it is reported as
/// truncated, which usually means the model hit its token limit.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    if let Some(span) = extract_json_object(reply) {
        return Ok(serde_json::from_str(span)?);
    }
    if let Some(start) = reply.find('{') {
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&reply[start..]) {
            if crate::utils::looks_truncated(&e) {
                return Err(Error::Oracle(format!(
                    "reply truncated mid-object: {}",
                    crate::utils::truncate_for_log(reply, 200)
                )));
            }
        }
    }
    Err(Error::Oracle(format!(
        "no JSON object in reply: {}",
        crate::utils::truncate_for_log(reply, 200)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn plain_object() {
        assert_eq!(extract_json_object(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn fenced_and_prefixed() {
        let reply = "Sure! Here you go:\n```json\n{\"irrelevant\": [1, 2], \"reasoning\": \"ads\"}\n```\nAnything else?";
        assert_eq!(
            extract_json_object(reply),
            Some("{\"irrelevant\": [1, 2], \"reasoning\": \"ads\"}")
        );
    }

    #[test]
    fn braces_inside_strings() {
        let reply = r#"x {"t": "a } b { \" }", "n": {"m": 1}} trailing {"#;
        assert_eq!(
            extract_json_object(reply),
            Some(r#"{"t": "a } b { \" }", "n": {"m": 1}}"#)
        );
    }

    #[test]
    fn unbalanced_is_none() {
        assert_eq!(extract_json_object("{\"a\": {"), None);
        assert_eq!(extract_json_object("no json"), None);
    }

    #[derive(Debug, Deserialize)]
    struct Verdict {
        irrelevant: Vec<usize>,
    }

    #[test]
    fn parse_reply_into_struct() {
        let v: Verdict = parse_json_reply("```{\"irrelevant\":[3]}```").unwrap();
        assert_eq!(v.irrelevant, vec![3]);
        assert!(parse_json_reply::<Verdict>("nothing").is_err());
        assert!(parse_json_reply::<Verdict>("{\"irrelevant\": \"x\"}").is_err());
    }

    #[test]
    fn cut_off_reply_is_reported_as_truncated() {
        let err = parse_json_reply::<Verdict>("```json\n{\"irrelevant\": [1, 2").unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
