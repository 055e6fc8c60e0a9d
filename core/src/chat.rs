//! Remote chat primitive.
//!
//! Unlike the scoped capabilities, chat is gated solely on the presence of a
//! configured endpoint. The endpoint speaks the chat-completions wire shape:
//! a single user message in, the assistant message text out. The classified
//! overload unwraps, submits, and rewraps so the reply stays tainted.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::capability::SandboxContext;
use crate::classified::Classified;
use crate::config::ChatEndpoint;
use crate::error::Result;
use crate::error::SafeExecErr;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Completions can take a while; this bounds the whole request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Submit `text` as a single user message and return the assistant reply.
pub fn chat(ctx: &Arc<SandboxContext>, text: &str) -> Result<String> {
    ctx.check_effects_allowed()?;
    let endpoint = ctx.chat.as_ref().ok_or(SafeExecErr::ChatNotConfigured)?;
    send_chat(endpoint, text)
}

/// Classified overload: the secret never surfaces outside the wrapper.
pub fn chat_classified(
    ctx: &Arc<SandboxContext>,
    text: Classified<String>,
) -> Result<Classified<String>> {
    ctx.check_effects_allowed()?;
    let endpoint = ctx.chat.as_ref().ok_or(SafeExecErr::ChatNotConfigured)?;
    let reply = send_chat(endpoint, &text.into_inner())?;
    Ok(Classified::new(reply))
}

fn send_chat(endpoint: &ChatEndpoint, text: &str) -> Result<String> {
    let base_url = endpoint.base_url.trim_end_matches('/');
    let url = format!("{base_url}/chat/completions");
    let payload = json!({
        "model": endpoint.model,
        "messages": [{"role": "user", "content": text}],
        "stream": false,
    });

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    let response = client
        .post(url)
        .bearer_auth(&endpoint.api_key)
        .json(&payload)
        .send()?;

    let status = response.status();
    let body: serde_json::Value = response.json()?;
    if !status.is_success() {
        return Err(SafeExecErr::ChatResponse(format!(
            "unexpected status {status}: {body}"
        )));
    }
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            SafeExecErr::ChatResponse("response carried no assistant message".to_string())
        })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::Config;

    fn context_without_chat() -> Arc<SandboxContext> {
        SandboxContext::new(&Config {
            record_dir: None,
            strict_mode: false,
            classified_paths: Vec::new(),
            chat: None,
            quiet: false,
            wrap_code: true,
            sessions_enabled: true,
        })
    }

    #[test]
    fn unconfigured_chat_mentions_not_configured() {
        let ctx = context_without_chat();
        let err = chat(&ctx, "hello").unwrap_err();
        assert!(err.script_message().contains("not configured"));
    }

    #[test]
    fn unconfigured_classified_chat_fails_the_same_way() {
        let ctx = context_without_chat();
        let err = chat_classified(&ctx, Classified::new("hello".to_string())).unwrap_err();
        assert!(matches!(err, SafeExecErr::ChatNotConfigured));
    }
}
