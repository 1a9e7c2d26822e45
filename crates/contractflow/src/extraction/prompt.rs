//! Request payloads and reply parsing for the two backend dialects.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::client::{ApiRequest, ApiResponse};
use crate::config::{ApiFormat, BackendConfig};
use crate::processor::{Block, BlockKind};

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You extract structured data from contracts. \
Reply with a single JSON object and nothing else, using these keys: \
document_type, title, parties (array of {name, role}), effective_date and \
expiration_date (YYYY-MM-DD), total_value ({amount, currency}), clauses \
(array of {heading, text}), fields (object of any other notable terms). \
Use null for anything the document does not state.";

/// Text and token usage of one model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Renders blocks as the user message, one block per paragraph with its
/// page and kind. Blocks past `max_blocks` are dropped.
pub fn render_blocks(blocks: &[Block], max_blocks: usize) -> String {
    let mut out = String::new();
    for block in blocks.iter().take(max_blocks.max(1)) {
        let Some(text) = block.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        let kind = match block.kind {
            BlockKind::Heading => "heading",
            BlockKind::Paragraph => "text",
            BlockKind::Table => "table",
        };
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("[page {} {}]\n{}", block.page, kind, text.trim()));
    }
    if blocks.len() > max_blocks.max(1) {
        tracing::warn!(
            blocks = blocks.len(),
            max_blocks,
            "Document truncated for extraction"
        );
    }
    out
}

/// Builds the extraction call for `backend`. Fails only when the API key
/// cannot be carried in a header.
pub fn build_request(
    backend: &BackendConfig,
    api_key: Option<&SecretString>,
    document: &str,
) -> Result<ApiRequest, String> {
    let mut headers = HeaderMap::new();

    let body = match backend.api_format {
        ApiFormat::Openai => {
            if let Some(key) = api_key {
                headers.insert(
                    AUTHORIZATION,
                    sensitive(&format!("Bearer {}", key.expose_secret()))?,
                );
            }
            json!({
                "model": backend.model,
                "temperature": 0,
                "max_tokens": backend.max_output_tokens,
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": document },
                ],
            })
        }
        ApiFormat::Anthropic => {
            if let Some(key) = api_key {
                headers.insert("x-api-key", sensitive(key.expose_secret())?);
            }
            headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
            json!({
                "model": backend.model,
                "temperature": 0,
                "max_tokens": backend.max_output_tokens,
                "system": SYSTEM_PROMPT,
                "messages": [
                    { "role": "user", "content": document },
                ],
            })
        }
    };

    Ok(ApiRequest::post_json(&backend.endpoint, body).with_headers(headers))
}

fn sensitive(value: &str) -> Result<HeaderValue, String> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| "API key contains characters not allowed in an HTTP header".to_string())?;
    header.set_sensitive(true);
    Ok(header)
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Reads the reply text and token usage. Non-2xx statuses and bodies
/// without any text are failures.
pub fn parse_reply(format: ApiFormat, response: &ApiResponse) -> Result<ModelReply, String> {
    if !response.is_success() {
        let snippet: String = response.body.chars().take(200).collect();
        return Err(format!("HTTP {}: {}", response.status, snippet.trim()));
    }

    let reply = match format {
        ApiFormat::Openai => {
            let parsed: ChatCompletion = response
                .json()
                .map_err(|e| format!("Unexpected response body: {}", e))?;
            let usage = parsed.usage.unwrap_or(ChatUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
            });
            ModelReply {
                content: parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default(),
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }
        }
        ApiFormat::Anthropic => {
            let parsed: MessagesResponse = response
                .json()
                .map_err(|e| format!("Unexpected response body: {}", e))?;
            let usage = parsed.usage.unwrap_or(MessagesUsage {
                input_tokens: 0,
                output_tokens: 0,
            });
            ModelReply {
                content: parsed
                    .content
                    .into_iter()
                    .filter(|block| block.kind == "text")
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join(""),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            }
        }
    };

    if reply.content.trim().is_empty() {
        return Err("Model returned no content".to_string());
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(format: ApiFormat) -> BackendConfig {
        BackendConfig {
            model: "model-x".to_string(),
            api_format: format,
            endpoint: "https://api.test/v1/endpoint".to_string(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: None,
            input_price_per_million: 0.0,
            output_price_per_million: 0.0,
            max_output_tokens: 2048,
        }
    }

    fn block(page: u32, kind: BlockKind, text: &str) -> Block {
        Block {
            page,
            kind,
            bbox: None,
            text: Some(text.to_string()),
        }
    }

    #[test]
    fn test_render_blocks() {
        let blocks = vec![
            block(1, BlockKind::Heading, "LEASE"),
            block(1, BlockKind::Paragraph, "  "),
            block(2, BlockKind::Table, "Rent  100"),
        ];
        assert_eq!(
            render_blocks(&blocks, 10),
            "[page 1 heading]\nLEASE\n\n[page 2 table]\nRent  100"
        );
        assert_eq!(render_blocks(&blocks, 1), "[page 1 heading]\nLEASE");
    }

    #[test]
    fn test_openai_request() {
        let key = SecretString::from("sk-test");
        let request = build_request(&backend(ApiFormat::Openai), Some(&key), "doc").unwrap();

        assert_eq!(request.url, "https://api.test/v1/endpoint");
        let auth = request.headers.get(AUTHORIZATION).unwrap();
        assert!(auth.is_sensitive());
        assert_eq!(auth.to_str().unwrap(), "Bearer sk-test");

        let body = request.body.unwrap();
        assert_eq!(body["model"], "model-x");
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["messages"][1]["content"], "doc");
    }

    #[test]
    fn test_anthropic_request() {
        let key = SecretString::from("ak-test");
        let request = build_request(&backend(ApiFormat::Anthropic), Some(&key), "doc").unwrap();

        assert!(request.headers.get("x-api-key").unwrap().is_sensitive());
        assert_eq!(request.headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert!(request.headers.get(AUTHORIZATION).is_none());
        let body = request.body.unwrap();
        assert_eq!(body["messages"][0]["content"], "doc");
        assert!(body["system"].is_string());
    }

    #[test]
    fn test_no_key_no_auth_header() {
        let request = build_request(&backend(ApiFormat::Openai), None, "doc").unwrap();
        assert!(request.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_invalid_key_rejected() {
        let key = SecretString::from("bad\nkey");
        assert!(build_request(&backend(ApiFormat::Openai), Some(&key), "doc").is_err());
    }

    #[test]
    fn test_parse_openai_reply() {
        let response = ApiResponse {
            status: 200,
            body: r#"{"choices":[{"message":{"role":"assistant","content":"{\"title\":\"NDA\"}"}}],"usage":{"prompt_tokens":120,"completion_tokens":30}}"#.to_string(),
        };
        let reply = parse_reply(ApiFormat::Openai, &response).unwrap();
        assert_eq!(reply.content, r#"{"title":"NDA"}"#);
        assert_eq!(reply.input_tokens, 120);
        assert_eq!(reply.output_tokens, 30);
    }

    #[test]
    fn test_parse_anthropic_reply() {
        let response = ApiResponse {
            status: 200,
            body: r#"{"content":[{"type":"text","text":"{\"title\":"},{"type":"text","text":"\"NDA\"}"}],"usage":{"input_tokens":90,"output_tokens":12}}"#.to_string(),
        };
        let reply = parse_reply(ApiFormat::Anthropic, &response).unwrap();
        assert_eq!(reply.content, r#"{"title":"NDA"}"#);
        assert_eq!(reply.input_tokens, 90);
    }

    #[test]
    fn test_parse_error_status() {
        let response = ApiResponse {
            status: 529,
            body: "overloaded".to_string(),
        };
        let err = parse_reply(ApiFormat::Anthropic, &response).unwrap_err();
        assert_eq!(err, "HTTP 529: overloaded");
    }

    #[test]
    fn test_parse_empty_content() {
        let response = ApiResponse {
            status: 200,
            body: r#"{"choices":[{"message":{"content":null}}]}"#.to_string(),
        };
        assert!(parse_reply(ApiFormat::Openai, &response).is_err());
    }
}
