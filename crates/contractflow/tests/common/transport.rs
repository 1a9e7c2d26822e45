//! In-process stand-in for the model backends.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use contractflow::client::{ApiRequest, ApiResponse, Transport};
use contractflow::TransportError;

type Responder = dyn Fn(&str, usize) -> Result<ApiResponse, TransportError> + Send + Sync;

/// Answers each request from a closure of (endpoint host, call index) and
/// records which hosts were called and when.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    calls: AtomicUsize,
    log: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl Fn(&str, usize) -> Result<ApiResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Every backend answers with the same record.
    pub fn always(content: &'static str) -> Arc<Self> {
        Self::new(move |host, _| Ok(reply_for(host, content)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let host = host_of(&request.url);
        self.log.lock().unwrap().push((host.clone(), Instant::now()));
        (self.responder)(&host, index)
    }
}

fn host_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
        .to_string()
}

/// A well-formed reply in the wire format the builder gives `host`.
pub fn reply_for(host: &str, content: &str) -> ApiResponse {
    if host == ANTHROPIC_HOST {
        anthropic_ok(content)
    } else {
        openai_ok(content)
    }
}

pub const DEEPSEEK_HOST: &str = "deepseek.test";
pub const ANTHROPIC_HOST: &str = "anthropic.test";
pub const OPENAI_HOST: &str = "openai.test";
pub const LITE_HOST: &str = "lite.test";

pub fn openai_ok(content: &str) -> ApiResponse {
    let body = serde_json::json!({
        "choices": [{ "message": { "content": content } }],
        "usage": { "prompt_tokens": 1000, "completion_tokens": 500 }
    });
    ApiResponse {
        status: 200,
        body: body.to_string(),
    }
}

pub fn anthropic_ok(content: &str) -> ApiResponse {
    let body = serde_json::json!({
        "content": [{ "type": "text", "text": content }],
        "usage": { "input_tokens": 2000, "output_tokens": 100 }
    });
    ApiResponse {
        status: 200,
        body: body.to_string(),
    }
}

pub fn status(code: u16) -> ApiResponse {
    ApiResponse {
        status: code,
        body: "service unavailable".to_string(),
    }
}
