//! Builder patterns and fixtures for creating test data programmatically.
//!
//! These builders allow creating complete configurations and sample
//! documents without repetitive boilerplate code.

#![allow(dead_code)]

use std::io::Cursor;

use lopdf::{dictionary, Document, Object, Stream};
use serde_json::{json, Value};

use contractflow::config::load_config_from_str;
use contractflow::Config;

use super::transport::{ANTHROPIC_HOST, DEEPSEEK_HOST, LITE_HOST, OPENAI_HOST};

/// Builder for creating `Config` instances over the four scripted backends.
pub struct ConfigBuilder {
    worker_count: usize,
    complexity_threshold: f64,
    fallback_enabled: bool,
    testing_mode: bool,
    rag_enabled: bool,
    max_retries: u32,
    initial_retry_delay_ms: u64,
    rate_limit: Option<(u32, f64)>,
    page_concurrency: usize,
}

impl ConfigBuilder {
    /// Create a new builder with sensible defaults for testing: no
    /// retries, no rate limit, no history routing.
    pub fn new() -> Self {
        Self {
            worker_count: 2,
            complexity_threshold: 0.7,
            fallback_enabled: true,
            testing_mode: false,
            rag_enabled: false,
            max_retries: 0,
            initial_retry_delay_ms: 10,
            rate_limit: None,
            page_concurrency: 2,
        }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn complexity_threshold(mut self, threshold: f64) -> Self {
        self.complexity_threshold = threshold;
        self
    }

    pub fn fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn testing_mode(mut self, enabled: bool) -> Self {
        self.testing_mode = enabled;
        self
    }

    pub fn rag_enabled(mut self, enabled: bool) -> Self {
        self.rag_enabled = enabled;
        self
    }

    pub fn retries(mut self, max_retries: u32, initial_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.initial_retry_delay_ms = initial_delay_ms;
        self
    }

    pub fn rate_limit(mut self, requests: u32, period_secs: f64) -> Self {
        self.rate_limit = Some((requests, period_secs));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut client = json!({
            "timeout_secs": 5,
            "max_connections": 8,
            "max_retries": self.max_retries,
            "initial_retry_delay_ms": self.initial_retry_delay_ms,
        });
        if let Some((requests, period_secs)) = self.rate_limit {
            client["rate_limit"] = json!({ "requests": requests, "period_secs": period_secs });
        }

        json!({
            "version": "1.0",
            "worker_count": self.worker_count,
            "client": client,
            "router": {
                "complexity_threshold": self.complexity_threshold,
                "fallback_enabled": self.fallback_enabled,
                "rag_enabled": self.rag_enabled,
                "rag_sample_size": 10,
                "testing_mode": self.testing_mode,
                "models": {
                    "default_worker": "deepseek-chat",
                    "expert_fallback": "claude-sonnet-4",
                    "reserve_channel": "gpt-4o",
                    "testing": "deepseek-lite"
                }
            },
            "backends": [
                backend("deepseek-chat", "openai", DEEPSEEK_HOST, "/v1/chat/completions", 1.0, 2.0),
                backend("claude-sonnet-4", "anthropic", ANTHROPIC_HOST, "/v1/messages", 3.0, 15.0),
                backend("gpt-4o", "openai", OPENAI_HOST, "/v1/chat/completions", 2.5, 10.0),
                backend("deepseek-lite", "openai", LITE_HOST, "/v1/chat/completions", 0.1, 0.2)
            ],
            "pipeline": {
                "page_concurrency": self.page_concurrency,
                "max_blocks_per_request": 100
            }
        })
    }

    /// Builds through the real loader so schema and validation rules apply.
    pub fn build(&self) -> Config {
        load_config_from_str(&self.to_json().to_string()).expect("Builder produced invalid config")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn backend(
    model: &str,
    format: &str,
    host: &str,
    path: &str,
    input_price: f64,
    output_price: f64,
) -> Value {
    json!({
        "model": model,
        "api_format": format,
        "endpoint": format!("https://{}{}", host, path),
        "api_key": format!("{}-key", model),
        "input_price_per_million": input_price,
        "output_price_per_million": output_price
    })
}

pub const CONTRACT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<contract>
    <title>Master Supply Agreement</title>
    <party role="supplier">Acme GmbH</party>
    <party role="customer">Beta Ltd</party>
    <effective_date>2024-03-01</effective_date>
    <expiration_date>2026-02-28</expiration_date>
    <clause heading="Delivery">Goods ship within thirty days of each purchase order.</clause>
</contract>"#;

/// Model output for a record that passes validation.
pub const COMPLETE_RECORD: &str = r#"{"document_type":"lease","title":"Office Lease","parties":[{"name":"Acme GmbH","role":"landlord"},{"name":"Beta Ltd","role":"tenant"}],"effective_date":"2024-01-01","expiration_date":"2028-12-31"}"#;

/// Model output that validation flags with a single finding.
pub const ONE_PARTY_RECORD: &str = r#"{"title":"Office Lease","parties":[{"name":"Acme GmbH"}],"effective_date":"2024-01-01"}"#;

/// A PDF with one text page per entry; empty entries give textless pages.
pub fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = if text.is_empty() {
            String::new()
        } else {
            format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", text)
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to write sample PDF");
    bytes
}

pub fn sample_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([230, 230, 230]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .expect("Failed to encode sample JPEG");
    bytes
}

pub fn sample_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("Failed to encode sample PNG");
    bytes
}
