//! Optional TTL cache for successful backend responses.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use moka::sync::Cache;

use super::transport::{ApiRequest, ApiResponse};

pub struct ResponseCache {
    inner: Cache<u64, ApiResponse>,
}

impl ResponseCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, request: &ApiRequest) -> Option<ApiResponse> {
        self.inner.get(&cache_key(request))
    }

    /// Stores 2xx responses only.
    pub fn put(&self, request: &ApiRequest, response: &ApiResponse) {
        if response.is_success() {
            self.inner.insert(cache_key(request), response.clone());
        }
    }
}

/// Method, URL and serialized body. Headers are excluded so rotating an API
/// key does not invalidate entries.
fn cache_key(request: &ApiRequest) -> u64 {
    let mut hasher = DefaultHasher::new();
    request.method.as_str().hash(&mut hasher);
    request.url.hash(&mut hasher);
    if let Some(body) = &request.body {
        body.to_string().hash(&mut hasher);
    }
    hasher.finish()
}
