//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ragcache_core::embedding::EmbeddingProvider;
use ragcache_core::{fingerprint, Error, Result};

/// Deterministic provider that records every batch it is asked to embed.
pub struct MockProvider {
    model: String,
    dims: usize,
    calls: Mutex<Vec<Vec<String>>>,
    failing: AtomicBool,
    delay: Option<Duration>,
    fail_on_call: Option<usize>,
    wrong_dims: bool,
}

impl MockProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            model: "mock-embed".to_string(),
            dims,
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            delay: None,
            fail_on_call: None,
            wrong_dims: false,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the n-th call (zero-based), succeed otherwise.
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Return vectors one component short of the advertised dimension.
    pub fn with_wrong_dims(mut self) -> Self {
        self.wrong_dims = true;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The vector this provider returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        mock_vector(text, self.dims)
    }
}

/// Derive a stable vector in `[-1, 1]^dims` from the text fingerprint.
pub fn mock_vector(text: &str, dims: usize) -> Vec<f32> {
    let fp = fingerprint(text);
    fp.as_str()
        .as_bytes()
        .chunks(2)
        .cycle()
        .take(dims)
        .map(|pair| {
            let hex = std::str::from_utf8(pair).unwrap();
            let byte = u8::from_str_radix(hex, 16).unwrap();
            (byte as f32 / 255.0) * 2.0 - 1.0
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(texts.to_vec());
            calls.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) || self.fail_on_call == Some(call_index) {
            return Err(Error::provider("mock provider failure"));
        }
        let dims = if self.wrong_dims {
            self.dims - 1
        } else {
            self.dims
        };
        Ok(texts.iter().map(|t| mock_vector(t, dims)).collect())
    }
}
