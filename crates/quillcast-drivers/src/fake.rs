//! Deterministic in-memory drivers for tests and local runs.
//!
//! Each fake records the calls it receives and can be scripted to fail,
//! so pipeline and engine behavior can be exercised without any network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quillcast_core::Credentials;

use crate::error::DriverError;
use crate::knowledge::KnowledgeDriver;
use crate::llm::{Completion, EmbeddingDriver, FinishReason, GenerationParams, LlmDriver};
use crate::posting::{PostingDriver, Published};
use crate::safety::SafetyClassifier;

/// Scripted completion backend.
///
/// Responses queued with [`FakeLlm::push`] are returned first; once the
/// queue is empty every call succeeds with a text derived from the
/// prompt, so unscripted tests stay deterministic.
pub struct FakeLlm {
    scripted: Mutex<VecDeque<Result<Completion, DriverError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeLlm {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Makes every call take `delay` before resolving. Lets tests hold a
    /// call in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Result<Completion, DriverError>) {
        self.scripted.lock().push_back(response);
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(Completion {
            text: text.to_string(),
            token_usage: text.len() as u32,
            finish_reason: FinishReason::Stop,
        }));
    }

    /// Number of `complete` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmDriver for FakeLlm {
    fn name(&self) -> &str {
        "fake-llm"
    }

    async fn complete(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Completion, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(scripted) = self.scripted.lock().pop_front() {
            return scripted;
        }
        let text = format!("generated: {}", prompt.chars().take(40).collect::<String>());
        Ok(Completion {
            token_usage: text.len() as u32,
            text,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Deterministic embedder: a letter-frequency histogram, normalized.
/// Similar texts map to similar vectors, which is all the semantic
/// cache needs in tests.
pub struct FakeEmbedder {
    preset: Mutex<Vec<(String, Vec<f32>)>>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            preset: Mutex::new(Vec::new()),
        }
    }

    /// Pins the vector returned for an exact `text`.
    pub fn preset(&self, text: &str, vector: Vec<f32>) {
        self.preset.lock().push((text.to_string(), vector));
    }

    fn histogram(text: &str) -> Vec<f32> {
        let mut buckets = [0f32; 16];
        for b in text.bytes() {
            buckets[(b % 16) as usize] += 1.0;
        }
        let norm = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for b in &mut buckets {
                *b /= norm;
            }
        }
        buckets.to_vec()
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingDriver for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DriverError> {
        if let Some((_, vector)) = self.preset.lock().iter().find(|(t, _)| t == text) {
            return Ok(vector.clone());
        }
        Ok(Self::histogram(text))
    }
}

/// Recording posting backend with scripted failures.
pub struct FakePosting {
    scripted: Mutex<VecDeque<DriverError>>,
    published: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakePosting {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Makes every `publish` take `delay` before landing. Lets tests
    /// hold a publish in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a failure for the next `publish` call.
    pub fn fail_next(&self, error: DriverError) {
        self.scripted.lock().push_back(error);
    }

    /// `(external_id, text)` pairs published so far.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakePosting {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostingDriver for FakePosting {
    async fn publish(
        &self,
        _credentials: &Credentials,
        text: &str,
    ) -> Result<Published, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.scripted.lock().pop_front() {
            return Err(err);
        }
        let external_id = format!("ext-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.published
            .lock()
            .push((external_id.clone(), text.to_string()));
        Ok(Published { external_id })
    }

    async fn delete(
        &self,
        _credentials: &Credentials,
        external_id: &str,
    ) -> Result<(), DriverError> {
        let mut published = self.published.lock();
        let before = published.len();
        published.retain(|(id, _)| id != external_id);
        if published.len() == before {
            return Err(DriverError::NonRetryable(format!(
                "unknown external id {external_id}"
            )));
        }
        self.deleted.lock().push(external_id.to_string());
        Ok(())
    }
}

/// Static knowledge store with an availability switch.
pub struct FakeKnowledge {
    contexts: Mutex<Vec<(String, Vec<String>)>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl FakeKnowledge {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(Vec::new()),
            unavailable: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn insert(&self, handle: &str, snippets: Vec<String>) {
        self.contexts.lock().push((handle.to_string(), snippets));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Default for FakeKnowledge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeDriver for FakeKnowledge {
    async fn fetch_context(&self, handle: &str) -> Result<Vec<String>, DriverError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DriverError::Retryable("knowledge store unreachable".into()));
        }
        Ok(self
            .contexts
            .lock()
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, s)| s.clone())
            .unwrap_or_default())
    }
}

/// Keyword classifier: any flagged substring scores 1.0, everything else
/// scores 0.0.
pub struct FakeSafety {
    flagged: Vec<String>,
}

impl FakeSafety {
    pub fn permissive() -> Self {
        Self { flagged: Vec::new() }
    }

    pub fn flagging(words: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            flagged: words.into_iter().map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl SafetyClassifier for FakeSafety {
    async fn score(&self, text: &str) -> Result<f32, DriverError> {
        let lower = text.to_lowercase();
        if self.flagged.iter().any(|w| lower.contains(w.as_str())) {
            Ok(1.0)
        } else {
            Ok(0.0)
        }
    }
}
