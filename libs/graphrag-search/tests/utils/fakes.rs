use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use graphrag_search::error::LLMError;
use graphrag_search::llm::base::{Completer, LLMParams, MessageType, SearchPhase};
use graphrag_search::vector_stores::vector_store::{VectorIndex, VectorStoreSearchResult};

type Handler = Box<dyn Fn(SearchPhase, &str, &str) -> anyhow::Result<String> + Send + Sync>;

/// Completer answering from a closure over (phase, system prompt, user
/// prompt), recording calls and peak concurrency.
pub struct ScriptedCompleter {
    handler: Handler,
    delay: Duration,
    slow: Option<(String, Duration)>,
    calls: Mutex<HashMap<SearchPhase, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCompleter {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(SearchPhase, &str, &str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        ScriptedCompleter {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            slow: None,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// One key point per map call, a scored drift answer, no follow-ups, and
    /// "final answer" for everything else.
    pub fn answering() -> Self {
        ScriptedCompleter::new(|phase, _, _| {
            Ok(match phase {
                SearchPhase::Map => r#"{"points": [{"description": "A relevant point", "score": 70}]}"#.to_string(),
                SearchPhase::DriftAnswer => r#"{"response": "drift answer", "score": 60}"#.to_string(),
                SearchPhase::DriftFollowup => r#"{"follow_up_queries": []}"#.to_string(),
                _ => "final answer".to_string(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls whose system prompt contains `marker` sleep for `delay`.
    pub fn with_slow_marker(mut self, marker: &str, delay: Duration) -> Self {
        self.slow = Some((marker.to_string(), delay));
        self
    }

    pub fn calls(&self, phase: SearchPhase) -> usize {
        self.calls.lock().unwrap().get(&phase).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(
        &self,
        messages: MessageType,
        _llm_params: LLMParams,
        search_phase: Option<SearchPhase>,
    ) -> anyhow::Result<String> {
        let phase = search_phase.unwrap_or(SearchPhase::Local);
        *self.calls.lock().unwrap().entry(phase).or_insert(0) += 1;

        let parts = messages.text_parts();
        let system = parts.first().copied().unwrap_or("").to_string();
        let user = parts.get(1).copied().unwrap_or("").to_string();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let mut delay = self.delay;
        if let Some((marker, slow_delay)) = &self.slow {
            if system.contains(marker.as_str()) {
                delay = *slow_delay;
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let response = (self.handler)(phase, &system, &user);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

pub fn permanent_failure(reason: &str) -> anyhow::Error {
    LLMError::Permanent(reason.to_string()).into()
}

/// Returns the same hits for every query, or fails.
pub struct FixedVectorIndex {
    hits: Vec<VectorStoreSearchResult>,
    fail: bool,
    calls: AtomicUsize,
}

impl FixedVectorIndex {
    pub fn new(hits: &[(&str, f64)]) -> Self {
        FixedVectorIndex {
            hits: hits
                .iter()
                .map(|(id, score)| VectorStoreSearchResult {
                    id: id.to_string(),
                    score: *score,
                })
                .collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        FixedVectorIndex {
            hits: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FixedVectorIndex {
    async fn similarity_search_by_text(&self, _text: &str, k: usize) -> anyhow::Result<Vec<VectorStoreSearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("vector index unavailable");
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}
