//! Provider seams consumed by the retrieval loop.
//!
//! Search, fetch, rerank and LLM completion are external collaborators; the
//! loop only sees these request/response traits. The `stub` module offers
//! in-memory implementations for tests and offline replays.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::{Passage, TimeRange};

/// One hit returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Page retrieval outcome. `status` is absent for fetchers that do not expose it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub title: Option<String>,
    /// Raw markup when available; used for published-date extraction.
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RerankResponse {
    #[serde(default)]
    pub reranked_passages: Vec<Passage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub json_response: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
        time_range: Option<TimeRange>,
    ) -> anyhow::Result<Vec<RawResult>>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_url(&self, url: &str) -> anyhow::Result<FetchResponse>;
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        question: &str,
        passages: &[Passage],
        top_n: usize,
    ) -> anyhow::Result<RerankResponse>;
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        provider: &str,
        model: &str,
        messages: &[ChatMessage],
        config: &ModelConfig,
    ) -> anyhow::Result<ChatResponse>;
}

pub type DynSearchProvider = Arc<dyn SearchProvider>;
pub type DynPageFetcher = Arc<dyn PageFetcher>;
pub type DynReranker = Arc<dyn Reranker>;
pub type DynLlmClient = Arc<dyn LlmClient>;

pub mod stub {
    //! In-memory providers for tests and offline runs.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use dashmap::DashMap;
    use serde::Deserialize;

    use super::*;

    /// Canned search results keyed by query; unknown queries return `fallback`.
    #[derive(Default)]
    pub struct StaticSearch {
        results: DashMap<String, Vec<RawResult>>,
        fallback: Vec<RawResult>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl StaticSearch {
        pub fn new(fallback: Vec<RawResult>) -> Self {
            Self {
                fallback,
                ..Default::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn with_query(self, query: impl Into<String>, results: Vec<RawResult>) -> Self {
            self.results.insert(query.into(), results);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchProvider for StaticSearch {
        async fn search(
            &self,
            query: &str,
            k: usize,
            _time_range: Option<TimeRange>,
        ) -> anyhow::Result<Vec<RawResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("search backend unavailable"));
            }
            let hits = self
                .results
                .get(query)
                .map(|entry| entry.clone())
                .unwrap_or_else(|| self.fallback.clone());
            Ok(hits.into_iter().take(k).collect())
        }
    }

    /// Serves registered pages; unknown URLs yield a 404 with no text.
    #[derive(Default)]
    pub struct StaticFetcher {
        pages: DashMap<String, FetchResponse>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(self, page: FetchResponse) -> Self {
            self.pages.insert(page.url.clone(), page);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch_url(&self, url: &str) -> anyhow::Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .pages
                .get(url)
                .map(|entry| entry.clone())
                .unwrap_or_else(|| FetchResponse {
                    url: url.to_string(),
                    status: Some(404),
                    ..Default::default()
                }))
        }
    }

    /// Returns passages in their given order, optionally reversed or empty.
    #[derive(Debug, Clone, Copy, Default)]
    pub enum OrderReranker {
        #[default]
        Identity,
        Reverse,
        Empty,
        Failing,
    }

    #[async_trait]
    impl Reranker for OrderReranker {
        async fn rerank(
            &self,
            _question: &str,
            passages: &[Passage],
            _top_n: usize,
        ) -> anyhow::Result<RerankResponse> {
            let reranked_passages = match self {
                OrderReranker::Identity => passages.to_vec(),
                OrderReranker::Reverse => passages.iter().rev().cloned().collect(),
                OrderReranker::Empty => Vec::new(),
                OrderReranker::Failing => return Err(anyhow!("reranker timed out")),
            };
            Ok(RerankResponse { reranked_passages })
        }
    }

    /// Replies with a fixed completion, or errors when constructed with `None`.
    #[derive(Debug, Clone, Default)]
    pub struct CannedLlm {
        reply: Option<String>,
    }

    impl CannedLlm {
        pub fn new(reply: impl Into<String>) -> Self {
            Self {
                reply: Some(reply.into()),
            }
        }

        pub fn failing() -> Self {
            Self { reply: None }
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(
            &self,
            _provider: &str,
            _model: &str,
            _messages: &[ChatMessage],
            _config: &ModelConfig,
        ) -> anyhow::Result<ChatResponse> {
            let content = self
                .reply
                .clone()
                .ok_or_else(|| anyhow!("llm provider unavailable"))?;
            Ok(ChatResponse {
                choices: vec![ChatChoice {
                    message: ChatMessage {
                        role: "assistant".to_string(),
                        content,
                    },
                }],
            })
        }
    }

    /// Offline replay fixture: canned responses for every provider.
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ReplayFixture {
        #[serde(default)]
        pub search: HashMap<String, Vec<RawResult>>,
        #[serde(default)]
        pub search_fallback: Vec<RawResult>,
        #[serde(default)]
        pub pages: Vec<FetchResponse>,
        #[serde(default)]
        pub facets_reply: Option<String>,
    }

    impl ReplayFixture {
        pub fn search_provider(&self) -> StaticSearch {
            self.search.iter().fold(
                StaticSearch::new(self.search_fallback.clone()),
                |provider, (query, results)| provider.with_query(query.clone(), results.clone()),
            )
        }

        pub fn fetcher(&self) -> StaticFetcher {
            self.pages
                .iter()
                .cloned()
                .fold(StaticFetcher::new(), StaticFetcher::with_page)
        }

        pub fn llm(&self) -> CannedLlm {
            match &self.facets_reply {
                Some(reply) => CannedLlm::new(reply.clone()),
                None => CannedLlm::failing(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::*;
    use super::*;

    #[tokio::test]
    async fn static_search_respects_k_and_fallback() {
        let hit = |url: &str| RawResult {
            url: url.to_string(),
            title: None,
            snippet: None,
        };
        let search = StaticSearch::new(vec![hit("https://a.com"), hit("https://b.com")])
            .with_query("nvidia", vec![hit("https://nvidia.com")]);

        let known = search.search("nvidia", 12, None).await.unwrap();
        assert_eq!(known.len(), 1);
        let fallback = search.search("other", 1, None).await.unwrap();
        assert_eq!(fallback[0].url, "https://a.com");
        assert_eq!(search.calls(), 2);
    }

    #[tokio::test]
    async fn static_fetcher_returns_404_for_unknown_pages() {
        let fetcher = StaticFetcher::new();
        let response = fetcher.fetch_url("https://missing.test/").await.unwrap();
        assert_eq!(response.status, Some(404));
        assert!(response.text.is_none());
    }

    #[test]
    fn replay_fixture_parses_json() {
        let fixture: ReplayFixture = serde_json::from_str(
            r#"{
                "search": {"q": [{"url": "https://a.com", "title": "A"}]},
                "pages": [{"url": "https://a.com", "text": "hello", "status": 200}],
                "facets_reply": "{\"facets\":[]}"
            }"#,
        )
        .unwrap();
        assert_eq!(fixture.search["q"][0].title.as_deref(), Some("A"));
        assert_eq!(fixture.pages[0].status, Some(200));
    }
}
