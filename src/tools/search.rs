//! Web search tool
//!
//! Provides web search via configurable providers (DuckDuckGo, Brave, Serper)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ApiKeys, SearchProviderKind};
use crate::{Error, Result};

/// A service that answers a query with ranked results
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Look up `query`, returning at most `max_results` results
    ///
    /// An empty vector means nothing was found.
    ///
    /// # Errors
    ///
    /// Returns error if the lookup fails
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// Search provider configuration
#[derive(Debug, Clone)]
pub enum SearchProvider {
    /// DuckDuckGo instant answer API (no key required)
    DuckDuckGo,
    /// Brave Search API
    Brave {
        /// API key for Brave Search
        api_key: String,
    },
    /// Serper (Google) Search API
    Serper {
        /// API key for Serper
        api_key: String,
    },
}

/// Web search tool
pub struct WebSearchTool {
    provider: SearchProvider,
    client: reqwest::Client,
}

/// Search result from web search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title
    pub title: String,
    /// Result URL
    pub url: String,
    /// Result body text
    pub body: String,
}

/// DuckDuckGo instant answer response
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DuckDuckGoResponse {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<DuckDuckGoTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DuckDuckGoTopic {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "FirstURL")]
    first_url: Option<String>,
}

/// Brave Search API response
#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    description: String,
}

/// Serper API response
#[derive(Debug, Deserialize)]
struct SerperSearchResponse {
    organic: Option<Vec<SerperResult>>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    title: String,
    link: String,
    snippet: String,
}

/// Serper API request body
#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

impl WebSearchTool {
    /// Create a new web search tool with DuckDuckGo
    #[must_use]
    pub fn new_duckduckgo() -> Self {
        Self {
            provider: SearchProvider::DuckDuckGo,
            client: reqwest::Client::new(),
        }
    }

    /// Create a new web search tool with Brave Search
    #[must_use]
    pub fn new_brave(api_key: String) -> Self {
        Self {
            provider: SearchProvider::Brave { api_key },
            client: reqwest::Client::new(),
        }
    }

    /// Create a new web search tool with Serper
    #[must_use]
    pub fn new_serper(api_key: String) -> Self {
        Self {
            provider: SearchProvider::Serper { api_key },
            client: reqwest::Client::new(),
        }
    }

    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider needs an API key that is not set
    pub fn from_config(kind: SearchProviderKind, keys: &ApiKeys) -> Result<Self> {
        match kind {
            SearchProviderKind::DuckDuckGo => Ok(Self::new_duckduckgo()),
            SearchProviderKind::Brave => keys
                .brave
                .clone()
                .map(Self::new_brave)
                .ok_or_else(|| {
                    Error::Config("BRAVE_API_KEY required for Brave search".to_string())
                }),
            SearchProviderKind::Serper => keys
                .serper
                .clone()
                .map(Self::new_serper)
                .ok_or_else(|| {
                    Error::Config("SERPER_API_KEY required for Serper search".to_string())
                }),
        }
    }

    /// The active provider
    #[must_use]
    pub const fn provider(&self) -> &SearchProvider {
        &self.provider
    }

    /// Search using the DuckDuckGo instant answer API
    async fn search_duckduckgo(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?;

        let response = response.error_for_status().map_err(Error::Http)?;

        // DuckDuckGo answers with content-type application/x-javascript
        let text = response.text().await?;
        let ddg: DuckDuckGoResponse = serde_json::from_str(&text)?;

        Ok(duckduckgo_results(ddg, limit))
    }

    /// Search using Brave Search API
    async fn search_brave(
        &self,
        api_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", &limit.to_string())])
            .send()
            .await?;

        let response = response.error_for_status().map_err(Error::Http)?;

        let brave_response: BraveSearchResponse = response.json().await?;

        let results = brave_response
            .web
            .map(|web| {
                web.results
                    .into_iter()
                    .take(limit)
                    .map(|r| SearchResult {
                        title: r.title,
                        url: r.url,
                        body: r.description,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }

    /// Search using Serper API
    async fn search_serper(
        &self,
        api_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let request_body = SerperRequest {
            q: query,
            num: limit,
        };

        let response = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", api_key)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let response = response.error_for_status().map_err(Error::Http)?;

        let serper_response: SerperSearchResponse = response.json().await?;

        let results = serper_response
            .organic
            .map(|organic| {
                organic
                    .into_iter()
                    .take(limit)
                    .map(|r| SearchResult {
                        title: r.title,
                        url: r.link,
                        body: r.snippet,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }
}

#[async_trait]
impl SearchService for WebSearchTool {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let limit = max_results.max(1);
        tracing::debug!(query, limit, "web search");

        match &self.provider {
            SearchProvider::DuckDuckGo => self.search_duckduckgo(query, limit).await,
            SearchProvider::Brave { api_key } => self.search_brave(api_key, query, limit).await,
            SearchProvider::Serper { api_key } => self.search_serper(api_key, query, limit).await,
        }
    }
}

/// Abstract first, then related topics that carry text
fn duckduckgo_results(response: DuckDuckGoResponse, limit: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    if !response.abstract_text.is_empty() {
        results.push(SearchResult {
            title: response.heading.clone(),
            url: response.abstract_url,
            body: response.abstract_text,
        });
    }

    results.extend(response.related_topics.into_iter().filter_map(|topic| {
        let text = topic.text.filter(|t| !t.is_empty())?;
        Some(SearchResult {
            title: response.heading.clone(),
            url: topic.first_url.unwrap_or_default(),
            body: text,
        })
    }));

    results.truncate(limit);
    results
}
