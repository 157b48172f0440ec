//! Web scrape fallback for topics with no local source material.
//!
//! When ingestion is handed a bare topic instead of files, this module
//! pulls open-access reference articles so segment grounding rests on
//! real material rather than the topic string alone. [`TopicSource`] is
//! the seam; [`WikipediaSource`] implements it against the MediaWiki
//! query API (search, then a plain-text intro extract per hit). Scrape
//! failures are recoverable: the caller falls back to a topic seed
//! document and records a warning.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// One article pulled from a remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedArticle {
    pub title: String,
    pub url: String,
    pub text: String,
}

/// Remote material provider for a topic.
#[async_trait]
pub trait TopicSource: Send + Sync {
    async fn fetch(&self, topic: &str, max_articles: usize) -> Result<Vec<ScrapedArticle>>;
}

const DEFAULT_API_URL: &str = "https://en.wikipedia.org/w/api.php";
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Intro extracts are capped so one encyclopedic article cannot dominate
/// the knowledge base.
const MAX_EXTRACT_CHARS: usize = 5000;

/// Article source backed by the MediaWiki query API.
pub struct WikipediaSource {
    client: reqwest::Client,
    api_url: String,
}

impl WikipediaSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("tutor-harness/0.1 (educational retrieval)")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
        })
    }

    async fn search_titles(&self, topic: &str, limit: usize) -> Result<Vec<String>> {
        let limit = limit.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("list", "search"),
                ("srsearch", topic),
                ("srlimit", limit.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Article search failed for \"{}\"", topic))?
            .error_for_status()?;

        let json: serde_json::Value = response.json().await?;
        Ok(parse_search_titles(&json))
    }

    async fn fetch_extract(&self, title: &str) -> Result<Option<ScrapedArticle>> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("titles", title),
                ("prop", "extracts|info"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("inprop", "url"),
            ])
            .send()
            .await
            .with_context(|| format!("Extract request failed for \"{}\"", title))?
            .error_for_status()?;

        let json: serde_json::Value = response.json().await?;
        Ok(parse_extract(&json))
    }
}

#[async_trait]
impl TopicSource for WikipediaSource {
    async fn fetch(&self, topic: &str, max_articles: usize) -> Result<Vec<ScrapedArticle>> {
        if max_articles == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch titles so pages without a usable extract still leave
        // enough candidates.
        let titles = self.search_titles(topic, max_articles * 2).await?;
        let mut articles = Vec::new();
        for title in titles {
            if articles.len() >= max_articles {
                break;
            }
            match self.fetch_extract(&title).await {
                Ok(Some(article)) => articles.push(article),
                Ok(None) => {}
                Err(e) => {
                    warn!(title = %title, error = %e, "skipping article");
                }
            }
        }
        info!(topic = %topic, articles = articles.len(), "topic scrape complete");
        Ok(articles)
    }
}

fn parse_search_titles(json: &serde_json::Value) -> Vec<String> {
    json.pointer("/query/search")
        .and_then(|s| s.as_array())
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r.get("title").and_then(|t| t.as_str()))
                .map(|t| t.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Pull the first valid page out of an extract response. Missing pages
/// come back under the page id `-1`; pages without text are dropped.
fn parse_extract(json: &serde_json::Value) -> Option<ScrapedArticle> {
    let pages = json.pointer("/query/pages")?.as_object()?;
    for (page_id, page) in pages {
        if page_id == "-1" {
            continue;
        }
        let Some(raw) = page.get("extract").and_then(|e| e.as_str()) else {
            continue;
        };
        let text: String = raw.chars().take(MAX_EXTRACT_CHARS).collect();
        if text.trim().is_empty() {
            continue;
        }
        let Some(title) = page.get("title").and_then(|t| t.as_str()) else {
            continue;
        };
        let title = title.to_string();
        let url = page
            .get("fullurl")
            .and_then(|u| u.as_str())
            .map(|u| u.to_string())
            .unwrap_or_else(|| {
                format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_"))
            });
        return Some(ScrapedArticle { title, url, text });
    }
    None
}
