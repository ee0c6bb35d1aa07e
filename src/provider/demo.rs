//! `DemoProvider`: test infrastructure for spec.md §8's URL-refresh and
//! segment-410 end-to-end scenarios. Real provider scraping trivia is
//! explicitly out of scope (spec.md §1); this is the only concrete
//! `Provider` impl in the crate.

use super::{Catalog, CatalogItem, CatalogOptions, ExtractHints, ExtractedStream, Provider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Hands back each URL in `urls` in order on successive `extract_stream_url`
/// calls, then repeats the last one -- enough to drive scenario 4 (a second
/// extraction observes a new URL after the refresh interval elapses).
pub struct DemoProvider {
    id: String,
    urls: Vec<String>,
    cursor: AtomicUsize,
    fail_next: Mutex<bool>,
}

impl DemoProvider {
    pub fn new(id: &str, urls: Vec<String>) -> Self {
        Self { id: id.to_string(), urls, cursor: AtomicUsize::new(0), fail_next: Mutex::new(false) }
    }

    /// Test hook: makes the next `extract_stream_url` call fail, simulating
    /// a transient extraction failure (the refresh timer should keep the old
    /// URL and retry next tick per spec.md §4.3).
    pub async fn fail_next_extraction(&self) {
        *self.fail_next.lock().await = true;
    }
}

#[async_trait]
impl Provider for DemoProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_catalog(&self, _options: &CatalogOptions) -> anyhow::Result<Catalog> {
        Ok(Catalog {
            items: vec![CatalogItem {
                id: "movie1".to_string(),
                title: "Demo Movie".to_string(),
                content_type: "movie".to_string(),
                poster: None,
            }],
        })
    }

    async fn extract_stream_url(
        &self,
        _content_id: &str,
        _content_type: &str,
        _hints: &ExtractHints,
    ) -> anyhow::Result<ExtractedStream> {
        {
            let mut fail = self.fail_next.lock().await;
            if *fail {
                *fail = false;
                anyhow::bail!("simulated extraction failure");
            }
        }

        let index = self.cursor.fetch_add(1, Ordering::AcqRel);
        let index = index.min(self.urls.len().saturating_sub(1));
        let url = self.urls.get(index).cloned().unwrap_or_default();
        Ok(ExtractedStream { url, headers: HashMap::new(), quality: None, alternates: Vec::new(), subtitles: Vec::new() })
    }

    fn proxy_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn m3u8_patterns(&self) -> Vec<String> {
        vec![".m3u8".to_string()]
    }

    fn exclude_patterns(&self) -> Vec<String> {
        vec!["/ads/".to_string()]
    }

    fn content_url(&self, id: &str, content_type: &str) -> String {
        format!("demo://{content_type}/{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successive_calls_advance_through_urls() {
        let provider = DemoProvider::new("demo", vec!["a".to_string(), "b".to_string()]);
        let hints = ExtractHints::default();
        let first = provider.extract_stream_url("x", "movie", &hints).await.unwrap();
        let second = provider.extract_stream_url("x", "movie", &hints).await.unwrap();
        let third = provider.extract_stream_url("x", "movie", &hints).await.unwrap();
        assert_eq!(first.url, "a");
        assert_eq!(second.url, "b");
        assert_eq!(third.url, "b");
    }
}
