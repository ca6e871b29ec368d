// csrf_cache.rs - Time-bounded CSRF token cache
// Purpose: Resolve a login page's anti-forgery token once and reuse it while
//          it is fresh, so runs do not refetch the page for every attempt

use crate::http::{SessionSettings, build_session_client, pick_user_agent};
use crate::types::CsrfToken;
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

lazy_static! {
    static ref INPUT_SELECTOR: Selector = Selector::parse("input[name]").unwrap();
    static ref META_SELECTOR: Selector = Selector::parse("meta[name]").unwrap();
}

/// How to reach the login page when the cache has to fetch it
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agents: Vec<String>,
    pub session: SessionSettings,
}

struct CachedToken {
    token: CsrfToken,
    fetched_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

/// Login page URL -> token, each entry valid for `ttl`. Every URL has its own
/// lock, so a slow page only holds up callers waiting on that page.
pub struct CsrfCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Default for CsrfCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrfCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached token for `login_page_url` if still fresh, otherwise fetch the
    /// page and look for `field_name`. Fetch problems are logged and reported
    /// as "no token". The URL's lock is held across the fetch so concurrent
    /// callers for the same page share one request.
    pub async fn get_or_fetch(
        &self,
        login_page_url: &str,
        field_name: &str,
        settings: &FetchSettings,
    ) -> Option<CsrfToken> {
        let slot = self.slot(login_page_url).await;
        let mut entry = slot.lock().await;

        if let Some(ref cached) = *entry {
            if cached.fetched_at.elapsed() < self.ttl && cached.token.field_name == field_name {
                debug!(url = login_page_url, "CSRF token served from cache");
                return Some(cached.token.clone());
            }
        }
        *entry = None;

        let body = match fetch_page(login_page_url, settings).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = login_page_url, "Failed to fetch login page for CSRF token: {:#}", e);
                return None;
            }
        };

        match extract_token(&body, field_name) {
            Some(token) => {
                info!(url = login_page_url, field = field_name, "CSRF token resolved");
                *entry = Some(CachedToken {
                    token: token.clone(),
                    fetched_at: Instant::now(),
                });
                Some(token)
            }
            None => {
                warn!(url = login_page_url, field = field_name, "CSRF field not found on login page");
                None
            }
        }
    }

    async fn slot(&self, login_page_url: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(login_page_url.to_string()).or_default())
    }

    pub async fn invalidate(&self, login_page_url: &str) {
        let slot = self.slots.lock().await.get(login_page_url).cloned();
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }

    /// Number of cached tokens, fresh or not
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn fetch_page(url: &str, settings: &FetchSettings) -> Result<String> {
    let client = build_session_client(&settings.session)?;

    let mut request = client.get(url);
    if let Some(agent) = pick_user_agent(&settings.user_agents) {
        request = request.header(USER_AGENT, agent);
    }

    let response = request
        .send()
        .await
        .context("Failed to fetch login page")?
        .error_for_status()
        .context("Login page returned an error status")?;

    response.text().await.context("Failed to read login page body")
}

/// Find the value of the input named `field_name`, falling back to a
/// `<meta name=field_name content=...>` tag
pub fn extract_token(html: &str, field_name: &str) -> Option<CsrfToken> {
    let document = Html::parse_document(html);

    let from_input = document
        .select(&INPUT_SELECTOR)
        .find(|input| input.value().attr("name") == Some(field_name))
        .and_then(|input| input.value().attr("value"));

    let value = from_input.or_else(|| {
        document
            .select(&META_SELECTOR)
            .find(|meta| meta.value().attr("name") == Some(field_name))
            .and_then(|meta| meta.value().attr("content"))
    })?;

    Some(CsrfToken {
        field_name: field_name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_from_hidden_input() {
        let html = r#"
            <form method="post" action="/login">
                <input type="hidden" name="csrfmiddlewaretoken" value="tok-123" />
                <input type="text" name="username" />
                <input type="password" name="password" />
            </form>
        "#;

        let token = extract_token(html, "csrfmiddlewaretoken").unwrap();
        assert_eq!(token.field_name, "csrfmiddlewaretoken");
        assert_eq!(token.value, "tok-123");
    }

    #[test]
    fn test_extract_token_from_meta_tag() {
        let html = r#"<html><head><meta name="csrf-token" content="meta-456"></head><body></body></html>"#;

        let token = extract_token(html, "csrf-token").unwrap();
        assert_eq!(token.value, "meta-456");
    }

    #[test]
    fn test_extract_token_missing_field() {
        let html = r#"<form><input type="hidden" name="other" value="x" /></form>"#;
        assert!(extract_token(html, "_token").is_none());
    }
}
