// executor.rs - Single login attempt
// Purpose: Submit one credential pair to the login endpoint and classify
//          whatever comes back
// Features:
//  - GET (query string) or POST (form body) payloads
//  - CSRF token injection
//  - Random user agent, Origin and Referer headers
//  - Isolated cookie jar per attempt
//  - Transport failures reported as `error` results, never propagated

use crate::classifier::{ResponseSnapshot, classify};
use crate::config::{FormMethod, RunConfig};
use crate::http::{build_session_client, origin_of, pick_user_agent};
use crate::rate_limiter::RateLimiter;
use crate::types::{AttemptResult, CredentialPair, CsrfToken};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::header::{ORIGIN, REFERER, USER_AGENT};
use std::sync::Arc;
use tracing::debug;

/// Anything that can turn a credential pair into a result. The scheduler only
/// sees this trait, which keeps it testable without a network.
pub trait AttemptRunner: Send + Sync + 'static {
    fn run(&self, pair: CredentialPair) -> BoxFuture<'static, AttemptResult>;
}

/// Executes attempts for one run. Cheap to clone; every clone shares the run's
/// configuration and rate limiter.
#[derive(Clone)]
pub struct AttemptExecutor {
    config: Arc<RunConfig>,
    limiter: Arc<RateLimiter>,
    csrf: Option<CsrfToken>,
}

impl AttemptExecutor {
    pub fn new(config: Arc<RunConfig>, limiter: Arc<RateLimiter>, csrf: Option<CsrfToken>) -> Self {
        Self { config, limiter, csrf }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Form fields submitted for `pair`
    pub fn payload(&self, pair: &CredentialPair) -> Vec<(String, String)> {
        let mut payload = vec![
            (self.config.username_field.clone(), pair.identifier.clone()),
            (self.config.password_field.clone(), pair.secret.clone()),
        ];
        if let Some(ref token) = self.csrf {
            payload.push((token.field_name.clone(), token.value.clone()));
        }
        payload
    }

    pub async fn execute(&self, pair: &CredentialPair) -> AttemptResult {
        match self.submit(pair).await {
            Ok(snapshot) => {
                let verdict = classify(&snapshot, &self.config.heuristics, self.config.login_page_url.as_str());
                debug!(
                    identifier = %pair.identifier,
                    secret = %pair.masked_secret(),
                    status = %verdict.status,
                    stage = verdict.stage,
                    http_status = snapshot.status,
                    "Attempt classified"
                );

                AttemptResult::classified(
                    pair,
                    verdict.status,
                    snapshot.status,
                    snapshot.final_url,
                    snapshot.body.len(),
                    verdict.evidence,
                )
            }
            Err(e) => {
                let message = self.describe_failure(&e);
                debug!(
                    identifier = %pair.identifier,
                    secret = %pair.masked_secret(),
                    "Attempt failed: {}",
                    message
                );
                AttemptResult::errored(pair, message)
            }
        }
    }

    async fn submit(&self, pair: &CredentialPair) -> Result<ResponseSnapshot> {
        let client = build_session_client(&self.config.session_settings())?;
        let payload = self.payload(pair);

        let mut request = match self.config.method {
            FormMethod::Get => client.get(self.config.target_url.clone()).query(&payload),
            FormMethod::Post => client.post(self.config.target_url.clone()).form(&payload),
        };

        if let Some(agent) = pick_user_agent(&self.config.user_agents) {
            request = request.header(USER_AGENT, agent);
        }
        if let Some(origin) = origin_of(&self.config.target_url) {
            request = request.header(ORIGIN, origin);
        }
        request = request.header(REFERER, self.config.target_url.as_str());

        self.limiter.acquire().await;

        let response = request.send().await.context("Request failed")?;
        capture(response).await.context("Failed to read response body")
    }

    fn describe_failure(&self, err: &anyhow::Error) -> String {
        match err.downcast_ref::<reqwest::Error>() {
            Some(e) if e.is_timeout() => format!(
                "Request timed out after {}s",
                self.config.request_timeout.as_secs()
            ),
            Some(e) if e.is_connect() => format!("Connection failed: {}", e),
            Some(e) if e.is_redirect() => format!("Too many redirects: {}", e),
            Some(e) => format!("Request error: {}", e),
            None => format!("Request error: {:#}", err),
        }
    }
}

impl AttemptRunner for AttemptExecutor {
    fn run(&self, pair: CredentialPair) -> BoxFuture<'static, AttemptResult> {
        let executor = self.clone();
        Box::pin(async move { executor.execute(&pair).await })
    }
}

/// Copy what the classifier needs out of a response
pub async fn capture(response: reqwest::Response) -> reqwest::Result<ResponseSnapshot> {
    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response.text().await?;

    Ok(ResponseSnapshot {
        status,
        final_url,
        headers,
        body,
    })
}
