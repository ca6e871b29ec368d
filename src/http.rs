// http.rs - Per-attempt HTTP sessions
// Purpose: Build isolated reqwest clients (own cookie jar, proxy, timeout)
//          and pick request headers shared by the executor and CSRF fetches

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const MAX_REDIRECTS: usize = 10;

/// Everything needed to open a fresh session against the target site
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cookies: BTreeMap<String, String>,
    /// URLs the seeded cookies are scoped to
    pub cookie_urls: Vec<Url>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// Build a client with its own cookie jar seeded from `settings.cookies`.
/// Every call returns an independent session.
pub fn build_session_client(settings: &SessionSettings) -> Result<Client> {
    let jar = Jar::default();
    for url in &settings.cookie_urls {
        for (name, value) in &settings.cookies {
            jar.add_cookie_str(&format!("{}={}; Path=/", name, value), url);
        }
    }

    let mut builder = Client::builder()
        .cookie_provider(Arc::new(jar))
        .timeout(settings.timeout)
        .redirect(Policy::limited(MAX_REDIRECTS));

    if let Some(ref proxy) = settings.proxy {
        builder = builder.proxy(Proxy::all(proxy.as_str()).context(format!("Invalid proxy: {}", proxy))?);
    }

    builder.build().context("Failed to build HTTP client")
}

/// Uniform random choice among the configured user agents
pub fn pick_user_agent(user_agents: &[String]) -> Option<String> {
    user_agents.choose(&mut rand::thread_rng()).cloned()
}

/// `scheme://host[:port]` of a URL, used as the Origin header
pub fn origin_of(url: &Url) -> Option<String> {
    match url.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}
