// config.rs - Run configuration
// Purpose: Tool-wide defaults, the caller's run request and its resolution
//          into the read-only configuration a run executes with
// Features:
//  - Default heuristics, user agents and execution knobs
//  - Optional JSON defaults file
//  - Partial heuristic overrides merged over defaults
//  - "auto" heuristics accepted and resolved once per run

use crate::error::RunError;
use crate::http::SessionSettings;
use crate::types::{CredentialPair, align_pairs};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
];

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 500;

// ═══════════════════════════════════════════════════════════════════════════
// FORM METHOD
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormMethod {
    Get,
    Post,
}

impl FromStr for FormMethod {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(FormMethod::Get),
            "POST" => Ok(FormMethod::Post),
            other => Err(RunError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for FormMethod {
    type Error = RunError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FormMethod> for String {
    fn from(method: FormMethod) -> Self {
        method.to_string()
    }
}

impl fmt::Display for FormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormMethod::Get => f.write_str("GET"),
            FormMethod::Post => f.write_str("POST"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HEURISTICS
// ═══════════════════════════════════════════════════════════════════════════

/// Rules used by the classifier to recognise success and failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicSet {
    pub success_status_codes: BTreeSet<u16>,
    /// Header name -> substring expected in its value
    pub success_headers: BTreeMap<String, String>,
    /// Top-level JSON field -> expected value
    pub success_json: BTreeMap<String, serde_json::Value>,
    pub success_body_keywords: Vec<String>,
    pub failure_status_codes: BTreeSet<u16>,
    pub failure_body_keywords: Vec<String>,
}

impl Default for HeuristicSet {
    fn default() -> Self {
        Self {
            success_status_codes: [302].into_iter().collect(),
            success_headers: [("Set-Cookie".to_string(), "sessionid".to_string())]
                .into_iter()
                .collect(),
            success_json: [(
                "status".to_string(),
                serde_json::Value::String("success".to_string()),
            )]
            .into_iter()
            .collect(),
            success_body_keywords: to_strings(&[
                "dashboard",
                "logout",
                "profile",
                "welcome back",
                "logged in successfully",
                "authentication successful",
                "login successful",
            ]),
            failure_status_codes: [401, 403, 429].into_iter().collect(),
            failure_body_keywords: to_strings(&[
                "incorrect password",
                "invalid password",
                "login failed",
                "wrong credentials",
                "authentication failed",
                "access denied",
                "wrong user name",
                "wrong username",
                "invalid username",
                "account not activated",
                "user not found",
                "bad credentials",
                "sign in error",
                "login error",
                "invalid login",
            ]),
        }
    }
}

/// Per-run partial override; every unset field keeps the default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsOverride {
    pub success_status_codes: Option<BTreeSet<u16>>,
    pub success_headers: Option<BTreeMap<String, String>>,
    pub success_json: Option<BTreeMap<String, serde_json::Value>>,
    pub success_body_keywords: Option<Vec<String>>,
    pub failure_status_codes: Option<BTreeSet<u16>>,
    pub failure_body_keywords: Option<Vec<String>>,
}

impl HeuristicsOverride {
    pub fn merge_over(self, base: &HeuristicSet) -> HeuristicSet {
        HeuristicSet {
            success_status_codes: self
                .success_status_codes
                .unwrap_or_else(|| base.success_status_codes.clone()),
            success_headers: self
                .success_headers
                .unwrap_or_else(|| base.success_headers.clone()),
            success_json: self.success_json.unwrap_or_else(|| base.success_json.clone()),
            success_body_keywords: self
                .success_body_keywords
                .unwrap_or_else(|| base.success_body_keywords.clone()),
            failure_status_codes: self
                .failure_status_codes
                .unwrap_or_else(|| base.failure_status_codes.clone()),
            failure_body_keywords: self
                .failure_body_keywords
                .unwrap_or_else(|| base.failure_body_keywords.clone()),
        }
    }
}

/// Heuristics as written by the caller: the keyword "auto" or a partial set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeuristicsSetting {
    Keyword(String),
    Partial(HeuristicsOverride),
}

/// Heuristics after merging, before any automatic discovery
#[derive(Debug, Clone, PartialEq)]
pub enum HeuristicsMode {
    Fixed(HeuristicSet),
    Auto,
}

impl HeuristicsMode {
    fn from_setting(setting: Option<HeuristicsSetting>, base: &HeuristicSet) -> Result<Self, RunError> {
        match setting {
            None => Ok(HeuristicsMode::Fixed(base.clone())),
            Some(HeuristicsSetting::Partial(partial)) => Ok(HeuristicsMode::Fixed(partial.merge_over(base))),
            Some(HeuristicsSetting::Keyword(keyword)) => match keyword.trim().to_lowercase().as_str() {
                "auto" => Ok(HeuristicsMode::Auto),
                "default" | "manual" => Ok(HeuristicsMode::Fixed(base.clone())),
                other => Err(RunError::Malformed(format!(
                    "unknown heuristics mode '{}' (expected \"auto\" or an object)",
                    other
                ))),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TOOL DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

/// Process-wide defaults every run falls back to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDefaults {
    /// 0 disables rate limiting
    pub requests_per_minute: u32,
    pub user_agents: Vec<String>,
    pub proxy: Option<String>,
    pub heuristics: HeuristicSet,
    pub request_timeout_secs: u64,
    pub concurrency: usize,
    pub batch_pause_ms: u64,
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self {
            requests_per_minute: 0,
            user_agents: to_strings(DEFAULT_USER_AGENTS),
            proxy: None,
            heuristics: HeuristicSet::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            batch_pause_ms: DEFAULT_BATCH_PAUSE_MS,
        }
    }
}

impl ToolDefaults {
    /// Load defaults from a JSON file; missing keys keep their built-in value
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .context(format!("Failed to read defaults file: {}", path.display()))?;
        let mut defaults: ToolDefaults = serde_json::from_str(&raw)
            .context(format!("Failed to parse defaults file: {}", path.display()))?;

        if defaults.user_agents.is_empty() {
            defaults.user_agents = to_strings(DEFAULT_USER_AGENTS);
        }
        defaults.concurrency = defaults.concurrency.max(1);

        Ok(defaults)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RUN REQUEST (caller boundary)
// ═══════════════════════════════════════════════════════════════════════════

/// Optional per-run overrides nested under `config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOverrides {
    pub requests_per_minute: Option<u32>,
    pub user_agents: Option<Vec<String>>,
    pub proxy: Option<String>,
    pub heuristics: Option<HeuristicsSetting>,
    pub login_page_url: Option<String>,
    pub concurrency: Option<usize>,
    pub request_timeout_secs: Option<u64>,
}

/// A run request as received from the caller. Required fields are optional at
/// the type level so that their absence is reported by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    pub target_post_url: Option<String>,
    pub username_field_name: Option<String>,
    pub password_field_name: Option<String>,
    pub form_method: Option<String>,
    #[serde(alias = "username_list")]
    pub identifier_list: Option<Vec<String>>,
    #[serde(alias = "password_list")]
    pub secret_list: Option<Vec<String>>,
    pub csrf_token_name: Option<String>,
    pub csrf_token_value: Option<String>,
    pub cookies: Option<BTreeMap<String, String>>,
    pub config: Option<RunOverrides>,
}

/// Read-only configuration of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_url: Url,
    pub username_field: String,
    pub password_field: String,
    pub method: FormMethod,
    pub csrf_field_name: Option<String>,
    pub login_page_url: Url,
    pub initial_cookies: BTreeMap<String, String>,
    pub requests_per_minute: u32,
    pub user_agents: Vec<String>,
    pub proxy: Option<String>,
    pub heuristics: HeuristicSet,
    pub request_timeout: Duration,
    pub concurrency: usize,
    pub batch_pause: Duration,
}

impl RunConfig {
    /// Session parameters for a fresh client against this run's target
    pub fn session_settings(&self) -> SessionSettings {
        let mut cookie_urls = vec![self.target_url.clone()];
        if self.login_page_url.origin() != self.target_url.origin() {
            cookie_urls.push(self.login_page_url.clone());
        }

        SessionSettings {
            cookies: self.initial_cookies.clone(),
            cookie_urls,
            proxy: self.proxy.clone(),
            timeout: self.request_timeout,
        }
    }
}

/// A validated request: configuration, aligned pairs and the parts the
/// controller still has to resolve (heuristics mode, CSRF token)
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub config: RunConfig,
    pub heuristics: HeuristicsMode,
    pub pairs: Vec<CredentialPair>,
    pub supplied_csrf_value: Option<String>,
}

impl RunRequest {
    /// Validate the request and merge it over `defaults`. Nothing here touches
    /// the network.
    pub fn prepare(self, defaults: &ToolDefaults) -> Result<PreparedRun, RunError> {
        let target_raw = required_text(self.target_post_url, "target_post_url")?;
        let target_url = parse_http_url(&target_raw, "target_post_url")?;
        let username_field = required_text(self.username_field_name, "username_field_name")?;
        let password_field = required_text(self.password_field_name, "password_field_name")?;
        let method: FormMethod = required_text(self.form_method, "form_method")?.parse()?;

        let identifiers = self
            .identifier_list
            .ok_or(RunError::MissingField("identifier_list"))?;
        if identifiers.is_empty() {
            return Err(RunError::EmptyList("identifier_list"));
        }
        let secrets = self.secret_list.ok_or(RunError::MissingField("secret_list"))?;
        if secrets.is_empty() {
            return Err(RunError::EmptyList("secret_list"));
        }

        if identifiers.len() != secrets.len() {
            warn!(
                identifiers = identifiers.len(),
                secrets = secrets.len(),
                "List lengths differ, testing the first {} pairs",
                identifiers.len().min(secrets.len())
            );
        }
        let pairs = align_pairs(&identifiers, &secrets);
        if pairs.is_empty() {
            return Err(RunError::NoAttempts);
        }

        let overrides = self.config.unwrap_or_default();

        let login_page_url = match non_blank(overrides.login_page_url) {
            Some(raw) => parse_http_url(&raw, "login_page_url")?,
            None => target_url.clone(),
        };

        let proxy = non_blank(overrides.proxy).or_else(|| defaults.proxy.clone());
        if let Some(ref proxy_url) = proxy {
            reqwest::Proxy::all(proxy_url.as_str()).map_err(|e| RunError::InvalidProxy {
                proxy: proxy_url.clone(),
                reason: e.to_string(),
            })?;
        }

        let user_agents = overrides
            .user_agents
            .map(|agents| {
                agents
                    .into_iter()
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|agents| !agents.is_empty())
            .unwrap_or_else(|| defaults.user_agents.clone());

        let heuristics = HeuristicsMode::from_setting(overrides.heuristics, &defaults.heuristics)?;

        let config = RunConfig {
            target_url,
            username_field,
            password_field,
            method,
            csrf_field_name: non_blank(self.csrf_token_name),
            login_page_url,
            initial_cookies: self.cookies.unwrap_or_default(),
            requests_per_minute: overrides
                .requests_per_minute
                .unwrap_or(defaults.requests_per_minute),
            user_agents,
            proxy,
            heuristics: defaults.heuristics.clone(),
            request_timeout: Duration::from_secs(
                overrides
                    .request_timeout_secs
                    .unwrap_or(defaults.request_timeout_secs)
                    .max(1),
            ),
            concurrency: overrides.concurrency.unwrap_or(defaults.concurrency).max(1),
            batch_pause: Duration::from_millis(defaults.batch_pause_ms),
        };

        Ok(PreparedRun {
            config,
            heuristics,
            pairs,
            supplied_csrf_value: non_blank(self.csrf_token_value),
        })
    }
}

/// What the form-discovery collaborator reports about a login page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveredForm {
    pub post_url: String,
    pub form_method: String,
    pub username_field_name: String,
    pub password_field_name: String,
    pub csrf_token_name: Option<String>,
    pub csrf_token_value: Option<String>,
    pub cookies: BTreeMap<String, String>,
}

impl DiscoveredForm {
    /// Build a run request for this form. `page_url` is the page the form was
    /// discovered on and becomes the login page the CSRF token is fetched from.
    pub fn into_run_request(
        self,
        page_url: Option<String>,
        identifiers: Vec<String>,
        secrets: Vec<String>,
        overrides: RunOverrides,
    ) -> RunRequest {
        let mut config = overrides;
        if config.login_page_url.is_none() {
            config.login_page_url = page_url;
        }

        RunRequest {
            target_post_url: Some(self.post_url),
            username_field_name: Some(self.username_field_name),
            password_field_name: Some(self.password_field_name),
            form_method: Some(if self.form_method.is_empty() {
                "POST".to_string()
            } else {
                self.form_method
            }),
            identifier_list: Some(identifiers),
            secret_list: Some(secrets),
            csrf_token_name: self.csrf_token_name,
            csrf_token_value: self.csrf_token_value,
            cookies: Some(self.cookies),
            config: Some(config),
        }
    }
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, RunError> {
    non_blank(value).ok_or(RunError::MissingField(field))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_http_url(raw: &str, field: &'static str) -> Result<Url, RunError> {
    let url = Url::parse(raw).map_err(|e| RunError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RunError::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_request() -> RunRequest {
        RunRequest {
            target_post_url: Some("https://app.example.com/login".to_string()),
            username_field_name: Some("username".to_string()),
            password_field_name: Some("password".to_string()),
            form_method: Some("post".to_string()),
            identifier_list: Some(vec!["alice".to_string(), "bob".to_string()]),
            secret_list: Some(vec!["a1".to_string(), "b2".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_applies_defaults() {
        let prepared = base_request().prepare(&ToolDefaults::default()).unwrap();

        assert_eq!(prepared.pairs.len(), 2);
        assert_eq!(prepared.config.method, FormMethod::Post);
        assert_eq!(prepared.config.login_page_url, prepared.config.target_url);
        assert_eq!(prepared.config.requests_per_minute, 0);
        assert_eq!(prepared.config.user_agents.len(), DEFAULT_USER_AGENTS.len());
        assert_eq!(prepared.config.request_timeout, Duration::from_secs(10));
        assert_eq!(prepared.config.concurrency, 10);
        assert_eq!(prepared.heuristics, HeuristicsMode::Fixed(HeuristicSet::default()));
    }

    #[test]
    fn test_missing_and_empty_fields_are_rejected() {
        let mut request = base_request();
        request.username_field_name = None;
        assert_eq!(
            request.prepare(&ToolDefaults::default()).unwrap_err(),
            RunError::MissingField("username_field_name")
        );

        let mut request = base_request();
        request.identifier_list = Some(Vec::new());
        assert_eq!(
            request.prepare(&ToolDefaults::default()).unwrap_err(),
            RunError::EmptyList("identifier_list")
        );

        let mut request = base_request();
        request.form_method = Some("PUT".to_string());
        assert_eq!(
            request.prepare(&ToolDefaults::default()).unwrap_err(),
            RunError::UnsupportedMethod("PUT".to_string())
        );
    }

    #[test]
    fn test_invalid_target_url_is_rejected() {
        let mut request = base_request();
        request.target_post_url = Some("ftp://example.com/login".to_string());
        assert!(matches!(
            request.prepare(&ToolDefaults::default()),
            Err(RunError::InvalidUrl { field: "target_post_url", .. })
        ));
    }

    #[test]
    fn test_non_list_input_fails_to_deserialize() {
        let raw = json!({
            "target_post_url": "https://app.example.com/login",
            "username_list": "alice",
        });
        assert!(serde_json::from_value::<RunRequest>(raw).is_err());
    }

    #[test]
    fn test_aliases_and_partial_heuristics() {
        let raw = json!({
            "target_post_url": "https://app.example.com/login",
            "username_field_name": "email",
            "password_field_name": "pass",
            "form_method": "GET",
            "username_list": ["alice"],
            "password_list": ["secret"],
            "config": {
                "requests_per_minute": 30,
                "login_page_url": "https://app.example.com/signin",
                "heuristics": { "success_status_codes": [200, 302] }
            }
        });
        let request: RunRequest = serde_json::from_value(raw).unwrap();
        let prepared = request.prepare(&ToolDefaults::default()).unwrap();

        assert_eq!(prepared.config.method, FormMethod::Get);
        assert_eq!(prepared.config.requests_per_minute, 30);
        assert_eq!(prepared.config.login_page_url.path(), "/signin");

        match prepared.heuristics {
            HeuristicsMode::Fixed(set) => {
                assert!(set.success_status_codes.contains(&200));
                assert_eq!(set.failure_status_codes, HeuristicSet::default().failure_status_codes);
            }
            HeuristicsMode::Auto => panic!("expected fixed heuristics"),
        }
    }

    #[test]
    fn test_auto_heuristics_keyword() {
        let mut request = base_request();
        request.config = Some(RunOverrides {
            heuristics: Some(HeuristicsSetting::Keyword("auto".to_string())),
            ..Default::default()
        });
        let prepared = request.prepare(&ToolDefaults::default()).unwrap();
        assert_eq!(prepared.heuristics, HeuristicsMode::Auto);
    }

    #[test]
    fn test_empty_user_agent_override_falls_back() {
        let mut request = base_request();
        request.config = Some(RunOverrides {
            user_agents: Some(vec!["  ".to_string()]),
            ..Default::default()
        });
        let prepared = request.prepare(&ToolDefaults::default()).unwrap();
        assert_eq!(prepared.config.user_agents, to_strings(DEFAULT_USER_AGENTS));
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let mut request = base_request();
        request.config = Some(RunOverrides {
            proxy: Some("not a proxy url".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            request.prepare(&ToolDefaults::default()),
            Err(RunError::InvalidProxy { .. })
        ));
    }

    #[test]
    fn test_discovered_form_conversion() {
        let form = DiscoveredForm {
            post_url: "https://app.example.com/session".to_string(),
            form_method: String::new(),
            username_field_name: "user".to_string(),
            password_field_name: "pass".to_string(),
            csrf_token_name: Some("authenticity_token".to_string()),
            csrf_token_value: Some("abc".to_string()),
            cookies: [("sid".to_string(), "1".to_string())].into_iter().collect(),
        };

        let request = form.into_run_request(
            Some("https://app.example.com/login".to_string()),
            vec!["alice".to_string()],
            vec!["pw".to_string()],
            RunOverrides::default(),
        );
        let prepared = request.prepare(&ToolDefaults::default()).unwrap();

        assert_eq!(prepared.config.method, FormMethod::Post);
        assert_eq!(prepared.config.login_page_url.path(), "/login");
        assert_eq!(prepared.config.csrf_field_name.as_deref(), Some("authenticity_token"));
        assert_eq!(prepared.supplied_csrf_value.as_deref(), Some("abc"));
        assert_eq!(prepared.config.initial_cookies.get("sid").map(String::as_str), Some("1"));
    }
}
