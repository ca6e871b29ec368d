// classifier.rs - Login response classification
// Purpose: Turn the response to a login attempt into one status with evidence
// Pipeline (first stage with a verdict wins):
//  1. Genuine second-factor page (marker + verification input + no password field)
//  2. Explicit failure text or error/alert elements
//  3. Configured success signals (status, header, JSON, success redirect, keyword)
//  4. URL transition away from the login page
//  5. HTTP error status
//  6. Heuristic fallback, soft failure for a plain 200

use crate::config::HeuristicSet;
use crate::types::AttemptStatus;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

/// URL fragments that mark a second-factor step
const TWO_FACTOR_PATHS: &[&str] = &["/mfa", "/2fa", "/verify", "/otp", "/token", "/authenticate", "/two-factor"];

/// Body phrases that mark a second-factor step
const TWO_FACTOR_KEYWORDS: &[&str] = &[
    "two-factor",
    "two factor",
    "2fa",
    "multi-factor",
    "verification code",
    "one-time code",
    "one-time password",
    "authenticator app",
    "security code",
];

const SUCCESS_REDIRECT_PATHS: &[&str] = &["/dashboard", "/home", "/profile", "/welcome", "/main"];
const TRANSITION_SUCCESS_PATHS: &[&str] = &["/dashboard", "/home", "/profile", "/welcome"];
const TRANSITION_FAILURE_PATHS: &[&str] = &["/error", "/login", "/signin", "/auth"];

/// Words that make the text of an error/alert element a failure signal
const ERROR_ELEMENT_WORDS: &[&str] = &["wrong", "invalid", "incorrect", "failed", "error", "denied"];

lazy_static! {
    static ref FAILURE_PATTERNS: Vec<Regex> = [
        r"wrong\s+(user\s*name|password|credentials)",
        r"invalid\s+(user\s*name|password|credentials|login|e-?mail)",
        r"incorrect\s+(user\s*name|password|credentials|e-?mail)",
        r"authentication\s+failed",
        r"login\s+failed",
        r"access\s+denied",
        r"account\s+(not\s+found|disabled|locked|suspended)",
        r"user\s+not\s+found",
        r"bad\s+credentials",
        r"sign\s*in\s+error",
        r"login\s+error",
        r"too\s+many\s+(failed\s+)?(login\s+)?attempts",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    static ref OTP_NAME: Regex = Regex::new(r"(?i)(otp|code|token|verify|mfa|2fa)").unwrap();
    static ref OTP_PLACEHOLDER: Regex = Regex::new(r"(?i)(verification|code|token|otp)").unwrap();
    static ref ERROR_ROLE: Regex = Regex::new(r"(?i)(error|alert|warning|danger)").unwrap();

    static ref INPUT_SELECTOR: Selector = Selector::parse("input").unwrap();
    static ref ROLE_SELECTOR: Selector =
        Selector::parse("div[class], span[class], p[class], li[class], div[id], span[id], p[id], li[id]").unwrap();
}

/// What the classifier needs from an HTTP response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    /// URL after following redirects
    pub final_url: String,
    /// Header name/value pairs; repeated headers appear once per value
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ResponseSnapshot {
    pub fn new(status: u16, final_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            final_url: final_url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Values of every header named `name` (case-insensitive)
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: AttemptStatus,
    pub evidence: Vec<String>,
    /// Pipeline stage that produced the verdict
    pub stage: &'static str,
}

impl Verdict {
    fn new(status: AttemptStatus, stage: &'static str, evidence: Vec<String>) -> Self {
        Self { status, evidence, stage }
    }
}

/// Structural facts extracted from the body once, shared by all stages
#[derive(Debug, Default)]
struct PageFacts {
    has_password_input: bool,
    has_verification_input: bool,
    error_element_texts: Vec<String>,
}

impl PageFacts {
    fn extract(body: &str) -> Self {
        let document = Html::parse_document(body);
        let mut facts = PageFacts::default();

        for input in document.select(&INPUT_SELECTOR) {
            let attrs = input.value();
            let input_type = attrs.attr("type").unwrap_or("text").to_lowercase();

            if input_type == "password" {
                facts.has_password_input = true;
                continue;
            }

            if attrs
                .attr("autocomplete")
                .is_some_and(|a| a.eq_ignore_ascii_case("one-time-code"))
            {
                facts.has_verification_input = true;
                continue;
            }

            if matches!(input_type.as_str(), "text" | "number" | "tel") {
                let name_hit = attrs.attr("name").is_some_and(|n| OTP_NAME.is_match(n));
                let placeholder_hit = attrs
                    .attr("placeholder")
                    .is_some_and(|p| OTP_PLACEHOLDER.is_match(p));
                if name_hit || placeholder_hit {
                    facts.has_verification_input = true;
                }
            }
        }

        for element in document.select(&ROLE_SELECTOR) {
            let attrs = element.value();
            let role_hit = attrs.attr("class").is_some_and(|c| ERROR_ROLE.is_match(c))
                || attrs.attr("id").is_some_and(|i| ERROR_ROLE.is_match(i));
            if !role_hit {
                continue;
            }

            let text = element
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();

            if !text.is_empty()
                && ERROR_ELEMENT_WORDS.iter().any(|w| text.contains(w))
                && !facts.error_element_texts.contains(&text)
            {
                facts.error_element_texts.push(text);
            }
        }

        facts
    }
}

/// Everything a stage may look at
struct Observation<'a> {
    response: &'a ResponseSnapshot,
    body_lower: String,
    page: PageFacts,
    final_url: Option<Url>,
    login_url: Option<Url>,
}

impl<'a> Observation<'a> {
    fn new(response: &'a ResponseSnapshot, login_page_url: &str) -> Self {
        Self {
            response,
            body_lower: response.body.to_lowercase(),
            page: PageFacts::extract(&response.body),
            final_url: Url::parse(&response.final_url).ok(),
            login_url: Url::parse(login_page_url).ok(),
        }
    }

    /// Lower-cased path of the final URL, query excluded
    fn final_path(&self) -> String {
        match self.final_url {
            Some(ref url) => url.path().to_lowercase(),
            None => self
                .response
                .final_url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_lowercase(),
        }
    }

    /// Lower-cased path plus query of the final URL
    fn final_path_and_query(&self) -> String {
        match self.final_url {
            Some(ref url) => match url.query() {
                Some(q) => format!("{}?{}", url.path(), q).to_lowercase(),
                None => url.path().to_lowercase(),
            },
            None => self.response.final_url.to_lowercase(),
        }
    }

    /// Whether the response ended on a different URL than the login page
    fn moved_off_login_page(&self) -> bool {
        match (&self.final_url, &self.login_url) {
            (Some(final_url), Some(login_url)) => without_fragment(final_url) != without_fragment(login_url),
            _ => false,
        }
    }

    fn changed_path(&self) -> bool {
        match (&self.final_url, &self.login_url) {
            (Some(final_url), Some(login_url)) => {
                final_url.path().trim_end_matches('/') != login_url.path().trim_end_matches('/')
            }
            _ => false,
        }
    }
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

type Stage = fn(&Observation<'_>, &HeuristicSet) -> Option<Verdict>;

const PIPELINE: &[Stage] = &[
    second_factor_stage,
    explicit_failure_stage,
    configured_success_stage,
    url_transition_stage,
    http_error_stage,
    fallback_stage,
];

/// Classify one response. Deterministic: the same inputs always give the same
/// status and evidence.
pub fn classify(response: &ResponseSnapshot, heuristics: &HeuristicSet, login_page_url: &str) -> Verdict {
    let observation = Observation::new(response, login_page_url);

    PIPELINE
        .iter()
        .find_map(|stage| stage(&observation, heuristics))
        .unwrap_or_else(|| {
            Verdict::new(
                AttemptStatus::Unknown,
                "none",
                vec!["No classification signal found".to_string()],
            )
        })
}

fn second_factor_stage(obs: &Observation<'_>, _heuristics: &HeuristicSet) -> Option<Verdict> {
    if !obs.page.has_verification_input || obs.page.has_password_input {
        return None;
    }

    let path = obs.final_path_and_query();
    let marker = TWO_FACTOR_PATHS
        .iter()
        .find(|p| path.contains(*p))
        .map(|p| format!("URL contains second-factor marker '{}'", p))
        .or_else(|| {
            TWO_FACTOR_KEYWORDS
                .iter()
                .find(|k| obs.body_lower.contains(*k))
                .map(|k| format!("Page mentions '{}'", k))
        })?;

    Some(Verdict::new(
        AttemptStatus::TwoFactorRequired,
        "second_factor",
        vec![
            "Genuine 2FA/MFA page detected: verification input present and no password field".to_string(),
            marker,
        ],
    ))
}

fn explicit_failure_stage(obs: &Observation<'_>, _heuristics: &HeuristicSet) -> Option<Verdict> {
    let mut evidence: Vec<String> = FAILURE_PATTERNS
        .iter()
        .filter_map(|re| re.find(&obs.body_lower))
        .map(|m| format!("Error message detected: '{}'", m.as_str()))
        .collect();

    for text in &obs.page.error_element_texts {
        let snippet: String = text.chars().take(100).collect();
        evidence.push(format!("Error element found: {}", snippet));
    }

    if evidence.is_empty() {
        None
    } else {
        Some(Verdict::new(AttemptStatus::Failure, "explicit_failure", evidence))
    }
}

fn configured_success_stage(obs: &Observation<'_>, heuristics: &HeuristicSet) -> Option<Verdict> {
    let response = obs.response;
    let mut evidence = Vec::new();

    if heuristics.success_status_codes.contains(&response.status) {
        evidence.push(format!("Success status code: {}", response.status));
    }

    for (name, expected) in &heuristics.success_headers {
        if let Some(value) = response.header_values(name).find(|v| v.contains(expected.as_str())) {
            evidence.push(format!("Success header: {}: {}", name, value));
        }
    }

    if !heuristics.success_json.is_empty() {
        if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str::<serde_json::Value>(&response.body) {
            for (key, expected) in &heuristics.success_json {
                if fields.get(key) == Some(expected) {
                    evidence.push(format!("Success JSON field: {} = {}", key, expected));
                }
            }
        }
    }

    if obs.moved_off_login_page() && obs.changed_path() {
        let path = obs.final_path();
        if SUCCESS_REDIRECT_PATHS.iter().any(|p| path.contains(p)) {
            evidence.push(format!("Redirected to success page: {}", response.final_url));
        }
    }

    for keyword in &heuristics.success_body_keywords {
        if !keyword.is_empty() && obs.body_lower.contains(&keyword.to_lowercase()) {
            evidence.push(format!("Success keyword found: {}", keyword));
        }
    }

    if evidence.is_empty() {
        None
    } else {
        Some(Verdict::new(AttemptStatus::Success, "configured_success", evidence))
    }
}

fn url_transition_stage(obs: &Observation<'_>, _heuristics: &HeuristicSet) -> Option<Verdict> {
    if !obs.moved_off_login_page() {
        return None;
    }

    let path = obs.final_path_and_query();
    let url = &obs.response.final_url;

    if TWO_FACTOR_PATHS.iter().any(|p| path.contains(p)) {
        return Some(Verdict::new(
            AttemptStatus::TwoFactorRequired,
            "url_transition",
            vec![format!("Redirected to 2FA page: {}", url)],
        ));
    }

    if TRANSITION_FAILURE_PATHS.iter().any(|p| path.contains(p)) {
        return Some(Verdict::new(
            AttemptStatus::Failure,
            "url_transition",
            vec![format!("Redirected to error/login page: {}", url)],
        ));
    }

    if TRANSITION_SUCCESS_PATHS.iter().any(|p| path.contains(p)) {
        return Some(Verdict::new(
            AttemptStatus::Success,
            "url_transition",
            vec![format!("Redirected to success page: {}", url)],
        ));
    }

    None
}

fn http_error_stage(obs: &Observation<'_>, _heuristics: &HeuristicSet) -> Option<Verdict> {
    let status = obs.response.status;
    if status >= 400 {
        Some(Verdict::new(
            AttemptStatus::Error,
            "http_error",
            vec![format!("HTTP error status: {}", status)],
        ))
    } else {
        None
    }
}

fn fallback_stage(obs: &Observation<'_>, heuristics: &HeuristicSet) -> Option<Verdict> {
    let status = obs.response.status;
    let mut evidence = Vec::new();

    if heuristics.failure_status_codes.contains(&status) {
        evidence.push(format!("Failure status code: {}", status));
    }

    if let Some(keyword) = heuristics
        .failure_body_keywords
        .iter()
        .find(|k| !k.is_empty() && obs.body_lower.contains(&k.to_lowercase()))
    {
        evidence.push(format!("Failure keyword found: {}", keyword));
    }

    if !evidence.is_empty() {
        return Some(Verdict::new(AttemptStatus::Failure, "fallback", evidence));
    }

    if status == 200 {
        return Some(Verdict::new(
            AttemptStatus::Failure,
            "fallback",
            vec!["No success indicators found, treating as soft failure".to_string()],
        ));
    }

    Some(Verdict::new(
        AttemptStatus::Unknown,
        "fallback",
        vec![format!("No classification signal for HTTP {}", status)],
    ))
}
