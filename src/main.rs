// main.rs - credcheck CLI
// Purpose: Run a credential test from flags, wordlists or a run-request file,
//          or serve the HTTP streaming API
//
// stdout (or --output) carries only NDJSON events. Banner, progress bar,
// summary and logs go to stderr.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use credcheck::config::{HeuristicsSetting, RunOverrides, RunRequest, ToolDefaults};
use credcheck::error::RejectionBody;
use credcheck::events::{RunEvent, RunSummary};
use credcheck::server::start_server;
use credcheck::types::AttemptStatus;
use credcheck::RunController;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// credcheck - Login credential validation engine
#[derive(Parser, Debug)]
#[command(
    name = "credcheck",
    version,
    about = "Concurrent login attempt execution and response classification",
    long_about = r#"
credcheck submits (identifier, secret) pairs to a known login form and
classifies every response as success, failure, 2fa_required, error or unknown.

Only use it against systems you are authorized to test.
"#,
    after_help = r#"
EXAMPLES:

  Wordlists, index-aligned (line i of -U with line i of -P):
    credcheck -t https://app.local/login -U users.txt -P passwords.txt --rpm 60

  Run request file (same JSON the HTTP API accepts):
    credcheck --request run.json -o results.ndjson

  HTTP API:
    credcheck --serve --port 8080
    POST /test_credentials  ->  application/x-ndjson event stream
"#
)]
struct Args {
    // ═══════════════════════════════════════════════════════════════════════════
    // TARGET OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Login form submission URL
    #[arg(short, long, value_name = "URL", help_heading = "Target Options")]
    target: Option<String>,

    /// Name of the identifier field (default: username)
    #[arg(long, value_name = "NAME", help_heading = "Target Options")]
    username_field: Option<String>,

    /// Name of the secret field (default: password)
    #[arg(long, value_name = "NAME", help_heading = "Target Options")]
    password_field: Option<String>,

    /// Form method, GET or POST (default: POST)
    #[arg(short = 'X', long, value_name = "METHOD", help_heading = "Target Options")]
    method: Option<String>,

    /// Page the login form lives on (CSRF token source)
    #[arg(long, value_name = "URL", help_heading = "Target Options")]
    login_page: Option<String>,

    /// Name of the CSRF field to fetch from the login page
    #[arg(long, value_name = "NAME", help_heading = "Target Options")]
    csrf_field: Option<String>,

    /// CSRF value to use when the login page does not provide one
    #[arg(long, value_name = "VALUE", help_heading = "Target Options")]
    csrf_value: Option<String>,

    /// Initial cookie, repeatable
    #[arg(long = "cookie", value_name = "NAME=VALUE", help_heading = "Target Options")]
    cookies: Vec<String>,

    // ═══════════════════════════════════════════════════════════════════════════
    // CREDENTIAL OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Identifiers, one per line; a blank or # line skips that row in both lists
    #[arg(short = 'U', long, value_name = "FILE", help_heading = "Credentials")]
    userlist: Option<PathBuf>,

    /// Secrets, one per line, aligned with --userlist
    #[arg(short = 'P', long, value_name = "FILE", help_heading = "Credentials")]
    passlist: Option<PathBuf>,

    /// JSON run request; flags given on the command line take precedence
    #[arg(short, long, value_name = "FILE", help_heading = "Credentials")]
    request: Option<PathBuf>,

    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTION OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Requests per minute across all workers (0 = unlimited)
    #[arg(long, value_name = "N", help_heading = "Execution")]
    rpm: Option<u32>,

    /// Proxy URL for every request (http, https or socks5)
    #[arg(long, value_name = "URL", help_heading = "Execution")]
    proxy: Option<String>,

    /// Concurrent attempts per batch
    #[arg(short, long, value_name = "N", help_heading = "Execution")]
    workers: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECONDS", help_heading = "Execution")]
    timeout: Option<u64>,

    /// Derive success/failure heuristics from the target
    #[arg(long, help_heading = "Execution")]
    auto_heuristics: bool,

    /// JSON file overriding the built-in defaults
    #[arg(long, value_name = "FILE", help_heading = "Execution")]
    defaults: Option<PathBuf>,

    // ═══════════════════════════════════════════════════════════════════════════
    // OUTPUT OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Write NDJSON events to FILE instead of stdout
    #[arg(short, long, value_name = "FILE", help_heading = "Output")]
    output: Option<PathBuf>,

    /// No banner, progress bar or summary
    #[arg(short, long, help_heading = "Output")]
    quiet: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, help_heading = "Output")]
    verbose: bool,

    // ═══════════════════════════════════════════════════════════════════════════
    // SERVER MODE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serve the HTTP API instead of running once
    #[arg(long, help_heading = "Server Mode")]
    serve: bool,

    /// Port for --serve
    #[arg(long, default_value = "8080", value_name = "PORT", help_heading = "Server Mode")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let defaults = match args.defaults {
        Some(ref path) => ToolDefaults::load(path)?,
        None => ToolDefaults::default(),
    };
    let controller = Arc::new(RunController::new(defaults));

    if !args.quiet {
        print_banner();
    }

    if args.serve {
        return start_server(controller, args.port).await;
    }

    let request = build_request(&args)?;
    let mut sink = open_sink(args.output.as_deref())?;

    let mut events = match controller.start(request) {
        Ok(events) => events,
        Err(e) => {
            let body = serde_json::to_string(&RejectionBody::from(&e))?;
            writeln!(sink, "{}", body)?;
            sink.flush()?;
            return Err(anyhow::Error::new(e).context("Run request rejected"));
        }
    };

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("Invalid progress template")?
                .progress_chars("=>-"),
        );
        bar
    };

    let mut summary = RunSummary::default();
    while let Some(event) = events.recv().await {
        sink.write_all(event.to_ndjson_line()?.as_bytes())?;
        sink.flush()?;

        summary.record(&event);
        match event {
            RunEvent::Info {
                total_expected_attempts,
                ..
            } => progress.set_length(total_expected_attempts as u64),
            RunEvent::BatchInfo { message, .. } => progress.set_message(message),
            RunEvent::Result { ref result, .. } => {
                progress.inc(1);
                if result.status == AttemptStatus::Success {
                    progress.println(format!(
                        "{} {}:{}",
                        "[+] VALID".green().bold(),
                        result.identifier,
                        result.secret
                    ));
                } else if result.status == AttemptStatus::TwoFactorRequired {
                    progress.println(format!(
                        "{} {}:{}",
                        "[2FA]".yellow().bold(),
                        result.identifier,
                        result.secret
                    ));
                }
            }
            RunEvent::Complete { .. } => progress.finish_with_message("Complete"),
        }
    }

    if !progress.is_finished() {
        progress.abandon_with_message("Interrupted");
    }

    if !args.quiet {
        print_summary(&summary);
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "credcheck=debug" } else { "credcheck=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_banner() {
    eprintln!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    eprintln!("{}", "  credcheck - Login Credential Validation".white().bold());
    eprintln!("{}", "  Authorized testing only".white());
    eprintln!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}

fn print_summary(summary: &RunSummary) {
    eprintln!();
    eprintln!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    eprintln!("{}", format!("  Processed: {}", summary.processed).white().bold());
    eprintln!("  {} {}", "success:     ".green(), summary.count(AttemptStatus::Success));
    eprintln!("  {} {}", "2fa_required:".yellow(), summary.count(AttemptStatus::TwoFactorRequired));
    eprintln!("  {} {}", "failure:     ".white(), summary.count(AttemptStatus::Failure));
    eprintln!("  {} {}", "error:       ".red(), summary.count(AttemptStatus::Error));
    eprintln!("  {} {}", "unknown:     ".dimmed(), summary.count(AttemptStatus::Unknown));

    if !summary.hits.is_empty() {
        eprintln!();
        eprintln!("{}", "  Valid credentials:".green().bold());
        for (identifier, secret) in &summary.hits {
            eprintln!("    {}:{}", identifier, secret);
        }
    }
    eprintln!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
}

/// Request file first, command-line flags over it
fn build_request(args: &Args) -> Result<RunRequest> {
    let mut request = match args.request {
        Some(ref path) => {
            let raw = fs::read_to_string(path)
                .context(format!("Failed to read run request: {}", path.display()))?;
            serde_json::from_str::<RunRequest>(&raw)
                .context(format!("Failed to parse run request: {}", path.display()))?
        }
        None => RunRequest::default(),
    };

    if args.target.is_some() {
        request.target_post_url = args.target.clone();
    }
    request.username_field_name = args
        .username_field
        .clone()
        .or(request.username_field_name)
        .or_else(|| Some("username".to_string()));
    request.password_field_name = args
        .password_field
        .clone()
        .or(request.password_field_name)
        .or_else(|| Some("password".to_string()));
    request.form_method = args
        .method
        .clone()
        .or(request.form_method)
        .or_else(|| Some("POST".to_string()));

    match (&args.userlist, &args.passlist) {
        (Some(userlist), Some(passlist)) => {
            let identifiers = read_wordlist(userlist)?;
            let secrets = read_wordlist(passlist)?;
            if identifiers.len() != secrets.len() {
                tracing::warn!(
                    identifiers = identifiers.len(),
                    secrets = secrets.len(),
                    "Wordlists differ in length, extra lines are ignored"
                );
            }
            let (identifiers, secrets) = skip_comment_rows(identifiers, secrets);
            request.identifier_list = Some(identifiers);
            request.secret_list = Some(secrets);
        }
        (Some(userlist), None) => request.identifier_list = Some(read_wordlist(userlist)?),
        (None, Some(passlist)) => request.secret_list = Some(read_wordlist(passlist)?),
        (None, None) => {}
    }

    if args.csrf_field.is_some() {
        request.csrf_token_name = args.csrf_field.clone();
    }
    if args.csrf_value.is_some() {
        request.csrf_token_value = args.csrf_value.clone();
    }

    if !args.cookies.is_empty() {
        let mut cookies = request.cookies.take().unwrap_or_default();
        cookies.extend(parse_cookies(&args.cookies)?);
        request.cookies = Some(cookies);
    }

    let mut overrides: RunOverrides = request.config.take().unwrap_or_default();
    if args.rpm.is_some() {
        overrides.requests_per_minute = args.rpm;
    }
    if args.proxy.is_some() {
        overrides.proxy = args.proxy.clone();
    }
    if args.workers.is_some() {
        overrides.concurrency = args.workers;
    }
    if args.timeout.is_some() {
        overrides.request_timeout_secs = args.timeout;
    }
    if args.login_page.is_some() {
        overrides.login_page_url = args.login_page.clone();
    }
    if args.auto_heuristics {
        overrides.heuristics = Some(HeuristicsSetting::Keyword("auto".to_string()));
    }
    request.config = Some(overrides);

    Ok(request)
}

fn parse_cookies(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|cookie| {
            cookie
                .split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| anyhow!("Invalid cookie '{}', expected NAME=VALUE", cookie))
        })
        .collect()
}

/// Lines of a wordlist, unfiltered. Invalid UTF-8 is decoded lossily so that a
/// bad line never shifts or truncates the list.
fn read_wordlist(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read(path).context(format!("Failed to read wordlist: {}", path.display()))?;
    Ok(split_lines(&raw))
}

fn split_lines(raw: &[u8]) -> Vec<String> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    if raw.is_empty() {
        return Vec::new();
    }

    raw.split(|&b| b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        })
        .collect()
}

/// Drop row i from both lists when identifier i is blank or a `#` comment.
/// Secrets are never inspected, so a secret starting with `#` is kept.
fn skip_comment_rows(identifiers: Vec<String>, secrets: Vec<String>) -> (Vec<String>, Vec<String>) {
    identifiers
        .into_iter()
        .zip(secrets)
        .filter(|(identifier, _)| !identifier.trim().is_empty() && !identifier.starts_with('#'))
        .unzip()
}

fn open_sink(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) => {
            let file = File::create(path).context(format!("Failed to create output file: {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_lines_keeps_every_line() {
        let lines = split_lines(b"alicepw\r\n#bobpw\n\ncarolpw\n");
        assert_eq!(lines, strings(&["alicepw", "#bobpw", "", "carolpw"]));
    }

    #[test]
    fn test_split_lines_decodes_invalid_utf8_lossily() {
        let lines = split_lines(b"one\nx\xff\xfey\nthree");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "x\u{fffd}\u{fffd}y");
        assert_eq!(lines[2], "three");
    }

    #[test]
    fn test_split_lines_empty_file() {
        assert!(split_lines(b"").is_empty());
        assert!(split_lines(b"\n").is_empty());
    }

    #[test]
    fn test_secret_starting_with_hash_stays_aligned() {
        let identifiers = split_lines(b"alice\nbob\ncarol");
        let secrets = split_lines(b"alicepw\n#bobpw\ncarolpw");

        let (identifiers, secrets) = skip_comment_rows(identifiers, secrets);
        assert_eq!(identifiers, strings(&["alice", "bob", "carol"]));
        assert_eq!(secrets, strings(&["alicepw", "#bobpw", "carolpw"]));
    }

    #[test]
    fn test_comment_rows_drop_from_both_lists() {
        let identifiers = split_lines(b"alice\n# staff\nbob\n\ncarol\n");
        let secrets = split_lines(b"alicepw\nunused\n#bobpw\nunused\ncarolpw\n");

        let (identifiers, secrets) = skip_comment_rows(identifiers, secrets);
        assert_eq!(identifiers, strings(&["alice", "bob", "carol"]));
        assert_eq!(secrets, strings(&["alicepw", "#bobpw", "carolpw"]));
    }
}
