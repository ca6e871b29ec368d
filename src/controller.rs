// controller.rs - Run orchestration
// Purpose: Accept a run request, reject it early if it is malformed, otherwise
//          start the run and hand back its event stream
//
// Stream: info -> (batch_info, result*)* -> complete. Once streaming starts the
// run is never aborted by a single attempt; only a consumer that hangs up stops it.

use crate::config::{HeuristicSet, HeuristicsMode, PreparedRun, RunConfig, RunRequest, ToolDefaults};
use crate::csrf_cache::{CsrfCache, FetchSettings};
use crate::error::RunError;
use crate::events::RunEvent;
use crate::executor::AttemptExecutor;
use crate::rate_limiter::RateLimiterPool;
use crate::scheduler::{BatchScheduler, batch_size_for};
use crate::types::CsrfToken;
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events buffered between a run and its consumer
pub const EVENT_BUFFER: usize = 256;

pub type RunStream = mpsc::Receiver<RunEvent>;

/// Derives a heuristic set for a target when the caller asked for "auto"
pub trait HeuristicsDiscovery: Send + Sync {
    fn discover<'a>(&'a self, config: &'a RunConfig) -> BoxFuture<'a, Result<HeuristicSet>>;
}

pub struct RunController {
    defaults: ToolDefaults,
    csrf_cache: Arc<CsrfCache>,
    rate_limiters: Arc<RateLimiterPool>,
    discovery: Option<Arc<dyn HeuristicsDiscovery>>,
}

impl RunController {
    pub fn new(defaults: ToolDefaults) -> Self {
        Self {
            defaults,
            csrf_cache: Arc::new(CsrfCache::new()),
            rate_limiters: Arc::new(RateLimiterPool::new()),
            discovery: None,
        }
    }

    /// Share a cache between controllers, or use one with a custom TTL
    pub fn with_csrf_cache(mut self, cache: Arc<CsrfCache>) -> Self {
        self.csrf_cache = cache;
        self
    }

    /// Share request budgets with another controller
    pub fn with_rate_limiters(mut self, pool: Arc<RateLimiterPool>) -> Self {
        self.rate_limiters = pool;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn HeuristicsDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn defaults(&self) -> &ToolDefaults {
        &self.defaults
    }

    pub fn csrf_cache(&self) -> &Arc<CsrfCache> {
        &self.csrf_cache
    }

    pub fn rate_limiters(&self) -> &Arc<RateLimiterPool> {
        &self.rate_limiters
    }

    /// Validate `request` and start the run on the tokio runtime. A returned
    /// error means nothing was sent to the target.
    pub fn start(&self, request: RunRequest) -> Result<RunStream, RunError> {
        let prepared = request.prepare(&self.defaults)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        info!(
            target_url = %prepared.config.target_url,
            method = %prepared.config.method,
            attempts = prepared.pairs.len(),
            rpm = prepared.config.requests_per_minute,
            "Starting credential run"
        );

        let run = PendingRun {
            prepared,
            csrf_cache: Arc::clone(&self.csrf_cache),
            rate_limiters: Arc::clone(&self.rate_limiters),
            discovery: self.discovery.clone(),
            default_heuristics: self.defaults.heuristics.clone(),
        };
        tokio::spawn(run.drive(tx));

        Ok(rx)
    }
}

/// Everything a started run owns until it finishes
struct PendingRun {
    prepared: PreparedRun,
    csrf_cache: Arc<CsrfCache>,
    rate_limiters: Arc<RateLimiterPool>,
    discovery: Option<Arc<dyn HeuristicsDiscovery>>,
    default_heuristics: HeuristicSet,
}

impl PendingRun {
    async fn drive(self, tx: mpsc::Sender<RunEvent>) {
        let PreparedRun {
            mut config,
            heuristics,
            pairs,
            supplied_csrf_value,
        } = self.prepared;

        let total = pairs.len();
        if tx.send(RunEvent::info(total, batch_size_for(total))).await.is_err() {
            warn!("Event consumer closed before the run started");
            return;
        }

        config.heuristics =
            resolve_heuristics(heuristics, &config, self.discovery.as_deref(), &self.default_heuristics).await;
        let csrf = resolve_csrf(&self.csrf_cache, &config, supplied_csrf_value).await;

        let limiter = self
            .rate_limiters
            .limiter_for(&config.target_url.origin().ascii_serialization(), config.requests_per_minute)
            .await;
        let scheduler = BatchScheduler::new(config.concurrency, config.batch_pause);
        let executor = AttemptExecutor::new(Arc::new(config), limiter, csrf);

        let outcome = scheduler.run(pairs, Arc::new(executor), &tx).await;

        if outcome.cancelled {
            warn!(processed = outcome.processed, total, "Run stopped early, consumer went away");
            return;
        }

        info!(processed = outcome.processed, batches = outcome.batches_run, "Run finished");
        let _ = tx.send(RunEvent::complete(outcome.processed)).await;
    }
}

async fn resolve_heuristics(
    mode: HeuristicsMode,
    config: &RunConfig,
    discovery: Option<&dyn HeuristicsDiscovery>,
    defaults: &HeuristicSet,
) -> HeuristicSet {
    match mode {
        HeuristicsMode::Fixed(set) => set,
        HeuristicsMode::Auto => match discovery {
            Some(discovery) => match discovery.discover(config).await {
                Ok(set) => {
                    info!("Heuristics discovered automatically");
                    set
                }
                Err(e) => {
                    warn!("Heuristics discovery failed, using defaults: {:#}", e);
                    defaults.clone()
                }
            },
            None => {
                warn!("Automatic heuristics requested but no discovery is configured, using defaults");
                defaults.clone()
            }
        },
    }
}

/// Token from the cache (fetching the login page if needed), else the value the
/// caller supplied. No field name means the form has no token.
async fn resolve_csrf(cache: &CsrfCache, config: &RunConfig, supplied: Option<String>) -> Option<CsrfToken> {
    let Some(field_name) = config.csrf_field_name.as_ref() else {
        if supplied.is_some() {
            warn!("CSRF value supplied without a field name, ignoring it");
        }
        return None;
    };

    let settings = FetchSettings {
        user_agents: config.user_agents.clone(),
        session: config.session_settings(),
    };
    if let Some(token) = cache
        .get_or_fetch(config.login_page_url.as_str(), field_name, &settings)
        .await
    {
        return Some(token);
    }

    match supplied {
        Some(value) => {
            info!(field = %field_name, "Using the supplied CSRF token");
            Some(CsrfToken {
                field_name: field_name.clone(),
                value,
            })
        }
        None => {
            warn!(field = %field_name, "No CSRF token available, attempts will be sent without one");
            None
        }
    }
}
