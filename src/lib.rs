// lib.rs - credcheck library
// Purpose: Login attempt execution and response classification for authorized
//          credential validation against a known login form

pub mod classifier;
pub mod config;
pub mod controller;
pub mod csrf_cache;
pub mod error;
pub mod events;
pub mod executor;
pub mod http;
pub mod rate_limiter;
pub mod scheduler;
pub mod server;
pub mod types;

pub use classifier::{ResponseSnapshot, Verdict, classify};
pub use config::{DiscoveredForm, FormMethod, HeuristicSet, RunConfig, RunOverrides, RunRequest, ToolDefaults};
pub use controller::{HeuristicsDiscovery, RunController, RunStream};
pub use csrf_cache::CsrfCache;
pub use error::RunError;
pub use events::{RunEvent, RunSummary};
pub use executor::{AttemptExecutor, AttemptRunner};
pub use rate_limiter::{RateLimiter, RateLimiterPool};
pub use scheduler::BatchScheduler;
pub use types::{AttemptResult, AttemptStatus, CredentialPair, CsrfToken, RunProgress};
