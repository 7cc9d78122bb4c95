//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `QuoteCache`: short-TTL, per-key locked quote store
//! - `ConcurrentFetcher`: bounded, single-flight refill pool
//! - `FallbackOrchestrator`: per-read source selection and background poll
//! - `SyntheticGenerator`: deterministic last-resort quotes
//! - `SourceStatusTracker`: which source served the last read

pub mod fetcher;
pub mod orchestrator;
pub mod quote_cache;
pub mod status;
pub mod synthetic;

pub use fetcher::{ConcurrentFetcher, FetchRequest, FetchResult, FetcherConfig, RefillResults};
pub use orchestrator::{
    FallbackOrchestrator, MIN_POLL_INTERVAL, OrchestratorConfig, PollOutcome, PollingAction,
    PollingStatus, QuoteSet, ReadPlan, ServedQuote, StreamAction, plan_read,
};
pub use quote_cache::{CachedQuote, PutOutcome, QuoteCache, SharedQuoteCache};
pub use status::{SourceStatus, SourceStatusTracker};
pub use synthetic::{MAX_PERTURBATION_BPS, SyntheticConfig, SyntheticError, SyntheticGenerator};
