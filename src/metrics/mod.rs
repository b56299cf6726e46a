//! Prometheus metrics for issue processing, command loops and LLM usage.
//!
//! ```ignore
//! use issue_forge::metrics::{export_metrics, init_metrics};
//!
//! init_metrics()?;
//! // ... run a batch ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{
    record_cache_lookup, record_command, record_issue_outcome, record_llm_request,
    record_llm_tokens, record_merge, worker_finished, worker_started,
};
pub use self::prometheus::{export_metrics, init_metrics, REGISTRY};
