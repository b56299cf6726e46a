//! Recording helpers used throughout the crate.
//!
//! Every helper is a no-op until [`init_metrics`](super::init_metrics) runs.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_WORKERS, CACHE_LOOKUPS_TOTAL, COMMANDS_TOTAL, ISSUES_TOTAL, ISSUE_DURATION,
    LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, MERGES_TOTAL,
};

/// Record one LLM request and its latency.
pub fn record_llm_request(model: &str, success: bool, latency: Duration) {
    let status = if success { "success" } else { "failure" };

    if let Some(requests) = LLM_REQUESTS_TOTAL.get() {
        requests.with_label_values(&[model, status]).inc();
    }
    if let Some(histogram) = LLM_LATENCY.get() {
        histogram
            .with_label_values(&[model])
            .observe(latency.as_secs_f64());
    }
}

/// Record token usage reported by the provider.
pub fn record_llm_tokens(model: &str, input_tokens: u32, output_tokens: u32) {
    if let Some(tokens) = LLM_TOKENS_TOTAL.get() {
        tokens
            .with_label_values(&[model, "input"])
            .inc_by(f64::from(input_tokens));
        tokens
            .with_label_values(&[model, "output"])
            .inc_by(f64::from(output_tokens));
    }
}

pub fn record_cache_lookup(hit: bool) {
    if let Some(lookups) = CACHE_LOOKUPS_TOTAL.get() {
        lookups
            .with_label_values(&[if hit { "hit" } else { "miss" }])
            .inc();
    }
}

/// Record one executed command.
pub fn record_command(command: &str, success: bool) {
    if let Some(commands) = COMMANDS_TOTAL.get() {
        commands
            .with_label_values(&[command, if success { "success" } else { "error" }])
            .inc();
    }
    tracing::trace!(command = command, success = success, "Recorded command metric");
}

/// Record the final outcome of one issue.
pub fn record_issue_outcome(outcome: &str, duration: Duration) {
    if let Some(issues) = ISSUES_TOTAL.get() {
        issues.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = ISSUE_DURATION.get() {
        histogram
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }
}

pub fn record_merge(status: &str) {
    if let Some(merges) = MERGES_TOTAL.get() {
        merges.with_label_values(&[status]).inc();
    }
}

pub fn worker_started() {
    if let Some(gauge) = ACTIVE_WORKERS.get() {
        gauge.inc();
    }
}

pub fn worker_finished() {
    if let Some(gauge) = ACTIVE_WORKERS.get() {
        gauge.dec();
    }
}
