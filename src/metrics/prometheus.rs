//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by issue-forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all issue-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Issues handled by the scheduler, labeled by outcome.
pub static ISSUES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall time of one issue pipeline attempt, labeled by outcome.
pub static ISSUE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Commands executed by command loops, labeled by command and status.
pub static COMMANDS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Pull requests merged or skipped in the merge pre-pass, labeled by status.
pub static MERGES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total LLM API requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM API request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Total tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Completion cache lookups, labeled by result (hit/miss).
pub static CACHE_LOOKUPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of issue workers currently running.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording functions are no-ops until this has run,
/// so library users and tests that skip it are unaffected.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let issues_total = CounterVec::new(
        Opts::new("issue_forge_issues_total", "Issues handled by outcome"),
        &["outcome"],
    )?;

    let issue_duration = HistogramVec::new(
        HistogramOpts::new(
            "issue_forge_issue_duration_seconds",
            "Issue pipeline duration in seconds",
        )
        .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["outcome"],
    )?;

    let commands_total = CounterVec::new(
        Opts::new("issue_forge_commands_total", "Commands executed by command loops"),
        &["command", "status"],
    )?;

    let merges_total = CounterVec::new(
        Opts::new("issue_forge_merges_total", "Approved pull request merge attempts"),
        &["status"],
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("issue_forge_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "issue_forge_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("issue_forge_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let cache_lookups_total = CounterVec::new(
        Opts::new("issue_forge_cache_lookups_total", "Completion cache lookups"),
        &["result"],
    )?;

    let active_workers = Gauge::new("issue_forge_active_workers", "Number of active workers")?;

    registry.register(Box::new(issues_total.clone()))?;
    registry.register(Box::new(issue_duration.clone()))?;
    registry.register(Box::new(commands_total.clone()))?;
    registry.register(Box::new(merges_total.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(cache_lookups_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // Already-set cells mean a previous call won; keep the first registration.
    let _ = REGISTRY.set(registry);
    let _ = ISSUES_TOTAL.set(issues_total);
    let _ = ISSUE_DURATION.set(issue_duration);
    let _ = COMMANDS_TOTAL.set(commands_total);
    let _ = MERGES_TOTAL.set(merges_total);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = CACHE_LOOKUPS_TOTAL.set(cache_lookups_total);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
