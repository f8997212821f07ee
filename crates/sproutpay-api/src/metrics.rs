use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Payment link counters
pub static LINKS_CREATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sproutpay_links_created_total", "Payment links created"),
        &["link_type"],
    )
    .unwrap()
});

pub static STATUS_TRANSITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sproutpay_status_transitions_total",
            "Payment link status transitions by target status",
        ),
        &["status"],
    )
    .unwrap()
});

// Settlement network metrics
pub static SETTLEMENT_CALLS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sproutpay_settlement_calls_total",
            "Settlement network calls by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .unwrap()
});

pub static SETTLEMENT_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "sproutpay_settlement_latency_seconds",
            "Settlement network call latency",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]),
    )
    .unwrap()
});

pub static VIRTUAL_CHANNELS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sproutpay_virtual_channels_total",
        "Placeholder channels created because a session could not be opened",
    )
    .unwrap()
});

// Channel monitor
pub static MONITOR_SWEEPS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("sproutpay_monitor_sweeps_total", "Channel monitor sweeps run").unwrap()
});

pub static MONITOR_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sproutpay_monitor_errors_total",
        "Per-channel failures during monitor sweeps",
    )
    .unwrap()
});

/// Register all metrics with the registry
pub fn register_metrics() {
    REGISTRY.register(Box::new(LINKS_CREATED.clone())).unwrap();
    REGISTRY
        .register(Box::new(STATUS_TRANSITIONS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SETTLEMENT_CALLS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SETTLEMENT_LATENCY.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(VIRTUAL_CHANNELS.clone()))
        .unwrap();
    REGISTRY.register(Box::new(MONITOR_SWEEPS.clone())).unwrap();
    REGISTRY.register(Box::new(MONITOR_ERRORS.clone())).unwrap();
}

pub fn record_transition(status: sproutpay::LinkStatus) {
    STATUS_TRANSITIONS
        .with_label_values(&[status.as_str()])
        .inc();
}

/// Time a settlement call and count its outcome.
pub async fn observe_settlement<T, E, F>(operation: &str, call: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let timer = SETTLEMENT_LATENCY.start_timer();
    let result = call.await;
    timer.observe_duration();
    let outcome = if result.is_ok() { "ok" } else { "error" };
    SETTLEMENT_CALLS
        .with_label_values(&[operation, outcome])
        .inc();
    result
}
