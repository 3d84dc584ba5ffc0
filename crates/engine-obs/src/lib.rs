//! Observability: Prometheus gauge registration for engine metrics,
//! and the `tracing`/OTLP subscriber setup shared by the CLI and API
//! binaries.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntGauge, TextEncoder};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use engine_core::metrics::MetricsSnapshot;

static THROUGHPUT_TPS: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("engine_throughput_tps", "tokens produced per second").unwrap()
});
static GPU_UTILIZATION: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("engine_gpu_utilization", "fraction of wall time the GPU is busy")
        .unwrap()
});
static COST_PER_MTOKEN: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("engine_cost_per_mtoken", "modeled cost per million tokens").unwrap()
});
static JAIN_FAIRNESS: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("engine_jain_fairness", "Jain fairness index across tenants").unwrap()
});
static CURRENT_ENTROPY: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("engine_arrival_entropy", "current arrival-interval entropy").unwrap()
});
static CURRENT_WINDOW_MS: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("engine_window_ms", "current adaptive batching window").unwrap()
});
static QUEUE_DEPTH: Lazy<IntGauge> =
    Lazy::new(|| prometheus::register_int_gauge!("engine_queue_depth", "requests awaiting dispatch").unwrap());

/// Registers the gauges; call once at startup before serving `/metrics`.
pub fn init() {
    let _ = &*THROUGHPUT_TPS;
    let _ = &*GPU_UTILIZATION;
    let _ = &*COST_PER_MTOKEN;
    let _ = &*JAIN_FAIRNESS;
    let _ = &*CURRENT_ENTROPY;
    let _ = &*CURRENT_WINDOW_MS;
    let _ = &*QUEUE_DEPTH;
}

/// Pushes a fresh `MetricsSnapshot` into the registered gauges.
pub fn observe(snapshot: &MetricsSnapshot) {
    THROUGHPUT_TPS.set(snapshot.throughput_tps);
    GPU_UTILIZATION.set(snapshot.gpu_utilization);
    COST_PER_MTOKEN.set(snapshot.cost_per_mtoken);
    JAIN_FAIRNESS.set(snapshot.jain_fairness);
    CURRENT_ENTROPY.set(snapshot.current_entropy);
    CURRENT_WINDOW_MS.set(snapshot.current_window_ms);
    QUEUE_DEPTH.set(snapshot.queue_depth as i64);
}

/// Renders the default Prometheus registry in text exposition format.
pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap_or_default()
}

/// Sets up `tracing-subscriber`, routing to an OTLP collector when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set, falling back to stdout `fmt`.
pub fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
