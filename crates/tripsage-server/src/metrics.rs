//! Prometheus metrics
//!
//! Registered once into a crate-local registry and exposed at `/metrics`.
//! Recording is best-effort everywhere: a metrics failure never fails a
//! request.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

struct ServerMetrics {
    registry: Registry,
    request_counter: IntCounterVec,
    rate_limited_counter: IntCounterVec,
    stream_events: Histogram,
    tool_calls: Histogram,
    memory_intents: IntCounterVec,
    job_outcomes: IntCounterVec,
}

static METRICS: OnceLock<ServerMetrics> = OnceLock::new();

#[allow(clippy::expect_used)] // static metric construction cannot fail with valid options
fn get_or_init() -> &'static ServerMetrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new(
                "tripsage_requests_total",
                "HTTP requests by endpoint and status",
            ),
            &["endpoint", "status"],
        )
        .expect("request_counter opts");

        let rate_limited_counter = IntCounterVec::new(
            Opts::new(
                "tripsage_rate_limited_total",
                "Rate-limit denials by route key",
            ),
            &["route"],
        )
        .expect("rate_limited_counter opts");

        let stream_events = Histogram::with_opts(
            HistogramOpts::new(
                "tripsage_stream_events",
                "Wire events per streaming response",
            )
            .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0]),
        )
        .expect("stream_events opts");

        let tool_calls = Histogram::with_opts(
            HistogramOpts::new(
                "tripsage_tool_calls_per_invocation",
                "Tool calls per tool-loop invocation",
            )
            .buckets(vec![0.0, 1.0, 2.0, 4.0, 8.0, 12.0]),
        )
        .expect("tool_calls opts");

        let memory_intents = IntCounterVec::new(
            Opts::new(
                "tripsage_memory_intents_total",
                "Memory intents by kind and outcome",
            ),
            &["intent", "outcome"],
        )
        .expect("memory_intents opts");

        let job_outcomes = IntCounterVec::new(
            Opts::new("tripsage_jobs_total", "Job consumptions by job and outcome"),
            &["job", "outcome"],
        )
        .expect("job_outcomes opts");

        for collector in [
            Box::new(request_counter.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(rate_limited_counter.clone()),
            Box::new(stream_events.clone()),
            Box::new(tool_calls.clone()),
            Box::new(memory_intents.clone()),
            Box::new(job_outcomes.clone()),
        ] {
            if let Err(err) = registry.register(collector) {
                tracing::warn!(error = %err, "metric registration failed");
            }
        }

        ServerMetrics {
            registry,
            request_counter,
            rate_limited_counter,
            stream_events,
            tool_calls,
            memory_intents,
            job_outcomes,
        }
    })
}

pub fn record_request(endpoint: &str, status: u16) {
    get_or_init()
        .request_counter
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

pub fn record_rate_limited(route: &str) {
    get_or_init()
        .rate_limited_counter
        .with_label_values(&[route])
        .inc();
}

pub fn record_stream_events(count: usize) {
    get_or_init().stream_events.observe(count as f64);
}

pub fn record_tool_calls(count: usize) {
    get_or_init().tool_calls.observe(count as f64);
}

pub fn record_memory_intent(intent: &str, outcome: &str) {
    get_or_init()
        .memory_intents
        .with_label_values(&[intent, outcome])
        .inc();
}

pub fn record_job(job: &str, outcome: &str) {
    get_or_init()
        .job_outcomes
        .with_label_values(&[job, outcome])
        .inc();
}

/// Text exposition for the `/metrics` endpoint.
pub fn gather() -> Result<String, prometheus::Error> {
    let metrics = get_or_init();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metrics.registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_and_gather() {
        record_request("chat", 200);
        record_rate_limited("chat:stream");
        record_stream_events(7);
        record_tool_calls(2);
        record_memory_intent("turn_committed", "ok");
        record_job("notify", "ok");

        let text = gather().unwrap();
        assert!(text.contains("tripsage_requests_total"));
        assert!(text.contains("tripsage_rate_limited_total"));
    }
}
