use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};

struct LoopMetricHandles {
    actions: Counter<u64>,
    duration_ms: Histogram<f64>,
    passages_added: Counter<u64>,
    stops: Counter<u64>,
}

static METRICS: OnceCell<LoopMetricHandles> = OnceCell::new();

fn handles() -> &'static LoopMetricHandles {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepsearch.loop");
        LoopMetricHandles {
            actions: meter
                .u64_counter("deepsearch_actions_total")
                .with_description("Executed planner actions by type and status")
                .init(),
            duration_ms: meter
                .f64_histogram("deepsearch_action_duration_ms")
                .with_description("Action execution time in milliseconds")
                .init(),
            passages_added: meter
                .u64_counter("deepsearch_passages_added_total")
                .with_description("Passages appended by SEARCH and FETCH actions")
                .init(),
            stops: meter
                .u64_counter("deepsearch_loop_stops_total")
                .with_description("Completed loops by stop reason")
                .init(),
        }
    })
}

/// Record OTEL metrics for one executed action (no-op if no provider installed).
pub fn record_action_metrics(action: &'static str, status: &'static str, duration_ms: u64, passages_added: usize) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("action", action),
        KeyValue::new("status", status),
    ];

    metrics.actions.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
    if passages_added > 0 {
        metrics.passages_added.add(passages_added as u64, &attrs);
    }
}

pub fn record_loop_stop(reason: &str, iterations: usize) {
    handles().stops.add(
        1,
        &[
            KeyValue::new("reason", reason.to_string()),
            KeyValue::new("iterations", iterations as i64),
        ],
    );
}
