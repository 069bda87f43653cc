use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Webhook requests accepted, by agent type.
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "outcome_desk_requests_total",
        "Webhook requests accepted for processing",
        &["agent"]
    )
    .expect("metric registration");

    /// Billable outcomes reached, by agent type.
    pub static ref OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "outcome_desk_outcomes_total",
        "Successful billable outcomes",
        &["agent"]
    )
    .expect("metric registration");

    /// Requests dropped by the safety layer, by agent type.
    pub static ref SAFETY_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "outcome_desk_safety_rejections_total",
        "Requests stopped by the safety layer",
        &["agent"]
    )
    .expect("metric registration");

    /// Total billed, in cents, across all agents.
    pub static ref EARNINGS_CENTS: IntCounter = register_int_counter!(
        "outcome_desk_earnings_cents_total",
        "Total amount billed in USD cents"
    )
    .expect("metric registration");
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> String {
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        REQUESTS_TOTAL.with_label_values(&["customer_support"]).inc();
        EARNINGS_CENTS.inc_by(99);
        let text = render();
        assert!(text.contains("outcome_desk_requests_total"));
        assert!(text.contains("outcome_desk_earnings_cents_total"));
    }
}
