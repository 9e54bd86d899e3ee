// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics.

use metrics::{describe_counter, describe_gauge};

/// Register all Palaver metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("palaver_messages_total", "Messages relayed, by sender role");
    describe_counter!(
        "palaver_messages_unpersisted_total",
        "Messages delivered live whose persistence write failed"
    );
    describe_counter!(
        "palaver_conversations_total",
        "Conversation lifecycle events (created, claimed, ended, expired)"
    );
    describe_gauge!("palaver_online_participants", "Connected participants, by role");
    describe_counter!(
        "palaver_claim_conflicts_total",
        "Claims rejected because another agent won the race"
    );
}

/// Record a relayed message.
pub fn record_message(sender_role: &str) {
    metrics::counter!("palaver_messages_total", "sender_role" => sender_role.to_string())
        .increment(1);
}

/// Record a message that was delivered but not stored.
pub fn record_unpersisted_message() {
    metrics::counter!("palaver_messages_unpersisted_total").increment(1);
}

/// Record a conversation lifecycle event.
pub fn record_conversation_event(event: &'static str) {
    metrics::counter!("palaver_conversations_total", "event" => event).increment(1);
}

/// Set the number of online participants for a role.
pub fn set_online_participants(role: &str, count: usize) {
    metrics::gauge!("palaver_online_participants", "role" => role.to_string()).set(count as f64);
}

/// Record a lost claim race.
pub fn record_claim_conflict() {
    metrics::counter!("palaver_claim_conflicts_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn recorded_metrics_render_with_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_message("client");
            record_message("client");
            record_conversation_event("claimed");
            record_claim_conflict();
            set_online_participants("agent", 3);
        });

        let text = handle.render();
        assert!(text.contains(r#"palaver_messages_total{sender_role="client"} 2"#), "{text}");
        assert!(text.contains(r#"palaver_conversations_total{event="claimed"} 1"#), "{text}");
        assert!(text.contains("palaver_claim_conflicts_total 1"), "{text}");
        assert!(text.contains(r#"palaver_online_participants{role="agent"}"#), "{text}");
    }
}
