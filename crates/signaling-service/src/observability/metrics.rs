//! Metric recording functions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sig_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Negotiation is local crypto + SDP work; most complete well under 100ms
        .set_buckets_for_metric(
            Matcher::Prefix("sig_negotiation".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set negotiation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Hub Gauges
// ============================================================================

/// Metric: `sig_clients_active`
pub fn set_clients_active(count: usize) {
    // usize to f64 conversion is safe for realistic client counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_clients_active").set(count as f64);
}

/// Metric: `sig_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_rooms_active").set(count as f64);
}

/// Metric: `sig_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Hub Counters
// ============================================================================

/// Record an envelope delivered to a client queue.
///
/// Metric: `sig_messages_relayed_total`
/// Labels: `type`
pub fn record_message_relayed(message_type: &'static str) {
    counter!("sig_messages_relayed_total", "type" => message_type).increment(1);
}

/// Record an envelope that was not delivered.
///
/// Metric: `sig_messages_dropped_total`
/// Labels: `reason` (`queue_full`, `not_found`, `invalid`, `closed`)
pub fn record_message_dropped(reason: &'static str) {
    counter!("sig_messages_dropped_total", "reason" => reason).increment(1);
}

/// Record a client removed because its outbound queue was full or closed.
///
/// Metric: `sig_clients_evicted_total`
pub fn record_client_evicted() {
    counter!("sig_clients_evicted_total").increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Metric: `sig_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_sessions_active").set(count as f64);
}

/// Record a session entering `state`.
///
/// Metric: `sig_session_transitions_total`
/// Labels: `state`
pub fn record_session_transition(state: &'static str) {
    counter!("sig_session_transitions_total", "state" => state).increment(1);
}

/// Metric: `sig_sessions_swept_total`
pub fn record_sessions_swept(count: usize) {
    counter!("sig_sessions_swept_total").increment(count as u64);
}

/// Metric: `sig_audio_packets_dropped_total`
pub fn record_audio_packet_dropped() {
    counter!("sig_audio_packets_dropped_total").increment(1);
}

/// Record offer/answer processing time.
///
/// Metric: `sig_negotiation_duration_seconds`
/// Labels: `kind` (offer, answer, local_offer)
pub fn record_negotiation_duration(kind: &'static str, duration: Duration) {
    histogram!("sig_negotiation_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}

// ============================================================================
// Credential Metrics
// ============================================================================

/// Metric: `sig_credentials_issued_total`
pub fn record_credential_issued() {
    counter!("sig_credentials_issued_total").increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without an installed recorder these go to the global no-op recorder.
    #[test]
    fn test_recording_without_recorder_is_harmless() {
        set_clients_active(3);
        set_rooms_active(1);
        set_sessions_active(2);
        set_actor_mailbox_depth("hub", 10);
        record_message_relayed("offer");
        record_message_dropped("queue_full");
        record_client_evicted();
        record_session_transition("connected");
        record_sessions_swept(2);
        record_audio_packet_dropped();
        record_negotiation_duration("offer", Duration::from_millis(12));
        record_credential_issued();
    }

    #[test]
    fn test_relayed_counter_carries_type_label() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_message_relayed("offer");
            record_message_relayed("offer");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let (key, _, _, value) = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "sig_messages_relayed_total")
            .expect("counter recorded");

        assert!(key
            .key()
            .labels()
            .any(|label| label.key() == "type" && label.value() == "offer"));
        assert_eq!(value, &DebugValue::Counter(2));
    }
}
