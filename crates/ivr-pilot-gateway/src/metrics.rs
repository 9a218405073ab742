//! Metrics recording and the optional Prometheus endpoint.

use ivr_pilot_core::machine::{SideEffect, Transition};

/// Install the Prometheus metrics recorder and return the handle for rendering.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_recorder()
-> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record a call session being created.
pub fn record_call_started() {
    metrics::counter!("ivr_calls_total").increment(1);
    metrics::gauge!("ivr_calls_active").increment(1.0);
}

/// Record a call session being torn down.
pub fn record_call_ended(succeeded: bool) {
    metrics::gauge!("ivr_calls_active").decrement(1.0);
    let labels = [("outcome", if succeeded { "succeeded" } else { "in_progress" })];
    metrics::counter!("ivr_calls_ended_total", &labels).increment(1);
}

pub fn record_transcript() {
    metrics::counter!("ivr_transcripts_total").increment(1);
}

/// Record a matched step, labelled by the kind of action it took.
pub fn record_transition(transition: &Transition) {
    let action = match transition {
        Transition::Succeeded { .. } => "mark_success",
        Transition::Advanced {
            effect: SideEffect::EmitDtmf { .. },
            ..
        } => "send_digits",
        Transition::Advanced { .. } => "wait_only",
        _ => return,
    };
    let labels = [("action", action)];
    metrics::counter!("ivr_step_transitions_total", &labels).increment(1);
}

pub fn record_dtmf_send(ok: bool) {
    let labels = [("result", if ok { "ok" } else { "error" })];
    metrics::counter!("ivr_dtmf_sends_total", &labels).increment(1);
}

/// Record a dropped inbound event of a given kind.
pub fn record_protocol_violation(kind: &'static str) {
    let labels = [("kind", kind)];
    metrics::counter!("ivr_protocol_violations_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder can be installed per process.
        if let Ok(handle) = install_prometheus_recorder() {
            record_call_started();
            assert!(handle.render().contains("ivr_calls_total"));
        }
    }

    #[test]
    fn test_record_call_lifecycle_does_not_panic() {
        // No recorder installed: the metrics crate falls back to a no-op.
        record_call_started();
        record_transcript();
        record_call_ended(true);
    }

    #[test]
    fn test_record_transitions_does_not_panic() {
        record_transition(&Transition::NoMatch);
        record_transition(&Transition::Succeeded {
            from: "step6".into(),
            phrase: "time".into(),
        });
        record_dtmf_send(false);
        record_protocol_violation("malformed_event");
    }
}
