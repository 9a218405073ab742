//! Gateway shared state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ivr_pilot_core::config::Config;
use ivr_pilot_core::error::IvrError;
use ivr_pilot_media::{DeepgramBridge, TranscriptionBridge};

use crate::calls::CallRuntime;
use crate::effector::{CallControl, TwilioCallControl};
use crate::registry::SessionRegistry;

/// Shared gateway state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub runtime: Arc<CallRuntime>,
    pub started_at: DateTime<Utc>,
    #[cfg(feature = "prometheus")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    /// Build state with explicit collaborators. The flow is validated here.
    pub fn new(
        config: Arc<Config>,
        bridge: Arc<dyn TranscriptionBridge>,
        control: Arc<dyn CallControl>,
    ) -> Result<Self, IvrError> {
        let flow = Arc::new(config.flow_definition()?);
        let registry = Arc::new(SessionRegistry::new());
        let runtime = Arc::new(CallRuntime::new(
            flow,
            registry.clone(),
            bridge,
            control,
            config.telephony().on_send_failure,
        ));

        Ok(Self {
            config,
            registry,
            runtime,
            started_at: Utc::now(),
            #[cfg(feature = "prometheus")]
            metrics: None,
        })
    }

    /// Build state wired to Deepgram and Twilio from config.
    pub fn from_config(config: Config) -> Result<Self, IvrError> {
        let bridge = Arc::new(DeepgramBridge::new(config.transcription()));
        let control = Arc::new(TwilioCallControl::new(&config.telephony()));
        Self::new(Arc::new(config), bridge, control)
    }

    #[cfg(feature = "prometheus")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivr_pilot_core::config::FlowConfig;
    use ivr_pilot_core::error::FlowError;
    use ivr_pilot_core::flow::{ActionConfig, StepConfig};

    #[test]
    fn test_from_config_uses_built_in_flow() {
        let state = GatewayState::from_config(Config::default()).unwrap();
        assert_eq!(state.runtime.flow().len(), 6);
    }

    #[test]
    fn test_invalid_flow_prevents_startup() {
        let config = Config {
            flow: Some(FlowConfig {
                steps: vec![StepConfig {
                    id: "step1".into(),
                    listen_for: vec!["hello".into()],
                    action: ActionConfig::WaitOnly,
                    next: "nowhere".into(),
                }],
            }),
            ..Default::default()
        };
        match GatewayState::from_config(config) {
            Err(IvrError::Flow(FlowError::DanglingNext { step, next })) => {
                assert_eq!(step, "step1");
                assert_eq!(next, "nowhere");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("invalid flow accepted"),
        }
    }
}
