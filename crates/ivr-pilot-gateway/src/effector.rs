//! Call control: inject DTMF tones into a live call.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ivr_pilot_core::config::TelephonyConfig;
use ivr_pilot_core::dtmf::DtmfDigits;
use ivr_pilot_core::error::CallControlError;

use crate::twiml;

#[async_trait]
pub trait CallControl: Send + Sync {
    /// Play `digits` into the call. One request per invocation; never retried.
    async fn send_digits(&self, call_id: &str, digits: &DtmfDigits) -> Result<(), CallControlError>;
}

/// Twilio REST call update with an inline `<Play digits>` document.
pub struct TwilioCallControl {
    client: reqwest::Client,
    api_base_url: String,
    account_sid: Option<String>,
    auth_token: Option<String>,
}

impl TwilioCallControl {
    pub fn new(config: &TelephonyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_sid: config.resolve_account_sid(),
            auth_token: config.resolve_auth_token(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some()
    }

    fn call_url(&self, account_sid: &str, call_id: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{account_sid}/Calls/{call_id}.json",
            self.api_base_url
        )
    }
}

#[async_trait]
impl CallControl for TwilioCallControl {
    async fn send_digits(&self, call_id: &str, digits: &DtmfDigits) -> Result<(), CallControlError> {
        let account_sid = self
            .account_sid
            .as_deref()
            .ok_or_else(|| CallControlError::NotConfigured("account SID".into()))?;
        let auth_token = self
            .auth_token
            .as_deref()
            .ok_or_else(|| CallControlError::NotConfigured("auth token".into()))?;

        let url = self.call_url(account_sid, call_id);
        let document = twiml::play_digits(digits);
        debug!(%call_id, %digits, "Updating call with digit playback");

        let resp = self
            .client
            .post(&url)
            .basic_auth(account_sid, Some(auth_token))
            .form(&[("Twiml", document.as_str())])
            .send()
            .await
            .map_err(|e| CallControlError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallControlError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Form, Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;

    #[derive(Debug, Clone)]
    struct Captured {
        account: String,
        call: String,
        authorization: Option<String>,
        form: HashMap<String, String>,
    }

    type Captures = Arc<Mutex<Vec<Captured>>>;

    async fn update_call(
        State(captures): State<Captures>,
        Path((account, call)): Path<(String, String)>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        captures.lock().unwrap().push(Captured {
            account,
            call: call.clone(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
            form,
        });
        if call == "CAgone.json" {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        }
    }

    async fn start_fake_api() -> (String, Captures) {
        let captures: Captures = Arc::default();
        let app = Router::new()
            .route("/2010-04-01/Accounts/{account}/Calls/{call}", post(update_call))
            .with_state(captures.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), captures)
    }

    fn config(base: &str) -> TelephonyConfig {
        TelephonyConfig {
            account_sid: Some("AC123".into()),
            account_sid_env: None,
            auth_token: Some("secret".into()),
            auth_token_env: None,
            api_base_url: base.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_digits_posts_play_document() {
        let (base, captures) = start_fake_api().await;
        let control = TwilioCallControl::new(&config(&base));
        let digits = DtmfDigits::parse("1w2w3w4").unwrap();

        control.send_digits("CA1", &digits).await.unwrap();

        let captured = captures.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].account, "AC123");
        assert_eq!(captured[0].call, "CA1.json");
        assert_eq!(
            captured[0].form.get("Twiml").map(String::as_str),
            Some(r#"<Response><Play digits="1w2w3w4"/></Response>"#)
        );
        assert!(captured[0]
            .authorization
            .as_deref()
            .is_some_and(|a| a.starts_with("Basic ")));
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let (base, _captures) = start_fake_api().await;
        let control = TwilioCallControl::new(&config(&base));
        let digits = DtmfDigits::parse("1").unwrap();

        let err = control.send_digits("CAgone", &digits).await.unwrap_err();
        assert!(matches!(err, CallControlError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.auth_token = None;
        let control = TwilioCallControl::new(&cfg);
        assert!(!control.is_configured());

        let err = control
            .send_digits("CA1", &DtmfDigits::parse("1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallControlError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transport_error() {
        let control = TwilioCallControl::new(&config("http://127.0.0.1:9"));
        let err = control
            .send_digits("CA1", &DtmfDigits::parse("1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallControlError::Transport(_)));
    }
}
