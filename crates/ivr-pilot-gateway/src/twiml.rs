//! TwiML documents sent to the telephony provider.

use ivr_pilot_core::dtmf::DtmfDigits;
use quick_xml::escape::escape;

/// Secure WebSocket URL of the media endpoint.
///
/// `public_url` (any scheme, host and optional path prefix) wins over the
/// request's `Host` header.
pub fn media_stream_url(public_url: Option<&str>, host: &str, media_path: &str) -> String {
    let authority = match public_url {
        Some(url) if !url.trim().is_empty() => {
            let url = url.trim();
            let stripped = ["https://", "http://", "wss://", "ws://"]
                .iter()
                .find_map(|scheme| url.strip_prefix(scheme))
                .unwrap_or(url);
            stripped.trim_end_matches('/').to_string()
        }
        _ => host.to_string(),
    };
    format!("wss://{authority}{media_path}")
}

/// Start streaming inbound audio to `stream_url`, then bridge the call to
/// `dial_number` when one is configured.
pub fn voice_response(stream_url: &str, dial_number: Option<&str>) -> String {
    let mut doc = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    doc.push_str("<Response><Start><Stream url=\"");
    doc.push_str(&escape(stream_url));
    doc.push_str("\"/></Start>");
    if let Some(number) = dial_number {
        doc.push_str("<Dial>");
        doc.push_str(&escape(number));
        doc.push_str("</Dial>");
    }
    doc.push_str("</Response>");
    doc
}

/// Play a digit sequence into the live call.
pub fn play_digits(digits: &DtmfDigits) -> String {
    format!(
        "<Response><Play digits=\"{}\"/></Response>",
        escape(digits.as_str())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_response_streams_and_dials() {
        let doc = voice_response("wss://example.com/media", Some("+15551234567"));
        assert!(doc.contains(r#"<Start><Stream url="wss://example.com/media"/></Start>"#));
        assert!(doc.contains("<Dial>+15551234567</Dial>"));
        assert!(doc.ends_with("</Response>"));
    }

    #[test]
    fn test_voice_response_without_number() {
        let doc = voice_response("wss://example.com/media", None);
        assert!(!doc.contains("<Dial>"));
    }

    #[test]
    fn test_values_are_escaped() {
        let doc = voice_response("wss://h/media?a=1&b=\"2\"", Some("<1>"));
        assert!(doc.contains("a=1&amp;b=&quot;2&quot;"));
        assert!(doc.contains("<Dial>&lt;1&gt;</Dial>"));
    }

    #[test]
    fn test_media_stream_url() {
        assert_eq!(
            media_stream_url(None, "abc.ngrok.io", "/media"),
            "wss://abc.ngrok.io/media"
        );
        assert_eq!(
            media_stream_url(Some("https://ivr.example.com/"), "ignored:3000", "/media"),
            "wss://ivr.example.com/media"
        );
        assert_eq!(
            media_stream_url(Some("  "), "localhost:3000", "/stream"),
            "wss://localhost:3000/stream"
        );
    }

    #[test]
    fn test_play_digits() {
        let digits = DtmfDigits::parse("1w2w3w4").unwrap();
        assert_eq!(
            play_digits(&digits),
            r#"<Response><Play digits="1w2w3w4"/></Response>"#
        );
    }
}
