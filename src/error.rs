use thiserror::Error;

/// Status used for failures that never produced an HTTP response
/// (connection refused, TLS, undecodable body).
pub const TRANSPORT_STATUS: u16 = 500;

/// Status used when a request exceeds the configured timeout
pub const TIMEOUT_STATUS: u16 = 408;

/// Longest response text carried into an error message
const MAX_DETAIL_CHARS: usize = 200;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// The only error kind surfaced by the mailbox core.
///
/// Every failure (non-2xx, transport, local precondition) funnels through
/// this type so views can show a single kind of notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status {status})")]
pub struct GatewayError {
    pub status: u16,
    pub message: String,
}

impl GatewayError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A failure below HTTP: the request never got a status back
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::new(TRANSPORT_STATUS, err.to_string())
    }

    pub fn timeout() -> Self {
        Self::new(TIMEOUT_STATUS, "Request timed out")
    }

    /// The message is not (or no longer) in the local collection
    pub fn not_found(id: &str) -> Self {
        Self::new(404, format!("Message {id} not found"))
    }

    pub fn no_address() -> Self {
        Self::new(400, "No email address yet. Generate an email address first.")
    }

    /// Builds the error for a non-2xx response.
    /// Prefers `{"error": "..."}` bodies, then plain text, then the reason phrase.
    pub fn from_response(status: u16, reason: &str, body: &[u8]) -> Self {
        let detail = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .or_else(|| {
                let text = String::from_utf8_lossy(body);
                text.lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| reason.to_string());

        Self::new(status, format!("API error: {}", truncate(&detail)))
    }
}

/// Keeps error text to one toast-sized line
fn truncate(detail: &str) -> String {
    if detail.chars().count() <= MAX_DETAIL_CHARS {
        return detail.to_string();
    }
    let mut cut: String = detail.chars().take(MAX_DETAIL_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_prefers_json_error_field() {
        let err = GatewayError::from_response(404, "Not Found", br#"{"error":"not found"}"#);
        assert_eq!(err.status, 404);
        assert_eq!(err.message, "API error: not found");
    }

    #[test]
    fn test_from_response_uses_plain_text_body() {
        // http.Error writes the text followed by a newline
        let err = GatewayError::from_response(404, "Not Found", b"Recipient not found\n");
        assert_eq!(err.message, "API error: Recipient not found");
    }

    #[test]
    fn test_from_response_falls_back_to_reason() {
        let err = GatewayError::from_response(500, "Internal Server Error", b"");
        assert_eq!(err.status, 500);
        assert_eq!(err.message, "API error: Internal Server Error");
    }

    #[test]
    fn test_from_response_keeps_first_line_of_html_page() {
        let page = format!(
            "\n<html><head><title>502 Bad Gateway</title></head>\n<body>{}</body></html>",
            "x".repeat(500)
        );
        let err = GatewayError::from_response(502, "Bad Gateway", page.as_bytes());

        assert_eq!(err.status, 502);
        assert_eq!(
            err.message,
            "API error: <html><head><title>502 Bad Gateway</title></head>"
        );
    }

    #[test]
    fn test_from_response_caps_long_text() {
        let body = "y".repeat(1000);
        let err = GatewayError::from_response(500, "Internal Server Error", body.as_bytes());

        let detail = err.message.trim_start_matches("API error: ");
        assert_eq!(detail.chars().count(), MAX_DETAIL_CHARS + 1);
        assert!(detail.ends_with('…'));
    }

    #[test]
    fn test_display_includes_status() {
        let err = GatewayError::new(500, "boom");
        assert_eq!(err.to_string(), "boom (status 500)");
    }

    #[test]
    fn test_transport_uses_500() {
        let err = GatewayError::transport("connection refused");
        assert_eq!(err.status, TRANSPORT_STATUS);
        assert_eq!(err.message, "connection refused");
    }
}
