use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, header};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::message::WireMessage;
use crate::registry::Address;

/// Remote mailbox operations - allows mocking in tests
#[cfg_attr(test, mockall::automock)]
pub trait Gateway: Send + Sync {
    /// Issues a brand-new temporary address
    fn generate_address(&self) -> impl std::future::Future<Output = Result<Address>> + Send;

    /// Lists every message received by `email`, in the gateway's order
    fn list_messages(
        &self,
        email: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WireMessage>>> + Send;

    /// Marks a message read or unread
    fn set_read(
        &self,
        message_id: &str,
        read: bool,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Deletes a message for good
    fn delete_message(&self, message_id: &str)
    -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Some API builds wrap payloads in `{"data": ...}`, others send them bare
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(inner) => inner,
        }
    }
}

/// Decodes a success body, accepting either envelope shape
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice::<Envelope<T>>(body)
        .map(Envelope::into_inner)
        .map_err(|e| GatewayError::transport(format!("Invalid response body: {e}")))
}

/// Gateway client speaking the temp-mail REST API over HTTP(S)
pub struct HttpGateway {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    base_url: String,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let roots = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                crate::debug_log!("gateway: no native TLS roots ({}), using bundled roots", e);
                hyper_rustls::HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let connector = roots.https_or_http().enable_http1().build();

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request and returns the body of a 2xx response
    async fn send(&self, method: Method, path: &str, body: Option<serde_json::Value>) -> Result<Bytes> {
        let uri = self.url(path);
        let payload = match body {
            Some(value) => Bytes::from(value.to_string()),
            None => Bytes::new(),
        };

        let request = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(Full::new(payload))
            .map_err(GatewayError::transport)?;

        crate::debug_log!("gateway: {} {}", method, uri);

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(GatewayError::transport)?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(GatewayError::transport)?
                .to_bytes();
            Ok::<_, GatewayError>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| GatewayError::timeout())??;

        crate::debug_log!("gateway: {} {} -> {}", method, uri, status.as_u16());

        if !status.is_success() {
            return Err(GatewayError::from_response(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown status"),
                &bytes,
            ));
        }

        Ok(bytes)
    }
}

impl Gateway for HttpGateway {
    async fn generate_address(&self) -> Result<Address> {
        let body = self.send(Method::POST, "/v1/addresses", None).await?;
        decode(&body)
    }

    async fn list_messages(&self, email: &str) -> Result<Vec<WireMessage>> {
        let path = format!("/v1/messages?email={}", urlencoding::encode(email));
        let body = self.send(Method::GET, &path, None).await?;
        // Go encodes an empty slice as null when it was never allocated
        let messages: Option<Vec<WireMessage>> = decode(&body)?;
        Ok(messages.unwrap_or_default())
    }

    async fn set_read(&self, message_id: &str, read: bool) -> Result<()> {
        let path = format!("/v1/messages/{}/read", urlencoding::encode(message_id));
        self.send(Method::PATCH, &path, Some(serde_json::json!({ "read": read })))
            .await?;
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let path = format!("/v1/messages/{}", urlencoding::encode(message_id));
        self.send(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Reads headers plus a content-length body, however the client splits its writes
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + content_length {
                    break;
                }
            }
        }

        String::from_utf8_lossy(&raw).to_string()
    }

    /// Serves exactly one canned HTTP response and hands back the raw request
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;

            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });

        (format!("http://{addr}"), handle)
    }

    fn gateway(base: &str) -> HttpGateway {
        HttpGateway::new(base, Duration::from_secs(5))
    }

    #[test]
    fn test_decode_bare_and_wrapped() {
        let bare: Address = decode(br#"{"email":"a@b.io","expires_at":"2030-01-01T00:00:00Z"}"#).unwrap();
        let wrapped: Address =
            decode(br#"{"data":{"email":"a@b.io","expires_at":"2030-01-01T00:00:00Z"}}"#).unwrap();
        assert_eq!(bare, wrapped);
        assert!(bare.expires_at.is_some());
    }

    #[test]
    fn test_decode_invalid_body_is_500() {
        let err = decode::<Address>(b"<html>oops</html>").unwrap_err();
        assert_eq!(err.status, 500);
    }

    #[tokio::test]
    async fn test_list_messages_encodes_email_query() {
        let (base, server) = serve_once(
            "200 OK",
            r#"[{"id":1,"from_address":"a@b.com","subject":null,"body":"hi","received_at":"2024-01-01T00:00:00Z","read_at":null}]"#,
        )
        .await;

        let messages = gateway(&base).list_messages("x+y@tempmail.io").await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("GET /v1/messages?email=x%2By%40tempmail.io HTTP/1.1"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from_address, "a@b.com");
    }

    #[tokio::test]
    async fn test_list_messages_null_is_empty() {
        let (base, server) = serve_once("200 OK", "null").await;
        let messages = gateway(&base).list_messages("a@tempmail.io").await.unwrap();
        server.await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_generate_address_posts() {
        let (base, server) = serve_once(
            "201 Created",
            r#"{"email":"new@tempmail.io","expires_at":"2030-01-01T00:00:00Z"}"#,
        )
        .await;

        let address = gateway(&base).generate_address().await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /v1/addresses HTTP/1.1"));
        assert_eq!(address.email, "new@tempmail.io");
    }

    #[tokio::test]
    async fn test_set_read_sends_patch_with_flag() {
        let (base, server) = serve_once("200 OK", "").await;

        gateway(&base).set_read("42", false).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("PATCH /v1/messages/42/read HTTP/1.1"));
        assert!(request.contains(r#"{"read":false}"#));
    }

    #[tokio::test]
    async fn test_delete_error_carries_status_and_text() {
        let (base, server) = serve_once("404 Not Found", "Message not found\n").await;

        let err = gateway(&base).delete_message("7").await.unwrap_err();
        let request = server.await.unwrap();

        assert!(request.starts_with("DELETE /v1/messages/7 HTTP/1.1"));
        assert_eq!(err.status, 404);
        assert_eq!(err.message, "API error: Message not found");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody is listening on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = gateway(&format!("http://{addr}"))
            .list_messages("a@tempmail.io")
            .await
            .unwrap_err();
        assert_eq!(err.status, crate::error::TRANSPORT_STATUS);
    }

    #[tokio::test]
    async fn test_mock_gateway_delete() {
        let mut mock = MockGateway::new();

        mock.expect_delete_message()
            .with(mockall::predicate::eq("email456"))
            .returning(|_| Box::pin(async { Ok(()) }));

        let result = mock.delete_message("email456").await;
        assert!(result.is_ok());
    }
}
