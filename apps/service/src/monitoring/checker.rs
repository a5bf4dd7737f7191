use anyhow::Result;
use reqwest::Method;
use std::error::Error as StdError;
use std::time::Duration;

use crate::config::CheckerConfig;
use crate::database::models::Target;
use crate::error::ProbeError;

/// What a probe observed when the target answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status_code: u16,
}

/// Checker trait for performing a single probe against a target.
///
/// Implementations report transport problems as `ProbeError`; judging the
/// status code is left to the caller.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, target: &Target) -> Result<ProbeResponse, ProbeError>;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(config: &CheckerConfig) -> Result<Self> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect)
            .pool_max_idle_per_host(config.max_idle_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds));
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self { client: builder.build()? })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, target: &Target) -> Result<ProbeResponse, ProbeError> {
        let method = Method::from_bytes(target.method.to_uppercase().as_bytes())
            .map_err(|_| ProbeError::Request(format!("invalid HTTP method {:?}", target.method)))?;

        let mut request = self.client.request(method, &target.url).timeout(target.timeout());
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &target.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(classify_error)?;

        Ok(ProbeResponse { status_code: response.status().as_u16() })
    }
}

/// Flatten an error and its sources into one line
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

fn looks_like_dns_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    ["dns error", "failed to lookup address", "name or service not known", "no such host", "nodename nor servname"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Map a reqwest failure onto the probe failure taxonomy
fn classify_error(error: reqwest::Error) -> ProbeError {
    if error.is_timeout() {
        return ProbeError::Timeout;
    }

    let message = error_chain(&error);
    if error.is_connect() {
        if looks_like_dns_failure(&message) {
            ProbeError::Dns(message)
        } else {
            ProbeError::Connection(message)
        }
    } else {
        ProbeError::Request(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response on a random local port
    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{addr}/health")
    }

    fn checker() -> HttpChecker {
        let config = CheckerConfig { use_system_proxy: false, ..CheckerConfig::default() };
        HttpChecker::new(&config).unwrap()
    }

    #[tokio::test]
    async fn reports_status_code() {
        let url = serve_once("204 No Content").await;
        let target = Target::new(url).with_interval(60, 5);

        let response = checker().check(&target).await.unwrap();
        assert_eq!(response.status_code, 204);
    }

    #[tokio::test]
    async fn server_errors_are_responses_not_probe_errors() {
        let url = serve_once("503 Service Unavailable").await;
        let target = Target::new(url).with_interval(60, 5);

        let response = checker().check(&target).await.unwrap();
        assert_eq!(response.status_code, 503);
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let target = Target::new(format!("http://{addr}/")).with_interval(60, 5);

        let error = checker().check(&target).await.unwrap_err();
        assert!(matches!(error, ProbeError::Connection(_)), "unexpected error: {error:?}");
    }

    #[tokio::test]
    async fn invalid_method_is_a_request_error() {
        let mut target = Target::new("http://127.0.0.1:9/").with_interval(60, 5);
        target.method = "NOT A METHOD".into();

        let error = checker().check(&target).await.unwrap_err();
        assert!(matches!(error, ProbeError::Request(_)));
    }

    #[test]
    fn dns_messages_are_recognised() {
        assert!(looks_like_dns_failure(
            "error sending request: client error (Connect): dns error: failed to lookup address information"
        ));
        assert!(!looks_like_dns_failure("tcp connect error: Connection refused (os error 111)"));
    }
}
