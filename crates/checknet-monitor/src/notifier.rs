//! Notification delivery.
//!
//! A notifier reports `Ok(true)` only when the transport confirmed the
//! message. `Ok(false)` means "not delivered, try again later"; `Err` is
//! reserved for hard transport failures.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::NotifyError;

/// Boxed future alias for notification results.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, NotifyError>> + Send + 'a>>;

/// Attempts to deliver a titled message.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, title: &'a str, body: &'a str) -> NotifyFuture<'a>;
}

pub const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover push-notification client.
#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    client: reqwest::Client,
    url: String,
    app_token: String,
    user_key: String,
}

#[derive(Debug, Deserialize)]
struct PushoverResponse {
    status: i64,
    #[serde(default)]
    errors: Vec<String>,
}

impl PushoverNotifier {
    pub fn new(
        app_token: impl Into<String>,
        user_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("checknet/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: PUSHOVER_API_URL.to_string(),
            app_token: app_token.into(),
            user_key: user_key.into(),
        })
    }

    /// Point the client at a different endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn send(&self, title: &str, body: &str) -> Result<bool, NotifyError> {
        let form = [
            ("token", self.app_token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", title),
            ("message", body),
        ];
        let resp = self.client.post(&self.url).form(&form).send().await?;
        let status = resp.status();

        if status.is_server_error() {
            warn!(%status, %title, "pushover server error");
            return Ok(false);
        }

        let parsed: PushoverResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(%status, error = %e, "unreadable pushover response");
                return Ok(false);
            }
        };

        if status.is_success() && parsed.status == 1 {
            debug!(%title, "pushover accepted notification");
            Ok(true)
        } else {
            warn!(%status, errors = ?parsed.errors, %title, "pushover rejected notification");
            Ok(false)
        }
    }
}

impl Notifier for PushoverNotifier {
    fn notify<'a>(&'a self, title: &'a str, body: &'a str) -> NotifyFuture<'a> {
        Box::pin(self.send(title, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response on a local port and return its URL.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
        });
        format!("http://{addr}/1/messages.json")
    }

    fn notifier(url: String) -> PushoverNotifier {
        PushoverNotifier::new("app", "user", Duration::from_secs(2))
            .unwrap()
            .with_url(url)
    }

    #[tokio::test]
    async fn accepted_message_is_confirmed() {
        let url = one_shot_server("200 OK", r#"{"status":1,"request":"abc"}"#).await;
        assert!(notifier(url).notify("t", "b").await.unwrap());
    }

    #[tokio::test]
    async fn rejected_message_is_not_confirmed() {
        let url = one_shot_server(
            "400 Bad Request",
            r#"{"status":0,"errors":["user key is invalid"],"request":"abc"}"#,
        )
        .await;
        assert!(!notifier(url).notify("t", "b").await.unwrap());
    }

    #[tokio::test]
    async fn server_error_is_not_confirmed() {
        let url = one_shot_server("503 Service Unavailable", "{}").await;
        assert!(!notifier(url).notify("t", "b").await.unwrap());
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let n = notifier("http://127.0.0.1:1/1/messages.json".to_string());
        assert!(matches!(n.notify("t", "b").await, Err(NotifyError::Http(_))));
    }
}
