//! Webhook delivery: POSTs each event as JSON to a configured URL.
//!
//! Requests run on a spawned tokio task so `notify` returns immediately.
//! Failures are logged and dropped.

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, warn};

use super::{GameEvent, Notifier};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WebhookNotifier {
    client: Client,
    url: SecretString,
}

impl WebhookNotifier {
    pub fn new(url: SecretString) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client, url })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: &GameEvent) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(event = event.name(), "No async runtime, webhook event dropped");
                return;
            }
        };

        let client = self.client.clone();
        let url = self.url.expose_secret().clone();
        let event = event.clone();
        handle.spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(event = event.name(), "Webhook delivered");
                }
                Ok(resp) => {
                    warn!(event = event.name(), status = %resp.status(), "Webhook rejected event");
                }
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Webhook delivery failed");
                }
            }
        });
    }
}
