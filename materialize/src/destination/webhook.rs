//! Webhook adapter: each transaction's documents are POSTed as one JSON array per
//! binding.
//!
//! Requests are retried until they succeed or the session shuts down, so a
//! document may be delivered more than once.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error};
use url::Url;

use crate::binding::{Binding, Resource};
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, MaterializeResult};
use crate::types::{Checkpoint, LoadRequest, Loaded, StoreRequest};
use crate::{bail, materialize_error};

/// Delay before the given attempt of a webhook request.
pub fn backoff(attempt: u32) -> Duration {
    match attempt {
        0 => Duration::ZERO,
        1 => Duration::from_millis(100),
        2..=10 => Duration::from_secs(u64::from(attempt - 1)),
        _ => Duration::from_secs(10),
    }
}

struct WebhookBinding {
    url: Url,
    /// Open JSON array of the documents stored in this transaction.
    body: Vec<u8>,
}

pub struct WebhookAdapter {
    client: Client,
    bindings: Vec<WebhookBinding>,
}

impl WebhookAdapter {
    pub fn open(bindings: &[Binding]) -> MaterializeResult<WebhookAdapter> {
        let bindings = bindings
            .iter()
            .map(|binding| match &binding.resource {
                Resource::Webhook { url } => Ok(WebhookBinding {
                    url: url.clone(),
                    body: Vec::new(),
                }),
                _ => Err(materialize_error!(
                    ErrorKind::InvalidResourceConfig,
                    "Binding does not target a webhook",
                    binding.target()
                )),
            })
            .collect::<MaterializeResult<Vec<_>>>()?;

        Ok(WebhookAdapter {
            client: Client::new(),
            bindings,
        })
    }

    /// Webhook bindings are delta-only and never load.
    pub async fn load(&mut self, keys: Vec<LoadRequest>) -> MaterializeResult<Vec<Loaded>> {
        bail!(
            ErrorKind::InvariantViolation,
            "Load is not supported by webhook destinations",
            format!("{} keys requested", keys.len())
        );
    }

    pub fn prepare(&mut self, _checkpoint: &Checkpoint) -> MaterializeResult<()> {
        if let Some(binding) = self.bindings.iter().find(|b| !b.body.is_empty()) {
            bail!(
                ErrorKind::InvariantViolation,
                "Prepare found a webhook body left from a previous transaction",
                binding.url
            );
        }

        Ok(())
    }

    pub fn store(&mut self, rows: Vec<StoreRequest>) -> MaterializeResult<()> {
        for row in rows {
            let Some(binding) = self.bindings.get_mut(row.binding) else {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Store references an unknown binding",
                    row.binding
                );
            };

            if binding.body.is_empty() {
                binding.body.extend_from_slice(b"[\n");
            } else {
                binding.body.extend_from_slice(b",\n");
            }
            serde_json::to_writer(&mut binding.body, &row.document)?;
        }

        Ok(())
    }

    /// POSTs each non-empty body in binding order, retrying with [`backoff`] until
    /// the endpoint answers with a success status.
    ///
    /// Shutdown cancels both the wait between attempts and a request in flight.
    pub async fn commit(&mut self, mut shutdown_rx: ShutdownRx) -> MaterializeResult<()> {
        for binding in &mut self.bindings {
            if binding.body.is_empty() {
                continue;
            }
            binding.body.extend_from_slice(b"\n]");

            let mut attempt = 0;
            loop {
                let client = &self.client;
                let url = binding.url.clone();
                let body = binding.body.clone();
                let delay = backoff(attempt);
                let send = async move {
                    tokio::time::sleep(delay).await;
                    post(client, &url, body).await
                };

                // A hanging endpoint must not hold the commit past shutdown.
                let result = tokio::select! {
                    biased;

                    _ = shutdown_rx.wait() => {
                        binding.body.clear();
                        bail!(
                            ErrorKind::Canceled,
                            "Webhook commit was canceled by shutdown",
                            binding.url
                        );
                    }
                    result = send => result,
                };

                match result {
                    Ok(()) => {
                        debug!(url = %binding.url, attempt, "invoked webhook");
                        binding.body.clear();
                        break;
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            attempt,
                            url = %binding.url,
                            "failed to invoke webhook (will retry)"
                        );
                    }
                }

                attempt = attempt.saturating_add(1);
            }
        }

        Ok(())
    }

    pub async fn destroy(self) {}
}

async fn post(client: &Client, url: &Url, body: Vec<u8>) -> MaterializeResult<()> {
    let response = client
        .post(url.clone())
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        bail!(
            ErrorKind::DestinationError,
            "Unexpected webhook response code",
            format!("{} from {url}", status.as_u16())
        );
    }

    Ok(())
}
