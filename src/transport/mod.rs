use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::schema::{Submission, UploadAck};

/// Delivery failure for one submission. No retry policy lives here;
/// re-delivery is whoever re-queues a failed file.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network fault, timeout, or an undecodable response body.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    /// The service answered 200 but did not accept the submission.
    #[error("server rejected submission: {0}")]
    Rejected(String),
}

/// HTTP delivery of validated submissions to the aggregation service.
///
/// One POST per submission with a short fixed timeout. A timed-out call is a
/// failure to the caller even if the server in fact committed; that ambiguity
/// is inherent to the protocol and deliberately not papered over.
pub struct UploadClient {
    http: reqwest::Client,
    endpoint: String,
}

impl UploadClient {
    /// Creates a client posting to `endpoint` with the given timeout.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let timeout = if timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            timeout
        };

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    /// Delivers one submission, succeeding only on a 2xx status carrying an
    /// `ok: true` acknowledgement.
    pub async fn send(&self, submission: &Submission) -> Result<(), TransportError> {
        debug!(day = submission.day(), "uploading submission");

        let response = self.http.post(&self.endpoint).json(submission).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        let ack: UploadAck = response.json().await?;
        if !ack.ok {
            return Err(TransportError::Rejected(
                ack.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use serde_json::json;

    fn submission() -> Submission {
        schema::validate(&json!({
            "schema_version": 1,
            "day": "2024-06-01",
            "buckets": {"P": "P0", "L": "L0", "B": "B0", "C": "C0"}
        }))
        .expect("valid payload")
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        // Bind then drop a listener so the port is known-closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let client = UploadClient::new(
            &format!("http://{addr}/upload"),
            Duration::from_millis(500),
        )
        .expect("build client");

        let err = client.send(&submission()).await.expect_err("must fail");
        assert!(matches!(err, TransportError::Request(_)), "{err}");
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        // Only checks that construction succeeds; the fallback keeps a
        // misconfigured zero timeout from meaning "wait forever".
        UploadClient::new("http://127.0.0.1:1/upload", Duration::ZERO).expect("build client");
    }
}
