use std::time::Instant;

use reqwest::Client;

use vigil_core::error::AppError;
use vigil_core::traits::{FetchOutcome, Fetcher};

/// Plain HTTP fetcher using reqwest.
///
/// Suitable for server-rendered sites and tests; client-side-rendered
/// pages need [`crate::BrowserPool`]. HTTP error statuses are reported
/// in the outcome, not as errors — the workflow owns that policy.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::NetworkError(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new("Mozilla/5.0 (compatible; Vigil/0.1)").expect("Failed to create HTTP client")
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, AppError> {
        let started = Instant::now();

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(30)
            } else if e.is_connect() {
                AppError::TransientFetch(format!("connection failed: {e}"))
            } else {
                AppError::NetworkError(e.to_string())
            }
        })?;

        let http_status = response.status().as_u16();
        let final_url = response.url().to_string();
        let raw_html = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("failed to read response body: {e}")))?;

        Ok(FetchOutcome {
            raw_html,
            http_status,
            final_url,
            elapsed: started.elapsed(),
        })
    }
}
