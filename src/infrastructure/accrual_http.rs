use crate::domain::accrual::{AccrualError, AccrualReport};
use crate::domain::order::OrderNumber;
use crate::domain::ports::AccrualProvider;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the accrual provider's `GET /api/orders/{number}` endpoint.
///
/// One request per lookup, no retries.
#[derive(Clone)]
pub struct HttpAccrualClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AccrualError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccrualError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn order_url(&self, number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

#[async_trait]
impl AccrualProvider for HttpAccrualClient {
    async fn fetch_accrual(&self, number: &OrderNumber) -> Result<AccrualReport, AccrualError> {
        let url = self.order_url(number);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(order = %number, status = status.as_u16(), "accrual provider responded");

        match status {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| AccrualError::Transport(e.to_string()))?;
                if body.iter().all(u8::is_ascii_whitespace) {
                    return Err(AccrualError::NotRegistered);
                }
                serde_json::from_slice(&body).map_err(|e| AccrualError::Decode(e.to_string()))
            }
            StatusCode::NO_CONTENT => Err(AccrualError::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok());
                Err(AccrualError::throttled_from_header(retry_after))
            }
            StatusCode::INTERNAL_SERVER_ERROR => Err(AccrualError::ServerError),
            other => Err(AccrualError::UnexpectedStatus(other.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_url_strips_trailing_slash() {
        let client = HttpAccrualClient::with_client(reqwest::Client::new(), "http://accrual:8080/");
        let number = OrderNumber::parse("12345678903").unwrap();
        assert_eq!(
            client.order_url(&number),
            "http://accrual:8080/api/orders/12345678903"
        );
    }
}
