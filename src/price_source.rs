use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::ledger::Platform;

#[derive(Debug, Error)]
pub enum PriceSourceError {
    #[error("price service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price service has no price for {subject} on {platform}")]
    NotFound { subject: String, platform: Platform },

    #[error("price service credentials are not configured")]
    MissingCredentials,
}

/// Anything that can look up a current market price for a player. The ledger
/// core never calls this; only the flow/driver layer may offer a looked-up
/// quote, and whatever comes back is an already-validated integer or a named
/// failure. There is no simulated fallback price.
pub trait PriceSource {
    fn quote(
        &self,
        subject: &str,
        platform: Platform,
    ) -> impl Future<Output = Result<u32, PriceSourceError>> + Send;
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: Option<u64>,
}

/// JSON price-check API client. Authenticates with a bearer token from the
/// environment configuration.
pub struct HttpPriceSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPriceSource {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// `None` when no price API credentials are configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.has_price_api() {
            return None;
        }
        Some(Self::new(
            config.price_api_base_url.clone(),
            config.price_api_key.clone(),
        ))
    }
}

impl PriceSource for HttpPriceSource {
    async fn quote(&self, subject: &str, platform: Platform) -> Result<u32, PriceSourceError> {
        if self.api_key.is_empty() {
            return Err(PriceSourceError::MissingCredentials);
        }

        let url = format!("{}/players/price", self.base_url.trim_end_matches('/'));
        debug!("🌐 Looking up {} on {} at {}", subject, platform, url);

        let platform_param = platform.tag().to_lowercase();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("name", subject), ("platform", platform_param.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<QuoteResponse>()
            .await?;

        match response.price {
            Some(price) if price > 0 => {
                Ok(u32::try_from(price).map_err(|_| PriceSourceError::NotFound {
                    subject: subject.to_string(),
                    platform,
                })?)
            }
            _ => Err(PriceSourceError::NotFound {
                subject: subject.to_string(),
                platform,
            }),
        }
    }
}
