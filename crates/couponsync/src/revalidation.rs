//! Clients of the external revalidation endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use couponsync_core::revalidation::{
    RevalidationError, RevalidationOutcome, RevalidationRequest, Revalidator,
};
use couponsync_core::resilience::Dependency;

use crate::config::Config;

/// Posts `{type, identifier, metadata}` to the edge/SSR revalidation endpoint.
#[derive(Debug, Clone)]
pub struct HttpRevalidator {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpRevalidator {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RevalidationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RevalidationError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl Revalidator for HttpRevalidator {
    async fn revalidate(
        &self,
        request: &RevalidationRequest,
    ) -> Result<RevalidationOutcome, RevalidationError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RevalidationError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                entity_type = %request.entity_type,
                identifier = %request.identifier,
                "Revalidation accepted"
            );
            return Ok(RevalidationOutcome::Revalidated);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(RevalidationError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Stand-in used when no revalidation endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRevalidator;

#[async_trait]
impl Revalidator for DisabledRevalidator {
    async fn revalidate(
        &self,
        _request: &RevalidationRequest,
    ) -> Result<RevalidationOutcome, RevalidationError> {
        Ok(RevalidationOutcome::Skipped)
    }
}

/// Picks the HTTP revalidator when `REVALIDATION_URL` is set.
pub fn revalidator_from_config(config: &Config) -> Result<Arc<dyn Revalidator>, RevalidationError> {
    match &config.revalidation_url {
        Some(url) => {
            let timeout = config.breaker(Dependency::Revalidation).call_timeout;
            tracing::info!(url = %url, "External revalidation enabled");
            Ok(Arc::new(HttpRevalidator::new(
                url.clone(),
                config.revalidation_token.clone(),
                timeout,
            )?))
        }
        None => {
            tracing::info!("REVALIDATION_URL not set, external revalidation disabled");
            Ok(Arc::new(DisabledRevalidator))
        }
    }
}
