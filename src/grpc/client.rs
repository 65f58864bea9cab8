//! Timeout-bounded client for the remote quota service.

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use super::proto::gubernator::{
    v1_client::V1Client, GetRateLimitsReq, HealthCheckReq, HealthCheckResp, RateLimitReq,
    RateLimitResp,
};
use crate::config::RemoteConfig;
use crate::error::{LimitgateError, Result};

/// Shared transport handle to the quota service.
///
/// Cloning is cheap: clones multiplex over the same HTTP/2 channel, so a
/// single limiter can serve any number of concurrent evaluations. Calls are
/// never retried; a failed call is reported once to the caller.
#[derive(Debug, Clone)]
pub struct RemoteLimiter {
    /// Generated gRPC client
    client: V1Client<Channel>,
    /// Deadline applied to every call
    timeout: Duration,
}

impl RemoteLimiter {
    /// Create a limiter whose channel connects on first use.
    ///
    /// Construction never touches the network, so an unreachable service
    /// surfaces as a per-call error rather than a startup failure.
    pub fn connect_lazy(config: &RemoteConfig) -> Result<Self> {
        let endpoint =
            Endpoint::from_shared(config.address.clone())?.connect_timeout(config.connect_timeout());

        info!(
            address = %config.address,
            timeout_ms = config.timeout_ms,
            "Quota service client configured"
        );

        Ok(Self::from_channel(endpoint.connect_lazy(), config.timeout()))
    }

    /// Wrap an existing channel.
    pub fn from_channel(channel: Channel, timeout: Duration) -> Self {
        Self {
            client: V1Client::new(channel),
            timeout,
        }
    }

    /// The per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit a single rate limit request and return its result.
    ///
    /// Fails on transport errors, on timeout, on an empty result set and on
    /// an in-band error reported for the request.
    pub async fn get_rate_limit(&self, request: RateLimitReq) -> Result<RateLimitResp> {
        let mut client = self.client.clone();
        let mut call = tonic::Request::new(GetRateLimitsReq {
            requests: vec![request],
        });
        call.set_timeout(self.timeout);

        let response = tokio::time::timeout(self.timeout, client.get_rate_limits(call))
            .await
            .map_err(|_| LimitgateError::Timeout(self.timeout))??;

        let resp = response
            .into_inner()
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| LimitgateError::Protocol("empty response from server".to_string()))?;

        if !resp.error.is_empty() {
            return Err(LimitgateError::Protocol(format!(
                "quota service reported: {}",
                resp.error
            )));
        }

        debug!(
            status = resp.status,
            remaining = resp.remaining,
            reset_time = resp.reset_time,
            "Quota service responded"
        );

        Ok(resp)
    }

    /// Ask the quota service for its cluster health.
    pub async fn health_check(&self) -> Result<HealthCheckResp> {
        let mut client = self.client.clone();
        let mut call = tonic::Request::new(HealthCheckReq {});
        call.set_timeout(self.timeout);

        let response = tokio::time::timeout(self.timeout, client.health_check(call))
            .await
            .map_err(|_| LimitgateError::Timeout(self.timeout))??;

        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(address: &str) -> RemoteConfig {
        RemoteConfig {
            address: address.to_string(),
            timeout_ms: 200,
            connect_timeout_ms: 200,
        }
    }

    #[test]
    fn test_invalid_address_is_transport_error() {
        let result = RemoteLimiter::connect_lazy(&remote("not a uri\n"));
        assert!(matches!(result, Err(LimitgateError::Transport(_))));
    }

    #[tokio::test]
    async fn test_lazy_connect_does_not_fail_construction() {
        let limiter = RemoteLimiter::connect_lazy(&remote("http://127.0.0.1:1")).unwrap();
        assert_eq!(limiter.timeout(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_call() {
        let limiter = RemoteLimiter::connect_lazy(&remote("http://127.0.0.1:1")).unwrap();

        let result = limiter
            .get_rate_limit(RateLimitReq {
                name: "rule".to_string(),
                unique_key: "key".to_string(),
                hits: 1,
                limit: 1,
                duration: 1000,
                ..Default::default()
            })
            .await;

        assert!(matches!(
            result,
            Err(LimitgateError::Rpc(_)) | Err(LimitgateError::Timeout(_))
        ));
    }
}
