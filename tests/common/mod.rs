//! In-process fake of the remote quota service.
//!
//! Implements fixed-window (token bucket on the wire) and leaky-bucket
//! accounting closely enough to exercise the client, plus failure modes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use limitgate::config::RemoteConfig;
use limitgate::error::LimitgateError;
use limitgate::grpc::proto::gubernator::{
    v1_server::{V1Server, V1},
    Algorithm, GetRateLimitsReq, GetRateLimitsResp, HealthCheckReq, HealthCheckResp,
    RateLimitReq, RateLimitResp, Status as QuotaStatus,
};
use limitgate::grpc::RemoteLimiter;
use limitgate::ratelimit::MetricsReporter;

/// How the fake answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Unavailable,
    EmptyResponse,
    InBandError,
    Stall(Duration),
}

enum Bucket {
    Fixed { remaining: i64, reset_time: i64 },
    Leaky { remaining: f64, updated_at: i64 },
}

#[derive(Clone)]
pub struct FakeQuota {
    buckets: Arc<Mutex<HashMap<(String, String), Bucket>>>,
    mode: Arc<Mutex<Mode>>,
    calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<RateLimitReq>>>,
}

impl FakeQuota {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            mode: Arc::new(Mutex::new(Mode::Normal)),
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<RateLimitReq> {
        self.last_request.lock().clone()
    }

    fn apply(&self, req: &RateLimitReq, now: i64) -> RateLimitResp {
        let mut buckets = self.buckets.lock();
        let key = (req.name.clone(), req.unique_key.clone());

        if req.algorithm == Algorithm::LeakyBucket as i32 {
            let per_unit = if req.limit > 0 {
                req.duration as f64 / req.limit as f64
            } else {
                req.duration as f64
            };
            let bucket = buckets.entry(key).or_insert(Bucket::Leaky {
                remaining: req.limit as f64,
                updated_at: now,
            });
            let Bucket::Leaky {
                remaining,
                updated_at,
            } = bucket
            else {
                unreachable!("algorithm changed for an existing bucket");
            };

            let leaked = (now - *updated_at) as f64 / per_unit;
            *remaining = (*remaining + leaked).min(req.limit as f64);
            *updated_at = now;

            let hits = req.hits as f64;
            if hits > *remaining {
                let reset = now + ((hits - *remaining) * per_unit).ceil() as i64;
                return response(QuotaStatus::OverLimit, req.limit, *remaining as i64, reset);
            }
            *remaining -= hits;
            let reset = now + per_unit.ceil() as i64;
            return response(QuotaStatus::UnderLimit, req.limit, *remaining as i64, reset);
        }

        let bucket = buckets.entry(key).or_insert(Bucket::Fixed {
            remaining: req.limit,
            reset_time: now + req.duration,
        });
        let Bucket::Fixed {
            remaining,
            reset_time,
        } = bucket
        else {
            unreachable!("algorithm changed for an existing bucket");
        };

        if now >= *reset_time {
            *remaining = req.limit;
            *reset_time = now + req.duration;
        }
        if req.hits > *remaining {
            return response(QuotaStatus::OverLimit, req.limit, *remaining, *reset_time);
        }
        *remaining -= req.hits;
        response(QuotaStatus::UnderLimit, req.limit, *remaining, *reset_time)
    }
}

fn response(status: QuotaStatus, limit: i64, remaining: i64, reset_time: i64) -> RateLimitResp {
    RateLimitResp {
        status: status as i32,
        limit,
        remaining,
        reset_time,
        ..Default::default()
    }
}

#[tonic::async_trait]
impl V1 for FakeQuota {
    async fn get_rate_limits(
        &self,
        request: Request<GetRateLimitsReq>,
    ) -> Result<Response<GetRateLimitsResp>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();

        match mode {
            Mode::Unavailable => return Err(Status::unavailable("quota cluster down")),
            Mode::EmptyResponse => return Ok(Response::new(GetRateLimitsResp::default())),
            Mode::Stall(delay) => tokio::time::sleep(delay).await,
            Mode::Normal | Mode::InBandError => {}
        }

        let now = chrono::Utc::now().timestamp_millis();
        let responses = request
            .into_inner()
            .requests
            .into_iter()
            .map(|req| {
                *self.last_request.lock() = Some(req.clone());
                if mode == Mode::InBandError {
                    RateLimitResp {
                        error: "field 'namespace' cannot be empty".to_string(),
                        ..Default::default()
                    }
                } else {
                    self.apply(&req, now)
                }
            })
            .collect();

        Ok(Response::new(GetRateLimitsResp { responses }))
    }

    async fn health_check(
        &self,
        _request: Request<HealthCheckReq>,
    ) -> Result<Response<HealthCheckResp>, Status> {
        Ok(Response::new(HealthCheckResp {
            status: "healthy".to_string(),
            message: String::new(),
            peer_count: 1,
        }))
    }
}

/// Serve `quota` on an ephemeral local port.
pub async fn spawn(quota: FakeQuota) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(V1Server::new(quota))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    addr
}

pub fn limiter(addr: SocketAddr, timeout_ms: u64) -> RemoteLimiter {
    RemoteLimiter::connect_lazy(&RemoteConfig {
        address: format!("http://{}", addr),
        timeout_ms,
        connect_timeout_ms: 1000,
    })
    .unwrap()
}

/// Remembers every report as `(rule, failed)`.
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(String, bool)>>,
}

impl MetricsReporter for RecordingReporter {
    fn report(&self, rule_name: &str, error: Option<&LimitgateError>, _elapsed: Duration) {
        self.reports
            .lock()
            .push((rule_name.to_string(), error.is_some()));
    }
}
