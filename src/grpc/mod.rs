//! gRPC plumbing for the remote quota service.

mod client;

pub use client::RemoteLimiter;

// Include the generated protobuf code
pub mod proto {
    pub mod gubernator {
        tonic::include_proto!("pb.gubernator");
    }
}

// Re-export commonly used types
pub use proto::gubernator::{
    v1_client::V1Client, GetRateLimitsReq, GetRateLimitsResp, HealthCheckReq, HealthCheckResp,
    RateLimitReq, RateLimitResp, Status as QuotaStatus,
};
