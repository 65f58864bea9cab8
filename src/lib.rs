//! Limitgate - Distributed Rate Limiting Guard
//!
//! This crate decides, per inbound request, whether a caller may proceed or
//! must be throttled. Quota state lives in a remote Gubernator-compatible
//! service shared by every server instance; limitgate holds no counters of
//! its own, it only translates rules into remote calls and enforces the
//! answers as tower middleware.

pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
