//! Transport front-ends for the Arx secrets service.
//!
//! The request pipeline here is transport-agnostic in shape: decode,
//! authenticate, rate-limit, validate, authorize, invoke, encode. The REST
//! shell (axum) and the gRPC shell (tonic) differ only in their decode and
//! encode stages; both resolve the bearer credential to a principal exactly
//! once per request and hand the services a [`arx_types::RequestContext`].

pub mod admin;
pub mod grpc;
pub mod messages;
pub mod pipeline;
pub mod rest;

/// Generated protobuf/tonic types for `arx.v1`.
pub mod pb {
    tonic::include_proto!("arx.v1");
}

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use arx_config::ArxConfig;
use arx_core::Services;

use pipeline::RateLimiter;

/// Shared per-process state handed to every handler.
pub struct AppState {
    pub services: Services,
    pub config: ArxConfig,
    pub http_limiter: RateLimiter,
    pub grpc_limiter: RateLimiter,
    pub started_at: Instant,
    pub requests_total: AtomicU64,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(services: Services, config: ArxConfig) -> SharedState {
        let http_limiter = RateLimiter::new(&config.server.http.ratelimit);
        let grpc_limiter = RateLimiter::new(&config.server.grpc.ratelimit);
        Arc::new(Self {
            services,
            config,
            http_limiter,
            grpc_limiter,
            started_at: Instant::now(),
            requests_total: AtomicU64::new(0),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
