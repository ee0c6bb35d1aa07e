//! Library root: every module the `iptv-gateway` binary wires together.
//! `http::routes::create_app` is the single entry point `main.rs` calls once
//! `GatewayContext` is built, mirroring the teacher's `create_app(channels,
//! mode, transport, ...) -> Router` shape one level up (a richer shared
//! context in place of the teacher's flat `AppState`).

pub mod browser;
pub mod capture;
pub mod channel;
pub mod config;
pub mod epg;
pub mod error;
pub mod hardware;
pub mod http;
pub mod metrics;
pub mod provider;
pub mod tuner;

pub use http::{create_app, GatewayContext};
