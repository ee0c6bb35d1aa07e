//! HTTP surface of the core (spec.md §6). Directory layout generalizes the
//! teacher's single `lib.rs` into per-concern modules the way
//! `javipelopi-streamforge` lays out `server/{routes,handlers,m3u,stream,
//! epg}.rs`. Administrative endpoints beyond spec.md §6's table are
//! explicitly out of scope (spec.md §1) and not implemented here.

pub mod epg;
pub mod live;
pub mod routes;
pub mod vod;

pub use routes::{create_app, GatewayContext};
