//! Gateway: HTTP surface of the bridge.
//!
//! Single port serves the liveness probe and the WeChat callback. Each callback is handled
//! start to finish inside its own request task.

mod server;

pub use server::{router, run_gateway, serve, GatewayState};
