//! Slowbin Server - HTTP front end for the throttled streaming engine.
//!
//! `GET /{rate}/{url}` serves `url` so that the full transfer takes about
//! `rate` seconds. The router is exposed here so it can be mounted or driven
//! directly in tests; the `slowbin` binary wires it to a listener.

pub mod handler;
pub mod response;
pub mod server;

pub use response::ApiError;
pub use server::{build_router, spawn_janitor, start_server, AppState, RunningServer};
