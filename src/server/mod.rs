mod api_error;
mod asset_routes;
pub mod config;
mod event_feed;
mod http_layers;
mod job_routes;
pub mod metrics;
pub mod server;
pub mod state;

pub use api_error::ApiError;
pub use config::{FeedConfig, ServerConfig};
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use state::ServerState;
