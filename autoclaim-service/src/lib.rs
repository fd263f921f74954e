pub mod audit;
pub mod config;
pub mod gemini;
pub mod payout;
pub mod service;
pub mod store;

pub use config::Config;
pub use service::{AppState, build_router, create_app, init_tracing};
