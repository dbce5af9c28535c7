pub mod client;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod rpc;
pub mod server;

pub use gateway::ProjectChannelGateway;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
