//! HTTP surface of the gateway.

mod error;
mod routes;
mod server;
mod state;

pub use error::ApiError;
pub use routes::router;
pub use server::HttpServer;
pub use state::GatewayState;
