//! HTTP surface shared by virtual and real exchange frontends.

mod http;
mod state;

pub use http::create_router;
pub use state::{AppState, DEFAULT_SESSION, ExchangeSession};
