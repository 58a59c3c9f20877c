pub mod broker;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod preprocess;
pub mod routes;
pub mod test_util;

pub use broker::{AmqpBroker, MessageBroker};
pub use cache::{RedisResultCache, ResultCache};
pub use config::Config;
pub use dispatch::DispatchGateway;
pub use error::DispatchError;
pub use preprocess::PredictionPipeline;

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Dispatch gateway holding the broker and cache connections.
    pub gateway: Arc<DispatchGateway>,
}
