//! Pool module - model endpoints, retry policy and the forecaster pool.

mod endpoint;
mod forecaster;
mod retry;

pub use endpoint::*;
pub use forecaster::*;
pub use retry::*;
