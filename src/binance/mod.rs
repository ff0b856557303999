pub mod client;
pub mod error;
pub mod filters;
pub mod rate_limit;
pub mod user_stream;

pub use client::FuturesClient;
pub use error::{GatewayError, GatewayResult};
pub use filters::{FilterCache, SymbolFilters};
pub use rate_limit::WeightBudget;
