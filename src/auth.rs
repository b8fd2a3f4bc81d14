//! Credential ownership: the access/refresh pair, single-flight refresh, and session state.

pub mod credentials;
pub mod session;

mod manager;
mod metrics;

pub use credentials::*;
pub use manager::TokenManager;
pub use metrics::RefreshMetrics;
pub use session::*;
