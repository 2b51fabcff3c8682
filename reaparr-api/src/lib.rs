// Reaparr API Library
//
// HTTP operations surface for the lifecycle engine

pub mod error;
pub mod http;

pub use error::{AppError, AppResult};
pub use http::{build_router, AppState};
