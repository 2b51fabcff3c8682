pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod provider;
pub mod repository;
pub mod service;
pub mod transaction;

pub use clock::Clock;
pub use config::Config;
pub use error::{Error, Result};
pub use transaction::{with_transaction, UnitOfWork};
