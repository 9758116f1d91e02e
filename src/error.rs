use thiserror::Error;

use crate::config::ConfigError;
use crate::eval::error::FatalError;
use crate::eval::serialize::SerializationError;
use crate::eval::variables::StoreError;
use crate::lock::LockError;
use crate::services::ServiceError;
use crate::subtag::registry::RegistryError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    // collaborators
    #[error("Variable store error: {0}")]
    Store(#[from] StoreError),
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
    #[error("Fatal error: {0}")]
    Fatal(#[from] FatalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
