use busgate_core::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Device not found: {0}")]
    NotFound(Address),
}

pub type Result<T> = std::result::Result<T, StoreError>;
