use crate::embedding::{CodecError, GenerateError, ProviderError, StoreError};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum NotFound {
    #[error("user {0} not found")]
    User(u64),

    #[error("animal {0} not found")]
    Animal(String),

    #[error("user {0} has no preference vector")]
    Preference(u64),
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Codec(err) => AppError::Serialization(err),
            err => AppError::Store(err),
        }
    }
}

impl From<GenerateError> for AppError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::NotFound(id) => NotFound::Animal(id).into(),
            GenerateError::Provider(err) => err.into(),
            GenerateError::Store(err) => err.into(),
            GenerateError::Other(err) => err.into(),
        }
    }
}
