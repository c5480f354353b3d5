use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::provider::RegistryError),

    #[error("Credentials error: {0}")]
    Credentials(#[from] crate::credentials::CredentialsError),

    #[error("Invalid patient details: {0}")]
    Input(#[from] crate::input::InputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
