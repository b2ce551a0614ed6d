use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid dispatcher config: {0}")]
    InvalidConfig(String),

    #[error("dispatcher is missing a {0}")]
    MissingComponent(&'static str),
}

impl Error {
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
