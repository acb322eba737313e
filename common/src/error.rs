use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Unknown stream format: {0}")]
    UnknownFormat(String),
}

pub type Result<T> = std::result::Result<T, OptionsError>;
