use thiserror::Error;

#[derive(Error, Debug)]
pub enum FillerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Orders file is missing column: {0}")]
    MissingColumn(String),

    #[error("Orders file line {line}: {message}")]
    OrdersFileParse { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FillerError>;
