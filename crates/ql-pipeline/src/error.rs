use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ql_common::QuaylogError),

    #[error("startup error: {0}")]
    Startup(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
