use thiserror::Error;

/// Storage error types
#[derive(Error, Debug)]
pub enum LoamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page overflow: serialized node is {len} bytes but pages are {page_size} bytes")]
    PageOverflow { len: usize, page_size: usize },
}

pub type Result<T> = std::result::Result<T, LoamError>;
