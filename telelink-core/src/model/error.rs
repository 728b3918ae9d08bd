use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet codec error: {0}")]
    Packet(#[from] postcard::Error),
}
