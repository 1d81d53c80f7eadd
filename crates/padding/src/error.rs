use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaddingError {
    #[error("padding frame declares zero-length payload")]
    ZeroLengthPayload,

    #[error("payload of {0} bytes exceeds the 65535-byte frame limit")]
    PayloadTooLarge(usize),
}
