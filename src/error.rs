use thiserror::Error;

use crate::permissions::Capability;

/// Failure kinds for a capture-compose-persist sequence.
///
/// `LocationUnavailable` is degraded internally by the location provider and
/// only logged; every other kind aborts the in-flight sequence and is surfaced
/// to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} permission denied")]
    PermissionDenied(Capability),

    #[error("camera session not ready: {0}")]
    CaptureUnavailable(String),

    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("failed to compose annotated image: {0}")]
    Compose(#[from] ComposeError),

    #[error("failed to persist photo: {0}")]
    Persist(#[from] PersistError),

    #[error("a capture sequence is already in flight")]
    Busy,
}

/// Rasterization and metadata-write failures.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("embedded caption font could not be loaded")]
    Font,

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("metadata write failed: {0}")]
    Metadata(#[from] exif::Error),

    #[error("metadata block of {0} bytes exceeds the JPEG segment limit")]
    OversizedMetadata(usize),
}

/// Shared-storage write failures.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage permission denied")]
    PermissionDenied,

    #[error("storage write failed: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_failure() {
        let err = Error::PermissionDenied(Capability::Camera);
        assert_eq!(err.to_string(), "camera permission denied");

        let err = Error::Busy;
        assert!(err.to_string().contains("already in flight"));

        let err = Error::Persist(PersistError::PermissionDenied);
        assert!(err.to_string().contains("storage permission denied"));
    }
}
