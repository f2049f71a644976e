use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tokio::fs;

use crate::compose::AnnotatedImage;
use crate::config::StorageConfig;
use crate::error::{Error, PersistError};
use crate::permissions::{Capability, PermissionGate};

/// Handle to a photo persisted in the shared library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPhoto {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Persists finished artifacts into the shared photo directory.
pub struct LibraryWriter {
    gate: Arc<PermissionGate>,
    library_dir: PathBuf,
    jpeg_quality: u8,
}

impl LibraryWriter {
    pub fn new(gate: Arc<PermissionGate>, config: &StorageConfig, jpeg_quality: u8) -> Self {
        Self {
            gate,
            library_dir: config.library_dir.clone(),
            jpeg_quality,
        }
    }

    /// Writes the image to shared photo storage and returns its handle.
    /// Requests the storage permission itself, so a sequence that never
    /// touched storage before still prompts here.
    ///
    /// Encoding happens before any file is created and the bytes go through a
    /// `.part` rename, so a failure never leaves a partial photo behind.
    pub async fn persist(&self, image: &AnnotatedImage) -> Result<SavedPhoto, Error> {
        let state = self.gate.ensure_granted(&[Capability::Storage]).await;
        if !state.is_granted(Capability::Storage) {
            log::warn!("Refusing to persist photo: storage permission not granted");
            return Err(Error::Persist(PersistError::PermissionDenied));
        }

        let bytes = image.to_jpeg(self.jpeg_quality)?;

        fs::create_dir_all(&self.library_dir)
            .await
            .map_err(PersistError::Storage)?;
        let path = self.next_photo_path();
        let partial = path.with_extension("jpg.part");

        if let Err(e) = fs::write(&partial, &bytes).await {
            let _ = fs::remove_file(&partial).await;
            return Err(Error::Persist(PersistError::Storage(e)));
        }
        if let Err(e) = fs::rename(&partial, &path).await {
            let _ = fs::remove_file(&partial).await;
            return Err(Error::Persist(PersistError::Storage(e)));
        }

        log::info!("Photo saved to {}", path.display());
        Ok(SavedPhoto {
            path,
            bytes: bytes.len() as u64,
        })
    }

    /// Timestamped filename, suffixed with a counter when several photos land
    /// within the same second.
    fn next_photo_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let candidate = self.library_dir.join(format!("photo_{}.jpg", stamp));
        if !candidate.exists() {
            return candidate;
        }
        let mut counter = 1u32;
        loop {
            let candidate = self
                .library_dir
                .join(format!("photo_{}_{:03}.jpg", stamp, counter));
            if !candidate.exists() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Opens the library directory in the system gallery viewer.
    pub fn open_gallery(&self) -> std::io::Result<()> {
        open::that(&self.library_dir)
    }

    pub fn library_dir(&self) -> &PathBuf {
        &self.library_dir
    }
}
