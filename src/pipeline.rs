use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::camera::{CameraController, Facing, FlashMode};
use crate::compose::{compose, AnnotationOptions};
use crate::error::Error;
use crate::library::{LibraryWriter, SavedPhoto};
use crate::location::LocationProvider;
use crate::permissions::{Capability, PermissionGate};

/// Orchestrates one capture-compose-persist sequence end to end.
///
/// Within a sequence, capture strictly precedes compose, which strictly
/// precedes persist, and a failure aborts the remaining steps. The location
/// snapshot is read from its independent background refresh, never waited on.
/// At most one sequence is in flight at a time; a second trigger while one is
/// running is rejected with [`Error::Busy`] instead of racing its writes.
pub struct CaptureSession {
    gate: Arc<PermissionGate>,
    location: Arc<LocationProvider>,
    camera: RwLock<CameraController>,
    writer: LibraryWriter,
    options: AnnotationOptions,
    busy: AtomicBool,
}

impl CaptureSession {
    pub fn new(
        gate: Arc<PermissionGate>,
        location: Arc<LocationProvider>,
        camera: CameraController,
        writer: LibraryWriter,
        options: AnnotationOptions,
    ) -> Self {
        Self {
            gate,
            location,
            camera: RwLock::new(camera),
            writer,
            options,
            busy: AtomicBool::new(false),
        }
    }

    /// Runs the full sequence and returns the persisted photo's handle.
    pub async fn capture_and_save(&self) -> Result<SavedPhoto, Error> {
        if self.busy.swap(true, Ordering::AcqRel) {
            log::warn!("Capture requested while a sequence is in flight, rejecting");
            return Err(Error::Busy);
        }
        let result = self.run_sequence().await;
        self.busy.store(false, Ordering::Release);
        if let Err(e) = &result {
            log::error!("Capture sequence failed: {}", e);
        }
        result
    }

    async fn run_sequence(&self) -> Result<SavedPhoto, Error> {
        let state = self.gate.ensure_granted(&[Capability::Camera]).await;
        if !state.is_granted(Capability::Camera) {
            return Err(Error::PermissionDenied(Capability::Camera));
        }

        let frame = self.camera.read().await.capture().await?;
        // Whatever snapshot the background refresh has produced by now;
        // capture is never blocked on a fresh fix.
        let snapshot = self.location.snapshot().await;
        let annotated = compose(&frame, &snapshot, &self.options)?;
        self.writer.persist(&annotated).await
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn toggle_facing(&self) -> Facing {
        self.camera.write().await.toggle_facing()
    }

    pub async fn cycle_flash(&self) -> FlashMode {
        self.camera.write().await.cycle_flash()
    }

    pub async fn set_zoom(&self, zoom: f32) {
        self.camera.write().await.set_zoom(zoom);
    }

    /// Refreshes the location snapshot; typically called once at screen
    /// mount so the first capture already has a fix to read.
    pub async fn refresh_location(&self) {
        self.location.refresh().await;
    }

    pub fn open_gallery(&self) -> std::io::Result<()> {
        self.writer.open_gallery()
    }
}
