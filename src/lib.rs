//! Geotagged still-photo capture: grab a frame from the camera, pair it with
//! the most recent location snapshot, annotate it with either EXIF metadata
//! or a baked-in caption, and persist it to the photo library.
//!
//! [`CaptureSession`] ties the pieces together; the device seams
//! ([`FrameSource`], [`PositionSource`], [`ReverseGeocoder`],
//! [`PermissionBackend`]) are traits so hosts can plug in real hardware or
//! the bundled fallbacks.

pub mod camera;
pub mod compose;
pub mod config;
pub mod error;
pub mod geo;
pub mod library;
pub mod location;
pub mod permissions;
pub mod pipeline;
pub mod viewfinder;

pub use camera::{CameraController, Facing, FlashMode, FrameSource, RawFrame, SyntheticCamera};
pub use compose::{compose, AnnotatedImage, AnnotationOptions, Strategy};
pub use config::Config;
pub use error::{ComposeError, Error, PersistError, Result};
pub use geo::{Address, AddressFormat, GeoFix, LocationSnapshot};
pub use library::{LibraryWriter, SavedPhoto};
pub use location::{LocationProvider, PositionSource, ReverseGeocoder};
pub use permissions::{Capability, PermissionBackend, PermissionGate, PermissionStatus};
pub use pipeline::CaptureSession;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initializes env_logger with a sensible default filter. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "geostamp=info");
    }
    let _ = env_logger::try_init();
}
