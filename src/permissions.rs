use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// The three device capabilities gated before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Camera,
    Location,
    Storage,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Camera,
        Capability::Location,
        Capability::Storage,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Camera => write!(f, "camera"),
            Capability::Location => write!(f, "location"),
            Capability::Storage => write!(f, "storage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionStatus {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Process-wide permission state, one status per capability. Mutated only by
/// [`PermissionGate::ensure_granted`]; everything else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionState {
    pub camera: PermissionStatus,
    pub location: PermissionStatus,
    pub storage: PermissionStatus,
}

impl PermissionState {
    pub fn status(&self, capability: Capability) -> PermissionStatus {
        match capability {
            Capability::Camera => self.camera,
            Capability::Location => self.location,
            Capability::Storage => self.storage,
        }
    }

    fn set_status(&mut self, capability: Capability, status: PermissionStatus) {
        match capability {
            Capability::Camera => self.camera = status,
            Capability::Location => self.location = status,
            Capability::Storage => self.storage = status,
        }
    }

    pub fn is_granted(&self, capability: Capability) -> bool {
        self.status(capability) == PermissionStatus::Granted
    }

    /// Conjunction of the granted flag over every requested capability.
    pub fn all_granted(&self, capabilities: &[Capability]) -> bool {
        capabilities.iter().all(|&c| self.is_granted(c))
    }
}

/// Performs the actual platform permission prompt for one capability.
///
/// Returns `Ok(true)` on grant, `Ok(false)` on denial; an `Err` means the
/// platform broker itself failed and is treated as a denial.
#[async_trait]
pub trait PermissionBackend: Send + Sync {
    async fn request(&self, capability: Capability) -> anyhow::Result<bool>;
}

/// Fixed grant/deny policy per capability. Covers desktops without a runtime
/// permission broker and doubles as the test stub.
#[derive(Debug, Clone, Copy)]
pub struct StaticPolicy {
    pub camera: bool,
    pub location: bool,
    pub storage: bool,
}

impl StaticPolicy {
    pub fn allow_all() -> Self {
        Self {
            camera: true,
            location: true,
            storage: true,
        }
    }

    pub fn deny_all() -> Self {
        Self {
            camera: false,
            location: false,
            storage: false,
        }
    }
}

#[async_trait]
impl PermissionBackend for StaticPolicy {
    async fn request(&self, capability: Capability) -> anyhow::Result<bool> {
        Ok(match capability {
            Capability::Camera => self.camera,
            Capability::Location => self.location,
            Capability::Storage => self.storage,
        })
    }
}

/// Process-wide gatekeeper for the device capabilities.
///
/// Grants are cached: re-invoking [`ensure_granted`](Self::ensure_granted)
/// after a grant is a no-op returning the cached state. After a denial the
/// backend is prompted again (some platforms only prompt once per install and
/// need an out-of-band settings change, which the gate cannot detect; the
/// re-request then resolves to another denial).
pub struct PermissionGate {
    backend: Arc<dyn PermissionBackend>,
    state: RwLock<PermissionState>,
}

impl PermissionGate {
    pub fn new(backend: Arc<dyn PermissionBackend>) -> Self {
        Self {
            backend,
            state: RwLock::new(PermissionState::default()),
        }
    }

    /// Resolves every requested capability, prompting where needed, and
    /// returns the updated process-wide state.
    pub async fn ensure_granted(&self, capabilities: &[Capability]) -> PermissionState {
        let mut state = self.state.write().await;
        for &capability in capabilities {
            if state.status(capability) == PermissionStatus::Granted {
                continue;
            }
            let status = match self.backend.request(capability).await {
                Ok(true) => {
                    log::info!("{} permission granted", capability);
                    PermissionStatus::Granted
                }
                Ok(false) => {
                    log::warn!("{} permission denied", capability);
                    PermissionStatus::Denied
                }
                Err(e) => {
                    log::error!("{} permission request failed: {}", capability, e);
                    PermissionStatus::Denied
                }
            };
            state.set_status(capability, status);
        }
        *state
    }

    /// Current cached state without prompting.
    pub async fn state(&self) -> PermissionState {
        *self.state.read().await
    }

    pub async fn is_granted(&self, capability: Capability) -> bool {
        self.state.read().await.is_granted(capability)
    }
}
