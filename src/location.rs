use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::config::LocationConfig;
use crate::geo::{Address, GeoFix, LocationSnapshot};
use crate::permissions::{Capability, PermissionGate};

/// Produces one current position fix.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self) -> Result<GeoFix>;
}

/// Resolves a fix into a human-readable address.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse_geocode(&self, fix: &GeoFix) -> Result<Address>;
}

/// Fixed coordinates, for development machines without a GPS receiver.
pub struct FixedPosition {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
impl PositionSource for FixedPosition {
    async fn current_position(&self) -> Result<GeoFix> {
        Ok(GeoFix::new(self.latitude, self.longitude))
    }
}

/// Geocoder for platforms without a reverse-geocoding service; always fails,
/// which the provider degrades to an address-less snapshot.
pub struct NullGeocoder;

#[async_trait]
impl ReverseGeocoder for NullGeocoder {
    async fn reverse_geocode(&self, _fix: &GeoFix) -> Result<Address> {
        Err(anyhow!("reverse geocoding not supported on this platform"))
    }
}

/// Owns the latest `(fix, address)` pair and refreshes it proactively so that
/// capture never blocks on a fresh GPS read.
///
/// Every failure along the refresh path (permission denial, fix timeout,
/// geocode error) is logged and degrades to a partial or empty snapshot;
/// nothing here is fatal to the capture flow. The snapshot is replaced
/// atomically, so readers always see a fully-formed pair.
pub struct LocationProvider {
    gate: Arc<PermissionGate>,
    positions: Arc<dyn PositionSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
    position_timeout: Duration,
    geocode_timeout: Duration,
    snapshot: RwLock<LocationSnapshot>,
}

impl LocationProvider {
    pub fn new(
        gate: Arc<PermissionGate>,
        positions: Arc<dyn PositionSource>,
        geocoder: Arc<dyn ReverseGeocoder>,
        config: &LocationConfig,
    ) -> Self {
        Self {
            gate,
            positions,
            geocoder,
            position_timeout: Duration::from_millis(config.position_timeout_ms),
            geocode_timeout: Duration::from_millis(config.geocode_timeout_ms),
            snapshot: RwLock::new(LocationSnapshot::empty()),
        }
    }

    /// The most recently resolved snapshot. Reads, never waits; may be stale
    /// by the device's time-to-first-fix latency.
    pub async fn snapshot(&self) -> LocationSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Acquires one fix and its address, replacing the stored snapshot.
    /// Typically invoked once at screen mount and after facing changes.
    pub async fn refresh(&self) {
        let state = self.gate.ensure_granted(&[Capability::Location]).await;
        if !state.is_granted(Capability::Location) {
            log::warn!("Location permission denied, snapshot unavailable");
            *self.snapshot.write().await = LocationSnapshot::empty();
            return;
        }

        let fix = match timeout(self.position_timeout, self.positions.current_position()).await {
            Ok(Ok(fix)) => {
                log::debug!("Position fix: {:.6}, {:.6}", fix.latitude, fix.longitude);
                Some(fix)
            }
            Ok(Err(e)) => {
                log::warn!("Position fix failed: {}", e);
                None
            }
            Err(_) => {
                log::warn!(
                    "Position fix timed out after {}ms",
                    self.position_timeout.as_millis()
                );
                None
            }
        };

        let address = match &fix {
            Some(fix) => match timeout(self.geocode_timeout, self.geocoder.reverse_geocode(fix))
                .await
            {
                Ok(Ok(address)) => Some(address),
                Ok(Err(e)) => {
                    log::warn!("Reverse geocoding failed: {}", e);
                    None
                }
                Err(_) => {
                    log::warn!(
                        "Reverse geocoding timed out after {}ms",
                        self.geocode_timeout.as_millis()
                    );
                    None
                }
            },
            None => None,
        };

        *self.snapshot.write().await = LocationSnapshot { fix, address };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::StaticPolicy;

    fn test_config() -> LocationConfig {
        LocationConfig {
            position_timeout_ms: 200,
            geocode_timeout_ms: 200,
        }
    }

    fn allow_all_gate() -> Arc<PermissionGate> {
        Arc::new(PermissionGate::new(Arc::new(StaticPolicy::allow_all())))
    }

    struct StubGeocoder;

    #[async_trait]
    impl ReverseGeocoder for StubGeocoder {
        async fn reverse_geocode(&self, _fix: &GeoFix) -> Result<Address> {
            Ok(Address {
                city: Some("San Francisco".to_string()),
                region: Some("CA".to_string()),
                country: Some("USA".to_string()),
                ..Default::default()
            })
        }
    }

    struct StalledPosition;

    #[async_trait]
    impl PositionSource for StalledPosition {
        async fn current_position(&self) -> Result<GeoFix> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(anyhow!("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_refresh_resolves_fix_and_address() {
        let provider = LocationProvider::new(
            allow_all_gate(),
            Arc::new(FixedPosition {
                latitude: 37.7749,
                longitude: -122.4194,
            }),
            Arc::new(StubGeocoder),
            &test_config(),
        );

        assert!(provider.snapshot().await.is_empty());
        provider.refresh().await;

        let snapshot = provider.snapshot().await;
        let fix = snapshot.fix.unwrap();
        assert_eq!(fix.latitude, 37.7749);
        assert_eq!(
            snapshot.address.unwrap().city.as_deref(),
            Some("San Francisco")
        );
    }

    #[tokio::test]
    async fn test_denied_permission_yields_empty_snapshot() {
        let gate = Arc::new(PermissionGate::new(Arc::new(StaticPolicy::deny_all())));
        let provider = LocationProvider::new(
            gate,
            Arc::new(FixedPosition {
                latitude: 1.0,
                longitude: 2.0,
            }),
            Arc::new(StubGeocoder),
            &test_config(),
        );

        provider.refresh().await;
        assert!(provider.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_geocode_failure_keeps_fix() {
        let provider = LocationProvider::new(
            allow_all_gate(),
            Arc::new(FixedPosition {
                latitude: 48.8566,
                longitude: 2.3522,
            }),
            Arc::new(NullGeocoder),
            &test_config(),
        );

        provider.refresh().await;
        let snapshot = provider.snapshot().await;
        assert!(snapshot.fix.is_some());
        assert!(snapshot.address.is_none());
    }

    #[tokio::test]
    async fn test_position_timeout_degrades_to_empty() {
        let provider = LocationProvider::new(
            allow_all_gate(),
            Arc::new(StalledPosition),
            Arc::new(StubGeocoder),
            &LocationConfig {
                position_timeout_ms: 20,
                geocode_timeout_ms: 20,
            },
        );

        provider.refresh().await;
        assert!(provider.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot_atomically() {
        let provider = LocationProvider::new(
            allow_all_gate(),
            Arc::new(FixedPosition {
                latitude: 37.7749,
                longitude: -122.4194,
            }),
            Arc::new(StubGeocoder),
            &test_config(),
        );

        provider.refresh().await;
        let first = provider.snapshot().await;
        provider.refresh().await;
        let second = provider.snapshot().await;

        // Both reads are fully formed, fix and address paired.
        for snapshot in [&first, &second] {
            assert!(snapshot.fix.is_some());
            assert!(snapshot.address.is_some());
        }
    }
}
