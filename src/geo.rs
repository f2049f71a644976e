use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single GPS-derived coordinate reading. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: Utc::now(),
        }
    }

    pub fn at(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Hemisphere reference letter, derived strictly by sign (`>= 0` is `N`).
    pub fn latitude_ref(&self) -> char {
        if self.latitude >= 0.0 {
            'N'
        } else {
            'S'
        }
    }

    /// Hemisphere reference letter, derived strictly by sign (`>= 0` is `E`).
    pub fn longitude_ref(&self) -> char {
        if self.longitude >= 0.0 {
            'E'
        } else {
            'W'
        }
    }
}

/// Human-readable address resolved from a [`GeoFix`] by reverse geocoding.
/// Every field is optional; platforms differ in which components they return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub street: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// The unit handed to annotation: the latest fix and its resolved address.
/// Both fields are independently optional; a fix may exist without an address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationSnapshot {
    pub fix: Option<GeoFix>,
    pub address: Option<Address>,
}

impl LocationSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fix.is_none() && self.address.is_none()
    }
}

/// Formats an [`Address`] into the single line stamped onto photos.
///
/// Address shape differs per platform (one returns a full address string, the
/// other structured components), so the formatter is a capability selected at
/// configuration time rather than an inline platform branch.
pub trait AddressFormatter: Send + Sync {
    /// Returns an empty string when no usable component is present.
    fn format(&self, address: &Address) -> String;
}

/// The compact overlay form: `city, region, country`.
pub struct ComponentsFormatter;

impl AddressFormatter for ComponentsFormatter {
    fn format(&self, address: &Address) -> String {
        join_present(&[&address.city, &address.region, &address.country])
    }
}

/// Full single-line address, most-specific component first.
pub struct SingleLineFormatter;

impl AddressFormatter for SingleLineFormatter {
    fn format(&self, address: &Address) -> String {
        join_present(&[
            &address.name,
            &address.street,
            &address.district,
            &address.city,
            &address.region,
            &address.postal_code,
            &address.country,
        ])
    }
}

fn join_present(components: &[&Option<String>]) -> String {
    components
        .iter()
        .filter_map(|c| c.as_deref())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configuration-level selector for the address formatter variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFormat {
    Components,
    SingleLine,
}

impl AddressFormat {
    pub fn formatter(&self) -> &'static dyn AddressFormatter {
        match self {
            AddressFormat::Components => &ComponentsFormatter,
            AddressFormat::SingleLine => &SingleLineFormatter,
        }
    }
}
