//! Read-only view of the installation model used while relaying

use std::collections::HashMap;

/// Lookups the trigger engine needs from the device model
pub trait ModelView: Send + Sync {
    /// Zone the device with this id lives in
    fn device_zone(&self, dsid: &str) -> Option<i32>;
}

/// Fixed device-to-zone table
#[derive(Debug, Clone, Default)]
pub struct StaticModel {
    zones: HashMap<String, i32>,
}

impl StaticModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, dsid: impl Into<String>, zone_id: i32) -> Self {
        self.zones.insert(dsid.into(), zone_id);
        self
    }
}

impl ModelView for StaticModel {
    fn device_zone(&self, dsid: &str) -> Option<i32> {
        self.zones.get(dsid).copied()
    }
}
