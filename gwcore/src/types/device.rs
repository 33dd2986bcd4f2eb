use crate::address::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceCategory {
    Sensor,
    Actor,
    Climate,
    Cover,
    Alarm,
    RfReader,
    Module,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DetailStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Progress of the detail-read sequence for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DetailRequestState {
    pub status: DetailStatus,
    pub retry_count: u32,
    pub last_request_time: Option<DateTime<Utc>>,
}

impl DetailRequestState {
    pub fn is_pending(&self) -> bool {
        self.status == DetailStatus::Pending
    }
}

/// Configuration reported by a module in its detail acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDetails {
    pub module: Address,
    pub hardware_type: u8,
    pub sensor_count: u8,
    pub actor_count: u8,
    pub firmware: (u8, u8),
}

impl ModuleDetails {
    pub fn hardware_name(&self) -> Option<&'static str> {
        crate::hardware::hardware_name(self.hardware_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: Address,
    pub category: DeviceCategory,
    /// Owning module; filled in by whoever owns the registry.
    pub parent: Option<Address>,
    pub hardware_type: Option<u8>,
    pub hardware_name: Option<String>,
    pub sensor_count: u8,
    pub actor_count: u8,
    pub firmware: Option<(u8, u8)>,
    pub detail: DetailRequestState,
}

impl Device {
    pub fn new(id: Address, category: DeviceCategory) -> Self {
        Self {
            id,
            category,
            parent: None,
            hardware_type: None,
            hardware_name: None,
            sensor_count: 0,
            actor_count: 0,
            firmware: None,
            detail: DetailRequestState::default(),
        }
    }

    /// A freshly discovered module whose details have not been read yet.
    pub fn module(id: Address) -> Self {
        Self::new(id, DeviceCategory::Module)
    }

    /// Copies the reported configuration in and marks the detail read done.
    pub fn apply_details(&mut self, details: &ModuleDetails) {
        self.hardware_type = Some(details.hardware_type);
        self.hardware_name = details.hardware_name().map(str::to_string);
        self.sensor_count = details.sensor_count;
        self.actor_count = details.actor_count;
        self.firmware = Some(details.firmware);
        if let Some(category) = crate::hardware::hardware_category(details.hardware_type) {
            self.category = category;
        }
        self.detail.status = DetailStatus::Completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_details_completes_and_classifies() {
        let mut device = Device::module(Address::Module(0x0102));
        device.detail.status = DetailStatus::InProgress;
        device.detail.retry_count = 2;

        device.apply_details(&ModuleDetails {
            module: Address::Module(0x0102),
            hardware_type: 0x20,
            sensor_count: 0,
            actor_count: 8,
            firmware: (2, 14),
        });

        assert_eq!(device.detail.status, DetailStatus::Completed);
        assert_eq!(device.detail.retry_count, 2);
        assert_eq!(device.category, DeviceCategory::Actor);
        assert_eq!(device.hardware_name.as_deref(), Some("Switch actuator 8-fold"));
        assert_eq!(device.firmware, Some((2, 14)));
    }

    #[test]
    fn test_unknown_hardware_keeps_category() {
        let mut device = Device::module(Address::Module(1));
        device.apply_details(&ModuleDetails {
            module: Address::Module(1),
            hardware_type: 0xEE,
            sensor_count: 1,
            actor_count: 0,
            firmware: (1, 0),
        });
        assert_eq!(device.category, DeviceCategory::Module);
        assert!(device.hardware_name.is_none());
    }
}
