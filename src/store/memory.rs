use crate::store::error::{Result, StoreError};
use crate::store::traits::DeviceRegistry;
use async_trait::async_trait;
use busgate_core::Address;
use busgate_core::types::{DetailRequestState, DetailStatus, Device, ModuleDetails};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Default)]
pub struct MemoryRegistry {
    devices: DashMap<Address, Device>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let registry = Self::new();
        for device in devices {
            registry.devices.insert(device.id, device);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn get(&self, id: Address) -> Result<Option<Device>> {
        Ok(self.devices.get(&id).map(|d| d.clone()))
    }

    async fn upsert(&self, device: Device) -> Result<()> {
        self.devices.insert(device.id, device);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Device>> {
        Ok(self.devices.iter().map(|d| d.value().clone()).collect())
    }

    async fn set_detail_state(&self, id: Address, state: DetailRequestState) -> Result<()> {
        let mut device = self.devices.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        device.detail = state;
        Ok(())
    }

    async fn apply_details(&self, details: &ModuleDetails) -> Result<()> {
        self.devices
            .entry(details.module)
            .or_insert_with(|| Device::module(details.module))
            .apply_details(details);
        Ok(())
    }

    async fn demote_in_progress(&self) -> Result<usize> {
        let mut demoted = 0;
        for mut device in self.devices.iter_mut() {
            if device.detail.status == DetailStatus::InProgress {
                device.detail.status = DetailStatus::Pending;
                demoted += 1;
            }
        }
        Ok(demoted)
    }

    async fn discover(&self, module: Address) -> Result<bool> {
        match self.devices.entry(module) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Device::module(module));
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busgate_core::types::DeviceCategory;

    fn details(module: u16) -> ModuleDetails {
        ModuleDetails {
            module: Address::Module(module),
            hardware_type: 0x20,
            sensor_count: 0,
            actor_count: 8,
            firmware: (1, 4),
        }
    }

    #[tokio::test]
    async fn test_discover_registers_once() {
        let registry = MemoryRegistry::new();
        assert!(registry.discover(Address::Module(7)).await.unwrap());
        assert!(!registry.discover(Address::Module(7)).await.unwrap());

        let device = registry.get(Address::Module(7)).await.unwrap().unwrap();
        assert_eq!(device.category, DeviceCategory::Module);
        assert_eq!(device.detail.status, DetailStatus::Pending);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_details_registers_unknown_module() {
        let registry = MemoryRegistry::new();
        registry.apply_details(&details(3)).await.unwrap();

        let device = registry.get(Address::Module(3)).await.unwrap().unwrap();
        assert_eq!(device.detail.status, DetailStatus::Completed);
        assert_eq!(device.actor_count, 8);
    }

    #[tokio::test]
    async fn test_demote_in_progress() {
        let mut busy = Device::module(Address::Module(1));
        busy.detail.status = DetailStatus::InProgress;
        let mut done = Device::module(Address::Module(2));
        done.detail.status = DetailStatus::Completed;
        let registry =
            MemoryRegistry::with_devices([busy, done, Device::module(Address::Module(3))]);

        assert_eq!(registry.demote_in_progress().await.unwrap(), 1);
        assert_eq!(
            registry.pending().await.unwrap(),
            vec![Address::Module(1), Address::Module(3)]
        );
    }

    #[tokio::test]
    async fn test_set_detail_state_unknown_device() {
        let registry = MemoryRegistry::new();
        let err = registry
            .set_detail_state(Address::Module(9), DetailRequestState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(Address::Module(9))));
    }
}
