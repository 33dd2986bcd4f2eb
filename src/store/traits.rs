use crate::store::error::Result;
use async_trait::async_trait;
use busgate_core::Address;
use busgate_core::types::{DetailRequestState, Device, ModuleDetails};

/// Device inventory shared by the session and the detail scheduler.
///
/// The scheduler and the session are the only writers of detail state.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get(&self, id: Address) -> Result<Option<Device>>;
    async fn upsert(&self, device: Device) -> Result<()>;
    async fn all(&self) -> Result<Vec<Device>>;

    /// Fails with `NotFound` for unknown devices.
    async fn set_detail_state(&self, id: Address, state: DetailRequestState) -> Result<()>;

    /// Stores a detail acknowledgement, registering the module if needed.
    async fn apply_details(&self, details: &ModuleDetails) -> Result<()>;

    /// Resets every `InProgress` entry to `Pending`; returns how many changed.
    async fn demote_in_progress(&self) -> Result<usize>;

    /// Registers a module seen on the bus. Returns `true` if it was new.
    async fn discover(&self, module: Address) -> Result<bool>;

    /// Pending devices in address order.
    async fn pending(&self) -> Result<Vec<Address>> {
        let mut ids: Vec<Address> = self
            .all()
            .await?
            .into_iter()
            .filter(|d| d.detail.is_pending())
            .map(|d| d.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
