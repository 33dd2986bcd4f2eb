pub mod device;
pub mod events;

pub use device::{DetailRequestState, DetailStatus, Device, DeviceCategory, ModuleDetails};
pub use events::{ConnectionState, Event};
