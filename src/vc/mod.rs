mod local;
#[cfg(test)]
pub(crate) mod mock;
mod vm;

pub use local::{InventoryFile, LocalClient};
pub use vm::{
    BootOptions, BootableDevice, Client, Device, DeviceClass, DeviceList, DiskInfo, NewVm, NicInfo,
    PowerState, SnapshotInfo, Task, VirtualMachine, VmHandle, VmSummary,
};
