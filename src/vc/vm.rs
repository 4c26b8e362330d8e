use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// VM power state as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    #[default]
    PoweredOff,
    PoweredOn,
    Suspended,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::PoweredOff => "poweredOff",
            PowerState::PoweredOn => "poweredOn",
            PowerState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub key: i32,
    pub label: String,
    pub capacity_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NicInfo {
    pub key: i32,
    pub label: String,
    pub mac: String,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Properties fetched together with the VM handle.
///
/// The tree builder and the filter only ever look at this snapshot, never at
/// the remote object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VmSummary {
    pub name: String,
    pub datacenter: String,
    pub host: String,
    pub power_state: PowerState,
    pub template: bool,
    pub guest_os: String,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disks: Vec<DiskInfo>,
    pub nics: Vec<NicInfo>,
    pub snapshots: Vec<SnapshotInfo>,
}

/// Device classes understood by boot-order computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Ethernet,
    Disk,
    Cdrom,
    Floppy,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Ethernet => "ethernet",
            DeviceClass::Disk => "disk",
            DeviceClass::Cdrom => "cdrom",
            DeviceClass::Floppy => "floppy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ethernet" | "net" | "network" => Some(DeviceClass::Ethernet),
            "disk" => Some(DeviceClass::Disk),
            "cdrom" => Some(DeviceClass::Cdrom),
            "floppy" => Some(DeviceClass::Floppy),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub key: i32,
    pub class: DeviceClass,
    pub label: String,
}

/// Virtual hardware of a VM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList(Vec<Device>);

impl DeviceList {
    pub fn new(devices: Vec<Device>) -> Self {
        Self(devices)
    }

    pub fn devices(&self) -> &[Device] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bootable devices ordered by class priority.
    ///
    /// Every disk and network adapter of a listed class is emitted in device
    /// order; cdrom and floppy entries are emitted once. Classes not listed in
    /// `priority` are left out.
    pub fn boot_order(&self, priority: &[DeviceClass]) -> Vec<BootableDevice> {
        let mut order = Vec::new();
        for class in priority {
            match class {
                DeviceClass::Ethernet | DeviceClass::Disk => {
                    for d in self.0.iter().filter(|d| d.class == *class) {
                        order.push(match class {
                            DeviceClass::Ethernet => BootableDevice::Ethernet { device_key: d.key },
                            _ => BootableDevice::Disk { device_key: d.key },
                        });
                    }
                }
                DeviceClass::Cdrom => {
                    if self.0.iter().any(|d| d.class == DeviceClass::Cdrom) {
                        order.push(BootableDevice::Cdrom);
                    }
                }
                DeviceClass::Floppy => {
                    if self.0.iter().any(|d| d.class == DeviceClass::Floppy) {
                        order.push(BootableDevice::Floppy);
                    }
                }
            }
        }
        order
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootableDevice {
    Ethernet { device_key: i32 },
    Disk { device_key: i32 },
    Cdrom,
    Floppy,
}

impl BootableDevice {
    pub fn class(&self) -> DeviceClass {
        match self {
            BootableDevice::Ethernet { .. } => DeviceClass::Ethernet,
            BootableDevice::Disk { .. } => DeviceClass::Disk,
            BootableDevice::Cdrom => DeviceClass::Cdrom,
            BootableDevice::Floppy => DeviceClass::Floppy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootOptions {
    pub boot_order: Vec<BootableDevice>,
}

impl BootOptions {
    pub fn from_priority(devices: &DeviceList, priority: &[DeviceClass]) -> Self {
        Self {
            boot_order: devices.boot_order(priority),
        }
    }

    /// Device classes in boot order, with repeats collapsed
    pub fn classes(&self) -> Vec<DeviceClass> {
        let mut classes: Vec<DeviceClass> = Vec::new();
        for d in &self.boot_order {
            if classes.last() != Some(&d.class()) {
                classes.push(d.class());
            }
        }
        classes
    }
}

/// Handle to a submitted control-plane task.
///
/// Only acceptance is reported; completion is never awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Parameters collected by the new-VM form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVm {
    pub name: String,
    pub host: Option<String>,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub network: String,
    pub guest_os: String,
}

impl Default for NewVm {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: None,
            cpus: 2,
            memory_mb: 2048,
            disk_gb: 20,
            network: "VM Network".to_string(),
            guest_os: "otherLinux64Guest".to_string(),
        }
    }
}

/// A VM (or template) on the control plane
#[async_trait]
pub trait VirtualMachine: Send + Sync + fmt::Debug {
    fn summary(&self) -> &VmSummary;

    fn name(&self) -> &str {
        &self.summary().name
    }

    async fn power_on(&self) -> Result<Task>;
    async fn power_off(&self) -> Result<Task>;
    async fn shutdown_guest(&self) -> Result<()>;
    async fn reboot_guest(&self) -> Result<()>;
    async fn suspend(&self) -> Result<Task>;
    async fn reset(&self) -> Result<Task>;
    async fn destroy(&self) -> Result<Task>;
    async fn device(&self) -> Result<DeviceList>;
    async fn set_boot_options(&self, options: &BootOptions) -> Result<()>;

    /// Revert to the named snapshot; `suppress_power_on` keeps the VM from
    /// powering on after the revert.
    async fn revert_to_snapshot(&self, snapshot: &str, suppress_power_on: bool) -> Result<Task>;
}

/// Shared, non-owning handle to a remote VM
pub type VmHandle = Arc<dyn VirtualMachine>;

/// Control-plane client
#[async_trait]
pub trait Client: Send + Sync {
    /// Fetch every VM and template of a datacenter.
    async fn vm_inventory(&self, datacenter: &str, force_refresh: bool) -> Result<Vec<VmHandle>>;

    async fn create_vm(&self, datacenter: &str, spec: &NewVm) -> Result<Task>;

    async fn clone_template(&self, template: &str, name: &str) -> Result<Task>;
}
