//! Recording control plane for dispatcher tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::vm::{
    BootOptions, Client, Device, DeviceClass, DeviceList, DiskInfo, NewVm, NicInfo, PowerState,
    SnapshotInfo, Task, VirtualMachine, VmHandle, VmSummary,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub vm: String,
    pub op: &'static str,
    pub boot_order: Option<Vec<DeviceClass>>,
    pub at: tokio::time::Instant,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

#[derive(Debug)]
pub struct MockVm {
    summary: VmSummary,
    calls: CallLog,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockVm {
    pub fn new(name: &str, calls: &CallLog) -> Self {
        Self {
            summary: VmSummary {
                name: name.to_string(),
                datacenter: "dc1".to_string(),
                host: "esx01".to_string(),
                power_state: PowerState::PoweredOn,
                ..VmSummary::default()
            },
            calls: Arc::clone(calls),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn template(mut self) -> Self {
        self.summary.template = true;
        self.summary.power_state = PowerState::PoweredOff;
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.summary.host = host.to_string();
        self
    }

    pub fn disk(mut self, label: &str) -> Self {
        let key = 2000 + self.summary.disks.len() as i32;
        self.summary.disks.push(DiskInfo {
            key,
            label: label.to_string(),
            capacity_gb: 20,
        });
        self
    }

    pub fn nic(mut self, mac: &str) -> Self {
        let key = 4000 + self.summary.nics.len() as i32;
        self.summary.nics.push(NicInfo {
            key,
            label: format!("Network adapter {}", self.summary.nics.len() + 1),
            mac: mac.to_string(),
            network: "VM Network".to_string(),
        });
        self
    }

    pub fn snapshot(mut self, name: &str) -> Self {
        self.summary.snapshots.push(SnapshotInfo {
            name: name.to_string(),
            description: String::new(),
            created_at: None,
        });
        self
    }

    pub fn failing(self, op: &'static str) -> Self {
        self.failing.lock().insert(op);
        self
    }

    pub fn handle(self) -> VmHandle {
        Arc::new(self)
    }

    fn record(&self, op: &'static str, boot_order: Option<Vec<DeviceClass>>) -> Result<()> {
        self.calls.lock().push(Call {
            vm: self.summary.name.clone(),
            op,
            boot_order,
            at: tokio::time::Instant::now(),
        });
        if self.failing.lock().contains(op) {
            return Err(Error::remote(op, &self.summary.name, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl VirtualMachine for MockVm {
    fn summary(&self) -> &VmSummary {
        &self.summary
    }

    async fn power_on(&self) -> Result<Task> {
        self.record("PowerOn", None).map(|_| Task::new("task-1"))
    }

    async fn power_off(&self) -> Result<Task> {
        self.record("PowerOff", None).map(|_| Task::new("task-1"))
    }

    async fn shutdown_guest(&self) -> Result<()> {
        self.record("ShutdownGuest", None)
    }

    async fn reboot_guest(&self) -> Result<()> {
        self.record("RebootGuest", None)
    }

    async fn suspend(&self) -> Result<Task> {
        self.record("Suspend", None).map(|_| Task::new("task-1"))
    }

    async fn reset(&self) -> Result<Task> {
        self.record("Reset", None).map(|_| Task::new("task-1"))
    }

    async fn destroy(&self) -> Result<Task> {
        self.record("Destroy", None).map(|_| Task::new("task-1"))
    }

    async fn device(&self) -> Result<DeviceList> {
        self.record("Device", None)?;
        let mut devices: Vec<Device> = self
            .summary
            .disks
            .iter()
            .map(|d| Device {
                key: d.key,
                class: DeviceClass::Disk,
                label: d.label.clone(),
            })
            .collect();
        devices.extend(self.summary.nics.iter().map(|n| Device {
            key: n.key,
            class: DeviceClass::Ethernet,
            label: n.label.clone(),
        }));
        Ok(DeviceList::new(devices))
    }

    async fn set_boot_options(&self, options: &BootOptions) -> Result<()> {
        self.record("SetBootOptions", Some(options.classes()))
    }

    async fn revert_to_snapshot(&self, snapshot: &str, suppress_power_on: bool) -> Result<Task> {
        assert!(suppress_power_on, "revert must suppress power on");
        let op = if self.summary.snapshots.iter().any(|s| s.name == snapshot) {
            "RevertToSnapshot"
        } else {
            "RevertToMissingSnapshot"
        };
        self.record(op, None).map(|_| Task::new("task-1"))
    }
}

/// Client returning a fixed inventory, or failing when `fail_fetch` is set
#[derive(Default)]
pub struct MockClient {
    pub vms: Mutex<Vec<VmHandle>>,
    pub fail_fetch: Mutex<bool>,
    pub fetches: Mutex<Vec<bool>>,
    pub created: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new(vms: Vec<VmHandle>) -> Arc<Self> {
        Arc::new(Self {
            vms: Mutex::new(vms),
            ..Self::default()
        })
    }
}

#[async_trait]
impl Client for MockClient {
    async fn vm_inventory(&self, _datacenter: &str, force_refresh: bool) -> Result<Vec<VmHandle>> {
        self.fetches.lock().push(force_refresh);
        if *self.fail_fetch.lock() {
            return Err(Error::remote("VMInventory", "dc1", "connection refused"));
        }
        Ok(self.vms.lock().clone())
    }

    async fn create_vm(&self, _datacenter: &str, spec: &NewVm) -> Result<Task> {
        self.created.lock().push(spec.name.clone());
        Ok(Task::new("task-1"))
    }

    async fn clone_template(&self, template: &str, name: &str) -> Result<Task> {
        self.created.lock().push(format!("{template}->{name}"));
        Ok(Task::new("task-1"))
    }
}
