//! In-memory control plane backed by a TOML inventory file.
//!
//! Power, boot-order, snapshot, destroy and provisioning requests are applied
//! to the in-memory model the same way vCenter would accept or reject them,
//! so the console can be driven without a live vCenter.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mac_address::MacAddress;
use parking_lot::Mutex;
use serde::Deserialize;
use uuid::Uuid;

use super::vm::{
    BootOptions, Client, Device, DeviceClass, DeviceList, DiskInfo, NewVm, NicInfo, PowerState,
    SnapshotInfo, Task, VirtualMachine, VmHandle, VmSummary,
};
use crate::error::{Error, Result};

const DISK_KEY_BASE: i32 = 2000;
const NIC_KEY_BASE: i32 = 4000;

fn default_cpus() -> u32 {
    1
}

fn default_memory() -> u64 {
    1024
}

fn default_network() -> String {
    "VM Network".to_string()
}

/// Inventory file format
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryFile {
    #[serde(default)]
    pub datacenter: Vec<DatacenterSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatacenterSpec {
    pub name: String,
    #[serde(default)]
    pub host: Vec<HostSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostSpec {
    pub name: String,
    #[serde(default)]
    pub vm: Vec<VmSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmSpec {
    pub name: String,
    #[serde(default)]
    pub power_state: PowerState,
    #[serde(default)]
    pub template: bool,
    #[serde(default)]
    pub guest_os: String,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default = "default_memory")]
    pub memory_mb: u64,
    #[serde(default)]
    pub disk: Vec<DiskSpec>,
    #[serde(default)]
    pub nic: Vec<NicSpec>,
    #[serde(default)]
    pub snapshot: Vec<SnapshotSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskSpec {
    pub label: Option<String>,
    pub capacity_gb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NicSpec {
    pub label: Option<String>,
    pub mac: String,
    #[serde(default = "default_network")]
    pub network: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Power state captured with the snapshot
    #[serde(default)]
    pub power_state: PowerState,
}

#[derive(Debug)]
struct Record {
    id: String,
    datacenter: String,
    host: String,
    spec: VmSpec,
    boot_order: Vec<DeviceClass>,
}

impl Record {
    fn summary(&self) -> VmSummary {
        VmSummary {
            name: self.spec.name.clone(),
            datacenter: self.datacenter.clone(),
            host: self.host.clone(),
            power_state: self.spec.power_state,
            template: self.spec.template,
            guest_os: self.spec.guest_os.clone(),
            cpus: self.spec.cpus,
            memory_mb: self.spec.memory_mb,
            disks: self
                .spec
                .disk
                .iter()
                .enumerate()
                .map(|(i, d)| DiskInfo {
                    key: DISK_KEY_BASE + i as i32,
                    label: d
                        .label
                        .clone()
                        .unwrap_or_else(|| format!("Hard disk {}", i + 1)),
                    capacity_gb: d.capacity_gb,
                })
                .collect(),
            nics: self
                .spec
                .nic
                .iter()
                .enumerate()
                .map(|(i, n)| NicInfo {
                    key: NIC_KEY_BASE + i as i32,
                    label: n
                        .label
                        .clone()
                        .unwrap_or_else(|| format!("Network adapter {}", i + 1)),
                    mac: n.mac.clone(),
                    network: n.network.clone(),
                })
                .collect(),
            snapshots: self
                .spec
                .snapshot
                .iter()
                .map(|s| SnapshotInfo {
                    name: s.name.clone(),
                    description: s.description.clone(),
                    created_at: s.created_at,
                })
                .collect(),
        }
    }

    fn devices(&self) -> DeviceList {
        let summary = self.summary();
        let mut devices: Vec<Device> = summary
            .disks
            .into_iter()
            .map(|d| Device {
                key: d.key,
                class: DeviceClass::Disk,
                label: d.label,
            })
            .collect();
        devices.extend(summary.nics.into_iter().map(|n| Device {
            key: n.key,
            class: DeviceClass::Ethernet,
            label: n.label,
        }));
        DeviceList::new(devices)
    }

    fn require_vm(&self) -> std::result::Result<(), String> {
        if self.spec.template {
            return Err("The operation is not supported on a template".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct State {
    /// Datacenter name -> host names, in file order
    hosts: Vec<(String, Vec<String>)>,
    records: Vec<Record>,
}

impl State {
    fn has_datacenter(&self, datacenter: &str) -> bool {
        self.hosts.iter().any(|(dc, _)| dc == datacenter)
    }
}

fn invalid_state(state: PowerState) -> String {
    let human = match state {
        PowerState::PoweredOn => "Powered on",
        PowerState::PoweredOff => "Powered off",
        PowerState::Suspended => "Suspended",
    };
    format!("The attempted operation cannot be performed in the current state ({human})")
}

fn new_task() -> Task {
    Task::new(format!("task-{}", Uuid::new_v4().simple()))
}

fn normalize_mac(mac: &str) -> Result<String> {
    let parsed = MacAddress::from_str(mac.trim())
        .map_err(|e| Error::config(format!("invalid MAC address '{mac}': {e}")))?;
    Ok(parsed.to_string().to_lowercase())
}

/// Locally administered-looking address in the VMware OUI
fn generate_mac() -> String {
    let id = Uuid::new_v4();
    let b = id.as_bytes();
    MacAddress::new([0x00, 0x50, 0x56, b[0] & 0x3f, b[1], b[2]])
        .to_string()
        .to_lowercase()
}

/// Control plane simulated in memory
#[derive(Clone)]
pub struct LocalClient {
    state: Arc<Mutex<State>>,
    cache: Arc<Mutex<HashMap<String, Vec<VmHandle>>>>,
}

impl LocalClient {
    pub fn from_inventory(file: InventoryFile) -> Result<Self> {
        let mut state = State::default();

        for dc in file.datacenter {
            let mut host_names = Vec::new();
            for host in dc.host {
                host_names.push(host.name.clone());
                for mut spec in host.vm {
                    for nic in &mut spec.nic {
                        nic.mac = normalize_mac(&nic.mac)?;
                    }
                    state.records.push(Record {
                        id: Uuid::new_v4().to_string(),
                        datacenter: dc.name.clone(),
                        host: host.name.clone(),
                        spec,
                        boot_order: vec![DeviceClass::Disk, DeviceClass::Ethernet],
                    });
                }
            }
            state.hosts.push((dc.name, host_names));
        }

        tracing::debug!(
            "Loaded local inventory: {} datacenters, {} VMs",
            state.hosts.len(),
            state.records.len()
        );

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: InventoryFile = toml::from_str(content)?;
        Self::from_inventory(file)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("cannot read inventory {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Datacenter names in file order
    pub fn datacenters(&self) -> Vec<String> {
        self.state.lock().hosts.iter().map(|(dc, _)| dc.clone()).collect()
    }

    /// Current boot order of a VM, by name
    pub fn boot_order(&self, vm_name: &str) -> Option<Vec<DeviceClass>> {
        self.state
            .lock()
            .records
            .iter()
            .find(|r| r.spec.name == vm_name)
            .map(|r| r.boot_order.clone())
    }

    fn handles(&self, datacenter: &str) -> Vec<VmHandle> {
        let state = self.state.lock();
        state
            .records
            .iter()
            .filter(|r| r.datacenter == datacenter)
            .map(|r| {
                Arc::new(LocalVm {
                    id: r.id.clone(),
                    summary: r.summary(),
                    state: Arc::clone(&self.state),
                }) as VmHandle
            })
            .collect()
    }
}

#[async_trait]
impl Client for LocalClient {
    async fn vm_inventory(&self, datacenter: &str, force_refresh: bool) -> Result<Vec<VmHandle>> {
        if !self.state.lock().has_datacenter(datacenter) {
            return Err(Error::DatacenterNotFound(datacenter.to_string()));
        }

        if !force_refresh {
            if let Some(cached) = self.cache.lock().get(datacenter) {
                return Ok(cached.clone());
            }
        }

        let vms = self.handles(datacenter);
        self.cache
            .lock()
            .insert(datacenter.to_string(), vms.clone());
        Ok(vms)
    }

    async fn create_vm(&self, datacenter: &str, spec: &NewVm) -> Result<Task> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(Error::invalid_input("VM name must not be empty"));
        }

        let mut state = self.state.lock();
        let Some((_, hosts)) = state.hosts.iter().find(|(dc, _)| dc == datacenter) else {
            return Err(Error::DatacenterNotFound(datacenter.to_string()));
        };
        let host = match &spec.host {
            Some(h) if hosts.contains(h) => h.clone(),
            Some(h) => return Err(Error::invalid_input(format!("unknown host '{h}'"))),
            None => hosts
                .first()
                .cloned()
                .ok_or_else(|| Error::invalid_input(format!("datacenter '{datacenter}' has no hosts")))?,
        };
        if state
            .records
            .iter()
            .any(|r| r.datacenter == datacenter && r.spec.name == name)
        {
            return Err(Error::remote(
                "CreateVM",
                name,
                format!("The name '{name}' already exists"),
            ));
        }

        state.records.push(Record {
            id: Uuid::new_v4().to_string(),
            datacenter: datacenter.to_string(),
            host,
            spec: VmSpec {
                name: name.to_string(),
                power_state: PowerState::PoweredOff,
                template: false,
                guest_os: spec.guest_os.clone(),
                cpus: spec.cpus,
                memory_mb: spec.memory_mb,
                disk: vec![DiskSpec {
                    label: None,
                    capacity_gb: spec.disk_gb,
                }],
                nic: vec![NicSpec {
                    label: None,
                    mac: generate_mac(),
                    network: spec.network.clone(),
                }],
                snapshot: Vec::new(),
            },
            boot_order: vec![DeviceClass::Disk, DeviceClass::Ethernet],
        });

        tracing::info!("Created VM {} in {}", name, datacenter);
        Ok(new_task())
    }

    async fn clone_template(&self, template: &str, name: &str) -> Result<Task> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_input("VM name must not be empty"));
        }

        let mut state = self.state.lock();
        let Some(source) = state
            .records
            .iter()
            .find(|r| r.spec.template && r.spec.name == template)
        else {
            return Err(Error::remote("CloneVM", template, "template not found"));
        };

        if state
            .records
            .iter()
            .any(|r| r.datacenter == source.datacenter && r.spec.name == name)
        {
            return Err(Error::remote(
                "CloneVM",
                template,
                format!("The name '{name}' already exists"),
            ));
        }

        let mut spec = source.spec.clone();
        spec.name = name.to_string();
        spec.template = false;
        spec.power_state = PowerState::PoweredOff;
        spec.snapshot.clear();
        for nic in &mut spec.nic {
            nic.mac = generate_mac();
        }

        let record = Record {
            id: Uuid::new_v4().to_string(),
            datacenter: source.datacenter.clone(),
            host: source.host.clone(),
            spec,
            boot_order: source.boot_order.clone(),
        };
        state.records.push(record);

        tracing::info!("Cloned template {} -> {}", template, name);
        Ok(new_task())
    }
}

#[derive(Debug)]
struct LocalVm {
    id: String,
    summary: VmSummary,
    state: Arc<Mutex<State>>,
}

impl LocalVm {
    fn with_record<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Record) -> std::result::Result<T, String>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let Some(record) = state.records.iter_mut().find(|r| r.id == self.id) else {
            return Err(Error::remote(
                op,
                &self.summary.name,
                "The object has already been deleted or has not been completely created",
            ));
        };
        let out = f(record).map_err(|m| Error::remote(op, &self.summary.name, m))?;
        tracing::info!("{} accepted for {}", op, self.summary.name);
        Ok(out)
    }

    fn transition(
        &self,
        op: &'static str,
        allowed: &[PowerState],
        next: PowerState,
    ) -> Result<Task> {
        self.with_record(op, |r| {
            r.require_vm()?;
            if !allowed.contains(&r.spec.power_state) {
                return Err(invalid_state(r.spec.power_state));
            }
            r.spec.power_state = next;
            Ok(new_task())
        })
    }
}

#[async_trait]
impl VirtualMachine for LocalVm {
    fn summary(&self) -> &VmSummary {
        &self.summary
    }

    async fn power_on(&self) -> Result<Task> {
        self.transition(
            "PowerOn",
            &[PowerState::PoweredOff, PowerState::Suspended],
            PowerState::PoweredOn,
        )
    }

    async fn power_off(&self) -> Result<Task> {
        self.transition(
            "PowerOff",
            &[PowerState::PoweredOn, PowerState::Suspended],
            PowerState::PoweredOff,
        )
    }

    async fn shutdown_guest(&self) -> Result<()> {
        self.transition("ShutdownGuest", &[PowerState::PoweredOn], PowerState::PoweredOff)
            .map(|_| ())
    }

    async fn reboot_guest(&self) -> Result<()> {
        self.transition("RebootGuest", &[PowerState::PoweredOn], PowerState::PoweredOn)
            .map(|_| ())
    }

    async fn suspend(&self) -> Result<Task> {
        self.transition("Suspend", &[PowerState::PoweredOn], PowerState::Suspended)
    }

    async fn reset(&self) -> Result<Task> {
        self.transition("Reset", &[PowerState::PoweredOn], PowerState::PoweredOn)
    }

    async fn destroy(&self) -> Result<Task> {
        let mut state = self.state.lock();
        let Some(idx) = state.records.iter().position(|r| r.id == self.id) else {
            return Err(Error::remote(
                "Destroy",
                &self.summary.name,
                "The object has already been deleted or has not been completely created",
            ));
        };
        let power_state = state.records[idx].spec.power_state;
        if power_state == PowerState::PoweredOn {
            return Err(Error::remote(
                "Destroy",
                &self.summary.name,
                invalid_state(power_state),
            ));
        }
        state.records.remove(idx);
        tracing::info!("Destroy accepted for {}", self.summary.name);
        Ok(new_task())
    }

    async fn device(&self) -> Result<DeviceList> {
        self.with_record("Device", |r| Ok(r.devices()))
    }

    async fn set_boot_options(&self, options: &BootOptions) -> Result<()> {
        self.with_record("SetBootOptions", |r| {
            r.require_vm()?;
            r.boot_order = options.classes();
            Ok(())
        })
    }

    async fn revert_to_snapshot(&self, snapshot: &str, suppress_power_on: bool) -> Result<Task> {
        self.with_record("RevertToSnapshot", |r| {
            let Some(snap) = r.spec.snapshot.iter().find(|s| s.name == snapshot) else {
                return Err(format!("snapshot '{snapshot}' not found"));
            };
            r.spec.power_state = if suppress_power_on {
                PowerState::PoweredOff
            } else {
                snap.power_state
            };
            Ok(new_task())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
[[datacenter]]
name = "dc1"

[[datacenter.host]]
name = "esx01"

[[datacenter.host.vm]]
name = "web-01"
power_state = "poweredOn"
cpus = 2
memory_mb = 4096

[[datacenter.host.vm.disk]]
capacity_gb = 40

[[datacenter.host.vm.nic]]
mac = "00:50:56:AA:BB:01"

[[datacenter.host.vm.snapshot]]
name = "clean-install"
power_state = "poweredOn"

[[datacenter.host.vm]]
name = "ubuntu-tmpl"
template = true

[[datacenter.host.vm.nic]]
mac = "00:50:56:aa:bb:02"

[[datacenter]]
name = "dc2"
"#;

    async fn vm(client: &LocalClient, name: &str) -> VmHandle {
        client
            .vm_inventory("dc1", true)
            .await
            .unwrap()
            .into_iter()
            .find(|v| v.name() == name)
            .unwrap()
    }

    #[tokio::test]
    async fn test_inventory_per_datacenter() {
        let client = LocalClient::parse(INVENTORY).unwrap();
        assert_eq!(client.datacenters(), vec!["dc1", "dc2"]);

        let vms = client.vm_inventory("dc1", false).await.unwrap();
        let names: Vec<&str> = vms.iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["web-01", "ubuntu-tmpl"]);
        assert_eq!(vms[0].summary().nics[0].mac, "00:50:56:aa:bb:01");
        assert_eq!(vms[0].summary().disks[0].label, "Hard disk 1");

        assert!(client.vm_inventory("dc2", false).await.unwrap().is_empty());
        assert!(matches!(
            client.vm_inventory("nope", false).await,
            Err(Error::DatacenterNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_mac_rejected() {
        let bad = r#"
[[datacenter]]
name = "dc1"
[[datacenter.host]]
name = "esx01"
[[datacenter.host.vm]]
name = "a"
[[datacenter.host.vm.nic]]
mac = "not-a-mac"
"#;
        assert!(matches!(LocalClient::parse(bad), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_power_transitions() {
        let client = LocalClient::parse(INVENTORY).unwrap();
        let web = vm(&client, "web-01").await;

        assert!(web.power_on().await.is_err());
        web.suspend().await.unwrap();
        web.power_on().await.unwrap();
        web.shutdown_guest().await.unwrap();
        assert_eq!(vm(&client, "web-01").await.summary().power_state, PowerState::PoweredOff);
        assert!(web.reset().await.is_err());
    }

    #[tokio::test]
    async fn test_cached_inventory_is_stale_until_forced() {
        let client = LocalClient::parse(INVENTORY).unwrap();
        let web = client.vm_inventory("dc1", false).await.unwrap()[0].clone();
        web.power_off().await.unwrap();

        let cached = client.vm_inventory("dc1", false).await.unwrap();
        assert_eq!(cached[0].summary().power_state, PowerState::PoweredOn);
        let fresh = client.vm_inventory("dc1", true).await.unwrap();
        assert_eq!(fresh[0].summary().power_state, PowerState::PoweredOff);
    }

    #[tokio::test]
    async fn test_destroy_requires_power_off() {
        let client = LocalClient::parse(INVENTORY).unwrap();
        let web = vm(&client, "web-01").await;

        assert!(web.destroy().await.is_err());
        web.power_off().await.unwrap();
        web.destroy().await.unwrap();
        assert!(web.destroy().await.is_err());
        assert_eq!(client.vm_inventory("dc1", true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_template_rejects_power_ops() {
        let client = LocalClient::parse(INVENTORY).unwrap();
        let tmpl = vm(&client, "ubuntu-tmpl").await;
        let err = tmpl.power_on().await.unwrap_err();
        assert!(err.to_string().contains("template"));
    }

    #[tokio::test]
    async fn test_boot_order_and_snapshot_revert() {
        let client = LocalClient::parse(INVENTORY).unwrap();
        let web = vm(&client, "web-01").await;

        let devices = web.device().await.unwrap();
        let opts = BootOptions::from_priority(&devices, &[DeviceClass::Ethernet, DeviceClass::Disk]);
        web.set_boot_options(&opts).await.unwrap();
        assert_eq!(
            client.boot_order("web-01"),
            Some(vec![DeviceClass::Ethernet, DeviceClass::Disk])
        );

        web.revert_to_snapshot("clean-install", true).await.unwrap();
        assert_eq!(vm(&client, "web-01").await.summary().power_state, PowerState::PoweredOff);
        web.revert_to_snapshot("clean-install", false).await.unwrap();
        assert_eq!(vm(&client, "web-01").await.summary().power_state, PowerState::PoweredOn);
        assert!(web.revert_to_snapshot("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn test_create_and_clone() {
        let client = LocalClient::parse(INVENTORY).unwrap();

        let spec = NewVm {
            name: "db-01".to_string(),
            ..NewVm::default()
        };
        client.create_vm("dc1", &spec).await.unwrap();
        assert!(client.create_vm("dc1", &spec).await.is_err());

        client.clone_template("ubuntu-tmpl", "app-01").await.unwrap();
        assert!(client.clone_template("web-01", "app-02").await.is_err());

        let app = vm(&client, "app-01").await;
        assert!(!app.summary().template);
        assert_ne!(app.summary().nics[0].mac, "00:50:56:aa:bb:02");
        assert_eq!(vm(&client, "db-01").await.summary().host, "esx01");
    }
}
