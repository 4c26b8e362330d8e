use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Error;
use crate::vc::{BootOptions, DeviceClass, DeviceList, VmHandle};

pub const NETWORK_FIRST: [DeviceClass; 2] = [DeviceClass::Ethernet, DeviceClass::Disk];
pub const DISK_FIRST: [DeviceClass; 2] = [DeviceClass::Disk, DeviceClass::Ethernet];

/// Choice made in the power dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerAction {
    PowerOn,
    PowerOff,
    GuestShutdown,
    GuestReboot,
    Suspend,
    Reset,
    NetworkBootOnce,
    DiskBootOnce,
    #[default]
    None,
}

impl PowerAction {
    /// Entries of the power menu, in display order
    pub const MENU: [PowerAction; 9] = [
        PowerAction::PowerOn,
        PowerAction::PowerOff,
        PowerAction::GuestShutdown,
        PowerAction::GuestReboot,
        PowerAction::Suspend,
        PowerAction::Reset,
        PowerAction::NetworkBootOnce,
        PowerAction::DiskBootOnce,
        PowerAction::None,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PowerAction::PowerOn => "Power On",
            PowerAction::PowerOff => "Power Off",
            PowerAction::GuestShutdown => "Shutdown guest",
            PowerAction::GuestReboot => "Reboot guest",
            PowerAction::Suspend => "Suspend",
            PowerAction::Reset => "Reset",
            PowerAction::NetworkBootOnce => "Power On (network boot once)",
            PowerAction::DiskBootOnce => "Power On (boot from disk)",
            PowerAction::None => "Cancel",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What executing a power action left behind
#[derive(Debug, Default)]
pub struct PowerOutcome {
    /// Remote failures, in the order they happened
    pub errors: Vec<Error>,
    /// The boot-order revert, when one was scheduled
    pub deferred: Option<JoinHandle<()>>,
}

/// Execute `action` against `vm`.
///
/// Every step runs even when an earlier one failed, except that the
/// boot-order steps need the device list. A failed revert is sent over
/// `failures` rather than returned, since it happens after this returns.
pub async fn execute(
    action: PowerAction,
    vm: &VmHandle,
    revert_delay: Duration,
    failures: &UnboundedSender<Error>,
) -> PowerOutcome {
    let mut outcome = PowerOutcome::default();
    let name = vm.name();

    match action {
        PowerAction::None => {}
        PowerAction::PowerOn => {
            tracing::info!("Powering on {}", name);
            push_err(&mut outcome, vm.power_on().await.map(drop));
        }
        PowerAction::PowerOff => {
            tracing::info!("Powering off {}", name);
            push_err(&mut outcome, vm.power_off().await.map(drop));
        }
        PowerAction::GuestShutdown => {
            tracing::info!("Shutting down guest on {}", name);
            push_err(&mut outcome, vm.shutdown_guest().await);
        }
        PowerAction::GuestReboot => {
            tracing::info!("Rebooting guest on {}", name);
            push_err(&mut outcome, vm.reboot_guest().await);
        }
        PowerAction::Suspend => {
            tracing::info!("Suspending {}", name);
            push_err(&mut outcome, vm.suspend().await.map(drop));
        }
        PowerAction::Reset => {
            tracing::info!("Resetting {}", name);
            push_err(&mut outcome, vm.reset().await.map(drop));
        }
        PowerAction::NetworkBootOnce => {
            tracing::info!("Powering on {} with a one-time network boot", name);
            let devices = read_devices(vm, &mut outcome).await;
            if let Some(devices) = &devices {
                let opts = BootOptions::from_priority(devices, &NETWORK_FIRST);
                push_err(&mut outcome, vm.set_boot_options(&opts).await);
            }
            let submitted = Instant::now();
            push_err(&mut outcome, vm.power_on().await.map(drop));
            if let Some(devices) = devices {
                outcome.deferred = Some(schedule_revert(
                    vm.clone(),
                    devices,
                    submitted + revert_delay,
                    failures.clone(),
                ));
            }
        }
        PowerAction::DiskBootOnce => {
            tracing::info!("Powering on {} from disk", name);
            if let Some(devices) = read_devices(vm, &mut outcome).await {
                let opts = BootOptions::from_priority(&devices, &DISK_FIRST);
                push_err(&mut outcome, vm.set_boot_options(&opts).await);
            }
            push_err(&mut outcome, vm.power_on().await.map(drop));
        }
    }

    outcome
}

async fn read_devices(vm: &VmHandle, outcome: &mut PowerOutcome) -> Option<DeviceList> {
    match vm.device().await {
        Ok(devices) => Some(devices),
        Err(e) => {
            outcome.errors.push(e);
            None
        }
    }
}

fn push_err(outcome: &mut PowerOutcome, result: crate::error::Result<()>) {
    if let Err(e) = result {
        outcome.errors.push(e);
    }
}

/// One-shot task putting the disk back in front at `deadline`.
/// Not cancellable once spawned.
fn schedule_revert(
    vm: VmHandle,
    devices: DeviceList,
    deadline: Instant,
    failures: UnboundedSender<Error>,
) -> JoinHandle<()> {
    let opts = BootOptions::from_priority(&devices, &DISK_FIRST);
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        tracing::info!("Restoring disk-first boot order on {}", vm.name());
        if let Err(e) = vm.set_boot_options(&opts).await {
            tracing::warn!("Boot order revert failed on {}: {}", vm.name(), e);
            // Receiver gone means the session ended; the failure is logged.
            let _ = failures.send(e);
        }
    })
}
