//! State of the modal sub-dialogs. Drawing lives in `render`, the terminal
//! loop in `subdialogs`.

use crossterm::event::KeyCode;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::inventory::apply_filter;
use crate::session::PowerAction;
use crate::vc::{NewVm, VmHandle};

use super::input::TextInput;

/// Result of feeding one key to a dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    Continue,
    Done(T),
    Cancel,
}

#[derive(Debug, Clone)]
pub struct SearchDialog {
    pub input: TextInput,
    /// Number of matches for the current text, or why it does not parse
    pub preview: std::result::Result<usize, String>,
}

impl SearchDialog {
    pub fn new(current: &str, vms: &[VmHandle]) -> Self {
        let mut d = Self {
            input: TextInput::with_text(current),
            preview: Ok(vms.len()),
        };
        d.update_preview(vms);
        d
    }

    pub fn handle_key(&mut self, code: &KeyCode, vms: &[VmHandle]) -> Step<String> {
        match code {
            KeyCode::Esc => Step::Cancel,
            KeyCode::Enter => Step::Done(self.input.text().trim().to_string()),
            _ => {
                if self.input.handle_key(code) {
                    self.update_preview(vms);
                }
                Step::Continue
            }
        }
    }

    fn update_preview(&mut self, vms: &[VmHandle]) {
        self.preview = apply_filter(self.input.text(), vms)
            .map(|m| m.len())
            .map_err(|e| e.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct PowerMenu {
    pub vm: String,
    pub selected: usize,
}

impl PowerMenu {
    pub fn new(vm: &str) -> Self {
        Self {
            vm: vm.to_string(),
            selected: 0,
        }
    }

    pub fn handle_key(&mut self, code: &KeyCode) -> Step<PowerAction> {
        let last = PowerAction::MENU.len() - 1;
        match code {
            KeyCode::Esc | KeyCode::Char('q') => Step::Cancel,
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                Step::Continue
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (self.selected + 1).min(last);
                Step::Continue
            }
            KeyCode::Enter => Step::Done(PowerAction::MENU[self.selected]),
            _ => Step::Continue,
        }
    }
}

/// Body POSTed to the deploy endpoint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeployRequest {
    pub mac: String,
    pub hostname: String,
    pub deployment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStatus {
    Sent(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DeployDialog {
    pub address: String,
    pub hostname: String,
    pub types: Vec<String>,
    pub selected: usize,
    pub status: Option<DeployStatus>,
}

impl DeployDialog {
    pub fn new(address: &str, hostname: &str, types: &[String]) -> Self {
        Self {
            address: address.to_string(),
            hostname: hostname.to_string(),
            types: types.to_vec(),
            selected: 0,
            status: None,
        }
    }

    /// Once a status is shown any key closes the dialog.
    pub fn handle_key(&mut self, code: &KeyCode) -> Step<DeployRequest> {
        if self.status.is_some() {
            return Step::Cancel;
        }
        match code {
            KeyCode::Esc => Step::Cancel,
            KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
                Step::Continue
            }
            KeyCode::Down => {
                if self.selected + 1 < self.types.len() {
                    self.selected += 1;
                }
                Step::Continue
            }
            KeyCode::Enter => match self.types.get(self.selected) {
                Some(deployment) => Step::Done(DeployRequest {
                    mac: self.address.clone(),
                    hostname: self.hostname.clone(),
                    deployment: deployment.clone(),
                }),
                None => Step::Cancel,
            },
            _ => Step::Continue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Name,
    Host,
    Cpus,
    MemoryMb,
    DiskGb,
    Network,
    GuestOs,
}

impl FormField {
    pub const ALL: [FormField; 7] = [
        FormField::Name,
        FormField::Host,
        FormField::Cpus,
        FormField::MemoryMb,
        FormField::DiskGb,
        FormField::Network,
        FormField::GuestOs,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FormField::Name => "Name",
            FormField::Host => "Host (optional)",
            FormField::Cpus => "CPUs",
            FormField::MemoryMb => "Memory (MB)",
            FormField::DiskGb => "Disk (GB)",
            FormField::Network => "Network",
            FormField::GuestOs => "Guest OS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewVmForm {
    pub datacenter: String,
    pub inputs: Vec<TextInput>,
    pub focus: usize,
    pub error: Option<String>,
}

impl NewVmForm {
    pub fn new(datacenter: &str) -> Self {
        let d = NewVm::default();
        let inputs = FormField::ALL
            .iter()
            .map(|f| match f {
                FormField::Name | FormField::Host => TextInput::default(),
                FormField::Cpus => TextInput::with_text(d.cpus.to_string()),
                FormField::MemoryMb => TextInput::with_text(d.memory_mb.to_string()),
                FormField::DiskGb => TextInput::with_text(d.disk_gb.to_string()),
                FormField::Network => TextInput::with_text(d.network.clone()),
                FormField::GuestOs => TextInput::with_text(d.guest_os.clone()),
            })
            .collect();
        Self {
            datacenter: datacenter.to_string(),
            inputs,
            focus: 0,
            error: None,
        }
    }

    pub fn value(&self, field: FormField) -> &str {
        FormField::ALL
            .iter()
            .position(|f| *f == field)
            .and_then(|i| self.inputs.get(i))
            .map_or("", |i| i.text().trim())
    }

    pub fn to_spec(&self) -> Result<NewVm> {
        let name = self.value(FormField::Name);
        if name.is_empty() {
            return Err(Error::invalid_input("name is required"));
        }
        let host = self.value(FormField::Host);
        Ok(NewVm {
            name: name.to_string(),
            host: (!host.is_empty()).then(|| host.to_string()),
            cpus: parse_positive(self.value(FormField::Cpus), "CPUs")?,
            memory_mb: parse_positive(self.value(FormField::MemoryMb), "memory")?,
            disk_gb: parse_positive(self.value(FormField::DiskGb), "disk size")?,
            network: self.value(FormField::Network).to_string(),
            guest_os: self.value(FormField::GuestOs).to_string(),
        })
    }

    pub fn handle_key(&mut self, code: &KeyCode) -> Step<NewVm> {
        match code {
            KeyCode::Esc => Step::Cancel,
            KeyCode::Tab | KeyCode::Down => {
                self.focus = (self.focus + 1) % self.inputs.len();
                Step::Continue
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.focus = (self.focus + self.inputs.len() - 1) % self.inputs.len();
                Step::Continue
            }
            KeyCode::Enter => match self.to_spec() {
                Ok(spec) => Step::Done(spec),
                Err(e) => {
                    self.error = Some(e.to_string());
                    Step::Continue
                }
            },
            _ => {
                if let Some(input) = self.inputs.get_mut(self.focus) {
                    if input.handle_key(code) {
                        self.error = None;
                    }
                }
                Step::Continue
            }
        }
    }
}

fn parse_positive<T>(s: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match s.parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(Error::invalid_input(format!("{what} must be a positive number"))),
    }
}

#[derive(Debug, Clone)]
pub struct CloneDialog {
    pub template: String,
    pub name: TextInput,
    pub error: Option<String>,
}

impl CloneDialog {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            name: TextInput::default(),
            error: None,
        }
    }

    pub fn handle_key(&mut self, code: &KeyCode) -> Step<String> {
        match code {
            KeyCode::Esc => Step::Cancel,
            KeyCode::Enter => {
                let name = self.name.text().trim();
                if name.is_empty() {
                    self.error = Some("name is required".to_string());
                    Step::Continue
                } else if name == self.template {
                    self.error = Some("name must differ from the template".to_string());
                    Step::Continue
                } else {
                    Step::Done(name.to_string())
                }
            }
            _ => {
                if self.name.handle_key(code) {
                    self.error = None;
                }
                Step::Continue
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorDialog {
    pub title: &'static str,
    pub message: String,
}

impl ErrorDialog {
    pub fn new(err: &Error) -> Self {
        Self {
            title: err.title(),
            message: err.to_string(),
        }
    }
}
