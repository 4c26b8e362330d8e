//! VM filter matching.
//!
//! Rules, applied to the trimmed filter string:
//! - empty: every VM matches, order unchanged
//! - `/pattern/`: case-insensitive regex against the VM name
//! - anything else: case-insensitive substring of the VM name, host name or
//!   one of the NIC MAC addresses

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::vc::{VmHandle, VmSummary};

#[derive(Debug, Clone)]
pub enum Matcher {
    All,
    Substring(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn parse(filter: &str) -> Result<Self> {
        let f = filter.trim();
        if f.is_empty() {
            return Ok(Matcher::All);
        }

        if f.len() >= 2 && f.starts_with('/') && f.ends_with('/') {
            let pattern = &f[1..f.len() - 1];
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::InvalidFilter {
                    filter: f.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(Matcher::Pattern(re));
        }

        Ok(Matcher::Substring(f.to_lowercase()))
    }

    pub fn matches(&self, vm: &VmSummary) -> bool {
        match self {
            Matcher::All => true,
            Matcher::Pattern(re) => re.is_match(&vm.name),
            Matcher::Substring(needle) => {
                vm.name.to_lowercase().contains(needle.as_str())
                    || vm.host.to_lowercase().contains(needle.as_str())
                    || vm
                        .nics
                        .iter()
                        .any(|n| n.mac.to_lowercase().contains(needle.as_str()))
            }
        }
    }
}

/// VMs matching `filter`, in input order
pub fn apply_filter(filter: &str, vms: &[VmHandle]) -> Result<Vec<VmHandle>> {
    let matcher = Matcher::parse(filter)?;
    Ok(vms
        .iter()
        .filter(|vm| matcher.matches(vm.summary()))
        .cloned()
        .collect())
}

/// Root label, annotated with the active filter
pub fn root_label(base: &str, filter: &str) -> String {
    if filter.is_empty() {
        base.to_string()
    } else {
        format!("{base} (filter: {filter})")
    }
}
