use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::event::{KeyCode, KeyModifiers};
use serde::Deserialize;
use tokio::fs;

use crate::error::{Error, Result};
use crate::inventory::{TreeLayout, TreeOptions, DEFAULT_ROOT_LABEL};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// `~/.vctui/config.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub root_label: String,
    pub datacenter: Option<String>,
    pub inventory: Option<PathBuf>,
    pub layout: TreeLayout,
    pub expand_vms: bool,
    pub boot_revert_delay_secs: u64,
    pub deploy_url: Option<String>,
    pub deploy_types: Vec<String>,
    pub log_max_bytes: u64,
    pub log_keep: usize,
    keybindings: HashMap<String, OneOrMany>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            root_label: DEFAULT_ROOT_LABEL.to_string(),
            datacenter: None,
            inventory: None,
            layout: TreeLayout::Flat,
            expand_vms: false,
            boot_revert_delay_secs: 3,
            deploy_url: None,
            deploy_types: vec!["preseed".to_string(), "kickstart".to_string()],
            log_max_bytes: 5 * 1024 * 1024,
            log_keep: 3,
            keybindings: HashMap::new(),
        }
    }
}

impl ConfigFile {
    /// Base directory for config and logs
    pub fn dir() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| Error::config("Cannot determine home directory"))?;
        Ok(home.join(".vctui"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::dir()?.join("config.toml"))
    }

    /// Load from `path`; a missing file is `Ok(None)`
    pub async fn load_from(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cfg = toml::from_str::<Self>(&content)?;
        Ok(Some(cfg))
    }

    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        Ok(Self::load_from(&path).await?.unwrap_or_default())
    }

    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            layout: self.layout,
            expand_vms: self.expand_vms,
        }
    }

    pub fn boot_revert_delay(&self) -> Duration {
        Duration::from_secs(self.boot_revert_delay_secs)
    }

    pub fn key_bindings(&self) -> KeyBindings {
        let mut kb = KeyBindings::default();

        for (action, spec) in &self.keybindings {
            let Some(action) = KeyAction::from_name(action) else {
                tracing::warn!("Unknown keybinding action: {}", action);
                continue;
            };
            let parsed: Vec<KeySpec> = spec
                .clone()
                .into_vec()
                .iter()
                .filter_map(|s| parse_key_spec(s))
                .collect();
            if !parsed.is_empty() {
                kb.bindings.insert(action, parsed);
            }
        }

        kb
    }
}

/// Actions a key can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    Quit,
    Up,
    Down,
    Select,
    Collapse,
    Expand,
    Delete,
    Find,
    Deploy,
    New,
    Power,
    Refresh,
    RevertSnapshot,
}

impl KeyAction {
    pub const ALL: [KeyAction; 13] = [
        KeyAction::Delete,
        KeyAction::Find,
        KeyAction::Deploy,
        KeyAction::New,
        KeyAction::Power,
        KeyAction::Refresh,
        KeyAction::RevertSnapshot,
        KeyAction::Quit,
        KeyAction::Up,
        KeyAction::Down,
        KeyAction::Select,
        KeyAction::Collapse,
        KeyAction::Expand,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyAction::Quit => "quit",
            KeyAction::Up => "up",
            KeyAction::Down => "down",
            KeyAction::Select => "select",
            KeyAction::Collapse => "collapse",
            KeyAction::Expand => "expand",
            KeyAction::Delete => "delete",
            KeyAction::Find => "find",
            KeyAction::Deploy => "deploy",
            KeyAction::New => "new",
            KeyAction::Power => "power",
            KeyAction::Refresh => "refresh",
            KeyAction::RevertSnapshot => "revert_snapshot",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Commands handled by the dispatcher rather than the tree view
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            KeyAction::Delete
                | KeyAction::Find
                | KeyAction::Deploy
                | KeyAction::New
                | KeyAction::Power
                | KeyAction::Refresh
                | KeyAction::RevertSnapshot
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeySpec {
    const fn new(code: KeyCode, modifiers: KeyModifiers) -> Self {
        Self { code, modifiers }
    }

    const fn ctrl(c: char) -> Self {
        Self::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    const fn plain(code: KeyCode) -> Self {
        Self::new(code, KeyModifiers::NONE)
    }

    fn matches(&self, code: &KeyCode, modifiers: KeyModifiers) -> bool {
        // Terminals report uppercase letters with SHIFT set
        let modifiers = if matches!(code, KeyCode::Char(_)) {
            modifiers.difference(KeyModifiers::SHIFT)
        } else {
            modifiers
        };
        &self.code == code && self.modifiers == modifiers
    }

    /// Human-readable form for the status bar
    pub fn display(&self) -> String {
        let key = match self.code {
            KeyCode::Char(' ') => "Space".to_string(),
            KeyCode::Char(c) => c.to_uppercase().to_string(),
            KeyCode::Enter => "Enter".to_string(),
            KeyCode::Tab => "Tab".to_string(),
            KeyCode::Up => "↑".to_string(),
            KeyCode::Down => "↓".to_string(),
            KeyCode::Left => "←".to_string(),
            KeyCode::Right => "→".to_string(),
            KeyCode::Delete => "Del".to_string(),
            KeyCode::F(n) => format!("F{n}"),
            other => format!("{other:?}"),
        };
        if self.modifiers.contains(KeyModifiers::CONTROL) {
            format!("^{key}")
        } else {
            key
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyBindings {
    bindings: HashMap<KeyAction, Vec<KeySpec>>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut kb = Self {
            bindings: HashMap::new(),
        };

        kb.bindings.insert(
            KeyAction::Quit,
            vec![KeySpec::plain(KeyCode::Char('q')), KeySpec::ctrl('c')],
        );
        kb.bindings.insert(
            KeyAction::Up,
            vec![KeySpec::plain(KeyCode::Up), KeySpec::plain(KeyCode::Char('k'))],
        );
        kb.bindings.insert(
            KeyAction::Down,
            vec![KeySpec::plain(KeyCode::Down), KeySpec::plain(KeyCode::Char('j'))],
        );
        kb.bindings
            .insert(KeyAction::Select, vec![KeySpec::plain(KeyCode::Enter)]);
        kb.bindings
            .insert(KeyAction::Collapse, vec![KeySpec::plain(KeyCode::Left)]);
        kb.bindings
            .insert(KeyAction::Expand, vec![KeySpec::plain(KeyCode::Right)]);

        kb.bindings.insert(KeyAction::Delete, vec![KeySpec::ctrl('d')]);
        kb.bindings.insert(KeyAction::Find, vec![KeySpec::ctrl('f')]);
        // Most terminals deliver Ctrl+I as Tab
        kb.bindings.insert(
            KeyAction::Deploy,
            vec![KeySpec::ctrl('i'), KeySpec::plain(KeyCode::Tab)],
        );
        kb.bindings.insert(KeyAction::New, vec![KeySpec::ctrl('n')]);
        kb.bindings.insert(KeyAction::Power, vec![KeySpec::ctrl('p')]);
        kb.bindings.insert(KeyAction::Refresh, vec![KeySpec::ctrl('r')]);
        kb.bindings
            .insert(KeyAction::RevertSnapshot, vec![KeySpec::ctrl('s')]);

        kb
    }
}

impl KeyBindings {
    pub fn matches(&self, action: KeyAction, code: &KeyCode, modifiers: KeyModifiers) -> bool {
        self.bindings
            .get(&action)
            .is_some_and(|v| v.iter().any(|k| k.matches(code, modifiers)))
    }

    /// First action bound to the key, lifecycle commands before navigation
    pub fn resolve(&self, code: &KeyCode, modifiers: KeyModifiers) -> Option<KeyAction> {
        KeyAction::ALL
            .into_iter()
            .find(|a| self.matches(*a, code, modifiers))
    }

    /// Primary key of an action, for hints
    pub fn hint(&self, action: KeyAction) -> String {
        self.bindings
            .get(&action)
            .and_then(|v| v.first())
            .map(|k| k.display())
            .unwrap_or_default()
    }
}

fn parse_key_spec(s: &str) -> Option<KeySpec> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut modifiers = KeyModifiers::NONE;
    let parts: Vec<&str> = s.split('+').map(|p| p.trim()).collect();
    let (mods, key_part) = if parts.len() >= 2 {
        (&parts[..parts.len() - 1], parts[parts.len() - 1])
    } else {
        (&[][..], parts[0])
    };

    for m in mods {
        match m.to_lowercase().as_str() {
            "ctrl" | "control" => modifiers |= KeyModifiers::CONTROL,
            "alt" => modifiers |= KeyModifiers::ALT,
            _ => return None,
        }
    }

    let lower = key_part.to_lowercase();

    let code = match lower.as_str() {
        "enter" => KeyCode::Enter,
        "esc" | "escape" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" | "del" => KeyCode::Delete,
        "space" => KeyCode::Char(' '),
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        f if f.len() >= 2 && f.starts_with('f') && f[1..].parse::<u8>().is_ok() => {
            KeyCode::F(f[1..].parse().ok()?)
        }
        _ => {
            if key_part.chars().count() == 1 {
                let c = key_part.chars().next()?;
                // Control chords are reported lowercase
                if modifiers.contains(KeyModifiers::CONTROL) {
                    KeyCode::Char(c.to_ascii_lowercase())
                } else {
                    KeyCode::Char(c)
                }
            } else {
                return None;
            }
        }
    };

    Some(KeySpec { code, modifiers })
}
