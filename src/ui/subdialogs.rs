use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossterm::{
    event::{self, Event as CrosstermEvent, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};

use crate::error::{Error, Result};
use crate::inventory::apply_filter;
use crate::session::{PowerAction, SearchResult, SubDialogs};
use crate::vc::{Client, VmHandle};

use super::dialogs::{
    CloneDialog, DeployDialog, DeployRequest, DeployStatus, ErrorDialog, NewVmForm, PowerMenu,
    SearchDialog, Step,
};
use super::render;

const POLL: Duration = Duration::from_millis(250);

/// Terminal owned by one sub-dialog. Dropping it hands the tty back.
struct DialogTerminal {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl DialogTerminal {
    fn open() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        Ok(Self { terminal })
    }

    fn draw(&mut self, f: impl FnOnce(&mut Frame)) -> Result<()> {
        self.terminal.draw(f)?;
        Ok(())
    }

    /// Next key press, if one arrives within the poll interval
    fn next_key(&mut self) -> Result<Option<KeyCode>> {
        if !event::poll(POLL)? {
            return Ok(None);
        }
        match event::read()? {
            CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Ok(Some(key.code)),
            _ => Ok(None),
        }
    }
}

impl Drop for DialogTerminal {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        );
    }
}

/// The real sub-dialogs, each drawn on its own alternate screen
pub struct TerminalDialogs {
    client: Arc<dyn Client>,
    deploy_url: Option<String>,
    deploy_types: Vec<String>,
    http: reqwest::Client,
}

impl TerminalDialogs {
    pub fn new(
        client: Arc<dyn Client>,
        deploy_url: Option<String>,
        deploy_types: Vec<String>,
    ) -> Self {
        Self {
            client,
            deploy_url,
            deploy_types,
            http: reqwest::Client::new(),
        }
    }

    async fn post_deploy(&self, url: &str, req: &DeployRequest) -> Result<String> {
        let resp = self
            .http
            .post(url)
            .json(req)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;
        let body = resp.text().await?;
        let body = body.trim();
        Ok(if body.is_empty() {
            format!("{} queued for {} deployment", req.hostname, req.deployment)
        } else {
            body.to_string()
        })
    }
}

#[async_trait]
impl SubDialogs for TerminalDialogs {
    async fn search(&mut self, current: &str, vms: &[VmHandle]) -> Result<Option<SearchResult>> {
        let mut term = DialogTerminal::open()?;
        let mut dialog = SearchDialog::new(current, vms);
        loop {
            term.draw(|f| render::draw_search(f, &dialog))?;
            let Some(code) = term.next_key()? else {
                continue;
            };
            match dialog.handle_key(&code, vms) {
                Step::Continue => {}
                Step::Cancel => return Ok(None),
                Step::Done(filter) => {
                    let matched = apply_filter(&filter, vms)?;
                    return Ok(Some(SearchResult { filter, matched }));
                }
            }
        }
    }

    async fn power(&mut self, vm_name: &str) -> Result<PowerAction> {
        let mut term = DialogTerminal::open()?;
        let mut menu = PowerMenu::new(vm_name);
        loop {
            term.draw(|f| render::draw_power(f, &menu))?;
            let Some(code) = term.next_key()? else {
                continue;
            };
            match menu.handle_key(&code) {
                Step::Continue => {}
                Step::Cancel => return Ok(PowerAction::None),
                Step::Done(action) => return Ok(action),
            }
        }
    }

    async fn deploy(&mut self, address: &str, hostname: &str) -> Result<()> {
        let mut term = DialogTerminal::open()?;
        let mut dialog = DeployDialog::new(address, hostname, &self.deploy_types);
        if self.deploy_url.is_none() {
            dialog.status = Some(DeployStatus::Failed(
                "No deploy endpoint configured (set deploy_url in config.toml)".to_string(),
            ));
        }

        loop {
            term.draw(|f| render::draw_deploy(f, &dialog))?;
            let Some(code) = term.next_key()? else {
                continue;
            };
            match dialog.handle_key(&code) {
                Step::Continue => {}
                Step::Cancel => return Ok(()),
                Step::Done(req) => {
                    let Some(url) = self.deploy_url.as_deref() else {
                        return Ok(());
                    };
                    tracing::info!("POST {} for {} ({})", url, req.hostname, req.mac);
                    dialog.status = Some(match self.post_deploy(url, &req).await {
                        Ok(msg) => DeployStatus::Sent(msg),
                        Err(e) => {
                            tracing::warn!("Deploy request failed: {}", e);
                            DeployStatus::Failed(e.to_string())
                        }
                    });
                }
            }
        }
    }

    async fn new_vm(&mut self, client: Arc<dyn Client>, datacenter: &str) -> Result<bool> {
        let mut term = DialogTerminal::open()?;
        let mut form = NewVmForm::new(datacenter);
        loop {
            term.draw(|f| render::draw_new_vm(f, &form))?;
            let Some(code) = term.next_key()? else {
                continue;
            };
            match form.handle_key(&code) {
                Step::Continue => {}
                Step::Cancel => return Ok(false),
                Step::Done(spec) => {
                    let task = client.create_vm(datacenter, &spec).await?;
                    tracing::info!("Create of {} accepted as {}", spec.name, task.id);
                    return Ok(true);
                }
            }
        }
    }

    async fn new_vm_from_template(&mut self, template: &str) -> Result<bool> {
        let mut term = DialogTerminal::open()?;
        let mut dialog = CloneDialog::new(template);
        loop {
            term.draw(|f| render::draw_clone(f, &dialog))?;
            let Some(code) = term.next_key()? else {
                continue;
            };
            match dialog.handle_key(&code) {
                Step::Continue => {}
                Step::Cancel => return Ok(false),
                Step::Done(name) => {
                    let task = self.client.clone_template(template, &name).await?;
                    tracing::info!("Clone of {} to {} accepted as {}", template, name, task.id);
                    return Ok(true);
                }
            }
        }
    }

    async fn error(&mut self, err: &Error) -> Result<()> {
        let mut term = DialogTerminal::open()?;
        let dialog = ErrorDialog::new(err);
        loop {
            term.draw(|f| render::draw_error(f, &dialog))?;
            if term.next_key()?.is_some() {
                return Ok(());
            }
        }
    }
}
