use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event as CrosstermEvent, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};

use crate::config::KeyAction;
use crate::error::Result;
use crate::session::{Dispatcher, Outcome, Screen, SubDialogs};

use super::render;
use super::view::TreeView;

/// The main screen: raw mode on the alternate screen
pub struct TerminalScreen {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    active: bool,
}

impl TerminalScreen {
    pub fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        Ok(Self {
            terminal,
            active: true,
        })
    }

    pub fn draw(&mut self, f: impl FnOnce(&mut Frame)) -> Result<()> {
        if self.active {
            self.terminal.draw(f)?;
        }
        Ok(())
    }

    /// Give the terminal back to the shell for good
    pub fn leave(&mut self) -> Result<()> {
        self.release()
    }
}

impl Screen for TerminalScreen {
    fn release(&mut self) -> Result<()> {
        self.active = false;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }

    fn repair(&mut self) -> Result<()> {
        enable_raw_mode()?;
        execute!(self.terminal.backend_mut(), EnterAlternateScreen)?;
        // Keys typed into the sub-dialog must not replay on the tree
        while event::poll(Duration::ZERO)? {
            event::read()?;
        }
        self.terminal.clear()?;
        self.active = true;
        Ok(())
    }
}

impl Drop for TerminalScreen {
    fn drop(&mut self) {
        if self.active {
            let _ = disable_raw_mode();
            let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
            let _ = self.terminal.show_cursor();
        }
    }
}

/// Main TUI application
pub struct App<D: SubDialogs> {
    dispatcher: Dispatcher<TerminalScreen, D>,
    view: TreeView,
    should_quit: bool,
}

impl<D: SubDialogs> App<D> {
    const TICK: Duration = Duration::from_millis(250);

    pub fn new(dispatcher: Dispatcher<TerminalScreen, D>) -> Self {
        let view = TreeView::new(dispatcher.session().root());
        Self {
            dispatcher,
            view,
            should_quit: false,
        }
    }

    /// Run until the operator quits. Pending boot-order reverts are allowed
    /// to fire before returning.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.event_loop().await;

        let (screen, _, _) = self.dispatcher.parts_mut();
        if let Err(e) = screen.leave() {
            tracing::warn!("Failed to restore terminal: {}", e);
        }
        if self.dispatcher.has_pending_reverts() {
            eprintln!("Waiting for boot order to be restored...");
        }
        self.dispatcher.wait_pending_reverts().await;

        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            self.draw()?;

            if event::poll(Self::TICK)? {
                match event::read()? {
                    CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key.code, key.modifiers).await;
                    }
                    CrosstermEvent::Resize(_, _) => {
                        // Next draw will re-render with new size
                    }
                    _ => {}
                }
            }

            self.dispatcher.drain_deferred().await;

            if self.should_quit {
                return Ok(());
            }
        }
    }

    fn draw(&mut self) -> Result<()> {
        let view = &self.view;
        let (screen, session, keys) = self.dispatcher.parts_mut();
        screen.draw(|f| render::draw(f, session, view, keys))
    }

    async fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        let path = self.view.selected_path().to_vec();
        match self.dispatcher.dispatch(code, modifiers, &path).await {
            Outcome::Handled => self.view.sync(self.dispatcher.session().root()),
            Outcome::PassThrough => self.navigate(code, modifiers),
        }
    }

    fn navigate(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        let Some(action) = self.dispatcher.keys().resolve(&code, modifiers) else {
            return;
        };
        let root = self.dispatcher.session_mut().root_mut();
        match action {
            KeyAction::Quit => self.should_quit = true,
            KeyAction::Up => self.view.move_up(),
            KeyAction::Down => self.view.move_down(),
            KeyAction::Select => self.view.toggle(root),
            KeyAction::Collapse => self.view.collapse(root),
            KeyAction::Expand => self.view.expand(root),
            _ => {}
        }
    }
}
