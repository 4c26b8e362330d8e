use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use crate::config::{KeyAction, KeyBindings};
use crate::inventory::{InventoryNode, NodeKind, NodeRef};
use crate::session::{PowerAction, SessionState};

use super::dialogs::{
    CloneDialog, DeployDialog, DeployStatus, ErrorDialog, FormField, NewVmForm, PowerMenu,
    SearchDialog,
};
use super::input::TextInput;
use super::view::TreeView;

/// Main render function
pub fn draw(f: &mut Frame, session: &SessionState, view: &TreeView, keys: &KeyBindings) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Status bar
        ])
        .split(f.area());

    render_title(f, chunks[0], session);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    render_tree(f, cols[0], view);
    render_detail(f, cols[1], session, view);

    render_status_bar(f, chunks[2], session, view, keys);
}

fn render_title(f: &mut Frame, area: Rect, session: &SessionState) {
    let title = Paragraph::new(format!(
        "vctui · {} · {} VMs",
        session.datacenter(),
        session.inventory().len()
    ))
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(title, area);
}

fn kind_color(kind: Option<NodeKind>) -> Color {
    match kind {
        None => Color::Cyan,
        Some(NodeKind::Datacenter) | Some(NodeKind::Host) => Color::Magenta,
        Some(NodeKind::VirtualMachine) => Color::White,
        Some(NodeKind::Template) => Color::Yellow,
        Some(NodeKind::Folder) => Color::Blue,
        Some(NodeKind::Disk) | Some(NodeKind::NetworkInterface) | Some(NodeKind::Snapshot) => {
            Color::Gray
        }
    }
}

fn render_tree(f: &mut Frame, area: Rect, view: &TreeView) {
    let selected = view.selected_index();
    let items: Vec<ListItem> = view
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let icon = match (row.has_children, row.expanded) {
                (false, _) => " ",
                (true, true) => "▾",
                (true, false) => "▸",
            };
            let base = if i == selected {
                Style::default().fg(Color::Black).bg(Color::Cyan)
            } else {
                Style::default().fg(kind_color(row.kind))
            };
            let mut text_style = base;
            if row.kind.is_none() || row.kind == Some(NodeKind::Folder) {
                text_style = text_style.add_modifier(Modifier::BOLD);
            }
            ListItem::new(Line::from(vec![
                Span::raw("  ".repeat(row.depth)),
                Span::styled(icon, Style::default().fg(Color::Magenta)),
                Span::raw(" "),
                Span::styled(row.text.clone(), text_style),
            ]))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(format!(
        "Inventory ({}/{})",
        selected + 1,
        view.rows().len()
    )));

    let mut state = ListState::default().with_selected(Some(selected));
    f.render_stateful_widget(list, area, &mut state);
}

/// Label/value pairs describing a node
pub fn detail_lines(node: &InventoryNode) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    let mut push = |k: &str, v: String| out.push((k.to_string(), v));

    let Some(reference) = node.reference() else {
        let count = node.children().len();
        push("Children", count.to_string());
        return out;
    };

    match reference {
        NodeRef::Datacenter { name } => push("Datacenter", name.clone()),
        NodeRef::Host { name } => {
            push("Host", name.clone());
            push("VMs", node.children().len().to_string());
        }
        NodeRef::VirtualMachine { vm } | NodeRef::Template { vm } => {
            let s = vm.summary();
            push("Name", s.name.clone());
            push(
                "Type",
                if s.template { "template" } else { "virtual machine" }.to_string(),
            );
            push("Power", s.power_state.to_string());
            push("Datacenter", s.datacenter.clone());
            push("Host", s.host.clone());
            push("Guest OS", s.guest_os.clone());
            push("CPUs", s.cpus.to_string());
            push("Memory", format!("{} MB", s.memory_mb));
            push("Disks", s.disks.len().to_string());
            push("NICs", s.nics.len().to_string());
            push("Snapshots", s.snapshots.len().to_string());
        }
        NodeRef::Folder { kind, vm } => {
            push(kind.label(), node.children().len().to_string());
            push("VM", vm.name().to_string());
        }
        NodeRef::Disk { key, vm } => {
            if let Some(d) = vm.summary().disks.iter().find(|d| d.key == *key) {
                push("Disk", d.label.clone());
                push("Capacity", format!("{} GB", d.capacity_gb));
            }
            push("Device key", key.to_string());
            push("VM", vm.name().to_string());
        }
        NodeRef::NetworkInterface { mac, vm } => {
            push("MAC", mac.clone());
            if let Some(n) = vm.summary().nics.iter().find(|n| n.mac == *mac) {
                push("Adapter", n.label.clone());
                push("Network", n.network.clone());
            }
            push("VM", vm.name().to_string());
        }
        NodeRef::Snapshot { name, vm } => {
            push("Snapshot", name.clone());
            if let Some(s) = vm.summary().snapshots.iter().find(|s| s.name == *name) {
                if !s.description.is_empty() {
                    push("Description", s.description.clone());
                }
                if let Some(at) = s.created_at {
                    push("Created", at.format("%Y-%m-%d %H:%M UTC").to_string());
                }
            }
            push("VM", vm.name().to_string());
        }
    }
    out
}

fn render_detail(f: &mut Frame, area: Rect, session: &SessionState, view: &TreeView) {
    let node = session.root().node_at(view.selected_path());
    let title = node
        .and_then(|n| n.reference())
        .map_or("Details".to_string(), |r| {
            format!("Details • {}", r.kind().as_str())
        });

    let pairs = node.map(detail_lines).unwrap_or_default();
    let width = pairs.iter().map(|(k, _)| k.width()).max().unwrap_or(0);
    let lines: Vec<Line> = pairs
        .into_iter()
        .map(|(k, v)| {
            let pad = " ".repeat(width - k.width());
            Line::from(vec![
                Span::styled(format!("{k}{pad}  "), Style::default().fg(Color::DarkGray)),
                Span::raw(v),
            ])
        })
        .collect();

    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn render_status_bar(
    f: &mut Frame,
    area: Rect,
    session: &SessionState,
    view: &TreeView,
    keys: &KeyBindings,
) {
    let kind = view.selected_row().and_then(|r| r.kind);
    let mut spans = vec![Span::raw("  ")];

    let mut hint = |action: KeyAction, label: &str, color: Color| {
        spans.push(Span::styled(keys.hint(action), Style::default().fg(color)));
        spans.push(Span::raw(format!(":{label}  ")));
    };

    let has_vm = matches!(
        kind,
        Some(
            NodeKind::VirtualMachine
                | NodeKind::Template
                | NodeKind::Folder
                | NodeKind::Disk
                | NodeKind::NetworkInterface
                | NodeKind::Snapshot
        )
    );
    if has_vm {
        hint(KeyAction::Power, "power", Color::Cyan);
        hint(KeyAction::Delete, "delete", Color::Red);
        hint(KeyAction::Deploy, "deploy", Color::Cyan);
    }
    if kind == Some(NodeKind::Snapshot) {
        hint(KeyAction::RevertSnapshot, "revert", Color::Yellow);
    }
    hint(KeyAction::New, "new", Color::Cyan);
    hint(KeyAction::Find, "find", Color::Cyan);
    hint(KeyAction::Refresh, "refresh", Color::Yellow);
    hint(KeyAction::Quit, "quit", Color::Red);

    if !session.filter().is_empty() {
        spans.push(Span::raw("|  "));
        spans.push(Span::styled(
            "Filter: ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::raw(session.filter().to_string()));
    }

    let status = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(status, area);
}

fn popup(f: &mut Frame, percent_x: u16, percent_y: u16, title: &str) -> Rect {
    let area = centered_rect(percent_x, percent_y, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title.to_string())
        .style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);
    inner
}

fn input_line(label: &str, input: &TextInput, focused: bool) -> Line<'static> {
    let style = if focused {
        Style::default().fg(Color::Black).bg(Color::Cyan)
    } else {
        Style::default()
    };
    Line::from(vec![
        Span::styled(format!("{label}: "), Style::default().fg(Color::DarkGray)),
        Span::styled(input.text().to_string(), style),
    ])
}

fn place_cursor(f: &mut Frame, area: Rect, row: u16, label: &str, input: &TextInput) {
    let x = area.x + (label.width() + 2 + input.cursor_char_pos()) as u16;
    f.set_cursor_position(Position::new(x.min(area.right().saturating_sub(1)), area.y + row));
}

pub fn draw_search(f: &mut Frame, d: &SearchDialog) {
    let area = popup(f, 60, 30, "Search VMs");
    let status = match &d.preview {
        Ok(n) => Line::styled(format!("{n} matching"), Style::default().fg(Color::Green)),
        Err(e) => Line::styled(e.clone(), Style::default().fg(Color::Red)),
    };
    let lines = vec![
        input_line("Filter", &d.input, true),
        Line::from(""),
        status,
        Line::from(""),
        Line::styled(
            "text: name/host/MAC substring   /re/: regex on name   empty: all",
            Style::default().fg(Color::DarkGray),
        ),
        Line::styled("Enter: apply   Esc: cancel", Style::default().fg(Color::DarkGray)),
    ];
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), area);
    place_cursor(f, area, 0, "Filter", &d.input);
}

pub fn draw_power(f: &mut Frame, m: &PowerMenu) {
    let area = popup(f, 50, 50, &format!("Power • {}", m.vm));
    let items: Vec<ListItem> = PowerAction::MENU
        .iter()
        .map(|a| ListItem::new(a.label()))
        .collect();
    let list = List::new(items)
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(m.selected));
    f.render_stateful_widget(list, area, &mut state);
}

pub fn draw_deploy(f: &mut Frame, d: &DeployDialog) {
    let area = popup(f, 60, 50, &format!("Deploy • {}", d.hostname));
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    f.render_widget(
        Paragraph::new(format!("MAC {}  →  {}", d.address, d.hostname)),
        rows[0],
    );

    let items: Vec<ListItem> = d.types.iter().map(|t| ListItem::new(t.as_str())).collect();
    let list = List::new(items)
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(d.selected));
    f.render_stateful_widget(list, rows[1], &mut state);

    let footer = match &d.status {
        None => Line::styled(
            "Enter: deploy   Esc: cancel",
            Style::default().fg(Color::DarkGray),
        ),
        Some(DeployStatus::Sent(msg)) => Line::styled(msg.clone(), Style::default().fg(Color::Green)),
        Some(DeployStatus::Failed(msg)) => Line::styled(msg.clone(), Style::default().fg(Color::Red)),
    };
    f.render_widget(Paragraph::new(footer).wrap(Wrap { trim: false }), rows[2]);
}

pub fn draw_new_vm(f: &mut Frame, form: &NewVmForm) {
    let area = popup(f, 60, 60, &format!("New VM • {}", form.datacenter));
    let mut lines: Vec<Line> = FormField::ALL
        .iter()
        .zip(&form.inputs)
        .enumerate()
        .map(|(i, (field, input))| input_line(field.label(), input, i == form.focus))
        .collect();
    lines.push(Line::from(""));
    if let Some(err) = &form.error {
        lines.push(Line::styled(err.clone(), Style::default().fg(Color::Red)));
    }
    lines.push(Line::styled(
        "Tab/↓: next   Enter: create   Esc: cancel",
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(Paragraph::new(lines), area);

    if let (Some(field), Some(input)) = (FormField::ALL.get(form.focus), form.inputs.get(form.focus))
    {
        place_cursor(f, area, form.focus as u16, field.label(), input);
    }
}

pub fn draw_clone(f: &mut Frame, d: &CloneDialog) {
    let area = popup(f, 60, 30, &format!("New VM from template • {}", d.template));
    let mut lines = vec![input_line("Name", &d.name, true), Line::from("")];
    if let Some(err) = &d.error {
        lines.push(Line::styled(err.clone(), Style::default().fg(Color::Red)));
    }
    lines.push(Line::styled(
        "Enter: clone   Esc: cancel",
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(Paragraph::new(lines), area);
    place_cursor(f, area, 0, "Name", &d.name);
}

pub fn draw_error(f: &mut Frame, d: &ErrorDialog) {
    let area = centered_rect(60, 30, f.area());
    f.render_widget(Clear, area);
    let p = Paragraph::new(vec![
        Line::from(d.message.clone()),
        Line::from(""),
        Line::styled("Press any key", Style::default().fg(Color::DarkGray)),
    ])
    .wrap(Wrap { trim: false })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(d.title)
            .style(Style::default().fg(Color::Red)),
    );
    f.render_widget(p, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
