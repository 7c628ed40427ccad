use chrono::{DateTime, Datelike, Local, Utc};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Row, StatefulWidget, Table, TableState, Widget, Wrap},
};
use regex::Regex;
use std::sync::OnceLock;

use crate::app::{self, App, InputMode, Tab, Toast, ToastKind};
use crate::message::Message;

/// Format a date for display in message lists
/// Shows time for current year, year for older messages
fn format_date(date: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = date.with_timezone(&Local);
    let now = Local::now();

    if local.date_naive() == now.date_naive() {
        // Today: "10:30"
        local.format("%H:%M").to_string()
    } else if local.year() == now.year() {
        // Current year: "Jan 15 10:30"
        local.format("%b %d %H:%M").to_string()
    } else {
        // Previous years: "Jan 15  2024"
        local.format("%b %d  %Y").to_string()
    }
}

struct HtmlPatterns {
    hidden: Regex,
    breaks: Regex,
    tags: Regex,
    blank_lines: Regex,
}

fn html_patterns() -> Option<&'static HtmlPatterns> {
    static PATTERNS: OnceLock<Option<HtmlPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(HtmlPatterns {
                hidden: Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)\s*>").ok()?,
                breaks: Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6])\s*>").ok()?,
                tags: Regex::new(r"(?s)<[^>]*>").ok()?,
                blank_lines: Regex::new(r"\n[ \t]*(\n[ \t]*)+").ok()?,
            })
        })
        .as_ref()
}

/// Renders a message body as plain terminal text.
/// Bodies are stored raw; markup is only dropped for display.
pub fn strip_html(body: &str) -> String {
    let Some(patterns) = html_patterns().filter(|_| body.contains('<')) else {
        return body.to_string();
    };

    let text = patterns.hidden.replace_all(body, "");
    let text = patterns.breaks.replace_all(&text, "\n");
    let text = patterns.tags.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    patterns
        .blank_lines
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

/// State for the confirmation dialog
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmAction {
    /// Delete one message for good
    Delete { id: String, subject: String },
    /// Replace the active address; its messages are no longer shown
    NewAddress { current: String },
}

impl ConfirmAction {
    pub fn message(&self) -> Vec<String> {
        match self {
            ConfirmAction::Delete { subject, .. } => {
                vec![format!("Delete \"{}\"?", subject), "(y/n)".to_string()]
            }
            ConfirmAction::NewAddress { current } => {
                vec![
                    "Generate a new address?".to_string(),
                    format!("{} will no longer be shown.", current),
                    "(y/n)".to_string(),
                ]
            }
        }
    }
}

/// Spinner frames for animated busy indicator
const SPINNER_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// UI state that supplements App state
#[derive(Debug, Default)]
pub struct UiState {
    pub confirm_action: Option<ConfirmAction>,
    /// Set while an address is being generated
    pub busy_message: Option<String>,
    /// Frame counter for spinner animation
    pub spinner_frame: usize,
    /// Lines scrolled in the message pane
    pub detail_scroll: u16,
}

impl UiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_confirm(&mut self, action: ConfirmAction) {
        self.confirm_action = Some(action);
    }

    pub fn clear_confirm(&mut self) {
        self.confirm_action = None;
    }

    pub fn is_confirming(&self) -> bool {
        self.confirm_action.is_some()
    }

    pub fn set_busy(&mut self, msg: impl Into<String>) {
        self.busy_message = Some(msg.into());
        self.spinner_frame = 0;
    }

    pub fn clear_busy(&mut self) {
        self.busy_message = None;
    }

    pub fn is_busy(&self) -> bool {
        self.busy_message.is_some()
    }

    /// Advance the spinner animation frame
    pub fn tick_spinner(&mut self) {
        self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES.len();
    }

    /// Get the current spinner character
    pub fn spinner_char(&self) -> char {
        SPINNER_FRAMES[self.spinner_frame % SPINNER_FRAMES.len()]
    }

    pub fn scroll_down(&mut self) {
        self.detail_scroll = self.detail_scroll.saturating_add(1);
    }

    pub fn scroll_up(&mut self) {
        self.detail_scroll = self.detail_scroll.saturating_sub(1);
    }

    pub fn reset_scroll(&mut self) {
        self.detail_scroll = 0;
    }
}

/// Clears a rectangle so an overlay does not mix with what is under it
fn clear_area(area: Rect, buf: &mut Buffer) {
    Clear.render(area, buf);
}

/// Widget for the busy/loading modal overlay
pub struct BusyModalWidget<'a> {
    message: &'a str,
    spinner: char,
}

impl<'a> BusyModalWidget<'a> {
    pub fn new(message: &'a str, spinner: char) -> Self {
        Self { message, spinner }
    }
}

impl Widget for BusyModalWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let display_msg = format!("{} {}", self.spinner, self.message);

        let msg_width = display_msg.chars().count() as u16 + 4;
        let box_width = msg_width.max(20).min(area.width.saturating_sub(4));
        let box_height = 3;

        let x = area.x + (area.width.saturating_sub(box_width)) / 2;
        let y = area.y + (area.height.saturating_sub(box_height)) / 2;
        let modal_area = Rect::new(x, y, box_width, box_height.min(area.height));

        clear_area(modal_area, buf);

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan));
        let inner = block.inner(modal_area);
        block.render(modal_area, buf);

        let msg_x = inner.x + (inner.width.saturating_sub(display_msg.chars().count() as u16)) / 2;
        buf.set_line(
            msg_x,
            inner.y,
            &Line::from(Span::styled(
                display_msg,
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
            inner.width,
        );
    }
}

/// Address, expiry and counters across the top
pub struct HeaderWidget<'a> {
    app: &'a App,
}

impl<'a> HeaderWidget<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }
}

impl Widget for HeaderWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default().borders(Borders::ALL).title(" tempmail ");
        let inner = block.inner(area);
        block.render(area, buf);

        let mut spans = match self.app.address() {
            Some(address) => vec![
                Span::styled(
                    address.email.clone(),
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                ),
            ],
            None => vec![Span::styled(
                "No address yet (press n to generate one)",
                Style::default().fg(Color::DarkGray),
            )],
        };

        if let Some(remaining) = self.app.expires_in() {
            let color = if remaining <= chrono::Duration::minutes(5) {
                Color::Red
            } else {
                Color::DarkGray
            };
            spans.push(Span::styled(
                format!("  expires in {}", app::format_remaining(remaining)),
                Style::default().fg(color),
            ));
        }

        let tab = |label: &'static str, tab: Tab| {
            if self.app.tab == tab {
                Span::styled(label, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
            } else {
                Span::styled(label, Style::default().fg(Color::DarkGray))
            }
        };
        spans.push(Span::raw("  "));
        spans.push(tab("All", Tab::All));
        spans.push(Span::raw(format!(" ({})  ", self.app.total_count())));
        spans.push(tab("Unread", Tab::Unread));
        spans.push(Span::raw(format!(" ({})", self.app.unread_count())));

        buf.set_line(inner.x, inner.y, &Line::from(spans), inner.width);
    }
}

/// Widget for rendering the message list
pub struct MessageListWidget<'a> {
    app: &'a App,
}

impl<'a> MessageListWidget<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }
}

impl StatefulWidget for MessageListWidget<'_> {
    type State = TableState;

    fn render(self, area: Rect, buf: &mut Buffer, state: &mut Self::State) {
        let rows = self.app.rows();
        let title = if self.app.search.is_empty() {
            format!(" Inbox ({}) ", rows.len())
        } else {
            format!(" Inbox matching \"{}\" ({}) ", self.app.search, rows.len())
        };

        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(area);
        block.render(area, buf);

        if rows.is_empty() {
            let msg = if self.app.address().is_none() {
                "Generate an address to start receiving mail"
            } else if !self.app.search.is_empty() {
                "No messages match your search"
            } else {
                "Waiting for messages..."
            };
            let x = inner.x + (inner.width.saturating_sub(msg.len() as u16)) / 2;
            let y = inner.y + inner.height / 2;
            buf.set_line(
                x,
                y,
                &Line::from(Span::styled(msg, Style::default().fg(Color::DarkGray))),
                inner.width,
            );
            return;
        }

        let selected_id = self.app.selection().map(|m| m.id.as_str());
        let table_rows: Vec<Row> = rows
            .iter()
            .map(|message| {
                let marker = if self.app.is_pending(&message.id) {
                    "…"
                } else if !message.read {
                    "●"
                } else {
                    " "
                };
                let clip = if message.attachments.is_empty() { " " } else { "+" };

                let mut style = Style::default();
                if !message.read {
                    style = style.add_modifier(Modifier::BOLD);
                }
                if selected_id == Some(message.id.as_str()) {
                    style = style.fg(Color::Cyan);
                }

                Row::new(vec![
                    marker.to_string(),
                    format_date(&message.received_at),
                    message.from.clone(),
                    clip.to_string(),
                    message.subject.clone(),
                ])
                .style(style)
            })
            .collect();

        let table = Table::new(
            table_rows,
            [
                Constraint::Length(1),  // Unread / pending marker
                Constraint::Length(12), // Date column
                Constraint::Length(28), // Sender
                Constraint::Length(1),  // Attachment indicator
                Constraint::Min(20),    // Subject
            ],
        )
        .column_spacing(1)
        .row_highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

        StatefulWidget::render(table, inner, buf, state);
    }
}

/// The selected message, body stripped of markup
pub struct MessageDetailWidget<'a> {
    message: &'a Message,
    scroll: u16,
}

impl<'a> MessageDetailWidget<'a> {
    pub fn new(message: &'a Message, scroll: u16) -> Self {
        Self { message, scroll }
    }
}

impl Widget for MessageDetailWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let message = self.message;
        let label = Style::default().fg(Color::DarkGray);

        let mut lines = vec![
            Line::from(vec![Span::styled("From:    ", label), Span::raw(message.from.clone())]),
            Line::from(vec![
                Span::styled("Subject: ", label),
                Span::styled(message.subject.clone(), Style::default().add_modifier(Modifier::BOLD)),
            ]),
            Line::from(vec![
                Span::styled("Date:    ", label),
                Span::raw(
                    message
                        .received_at
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M")
                        .to_string(),
                ),
            ]),
        ];

        if !message.attachments.is_empty() {
            let names: Vec<String> = message
                .attachments
                .iter()
                .map(|a| {
                    if a.size.is_empty() {
                        a.name.clone()
                    } else {
                        format!("{} ({})", a.name, a.size)
                    }
                })
                .collect();
            lines.push(Line::from(vec![
                Span::styled("Files:   ", label),
                Span::raw(names.join(", ")),
            ]));
        }

        lines.push(Line::default());
        lines.extend(strip_html(&message.body).lines().map(|l| Line::from(l.to_string())));

        let status = if message.read { " read " } else { " unread " };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Message ")
            .title_bottom(Line::from(Span::styled(status, label)));

        Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((self.scroll, 0))
            .render(area, buf);
    }
}

/// Search input line, shown while typing a query
pub struct SearchBarWidget<'a> {
    query: &'a str,
}

impl<'a> SearchBarWidget<'a> {
    pub fn new(query: &'a str) -> Self {
        Self { query }
    }
}

impl Widget for SearchBarWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let line = Line::from(vec![
            Span::styled("/", Style::default().fg(Color::Yellow)),
            Span::raw(self.query),
            Span::styled("█", Style::default().fg(Color::DarkGray)),
        ]);
        buf.set_line(area.x, area.y, &line, area.width);
    }
}

/// Widget for the help bar at the bottom
pub struct HelpBarWidget<'a> {
    app: &'a App,
}

impl<'a> HelpBarWidget<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }
}

impl Widget for HelpBarWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let help_text = match (self.app.input_mode, self.app.view) {
            (InputMode::Search, _) => "type to filter | Enter: keep filter | Esc: clear",
            (_, app::View::Inbox) => {
                "j/k: move | Enter: open | c: copy address | m: read/unread | a: archive | d: delete | u: unread | /: search | r: refresh | n: new address | q: quit"
            }
            (_, app::View::Message) => {
                "j/k: scroll | m: read/unread | a: archive | d: delete | q/Esc: back"
            }
        };

        Paragraph::new(help_text)
            .style(Style::default().fg(Color::DarkGray))
            .render(area, buf);
    }
}

/// Transient feedback in the top-right corner
pub struct ToastWidget<'a> {
    toast: &'a Toast,
}

impl<'a> ToastWidget<'a> {
    pub fn new(toast: &'a Toast) -> Self {
        Self { toast }
    }
}

impl Widget for ToastWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let color = match self.toast.kind {
            ToastKind::Info => Color::Green,
            ToastKind::Error => Color::Red,
        };

        let text_width = self.toast.title.chars().count().max(self.toast.body.chars().count());
        let text_width = u16::try_from(text_width).unwrap_or(u16::MAX);
        let height = if self.toast.body.is_empty() { 3 } else { 4 };
        let width = text_width.saturating_add(4).max(24).min(area.width);
        let toast_area = Rect::new(
            area.x + area.width.saturating_sub(width),
            area.y,
            width,
            height.min(area.height),
        );

        clear_area(toast_area, buf);

        let mut lines = vec![Line::from(Span::styled(
            self.toast.title.clone(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))];
        if !self.toast.body.is_empty() {
            lines.push(Line::from(self.toast.body.clone()));
        }

        Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color)),
            )
            .render(toast_area, buf);
    }
}

/// Widget for the confirmation dialog
pub struct ConfirmDialogWidget<'a> {
    action: &'a ConfirmAction,
}

impl<'a> ConfirmDialogWidget<'a> {
    pub fn new(action: &'a ConfirmAction) -> Self {
        Self { action }
    }
}

impl Widget for ConfirmDialogWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        clear_area(area, buf);

        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Confirm ")
            .style(Style::default().fg(Color::Red));

        let inner = block.inner(area);
        block.render(area, buf);

        for (i, line) in self.action.message().iter().enumerate() {
            if i >= inner.height as usize {
                break;
            }
            buf.set_line(
                inner.x,
                inner.y + i as u16,
                &Line::from(Span::styled(line.clone(), Style::default().fg(Color::White))),
                inner.width,
            );
        }
    }
}
