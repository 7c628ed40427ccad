use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    widgets::TableState,
};

use crate::app::{App, InputMode, View};
use crate::ui::widgets::{
    BusyModalWidget, ConfirmDialogWidget, HeaderWidget, HelpBarWidget, MessageDetailWidget,
    MessageListWidget, SearchBarWidget, ToastWidget, UiState,
};

/// Renders the entire application UI
pub fn render(frame: &mut Frame, app: &App, ui_state: &UiState) {
    let searching = app.input_mode == InputMode::Search;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                    // Header
            Constraint::Min(1),                       // Main content
            Constraint::Length(u16::from(searching)), // Search input
            Constraint::Length(1),                    // Help bar
        ])
        .split(frame.area());

    frame.render_widget(HeaderWidget::new(app), chunks[0]);

    // List on the left, open message on the right when one is being read
    let open_message = app.selection().filter(|_| app.view == View::Message);
    let (list_area, detail_area) = match open_message {
        Some(_) => {
            let halves = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
                .split(chunks[1]);
            (halves[0], Some(halves[1]))
        }
        None => (chunks[1], None),
    };

    let selected = (!app.rows().is_empty()).then_some(app.cursor);
    let mut table_state = TableState::default().with_selected(selected);
    frame.render_stateful_widget(MessageListWidget::new(app), list_area, &mut table_state);

    if let (Some(message), Some(area)) = (open_message, detail_area) {
        frame.render_widget(MessageDetailWidget::new(message, ui_state.detail_scroll), area);
    }

    if searching {
        frame.render_widget(SearchBarWidget::new(&app.search), chunks[2]);
    }
    frame.render_widget(HelpBarWidget::new(app), chunks[3]);

    if let Some(toast) = &app.toast {
        frame.render_widget(ToastWidget::new(toast), frame.area());
    }

    if let Some(action) = &ui_state.confirm_action {
        let dialog_area = centered_rect(60, 30, frame.area());
        frame.render_widget(ConfirmDialogWidget::new(action), dialog_area);
    }

    // Busy modal takes priority over everything else
    if let Some(msg) = &ui_state.busy_message {
        frame.render_widget(BusyModalWidget::new(msg, ui_state.spinner_char()), frame.area());
    }
}

/// Creates a centered rectangle for dialogs
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
