use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::broadcast::error::TryRecvError;

use tempmail::app::{self, App, InputMode, Snapshot, View};
use tempmail::client::MailClient;
use tempmail::clipboard::Clipboard;
use tempmail::config::{self, Config};
use tempmail::debug;
use tempmail::debug_log;
use tempmail::demo::DemoGateway;
use tempmail::gateway::{Gateway, HttpGateway};
use tempmail::registry::{AddressStore, FileStore, MemoryStore};
use tempmail::ui::render::render;
use tempmail::ui::widgets::{ConfirmAction, UiState};

const USAGE: &str = "\
Usage: tempmail [--demo] [--debug]

  --demo    Run against an in-memory mailbox instead of the API
  --debug   Write a debug log to ~/.config/tempmail/debug.log
  --help    Show this message

The API base URL comes from config.toml or TEMPMAIL_API_URL.";

/// Demo calls are slowed down so optimistic updates are visible
const DEMO_LATENCY: Duration = Duration::from_millis(400);
/// One in this many demo mutations fails, to show rollback
const DEMO_FAILURE_EVERY: usize = 7;

type Term = Terminal<CrosstermBackend<io::Stdout>>;

#[derive(Debug, Default, PartialEq)]
struct Args {
    demo: bool,
    debug: bool,
    help: bool,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        for arg in args {
            match arg.as_str() {
                "--demo" => parsed.demo = true,
                "--debug" => parsed.debug = true,
                "-h" | "--help" => parsed.help = true,
                other => anyhow::bail!("Unknown argument: {}\n\n{}", other, USAGE),
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = config::load()?;
    debug::init(args.debug || config.debug);
    debug_log!("Starting tempmail (demo: {}, api: {})", args.demo, config.api_url);

    let result = if args.demo {
        let gateway = DemoGateway::new()
            .with_latency(DEMO_LATENCY)
            .with_failures_every(DEMO_FAILURE_EVERY);
        run(gateway, Box::new(MemoryStore::default()), &config).await
    } else {
        config::ensure_config_dir()?;
        let gateway = HttpGateway::new(&config.api_url, config.request_timeout());
        let store = FileStore::new(config::address_path()?);
        run(gateway, Box::new(store), &config).await
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

/// Owns the terminal for the lifetime of the UI and always restores it
async fn run<G: Gateway + 'static>(gateway: G, store: Box<dyn AddressStore>, config: &Config) -> Result<()> {
    let client = Arc::new(MailClient::new(gateway, store));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &client, config.poll_interval()).await;

    client.shutdown();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

/// Runs an intent in the background. Outcomes come back as notices.
fn spawn_intent<G, F, Fut>(client: &Arc<MailClient<G>>, intent: F)
where
    G: Gateway + 'static,
    F: FnOnce(Arc<MailClient<G>>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(intent(Arc::clone(client)));
}

fn start_generate<G: Gateway + 'static>(client: &Arc<MailClient<G>>, ui_state: &mut UiState) {
    ui_state.set_busy("Generating address...");
    spawn_intent(client, |c| async move {
        let _ = c.generate_new_address().await;
    });
}

async fn run_app<G: Gateway + 'static>(
    terminal: &mut Term,
    client: &Arc<MailClient<G>>,
    poll_interval: Duration,
) -> Result<()> {
    let mut app = App::new();
    let mut ui_state = UiState::new();
    let mut clipboard = Clipboard::new();
    let mut notices = client.subscribe();

    client.start_polling(poll_interval);
    if client.address().is_none() {
        start_generate(client, &mut ui_state);
    }

    loop {
        app.sync(Snapshot::capture(client, Utc::now()));
        app.expire_toast(Instant::now());
        terminal.draw(|f| render(f, &app, &ui_state))?;

        loop {
            match notices.try_recv() {
                Ok(notice) => {
                    if app::ends_busy(&notice) {
                        ui_state.clear_busy();
                    }
                    app.handle_notice(&notice);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    debug_log!("ui: skipped {} notices", skipped);
                }
                Err(_) => break,
            }
        }

        if ui_state.is_busy() {
            ui_state.tick_spinner();
        }

        // Poll for keyboard events with timeout
        let ready = tokio::task::block_in_place(|| event::poll(Duration::from_millis(50)))
            .context("Failed to poll terminal events")?;
        if !ready {
            continue;
        }
        if let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && handle_key(key, &mut app, &mut ui_state, &mut clipboard, client)
        {
            break;
        }
    }

    Ok(())
}

/// Handles one key press. Returns true when the user asked to quit.
fn handle_key<G: Gateway + 'static>(
    key: KeyEvent,
    app: &mut App,
    ui_state: &mut UiState,
    clipboard: &mut Clipboard,
    client: &Arc<MailClient<G>>,
) -> bool {
    if app.input_mode == InputMode::Search {
        match key.code {
            KeyCode::Char(c) => app.push_search_char(c),
            KeyCode::Backspace => app.pop_search_char(),
            KeyCode::Enter => app.end_search(),
            KeyCode::Esc => app.cancel_search(),
            _ => {}
        }
        return false;
    }

    if ui_state.is_busy() {
        return key.code == KeyCode::Char('q');
    }

    // Handle confirmation dialog input
    if ui_state.is_confirming() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(action) = ui_state.confirm_action.take() {
                    handle_confirmed_action(action, ui_state, client);
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                ui_state.clear_confirm();
            }
            _ => {}
        }
        return false;
    }

    let target = app.target().map(|m| (m.id.clone(), m.subject.clone()));

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc if app.view == View::Message => {
            app.close();
            client.clear_selection();
        }
        KeyCode::Char('q') => return true,
        KeyCode::Esc => app.cancel_search(),
        KeyCode::Char('j') | KeyCode::Down => match app.view {
            View::Message => ui_state.scroll_down(),
            View::Inbox => app.select_next(),
        },
        KeyCode::Char('k') | KeyCode::Up => match app.view {
            View::Message => ui_state.scroll_up(),
            View::Inbox => app.select_previous(),
        },
        KeyCode::Char('g') | KeyCode::Home => app.select_first(),
        KeyCode::Char('G') | KeyCode::End => app.select_last(),
        KeyCode::Enter => {
            if let Some(id) = app.current_row().map(|m| m.id.clone()) {
                app.open(&id);
                ui_state.reset_scroll();
                spawn_intent(client, |c| async move {
                    let _ = c.select_message(&id).await;
                });
            }
        }
        KeyCode::Char('m') => {
            if let Some((id, _)) = target {
                spawn_intent(client, |c| async move {
                    let _ = c.toggle_read(&id).await;
                });
            }
        }
        KeyCode::Char('a') => {
            if let Some((id, _)) = target {
                spawn_intent(client, |c| async move {
                    let _ = c.archive(&id).await;
                });
            }
        }
        KeyCode::Char('d') => {
            if let Some((id, subject)) = target {
                ui_state.set_confirm(ConfirmAction::Delete { id, subject });
            }
        }
        KeyCode::Char('r') => {
            spawn_intent(client, |c| async move {
                let _ = c.refresh_now().await;
            });
        }
        KeyCode::Char('n') => match app.address() {
            Some(address) => ui_state.set_confirm(ConfirmAction::NewAddress {
                current: address.email.clone(),
            }),
            None => start_generate(client, ui_state),
        },
        KeyCode::Char('c') => {
            if let Some(address) = app.address() {
                let email = address.email.clone();
                let copied = clipboard.copy(&email);
                if let Err(e) = &copied {
                    debug_log!("clipboard: failed to copy {}: {:#}", email, e);
                }
                app.show_copy_result(copied.is_ok());
            }
        }
        KeyCode::Char('u') => app.toggle_tab(),
        KeyCode::Char('/') => app.begin_search(),
        _ => {}
    }

    false
}

/// Handles a confirmed action
fn handle_confirmed_action<G: Gateway + 'static>(
    action: ConfirmAction,
    ui_state: &mut UiState,
    client: &Arc<MailClient<G>>,
) {
    match action {
        ConfirmAction::Delete { id, .. } => {
            spawn_intent(client, |c| async move {
                let _ = c.delete(&id).await;
            });
        }
        ConfirmAction::NewAddress { .. } => start_generate(client, ui_state),
    }
}
