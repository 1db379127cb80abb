//! Parley - terminal chat client with streamed replies.
//!
//! This is the entry point for the `parley` binary.

mod app;
mod history;
mod markdown;
mod ui;

use std::io;
use std::time::Duration;

use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use parley_client::{ClientConfig, Conversation, SessionClient};
use parley_core::SessionId;

use app::{App, Focus, InputMode, REFRESH_INTERVAL};

/// Parley - terminal chat client with streamed replies.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend API base URL, including the `/api` prefix.
    #[arg(long, env = "PARLEY_API_URL", default_value = "http://localhost:8000/api")]
    api_url: String,

    /// Session to resume on startup.
    #[arg(long, env = "PARLEY_SESSION")]
    session: Option<SessionId>,

    /// Seconds without stream data before a reply is abandoned.
    #[arg(long, env = "PARLEY_IDLE_TIMEOUT", default_value_t = 120)]
    idle_timeout: u64,

    /// Enable debug logging (to stderr).
    #[arg(long, default_value = "false")]
    debug: bool,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            idle_timeout_seconds: self.idle_timeout,
            ..ClientConfig::with_base_url(self.api_url.as_str())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter("parley=debug,parley_client=debug,parley_core=debug,warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let config = args.client_config();

    let health_error = match SessionClient::new(&config)?.health().await {
        Ok(true) => None,
        Ok(false) => Some("Backend reports unhealthy".to_string()),
        Err(e) => Some(format!("Backend unreachable: {e}")),
    };
    if let Some(e) = &health_error {
        tracing::warn!(url = %config.base_url, error = %e, "Health check failed");
    }

    let conversation = Conversation::connect(&config)?;
    let mut app = App::new(conversation, config.base_url.clone());
    app.refresh_error = health_error;

    // Open a session before taking over the terminal.
    match args.session {
        Some(id) => app.resume(id).await,
        None => app.new_chat().await,
    }
    if let Err(e) = app.refresh_sessions().await {
        app.refresh_error = Some(format!("Failed to load sessions: {e}"));
    } else if app.refresh_error.is_none() {
        tracing::debug!(url = %config.base_url, "Backend online");
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

/// Main event loop.
///
/// Stream updates trigger an immediate redraw so replies render as they arrive.
async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> anyhow::Result<()> {
    let mut refresh_interval = tokio::time::interval(REFRESH_INTERVAL);

    loop {
        app.tick_animation();
        terminal.draw(|f| ui::render(f, app))?;

        let tick_rate = if app.is_streaming() {
            Duration::from_millis(80)
        } else {
            Duration::from_millis(100)
        };

        tokio::select! {
            () = tokio::time::sleep(tick_rate) => {
                while event::poll(Duration::from_millis(0)).unwrap_or(false) {
                    if let Ok(evt) = event::read() {
                        handle_input(app, evt).await;
                    }
                }
            }

            update = app.next_update() => {
                app.handle_update(update).await;
                terminal.draw(|f| ui::render(f, app))?;
            }

            _ = refresh_interval.tick() => {
                if app.input_mode == InputMode::Normal && !app.is_streaming() {
                    if let Err(e) = app.refresh_sessions().await {
                        tracing::warn!(error = %e, "Failed to refresh sessions");
                        app.refresh_error = Some(format!("Refresh failed: {e}"));
                    } else {
                        app.refresh_error = None;
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.stop_generating();
    Ok(())
}

/// Handle one terminal event.
async fn handle_input(app: &mut App, event: Event) {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => match app.input_mode {
            InputMode::Normal => handle_normal_mode(app, key).await,
            InputMode::ConfirmingDelete => handle_confirm_delete_mode(app, key.code).await,
        },
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::ScrollUp => app.scroll_chat_up(3),
            MouseEventKind::ScrollDown => app.scroll_chat_down(3),
            _ => {}
        },
        _ => {}
    }
}

/// Handle keys outside any dialog.
///
/// Control chords and navigation work from either column; plain typing goes
/// to the composer when the chat column has focus.
async fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = key.code {
            handle_control(app, c).await;
            return;
        }
    }

    match key.code {
        KeyCode::Esc => {
            if app.is_streaming() {
                app.stop_generating();
            } else if app.error().is_some() {
                app.clear_error();
            }
        }
        KeyCode::Tab | KeyCode::BackTab => app.focus = app.focus.toggle(),
        KeyCode::PageUp => app.scroll_chat_up(10),
        KeyCode::PageDown => app.scroll_chat_down(10),
        KeyCode::Up => app.select_prev_session(),
        KeyCode::Down => app.select_next_session(),
        _ => match app.focus {
            Focus::Sessions => {
                if key.code == KeyCode::Enter {
                    app.open_selected().await;
                }
            }
            Focus::Chat => handle_composer(app, key.code),
        },
    }
}

async fn handle_control(app: &mut App, c: char) {
    match c {
        'c' => app.should_quit = true,
        'n' => app.new_chat().await,
        's' => app.summarize().await,
        'o' => app.save_to_notion().await,
        'd' => app.request_delete(),
        'r' => {
            app.set_status("Refreshing...");
            match app.refresh_sessions().await {
                Ok(()) => {
                    app.refresh_error = None;
                    app.set_status("Sessions refreshed");
                }
                Err(e) => app.set_error(format!("Refresh failed: {e}")),
            }
        }
        'a' => app.move_cursor_start(),
        'e' => app.move_cursor_end(),
        'u' => app.clear_input(),
        'w' => app.delete_word(),
        _ => {}
    }
}

/// Composer editing. Disabled while a reply streams.
fn handle_composer(app: &mut App, code: KeyCode) {
    if app.is_streaming() {
        return;
    }

    match code {
        KeyCode::Enter => app.send_input(),
        KeyCode::Char(c) => app.insert_char(c),
        KeyCode::Backspace => app.delete_char(),
        KeyCode::Delete => app.delete_char_forward(),
        KeyCode::Left => app.move_cursor_left(),
        KeyCode::Right => app.move_cursor_right(),
        KeyCode::Home => app.move_cursor_start(),
        KeyCode::End => app.move_cursor_end(),
        _ => {}
    }
}

/// Handle input in the delete confirmation dialog.
async fn handle_confirm_delete_mode(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Char('y' | 'Y') => app.confirm_delete().await,
        KeyCode::Char('n' | 'N') | KeyCode::Esc => app.cancel_dialog(),
        _ => {}
    }
}
