//! Application state for the terminal front-end.
//!
//! [`App`] wraps the [`Conversation`] with everything that only matters on
//! screen: the session list, the composer, focus, scrolling and status text.

use std::time::Duration;

use parley_client::{Conversation, ConversationError, StreamUpdate};
use parley_core::{Session, SessionId};

use crate::history;

/// Refresh interval for the session list.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Which column has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    /// Left column: session list.
    Sessions,
    /// Right column: transcript and composer.
    #[default]
    Chat,
}

impl Focus {
    /// Toggle to the other column.
    #[must_use]
    pub const fn toggle(self) -> Self {
        match self {
            Self::Sessions => Self::Chat,
            Self::Chat => Self::Sessions,
        }
    }
}

/// Modal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Normal operation.
    #[default]
    Normal,
    /// Waiting for y/n on deleting the selected session.
    ConfirmingDelete,
}

/// Application state.
pub struct App {
    conversation: Conversation,
    base_url: String,
    /// Sessions, newest first.
    pub sessions: Vec<Session>,
    /// Index into `sessions` of the highlighted entry.
    pub selected: Option<usize>,
    /// Composer contents.
    pub input: String,
    /// Cursor position in the composer, in characters.
    pub cursor_position: usize,
    /// Which column has focus.
    pub focus: Focus,
    /// Current modal state.
    pub input_mode: InputMode,
    /// Lines scrolled up from the bottom of the transcript.
    pub chat_scroll: usize,
    /// Informational status text.
    pub status_message: Option<String>,
    /// Error from the last user action.
    pub error_message: Option<String>,
    /// Error from the last background session refresh.
    pub refresh_error: Option<String>,
    /// Whether the app should quit.
    pub should_quit: bool,
    /// Frame counter for the spinner.
    pub animation_frame: usize,
}

impl App {
    /// Create the application around an existing conversation.
    #[must_use]
    pub fn new(conversation: Conversation, base_url: impl Into<String>) -> Self {
        Self {
            conversation,
            base_url: base_url.into(),
            sessions: Vec::new(),
            selected: None,
            input: String::new(),
            cursor_position: 0,
            focus: Focus::Chat,
            input_mode: InputMode::Normal,
            chat_scroll: 0,
            status_message: None,
            error_message: None,
            refresh_error: None,
            should_quit: false,
            animation_frame: 0,
        }
    }

    /// The open conversation.
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Backend URL for display.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if a reply is streaming.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.conversation.is_streaming()
    }

    /// Advance the spinner.
    pub fn tick_animation(&mut self) {
        self.animation_frame = self.animation_frame.wrapping_add(1);
    }

    /// Current spinner glyph.
    #[must_use]
    pub fn spinner_char(&self) -> &'static str {
        const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        SPINNER[self.animation_frame % SPINNER.len()]
    }

    /// The highlighted session.
    #[must_use]
    pub fn selected_session(&self) -> Option<&Session> {
        self.selected.and_then(|i| self.sessions.get(i))
    }

    /// Set the status message (also clears any error).
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.error_message = None;
    }

    /// Set the error message.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    /// Error to show: a failed action first, then a failed reply.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .or_else(|| self.conversation.error())
    }

    /// Dismiss all errors.
    pub fn clear_error(&mut self) {
        self.error_message = None;
        self.conversation.clear_error();
    }

    // =========================================================================
    // Session List
    // =========================================================================

    /// Move the highlight up, wrapping at the top.
    pub fn select_prev_session(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(0) | None => self.sessions.len() - 1,
            Some(i) => i - 1,
        });
    }

    /// Move the highlight down, wrapping at the bottom.
    pub fn select_next_session(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) if i + 1 < self.sessions.len() => i + 1,
            _ => 0,
        });
    }

    /// Replace the session list, keeping the highlight on the same session.
    pub fn set_sessions(&mut self, mut sessions: Vec<Session>) {
        history::sort_newest_first(&mut sessions);

        let keep = self
            .selected_session()
            .map(|s| s.id)
            .or_else(|| self.conversation.session_id());
        self.sessions = sessions;
        self.selected = keep
            .and_then(|id| self.position_of(id))
            .or_else(|| (!self.sessions.is_empty()).then_some(0));
    }

    fn position_of(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    /// Reload the session list from the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails; the old list is kept.
    pub async fn refresh_sessions(&mut self) -> Result<(), ConversationError> {
        let sessions = self.conversation.list_sessions().await?;
        self.set_sessions(sessions);
        Ok(())
    }

    /// Open `id`, or a fresh session if it cannot be loaded.
    ///
    /// Failures land in the error line, as with [`App::new_chat`].
    pub async fn resume(&mut self, id: SessionId) {
        match self.conversation.resume(id).await {
            Ok(opened) if opened == id => {}
            Ok(_) => self.set_error("Could not load session, started a new chat"),
            Err(e) => self.set_error(format!("Failed to create session: {e}")),
        }
    }

    /// Start a new chat and highlight it.
    pub async fn new_chat(&mut self) {
        match self.conversation.start_new().await {
            Ok(id) => {
                self.chat_scroll = 0;
                self.focus = Focus::Chat;
                self.set_status("New chat");
                self.refresh_after_change().await;
                self.selected = self.position_of(id);
            }
            Err(e) => self.set_error(format!("Failed to create session: {e}")),
        }
    }

    /// Open the highlighted session.
    pub async fn open_selected(&mut self) {
        let Some(id) = self.selected_session().map(|s| s.id) else {
            return;
        };
        self.focus = Focus::Chat;
        if self.conversation.session_id() == Some(id) {
            return;
        }

        match self.conversation.switch_to(id).await {
            Ok(()) => {
                self.chat_scroll = 0;
                self.set_status(format!("Opened \"{}\"", self.conversation.title()));
            }
            Err(e) => self.set_error(format!("Failed to open session: {e}")),
        }
    }

    /// Ask for confirmation before deleting the highlighted session.
    pub fn request_delete(&mut self) {
        let Some(id) = self.selected_session().map(|s| s.id) else {
            return;
        };
        if self.conversation.session_id() == Some(id) {
            self.set_error("Cannot delete the open chat");
            return;
        }
        self.input_mode = InputMode::ConfirmingDelete;
    }

    /// Leave the confirmation dialog without deleting.
    pub fn cancel_dialog(&mut self) {
        self.input_mode = InputMode::Normal;
    }

    /// Delete the highlighted session after confirmation.
    pub async fn confirm_delete(&mut self) {
        self.input_mode = InputMode::Normal;
        let Some((id, title)) = self
            .selected_session()
            .map(|s| (s.id, s.display_title().to_string()))
        else {
            return;
        };

        match self.conversation.delete_session(id).await {
            Ok(()) => {
                self.selected = None;
                self.set_status(format!("Deleted \"{title}\""));
                self.refresh_after_change().await;
            }
            Err(e) => self.set_error(format!("Failed to delete session: {e}")),
        }
    }

    async fn refresh_after_change(&mut self) {
        if let Err(e) = self.refresh_sessions().await {
            tracing::warn!(error = %e, "Failed to refresh sessions");
            self.refresh_error = Some(format!("Refresh failed: {e}"));
        } else {
            self.refresh_error = None;
        }
    }

    // =========================================================================
    // Chat
    // =========================================================================

    /// Send the composer contents as the next turn.
    pub fn send_input(&mut self) {
        if self.is_streaming() {
            return;
        }
        let text = self.take_input();

        match self.conversation.send(&text) {
            Ok(()) => {
                self.chat_scroll = 0;
                self.set_status("Waiting for reply... (Esc to stop)");
            }
            Err(ConversationError::EmptyMessage) => {}
            Err(e) => {
                self.input = text;
                self.cursor_position = self.input.chars().count();
                self.set_error(e.to_string());
            }
        }
    }

    /// Fold a stream update into the conversation.
    pub async fn handle_update(&mut self, update: StreamUpdate) {
        let finished = match &update {
            StreamUpdate::Delta(_) => {
                self.chat_scroll = 0;
                false
            }
            StreamUpdate::Completed { .. } => {
                self.set_status("Reply complete");
                true
            }
            StreamUpdate::Failed { .. } => {
                self.status_message = None;
                true
            }
        };

        self.conversation.apply(update).await;

        // The backend titles a session after its first reply.
        if finished {
            self.refresh_after_change().await;
        }
    }

    /// Stop the reply in flight, keeping the text received so far.
    pub fn stop_generating(&mut self) {
        if self.conversation.stop_generating() {
            self.set_status("Stopped");
        }
    }

    /// Summarize the open session.
    pub async fn summarize(&mut self) {
        self.set_status("Summarizing...");
        match self.conversation.summarize().await {
            Ok(_) => {
                if let Some(notice) = self.conversation.take_notice() {
                    self.set_status(notice);
                }
                self.refresh_after_change().await;
            }
            Err(e) => self.set_error(format!("Failed to summarize: {e}")),
        }
    }

    /// Export the open session to Notion.
    pub async fn save_to_notion(&mut self) {
        self.set_status("Saving to Notion...");
        match self.conversation.save_to_notion().await {
            Ok(_) => {
                if let Some(notice) = self.conversation.take_notice() {
                    self.set_status(notice);
                }
            }
            Err(e) => self.set_error(format!("Failed to save to Notion: {e}")),
        }
    }

    /// Wait for the next stream update. Pends while idle.
    pub async fn next_update(&mut self) -> StreamUpdate {
        self.conversation.next_update().await
    }

    // =========================================================================
    // Scrolling
    // =========================================================================

    /// Scroll towards older messages.
    pub fn scroll_chat_up(&mut self, amount: usize) {
        self.chat_scroll = self.chat_scroll.saturating_add(amount);
    }

    /// Scroll towards newer messages.
    pub fn scroll_chat_down(&mut self, amount: usize) {
        self.chat_scroll = self.chat_scroll.saturating_sub(amount);
    }

    // =========================================================================
    // Composer
    // =========================================================================

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map_or(self.input.len(), |(i, _)| i)
    }

    /// Insert a character at the cursor.
    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_index();
        self.input.insert(at, c);
        self.cursor_position += 1;
    }

    /// Delete the character before the cursor.
    pub fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let at = self.byte_index();
            self.input.remove(at);
        }
    }

    /// Delete the character under the cursor.
    pub fn delete_char_forward(&mut self) {
        if self.cursor_position < self.input.chars().count() {
            let at = self.byte_index();
            self.input.remove(at);
        }
    }

    /// Delete back to the previous word boundary.
    pub fn delete_word(&mut self) {
        while self.cursor_position > 0 {
            self.delete_char();
            let before = self.input.chars().nth(self.cursor_position.wrapping_sub(1));
            if self.cursor_position == 0 || before == Some(' ') {
                break;
            }
        }
    }

    /// Move the cursor one character left.
    pub fn move_cursor_left(&mut self) {
        self.cursor_position = self.cursor_position.saturating_sub(1);
    }

    /// Move the cursor one character right.
    pub fn move_cursor_right(&mut self) {
        if self.cursor_position < self.input.chars().count() {
            self.cursor_position += 1;
        }
    }

    /// Move the cursor to the start.
    pub fn move_cursor_start(&mut self) {
        self.cursor_position = 0;
    }

    /// Move the cursor to the end.
    pub fn move_cursor_end(&mut self) {
        self.cursor_position = self.input.chars().count();
    }

    /// Clear the composer.
    pub fn clear_input(&mut self) {
        self.input.clear();
        self.cursor_position = 0;
    }

    /// Take the composer contents, leaving it empty.
    pub fn take_input(&mut self) -> String {
        self.cursor_position = 0;
        std::mem::take(&mut self.input)
    }
}
