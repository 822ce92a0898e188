//! Background-tab notification.
//!
//! When a message arrives while the chat is not in the foreground, the
//! window title is swapped for an alert. Regaining focus restores it.

use std::sync::{Mutex, PoisonError};

use opinion_shared::constants::{APP_NAME, NEW_MESSAGE_TITLE};
use opinion_shared::Message;

/// Hook invoked by the adapter for every appended message.
pub trait Notifier: Send + Sync {
    fn message_arrived(&self, message: &Message);
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn message_arrived(&self, _message: &Message) {}
}

#[derive(Debug)]
struct TitleState {
    title: String,
    foreground: bool,
}

/// Window-title indicator shared by every chat view of one window.
#[derive(Debug)]
pub struct TitleNotifier {
    idle_title: String,
    alert_title: String,
    state: Mutex<TitleState>,
}

impl TitleNotifier {
    pub fn new() -> Self {
        Self::with_titles(APP_NAME, NEW_MESSAGE_TITLE)
    }

    pub fn with_titles(idle_title: impl Into<String>, alert_title: impl Into<String>) -> Self {
        let idle_title = idle_title.into();
        Self {
            state: Mutex::new(TitleState {
                title: idle_title.clone(),
                foreground: true,
            }),
            idle_title,
            alert_title: alert_title.into(),
        }
    }

    /// The page was hidden (`false`) or shown (`true`) without a focus event.
    pub fn set_foreground(&self, foreground: bool) {
        self.lock().foreground = foreground;
    }

    /// Focus handler: restore the idle title.
    pub fn focus(&self) {
        let mut state = self.lock();
        state.foreground = true;
        state.title.clone_from(&self.idle_title);
    }

    pub fn title(&self) -> String {
        self.lock().title.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TitleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TitleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for TitleNotifier {
    fn message_arrived(&self, _message: &Message) {
        let mut state = self.lock();
        if !state.foreground {
            state.title.clone_from(&self.alert_title);
        }
    }
}
