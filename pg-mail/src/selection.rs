//! Telling deliberate selections apart from navigation side effects.
//!
//! Some hosts display a message as soon as a folder is opened or a window gains focus. A
//! message that is displayed that way was not opened on purpose, and should not pop up an
//! authorization session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::consts::SELECTION_GRACE_MS;
use crate::error::{Error, Precondition};
use crate::unseal::MessageId;

#[derive(Debug, Default)]
struct Events {
    navigated: Option<u64>,
    selected: Option<u64>,
    messages: Vec<MessageId>,
}

/// Tracks folder changes, window focus and message selection, with millisecond timestamps.
#[derive(Debug, Clone)]
pub struct SelectionTracker {
    grace: u64,
    events: Arc<Mutex<Events>>,
}

impl Default for SelectionTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(SELECTION_GRACE_MS))
    }
}

impl SelectionTracker {
    /// A selection must happen at least `grace` after the last navigation event.
    pub fn new(grace: Duration) -> Self {
        SelectionTracker {
            grace: grace.as_millis() as u64,
            events: Arc::default(),
        }
    }

    fn events(&self) -> std::sync::MutexGuard<'_, Events> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn navigated(&self, at: u64) {
        let mut events = self.events();
        events.navigated = Some(events.navigated.map_or(at, |n| n.max(at)));
    }

    /// A different folder is displayed.
    pub fn folder_changed(&self, at: u64) {
        self.navigated(at);
    }

    /// A window gained focus.
    pub fn window_focused(&self, at: u64) {
        self.navigated(at);
    }

    /// The selection changed to `messages`.
    pub fn messages_selected(&self, messages: &[MessageId], at: u64) {
        let mut events = self.events();
        events.selected = Some(at);
        events.messages = messages.to_vec();
    }

    /// Whether `message` is the only selected message, and was selected deliberately.
    pub fn check(&self, message: MessageId) -> Result<(), Error> {
        let events = self.events();

        match events.messages[..] {
            [selected] if selected == message => {}
            [_] => return Err(Precondition::NotDeliberate.into()),
            _ => return Err(Precondition::AmbiguousSelection.into()),
        }

        match (events.selected, events.navigated) {
            (None, _) => Err(Precondition::NotDeliberate.into()),
            (Some(selected), Some(navigated)) if selected < navigated + self.grace => {
                Err(Precondition::NotDeliberate.into())
            }
            _ => Ok(()),
        }
    }
}
