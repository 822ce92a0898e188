use opinion_shared::Message;

use crate::state::AdapterState;

/// Notifications pushed from an adapter to its UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Connection lifecycle moved; `Connecting` after `Active` means
    /// the adapter is reconnecting.
    StateChanged(AdapterState),
    /// The local list was replaced by a `chat-history` replay.
    HistoryReplaced(Vec<Message>),
    /// A message was appended to the local list.
    MessageReceived(Message),
}
