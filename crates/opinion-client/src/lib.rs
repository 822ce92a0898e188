//! Client side of the Second Opinion chat relay.
//!
//! [`ChatAdapter`] binds one conversation view to one room on the relay.
//! UI code reads [`ChatAdapter::messages`] (or listens to [`AdapterEvent`]s)
//! and calls [`ChatAdapter::send`]; background-tab alerts go through a
//! [`Notifier`].

pub mod adapter;
pub mod error;
pub mod events;
pub mod notifier;
pub mod state;

pub use adapter::ChatAdapter;
pub use error::AdapterError;
pub use events::AdapterEvent;
pub use notifier::{NoopNotifier, Notifier, TitleNotifier};
pub use state::{AdapterConfig, AdapterState};
