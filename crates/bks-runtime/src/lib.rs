//! bks-runtime
//!
//! Background work around the store and the remote gateway:
//! - [`Reconciler`]: pull remote clients and appointments into the store.
//! - [`PushWorker`]: mirror locally created records out through the push outbox.
//! - [`reminders`]: log upcoming appointments.
//!
//! Nothing here runs inside a request. The daemon and the CLI own scheduling.

pub mod push;
pub mod reconciler;
pub mod reminders;

pub use push::{spawn_push_worker, DrainReport, PushHandle, PushWorker};
pub use reconciler::Reconciler;
pub use reminders::{send_reminders, ReminderWindow};
