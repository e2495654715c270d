//! Recurring events for calendars kept as Markdown notes.
//!
//! This crate provides:
//! - `recurrence`: occurrence date arithmetic for the supported repeat rules
//! - `feed`: a debounced change feed over a notes directory
//! - `manager`: the recurring event manager that materializes instance notes
//!   and projects virtual occurrences
//! - `registry`: shared, reference-counted engines per notes root

pub mod config;
pub mod constants;
pub mod debounce;
pub mod error;
pub mod feed;
pub mod lock;
pub mod manager;
pub mod note;
pub mod notifier;
pub mod recurrence;
pub mod registry;
pub mod store;

pub use config::{NotecalConfig, PropertyNames};
pub use error::{CalError, CalResult};
pub use feed::{ChangeEvent, ChangeFeed, ChangeStream};
pub use manager::{MaterializedInstance, RecurringEventManager, VirtualInstance};
pub use recurrence::{RecurrenceDefinition, RecurrenceType};
pub use registry::{CalendarEngine, EngineHandle, EngineRegistry};
pub use store::{FsNoteStore, NoteStore};
