//! Domain types and models

pub mod credentials;
pub mod event;
pub mod integration;
pub mod provider;
pub mod sync;

pub use credentials::Credentials;
pub use event::{
    Attendee, AttendeeStatus, CalendarEvent, CalendarMetadata, EventStatus, EventSyncStatus,
    EventTime, EventVisibility, ExternalEvent, NewEventData,
};
pub use integration::{CalendarIntegration, EncryptedSecret, IntegrationSummary, TokenUpdate};
pub use provider::CalendarProvider;
pub use sync::{
    SyncCounts, SyncDirection, SyncErrorRecord, SyncLog, SyncLogStatus, SyncOptions, SyncResult,
    SyncRunState, SyncType, SyncWindow,
};
