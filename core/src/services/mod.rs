//! Services module
//!
//! Business logic services that coordinate between the repository, the
//! platform capabilities and remote sync.

pub mod auth;
pub mod backup;
pub mod drive;
pub mod journal;
pub mod scheduler;

pub use auth::{AuthStatus, BrokerState, GoogleUser, SessionState, TokenBroker};
pub use backup::{BackupDocument, BackupService, BackupStats};
pub use drive::DriveSync;
pub use journal::{can_modify_entry, can_modify_entry_at, JournalService};
pub use scheduler::AutoBackupScheduler;
