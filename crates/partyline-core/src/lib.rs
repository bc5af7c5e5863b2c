//! Scoring ledger and channel session model for a group-chat bot.
//!
//! Transport and storage live elsewhere: callers hand in an
//! [`InboundMessage`](partyline_types::events::InboundMessage) plus a
//! [`Store`] and get back an ordered list of deliveries.

pub mod directory;
pub mod error;
pub mod format;
pub mod ledger;
pub mod mention;
pub mod reconcile;
pub mod session;
pub mod store;

pub use directory::{Channel, DebugOption, KickOutcome, Member, SnoozeStatus, normalize_identity};
pub use error::CoreError;
pub use ledger::Ledger;
pub use mention::{Mention, MentionParser};
pub use reconcile::{EditCommand, Reconciliation, Reconciler};
pub use session::Session;
pub use store::{MemoryStore, Store, WriteKind};
