//! Core infrastructure shared by every quillcast crate.
//!
//! Provides:
//! - [`Clock`] and the calendar helpers that map engine time into a
//!   tenant's IANA zone ([`clock`], [`calendar`])
//! - the engine-wide event listener registry ([`events`])
//! - the opaque identifier and credential newtypes ([`ids`])
//! - configuration errors shared across crates ([`error`])

pub mod calendar;
pub mod clock;
pub mod error;
pub mod events;
pub mod ids;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::ConfigError;
pub use events::{EngineEvent, EventListener, EventListeners, FnListener};
pub use ids::{Credentials, PostId, TenantId};
