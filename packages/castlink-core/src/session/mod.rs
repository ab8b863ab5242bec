//! Session management: one logical connection to one receiver at a time.
//!
//! - [`machine`] owns the state machine and serializes every transition
//! - [`channel`] carries text messages for the session's namespaces
//! - [`supervisor`] recovers from transient connection loss
//! - [`status`] exposes the last-known status without blocking
//! - [`driver`] is the seam to whatever actually talks to receivers

pub(crate) mod channel;
pub mod driver;
pub mod listener;
pub(crate) mod machine;
pub mod status;
pub(crate) mod supervisor;
pub mod types;

pub use driver::{DriverError, DriverResult, LinkEvent, ReceiverDriver, ReceiverLink};
pub use listener::{ConnectionListener, MessageListener};
pub use status::StatusCache;
pub use types::{
    ApplicationContext, ApplicationMetadata, ApplicationProvenance, ApplicationSession,
    ConnectionState, SenderApplicationInfo, SessionStatus,
};
