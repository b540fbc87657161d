//! wabridge-core — shared types, sidecar wire format, configuration and errors.
//! All other wabridge crates depend on this one.

pub mod config;
pub mod error;
pub mod event;
pub mod owner;
pub mod status;
pub mod wire;

pub use error::{SessionError, SessionFailure};
pub use event::{AuthState, CloseClass, ConnectionUpdate, CredsUpdate, DisconnectReason, SocketEvent};
pub use owner::{OwnerError, OwnerKey, OwnerType};
pub use status::ConnectionStatus;
