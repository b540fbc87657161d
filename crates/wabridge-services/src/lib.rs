//! wabridge-services — session lifecycle: auth-state storage, the session
//! registry, per-session tasks, QR rendering and update fan-out.

mod actor;
pub mod auth_state;
pub mod bridge;
pub mod broadcast;
pub mod context;
pub mod guard;
pub mod manager;
pub mod meta_store;
pub mod qr;
pub mod registry;
pub mod session;
pub mod socket;

pub use auth_state::AuthStateStore;
pub use bridge::BridgeConnector;
pub use broadcast::{BroadcastHub, SessionUpdate};
pub use context::SessionSettings;
pub use manager::SessionManager;
pub use meta_store::{SessionMetaStore, SessionRecord};
pub use qr::QrPayload;
pub use registry::SessionRegistry;
pub use session::{SessionHandle, SessionState};
pub use socket::{Connection, Connector, SocketError, WaSocket};
