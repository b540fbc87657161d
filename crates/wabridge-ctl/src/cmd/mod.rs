//! CLI command modules.

pub mod http;
pub mod qr;
pub mod sessions;
