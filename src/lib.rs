//! Library crate for cdn-scan-client exposing reusable modules.
pub mod aggregate;
pub mod channel;
pub mod controller;
pub mod ports;
pub mod ranges;
pub mod session;
pub mod settings;
pub mod types;
