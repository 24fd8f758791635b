//! Sandlink library - sync session lifecycle and coordination for remote
//! compute sandboxes
//!
//! Multiple short-lived `sandlink` invocations share one long-lived tunnel
//! and sync session per resource, coordinated entirely through an on-disk
//! registry and process signals. No daemon.

pub mod cli;
pub mod config;
pub mod ignore;
pub mod lifecycle;
pub mod port;
pub mod process;
pub mod proxy;
pub mod readiness;
pub mod registry;
pub mod resource;
pub mod sandbox;
pub mod sync;
pub mod terminal;
pub mod wait;
