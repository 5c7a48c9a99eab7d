//! Core business logic module

pub mod command;
pub mod connection;
pub mod control;
pub mod device_state;
pub mod dispatch;
pub mod error;
pub mod provisioning;
pub mod registry;
pub mod state_machine;
pub mod status_feed;
pub mod types;
