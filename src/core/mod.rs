//! Core module - State, settings, configuration, events, and credentials

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod history;
pub mod settings;
pub mod state;
