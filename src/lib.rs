//! EnvSwitch
//!
//! Switches named bundles of local development services on and off.
//!
//! # Features
//! - Environments group language runtimes, web servers, databases, DNS,
//!   a hosts-file manager, a local TLS authority and custom services
//! - Optional mutual exclusion between active environments
//! - Last-used environments remembered and resumed on the next start
//! - Session-only administrator password cache for privileged calls
//! - Runtime status polling for the focused environment's services
//!
//! All OS-level work is delegated to a privileged backend reached through
//! [`gateway::Gateway`].

pub mod coordinator;
pub mod core;
pub mod gateway;

pub use crate::coordinator::{ActivationCoordinator, BatchReport};
pub use crate::core::config::Config;
pub use crate::core::error::{CoordinatorError, CoordinatorResult};
pub use crate::core::events::{AppEvent, EventSender};
pub use crate::core::settings::{PersistedSettings, SettingsHandle};
pub use crate::core::state::StateStore;
pub use crate::gateway::{DaemonGateway, Gateway, GatewayError, GatewayTransport};
