//! Session credential cache
//!
//! Holds the administrator password needed for calls that edit protected OS
//! state. Lives for the process lifetime only and is never serialized.

use super::error::{CoordinatorError, CoordinatorResult};
use crate::gateway::GatewayResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use tracing::{debug, warn};

/// How a call uses the session credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Ask the user up front when nothing is cached
    Required,
    /// Send the cached credential if there is one; ask only after the
    /// backend rejects the call for lack of it
    Opportunistic,
}

/// Out-of-band way to obtain the credential from the user
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// `None` means the user cancelled
    async fn prompt(&self, reason: &str) -> Option<SecretString>;
}

/// Terminal password prompt
pub struct TerminalPrompt;

#[async_trait]
impl CredentialPrompt for TerminalPrompt {
    async fn prompt(&self, reason: &str) -> Option<SecretString> {
        let prompt = format!("Administrator password ({})", reason);
        let result = tokio::task::spawn_blocking(move || {
            dialoguer::Password::new()
                .with_prompt(prompt)
                .allow_empty_password(false)
                .interact()
        })
        .await;

        match result {
            Ok(Ok(password)) => Some(SecretString::from(password)),
            Ok(Err(e)) => {
                warn!("Password prompt failed: {}", e);
                None
            }
            Err(e) => {
                warn!("Password prompt task failed: {}", e);
                None
            }
        }
    }
}

/// Single shared slot for the session credential (last write wins)
#[derive(Default)]
pub struct CredentialCache {
    slot: RwLock<Option<SecretString>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<SecretString> {
        self.slot
            .read()
            .as_ref()
            .map(|secret| SecretString::from(secret.expose_secret().to_owned()))
    }

    pub fn set(&self, credential: SecretString) {
        *self.slot.write() = Some(credential);
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    pub fn is_cached(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Run a privileged call under the credential policy.
    ///
    /// A successful call caches the credential it used. An authentication
    /// failure clears the cache, prompts once more and retries once; a
    /// second authentication failure is final.
    pub async fn run<T, F, Fut>(
        &self,
        privilege: Privilege,
        prompt: &dyn CredentialPrompt,
        reason: &str,
        mut op: F,
    ) -> CoordinatorResult<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut credential = self.get();
        if credential.is_none() && privilege == Privilege::Required {
            debug!("No cached credential, prompting ({})", reason);
            credential = Some(
                prompt
                    .prompt(reason)
                    .await
                    .ok_or(CoordinatorError::CredentialCancelled)?,
            );
        }

        let first = op(credential.as_ref().map(|c| c.expose_secret().to_owned())).await;
        match first {
            Ok(value) => {
                if let Some(credential) = credential {
                    self.set(credential);
                }
                Ok(value)
            }
            Err(err) if err.is_auth_failure() => {
                warn!("Authentication failed ({}), asking for the password again", reason);
                self.clear();

                let fresh = prompt
                    .prompt(reason)
                    .await
                    .ok_or(CoordinatorError::CredentialCancelled)?;

                match op(Some(fresh.expose_secret().to_owned())).await {
                    Ok(value) => {
                        self.set(fresh);
                        Ok(value)
                    }
                    Err(err) => {
                        if err.is_auth_failure() {
                            self.clear();
                        }
                        Err(err.into())
                    }
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
