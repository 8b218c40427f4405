//! Shared store session lifecycle.
//!
//! One native client serves every stream of the process. `StoreSession` holds
//! it explicitly instead of through a global: the client is started on first
//! use, handed out as a shared `Arc`, and torn down once by `shutdown`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

use crate::error::StoreError;
use crate::traits::{StoreClient, StoreConnector};

/// Settings used to start the native client.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    /// Volume to mount.
    pub volume_name: String,
    /// Comma-separated master addresses.
    pub master_addr: String,
    /// Access key for the volume.
    pub access_key: String,
    /// Secret key for the volume.
    pub secret_key: String,
    /// Directory for native client logs.
    pub log_dir: Option<String>,
    /// Native client log level.
    pub log_level: Option<String>,
}

impl StoreSettings {
    /// Create settings with the required keys.
    ///
    /// # Arguments
    /// * `volume_name` - Volume to mount
    /// * `master_addr` - Master address list
    /// * `access_key` - Access key
    /// * `secret_key` - Secret key
    pub fn new(
        volume_name: impl Into<String>,
        master_addr: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            volume_name: volume_name.into(),
            master_addr: master_addr.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            log_dir: None,
            log_level: None,
        }
    }

    /// Set the native log directory.
    pub fn with_log_dir(mut self, log_dir: impl Into<String>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    /// Set the native log level.
    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = Some(log_level.into());
        self
    }

    /// Check that every required key is present.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidConfig` naming the first missing key.
    pub fn validate(&self) -> Result<(), StoreError> {
        let required: [(&str, &str); 4] = [
            (self.volume_name.as_str(), "volume name is required"),
            (self.master_addr.as_str(), "master address is required"),
            (self.access_key.as_str(), "access key is required"),
            (self.secret_key.as_str(), "secret key is required"),
        ];
        for (value, message) in required {
            if value.trim().is_empty() {
                return Err(StoreError::InvalidConfig {
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("volume_name", &self.volume_name)
            .field("master_addr", &self.master_addr)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("log_dir", &self.log_dir)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Lifecycle of the shared client.
enum SessionState {
    /// Not started yet.
    Idle,
    /// Started and shared.
    Connected(Arc<dyn StoreClient>),
    /// Torn down; terminal.
    Closed,
}

/// Explicitly owned, lazily started store client.
pub struct StoreSession {
    settings: StoreSettings,
    connector: Box<dyn StoreConnector>,
    state: Mutex<SessionState>,
}

impl StoreSession {
    /// Create a session. The client is not started until first use.
    ///
    /// # Arguments
    /// * `settings` - Client settings, validated here
    /// * `connector` - Factory that starts the native client
    ///
    /// # Errors
    /// Returns `StoreError::InvalidConfig` if a required setting is missing.
    pub fn new(
        settings: StoreSettings,
        connector: impl StoreConnector + 'static,
    ) -> Result<Self, StoreError> {
        settings.validate()?;
        Ok(Self {
            settings,
            connector: Box::new(connector),
            state: Mutex::new(SessionState::Idle),
        })
    }

    /// Create a session around a client that is already running.
    ///
    /// # Arguments
    /// * `settings` - Settings the client was started with
    /// * `client` - The running client
    pub fn with_client(settings: StoreSettings, client: Arc<dyn StoreClient>) -> Self {
        let shared: Arc<dyn StoreClient> = client.clone();
        Self {
            settings,
            connector: Box::new(
                move |_: &StoreSettings| -> Result<Arc<dyn StoreClient>, StoreError> {
                    Ok(shared.clone())
                },
            ),
            state: Mutex::new(SessionState::Connected(client)),
        }
    }

    /// Settings this session was created with.
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Get the shared client, starting it on first call.
    ///
    /// # Errors
    /// Returns `StoreError::SessionClosed` after `shutdown`, or the
    /// connector's error if the client fails to start. A failed start leaves
    /// the session idle so a later call may try again.
    pub fn client(&self) -> Result<Arc<dyn StoreClient>, StoreError> {
        let mut state: MutexGuard<'_, SessionState> = self.lock_state();
        match &*state {
            SessionState::Connected(client) => Ok(client.clone()),
            SessionState::Closed => Err(StoreError::SessionClosed),
            SessionState::Idle => {
                log::info!("Starting CubeFS client for volume {}", self.settings.volume_name);
                let client: Arc<dyn StoreClient> = self.connector.connect(&self.settings)?;
                *state = SessionState::Connected(client.clone());
                Ok(client)
            }
        }
    }

    /// Whether the client has been started and not yet torn down.
    pub fn is_connected(&self) -> bool {
        matches!(&*self.lock_state(), SessionState::Connected(_))
    }

    /// Tear down the client. Later calls are no-ops.
    pub fn shutdown(&self) {
        let previous: SessionState =
            std::mem::replace(&mut *self.lock_state(), SessionState::Closed);
        if let SessionState::Connected(client) = previous {
            log::info!("Closing CubeFS client for volume {}", self.settings.volume_name);
            client.shutdown();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSession")
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .finish()
    }
}
