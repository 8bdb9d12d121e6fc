//! Configuration management for PC Volume MQTT
//!
//! Handles loading and saving `config.json`, the first-run seed file, and
//! the interactive gate that fills in missing connection details before any
//! network activity.

pub mod prompt;
pub mod protect;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::bridge::TopicBinding;
use crate::mqtt::SessionSettings;
use crate::paths::AppPaths;

pub use prompt::{Prompter, TerminalPrompter};

/// Configuration validation failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("MQTT host cannot be empty")]
    EmptyHost,

    #[error("machine name cannot be empty")]
    EmptyMachineName,

    #[error("MQTT port must be between 1 and 65535")]
    InvalidPort,

    #[error("password protection failed: {0}")]
    Protection(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub machine_name: String,
    /// Adds a device segment to every topic (multi-device setups)
    ///
    /// Only a topic namespace: the bound endpoint is always the current
    /// default render device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub tray: TrayConfig,
}

/// Broker connection configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    /// Plaintext, in memory only. Read from seed or legacy files, never written.
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// System tray configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            protected_password: None,
            client_id: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load configuration from file, revealing the protected password
    ///
    /// A plaintext `password` found in the file is kept and takes precedence;
    /// [`AppConfig::needs_migration`] reports it so the caller can re-save.
    /// A protected password that cannot be opened is left out with a warning
    /// and reported by [`AppConfig::needs_credentials`].
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?;

        if config.mqtt.password.is_empty() {
            if let Some(stored) = &config.mqtt.protected_password {
                match protect::unprotect(stored) {
                    Ok(password) => config.mqtt.password = password,
                    Err(e) => warn!(
                        "⚠️ Stored MQTT password in {} is unreadable ({}), credentials will be asked again",
                        path.display(),
                        e
                    ),
                }
            }
        }

        Ok(config)
    }

    /// Save configuration, sealing the password
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut on_disk = self.clone();
        on_disk.mqtt.protected_password = if self.mqtt.password.is_empty() {
            None
        } else {
            Some(protect::protect(&self.mqtt.password)?)
        };

        let json = serde_json::to_string_pretty(&on_disk)
            .context("Failed to serialize config to JSON")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Whether a plaintext password is present without a protected copy
    pub fn needs_migration(&self) -> bool {
        !self.mqtt.password.is_empty() && self.mqtt.protected_password.is_none()
    }

    /// Whether a protected password is stored but could not be revealed
    pub fn needs_credentials(&self) -> bool {
        self.mqtt.password.is_empty() && self.mqtt.protected_password.is_some()
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.machine_name.trim().is_empty() {
            return Err(ConfigError::EmptyMachineName);
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }

    /// Topic layout for this machine (and device, when configured)
    pub fn topics(&self) -> TopicBinding {
        TopicBinding::new(&self.machine_name, self.device_name.as_deref())
    }

    /// Broker session parameters
    pub fn session_settings(&self) -> SessionSettings {
        let client_id = self
            .mqtt
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.topics().client_id());

        SessionSettings {
            host: self.mqtt.host.trim().to_string(),
            port: self.mqtt.port,
            username: Some(self.mqtt.username.clone()).filter(|u| !u.is_empty()),
            password: Some(self.mqtt.password.clone()).filter(|p| !p.is_empty()),
            client_id,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
        }
    }

    /// Ask for the connection details
    ///
    /// Blank answers keep the current value; an unparseable port keeps the
    /// current port.
    pub fn prompt_connection(&mut self, prompter: &mut dyn Prompter) -> Result<()> {
        let host = prompter.ask(&format!("Enter MQTT host (default {}): ", default_host()))?;
        self.mqtt.host = match host.trim() {
            "" if self.mqtt.host.trim().is_empty() => default_host(),
            "" => self.mqtt.host.clone(),
            host => host.to_string(),
        };

        let port = prompter.ask(&format!("Enter MQTT port (default {}): ", self.mqtt.port))?;
        match port.trim().parse::<u16>() {
            Ok(port) if port != 0 => self.mqtt.port = port,
            _ if port.trim().is_empty() => {}
            _ => warn!("Invalid port '{}', keeping {}", port.trim(), self.mqtt.port),
        }

        self.prompt_credentials(prompter)
    }

    /// Ask for the broker username and password
    pub fn prompt_credentials(&mut self, prompter: &mut dyn Prompter) -> Result<()> {
        self.mqtt.username = prompter.ask("Enter MQTT username: ")?.trim().to_string();
        self.mqtt.password = prompter.ask_secret("Enter MQTT password: ")?;
        Ok(())
    }

    /// Ask for the machine name, falling back to the host name
    pub fn prompt_machine_name(&mut self, prompter: &mut dyn Prompter) -> Result<()> {
        let name = prompter.ask("Enter machine name: ")?;
        self.machine_name = match name.trim() {
            "" => fallback_machine_name(),
            name => name.to_string(),
        };
        Ok(())
    }
}

/// Load the configuration, running the first-run gate when needed
///
/// Order of sources: existing config, then the seed file, then defaults.
/// Missing fields are prompted; the result is saved before returning and a
/// consumed seed file is removed.
pub async fn load_or_init(paths: &AppPaths, prompter: &mut dyn Prompter) -> Result<AppConfig> {
    let mut seeded = false;
    let (mut config, fresh) = if paths.config.exists() {
        (AppConfig::load(&paths.config).await?, false)
    } else if paths.seed.exists() {
        info!("Seeding configuration from {}", paths.seed.display());
        seeded = true;
        (AppConfig::load(&paths.seed).await?, false)
    } else {
        info!("No configuration found at {}", paths.config.display());
        (AppConfig::default(), true)
    };

    let mut dirty = seeded || config.needs_migration();

    if config.mqtt.port == 0 {
        warn!("⚠️ MQTT port 0 is invalid, using {}", default_port());
        config.mqtt.port = default_port();
        dirty = true;
    }

    if fresh || config.mqtt.host.trim().is_empty() {
        config.prompt_connection(prompter)?;
        dirty = true;
    } else if config.needs_credentials() {
        config.prompt_credentials(prompter)?;
        dirty = true;
    }
    if config.machine_name.trim().is_empty() {
        config.prompt_machine_name(prompter)?;
        dirty = true;
    }

    config.validate()?;

    if dirty {
        config.save(&paths.config).await?;
        info!("Config saved to {}", paths.config.display());
    }

    if seeded {
        match fs::remove_file(&paths.seed).await {
            Ok(()) => debug!("Removed consumed seed file {}", paths.seed.display()),
            Err(e) => warn!("Could not remove seed file {}: {}", paths.seed.display(), e),
        }
    }

    Ok(config)
}

fn fallback_machine_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "pc".to_string())
}

// Default value functions
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 1883 }
fn default_keep_alive() -> u64 { 30 }
fn default_true() -> bool { true }
