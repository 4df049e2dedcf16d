//! # Vindkanal Configuration
//!
//! Layered configuration for the link emulator: defaults, then
//! `vindkanal.yaml`, then `VINDKANAL_*` environment variables. Impairment
//! parameters themselves are not configured here; they are set through the
//! management plane, and `startup_script` replays a management command
//! file at link-open.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;

pub use error::ConfigError;

/// Top-level settings of one emulator process.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VindkanalConfig {
    /// Link-wide toggles fixed at open time.
    #[validate(nested)]
    pub link: LinkSettings,

    /// UDP endpoints the emulator sits between.
    #[validate(nested)]
    pub endpoints: EndpointSettings,

    /// Management and bootstrap plumbing.
    #[validate(nested)]
    pub control: ControlSettings,
}

impl Default for VindkanalConfig {
    fn default() -> Self {
        Self {
            link: LinkSettings::default(),
            endpoints: EndpointSettings::default(),
            control: ControlSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LinkSettings {
    /// FIFO scheduling discipline (no reordering under randomized delay).
    pub fifo: bool,
    /// Deterministic RNG seed; omit for entropy.
    pub seed: Option<u64>,
    /// Condition-transition timer period in milliseconds.
    #[validate(range(min = 1))]
    pub transition_period_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            fifo: true,
            seed: None,
            transition_period_ms: 100,
        }
    }
}

/// The two UDP cables the emulated wire sits between.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EndpointSettings {
    /// Left-side cable; frames arriving here travel left-to-right.
    #[validate(nested)]
    pub left: UdpEndpoint,
    /// Right-side cable; frames arriving here travel right-to-left.
    #[validate(nested)]
    pub right: UdpEndpoint,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            left: UdpEndpoint {
                bind: "127.0.0.1:7770".into(),
                peer: "127.0.0.1:7780".into(),
            },
            right: UdpEndpoint {
                bind: "127.0.0.1:7771".into(),
                peer: "127.0.0.1:7781".into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UdpEndpoint {
    /// Local UDP bind address.
    pub bind: String,
    /// Remote address frames for this side are sent to.
    pub peer: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ControlSettings {
    /// Unix socket path of the management console; disabled when absent.
    pub mgmt_socket: Option<PathBuf>,
    /// Management command script replayed at link-open.
    pub startup_script: Option<PathBuf>,
    /// PID file written at startup.
    pub pid_file: Option<PathBuf>,
}

impl VindkanalConfig {
    /// Load from defaults, `vindkanal.yaml` if present, and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(VindkanalConfig::default()));
        if Path::new("vindkanal.yaml").exists() {
            figment = figment.merge(Yaml::file("vindkanal.yaml"));
        }

        figment
            .merge(Env::prefixed("VINDKANAL_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Load from an explicit path; the file must exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        Figment::from(Serialized::defaults(VindkanalConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("VINDKANAL_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
