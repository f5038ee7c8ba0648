use crate::error::TransportError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    port = 7071
//
//   env var:         AGENTC_SERVER__PORT=7071   (double underscore = nesting)
//
//   (single underscore stays within field names: AGENTC_RECONNECT__MAX_ATTEMPTS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub agent: AgentFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

/// Where the agent service lives (under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    /// Origin the client is "served from"; only its scheme and host are used.
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            port: default_port(),
            path: default_path(),
        }
    }
}

/// Agent selection (under `[agent]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentFileConfig {
    /// Agent id stamped on outbound frames until the user switches.
    #[serde(default = "default_agent")]
    pub default: String,
    /// Known agents, id → display label.
    #[serde(default = "default_agents")]
    pub agents: BTreeMap<String, String>,
}

impl Default for AgentFileConfig {
    fn default() -> Self {
        Self {
            default: default_agent(),
            agents: default_agents(),
        }
    }
}

/// Reconnect tunables (under `[reconnect]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// 0 = retry forever.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: 0,
        }
    }
}

fn default_origin() -> String {
    "http://localhost".to_string()
}
fn default_port() -> u16 {
    7070
}
fn default_path() -> String {
    "/ws".to_string()
}
fn default_agent() -> String {
    "solution-finder".to_string()
}
fn default_agents() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("basic-chat".to_string(), "Basic Chat".to_string()),
        ("solution-finder".to_string(), "Solution Finder".to_string()),
        ("terminal-agent".to_string(), "Tool Agent".to_string()),
    ])
}
fn default_true() -> bool {
    true
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_secs() -> u64 {
    60
}

/// Build a figment that layers: defaults → config.toml → AGENTC_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `AGENTC_SERVER__PORT=7071`  →  `server.port = 7071`
///   `AGENTC_AGENT__DEFAULT=basic-chat`  →  `agent.default = "basic-chat"`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("AGENTC_").split("__"))
}

impl ServerFileConfig {
    pub fn endpoint(&self) -> Result<String, TransportError> {
        derive_endpoint(&self.origin, self.port, &self.path)
    }
}

/// WebSocket endpoint for the agent service: same host as `origin`, the
/// service port, `wss` when the origin is secure.
///
/// `https://app.example.com:3000` with port 7070 and path `/ws` gives
/// `wss://app.example.com:7070/ws`.
pub fn derive_endpoint(origin: &str, port: u16, path: &str) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidOrigin {
        origin: origin.to_string(),
        reason,
    };

    let with_scheme = if origin.contains("://") {
        origin.to_string()
    } else {
        format!("http://{origin}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    };
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("no host".to_string()))?;
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Ok(format!("{scheme}://{host}:{port}{path}"))
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ConsoleConfig {
    pub data_dir: PathBuf,
}

impl ConsoleConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".agentc"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn load(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_toml_path()))
    }
}
