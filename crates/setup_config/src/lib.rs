use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the optional settings file, looked up in the working directory.
pub const SETTINGS_FILE: &str = "jumpstarter-setup.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tool settings. Every field has a default matching the stock demo setup,
/// so a missing settings file is equivalent to an empty one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub exporter: ExporterSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub drivers: DriverSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

/// Where the controller runs and how to recognize it in pod listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Substring that identifies the controller pod in `kubectl get pods` output.
    #[serde(default = "default_controller_marker")]
    pub controller_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_true")]
    pub insecure_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterSettings {
    #[serde(default = "default_exporter_name")]
    pub name: String,
    #[serde(default = "default_labels")]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Passes `--unsafe` to client creation (demo setups only).
    #[serde(default = "default_true")]
    pub allow_unsafe: bool,
    #[serde(default = "default_true")]
    pub save: bool,
}

/// Fully-qualified driver class identifiers injected into the exporter
/// config. Opaque to this tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default = "default_storage_driver")]
    pub storage: String,
    #[serde(default = "default_power_driver")]
    pub power: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathSettings {
    /// Candidate directories searched for `<exporter>.yaml`, in order.
    /// Empty means the built-in user/system locations.
    #[serde(default)]
    pub exporter_config_dirs: Vec<PathBuf>,
}

fn default_namespace() -> String {
    "jumpstarter-lab".to_string()
}

fn default_controller_marker() -> String {
    "jumpstarter-controller".to_string()
}

fn default_endpoint() -> String {
    "localhost:8082".to_string()
}

fn default_exporter_name() -> String {
    "example-distributed".to_string()
}

fn default_client_name() -> String {
    "hello".to_string()
}

fn default_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("example.com/board".to_string(), "foo".to_string()),
        ("environment".to_string(), "development".to_string()),
    ])
}

fn default_storage_driver() -> String {
    "jumpstarter_driver_opendal.driver.MockStorageMux".to_string()
}

fn default_power_driver() -> String {
    "jumpstarter_driver_power.driver.MockPower".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            controller_marker: default_controller_marker(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            insecure_tls: true,
        }
    }
}

impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            name: default_exporter_name(),
            labels: default_labels(),
            save: true,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            allow_unsafe: true,
            save: true,
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            storage: default_storage_driver(),
            power: default_power_driver(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Loads `jumpstarter-setup.toml` from `dir`, falling back to defaults
    /// when the file does not exist.
    pub fn load_from_dir(dir: &Path) -> Result<Self, SettingsError> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }
}
