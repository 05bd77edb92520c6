use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Config document at {0} is not a mapping")]
    NotAMapping(PathBuf),
}

/// Driver class identifiers to inject into an exporter config.
#[derive(Debug, Clone)]
pub struct DriverTypes {
    pub storage: String,
    pub power: String,
}

/// What the patch changed.
#[derive(Debug, Clone, Default)]
pub struct PatchReport {
    /// Driver slots whose pre-existing entry was overwritten with a
    /// different value.
    pub replaced: Vec<String>,
}

/// Result of patching a config file on disk.
#[derive(Debug)]
pub struct AppliedPatch {
    pub report: PatchReport,
    /// File contents after the patch, re-read from disk.
    pub contents: String,
}

/// Returns the mapping stored under `key`, inserting an empty one if the key
/// is missing. A non-mapping value at `key` is replaced by an empty mapping.
pub fn get_or_create_mapping<'a>(root: &'a mut Mapping, key: &str) -> &'a mut Mapping {
    let entry = root
        .entry(Value::String(key.to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !entry.is_mapping() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry.as_mapping_mut().unwrap()
}

/// Sets `export.<slot> = { type: <driver_type> }`, overwriting any prior
/// value. Returns true if a different entry existed before.
fn set_driver_entry(export: &mut Mapping, slot: &str, driver_type: &str) -> bool {
    let mut record = Mapping::new();
    record.insert(
        Value::String("type".to_string()),
        Value::String(driver_type.to_string()),
    );
    let new_value = Value::Mapping(record);

    let previous = export.insert(Value::String(slot.to_string()), new_value.clone());
    matches!(previous, Some(old) if old != new_value)
}

/// Injects the `storage` and `power` mock-driver entries into the `export`
/// section of a config document, creating the section if absent. All other
/// keys are preserved. Idempotent.
///
/// An empty YAML file parses to `Null`; that case is treated as an empty
/// mapping.
pub fn patch_document(doc: &mut Value, drivers: &DriverTypes) -> Result<PatchReport, ConfigError> {
    if doc.is_null() {
        *doc = Value::Mapping(Mapping::new());
    }
    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| ConfigError::NotAMapping(PathBuf::new()))?;

    let export = get_or_create_mapping(root, "export");

    let mut report = PatchReport::default();
    if set_driver_entry(export, "storage", &drivers.storage) {
        report.replaced.push("storage".to_string());
    }
    if set_driver_entry(export, "power", &drivers.power) {
        report.replaced.push("power".to_string());
    }

    Ok(report)
}

/// Loads the exporter config at `path`, injects the mock drivers, writes the
/// document back whole, and re-reads the file for operator confirmation.
pub fn apply_mock_drivers(path: &Path, drivers: &DriverTypes) -> Result<AppliedPatch, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut doc: Value = serde_yaml::from_str(&content)?;

    let report = patch_document(&mut doc, drivers)
        .map_err(|e| match e {
            ConfigError::NotAMapping(_) => ConfigError::NotAMapping(path.to_path_buf()),
            other => other,
        })?;

    let serialized = serde_yaml::to_string(&doc)?;
    std::fs::write(path, serialized)?;

    let contents = std::fs::read_to_string(path)?;
    Ok(AppliedPatch { report, contents })
}

/// Ordered lookup of exporter config files across candidate directories.
/// The first directory containing `<name>.yaml` wins.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    candidates: Vec<PathBuf>,
}

impl ConfigLocator {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// The built-in lookup order: user-scoped config dir, then the
    /// system-scoped fallback.
    pub fn with_default_candidates() -> Self {
        let mut candidates = Vec::new();
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config").join("jumpstarter").join("exporters"));
        }
        candidates.push(PathBuf::from("/etc/jumpstarter/exporters"));
        Self { candidates }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Returns the first existing `<name>.yaml` across the candidates.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_name = format!("{name}.yaml");
        self.candidates
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drivers() -> DriverTypes {
        DriverTypes {
            storage: "jumpstarter_driver_opendal.driver.MockStorageMux".to_string(),
            power: "jumpstarter_driver_power.driver.MockPower".to_string(),
        }
    }

    fn driver_type<'a>(doc: &'a Value, slot: &str) -> Option<&'a str> {
        doc.get("export")?.get(slot)?.get("type")?.as_str()
    }

    #[test]
    fn test_patch_empty_mapping() {
        let mut doc: Value = serde_yaml::from_str("{}").unwrap();
        let report = patch_document(&mut doc, &drivers()).unwrap();

        assert_eq!(
            driver_type(&doc, "storage"),
            Some("jumpstarter_driver_opendal.driver.MockStorageMux")
        );
        assert_eq!(
            driver_type(&doc, "power"),
            Some("jumpstarter_driver_power.driver.MockPower")
        );
        assert!(report.replaced.is_empty());

        // Only the export key was added
        assert_eq!(doc.as_mapping().unwrap().len(), 1);
        assert_eq!(doc.get("export").unwrap().as_mapping().unwrap().len(), 2);
    }

    #[test]
    fn test_patch_empty_document_treated_as_mapping() {
        let mut doc: Value = serde_yaml::from_str("").unwrap();
        assert!(doc.is_null());

        patch_document(&mut doc, &drivers()).unwrap();
        assert!(driver_type(&doc, "storage").is_some());
        assert!(driver_type(&doc, "power").is_some());
    }

    #[test]
    fn test_patch_preserves_other_top_level_keys() {
        let yaml = r#"
apiVersion: jumpstarter.dev/v1alpha1
kind: ExporterConfig
endpoint: localhost:8082
"#;
        let mut doc: Value = serde_yaml::from_str(yaml).unwrap();
        patch_document(&mut doc, &drivers()).unwrap();

        assert_eq!(
            doc.get("apiVersion").unwrap().as_str(),
            Some("jumpstarter.dev/v1alpha1")
        );
        assert_eq!(doc.get("kind").unwrap().as_str(), Some("ExporterConfig"));
        assert_eq!(doc.get("endpoint").unwrap().as_str(), Some("localhost:8082"));
        assert!(driver_type(&doc, "storage").is_some());
    }

    #[test]
    fn test_patch_preserves_unrelated_export_entries() {
        let yaml = r#"
export:
  network:
    type: jumpstarter_driver_network.driver.TcpNetwork
    config:
      host: 192.168.1.10
"#;
        let mut doc: Value = serde_yaml::from_str(yaml).unwrap();
        let report = patch_document(&mut doc, &drivers()).unwrap();

        assert_eq!(
            driver_type(&doc, "network"),
            Some("jumpstarter_driver_network.driver.TcpNetwork")
        );
        assert!(driver_type(&doc, "storage").is_some());
        assert!(driver_type(&doc, "power").is_some());
        assert_eq!(doc.get("export").unwrap().as_mapping().unwrap().len(), 3);
        assert!(report.replaced.is_empty());
    }

    #[test]
    fn test_patch_overwrites_existing_driver_entries() {
        let yaml = r#"
export:
  storage:
    type: real_driver.Storage
  power:
    type: real_driver.Power
"#;
        let mut doc: Value = serde_yaml::from_str(yaml).unwrap();
        let report = patch_document(&mut doc, &drivers()).unwrap();

        assert_eq!(
            driver_type(&doc, "storage"),
            Some("jumpstarter_driver_opendal.driver.MockStorageMux")
        );
        assert_eq!(
            driver_type(&doc, "power"),
            Some("jumpstarter_driver_power.driver.MockPower")
        );
        assert_eq!(report.replaced, vec!["storage", "power"]);
    }

    #[test]
    fn test_patch_is_idempotent() {
        let mut doc: Value = serde_yaml::from_str("{}").unwrap();
        patch_document(&mut doc, &drivers()).unwrap();
        let first = serde_yaml::to_string(&doc).unwrap();

        let report = patch_document(&mut doc, &drivers()).unwrap();
        let second = serde_yaml::to_string(&doc).unwrap();

        assert_eq!(first, second);
        // Re-applying the same entries is not a replacement
        assert!(report.replaced.is_empty());
    }

    #[test]
    fn test_patch_rejects_non_mapping_document() {
        let mut doc: Value = serde_yaml::from_str("- a\n- b").unwrap();
        let result = patch_document(&mut doc, &drivers());
        assert!(matches!(result, Err(ConfigError::NotAMapping(_))));
    }

    #[test]
    fn test_patch_replaces_scalar_export_value() {
        let mut doc: Value = serde_yaml::from_str("export: disabled").unwrap();
        patch_document(&mut doc, &drivers()).unwrap();
        assert!(driver_type(&doc, "storage").is_some());
    }

    #[test]
    fn test_apply_mock_drivers_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("example-distributed.yaml");
        std::fs::write(&path, "endpoint: localhost:8082\n").unwrap();

        let applied = apply_mock_drivers(&path, &drivers()).unwrap();

        assert!(applied.contents.contains("MockStorageMux"));
        assert!(applied.contents.contains("MockPower"));
        assert!(applied.contents.contains("endpoint: localhost:8082"));
        assert!(applied.report.replaced.is_empty());

        // File on disk matches the echoed contents and is valid YAML
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, applied.contents);
        let reparsed: Value = serde_yaml::from_str(&on_disk).unwrap();
        assert!(reparsed.get("export").is_some());
    }

    #[test]
    fn test_apply_mock_drivers_twice_yields_same_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("exporter.yaml");
        std::fs::write(&path, "{}\n").unwrap();

        let first = apply_mock_drivers(&path, &drivers()).unwrap();
        let second = apply_mock_drivers(&path, &drivers()).unwrap();

        assert_eq!(first.contents, second.contents);
        assert!(second.report.replaced.is_empty());
    }

    #[test]
    fn test_apply_mock_drivers_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope.yaml");

        let result = apply_mock_drivers(&path, &drivers());
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_apply_mock_drivers_invalid_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "export: [unclosed\n").unwrap();

        let result = apply_mock_drivers(&path, &drivers());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_locator_first_candidate_wins() {
        let user_dir = tempfile::TempDir::new().unwrap();
        let system_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(user_dir.path().join("demo.yaml"), "{}").unwrap();
        std::fs::write(system_dir.path().join("demo.yaml"), "{}").unwrap();

        let locator = ConfigLocator::new(vec![
            user_dir.path().to_path_buf(),
            system_dir.path().to_path_buf(),
        ]);

        assert_eq!(
            locator.locate("demo"),
            Some(user_dir.path().join("demo.yaml"))
        );
    }

    #[test]
    fn test_locator_falls_back_to_later_candidate() {
        let user_dir = tempfile::TempDir::new().unwrap();
        let system_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(system_dir.path().join("demo.yaml"), "{}").unwrap();

        let locator = ConfigLocator::new(vec![
            user_dir.path().to_path_buf(),
            system_dir.path().to_path_buf(),
        ]);

        assert_eq!(
            locator.locate("demo"),
            Some(system_dir.path().join("demo.yaml"))
        );
    }

    #[test]
    fn test_locator_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let locator = ConfigLocator::new(vec![dir.path().to_path_buf()]);
        assert_eq!(locator.locate("demo"), None);
    }

    #[test]
    fn test_default_candidates_order() {
        let locator = ConfigLocator::with_default_candidates();
        let candidates = locator.candidates();
        assert!(!candidates.is_empty());
        assert_eq!(
            candidates.last(),
            Some(&PathBuf::from("/etc/jumpstarter/exporters"))
        );
    }
}
