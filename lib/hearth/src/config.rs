use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Coordinator configuration, stored as a JSON document. Field names match
/// the legacy on-disk format so existing deployments keep working.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Configuration {
    /// Root directory of the per-job file storage.
    #[serde(rename = "Folder")]
    pub folder: PathBuf,
    /// Path to the row-store file.
    #[serde(rename = "DBName")]
    pub db_name: PathBuf,
    /// Basename of the `.cert`/`.key` pair used by the transport layer.
    #[serde(rename = "Certname")]
    pub certname: String,
    /// Permitted client keys. Extended at start-up with the key of every
    /// node recovered from storage.
    #[serde(rename = "UserAPIKeys")]
    pub user_api_keys: Vec<String>,
}

impl Configuration {
    /// Reads the configuration from the supplied JSON file.
    pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
        let file = fs::File::open(path)?;
        let config = serde_json::from_reader(file)?;
        Ok(config)
    }

    /// Returns true if the supplied api key is a known, non-empty client key.
    #[inline]
    pub fn key_known(&self, key: &str) -> bool {
        !key.is_empty() && self.user_api_keys.iter().any(|known| known == key)
    }

    /// Admits an api key into the permitted set, ignoring duplicates.
    pub fn admit_key(&mut self, key: &str) {
        if !key.is_empty() && !self.user_api_keys.iter().any(|known| known == key) {
            self.user_api_keys.push(key.to_string());
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::ErrorKind),
    Malformed(String),
}

impl From<io::Error> for ConfigError {
    #[inline]
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err.kind())
    }
}

impl From<serde_json::Error> for ConfigError {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> Configuration {
        Configuration {
            folder: PathBuf::from("/srv/farm"),
            db_name: PathBuf::from("/srv/farm.db"),
            certname: "farm".to_string(),
            user_api_keys: vec!["alpha".to_string()],
        }
    }

    #[test]
    fn test_load_legacy_field_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Folder": "/srv/farm", "DBName": "/srv/farm.db", "Certname": "farm", "UserAPIKeys": ["alpha", "beta"]}}"#
        )
        .unwrap();

        let config = Configuration::load(file.path()).unwrap();

        assert_eq!(config.folder, PathBuf::from("/srv/farm"));
        assert_eq!(config.db_name, PathBuf::from("/srv/farm.db"));
        assert_eq!(config.certname, "farm");
        assert_eq!(config.user_api_keys, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Configuration::load(Path::new("/nonexistent/farm.json"));

        match result {
            Err(ConfigError::Io(kind)) => assert_eq!(kind, io::ErrorKind::NotFound),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_key_known() {
        let config = sample();

        assert!(config.key_known("alpha"));
        assert!(!config.key_known("beta"));
        assert!(!config.key_known(""));
    }

    #[test]
    fn test_admit_key_deduplicates() {
        let mut config = sample();

        config.admit_key("alpha");
        config.admit_key("beta");
        config.admit_key("");

        assert_eq!(config.user_api_keys, vec!["alpha", "beta"]);
    }
}
