//! Operator configuration file.
//!
//! ```toml
//! [listener]
//! host = "0.0.0.0"
//! port = 8042
//!
//! [client]
//! timeout_secs = 30
//!
//! [voucher]
//! rv_urls = ["http://rv.example:8040"]
//! min_entries = 1
//! max_entries = 3
//! ```
//!
//! Every field is optional. Command-line flags and `FDO_*` environment
//! variables take precedence over the file.

use anyhow::{Context, Result, bail};
use fdo_protocol::transport::ClientConfig;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listener: ListenerSection,
    pub client: ClientSection,
    pub voucher: VoucherSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8042,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    pub timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoucherSection {
    /// Rendezvous URLs written into generated vouchers.
    pub rv_urls: Vec<String>,
    pub min_entries: usize,
    pub max_entries: usize,
}

impl Default for VoucherSection {
    fn default() -> Self {
        Self {
            rv_urls: vec!["http://127.0.0.1:8042".to_owned()],
            min_entries: 1,
            max_entries: 3,
        }
    }
}

impl FileConfig {
    /// Load `path`, or the defaults when no file is given.
    ///
    /// # Errors
    /// Unreadable or malformed files and inconsistent values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.voucher.rv_urls.is_empty() {
            bail!("[voucher] rv_urls must not be empty");
        }
        if self.voucher.min_entries == 0 || self.voucher.min_entries > self.voucher.max_entries {
            bail!(
                "[voucher] entry range {}..={} is invalid",
                self.voucher.min_entries,
                self.voucher.max_entries
            );
        }
        if self.client.timeout_secs == 0 {
            bail!("[client] timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.client.timeout_secs),
            ..ClientConfig::default()
        }
    }

    pub const fn entry_range(&self) -> RangeInclusive<usize> {
        self.voucher.min_entries..=self.voucher.max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn no_file_means_defaults() {
        let config = FileConfig::load(None).unwrap();
        assert_eq!(config, FileConfig::default());
        assert_eq!(config.listener.port, 8042);
        assert_eq!(config.client_config().timeout, Duration::from_secs(30));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = file_with("[listener]\nport = 9000\n\n[voucher]\nmax_entries = 5\n");
        let config = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.entry_range(), 1..=5);
        assert_eq!(config.client, ClientSection::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = file_with("[listener]\nprot = 9000\n");
        let err = FileConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("prot"), "{err:#}");
    }

    #[test]
    fn inverted_entry_range_is_rejected() {
        let file = file_with("[voucher]\nmin_entries = 4\nmax_entries = 2\n");
        let err = FileConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("entry range"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = FileConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
