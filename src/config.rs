//! Per-instance configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Paths and installer command shared by every request on one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Directory packages are installed into and imported from
    pub install_dir: PathBuf,

    /// Download cache reused across installs on the same instance
    pub cache_dir: PathBuf,

    /// Installer program and its leading arguments
    pub installer_command: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("pysprinter");
        Self {
            install_dir: root.join("site-packages"),
            cache_dir: root.join("pip-cache"),
            installer_command: vec!["python3".to_string(), "-m".to_string(), "pip".to_string()],
        }
    }
}

impl InstanceConfig {
    /// Set the package installation directory
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    /// Set the installer download cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Replace the installer invocation, e.g. for a pinned interpreter
    pub fn with_installer_command(mut self, command: Vec<String>) -> Self {
        self.installer_command = command;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_live_under_the_temp_root() {
        let config = InstanceConfig::default();
        let root = std::env::temp_dir().join("pysprinter");
        assert!(config.install_dir.starts_with(&root));
        assert!(config.cache_dir.starts_with(&root));
        assert_ne!(config.install_dir, config.cache_dir);
    }

    #[test]
    fn test_default_installer_is_pip_via_interpreter() {
        let config = InstanceConfig::default();
        assert_eq!(config.installer_command, vec!["python3", "-m", "pip"]);
    }

    #[test]
    fn test_builders_replace_fields() {
        let config = InstanceConfig::default()
            .with_install_dir("/srv/packages")
            .with_cache_dir("/srv/cache")
            .with_installer_command(vec!["pip3".to_string()]);
        assert_eq!(config.install_dir, PathBuf::from("/srv/packages"));
        assert_eq!(config.cache_dir, PathBuf::from("/srv/cache"));
        assert_eq!(config.installer_command, vec!["pip3"]);
    }
}
