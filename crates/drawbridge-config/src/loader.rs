//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::schema::Config;

/// File name looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "drawbridge.toml";

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the first discovered config file,
    /// otherwise defaults. An explicit path that does not exist is an error.
    pub fn load_or_default(path: Option<&Path>, work_dir: &Path) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::discover(work_dir) {
                Some(found) => Self::load(&found),
                None => Ok(Config::default()),
            },
        }
    }

    /// Look for `drawbridge.toml` in the working directory, then in the
    /// user config directory.
    pub fn discover(work_dir: &Path) -> Option<PathBuf> {
        let local = work_dir.join(PROJECT_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        let user = dirs::config_dir()?.join("drawbridge").join("config.toml");
        user.is_file().then_some(user)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/projects`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Mode, ProviderKind};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.server.port, 4747);
        assert_eq!(config.mode, Mode::Auto);
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            mode = "queued"
            work_dir = "/srv/site"

            [server]
            port = 5000
            control_port = 5001

            [agent]
            provider = "command"
            command = "/usr/local/bin/my-agent"
            args = ["--fast"]
            timeout_secs = 120

            [snapshot]
            ignore = ["dist/**", "*.log"]

            [watch]
            default_timeout_secs = 10
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.mode, Mode::Queued);
        assert_eq!(config.server.control_port, 5001);
        assert_eq!(config.agent.provider, ProviderKind::Command);
        assert_eq!(config.agent.args, vec!["--fast".to_string()]);
        assert_eq!(config.agent.grace_period_secs, 5);
        assert_eq!(config.snapshot.ignore.len(), 2);
        assert_eq!(config.watch.default_timeout_secs, 10);
        assert_eq!(config.watch.max_timeout_secs, 300);
        assert_eq!(config.work_dir.unwrap(), PathBuf::from("/srv/site"));
    }

    #[test]
    fn test_load_unknown_mode_fails() {
        assert!(ConfigLoader::load_str("mode = \"sometimes\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]").unwrap();
        writeln!(file, "port = 6000").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.server.port, 6000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/drawbridge.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_discovers_project_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "mode = \"queued\"\n").unwrap();

        let config = ConfigLoader::load_or_default(None, dir.path()).unwrap();
        assert_eq!(config.mode, Mode::Queued);
    }

    #[test]
    fn test_load_or_default_explicit_missing_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ConfigLoader::load_or_default(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-only variable name, not read elsewhere
        unsafe {
            std::env::set_var("DRAWBRIDGE_TEST_AGENT_BIN", "/opt/agent");
        }
        let content = "command = \"${DRAWBRIDGE_TEST_AGENT_BIN}\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert_eq!(expanded, "command = \"/opt/agent\"");
        unsafe {
            std::env::remove_var("DRAWBRIDGE_TEST_AGENT_BIN");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${DRAWBRIDGE_NONEXISTENT_VAR_98765}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = ConfigLoader::expand_path("~/site");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/site"));
    }
}
