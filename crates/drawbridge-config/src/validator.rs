//! Configuration validation.

use crate::schema::{Config, ProviderKind};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_agent(config, &mut result);
        Self::validate_snapshot(config, &mut result);
        Self::validate_watch(config, &mut result);

        result
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }
        if config.server.control_port == 0 {
            result.add_error(ValidationError::new(
                "server.control_port",
                "Port cannot be 0",
            ));
        }
        if config.server.port != 0 && config.server.port == config.server.control_port {
            result.add_error(ValidationError::new(
                "server.control_port",
                "control_port must differ from port",
            ));
        }
    }

    fn validate_agent(config: &Config, result: &mut ValidationResult) {
        let agent = &config.agent;

        if agent.timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "agent.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        } else if agent.timeout_secs > 3600 {
            result.add_warning(ValidationWarning::new(
                "agent.timeout_secs",
                "timeout_secs is above one hour, a stuck agent will hold the working tree that long",
            ));
        }

        if agent.max_prompt_chars == 0 {
            result.add_error(ValidationError::new(
                "agent.max_prompt_chars",
                "max_prompt_chars must be greater than 0",
            ));
        }

        let has_command = agent.command.as_deref().is_some_and(|c| !c.trim().is_empty());
        if agent.provider == ProviderKind::Command && !has_command {
            result.add_error(ValidationError::new(
                "agent.command",
                "provider 'command' requires agent.command",
            ));
        }
    }

    fn validate_snapshot(config: &Config, result: &mut ValidationResult) {
        for pattern in &config.snapshot.ignore {
            if let Err(e) = glob::Pattern::new(pattern) {
                result.add_error(ValidationError::new(
                    "snapshot.ignore",
                    format!("invalid glob '{pattern}': {e}"),
                ));
            }
        }
        if config.snapshot.max_file_bytes == 0 {
            result.add_warning(ValidationWarning::new(
                "snapshot.max_file_bytes",
                "max_file_bytes is 0, no file will be captured or reverted",
            ));
        }
    }

    fn validate_watch(config: &Config, result: &mut ValidationResult) {
        let watch = &config.watch;
        if watch.max_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "watch.max_timeout_secs",
                "max_timeout_secs must be greater than 0",
            ));
        }
        if watch.default_timeout_secs > watch.max_timeout_secs {
            result.add_warning(ValidationWarning::new(
                "watch.default_timeout_secs",
                "default_timeout_secs exceeds max_timeout_secs and will be clamped",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
