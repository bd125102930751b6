use super::*;
use anyhow::{anyhow, Result};
use hsu_process::{validate_executable, validate_process_id};

/// Validate a process configuration
pub fn validate_config(config: &ProcessConfig) -> Result<()> {
    validate_executable(&config.cmd)?;

    if let Some(ref name) = config.name {
        validate_process_id(name)?;

        if name.len() > 64 {
            return Err(anyhow!("Process name too long (max 64 characters): {}", name));
        }
    }

    for entry in &config.env {
        parse_env_entry(entry)?;
    }

    if config.args.iter().any(|arg| arg.contains('\0')) {
        return Err(anyhow!("Arguments of {} cannot contain NUL bytes", config.display_name()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = ProcessConfig {
            name: Some("web-1".to_string()),
            env: vec!["PORT=8080".to_string()],
            ..ProcessConfig::new("/usr/bin/web")
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(validate_config(&ProcessConfig::new("")).is_err());

        let bad_name = ProcessConfig {
            name: Some("has spaces".to_string()),
            ..ProcessConfig::new("/bin/true")
        };
        assert!(validate_config(&bad_name).is_err());

        let long_name = ProcessConfig {
            name: Some("x".repeat(65)),
            ..ProcessConfig::new("/bin/true")
        };
        assert!(validate_config(&long_name).is_err());

        let bad_env = ProcessConfig {
            env: vec!["NO_EQUALS".to_string()],
            ..ProcessConfig::new("/bin/true")
        };
        assert!(validate_config(&bad_env).is_err());

        let bad_arg = ProcessConfig {
            args: vec!["a\0b".to_string()],
            ..ProcessConfig::new("/bin/true")
        };
        assert!(validate_config(&bad_arg).is_err());
    }
}
