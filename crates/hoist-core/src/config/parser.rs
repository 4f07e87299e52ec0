//! TOML parser with helpful error messages

use std::path::Path;

use anyhow::{Context, Result};

use super::paths::Environment;
use super::schema::Settings;

/// Load the site's hoist.toml, or defaults when it does not exist
pub fn load_settings(environment: &Environment) -> Result<Settings> {
    let path = environment.settings_path();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no settings file, using defaults");
        return Ok(Settings::default());
    }
    parse_hoist_toml(&path)
}

/// Parse hoist.toml with detailed error messages
pub fn parse_hoist_toml(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_hoist_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse hoist.toml content from string
pub fn parse_hoist_toml_str(content: &str) -> Result<Settings> {
    let settings: Settings =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;
    settings.validate()?;
    Ok(settings)
}

/// Serialize settings to a TOML string
pub fn to_toml(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to serialize settings to TOML")
}

fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let error_msg = error.to_string();

    let line_hint = error_msg
        .lines()
        .find(|line| line.contains("line "))
        .and_then(|line| {
            line.split("line ")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.parse::<usize>().ok())
        });

    match line_hint {
        Some(line_num) => anyhow::anyhow!(
            "TOML parsing error at line {}:\n{}\n\nError: {}",
            line_num,
            line_context(content, line_num),
            error_msg
        ),
        None => anyhow::anyhow!("TOML parsing error: {}", error_msg),
    }
}

fn line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2).min(lines.len());
    let end = (line_num + 2).min(lines.len());

    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepositoryType;
    use std::time::Duration;

    #[test]
    fn empty_config_uses_defaults() {
        let settings = parse_hoist_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.branch, "master");
        assert_eq!(settings.retry_policy().max_attempts, 3);
        assert_eq!(settings.retry_policy().delay, Duration::from_secs(1));
        assert_eq!(settings.status_timeout(), Duration::from_secs(60));
        assert_eq!(settings.retention_policy().max_success_results, 10);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
branch = "main"
repository_type = "hg"
repository_url = "https://example.com/site"
allow_shallow_clones = true

[retry]
max_attempts = 5
delay_ms = 0

[lock]
poll_interval_ms = 25

[retention]
max_success_results = 4

[build]
command = "make dist"
target_dir = "public"
"#;
        let settings = parse_hoist_toml_str(toml).unwrap();
        assert_eq!(settings.branch, "main");
        assert_eq!(settings.repository_type, RepositoryType::Mercurial);
        assert!(settings.allow_shallow_clones);
        assert_eq!(settings.retry_policy().max_attempts, 5);
        assert!(settings.retry_policy().delay.is_zero());
        assert_eq!(settings.poll_interval(), Duration::from_millis(25));
        assert_eq!(settings.lock.status_timeout_secs, 60);
        assert_eq!(settings.retention.max_success_results, 4);
        assert_eq!(settings.build.command.as_deref(), Some("make dist"));
    }

    #[test]
    fn invalid_toml_reports_line() {
        let toml = "branch = \"main\"\n[retry\nmax_attempts = 2\n";
        let err = parse_hoist_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("TOML parsing error"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = parse_hoist_toml_str("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn bad_repository_url_is_rejected() {
        let result = parse_hoist_toml_str("repository_url = \"ht!tp://\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn serialized_settings_parse_back() {
        let mut settings = Settings::default();
        settings.branch = "release".to_string();
        let text = to_toml(&settings).unwrap();
        assert_eq!(parse_hoist_toml_str(&text).unwrap(), settings);
    }
}
