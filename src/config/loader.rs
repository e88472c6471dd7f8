// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::core::AppConfig;
use super::validation::ConfigValidator;

pub struct ConfigLoader {
    config_path: PathBuf,
    format: ConfigFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref().to_path_buf();
        let format = Self::detect_format(&path)?;

        Ok(Self {
            config_path: path,
            format,
        })
    }

    pub fn with_format<P: AsRef<Path>>(config_path: P, format: ConfigFormat) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            format,
        }
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| anyhow::anyhow!("Could not determine config file format"))?;

        match extension {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(anyhow::anyhow!("Unsupported config file format: {}", extension)),
        }
    }

    /// Parse the file without touching the environment
    pub fn parse(&self) -> Result<AppConfig> {
        let content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file: {:?}", self.config_path))?;

        let config: AppConfig = match self.format {
            ConfigFormat::Yaml => serde_yaml::from_str(&content)
                .context("Failed to parse YAML config")?,
            ConfigFormat::Toml => toml::from_str(&content)
                .context("Failed to parse TOML config")?,
            ConfigFormat::Json => serde_json::from_str(&content)
                .context("Failed to parse JSON config")?,
        };

        Ok(config)
    }

    /// Parse, overlay the environment, then validate
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = self.parse()?;
        config.apply_env_overrides()?;
        ConfigValidator::validate_app_config(&config)?;
        Ok(config)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        ConfigValidator::validate_app_config(config)?;

        let content = match self.format {
            ConfigFormat::Yaml => serde_yaml::to_string(config)?,
            ConfigFormat::Toml => toml::to_string_pretty(config)?,
            ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        };

        std::fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", self.config_path))?;

        Ok(())
    }
}

/// Load from `path` when given, else from `VULNMGR_CONFIG`, else defaults.
/// Environment overrides apply in every case.
pub fn load_config_with_overrides(path: Option<&Path>) -> Result<AppConfig> {
    let from_env = std::env::var("VULNMGR_CONFIG").ok().map(PathBuf::from);

    let config = match path.map(Path::to_path_buf).or(from_env) {
        Some(p) => ConfigLoader::new(&p)?.load_config()?,
        None => {
            let config = AppConfig::from_env()?;
            ConfigValidator::validate_app_config(&config)?;
            config
        }
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::Dependency;
    use crate::types::ScannerKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ConfigLoader::detect_format(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigLoader::detect_format(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigLoader::detect_format(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert!(ConfigLoader::detect_format(Path::new("a.ini")).is_err());
        assert!(ConfigLoader::detect_format(Path::new("config")).is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let file = write_temp(
            ".yaml",
            r#"
worker:
  workers: 4
scanners:
  nmap_path: /usr/local/bin/nmap
  vulnerability_fallback: [gvm, nuclei]
  zap:
    base_url: http://zap:8080
resilience:
  breaker_overrides:
    nvd:
      failure_threshold: 3
      success_threshold: 1
      open_timeout: 120
correlation:
  max_cves: 20
  min_cvss: 4.0
"#,
        );

        let config = ConfigLoader::new(file.path()).unwrap().parse().unwrap();
        assert_eq!(config.worker.workers, 4);
        assert_eq!(config.scanners.nmap_path, "/usr/local/bin/nmap");
        assert_eq!(config.scanners.nuclei_path, "nuclei");
        assert_eq!(
            config.scanners.vulnerability_fallback,
            vec![ScannerKind::Gvm, ScannerKind::Nuclei]
        );
        assert_eq!(config.scanners.zap.unwrap().poll_interval_ms, 5_000);
        assert_eq!(config.resilience.breaker_overrides[&Dependency::Nvd].failure_threshold, 3);
        assert_eq!(config.correlation.max_cves, 20);
        assert_eq!(config.correlation.options().min_cvss, Some(4.0));
    }

    #[test]
    fn test_parse_toml() {
        let file = write_temp(
            ".toml",
            r#"
[orchestrator]
scan_timeout_secs = 600

[correlation.nvd]
results_per_page = 50
"#,
        );

        let config = ConfigLoader::new(file.path()).unwrap().parse().unwrap();
        assert_eq!(config.orchestrator.scan_timeout_secs, 600);
        assert_eq!(config.orchestrator.engine_timeout_secs, 1800);
        assert_eq!(config.correlation.nvd.results_per_page, 50);
    }

    #[test]
    fn test_parse_json_empty_object_uses_defaults() {
        let file = write_temp(".json", "{}");
        let config = ConfigLoader::new(file.path()).unwrap().parse().unwrap();
        assert!(ConfigValidator::validate_app_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let file = write_temp(".yaml", "worker: [not, a, map]");
        assert!(ConfigLoader::new(file.path()).unwrap().parse().is_err());
    }
}
