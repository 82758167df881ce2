use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::paths::home_dir::resolve_home_dir;

/// Main application configuration with strongly-typed global sections
/// and a flexible per-module configuration bag.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Core server configuration.
    pub server: ServerConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Directory containing per-module YAML files (optional).
    #[serde(default)]
    pub modules_dir: Option<String>,
    /// Per-module configuration bag: module_name → arbitrary JSON/YAML value.
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub home_dir: String, // normalized to an absolute path on load
    pub host: String,
    pub port: u16,
    /// Value of the `server` response header.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Application-wide route prefix, without a leading slash.
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Per-request timeout in seconds; 0 disables it.
    #[serde(default)]
    pub timeout_sec: u64,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/api.log"
    #[serde(default)]
    pub file_level: String,
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>, // How many files to keep
    #[serde(default)]
    pub max_size_mb: Option<u64>, // Max size of the file in MB
}

fn default_server_name() -> String {
    "modgraph".to_string()
}

const fn default_body_limit() -> usize {
    1024 * 1024
}

const fn default_subdir() -> &'static str {
    ".modgraph"
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Empty => platform default resolved by resolve_home_dir()
            home_dir: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8087,
            server_name: default_server_name(),
            prefix: String::new(),
            body_limit_bytes: default_body_limit(),
            timeout_sec: 0,
        }
    }
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/modgraph.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: Some(default_logging_config()),
            modules_dir: None,
            modules: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `server.home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Optional sections stay None unless YAML/ENV provide them.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // Example: APP__SERVER__PORT=8087 maps to server.port
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load config from {}", config_path.as_ref().display()))?;

        normalize_home_dir_inplace(&mut config.server).context("Failed to resolve server.home_dir")?;

        if let Some(dir) = config.modules_dir.clone() {
            merge_module_files(&mut config.modules, dir)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file or create with default values.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir_inplace(&mut c.server)
                    .context("Failed to resolve server.home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    /// Checks values the type system cannot.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.server.prefix.starts_with('/') {
            bail!(
                "server.prefix '{}' cannot start with a slash",
                self.server.prefix
            );
        }
        Ok(())
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        // Verbosity only raises the "default" console level.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(),
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }

    /// Directory for a module's own files under the server home.
    pub fn module_home(&self, module_name: &str) -> PathBuf {
        PathBuf::from(&self.server.home_dir).join(module_name)
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}

/// Normalize `server.home_dir` and store the absolute path back.
fn normalize_home_dir_inplace(server: &mut ServerConfig) -> Result<()> {
    let opt = if server.home_dir.trim().is_empty() {
        None
    } else {
        Some(server.home_dir.clone())
    };

    let resolved: PathBuf =
        resolve_home_dir(opt, default_subdir(), /*create*/ true).context("home_dir normalization failed")?;

    server.home_dir = resolved.to_string_lossy().to_string();
    Ok(())
}

/// Each `<name>.yaml` (or `.yml`) file in `dir` becomes `modules.<name>`,
/// replacing an inline section of the same name.
fn merge_module_files(bag: &mut HashMap<String, serde_json::Value>, dir: impl AsRef<Path>) -> Result<()> {
    use std::fs;
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if ext != "yml" && ext != "yaml" {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let raw = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let val: serde_yaml::Value =
            serde_yaml::from_str(&raw).with_context(|| format!("Invalid YAML in {}", path.display()))?;
        bag.insert(name, serde_json::to_value(val)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("cfg.yaml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn default_config_structure() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8087);
        assert_eq!(config.server.home_dir, "");
        assert_eq!(config.server.server_name, "modgraph");
        assert_eq!(config.server.prefix, "");
        assert_eq!(config.server.body_limit_bytes, 1024 * 1024);

        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging["default"].console_level, "info");
        assert_eq!(logging["default"].file, "logs/modgraph.log");
        assert!(config.modules.is_empty());
    }

    #[test]
    fn load_layered_reads_yaml_and_normalizes_home_dir() {
        let tmp = tempdir().unwrap();
        let home = tmp.path().join("home");
        let yaml = format!(
            r#"
server:
  home_dir: "{}"
  host: "0.0.0.0"
  port: 9090
  server_name: "edge"
  prefix: "api"
  timeout_sec: 30

logging:
  default:
    console_level: debug
    file: "logs/default.log"

modules:
  users:
    page_size: 50
"#,
            home.display()
        );
        let path = write_config(tmp.path(), &yaml);

        let config = AppConfig::load_layered(&path).unwrap();
        assert!(Path::new(&config.server.home_dir).is_absolute());
        assert!(home.is_dir());
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.server_name, "edge");
        assert_eq!(config.server.prefix, "api");
        assert_eq!(config.server.timeout_sec, 30);
        assert_eq!(config.server.body_limit_bytes, 1024 * 1024);
        assert_eq!(config.logging.unwrap()["default"].console_level, "debug");
        assert_eq!(config.modules["users"]["page_size"], 50);
    }

    #[test]
    fn modules_dir_files_are_merged() {
        let tmp = tempdir().unwrap();
        let modules = tmp.path().join("modules");
        fs::create_dir_all(&modules).unwrap();
        fs::write(modules.join("billing.yaml"), "currency: EUR\n").unwrap();
        fs::write(modules.join("notes.txt"), "ignored").unwrap();

        let yaml = format!(
            "server:\n  home_dir: \"{}\"\n  host: \"127.0.0.1\"\n  port: 8087\nmodules_dir: \"{}\"\n",
            tmp.path().join("home").display(),
            modules.display()
        );
        let path = write_config(tmp.path(), &yaml);

        let config = AppConfig::load_layered(&path).unwrap();
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules["billing"]["currency"], "EUR");
    }

    #[test]
    fn prefix_with_leading_slash_is_rejected() {
        let tmp = tempdir().unwrap();
        let yaml = format!(
            "server:\n  home_dir: \"{}\"\n  host: \"127.0.0.1\"\n  port: 8087\n  prefix: \"/api\"\n",
            tmp.path().join("home").display()
        );
        let path = write_config(tmp.path(), &yaml);

        let err = AppConfig::load_layered(&path).unwrap_err();
        assert!(format!("{err:#}").contains("cannot start with a slash"), "{err:#}");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = tempdir().unwrap();
        let yaml = format!(
            "server:\n  home_dir: \"{}\"\n  host: \"127.0.0.1\"\n  port: 8087\n  colour: blue\n",
            tmp.path().join("home").display()
        );
        let path = write_config(tmp.path(), &yaml);

        assert!(AppConfig::load_layered(&path).is_err());
    }

    #[test]
    fn cli_overrides_port_and_verbosity() {
        let mut config = AppConfig::default();
        config.apply_cli_overrides(&CliArgs {
            port: Some(3000),
            verbose: 2,
            ..CliArgs::default()
        });

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.logging.unwrap()["default"].console_level, "trace");
    }

    #[test]
    fn yaml_output_contains_server_section() {
        let yaml = AppConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("server:"));
        assert!(yaml.contains("port: 8087"));
    }
}
