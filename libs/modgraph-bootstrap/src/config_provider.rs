use crate::config::AppConfig;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Configuration provider trait for modules
pub trait ConfigProvider: Send + Sync {
    /// Get the configuration for a specific module
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value>;

    /// Get a specific config value by key
    fn get_config_raw(&self, key: &str) -> Option<serde_json::Value>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration for module '{module}'")]
    InvalidModuleConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Typed view of a module's section. A missing section yields `T::default()`.
pub fn module_config<T>(provider: &dyn ConfigProvider, module_name: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    match provider.get_module_config(module_name) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|source| ConfigError::InvalidModuleConfig {
            module: module_name.to_string(),
            source,
        }),
        None => Ok(T::default()),
    }
}

/// Implementation of ConfigProvider that uses AppConfig
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    pub fn from_arc(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    pub fn inner(&self) -> &AppConfig {
        &self.0
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.0.modules.get(module_name)
    }

    fn get_config_raw(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "server" => serde_json::to_value(&self.0.server).ok(),
            "logging" => self
                .0
                .logging
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct UsersConfig {
        page_size: u32,
        #[serde(default)]
        admin: Option<String>,
    }

    fn provider() -> AppConfigProvider {
        let mut config = AppConfig::default();
        config
            .modules
            .insert("users".into(), serde_json::json!({ "page_size": 20 }));
        config
            .modules
            .insert("broken".into(), serde_json::json!({ "page_size": "many" }));
        AppConfigProvider::new(config)
    }

    #[test]
    fn module_section_is_deserialized() {
        let cfg: UsersConfig = module_config(&provider(), "users").unwrap();
        assert_eq!(
            cfg,
            UsersConfig {
                page_size: 20,
                admin: None
            }
        );
    }

    #[test]
    fn missing_section_falls_back_to_default() {
        let cfg: UsersConfig = module_config(&provider(), "absent").unwrap();
        assert_eq!(cfg, UsersConfig::default());
    }

    #[test]
    fn malformed_section_names_the_module() {
        let err = module_config::<UsersConfig>(&provider(), "broken").unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration for module 'broken'");
    }

    #[test]
    fn raw_sections_by_key() {
        let p = provider();
        assert_eq!(p.get_config_raw("server").unwrap()["port"], 8087);
        assert!(p.get_config_raw("database").is_none());
    }
}
