//! 配置文件加载与管理

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::registry::{LookupMode, LookupOptions, TableKind};

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 注册表查询配置
    pub registry: RegistryConfig,
}

/// 注册表查询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 未知方块直接报错（默认替换为未知方块并记录诊断）
    pub strict: bool,
    /// 映射表优先级，从高到低
    pub precedence: Vec<String>,
}

// ============== 默认值 ==============

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict: false,
            precedence: vec![
                "specific".to_string(),
                "canonical".to_string(),
                "modded".to_string(),
            ],
        }
    }
}

// ============== 配置加载 ==============

impl Config {
    /// 从文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::Error::format(format!("配置解析失败: {}", e)))?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::Error::format(format!("配置序列化失败: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// 获取默认配置文件路径
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("schemio").join("config.toml"))
    }

    /// 按优先级加载配置：
    /// 1. 当前目录的 schemio.toml
    /// 2. 用户配置目录的 config.toml
    /// 3. 默认配置
    pub fn load() -> Self {
        // 当前目录
        let local_config = Path::new("schemio.toml");
        if local_config.exists() {
            if let Ok(config) = Self::load_from_file(local_config) {
                log::info!("已加载配置: schemio.toml");
                return config;
            }
        }

        // 用户配置目录
        if let Some(user_config) = Self::default_config_path() {
            if user_config.exists() {
                if let Ok(config) = Self::load_from_file(&user_config) {
                    log::info!("已加载配置: {}", user_config.display());
                    return config;
                }
            }
        }

        // 默认配置
        Self::default()
    }

    /// 生成默认配置文件内容
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// 转换为注册表查询选项，无法识别的表名被忽略
    pub fn lookup_options(&self) -> LookupOptions {
        let mode = if self.registry.strict {
            LookupMode::Strict
        } else {
            LookupMode::Lenient
        };
        let mut precedence: Vec<TableKind> = self
            .registry
            .precedence
            .iter()
            .filter_map(|s| TableKind::parse(s))
            .collect();
        if precedence.is_empty() {
            precedence = LookupOptions::default().precedence;
        }
        LookupOptions { mode, precedence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lookup_options() {
        let opts = Config::default().lookup_options();
        assert_eq!(opts.mode, LookupMode::Lenient);
        assert_eq!(
            opts.precedence,
            vec![TableKind::Specific, TableKind::Canonical, TableKind::Modded]
        );
    }

    #[test]
    fn toml_roundtrip_with_custom_precedence() {
        let text = "[registry]\nstrict = true\nprecedence = [\"canonical\", \"legacy\"]\n";
        let config: Config = toml::from_str(text).unwrap();
        let opts = config.lookup_options();
        assert_eq!(opts.mode, LookupMode::Strict);
        assert_eq!(
            opts.precedence,
            vec![TableKind::Canonical, TableKind::Legacy]
        );
    }

    #[test]
    fn unknown_table_names_are_ignored() {
        let text = "[registry]\nprecedence = [\"modded\", \"nope\"]\n";
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.lookup_options().precedence, vec![TableKind::Modded]);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = std::env::temp_dir().join("schemio-config-test");
        let path = dir.join("config.toml");
        let mut config = Config::default();
        config.registry.strict = true;
        config.registry.precedence = vec!["legacy".to_string()];
        config.save_to_file(&path).unwrap();

        let back = Config::load_from_file(&path).unwrap();
        assert!(back.registry.strict);
        assert_eq!(back.lookup_options().precedence, vec![TableKind::Legacy]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn default_toml_is_parseable() {
        let text = Config::default_toml();
        let config: Config = toml::from_str(&text).unwrap();
        assert!(!config.registry.strict);
    }
}
