use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use ztopo_core::algorithms::area::Winding;
use ztopo_core::tolerance::Tolerances;

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tolerances: Tolerances,
    #[serde(default)]
    pub session: SessionConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `ZTOPO_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("ZTOPO_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// 容差必须为正的有限值，期望方向不能是退化。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tolerances;
        let fields = [
            ("point", t.point),
            ("cluster", t.cluster),
            ("zero_length", t.zero_length),
            ("zero_area", t.zero_area),
            ("small_polygon_area", t.small_polygon_area),
            ("gap", t.gap),
            ("overlap_area", t.overlap_area),
            ("simplify", t.simplify),
            ("angle", t.angle),
            ("arc_chord", t.arc_chord),
        ];
        if let Some((name, value)) = fields
            .iter()
            .find(|(_, value)| !(value.is_finite() && *value > 0.0))
        {
            return Err(ConfigError::Invalid {
                message: format!("容差 tolerances.{name} 必须为正数，当前为 {value}"),
            });
        }
        if self.session.expected_winding == Winding::Degenerate {
            return Err(ConfigError::Invalid {
                message: "session.expected_winding 只能是 clockwise 或 counter_clockwise"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 运行哪一组检查项。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowChoice {
    #[default]
    Line,
    Polygon,
    Annotation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub workflow: WorkflowChoice,
    #[serde(default = "SessionConfig::default_recursive")]
    pub recursive_fix: bool,
    #[serde(default = "SessionConfig::default_max_iterations")]
    pub max_fix_iterations: usize,
    #[serde(default = "SessionConfig::default_winding")]
    pub expected_winding: Winding,
}

impl SessionConfig {
    fn default_recursive() -> bool {
        true
    }

    fn default_max_iterations() -> usize {
        8
    }

    fn default_winding() -> Winding {
        Winding::Clockwise
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowChoice::default(),
            recursive_fix: Self::default_recursive(),
            max_fix_iterations: Self::default_max_iterations(),
            expected_winding: Self::default_winding(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("配置无效: {message}")]
    Invalid { message: String },
}
