//! 统一配置中心
//!
//! 加载顺序：默认值 → 可选配置文件（`APP_CONFIG_FILE`）→ 旧环境变量
//! （`DATABASE_URL`、`JWT_SECRET`、`PORT`）→ `APP_` 前缀环境变量（`__` 分隔层级）。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            cors_origins: vec!["*".into()],
        }
    }
}

/// url 为空时使用内存存储
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

/// 历史消息分页
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::raw().only(&["JWT_SECRET"]).map(|_| "jwt.secret".into()))
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
            .merge(Env::prefixed("APP_").split("__"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment().extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn uses_in_memory_store(&self) -> bool {
        self.database.url.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // HS256 至少 256 位
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration_hours must be positive".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "host cannot be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }
        if self.chat.max_page_size == 0
            || self.chat.default_page_size == 0
            || self.chat.default_page_size > self.chat.max_page_size
        {
            return Err(ConfigError::InvalidChatConfig(format!(
                "page sizes must satisfy 0 < default ({}) <= max ({})",
                self.chat.default_page_size, self.chat.max_page_size
            )));
        }
        Ok(())
    }

    /// 日志用，隐藏密钥与数据库凭证
    pub fn sanitize(&self) -> String {
        let database = if self.uses_in_memory_store() {
            "in-memory".to_string()
        } else {
            match self.database.url.split_once('@') {
                Some((_, host)) => format!("postgres://[REDACTED]@{host}"),
                None => "[REDACTED]".to_string(),
            }
        };
        format!(
            "server={}:{} database={} max_connections={} page_size={}/{}",
            self.server.host,
            self.server.port,
            database,
            self.database.max_connections,
            self.chat.default_page_size,
            self.chat.max_page_size
        )
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server port: {0}")]
    InvalidServerPort(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid chat configuration: {0}")]
    InvalidChatConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const SECRET: &str = "test-secret-key-with-at-least-32-characters";

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.jwt.secret = SECRET.to_string();
        config
    }

    #[test]
    fn defaults_select_in_memory_store() {
        let config = valid();
        assert!(config.uses_in_memory_store());
        assert!(config.validate().is_ok());
        assert!(config.sanitize().contains("in-memory"));
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut config = valid();
        config.jwt.secret = "short".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidJwtSecret(_))
        ));
    }

    #[test]
    fn zero_port_and_pool_are_rejected() {
        let mut config = valid();
        config.server.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServerPort(_))
        ));

        let mut config = valid();
        config.database.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDatabaseConfig(_))
        ));
    }

    #[test]
    fn default_page_size_cannot_exceed_max() {
        let mut config = valid();
        config.chat.default_page_size = 200;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChatConfig(_))
        ));
    }

    #[test]
    fn sanitize_hides_credentials() {
        let mut config = valid();
        config.database.url = "postgres://admin:hunter2@db:5432/chat".into();
        let text = config.sanitize();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("db:5432/chat"));
        assert!(!text.contains(SECRET));
    }

    #[test]
    fn prefixed_env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_JWT__SECRET", SECRET);
            jail.set_env("APP_SERVER__PORT", "9100");
            jail.set_env("APP_CHAT__MAX_PAGE_SIZE", "75");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.chat.max_page_size, 75);
            assert_eq!(config.jwt.secret, SECRET);
            Ok(())
        });
    }

    #[test]
    fn legacy_variables_are_honoured() {
        Jail::expect_with(|jail| {
            jail.set_env("DATABASE_URL", "postgres://u:p@db/chat");
            jail.set_env("JWT_SECRET", SECRET);
            jail.set_env("PORT", "4000");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.database.url, "postgres://u:p@db/chat");
            assert_eq!(config.server.port, 4000);
            assert!(!config.uses_in_memory_store());
            Ok(())
        });
    }

    #[test]
    fn config_file_is_merged_below_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chat.toml",
                r#"
                [server]
                host = "0.0.0.0"
                port = 8088

                [jwt]
                secret = "file-secret-key-with-at-least-32-characters"
                expiration_hours = 12
                "#,
            )?;
            jail.set_env("APP_CONFIG_FILE", "chat.toml");
            jail.set_env("APP_SERVER__PORT", "8099");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 8099);
            assert_eq!(config.jwt.expiration_hours, 12);
            Ok(())
        });
    }

    #[test]
    fn short_env_secret_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("JWT_SECRET", "too-short");
            assert!(matches!(
                AppConfig::load(),
                Err(ConfigError::InvalidJwtSecret(_))
            ));
            Ok(())
        });
    }
}
