use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub coupon: CouponConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 为空时允许任意来源
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expires_in: i64, // seconds
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponConfig {
    /// 最低金额提示中使用的货币符号
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    #[serde(default = "default_generated_code_length")]
    pub generated_code_length: usize,
}

impl Default for CouponConfig {
    fn default() -> Self {
        Self {
            currency_symbol: default_currency_symbol(),
            generated_code_length: default_generated_code_length(),
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_currency_symbol() -> String {
    "₹".to_string()
}

fn default_generated_code_length() -> usize {
    8
}

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// 读取 `CONFIG_PATH`(默认 `config.toml`)，文件不存在时完全依赖环境变量；
    /// 环境变量始终覆盖文件中的值
    pub fn from_toml() -> AppResult<Self> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::from_toml_str(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::from_env_defaults()?,
            Err(e) => {
                return Err(AppError::ConfigError(format!(
                    "Failed to read config file {config_path}: {e}"
                )));
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> AppResult<Self> {
        toml::from_str(config_str)
            .map_err(|e| AppError::ConfigError(format!("Failed to parse config file: {e}")))
    }

    fn from_env_defaults() -> AppResult<Self> {
        // 无配置文件时数据库 URL 必须由环境变量提供
        let database_url = get_env("DATABASE_URL").ok_or_else(|| {
            AppError::ConfigError(
                "DATABASE_URL is not set and no config.toml was found".to_string(),
            )
        })?;

        Ok(Config {
            server: ServerConfig {
                host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: get_env_parse("SERVER_PORT").unwrap_or(8080),
                allowed_origins: Vec::new(),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: get_env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
                busy_timeout_ms: get_env_parse("DB_BUSY_TIMEOUT_MS")
                    .unwrap_or_else(default_busy_timeout_ms),
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET")
                    .unwrap_or_else(|| "change-me-in-production".to_string()),
                access_token_expires_in: get_env_parse("JWT_ACCESS_EXPIRES_IN").unwrap_or(7200),
            },
            coupon: CouponConfig::default(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = get_env("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(p) = get_env_parse("SERVER_PORT") {
            self.server.port = p;
        }
        if let Some(v) = get_env("CORS_ALLOWED_ORIGINS") {
            self.server.allowed_origins = parse_origins(&v);
        }
        if let Some(v) = get_env("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(mc) = get_env_parse("DB_MAX_CONNECTIONS") {
            self.database.max_connections = mc;
        }
        if let Some(ms) = get_env_parse("DB_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = ms;
        }
        if let Some(v) = get_env("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Some(n) = get_env_parse("JWT_ACCESS_EXPIRES_IN") {
            self.jwt.access_token_expires_in = n;
        }
        if let Some(v) = get_env("COUPON_CURRENCY_SYMBOL") {
            self.coupon.currency_symbol = v;
        }
        if let Some(n) = get_env_parse("COUPON_CODE_LENGTH") {
            self.coupon.generated_code_length = n;
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if !(3..=20).contains(&self.coupon.generated_code_length) {
            return Err(AppError::ConfigError(
                "coupon.generated_code_length must be between 3 and 20".to_string(),
            ));
        }
        if self.jwt.secret == "change-me-in-production" {
            log::warn!("JWT secret is the built-in default; set JWT_SECRET in production");
        }
        Ok(())
    }
}
