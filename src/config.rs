use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Database,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "database" => Ok(StoreBackend::Database),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expires_in: i64, // seconds
}

/// How the Membership Gate decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MembershipMode {
    /// Channel membership via the Bot API; requires `bot_token` and `channel`.
    #[default]
    Channel,
    /// 所有人都视为成员, 仅用于本地运行
    Open,
}

impl std::str::FromStr for MembershipMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "channel" => Ok(MembershipMode::Channel),
            "open" => Ok(MembershipMode::Open),
            other => Err(format!("unknown membership mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// 为空时不发送 Telegram 消息, 广播只写日志
    #[serde(default)]
    pub bot_token: String,
    /// Channel whose members may use the bot, e.g. `@my_channel`.
    #[serde(default)]
    pub channel: String,
    #[serde(default = "default_telegram_api")]
    pub api_base_url: String,
    #[serde(default)]
    pub membership: MembershipMode,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel: String::new(),
            api_base_url: default_telegram_api(),
            membership: MembershipMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// The single administrator identity allowed to run admin operations.
    pub admin_user_id: i64,
    /// Conflicting commits are re-read and retried up to this many times.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_generate_count")]
    pub max_generate_count: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            admin_user_id: 0,
            max_attempts: default_max_attempts(),
            max_generate_count: default_max_generate_count(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_max_attempts() -> u32 {
    32
}

fn default_max_generate_count() -> u32 {
    100
}

const PLACEHOLDER_SECRETS: &[&str] = &["change-me-in-production", "secret", "changeme"];

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::from_env_defaults()?,
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        // 环境变量覆盖（即便文件存在时也覆盖）
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        toml::from_str(config_str).map_err(|e| format!("Failed to parse config file: {e}").into())
    }

    fn from_env_defaults() -> Result<Self, Box<dyn std::error::Error>> {
        let backend: StoreBackend = get_env_parse("STORE_BACKEND", StoreBackend::Database);

        // 数据库后端在无配置文件时必须提供 DATABASE_URL
        let database_url = get_env("DATABASE_URL").unwrap_or_default();
        if backend == StoreBackend::Database && database_url.is_empty() {
            return Err("DATABASE_URL is not set and config.toml was not found".into());
        }

        Ok(Config {
            server: ServerConfig {
                host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: get_env_parse("PORT", 8080u16),
            },
            store: StoreConfig { backend },
            database: DatabaseConfig {
                url: database_url,
                max_connections: get_env_parse("DB_MAX_CONNECTIONS", default_max_connections()),
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET").unwrap_or_default(),
                access_token_expires_in: get_env_parse("JWT_ACCESS_EXPIRES_IN", 7200i64),
            },
            telegram: TelegramConfig {
                bot_token: get_env("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
                channel: get_env("TELEGRAM_CHANNEL").unwrap_or_default(),
                api_base_url: get_env("TELEGRAM_API_BASE_URL")
                    .unwrap_or_else(default_telegram_api),
                membership: get_env_parse("TELEGRAM_MEMBERSHIP", MembershipMode::Channel),
            },
            ledger: LedgerConfig {
                admin_user_id: get_env_parse("ADMIN_USER_ID", 0i64),
                max_attempts: get_env_parse("LEDGER_MAX_ATTEMPTS", default_max_attempts()),
                max_generate_count: get_env_parse(
                    "LEDGER_MAX_GENERATE_COUNT",
                    default_max_generate_count(),
                ),
            },
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("STORE_BACKEND")
            && let Ok(b) = v.parse()
        {
            self.store.backend = b;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("JWT_ACCESS_EXPIRES_IN")
            && let Ok(n) = v.parse()
        {
            self.jwt.access_token_expires_in = n;
        }
        if let Ok(v) = env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Ok(v) = env::var("TELEGRAM_CHANNEL") {
            self.telegram.channel = v;
        }
        if let Ok(v) = env::var("TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = v;
        }
        if let Ok(v) = env::var("TELEGRAM_MEMBERSHIP")
            && let Ok(m) = v.parse()
        {
            self.telegram.membership = m;
        }
        if let Ok(v) = env::var("ADMIN_USER_ID")
            && let Ok(id) = v.parse()
        {
            self.ledger.admin_user_id = id;
        }
        if let Ok(v) = env::var("LEDGER_MAX_ATTEMPTS")
            && let Ok(n) = v.parse()
        {
            self.ledger.max_attempts = n;
        }
        if let Ok(v) = env::var("LEDGER_MAX_GENERATE_COUNT")
            && let Ok(n) = v.parse()
        {
            self.ledger.max_generate_count = n;
        }
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        // 令牌的 sub 是唯一的身份凭证, 密钥不能为空或使用公开的占位值
        let secret = self.jwt.secret.trim();
        if secret.is_empty() || PLACEHOLDER_SECRETS.contains(&secret) {
            return Err("jwt.secret must be set to a private value".into());
        }
        if self.telegram.membership == MembershipMode::Channel
            && (self.telegram.bot_token.is_empty() || self.telegram.channel.is_empty())
        {
            return Err(
                "telegram.bot_token and telegram.channel are required unless telegram.membership = \"open\""
                    .into(),
            );
        }
        if self.store.backend == StoreBackend::Database && self.database.url.is_empty() {
            return Err("database.url is required for the database store backend".into());
        }
        if self.ledger.max_attempts == 0 {
            return Err("ledger.max_attempts must be at least 1".into());
        }
        if self.ledger.max_generate_count == 0 {
            return Err("ledger.max_generate_count must be at least 1".into());
        }
        Ok(())
    }
}
