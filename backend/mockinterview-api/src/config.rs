use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

impl CacheBackend {
    fn parse(value: &str) -> Result<Self, config::ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            other => Err(config::ConfigError::Message(format!(
                "unknown session cache backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub redis_uri: Option<String>,
    /// Expiry of cached sessions; `None` keeps them until completion.
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub environment: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub cache: CacheSettings,
    pub ai: AiSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, local .env as fallback
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let environment = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP__)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let lookup = |key: &str, var: &str| -> Option<String> {
            settings
                .get_string(key)
                .ok()
                .or_else(|| env::var(var).ok())
                .filter(|value| !value.trim().is_empty())
        };

        let mongo_uri = lookup("database.mongo_uri", "MONGO_URI")
            .unwrap_or_else(|| "mongodb://localhost:27017".to_string());

        let mongo_database = lookup("database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "mockinterview".to_string());

        let jwt_secret = match lookup("auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if environment == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let bind_addr =
            lookup("server.bind_addr", "BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8081".to_string());

        let backend = match lookup("cache.backend", "SESSION_CACHE_BACKEND") {
            Some(value) => CacheBackend::parse(&value)?,
            None => CacheBackend::Memory,
        };
        let redis_uri = lookup("cache.redis_uri", "REDIS_URI");
        if backend == CacheBackend::Redis && redis_uri.is_none() {
            return Err(config::ConfigError::Message(
                "REDIS_URI must be set when the session cache backend is redis".to_string(),
            ));
        }
        let ttl_seconds = parse_number(lookup("cache.ttl_seconds", "SESSION_CACHE_TTL_SECONDS"))?;

        let ai = AiSettings {
            api_url: lookup("ai.api_url", "AI_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: lookup("ai.api_key", "AI_API_KEY").unwrap_or_default(),
            model: lookup("ai.model", "AI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout_seconds: parse_number(lookup("ai.timeout_seconds", "AI_TIMEOUT_SECONDS"))?
                .unwrap_or(30),
        };
        if ai.api_key.is_empty() {
            eprintln!("WARNING: AI_API_KEY is not set, answers will get fallback ratings");
        }

        Ok(Config {
            environment,
            mongo_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            cache: CacheSettings {
                backend,
                redis_uri,
                ttl_seconds,
            },
            ai,
        })
    }
}

fn parse_number(value: Option<String>) -> Result<Option<u64>, config::ConfigError> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| config::ConfigError::Message(format!("invalid number {}: {}", raw, e)))
        })
        .transpose()
}
