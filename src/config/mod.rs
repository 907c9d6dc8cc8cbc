use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::net::IpAddr;
use std::path::Path;

use crate::security::rate_limit::RateLimit;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    #[error("Insecure configuration: {0}")]
    Insecure(&'static str),
}

/// Signing secret of the development preset; never valid elsewhere
pub const DEVELOPMENT_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub supabase: SupabaseConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enable_rate_limiting: bool,
    pub default_rate_limit: RateLimit,
    /// Per-route ceilings keyed by route name, e.g. `nodes.create`
    pub route_limits: BTreeMap<String, RateLimit>,
    /// Upper bound on tracked (client, route) windows
    pub rate_limit_max_keys: u64,
    pub max_request_size_bytes: usize,
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub enable_security_test_endpoint: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub enable_security_headers: bool,
    pub block_suspicious_agents: bool,
    pub enable_audit_logging: bool,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    /// bcrypt cost for locally managed accounts
    pub password_hash_cost: u32,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub service_role_key: Option<String>,
    pub timeout_secs: u64,
}

/// Optional YAML overlay named by `KAGRA_CONFIG_FILE`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileOverrides {
    pub rate_limits: BTreeMap<String, RateLimit>,
    pub default_rate_limit: Option<RateLimit>,
    pub cors_origins: Option<Vec<String>>,
}

/// Default ceilings for every named route
pub const ROUTE_LIMITS: [(&str, u32); 39] = [
    ("root", 60),
    ("health", 120),
    ("security.test", 10),
    ("auth.register", 3),
    ("auth.login", 5),
    ("auth.logout", 10),
    ("auth.refresh", 10),
    ("auth.me", 30),
    ("nodes.list", 60),
    ("nodes.create", 5),
    ("nodes.get", 60),
    ("nodes.update", 10),
    ("nodes.delete", 5),
    ("nodes.blocks", 30),
    ("blocks.create", 5),
    ("blocks.reorder", 10),
    ("blocks.get", 60),
    ("blocks.update", 10),
    ("blocks.delete", 5),
    ("blocks.theme", 15),
    ("themes.list", 30),
    ("themes.create", 5),
    ("themes.get", 60),
    ("themes.update", 10),
    ("themes.delete", 5),
    ("themes.blocks", 30),
    ("activity", 20),
    ("search", 30),
    ("users.me", 100),
    ("users.update", 10),
    ("users.list", 30),
    ("users.get", 30),
    ("users.permissions", 30),
    ("admin.overview", 20),
    ("admin.users", 20),
    ("admin.role", 5),
    ("admin.permissions", 10),
    ("admin.grant", 5),
    ("admin.revoke", 5),
];

fn default_route_limits() -> BTreeMap<String, RateLimit> {
    ROUTE_LIMITS
        .iter()
        .map(|(route, per_minute)| (route.to_string(), RateLimit::per_minute(*per_minute)))
        .collect()
}

impl ApiConfig {
    pub fn limit_for(&self, route: &str) -> RateLimit {
        self.route_limits
            .get(route)
            .copied()
            .unwrap_or(self.default_rate_limit)
    }
}

impl AppConfig {
    /// Presets, then environment variables, then the optional YAML overlay.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_env();

        if let Ok(path) = env::var("KAGRA_CONFIG_FILE") {
            let overrides = FileOverrides::from_path(&path)?;
            config.apply_file(overrides);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        Self::for_environment(environment).with_env_overrides()
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("API_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("API_PORT").or_else(|_| env::var("PORT")) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("API_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = env::var("API_LOG_FORMAT") {
            self.server.log_format = match v.as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => self.server.log_format,
            };
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("KAGRA_STORE") {
            self.database.backend = match v.as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" => StoreBackend::Postgres,
                _ => self.database.backend,
            };
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // API overrides
        if let Ok(v) = env::var("API_ENABLE_RATE_LIMITING") {
            self.api.enable_rate_limiting = v.parse().unwrap_or(self.api.enable_rate_limiting);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }
        if let Ok(v) = env::var("API_ENABLE_SECURITY_TEST") {
            self.api.enable_security_test_endpoint =
                v.parse().unwrap_or(self.api.enable_security_test_endpoint);
        }
        if let Ok(v) = env::var("RATE_LIMIT_MAX_KEYS") {
            self.api.rate_limit_max_keys = v.parse().unwrap_or(self.api.rate_limit_max_keys);
        }
        if let Ok(v) = env::var("RATE_LIMIT_DEFAULT") {
            self.api.default_rate_limit = v.parse().unwrap_or(self.api.default_rate_limit);
        }
        // RATE_LIMIT_NODES_CREATE=10/minute overrides route "nodes.create"
        for (route, _) in ROUTE_LIMITS {
            let key = format!("RATE_LIMIT_{}", route.replace('.', "_").to_uppercase());
            if let Ok(v) = env::var(&key) {
                match v.parse::<RateLimit>() {
                    Ok(limit) => {
                        self.api.route_limits.insert(route.to_string(), limit);
                    }
                    Err(e) => tracing::warn!(key = %key, error = %e, "Ignoring invalid rate limit override"),
                }
            }
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS").or_else(|_| env::var("CORS_ORIGINS_STR")) {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_HEADERS") {
            self.security.enable_security_headers =
                v.parse().unwrap_or(self.security.enable_security_headers);
        }
        if let Ok(v) = env::var("SECURITY_BLOCK_SUSPICIOUS_AGENTS") {
            self.security.block_suspicious_agents =
                v.parse().unwrap_or(self.security.block_suspicious_agents);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = v.parse().unwrap_or(self.security.enable_audit_logging);
        }
        if let Ok(v) = env::var("SECURITY_JWT_SECRET")
            .or_else(|_| env::var("SUPABASE_JWT_SECRET"))
            .or_else(|_| env::var("JWT_SECRET_KEY"))
        {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_PASSWORD_HASH_COST") {
            self.security.password_hash_cost = v.parse().unwrap_or(self.security.password_hash_cost);
        }
        // SECURITY_TRUSTED_PROXIES=10.0.0.1,10.0.0.2
        if let Ok(v) = env::var("SECURITY_TRUSTED_PROXIES") {
            self.security.trusted_proxies = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        tracing::warn!(proxy = %s, "Ignoring invalid trusted proxy address");
                        None
                    }
                })
                .collect();
        }

        // Supabase overrides
        if let Ok(v) = env::var("SUPABASE_URL") {
            self.supabase.url = Some(v);
        }
        if let Ok(v) = env::var("SUPABASE_ANON_KEY") {
            self.supabase.anon_key = Some(v);
        }
        if let Ok(v) = env::var("SUPABASE_SERVICE_ROLE_KEY") {
            self.supabase.service_role_key = Some(v);
        }
        if let Ok(v) = env::var("SUPABASE_TIMEOUT_SECS") {
            self.supabase.timeout_secs = v.parse().unwrap_or(self.supabase.timeout_secs);
        }

        self
    }

    pub fn apply_file(&mut self, overrides: FileOverrides) {
        if let Some(limit) = overrides.default_rate_limit {
            self.api.default_rate_limit = limit;
        }
        for (route, limit) in overrides.rate_limits {
            self.api.route_limits.insert(route, limit);
        }
        if let Some(origins) = overrides.cors_origins {
            self.security.cors_origins = origins;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.backend == StoreBackend::Postgres {
            let raw = self
                .database
                .url
                .as_deref()
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            url::Url::parse(raw).map_err(|_| ConfigError::InvalidDatabaseUrl)?;
        }
        if self.is_production() && self.security.jwt_secret.is_empty() && self.supabase.url.is_none() {
            return Err(ConfigError::Missing("SUPABASE_URL or SECURITY_JWT_SECRET"));
        }
        if !self.is_development() && self.security.jwt_secret == DEVELOPMENT_JWT_SECRET {
            return Err(ConfigError::Insecure("SECURITY_JWT_SECRET is the development default"));
        }
        Ok(())
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                log_level: "debug".to_string(),
                log_format: LogFormat::Pretty,
            },
            database: DatabaseConfig {
                backend: StoreBackend::Memory,
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig {
                enable_rate_limiting: true,
                default_rate_limit: RateLimit::per_minute(60),
                route_limits: default_route_limits(),
                rate_limit_max_keys: 100_000,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
                default_page_size: 100,
                max_page_size: 1000,
                enable_security_test_endpoint: true,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:3001".to_string(),
                    "http://localhost:3002".to_string(),
                ],
                enable_security_headers: true,
                block_suspicious_agents: false,
                enable_audit_logging: true,
                jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                password_hash_cost: 10,
                trusted_proxies: Vec::new(),
            },
            supabase: SupabaseConfig {
                url: None,
                anon_key: None,
                service_role_key: None,
                timeout_secs: 10,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                log_level: "info".to_string(),
                log_format: LogFormat::Json,
            },
            database: DatabaseConfig {
                backend: StoreBackend::Postgres,
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            api: ApiConfig {
                enable_rate_limiting: true,
                default_rate_limit: RateLimit::per_minute(60),
                route_limits: default_route_limits(),
                rate_limit_max_keys: 100_000,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
                default_page_size: 50,
                max_page_size: 200,
                enable_security_test_endpoint: false,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://tenant.kagra.space".to_string()],
                enable_security_headers: true,
                block_suspicious_agents: false,
                enable_audit_logging: true,
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                password_hash_cost: bcrypt::DEFAULT_COST,
                trusted_proxies: Vec::new(),
            },
            supabase: SupabaseConfig {
                url: None,
                anon_key: None,
                service_role_key: None,
                timeout_secs: 10,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                log_level: "warn".to_string(),
                log_format: LogFormat::Json,
            },
            database: DatabaseConfig {
                backend: StoreBackend::Postgres,
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            api: ApiConfig {
                enable_rate_limiting: true,
                default_rate_limit: RateLimit::per_minute(60),
                route_limits: default_route_limits(),
                rate_limit_max_keys: 100_000,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
                default_page_size: 20,
                max_page_size: 100,
                enable_security_test_endpoint: false,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec![
                    "https://kagra.space".to_string(),
                    "https://system.kagra.space".to_string(),
                    "https://tenant.kagra.space".to_string(),
                ],
                enable_security_headers: true,
                block_suspicious_agents: true,
                enable_audit_logging: true,
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                password_hash_cost: bcrypt::DEFAULT_COST,
                trusted_proxies: Vec::new(),
            },
            supabase: SupabaseConfig {
                url: None,
                anon_key: None,
                service_role_key: None,
                timeout_secs: 5,
            },
        }
    }
}

impl FileOverrides {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}
