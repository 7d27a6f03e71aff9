use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Deadline for remote calls the UI is waiting on, in milliseconds.
    pub foreground_timeout_ms: u64,
    /// Deadline for background refreshes; never blocks a caller.
    pub background_timeout_ms: u64,
    pub auto_flush: bool,
    pub flush_interval_secs: u64,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub rules: Vec<RateLimitRule>,
    pub default_rule: RateLimitRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub pattern: String,
    pub window_ms: u64,
    pub max_requests: u32,
}

impl RateLimitRule {
    pub fn new(pattern: impl Into<String>, window_ms: u64, max_requests: u32) -> Self {
        Self {
            pattern: pattern.into(),
            window_ms,
            max_requests,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/fleetsync.db".to_string(),
                max_connections: 5,
                connection_timeout: 30,
            },
            sync: SyncConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            foreground_timeout_ms: 5_000,
            background_timeout_ms: 20_000,
            auto_flush: true,
            flush_interval_secs: 180, // 3 minutes
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 3_600,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                RateLimitRule::new("auth/login", 900_000, 5),
                RateLimitRule::new("auth/signup", 3_600_000, 3),
                RateLimitRule::new("auth/reset-password", 3_600_000, 3),
                RateLimitRule::new("trucks/write", 60_000, 20),
                RateLimitRule::new("maintenance/write", 60_000, 30),
                RateLimitRule::new("parts/write", 60_000, 25),
                RateLimitRule::new("suppliers/write", 60_000, 20),
                RateLimitRule::new("purchase_orders/write", 60_000, 20),
                RateLimitRule::new("notifications/write", 60_000, 30),
                RateLimitRule::new("export", 300_000, 3),
            ],
            default_rule: RateLimitRule::new("", 900_000, 100),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FLEETSYNC_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v;
            }
        }
        if let Ok(v) = std::env::var("FLEETSYNC_DB_MAX_CONNECTIONS") {
            if let Some(value) = parse_u32(&v) {
                cfg.database.max_connections = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("FLEETSYNC_FOREGROUND_TIMEOUT_MS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.foreground_timeout_ms = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("FLEETSYNC_BACKGROUND_TIMEOUT_MS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.background_timeout_ms = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("FLEETSYNC_AUTO_FLUSH") {
            cfg.sync.auto_flush = parse_bool(&v, cfg.sync.auto_flush);
        }
        if let Ok(v) = std::env::var("FLEETSYNC_FLUSH_INTERVAL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.flush_interval_secs = value.max(1);
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.sync.foreground_timeout_ms == 0 {
            return Err("Sync foreground_timeout_ms must be greater than 0".to_string());
        }
        if self.sync.background_timeout_ms < self.sync.foreground_timeout_ms {
            return Err(
                "Sync background_timeout_ms must not be shorter than foreground_timeout_ms"
                    .to_string(),
            );
        }
        if self.sync.flush_interval_secs == 0 {
            return Err("Sync flush_interval_secs must be greater than 0".to_string());
        }
        if self.sync.retry_max_delay_secs < self.sync.retry_base_delay_secs {
            return Err(
                "Sync retry_max_delay_secs must not be less than retry_base_delay_secs".to_string(),
            );
        }
        for rule in self
            .rate_limit
            .rules
            .iter()
            .chain(std::iter::once(&self.rate_limit.default_rule))
        {
            if rule.window_ms == 0 {
                return Err(format!(
                    "Rate limit rule '{}' window_ms must be greater than 0",
                    rule.pattern
                ));
            }
            if rule.max_requests == 0 {
                return Err(format!(
                    "Rate limit rule '{}' max_requests must be greater than 0",
                    rule.pattern
                ));
            }
        }
        Ok(())
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}
