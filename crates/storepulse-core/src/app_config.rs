use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub magento_request_timeout_secs: u64,
    pub magento_user_agent: String,
    pub sync_page_size: i64,
    pub sync_max_pages: i64,
    pub sync_retention_days: Option<i64>,
    pub sync_schedule_cron: Option<String>,
    pub sync_queue_depth: usize,
    pub db_write_max_retries: u32,
    pub db_write_backoff_base_ms: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field(
                "magento_request_timeout_secs",
                &self.magento_request_timeout_secs,
            )
            .field("magento_user_agent", &self.magento_user_agent)
            .field("sync_page_size", &self.sync_page_size)
            .field("sync_max_pages", &self.sync_max_pages)
            .field("sync_retention_days", &self.sync_retention_days)
            .field("sync_schedule_cron", &self.sync_schedule_cron)
            .field("sync_queue_depth", &self.sync_queue_depth)
            .field("db_write_max_retries", &self.db_write_max_retries)
            .field("db_write_backoff_base_ms", &self.db_write_backoff_base_ms)
            .finish()
    }
}
