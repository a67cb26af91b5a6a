use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub pool_size: usize,
    pub pool_acquire_timeout: Duration,
    pub busy_timeout: Duration,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            pool_size: 4,
            pool_acquire_timeout: Duration::from_millis(5000),
            busy_timeout: Duration::from_millis(5000),
            log_filter: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unparsable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let u64_or = |name: &str, default: u64| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let workspace = lookup("SCHOOLD_WORKSPACE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let pool_size = u64_or("SCHOOLD_POOL_SIZE", defaults.pool_size as u64).max(1) as usize;
        let pool_acquire_timeout = Duration::from_millis(u64_or(
            "SCHOOLD_POOL_ACQUIRE_TIMEOUT_MS",
            defaults.pool_acquire_timeout.as_millis() as u64,
        ));
        let busy_timeout = Duration::from_millis(u64_or(
            "SCHOOLD_BUSY_TIMEOUT_MS",
            defaults.busy_timeout.as_millis() as u64,
        ));
        let log_filter = lookup("SCHOOLD_LOG")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.log_filter);
        let log_format = match lookup("SCHOOLD_LOG_FORMAT").as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            workspace,
            pool_size,
            pool_acquire_timeout,
            busy_timeout,
            log_filter,
            log_format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[]));
        assert_eq!(cfg.workspace, None);
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn overrides_are_parsed_and_bad_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("SCHOOLD_WORKSPACE", "/tmp/school"),
            ("SCHOOLD_POOL_SIZE", "0"),
            ("SCHOOLD_BUSY_TIMEOUT_MS", "abc"),
            ("SCHOOLD_POOL_ACQUIRE_TIMEOUT_MS", "250"),
            ("SCHOOLD_LOG", "schoold=debug"),
            ("SCHOOLD_LOG_FORMAT", "json"),
        ]));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/school")));
        assert_eq!(cfg.pool_size, 1);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.pool_acquire_timeout, Duration::from_millis(250));
        assert_eq!(cfg.log_filter, "schoold=debug");
        assert_eq!(cfg.log_format, LogFormat::Json);
    }
}
