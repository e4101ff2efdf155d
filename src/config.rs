use config::{Config, ConfigBuilder, ConfigError, Environment, File, builder::DefaultState};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub torbox_api_key: String,
    pub torbox_api_base: String,
    pub torbox_api_version: String,
    pub watch_dir: PathBuf,
    pub download_dir: PathBuf,
    pub watch_interval: u64,
    pub check_interval: u64,
    pub max_retries: u32,
    pub allow_zip: bool,
    pub seed_preference: u8,
    pub post_processing: i32,
    pub queue_immediately: bool,
    pub progress_interval: u64,
    pub request_timeout: u64,
    pub log_level: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Self::defaults()?
            // Config file (optional)
            .add_source(File::with_name("config").required(false))
            // Environment variables (e.g. TORBOX_API_KEY=..., WATCH_INTERVAL=30)
            .add_source(Environment::default().try_parsing(true));

        Self::from_config(builder.build()?)
    }

    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("torbox_api_key", "")?
            .set_default("torbox_api_base", "https://api.torbox.app")?
            .set_default("torbox_api_version", "v1")?
            .set_default("watch_dir", "/app/watch")?
            .set_default("download_dir", "/app/downloads")?
            .set_default("watch_interval", 60)?
            .set_default("check_interval", 300)?
            .set_default("max_retries", 2)?
            .set_default("allow_zip", true)?
            .set_default("seed_preference", 1)?
            .set_default("post_processing", -1)?
            .set_default("queue_immediately", false)?
            .set_default("progress_interval", 15)?
            .set_default("request_timeout", 60)?
            .set_default("log_level", "info")
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.torbox_api_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "TORBOX_API_KEY is not set. Please provide a valid API key.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> String {
        format!(
            "{}/{}/api",
            self.torbox_api_base.trim_end_matches('/'),
            self.torbox_api_version
        )
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval)
    }

    pub fn progress_interval(&self) -> Duration {
        // A zero interval would make the reporter spin.
        Duration::from_secs(self.progress_interval.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        // Zero would fail every request immediately.
        Duration::from_secs(self.request_timeout.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(overrides: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let mut builder = Settings::defaults()?;
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        Settings::from_config(builder.build()?)
    }

    #[test]
    fn test_defaults_with_api_key() {
        let settings = build(&[("torbox_api_key", "secret")]).unwrap();
        assert_eq!(settings.torbox_api_key, "secret");
        assert_eq!(settings.api_base_url(), "https://api.torbox.app/v1/api");
        assert_eq!(settings.watch_dir, PathBuf::from("/app/watch"));
        assert_eq!(settings.download_dir, PathBuf::from("/app/downloads"));
        assert_eq!(settings.watch_interval, 60);
        assert_eq!(settings.check_interval, 300);
        assert_eq!(settings.max_retries, 2);
        assert!(settings.allow_zip);
        assert_eq!(settings.seed_preference, 1);
        assert_eq!(settings.post_processing, -1);
        assert!(!settings.queue_immediately);
        assert_eq!(settings.progress_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let err = build(&[]).unwrap_err();
        assert!(err.to_string().contains("TORBOX_API_KEY"));

        let err = build(&[("torbox_api_key", "   ")]).unwrap_err();
        assert!(err.to_string().contains("TORBOX_API_KEY"));
    }

    #[test]
    fn test_string_values_are_parsed() {
        let settings = build(&[
            ("torbox_api_key", "k"),
            ("torbox_api_base", "http://localhost:9000/"),
            ("torbox_api_version", "v2"),
            ("watch_interval", "5"),
            ("allow_zip", "false"),
            ("queue_immediately", "true"),
            ("progress_interval", "0"),
            ("request_timeout", "0"),
        ])
        .unwrap();
        assert_eq!(settings.api_base_url(), "http://localhost:9000/v2/api");
        assert_eq!(settings.watch_interval(), Duration::from_secs(5));
        assert!(!settings.allow_zip);
        assert!(settings.queue_immediately);
        assert_eq!(settings.progress_interval(), Duration::from_secs(1));
        assert_eq!(settings.request_timeout(), Duration::from_secs(1));
    }
}
