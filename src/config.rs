use std::{env, net::SocketAddr, num::NonZeroUsize, path::PathBuf, time::Duration};

use thiserror::Error;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

/// Config with the required keys set, optional collaborators unset and
/// `extra` applied on top.
#[cfg(test)]
pub(crate) fn test_config(extra: &[(&str, &str)]) -> Config {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    // SAFETY: test code adjusts deterministic environment state sequentially.
    unsafe {
        for key in [
            "NOTION_API_KEY",
            "NOTION_PLACES_DB_ID",
            "NOTION_SOURCE_DB_ID",
            "TRANSCRIPTION_BASE_URL",
            "VISION_API_KEY",
            "WANDR_SWEEP_ENABLED",
        ] {
            env::remove_var(key);
        }
        env::set_var("GEMINI_API_KEY", "gemini-key");
        env::set_var("GOOGLE_MAPS_API_KEY", "maps-key");
        for (key, value) in extra {
            env::set_var(key, value);
        }
    }
    let config = Config::from_env().expect("config loads");
    // SAFETY: as above.
    unsafe {
        for (key, _) in extra {
            env::remove_var(key);
        }
    }
    config
}

/// Immutable worker settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    output_dir: PathBuf,
    frame_interval_secs: f64,
    max_frames: usize,
    batch_concurrency: NonZeroUsize,
    provider_max_concurrency: NonZeroUsize,
    sweep_enabled: bool,
    sweep_hour: u32,
    sweep_minute: u32,
    sweep_utc_offset_hours: i32,
    http_max_retries: usize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
    http_connect_timeout: Duration,
    provider_timeout: Duration,
    download_timeout: Duration,
    transcription_timeout: Duration,
    ytdlp_path: PathBuf,
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    transcription_base_url: Option<String>,
    vision_api_key: Option<String>,
    vision_base_url: String,
    gemini_api_key: String,
    gemini_model: String,
    gemini_base_url: String,
    google_maps_api_key: String,
    places_base_url: String,
    notion_api_key: Option<String>,
    notion_places_db_id: Option<String>,
    notion_source_db_id: Option<String>,
    notion_base_url: String,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数からワーカーの設定値を読み込み、検証する。
    ///
    /// 任意の外部サービス（文字起こし、OCR、Notion）は未設定なら無効として扱う。
    ///
    /// # Errors
    /// `GEMINI_API_KEY` / `GOOGLE_MAPS_API_KEY` が未設定、もしくは各種値のパースに失敗した場合は
    /// [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let gemini_api_key = env_var("GEMINI_API_KEY")?;
        let google_maps_api_key = env_var("GOOGLE_MAPS_API_KEY")?;
        let http_bind = parse_socket_addr("WANDR_HTTP_BIND", "0.0.0.0:8080")?;
        let output_dir = PathBuf::from(env_or("WANDR_OUTPUT_DIR", "results"));

        // OCR frame sampling
        let frame_interval_secs = parse_positive_f64("WANDR_FRAME_INTERVAL_SECS", 3.0)?;
        let max_frames = parse_usize("WANDR_MAX_FRAMES", 8)?;

        let batch_concurrency = parse_non_zero_usize("WANDR_BATCH_CONCURRENCY", 1)?;
        let provider_max_concurrency = parse_non_zero_usize("WANDR_PROVIDER_MAX_CONCURRENCY", 4)?;

        // Scheduled pending sweep
        let sweep_enabled = parse_bool("WANDR_SWEEP_ENABLED", true)?;
        let sweep_hour = parse_bounded_u32("WANDR_SWEEP_HOUR", 6, 23)?;
        let sweep_minute = parse_bounded_u32("WANDR_SWEEP_MINUTE", 0, 59)?;
        let sweep_utc_offset_hours = parse_utc_offset("WANDR_SWEEP_UTC_OFFSET_HOURS", 0)?;

        // Retry settings (exponential backoff + jitter)
        let http_max_retries = parse_usize("HTTP_MAX_RETRIES", 3)?;
        let http_backoff_base_ms = parse_u64("HTTP_BACKOFF_BASE_MS", 1000)?;
        let http_backoff_cap_ms = parse_u64("HTTP_BACKOFF_CAP_MS", 10000)?;

        let http_connect_timeout = parse_duration_ms("HTTP_CONNECT_TIMEOUT_MS", 3000)?;
        let provider_timeout = parse_duration_secs("PROVIDER_TIMEOUT_SECS", 30)?;
        let download_timeout = parse_duration_secs("DOWNLOAD_TIMEOUT_SECS", 180)?;
        let transcription_timeout = parse_duration_secs("TRANSCRIPTION_TIMEOUT_SECS", 300)?;

        let ytdlp_path = PathBuf::from(env_or("YTDLP_PATH", "yt-dlp"));
        let ffmpeg_path = PathBuf::from(env_or("FFMPEG_PATH", "ffmpeg"));
        let ffprobe_path = PathBuf::from(env_or("FFPROBE_PATH", "ffprobe"));

        // Optional collaborators
        let transcription_base_url = optional_env("TRANSCRIPTION_BASE_URL");
        let vision_api_key = optional_env("VISION_API_KEY");
        let vision_base_url = env_or("VISION_BASE_URL", "https://vision.googleapis.com/");

        let gemini_model = env_or("GEMINI_MODEL", "gemini-1.5-flash");
        let gemini_base_url = env_or(
            "GEMINI_BASE_URL",
            "https://generativelanguage.googleapis.com/",
        );
        let places_base_url = env_or("PLACES_BASE_URL", "https://maps.googleapis.com/");

        let notion_api_key = optional_env("NOTION_API_KEY");
        let notion_places_db_id = optional_env("NOTION_PLACES_DB_ID");
        let notion_source_db_id = optional_env("NOTION_SOURCE_DB_ID");
        let notion_base_url = env_or("NOTION_BASE_URL", "https://api.notion.com/");

        // OpenTelemetry settings
        let otel_exporter_endpoint = optional_env("OTEL_EXPORTER_OTLP_ENDPOINT");
        let otel_sampling_ratio = parse_f64("OTEL_SAMPLING_RATIO", 1.0)?;

        Ok(Self {
            http_bind,
            output_dir,
            frame_interval_secs,
            max_frames,
            batch_concurrency,
            provider_max_concurrency,
            sweep_enabled,
            sweep_hour,
            sweep_minute,
            sweep_utc_offset_hours,
            http_max_retries,
            http_backoff_base_ms,
            http_backoff_cap_ms,
            http_connect_timeout,
            provider_timeout,
            download_timeout,
            transcription_timeout,
            ytdlp_path,
            ffmpeg_path,
            ffprobe_path,
            transcription_base_url,
            vision_api_key,
            vision_base_url,
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            google_maps_api_key,
            places_base_url,
            notion_api_key,
            notion_places_db_id,
            notion_source_db_id,
            notion_base_url,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    /// Command-line overrides applied on top of the environment.
    #[must_use]
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    #[must_use]
    pub fn with_frame_sampling(mut self, interval_secs: Option<f64>, max_frames: Option<usize>) -> Self {
        if let Some(interval) = interval_secs.filter(|i| i.is_finite() && *i > 0.0) {
            self.frame_interval_secs = interval;
        }
        if let Some(max_frames) = max_frames {
            self.max_frames = max_frames;
        }
        self
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    #[must_use]
    pub fn frame_interval_secs(&self) -> f64 {
        self.frame_interval_secs
    }

    #[must_use]
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    #[must_use]
    pub fn batch_concurrency(&self) -> NonZeroUsize {
        self.batch_concurrency
    }

    #[must_use]
    pub fn provider_max_concurrency(&self) -> NonZeroUsize {
        self.provider_max_concurrency
    }

    #[must_use]
    pub fn sweep_enabled(&self) -> bool {
        self.sweep_enabled
    }

    #[must_use]
    pub fn sweep_hour(&self) -> u32 {
        self.sweep_hour
    }

    #[must_use]
    pub fn sweep_minute(&self) -> u32 {
        self.sweep_minute
    }

    #[must_use]
    pub fn sweep_utc_offset_hours(&self) -> i32 {
        self.sweep_utc_offset_hours
    }

    #[must_use]
    pub fn http_max_retries(&self) -> usize {
        self.http_max_retries
    }

    #[must_use]
    pub fn http_backoff_base_ms(&self) -> u64 {
        self.http_backoff_base_ms
    }

    #[must_use]
    pub fn http_backoff_cap_ms(&self) -> u64 {
        self.http_backoff_cap_ms
    }

    #[must_use]
    pub fn http_connect_timeout(&self) -> Duration {
        self.http_connect_timeout
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        self.download_timeout
    }

    #[must_use]
    pub fn transcription_timeout(&self) -> Duration {
        self.transcription_timeout
    }

    #[must_use]
    pub fn ytdlp_path(&self) -> &std::path::Path {
        &self.ytdlp_path
    }

    #[must_use]
    pub fn ffmpeg_path(&self) -> &std::path::Path {
        &self.ffmpeg_path
    }

    #[must_use]
    pub fn ffprobe_path(&self) -> &std::path::Path {
        &self.ffprobe_path
    }

    #[must_use]
    pub fn transcription_base_url(&self) -> Option<&str> {
        self.transcription_base_url.as_deref()
    }

    #[must_use]
    pub fn vision_api_key(&self) -> Option<&str> {
        self.vision_api_key.as_deref()
    }

    #[must_use]
    pub fn vision_base_url(&self) -> &str {
        &self.vision_base_url
    }

    #[must_use]
    pub fn gemini_api_key(&self) -> &str {
        &self.gemini_api_key
    }

    #[must_use]
    pub fn gemini_model(&self) -> &str {
        &self.gemini_model
    }

    #[must_use]
    pub fn gemini_base_url(&self) -> &str {
        &self.gemini_base_url
    }

    #[must_use]
    pub fn google_maps_api_key(&self) -> &str {
        &self.google_maps_api_key
    }

    #[must_use]
    pub fn places_base_url(&self) -> &str {
        &self.places_base_url
    }

    #[must_use]
    pub fn notion_api_key(&self) -> Option<&str> {
        self.notion_api_key.as_deref()
    }

    #[must_use]
    pub fn notion_places_db_id(&self) -> Option<&str> {
        self.notion_places_db_id.as_deref()
    }

    #[must_use]
    pub fn notion_source_db_id(&self) -> Option<&str> {
        self.notion_source_db_id.as_deref()
    }

    #[must_use]
    pub fn notion_base_url(&self) -> &str {
        &self.notion_base_url
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    optional_env(name).ok_or(ConfigError::Missing(name))
}

/// Unset and blank are the same thing here.
fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

fn invalid(name: &'static str, error: impl std::error::Error + Send + Sync + 'static) -> ConfigError {
    ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    }
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    env_or(name, default)
        .parse()
        .map_err(|error| invalid(name, error))
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(value))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    optional_env(name).map_or(Ok(default), |raw| {
        raw.parse::<usize>().map_err(|error| invalid(name, error))
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    optional_env(name).map_or(Ok(default), |raw| {
        raw.parse::<u64>().map_err(|error| invalid(name, error))
    })
}

fn parse_bounded_u32(name: &'static str, default: u32, max: u32) -> Result<u32, ConfigError> {
    let value = optional_env(name).map_or(Ok(default), |raw| {
        raw.parse::<u32>().map_err(|error| invalid(name, error))
    })?;
    if value > max {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be between 0 and {max}"),
        });
    }
    Ok(value)
}

fn parse_utc_offset(name: &'static str, default: i32) -> Result<i32, ConfigError> {
    let value = optional_env(name).map_or(Ok(default), |raw| {
        raw.parse::<i32>().map_err(|error| invalid(name, error))
    })?;
    if !(-12..=14).contains(&value) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("offset must be between -12 and 14 hours"),
        });
    }
    Ok(value)
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    optional_env(name).map_or(Ok(default), |raw| {
        raw.parse::<f64>().map_err(|error| invalid(name, error))
    })
}

fn parse_positive_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value = parse_f64(name, default)?;
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be a positive number"),
        });
    }
    Ok(value)
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = optional_env(name) else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &[&str] = &[
        "WANDR_HTTP_BIND",
        "WANDR_OUTPUT_DIR",
        "WANDR_FRAME_INTERVAL_SECS",
        "WANDR_MAX_FRAMES",
        "WANDR_BATCH_CONCURRENCY",
        "WANDR_PROVIDER_MAX_CONCURRENCY",
        "WANDR_SWEEP_ENABLED",
        "WANDR_SWEEP_HOUR",
        "WANDR_SWEEP_MINUTE",
        "WANDR_SWEEP_UTC_OFFSET_HOURS",
        "HTTP_MAX_RETRIES",
        "HTTP_BACKOFF_BASE_MS",
        "HTTP_BACKOFF_CAP_MS",
        "HTTP_CONNECT_TIMEOUT_MS",
        "PROVIDER_TIMEOUT_SECS",
        "DOWNLOAD_TIMEOUT_SECS",
        "TRANSCRIPTION_TIMEOUT_SECS",
        "YTDLP_PATH",
        "FFMPEG_PATH",
        "FFPROBE_PATH",
        "TRANSCRIPTION_BASE_URL",
        "VISION_API_KEY",
        "VISION_BASE_URL",
        "GEMINI_API_KEY",
        "GEMINI_MODEL",
        "GEMINI_BASE_URL",
        "GOOGLE_MAPS_API_KEY",
        "PLACES_BASE_URL",
        "NOTION_API_KEY",
        "NOTION_PLACES_DB_ID",
        "NOTION_SOURCE_DB_ID",
        "NOTION_BASE_URL",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
        "OTEL_SAMPLING_RATIO",
    ];

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests run sequentially and assign valid UTF-8 values.
        unsafe {
            env::set_var(name, value);
        }
    }

    fn remove_env(name: &str) {
        // SAFETY: tests run sequentially and clean up deterministic keys.
        unsafe {
            env::remove_var(name);
        }
    }

    fn reset_env() {
        for key in KEYS {
            remove_env(key);
        }
    }

    fn set_required() {
        set_env("GEMINI_API_KEY", "gemini-key");
        set_env("GOOGLE_MAPS_API_KEY", "maps-key");
    }

    #[test]
    fn from_env_uses_defaults_when_optional_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.http_bind(), "0.0.0.0:8080".parse().expect("addr"));
        assert_eq!(config.output_dir(), std::path::Path::new("results"));
        assert!((config.frame_interval_secs() - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.max_frames(), 8);
        assert_eq!(config.batch_concurrency().get(), 1);
        assert_eq!(config.provider_max_concurrency().get(), 4);
        assert!(config.sweep_enabled());
        assert_eq!((config.sweep_hour(), config.sweep_minute()), (6, 0));
        assert_eq!(config.http_max_retries(), 3);
        assert_eq!(config.http_backoff_base_ms(), 1000);
        assert_eq!(config.http_backoff_cap_ms(), 10000);
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
        assert_eq!(config.download_timeout(), Duration::from_secs(180));
        assert_eq!(config.transcription_timeout(), Duration::from_secs(300));
        assert_eq!(config.ytdlp_path(), std::path::Path::new("yt-dlp"));
        assert_eq!(config.gemini_model(), "gemini-1.5-flash");
        assert_eq!(
            config.gemini_base_url(),
            "https://generativelanguage.googleapis.com/"
        );
        assert!(config.transcription_base_url().is_none());
        assert!(config.vision_api_key().is_none());
        assert!(config.notion_api_key().is_none());
        assert!(config.otel_exporter_endpoint().is_none());
        assert!((config.otel_sampling_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn from_env_overrides_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();
        set_env("WANDR_HTTP_BIND", "127.0.0.1:9090");
        set_env("WANDR_OUTPUT_DIR", "/var/lib/wandr");
        set_env("WANDR_MAX_FRAMES", "4");
        set_env("WANDR_BATCH_CONCURRENCY", "3");
        set_env("WANDR_SWEEP_ENABLED", "off");
        set_env("WANDR_SWEEP_UTC_OFFSET_HOURS", "9");
        set_env("HTTP_MAX_RETRIES", "5");
        set_env("TRANSCRIPTION_BASE_URL", "http://whisper:9000/");
        set_env("VISION_API_KEY", "vision-key");
        set_env("NOTION_API_KEY", "notion-key");
        set_env("NOTION_PLACES_DB_ID", "places");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.http_bind(), "127.0.0.1:9090".parse().expect("addr"));
        assert_eq!(config.output_dir(), std::path::Path::new("/var/lib/wandr"));
        assert_eq!(config.max_frames(), 4);
        assert_eq!(config.batch_concurrency().get(), 3);
        assert!(!config.sweep_enabled());
        assert_eq!(config.sweep_utc_offset_hours(), 9);
        assert_eq!(config.http_max_retries(), 5);
        assert_eq!(config.transcription_base_url(), Some("http://whisper:9000/"));
        assert_eq!(config.vision_api_key(), Some("vision-key"));
        assert_eq!(config.notion_api_key(), Some("notion-key"));
        assert_eq!(config.notion_places_db_id(), Some("places"));
        assert_eq!(config.notion_source_db_id(), None);
    }

    #[test]
    fn from_env_errors_when_gemini_key_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("GOOGLE_MAPS_API_KEY", "maps-key");

        let error = Config::from_env().expect_err("missing key should fail");

        assert!(matches!(error, ConfigError::Missing("GEMINI_API_KEY")));
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("GEMINI_API_KEY", "gemini-key");
        set_env("GOOGLE_MAPS_API_KEY", "   ");

        let error = Config::from_env().expect_err("blank key should fail");

        assert!(matches!(error, ConfigError::Missing("GOOGLE_MAPS_API_KEY")));
    }

    #[test]
    fn from_env_rejects_out_of_range_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();
        set_env("WANDR_SWEEP_HOUR", "24");

        let error = Config::from_env().expect_err("hour 24 should fail");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "WANDR_SWEEP_HOUR",
                ..
            }
        ));

        remove_env("WANDR_SWEEP_HOUR");
        set_env("WANDR_BATCH_CONCURRENCY", "0");
        let error = Config::from_env().expect_err("zero workers should fail");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "WANDR_BATCH_CONCURRENCY",
                ..
            }
        ));
    }

    #[test]
    fn cli_overrides_replace_sampling_settings() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();

        let config = Config::from_env()
            .expect("config should load")
            .with_output_dir("/tmp/out")
            .with_frame_sampling(Some(1.5), Some(2));

        assert_eq!(config.output_dir(), std::path::Path::new("/tmp/out"));
        assert!((config.frame_interval_secs() - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.max_frames(), 2);
    }
}
