use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_FEED_URL: &str = "ws://localhost:3000/kitchen";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Resolved client settings: where the API and the kitchen channel live and
/// where credentials are persisted.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_base_url: Url,
    pub feed_url: Url,
    pub request_timeout: Duration,
    pub state_dir: PathBuf,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("client configuration invalid: {0}")]
    Invalid(String),
}

impl ClientSettings {
    /// Reads `bistro.yaml` when present, then applies `BISTRO_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let section = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                let config: BistroConfig = serde_yaml::from_str(&contents)
                    .map_err(|err| ConfigError::Invalid(format!("invalid bistro.yaml: {err}")))?;
                config.client.unwrap_or_default()
            }
            None => ClientSection::default(),
        };
        resolve_client_settings(section.with_env_overrides(|key| std::env::var(key).ok()))
    }
}

fn resolve_client_settings(section: ClientSection) -> Result<ClientSettings, ConfigError> {
    let api_base_url = parse_url(
        "api_url",
        section.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
        &["http", "https"],
    )?;
    let feed_url = parse_url(
        "feed_url",
        section.feed_url.as_deref().unwrap_or(DEFAULT_FEED_URL),
        &["ws", "wss"],
    )?;
    let timeout_secs = section.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "request_timeout_secs must be greater than zero".to_string(),
        ));
    }
    let state_dir = section
        .state_dir
        .map(PathBuf::from)
        .unwrap_or_else(default_state_dir);
    Ok(ClientSettings {
        api_base_url,
        feed_url,
        request_timeout: Duration::from_secs(timeout_secs),
        state_dir,
    })
}

fn parse_url(field: &str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| ConfigError::Invalid(format!("{field} `{raw}` is not a URL: {err}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Invalid(format!(
            "{field} must use one of {schemes:?}, got `{}`",
            url.scheme()
        )));
    }
    Ok(url)
}

fn locate_config_file() -> Option<PathBuf> {
    bistro_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn bistro_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("bistro");
        paths.push(config_dir.join("bistro.yaml"));
        paths.push(config_dir.join("bistro.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".bistro").join("bistro.yaml"));
        paths.push(home_dir.join(".bistro").join("bistro.yml"));
    } else {
        paths.push(PathBuf::from("bistro.yaml"));
        paths.push(PathBuf::from("bistro.yml"));
    }
    paths
}

fn default_state_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.data_local_dir().join("bistro")
    } else {
        PathBuf::from(".bistro")
    }
}

#[derive(Debug, Deserialize)]
struct BistroConfig {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    feed_url: Option<String>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    state_dir: Option<String>,
}

impl ClientSection {
    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("BISTRO_API_URL") {
            self.api_url = Some(value);
        }
        if let Some(value) = lookup("BISTRO_FEED_URL") {
            self.feed_url = Some(value);
        }
        if let Some(value) = lookup("BISTRO_STATE_DIR") {
            self.state_dir = Some(value);
        }
        if let Some(value) = lookup("BISTRO_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = Some(value);
        }
        self
    }
}
