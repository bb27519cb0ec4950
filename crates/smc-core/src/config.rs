use std::{
    env, fmt, fs,
    path::Path,
    sync::RwLock,
    time::Duration,
};

use crate::{errors::Error, throttle::ThrottleConfig, Result};

const DEFAULT_INSTANCE_ID: &str = "1";

/// Settings exactly as the host's settings store holds them.
///
/// Nothing is validated here; see [`ConnectorSettings::from_raw`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSettings {
    pub api_base_uri: Option<String>,
    pub api_key: Option<String>,
    pub bot_id: Option<String>,
    pub instance_id: Option<String>,
}

/// Validated connector settings. One driver is built per distinct value.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    pub api_base_uri: String,
    pub api_key: String,
    pub bot_id: String,
    pub instance_id: String,
}

impl fmt::Debug for ConnectorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSettings")
            .field("api_base_uri", &self.api_base_uri)
            .field("api_key", &"***")
            .field("bot_id", &self.bot_id)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl ConnectorSettings {
    pub fn from_raw(raw: RawSettings) -> Result<Self> {
        let api_base_uri = required(raw.api_base_uri, "api_base_uri")?;
        reqwest::Url::parse(&api_base_uri)
            .map_err(|e| Error::Config(format!("Parameter api_base_uri is invalid: {e}")))?;

        let api_key = required(raw.api_key, "api_key")?;
        let bot_id = required(raw.bot_id, "bot_id")?;
        let instance_id = raw
            .instance_id
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_INSTANCE_ID.to_string());

        Ok(Self {
            api_base_uri,
            api_key,
            bot_id,
            instance_id,
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("Parameter {name} is missing.")))
}

/// Typed settings source owned by the host application.
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` means the connector has never been configured.
    fn load(&self) -> Result<Option<RawSettings>>;
}

/// Load and validate settings from a store.
pub fn load_settings(store: &dyn SettingsStore) -> Result<ConnectorSettings> {
    let raw = store
        .load()?
        .ok_or_else(|| Error::Config("The Driver has not been configured yet.".to_string()))?;
    ConnectorSettings::from_raw(raw)
}

/// In-process settings written by the host (settings form, tests).
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: RwLock<Option<RawSettings>>,
}

impl MemorySettings {
    pub fn new(raw: RawSettings) -> Self {
        Self {
            inner: RwLock::new(Some(raw)),
        }
    }

    pub fn set(&self, raw: RawSettings) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(raw);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<Option<RawSettings>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| Error::Config("settings lock poisoned".to_string()))?;
        Ok(guard.clone())
    }
}

/// Settings read from `SMC_*` environment variables (and `.env`, if present).
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvSettings;

impl SettingsStore for EnvSettings {
    fn load(&self) -> Result<Option<RawSettings>> {
        load_dotenv_if_present(Path::new(".env"));

        let raw = RawSettings {
            api_base_uri: env_str("SMC_API_BASE_URI"),
            api_key: env_str("SMC_API_KEY"),
            bot_id: env_str("SMC_BOT_ID"),
            instance_id: env_str("SMC_INSTANCE_ID"),
        };

        if raw.api_base_uri.is_none() && raw.api_key.is_none() && raw.bot_id.is_none() {
            return Ok(None);
        }
        Ok(Some(raw))
    }
}

/// Process-level knobs that are not part of the connector settings.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub http_timeout: Duration,
    pub throttle: ThrottleConfig,
    pub redis_url: Option<String>,
}

impl RuntimeConfig {
    pub fn load() -> Self {
        load_dotenv_if_present(Path::new(".env"));

        let defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            max_wait: env_u64("SMC_THROTTLE_MAX_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_wait),
            window: env_u64("SMC_THROTTLE_WINDOW_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.window),
            ttl: defaults.ttl,
        };

        Self {
            http_timeout: Duration::from_millis(env_u64("SMC_HTTP_TIMEOUT_MS").unwrap_or(10_000)),
            throttle,
            redis_url: env_str("SMC_REDIS_URL").and_then(non_empty),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RawSettings {
        RawSettings {
            api_base_uri: Some("http://127.0.0.1:8080".to_string()),
            api_key: Some("INITKEY".to_string()),
            bot_id: Some("10001".to_string()),
            instance_id: None,
        }
    }

    #[test]
    fn from_raw_defaults_instance() {
        let s = ConnectorSettings::from_raw(complete()).unwrap();
        assert_eq!(s.instance_id, "1");
        assert_eq!(s.bot_id, "10001");
    }

    #[test]
    fn from_raw_rejects_missing_or_blank_fields() {
        let mut raw = complete();
        raw.api_key = Some("   ".to_string());
        let err = ConnectorSettings::from_raw(raw).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("api_key")));

        let mut raw = complete();
        raw.bot_id = None;
        let err = ConnectorSettings::from_raw(raw).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("bot_id")));

        let mut raw = complete();
        raw.api_base_uri = Some("not a url".to_string());
        assert!(ConnectorSettings::from_raw(raw).is_err());
    }

    #[test]
    fn unconfigured_store_is_a_config_error() {
        let store = MemorySettings::default();
        let err = load_settings(&store).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("not been configured")));

        store.set(complete());
        assert!(load_settings(&store).is_ok());
    }

    #[test]
    fn debug_redacts_api_key() {
        let s = ConnectorSettings::from_raw(complete()).unwrap();
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("INITKEY"));
    }
}
