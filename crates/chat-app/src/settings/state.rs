use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tidechat_protocol::{TopicId, TopicRoute, TurnSettings, default_topic_routes};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:50505";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const SETTINGS_DIRECTORY_NAME: &str = "tidechat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "tidechat.sqlite";
pub const ENV_PREFIX: &str = "TIDECHAT_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Zero disables the connect timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Empty means anonymous requests.
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_topic_routes")]
    pub topics: Vec<TopicRoute>,
    #[serde(default = "default_topic")]
    pub default_topic: TopicId,
    #[serde(default)]
    pub turn: TurnSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            bearer_token: String::new(),
            database_path: None,
            topics: default_topic_routes(),
            default_topic: default_topic(),
            turn: TurnSettings::default(),
        }
    }
}

impl AppSettings {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    pub fn bearer_token(&self) -> Option<&str> {
        let token = self.bearer_token.trim();
        (!token.is_empty()).then_some(token)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(SettingsStore::default_database_path)
    }

    pub fn route(&self, topic: &TopicId) -> Option<&TopicRoute> {
        self.topics.iter().find(|route| &route.topic == topic)
    }

    pub fn normalized(mut self) -> Self {
        let base_url = self.base_url.trim().trim_end_matches('/');
        self.base_url = if base_url.is_empty() {
            default_base_url()
        } else {
            base_url.to_string()
        };
        self.bearer_token = self.bearer_token.trim().to_string();

        // First route wins for a repeated topic.
        let mut topics: Vec<TopicRoute> = Vec::with_capacity(self.topics.len());
        for route in self.topics {
            let label = route.label.trim().to_string();
            let mut route = TopicRoute::new(route.topic.as_str(), route.path);
            if !label.is_empty() {
                route = route.with_label(label);
            }
            if route.topic.as_str().is_empty()
                || topics.iter().any(|known| known.topic == route.topic)
            {
                continue;
            }
            topics.push(route);
        }
        if topics.is_empty() {
            topics = default_topic_routes();
        }
        self.topics = topics;

        if self.route(&self.default_topic).is_none()
            && let Some(first) = self.topics.first()
        {
            self.default_topic = first.topic.clone();
        }
        self.turn = self.turn.normalized();

        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".tidechat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn default_database_path() -> PathBuf {
        Self::default_config_dir().join(DATABASE_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file when present, then `TIDECHAT_*` variables
    /// (`TIDECHAT_TURN__STREAM=false` sets `turn.stream`).
    fn load_from_disk(path: &Path) -> AppSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AppSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_topic() -> TopicId {
    TopicId::from("theme_1")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();

        let store = SettingsStore::new(temp_dir.path().join(SETTINGS_FILE_NAME));

        let settings = store.settings();
        assert_eq!(settings.topics, default_topic_routes());
        assert_eq!(settings.default_topic, TopicId::from("theme_1"));
        assert!(settings.turn.stream);
        assert_eq!(settings.bearer_token(), None);
    }

    #[test]
    fn update_persists_and_reloads() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        let mut settings = AppSettings::default();
        settings.base_url = " https://chat.example.com/ ".to_string();
        settings.bearer_token = " secret ".to_string();
        settings.turn.stream = false;
        store.update(settings).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.base_url, "https://chat.example.com");
        assert_eq!(reloaded.bearer_token(), Some("secret"));
        assert!(!reloaded.turn.stream);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "topics": [{ "topic": "hr", "path": "hr/ask" }], "default_topic": "missing" }"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();

        assert_eq!(settings.topics, vec![TopicRoute::new("hr", "/hr/ask")]);
        assert_eq!(settings.default_topic, TopicId::from("hr"));
        assert_eq!(
            settings.connect_timeout(),
            Some(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        );
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let settings = SettingsStore::new(path).settings();

        assert_eq!(*settings, AppSettings::default());
    }

    #[test]
    fn duplicate_topics_keep_first_route() {
        let settings = AppSettings {
            topics: vec![
                TopicRoute::new("theme_1", "/ask"),
                TopicRoute::new("theme_1", "/other"),
                TopicRoute::new("  ", "/blank"),
            ],
            ..AppSettings::default()
        }
        .normalized();

        assert_eq!(settings.topics, vec![TopicRoute::new("theme_1", "/ask")]);
    }
}
