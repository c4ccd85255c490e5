use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    path::PathBuf,
    sync::{LazyLock, RwLock},
};

use anyhow::Context;
use clap::Parser;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::scorer::QualityProfile;

fn camel_to_snake_case(input: &str) -> String {
    let mut snake = String::new();
    for (i, ch) in input.char_indices() {
        if i > 0 && ch.is_uppercase() {
            snake.push('_');
        }
        snake.push(ch.to_ascii_lowercase());
    }
    snake
}

/// A single typed setting. Value sources are layered: default < config file
/// < environment < cli.
pub trait ConfigValue:
    'static + Send + Sync + Default + Clone + Serialize + DeserializeOwned
{
    const KEY: Option<&str> = None;
    const ENV_KEY: Option<&str> = None;
}

#[derive(Debug, Default)]
struct SettingValue<T> {
    default: T,
    config: Option<T>,
    cli: Option<T>,
    env: Option<T>,
}

impl<T: ConfigValue> SettingValue<T> {
    fn new(default: T) -> Self {
        use std::env::var;
        let env_key = T::ENV_KEY.map(str::to_string).unwrap_or_else(|| {
            let key = T::KEY
                .map(str::to_string)
                .unwrap_or_else(|| camel_to_snake_case(short_type_name::<T>()));
            format!("FETCHARR_{}", key.to_uppercase())
        });
        let env = var(&env_key).ok().and_then(|val| {
            match serde_plain::from_str(&val) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(
                        found = val,
                        "Found env value but could not parse it as {}. {e}",
                        type_name::<T>()
                    );
                    None
                }
            }
        });
        Self {
            default,
            config: None,
            cli: None,
            env,
        }
    }

    /// Setting value with respect to its source priority
    fn customized(&self) -> &T {
        self.cli
            .as_ref()
            .or(self.env.as_ref())
            .or(self.config.as_ref())
            .unwrap_or(&self.default)
    }
}

fn short_type_name<T>() -> &'static str {
    type_name::<T>().rsplit("::").next().unwrap()
}

trait AnySettingValue: 'static + Send + Sync {
    fn key(&self) -> String;
    fn customized_value(&self) -> &dyn Any;
    fn cli_mut(&mut self) -> &mut dyn Any;
    fn deserialize_toml(&mut self, from: toml::Value) -> Result<(), toml::de::Error>;
}

impl<T: ConfigValue> AnySettingValue for SettingValue<T> {
    fn key(&self) -> String {
        T::KEY
            .map(str::to_string)
            .unwrap_or_else(|| camel_to_snake_case(short_type_name::<T>()))
    }

    fn customized_value(&self) -> &dyn Any {
        self.customized()
    }

    fn cli_mut(&mut self) -> &mut dyn Any {
        &mut self.cli
    }

    fn deserialize_toml(&mut self, from: toml::Value) -> Result<(), toml::de::Error> {
        self.config = Some(T::deserialize(from)?);
        Ok(())
    }
}

pub static CONFIG: LazyLock<ConfigStore> = LazyLock::new(ConfigStore::construct);

pub struct ConfigStore {
    settings: RwLock<HashMap<TypeId, Box<dyn AnySettingValue>>>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").finish()
    }
}

impl ConfigStore {
    fn construct() -> Self {
        let store = Self {
            settings: RwLock::new(HashMap::new()),
        };
        store.register_value::<Port>();
        store.register_value::<MoviesDir>();
        store.register_value::<ShowsDir>();
        store.register_value::<Indexers>();
        store.register_value::<SabnzbdUrl>();
        store.register_value::<SabnzbdApiKey>();
        store.register_value::<SabnzbdCategory>();
        store.register_value::<PlexUrl>();
        store.register_value::<PlexToken>();
        store.register_value::<PollIntervalSeconds>();
        store.register_value::<StuckThresholdMinutes>();
        store.register_value::<CleanupAgeHours>();
        store.register_value::<PlexVerifyIntervalMinutes>();
        store.register_value::<PlexVerifyTimeoutHours>();
        store.register_value::<UpstreamDeadlineSeconds>();
        store.register_value::<DeleteAfterImport>();
        store.register_value::<MovieNamingTemplate>();
        store.register_value::<EpisodeNamingTemplate>();
        store.register_value::<QualityProfiles>();
        store
    }

    fn register_value<T: ConfigValue>(&self) {
        let mut settings = self.settings.write().unwrap();
        settings.insert(TypeId::of::<T>(), Box::new(SettingValue::new(T::default())));
    }

    pub fn get_value<T: ConfigValue>(&self) -> T {
        let settings = self.settings.read().unwrap();
        let setting = settings
            .get(&TypeId::of::<T>())
            .unwrap_or_else(|| panic!("{} is registered", type_name::<T>()));
        setting
            .customized_value()
            .downcast_ref::<T>()
            .expect("setting type to match its key")
            .clone()
    }

    pub fn set_cli_value<T: ConfigValue>(&self, value: T) {
        let mut settings = self.settings.write().unwrap();
        let setting = settings
            .get_mut(&TypeId::of::<T>())
            .unwrap_or_else(|| panic!("{} is registered", type_name::<T>()));
        *setting
            .cli_mut()
            .downcast_mut::<Option<T>>()
            .expect("setting type to match its key") = Some(value);
    }

    pub fn apply_toml_settings(&self, table: toml::Table) {
        let mut settings = self.settings.write().unwrap();
        for setting in settings.values_mut() {
            let Some(value) = table.get(&setting.key()) else {
                continue;
            };
            if let Err(e) = setting.deserialize_toml(value.clone()) {
                tracing::error!(key = setting.key(), "Could not apply config value: {e}");
            }
        }
    }
}

macro_rules! config_value {
    ($name:ident, $inner:ty, $default:expr) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl Default for $name {
            fn default() -> Self {
                Self($default)
            }
        }

        impl ConfigValue for $name {}
    };
}

config_value!(Port, u16, 8787);
config_value!(MoviesDir, PathBuf, PathBuf::from("/media/movies"));
config_value!(ShowsDir, PathBuf, PathBuf::from("/media/tv"));
config_value!(SabnzbdUrl, String, "http://localhost:8080".to_string());
config_value!(SabnzbdApiKey, Option<String>, None);
config_value!(SabnzbdCategory, Option<String>, None);
config_value!(PlexUrl, Option<String>, None);
config_value!(PlexToken, Option<String>, None);
config_value!(PollIntervalSeconds, u64, 5);
config_value!(StuckThresholdMinutes, u64, 60);
config_value!(CleanupAgeHours, u64, 24);
config_value!(PlexVerifyIntervalMinutes, u64, 5);
config_value!(PlexVerifyTimeoutHours, u64, 6);
config_value!(UpstreamDeadlineSeconds, u64, 30);
config_value!(DeleteAfterImport, bool, true);
config_value!(
    MovieNamingTemplate,
    String,
    "{title} ({year})/{title} ({year}){ext}".to_string()
);
config_value!(
    EpisodeNamingTemplate,
    String,
    "{title}/Season {season}/{title} - S{season}E{episode}{ext}".to_string()
);

#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct IndexerConfig {
    pub name: String,
    pub url: String,
    pub api_key: Option<String>,
}

config_value!(Indexers, Vec<IndexerConfig>, Vec::new());

fn default_profiles() -> Vec<QualityProfile> {
    vec![
        QualityProfile {
            name: "hd".into(),
            resolution: vec!["1080p".into(), "720p".into()],
            sources: vec!["web-dl".into(), "bluray".into(), "webrip".into()],
            codecs: vec!["x264".into(), "x265".into()],
            hdr: Vec::new(),
            audio: vec!["eac3".into(), "ac3".into(), "aac".into()],
            prefer_remux: false,
            reject: vec!["cam".into(), "ts".into()],
        },
        QualityProfile {
            name: "uhd".into(),
            resolution: vec!["2160p".into()],
            sources: vec!["bluray".into(), "web-dl".into()],
            codecs: vec!["x265".into(), "x264".into()],
            hdr: vec!["dolby-vision".into(), "hdr10plus".into(), "hdr10".into()],
            audio: vec!["atmos".into(), "truehd".into(), "dtshd".into(), "eac3".into()],
            prefer_remux: true,
            reject: vec!["cam".into(), "ts".into(), "hdtv".into()],
        },
    ]
}

config_value!(QualityProfiles, Vec<QualityProfile>, default_profiles());

impl QualityProfiles {
    pub fn by_name(&self, name: &str) -> Option<&QualityProfile> {
        self.0.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Parser)]
#[command(name = "fetcharr")]
pub struct Args {
    /// Port of the http server
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Args {
    pub fn apply_configuration(self) -> Option<PathBuf> {
        if let Some(port) = self.port {
            CONFIG.set_cli_value(Port(port));
        }
        self.config
    }
}

pub static APP_RESOURCES: LazyLock<AppResources> = LazyLock::new(AppResources::resolve);

/// Filesystem locations owned by the daemon itself.
#[derive(Debug, Clone)]
pub struct AppResources {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppResources {
    fn resolve() -> Self {
        let data_dir = std::env::var_os("FETCHARR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .expect("platform data directory to exist")
                    .join("fetcharr")
            });
        Self {
            database_path: data_dir.join("fetcharr.db"),
            config_path: data_dir.join("config.toml"),
            data_dir,
        }
    }

    pub fn initiate() -> anyhow::Result<()> {
        let resources = &*APP_RESOURCES;
        std::fs::create_dir_all(&resources.data_dir).context("create data directory")?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigFile;

impl ConfigFile {
    /// Read the config file, creating a commented default when missing.
    pub async fn open_and_read(path: Option<PathBuf>) -> anyhow::Result<toml::Table> {
        let path = path.unwrap_or_else(|| APP_RESOURCES.config_path.clone());
        if !path.try_exists().unwrap_or(false) {
            tokio::fs::write(&path, DEFAULT_CONFIG)
                .await
                .context("write default config file")?;
            tracing::info!("Created default config file at {}", path.display());
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .context("read config file")?;
        raw.parse().context("parse config file")
    }
}

const DEFAULT_CONFIG: &str = r#"# fetcharr configuration.
# Every value can be overridden with a FETCHARR_* environment variable.

port = 8787
movies_dir = "/media/movies"
shows_dir = "/media/tv"

sabnzbd_url = "http://localhost:8080"
# sabnzbd_api_key = ""

# [[indexers]]
# name = "nzbhub"
# url = "https://indexer.example.com"
# api_key = ""

# plex_url = "http://localhost:32400"
# plex_token = ""
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_layered_under_config() {
        assert_eq!(8787, CONFIG.get_value::<Port>().0);
        let table: toml::Table = "port = 9000".parse().unwrap();
        CONFIG.apply_toml_settings(table);
        assert_eq!(9000, CONFIG.get_value::<Port>().0);
        CONFIG.set_cli_value(Port(9100));
        assert_eq!(9100, CONFIG.get_value::<Port>().0);
    }

    #[test]
    fn nested_config_values_deserialize() {
        let table: toml::Table = r#"
[[indexers]]
name = "nzbhub"
url = "https://indexer.test"
api_key = "secret"
"#
        .parse()
        .unwrap();
        CONFIG.apply_toml_settings(table);
        let indexers = CONFIG.get_value::<Indexers>().0;
        assert_eq!(1, indexers.len());
        assert_eq!("nzbhub", indexers[0].name);
    }

    #[test]
    fn default_profiles_are_sane() {
        let profiles = CONFIG.get_value::<QualityProfiles>();
        assert!(profiles.by_name("hd").is_some());
        assert!(profiles.by_name("uhd").is_some());
        assert!(profiles.by_name("nope").is_none());
    }
}
