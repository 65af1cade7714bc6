//! Runtime configuration for the question-answering engine.
//!
//! Values start from [`RagConfig::default`], are overridden by the
//! `settings` table in `config.redb`, and finally by environment variables.

use std::{fmt, str::FromStr, time::Duration};

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    error::{Error, Result},
    model_manager::MODEL_ENV_VAR,
};

pub const EMBEDDER_ENV_VAR: &str = "CURATEX_EMBEDDER";

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;
pub const DEFAULT_HISTORY_WINDOW: usize = 4;
pub const DEFAULT_KEYWORDS_PER_CHUNK: usize = 10;
pub const DEFAULT_KEYWORDS_PER_QUERY: usize = 10;
pub const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 360;
pub const DEFAULT_COMPLETION_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_COMPLETION_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_API_KEY_ENV: &str = "GROQ_API_KEY";
pub const DEFAULT_HASHING_DIMENSION: usize = 256;

/// Setting keys understood by [`RagConfig::from_settings`].
pub const SETTING_KEYS: &[&str] = &[
    "chunk_size",
    "chunk_overlap",
    "top_k",
    "history_capacity",
    "history_window",
    "keywords_per_chunk",
    "keywords_per_query",
    "completion_timeout_secs",
    "completion_base_url",
    "completion_model",
    "completion_api_key_env",
    "embedder",
    "model",
    "hashing_dimension",
];

/// Which embedding backend builds and queries the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedderKind {
    #[default]
    Colbert,
    /// Feature hashing; no model download.
    Hashing,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(Self::Colbert),
            "hashing" => Ok(Self::Hashing),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected 'colbert' or 'hashing')"
            ))),
        }
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Colbert => "colbert",
            Self::Hashing => "hashing",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Results requested from each retrieval strategy.
    pub top_k: usize,
    /// Turns kept per conversation session.
    pub history_capacity: usize,
    /// Most recent turns prepended to a new question.
    pub history_window: usize,
    pub keywords_per_chunk: usize,
    pub keywords_per_query: usize,
    pub completion_timeout: Duration,
    pub completion_base_url: String,
    pub completion_model: String,
    /// Environment variable holding the completion API key.
    pub completion_api_key_env: String,
    pub embedder: EmbedderKind,
    /// ColBERT model override; `None` defers to `CURATEX_MODEL`.
    pub model_id: Option<String>,
    pub hashing_dimension: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_window: DEFAULT_HISTORY_WINDOW,
            keywords_per_chunk: DEFAULT_KEYWORDS_PER_CHUNK,
            keywords_per_query: DEFAULT_KEYWORDS_PER_QUERY,
            completion_timeout: Duration::from_secs(
                DEFAULT_COMPLETION_TIMEOUT_SECS,
            ),
            completion_base_url: DEFAULT_COMPLETION_BASE_URL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            completion_api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            embedder: EmbedderKind::default(),
            model_id: None,
            hashing_dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl RagConfig {
    /// Defaults overridden by persisted settings, then by
    /// `CURATEX_EMBEDDER`. The result is validated.
    pub fn from_settings(config_db: &ConfigDb) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in config_db.list_settings()? {
            config.apply(&key, &value)?;
        }

        if let Ok(kind) = std::env::var(EMBEDDER_ENV_VAR) {
            config.embedder = kind.parse()?;
        }
        if config.model_id.is_none()
            && let Ok(model) = std::env::var(MODEL_ENV_VAR)
        {
            config.model_id = Some(model);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply one `key = value` setting.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "chunk_size" => self.chunk_size = parse_number(key, value)?,
            "chunk_overlap" => self.chunk_overlap = parse_number(key, value)?,
            "top_k" => self.top_k = parse_number(key, value)?,
            "history_capacity" => {
                self.history_capacity = parse_number(key, value)?
            }
            "history_window" => self.history_window = parse_number(key, value)?,
            "keywords_per_chunk" => {
                self.keywords_per_chunk = parse_number(key, value)?
            }
            "keywords_per_query" => {
                self.keywords_per_query = parse_number(key, value)?
            }
            "completion_timeout_secs" => {
                self.completion_timeout =
                    Duration::from_secs(parse_number(key, value)?)
            }
            "completion_base_url" => {
                self.completion_base_url = value.trim_end_matches('/').to_string()
            }
            "completion_model" => self.completion_model = value.to_string(),
            "completion_api_key_env" => {
                self.completion_api_key_env = value.to_string()
            }
            "embedder" => self.embedder = value.parse()?,
            "model" => self.model_id = Some(value.to_string()),
            "hashing_dimension" => {
                self.hashing_dimension = parse_number(key, value)?
            }
            _ => {
                return Err(Error::Config(format!("unknown setting '{key}'")));
            }
        }
        Ok(())
    }

    /// Every setting key paired with the value in effect, in
    /// [`SETTING_KEYS`] order.
    pub fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("chunk_size", self.chunk_size.to_string()),
            ("chunk_overlap", self.chunk_overlap.to_string()),
            ("top_k", self.top_k.to_string()),
            ("history_capacity", self.history_capacity.to_string()),
            ("history_window", self.history_window.to_string()),
            ("keywords_per_chunk", self.keywords_per_chunk.to_string()),
            ("keywords_per_query", self.keywords_per_query.to_string()),
            (
                "completion_timeout_secs",
                self.completion_timeout.as_secs().to_string(),
            ),
            ("completion_base_url", self.completion_base_url.clone()),
            ("completion_model", self.completion_model.clone()),
            ("completion_api_key_env", self.completion_api_key_env.clone()),
            ("embedder", self.embedder.to_string()),
            ("model", self.model_id.clone().unwrap_or_default()),
            ("hashing_dimension", self.hashing_dimension.to_string()),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking()?;
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be positive".into()));
        }
        if self.history_capacity == 0 {
            return Err(Error::Config("history_capacity must be positive".into()));
        }
        if self.hashing_dimension == 0 {
            return Err(Error::Config(
                "hashing_dimension must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn chunking(&self) -> Result<ChunkingConfig> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
    }

    /// The completion API key, if its environment variable is set.
    pub fn completion_api_key(&self) -> Option<String> {
        std::env::var(&self.completion_api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("setting '{key}' expects a number, got '{value}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let config = RagConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.history_window, 4);
        assert_eq!(config.completion_timeout, Duration::from_secs(360));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn apply_overrides_known_keys() {
        let mut config = RagConfig::default();
        config.apply("chunk_size", "500").unwrap();
        config.apply("chunk_overlap", "50").unwrap();
        config.apply("embedder", "Hashing").unwrap();
        config.apply("completion_timeout_secs", "5").unwrap();
        config
            .apply("completion_base_url", "http://localhost:8080/v1/")
            .unwrap();

        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.embedder, EmbedderKind::Hashing);
        assert_eq!(config.completion_timeout, Duration::from_secs(5));
        assert_eq!(config.completion_base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn apply_rejects_unknown_and_malformed() {
        let mut config = RagConfig::default();
        assert!(config.apply("nope", "1").is_err());
        assert!(config.apply("top_k", "three").is_err());
        assert!(config.apply("embedder", "word2vec").is_err());
    }

    #[test]
    fn every_setting_key_is_applicable() {
        for key in SETTING_KEYS {
            let value = match *key {
                "embedder" => "hashing",
                "chunk_overlap" => "10",
                k if k.starts_with("completion_")
                    && !k.ends_with("secs") => "x",
                "model" => "org/model",
                _ => "20",
            };
            let mut config = RagConfig::default();
            assert!(config.apply(key, value).is_ok(), "key {key}");
        }
    }

    #[test]
    fn settings_cover_every_key() {
        let keys: Vec<_> =
            RagConfig::default().settings().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, SETTING_KEYS);
    }

    #[test]
    fn settings_round_trip_through_apply() {
        let config = RagConfig {
            top_k: 7,
            embedder: EmbedderKind::Hashing,
            model_id: Some("org/model".into()),
            ..RagConfig::default()
        };
        let mut rebuilt = RagConfig::default();
        for (key, value) in config.settings() {
            rebuilt.apply(key, &value).unwrap();
        }
        assert_eq!(rebuilt, config);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let overlap = RagConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..RagConfig::default()
        };
        assert!(overlap.validate().is_err());

        let top_k = RagConfig {
            top_k: 0,
            ..RagConfig::default()
        };
        assert!(top_k.validate().is_err());

        let history = RagConfig {
            history_capacity: 0,
            ..RagConfig::default()
        };
        assert!(history.validate().is_err());
    }

    #[test]
    fn from_settings_reads_config_db() {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        db.set_setting("top_k", "5").unwrap();
        db.set_setting("history_window", "2").unwrap();

        let config = RagConfig::from_settings(&db).unwrap();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.history_window, 2);
    }

    #[test]
    fn from_settings_rejects_invalid_combination() {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        db.set_setting("chunk_size", "100").unwrap();
        db.set_setting("chunk_overlap", "300").unwrap();
        assert!(RagConfig::from_settings(&db).is_err());
    }
}
