//! Typed view over the merged YAML config.
//!
//! Missing keys fall back to defaults; type checking has already happened in
//! [`validate_config`](super::validation::validate_config).

use serde_json::Value;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.4;
pub const DEFAULT_LEXICAL_WEIGHT: f64 = 0.6;
pub const DEFAULT_RRF_C: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    /// Candidates kept after fusion; also the per-source fetch size.
    pub top_k: usize,
    pub vector_weight: f64,
    pub lexical_weight: f64,
    /// Rank offset `c` in `w / (c + rank)`.
    pub rrf_c: f64,
    /// Query every non-empty requested collection instead of only the first.
    pub fan_out: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            rrf_c: DEFAULT_RRF_C,
            fan_out: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationSettings {
    /// Language the answer must be written in. `None` mirrors the question.
    pub response_language: Option<String>,
    /// Reuse the verbatim query when the rewrite call fails.
    pub contextualize_fallback: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ProviderSettings {
    fn chat_default() -> Self {
        Self {
            base_url: "http://localhost:1234".to_string(),
            model: "local-model".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }

    fn embedding_default() -> Self {
        Self {
            model: "text-embedding-nomic-embed-text-v1.5".to_string(),
            timeout_secs: 30,
            ..Self::chat_default()
        }
    }

    fn from_section(section: Option<&Value>, defaults: Self) -> Self {
        let Some(section) = section else {
            return defaults;
        };
        Self {
            base_url: str_field(section, "base_url")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: str_field(section, "model").unwrap_or(defaults.model),
            api_key: str_field(section, "api_key").or(defaults.api_key),
            timeout_secs: section
                .get("timeout_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    /// Conversation used by `/api/agent/request` when the caller names none.
    pub default_conversation_id: Option<String>,
    /// Collections linked to the default conversation when it is created.
    pub default_collection_ids: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_allowed_origins: Vec::new(),
            default_conversation_id: None,
            default_collection_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagSettings {
    pub retrieval: RetrievalSettings,
    pub generation: GenerationSettings,
    pub llm: ProviderSettings,
    pub embedding: ProviderSettings,
    pub server: ServerSettings,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            retrieval: RetrievalSettings::default(),
            generation: GenerationSettings::default(),
            llm: ProviderSettings::chat_default(),
            embedding: ProviderSettings::embedding_default(),
            server: ServerSettings::default(),
        }
    }
}

impl RagSettings {
    pub fn from_config(config: &Value) -> Self {
        let defaults = RetrievalSettings::default();
        let retrieval = match config.get("retrieval") {
            Some(section) => RetrievalSettings {
                top_k: section
                    .get("top_k")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .unwrap_or(defaults.top_k),
                vector_weight: section
                    .get("vector_weight")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(defaults.vector_weight),
                lexical_weight: section
                    .get("lexical_weight")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(defaults.lexical_weight),
                rrf_c: section
                    .get("rrf_c")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(defaults.rrf_c),
                fan_out: section
                    .get("fan_out")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(defaults.fan_out),
            },
            None => defaults,
        };

        let generation = config
            .get("generation")
            .map(|section| GenerationSettings {
                response_language: str_field(section, "response_language")
                    .filter(|lang| !lang.trim().is_empty()),
                contextualize_fallback: section
                    .get("contextualize_fallback")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                temperature: section.get("temperature").and_then(|v| v.as_f64()),
                max_tokens: section
                    .get("max_tokens")
                    .and_then(|v| v.as_i64())
                    .map(|v| v as i32),
            })
            .unwrap_or_default();

        let server_defaults = ServerSettings::default();
        let port_override = std::env::var("PORT")
            .ok()
            .and_then(|val| val.parse::<u16>().ok());
        let server = match config.get("server") {
            Some(section) => ServerSettings {
                host: str_field(section, "host").unwrap_or(server_defaults.host),
                port: port_override
                    .or_else(|| {
                        section
                            .get("port")
                            .and_then(|v| v.as_u64())
                            .map(|v| v as u16)
                    })
                    .unwrap_or(server_defaults.port),
                cors_allowed_origins: str_list(section, "cors_allowed_origins"),
                default_conversation_id: str_field(section, "default_conversation_id")
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty()),
                default_collection_ids: str_list(section, "default_collection_ids"),
            },
            None => ServerSettings {
                port: port_override.unwrap_or(server_defaults.port),
                ..server_defaults
            },
        };

        Self {
            retrieval,
            generation,
            llm: ProviderSettings::from_section(config.get("llm"), ProviderSettings::chat_default()),
            embedding: ProviderSettings::from_section(
                config.get("embedding"),
                ProviderSettings::embedding_default(),
            ),
            server,
        }
    }
}

fn str_field(section: &Value, key: &str) -> Option<String> {
    section
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn str_list(section: &Value, key: &str) -> Vec<String> {
    section
        .get(key)
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
