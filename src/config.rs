use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::layers::export::ExportFormat;
use crate::layers::providers::ProviderKind;

const PLACEHOLDER_SUFFIX: &str = "_here";

/// One configured LLM backend. Rank 0 is tried first.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub rank: usize,
}

impl ProviderConfig {
    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub semantic_scholar_api_key: Option<String>,
    pub crossref_api_key: Option<String>,
    pub crossref_mailto: String,
    /// Minimum spacing between two requests to the same database.
    pub rate_limit_interval: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
    pub enable_cache: bool,
    pub cache_duration: Duration,
    pub cache_max_entries: usize,
    pub per_source_limit: usize,
    pub max_results: usize,
    pub recent_years: i32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub providers: Vec<ProviderConfig>,
    pub provider_retries: u32,
    pub provider_backoff: Duration,
    pub search: SearchConfig,
    pub max_export_papers: usize,
    pub default_export_format: ExportFormat,
    pub log_level: String,
    pub debug_mode: bool,
    pub validate_api_keys: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str| lookup(key).and_then(clean_secret);
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let preferred = lookup("PREFERRED_AI_PROVIDER").and_then(|v| ProviderKind::from_str(v.trim()).ok());

        let mut providers = vec![
            ProviderConfig {
                kind: ProviderKind::Anthropic,
                api_key: secret("ANTHROPIC_API_KEY"),
                model: text("ANTHROPIC_MODEL", ProviderKind::Anthropic.default_model()),
                rank: 0,
            },
            ProviderConfig {
                kind: ProviderKind::OpenAi,
                api_key: secret("OPENAI_API_KEY"),
                model: text("OPENAI_MODEL", ProviderKind::OpenAi.default_model()),
                rank: 0,
            },
            ProviderConfig {
                kind: ProviderKind::Gemini,
                api_key: secret("GOOGLE_API_KEY"),
                model: text("GEMINI_MODEL", ProviderKind::Gemini.default_model()),
                rank: 0,
            },
        ];
        if let Some(kind) = preferred {
            // Stable sort keeps the default order for everything else.
            providers.sort_by_key(|p| p.kind != kind);
        }
        for (rank, provider) in providers.iter_mut().enumerate() {
            provider.rank = rank;
        }

        let rate_limit_secs: f64 = number(&lookup, "SEMANTIC_SCHOLAR_RATE_LIMIT", 1.1);
        let debug_mode = flag(&lookup, "DEBUG_MODE", false);

        let default_export_format = lookup("DEFAULT_EXPORT_FORMAT")
            .and_then(|v| match ExportFormat::from_str(&v) {
                Ok(format) => Some(format),
                Err(e) => {
                    tracing::warn!("Ignoring DEFAULT_EXPORT_FORMAT: {}", e);
                    None
                }
            })
            .unwrap_or(ExportFormat::Json);

        Self {
            providers,
            provider_retries: number(&lookup, "PROVIDER_RETRIES", 1),
            provider_backoff: Duration::from_millis(number(&lookup, "PROVIDER_BACKOFF_MS", 500)),
            search: SearchConfig {
                semantic_scholar_api_key: secret("SEMANTIC_SCHOLAR_API_KEY"),
                crossref_api_key: secret("CROSSREF_API_KEY"),
                crossref_mailto: text("CROSSREF_MAILTO", "research-gap-finder@example.com"),
                rate_limit_interval: Duration::from_secs_f64(rate_limit_secs.max(0.0).min(3600.0)),
                max_retries: number::<u32, _>(&lookup, "MAX_API_RETRIES", 3).max(1),
                retry_base_delay: Duration::from_secs(1),
                request_timeout: Duration::from_secs(number(&lookup, "REQUEST_TIMEOUT", 15)),
                enable_cache: flag(&lookup, "ENABLE_CACHE", true),
                cache_duration: Duration::from_secs(number(&lookup, "CACHE_DURATION", 3600)),
                cache_max_entries: number(&lookup, "CACHE_MAX_ENTRIES", 256),
                per_source_limit: 20,
                max_results: number(&lookup, "MAX_SEARCH_RESULTS", 20),
                recent_years: number(&lookup, "RECENT_YEARS", 5),
            },
            max_export_papers: number(&lookup, "MAX_EXPORT_PAPERS", 100),
            default_export_format,
            log_level: if debug_mode {
                "debug".to_string()
            } else {
                text("LOG_LEVEL", "info").to_lowercase()
            },
            debug_mode,
            validate_api_keys: flag(&lookup, "VALIDATE_API_KEYS", true),
        }
    }

    /// Providers that have a key, in preference order.
    pub fn available_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.has_key())
    }

    /// Logs a warning for every key that does not look like its provider's format.
    pub fn warn_on_malformed_keys(&self) {
        if !self.validate_api_keys {
            return;
        }
        for provider in &self.providers {
            if let Some(key) = &provider.api_key {
                if !key_looks_valid(key, provider.kind.name()) {
                    tracing::warn!("{} API key {} has an unexpected format", provider.kind, mask_api_key(key));
                }
            }
        }
        if let Some(key) = &self.search.semantic_scholar_api_key {
            if !key_looks_valid(key, "semantic_scholar") {
                tracing::warn!("Semantic Scholar API key {} has an unexpected format", mask_api_key(key));
            }
        }
        if self.available_providers().next().is_none() {
            tracing::warn!("No AI provider API key configured; gap analysis will be unavailable");
        }
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            ai_providers: self
                .providers
                .iter()
                .map(|p| (p.kind.name().to_string(), p.api_key.as_deref().map(mask_api_key)))
                .collect(),
            academic_apis: BTreeMap::from([
                (
                    "semantic_scholar".to_string(),
                    self.search.semantic_scholar_api_key.as_deref().map(mask_api_key),
                ),
                ("crossref".to_string(), self.search.crossref_api_key.as_deref().map(mask_api_key)),
            ]),
            provider_order: self.providers.iter().map(|p| p.kind.name().to_string()).collect(),
            rate_limit_secs: self.search.rate_limit_interval.as_secs_f64(),
            max_retries: self.search.max_retries,
            request_timeout_secs: self.search.request_timeout.as_secs(),
            cache_enabled: self.search.enable_cache,
            cache_duration_secs: self.search.cache_duration.as_secs(),
            cache_max_entries: self.search.cache_max_entries,
            max_export_papers: self.max_export_papers,
            log_level: self.log_level.clone(),
            debug_mode: self.debug_mode,
        }
    }
}

/// Masked view of the configuration, safe to print.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub ai_providers: Vec<(String, Option<String>)>,
    pub academic_apis: BTreeMap<String, Option<String>>,
    pub provider_order: Vec<String>,
    pub rate_limit_secs: f64,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub cache_enabled: bool,
    pub cache_duration_secs: u64,
    pub cache_max_entries: usize,
    pub max_export_papers: usize,
    pub log_level: String,
    pub debug_mode: bool,
}

/// Shows the first 8 and last 4 characters of a key.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "***masked***".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

pub fn key_looks_valid(key: &str, service: &str) -> bool {
    match service {
        "openai" => key.starts_with("sk-") && key.len() > 20,
        "anthropic" => key.starts_with("sk-ant-") && key.len() > 20,
        "gemini" | "google" => key.starts_with("AIza") && key.len() > 20,
        "semantic_scholar" => key.len() > 10,
        "crossref" => key.len() > 5,
        _ => key.len() > 5,
    }
}

fn clean_secret(value: String) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || (value.starts_with("your_") && value.ends_with(PLACEHOLDER_SUFFIX)) {
        return None;
    }
    Some(value.to_string())
}

fn number<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value '{}' for {}, using default", raw, key);
            default
        }),
        None => default,
    }
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
