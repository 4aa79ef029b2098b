use crate::error::ErrorCode;
use crate::migrator::paths::MigratorPaths;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    pub base_url: String,
    pub page_size: u64,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1/legacy".to_string(),
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModernConfig {
    pub document_url: String,
    pub index_url: String,
    pub challenge_index: String,
    pub resource_index: String,
}

impl Default for ModernConfig {
    fn default() -> Self {
        Self {
            document_url: "http://localhost:3000/v5".to_string(),
            index_url: "http://localhost:9200".to_string(),
            challenge_index: "challenge".to_string(),
            resource_index: "resources".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReferenceConfig {
    /// Falls back to `modern.document_url` when empty.
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retries: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub page_size: usize,
    pub drift_tolerance_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            drift_tolerance_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Resume from the end of the last successful window when none is given.
    pub incremental: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { incremental: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Http,
    Fixture,
}

impl BackendKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "fixture" | "memory" => Some(Self::Fixture),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub fixture_legacy: Option<PathBuf>,
    #[serde(default)]
    pub fixture_modern: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Http,
            fixture_legacy: None,
            fixture_modern: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigratorConfig {
    pub legacy: LegacyConfig,
    pub modern: ModernConfig,
    pub reference: ReferenceConfig,
    pub http: HttpConfig,
    pub sync: SyncConfig,
    pub migration: MigrationConfig,
    pub backend: BackendConfig,
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl MigratorConfig {
    pub fn reference_url(&self) -> &str {
        if self.reference.base_url.trim().is_empty() {
            &self.modern.document_url
        } else {
            &self.reference.base_url
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMigratorConfig {
    legacy: Option<LegacyConfig>,
    modern: Option<ModernConfig>,
    reference: Option<ReferenceConfig>,
    http: Option<HttpConfig>,
    sync: Option<SyncConfig>,
    migration: Option<MigrationConfig>,
    backend: Option<BackendConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_i64(var: &str, fallback: i64) -> i64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

pub fn validate(cfg: &MigratorConfig) -> Result<()> {
    let code = ErrorCode::E002ConfigInvalid.as_str();
    if cfg.legacy.page_size == 0 {
        return Err(anyhow!("{code}: legacy page size must be >= 1"));
    }
    if cfg.sync.page_size == 0 {
        return Err(anyhow!("{code}: sync page size must be >= 1"));
    }
    if cfg.sync.drift_tolerance_secs < 0 {
        return Err(anyhow!("{code}: drift tolerance cannot be negative"));
    }
    if cfg.http.timeout_secs == 0 {
        return Err(anyhow!("{code}: http timeout must be >= 1 second"));
    }
    match cfg.backend.kind {
        BackendKind::Http => {
            for (name, value) in [
                ("legacy.base_url", cfg.legacy.base_url.as_str()),
                ("modern.document_url", cfg.modern.document_url.as_str()),
                ("modern.index_url", cfg.modern.index_url.as_str()),
                ("modern.challenge_index", cfg.modern.challenge_index.as_str()),
                ("modern.resource_index", cfg.modern.resource_index.as_str()),
            ] {
                if value.trim().is_empty() {
                    return Err(anyhow!("{code}: {name} cannot be empty"));
                }
            }
        }
        BackendKind::Fixture => {
            if cfg.backend.fixture_legacy.is_none() {
                return Err(anyhow!(
                    "{code}: fixture backend requires backend.fixture_legacy"
                ));
            }
        }
    }
    Ok(())
}

fn resolve_config_path(paths: &MigratorPaths) -> PathBuf {
    env_path("MIGRATOR_CONFIG_PATH").unwrap_or_else(|| paths.home.join("migrator.toml"))
}

fn merge_file_config(base: &mut MigratorConfig, paths: &MigratorPaths) -> Result<()> {
    let path = resolve_config_path(paths);
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialMigratorConfig = toml::from_str(&raw).map_err(|err| {
        anyhow!(
            "{}: failed to parse migrator config {}: {err}",
            ErrorCode::E002ConfigInvalid.as_str(),
            path.display()
        )
    })?;
    if let Some(legacy) = parsed.legacy {
        base.legacy = legacy;
    }
    if let Some(modern) = parsed.modern {
        base.modern = modern;
    }
    if let Some(reference) = parsed.reference {
        base.reference = reference;
    }
    if let Some(http) = parsed.http {
        base.http = http;
    }
    if let Some(sync) = parsed.sync {
        base.sync = sync;
    }
    if let Some(migration) = parsed.migration {
        base.migration = migration;
    }
    if let Some(backend) = parsed.backend {
        base.backend = backend;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut MigratorConfig) {
    cfg.legacy.base_url = env_or_string("MIGRATOR_LEGACY_URL", &cfg.legacy.base_url);
    cfg.legacy.page_size = env_or_u64("MIGRATOR_LEGACY_PAGE_SIZE", cfg.legacy.page_size);
    cfg.modern.document_url = env_or_string("MIGRATOR_DOCUMENT_URL", &cfg.modern.document_url);
    cfg.modern.index_url = env_or_string("MIGRATOR_INDEX_URL", &cfg.modern.index_url);
    cfg.modern.challenge_index =
        env_or_string("MIGRATOR_CHALLENGE_INDEX", &cfg.modern.challenge_index);
    cfg.modern.resource_index =
        env_or_string("MIGRATOR_RESOURCE_INDEX", &cfg.modern.resource_index);
    cfg.reference.base_url = env_or_string("MIGRATOR_REFERENCE_URL", &cfg.reference.base_url);
    cfg.http.timeout_secs = env_or_u64("MIGRATOR_HTTP_TIMEOUT_SECS", cfg.http.timeout_secs);
    cfg.http.retries = env_or_u64("MIGRATOR_HTTP_RETRIES", cfg.http.retries as u64) as usize;
    cfg.sync.page_size = env_or_u64("MIGRATOR_SYNC_PAGE_SIZE", cfg.sync.page_size as u64) as usize;
    cfg.sync.drift_tolerance_secs = env_or_i64(
        "MIGRATOR_DRIFT_TOLERANCE_SECS",
        cfg.sync.drift_tolerance_secs,
    );
    cfg.migration.incremental = env_or_bool("MIGRATOR_INCREMENTAL", cfg.migration.incremental);
    if let Ok(raw) = env::var("MIGRATOR_BACKEND")
        && let Some(kind) = BackendKind::parse(&raw)
    {
        cfg.backend.kind = kind;
    }
    if let Some(path) = env_path("MIGRATOR_FIXTURE_LEGACY") {
        cfg.backend.fixture_legacy = Some(path);
    }
    if let Some(path) = env_path("MIGRATOR_FIXTURE_MODERN") {
        cfg.backend.fixture_modern = Some(path);
    }
    cfg.auth_token = env::var("MIGRATOR_AUTH_TOKEN")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
}

pub fn load_config(paths: &MigratorPaths) -> Result<MigratorConfig> {
    let mut cfg = MigratorConfig::default();
    merge_file_config(&mut cfg, paths)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
