use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::{CategoryKeys, QuerySettings};
use crate::bitbucket::DEFAULT_API_URL;
use crate::http::{normalize_base_url, HttpSettings};
use crate::pager::PagerSettings;

pub const DEFAULT_CONFIG_FILES: &[&str] = &["jira.config.toml", "jira.config.json"];

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub jira: JiraConfig,
    pub bitbucket: BitbucketConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub api_token: String,
    pub project_keys: Vec<String>,
    pub special_issue_keys: Vec<String>,
    pub internal_project_keys: Vec<String>,
    #[serde(default)]
    pub discover_assigned_projects: bool,
}

#[derive(Debug, Deserialize)]
pub struct BitbucketConfig {
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_bitbucket_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_key_range_upper")]
    pub key_range_upper: usize,
    #[serde(default = "default_project_batch_size")]
    pub project_batch_size: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub max_retries: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_marker_issue_type")]
    pub marker_issue_type: String,
    #[serde(default = "default_summary_denylist")]
    pub summary_denylist: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            delay_ms: default_delay_ms(),
            max_pages: default_max_pages(),
            key_range_upper: default_key_range_upper(),
            project_batch_size: default_project_batch_size(),
            parallelism: default_parallelism(),
            max_in_flight: default_max_in_flight(),
            max_retries: 0,
            request_timeout_secs: default_request_timeout_secs(),
            marker_issue_type: default_marker_issue_type(),
            summary_denylist: default_summary_denylist(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FieldsConfig {
    /// Extra raw key to standardized key renames, merged over the built-ins.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_build_command")]
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_build_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_build_command(),
            working_dir: None,
            timeout_secs: default_build_timeout_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
}

/// Values that replace file settings, typically sourced from the environment.
#[derive(Debug, Default)]
pub struct AppConfigOverrides {
    pub jira_host: Option<String>,
    pub jira_email: Option<String>,
    pub jira_api_token: Option<String>,
    pub bitbucket_workspace: Option<String>,
    pub bitbucket_username: Option<String>,
    pub bitbucket_api_token: Option<String>,
    pub logging_debug: Option<bool>,
}

impl AppConfigOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            jira_host: non_empty("JIRA_HOST"),
            jira_email: non_empty("JIRA_EMAIL"),
            jira_api_token: non_empty("JIRA_API_TOKEN"),
            bitbucket_workspace: non_empty("BITBUCKET_WORKSPACE"),
            bitbucket_username: non_empty("BITBUCKET_USERNAME"),
            bitbucket_api_token: non_empty("BITBUCKET_API_TOKEN"),
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found; looked for {}", format_paths(.searched))]
    MissingConfigFile { searched: Vec<PathBuf> },
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse JSON config at {path}: {source}")]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves the config file: the explicit path if given, otherwise the first
/// default file name present in `cwd`.
pub fn resolve_config_path(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::MissingConfigFile {
            searched: vec![path.to_path_buf()],
        });
    }

    let candidates: Vec<PathBuf> = DEFAULT_CONFIG_FILES.iter().map(|n| cwd.join(n)).collect();
    if let Some(found) = candidates.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }
    Err(ConfigError::MissingConfigFile {
        searched: candidates,
    })
}

/// Reads and parses the file without validating it, so overrides can still
/// fill in missing secrets.
pub fn read_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::MissingConfigFile {
                searched: vec![path.to_path_buf()],
            }
        } else {
            ConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    parse(path, &raw)
}

fn parse(path: &Path, raw: &str) -> Result<AppConfig, ConfigError> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(raw).map_err(|source| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source,
        })
    } else {
        toml::from_str(raw).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn load_from(path: &Path, overrides: &AppConfigOverrides) -> Result<AppConfig, ConfigError> {
    let mut cfg = read_from(path)?;
    cfg.apply_overrides(overrides)?;
    Ok(cfg)
}

impl AppConfig {
    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) -> Result<(), ConfigError> {
        if let Some(value) = &overrides.jira_host {
            self.jira.host = value.clone();
        }
        if let Some(value) = &overrides.jira_email {
            self.jira.email = value.clone();
        }
        if let Some(value) = &overrides.jira_api_token {
            self.jira.api_token = value.clone();
        }
        if let Some(value) = &overrides.bitbucket_workspace {
            self.bitbucket.workspace = value.clone();
        }
        if let Some(value) = &overrides.bitbucket_username {
            self.bitbucket.username = Some(value.clone());
        }
        if let Some(value) = &overrides.bitbucket_api_token {
            self.bitbucket.api_token = Some(value.clone());
        }
        if let Some(value) = overrides.logging_debug {
            self.logging.debug = value;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("jira.host", &self.jira.host),
            ("jira.email", &self.jira.email),
            ("jira.api_token", &self.jira.api_token),
            ("bitbucket.workspace", &self.bitbucket.workspace),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }

        for (name, url) in [
            ("jira.host", &self.jira.host),
            ("bitbucket.api_url", &self.bitbucket.api_url),
        ] {
            if normalize_base_url(url).is_err() {
                return Err(ConfigError::Invalid(format!("{name} is not a valid URL: {url}")));
            }
        }

        let lists = [
            ("jira.project_keys", &self.jira.project_keys),
            ("jira.special_issue_keys", &self.jira.special_issue_keys),
            ("jira.internal_project_keys", &self.jira.internal_project_keys),
        ];
        for (name, keys) in lists {
            if keys.iter().any(|k| k.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must not contain empty keys"
                )));
            }
        }

        let positive = [
            ("fetch.page_size", self.fetch.page_size),
            ("fetch.max_pages", self.fetch.max_pages),
            ("fetch.key_range_upper", self.fetch.key_range_upper),
            ("fetch.project_batch_size", self.fetch.project_batch_size),
            ("fetch.parallelism", self.fetch.parallelism),
            ("fetch.max_in_flight", self.fetch.max_in_flight),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if self.fetch.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch.request_timeout_secs must be > 0".into(),
            ));
        }
        if self.fetch.marker_issue_type.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.marker_issue_type must not be empty".into(),
            ));
        }

        if self.output.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output.path must not be empty".into()));
        }
        if self.build.enabled {
            if self.build.command.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "build.command must not be empty when build.enabled".into(),
                ));
            }
            if self.build.timeout_secs == 0 {
                return Err(ConfigError::Invalid("build.timeout_secs must be > 0".into()));
            }
        }

        for (raw, standard) in &self.fields.rename {
            if raw.trim().is_empty() || standard.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "fields.rename entries must not be empty".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn category_keys(&self) -> CategoryKeys {
        CategoryKeys {
            client_projects: self.jira.project_keys.clone(),
            internal_projects: self.jira.internal_project_keys.clone(),
            special_issues: self.jira.special_issue_keys.clone(),
        }
    }

    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            marker_issue_type: self.fetch.marker_issue_type.clone(),
            summary_denylist: self.fetch.summary_denylist.clone(),
            key_range_upper: self.fetch.key_range_upper,
            project_batch_size: self.fetch.project_batch_size,
            parallelism: self.fetch.parallelism,
            discover_assigned_projects: self.jira.discover_assigned_projects,
        }
    }

    pub fn pager_settings(&self) -> PagerSettings {
        PagerSettings {
            page_size: self.fetch.page_size,
            delay: Duration::from_millis(self.fetch.delay_ms),
            max_pages: self.fetch.max_pages,
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.fetch.request_timeout_secs),
            max_in_flight: self.fetch.max_in_flight,
            max_retries: self.fetch.max_retries,
        }
    }

    pub fn bitbucket_username(&self) -> &str {
        self.bitbucket
            .username
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(&self.jira.email)
    }
}

fn default_bitbucket_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

const fn default_page_size() -> usize {
    50
}

const fn default_delay_ms() -> u64 {
    250
}

const fn default_max_pages() -> usize {
    1000
}

const fn default_key_range_upper() -> usize {
    15
}

const fn default_project_batch_size() -> usize {
    25
}

const fn default_parallelism() -> usize {
    4
}

const fn default_max_in_flight() -> usize {
    4
}

const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_marker_issue_type() -> String {
    "Project".to_string()
}

fn default_summary_denylist() -> Vec<String> {
    vec!["old".to_string(), "deprecated".to_string()]
}

fn default_output_path() -> PathBuf {
    PathBuf::from("src/literals.generated.ts")
}

const fn default_true() -> bool {
    true
}

fn default_build_command() -> String {
    "npm run build".to_string()
}

const fn default_build_timeout_secs() -> u64 {
    600
}
