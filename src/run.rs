use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::aggregate::{AggregationEngine, Category};
use crate::bitbucket::{BitbucketClient, Repository};
use crate::build::{run_build, BuildError};
use crate::catalog::LiteralCatalog;
use crate::codegen::{render_literal_types, write_output, OutputError};
use crate::config::{AppConfig, ConfigError};
use crate::http::TransportError;
use crate::jira::JiraClient;
use crate::metrics::Metrics;
use crate::normalize::{FieldNormalizer, FieldRenameTable, RenameTableError};
use crate::pager::Pager;
use crate::pullrequests::{PullRequestCorrelator, PullRequestRecord};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid field rename table: {0}")]
    RenameTable(#[from] RenameTableError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0} is required for this command")]
    MissingCredential(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub output: Option<PathBuf>,
    pub skip_build: bool,
}

#[derive(Debug)]
pub struct GenerateReport {
    pub output_path: PathBuf,
    pub issues: usize,
    pub catalogs: usize,
    pub failed_categories: Vec<Category>,
    pub built: bool,
}

/// Fetches, catalogs, writes the literal file and runs the build.
pub fn generate(config: &AppConfig, options: &GenerateOptions) -> Result<GenerateReport, RunError> {
    let table = FieldRenameTable::builtin()?.merged_with(&config.fields.rename)?;
    let metrics = Arc::new(Metrics::new());
    let jira = JiraClient::new(
        &config.jira.host,
        config.jira.email.clone(),
        config.jira.api_token.clone(),
        &config.http_settings(),
        Arc::clone(&metrics),
    )?;

    match jira.get_myself() {
        Ok(identity) => tracing::info!(
            account = identity.account_id.as_deref().unwrap_or("-"),
            name = identity.display_name.as_deref().unwrap_or("-"),
            host = %jira.base_url,
            "authenticated"
        ),
        Err(err) => tracing::warn!(error = %err, host = %jira.base_url, "identity probe failed"),
    }

    let pager = Pager::new(config.pager_settings(), Arc::clone(&metrics));
    let engine = AggregationEngine::new(
        jira,
        FieldNormalizer::new(table),
        pager,
        config.query_settings(),
    );
    let aggregate = engine.run(&config.category_keys());

    let catalog = LiteralCatalog::from_issues(aggregate.iter());
    tracing::info!(
        issues = aggregate.len(),
        catalogs = catalog.len(),
        "built literal catalogs"
    );

    let output_path = options
        .output
        .clone()
        .unwrap_or_else(|| config.output.path.clone());
    write_output(&output_path, &render_literal_types(&catalog, Utc::now()))?;

    let built = config.build.enabled && !options.skip_build;
    if built {
        run_build(
            &config.build.command,
            config.build.working_dir.as_deref(),
            Duration::from_secs(config.build.timeout_secs),
        )?;
    } else {
        tracing::info!("build step skipped");
    }

    metrics.log_summary();
    Ok(GenerateReport {
        output_path,
        issues: aggregate.len(),
        catalogs: catalog.len(),
        failed_categories: aggregate.failed,
        built,
    })
}

#[derive(Debug, Clone, Default)]
pub struct PullRequestOptions {
    /// Defaults to the configured Bitbucket username.
    pub user: Option<String>,
    pub all_repositories: bool,
}

/// Open pull requests whose source branch mentions `issue_key`.
pub fn pull_requests(
    config: &AppConfig,
    issue_key: &str,
    options: &PullRequestOptions,
) -> Result<Vec<PullRequestRecord>, RunError> {
    let metrics = Arc::new(Metrics::new());
    let correlator = bitbucket_correlator(config, &metrics)?;
    let user = options
        .user
        .clone()
        .unwrap_or_else(|| config.bitbucket_username().to_string());

    let workspace = config.bitbucket.workspace.as_str();
    let records = if options.all_repositories {
        correlator.across_repositories(workspace, issue_key)?
    } else {
        correlator.for_user(workspace, &user, issue_key)?
    };

    tracing::info!(issue_key, records = records.len(), "pull requests correlated");
    metrics.log_summary();
    Ok(records)
}

/// Repositories linked to `project_key` in the configured workspace.
pub fn project_repositories(
    config: &AppConfig,
    project_key: &str,
) -> Result<Vec<Repository>, RunError> {
    let metrics = Arc::new(Metrics::new());
    let correlator = bitbucket_correlator(config, &metrics)?;
    let repositories =
        correlator.project_repositories(&config.bitbucket.workspace, project_key)?;
    metrics.log_summary();
    Ok(repositories)
}

/// Keys of the Jira projects visible to the configured identity. A failed
/// lookup is logged and yields an empty list.
pub fn visible_projects(config: &AppConfig) -> Result<Vec<String>, RunError> {
    let metrics = Arc::new(Metrics::new());
    let jira = JiraClient::new(
        &config.jira.host,
        config.jira.email.clone(),
        config.jira.api_token.clone(),
        &config.http_settings(),
        Arc::clone(&metrics),
    )?;
    let pager = Pager::new(config.pager_settings(), Arc::clone(&metrics));

    let keys = match jira.list_visible_projects(&pager) {
        Ok(keys) => keys,
        Err(err) => {
            tracing::warn!(error = %err, host = %jira.base_url, "project lookup failed");
            metrics.inc_failed_query();
            Vec::new()
        }
    };
    metrics.log_summary();
    Ok(keys)
}

fn bitbucket_correlator(
    config: &AppConfig,
    metrics: &Arc<Metrics>,
) -> Result<PullRequestCorrelator<BitbucketClient>, RunError> {
    let api_token = config
        .bitbucket
        .api_token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or(RunError::MissingCredential("bitbucket.api_token"))?;
    let client = BitbucketClient::new(
        &config.bitbucket.api_url,
        config.bitbucket_username().to_string(),
        api_token,
        &config.http_settings(),
        Arc::clone(metrics),
    )?;
    let pager = Pager::new(config.pager_settings(), Arc::clone(metrics));
    Ok(PullRequestCorrelator::new(
        client,
        pager,
        config.fetch.parallelism,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    fn config(server: &MockServer) -> AppConfig {
        let raw = format!(
            r#"
            [jira]
            host = "{jira}"
            email = "e"
            api_token = "t"
            project_keys = ["ACME"]
            special_issue_keys = ["OPS-1"]
            internal_project_keys = ["INT"]

            [bitbucket]
            workspace = "acme"
            api_url = "{bitbucket}"

            [fetch]
            delay_ms = 0

            [build]
            enabled = false
            "#,
            jira = server.base_url(),
            bitbucket = server.url("/2.0"),
        );
        let cfg: AppConfig = toml::from_str(&raw).expect("config");
        cfg.validate().expect("valid");
        cfg
    }

    #[test]
    fn generate_writes_literal_file() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/myself");
            then.status(200)
                .json_body_obj(&serde_json::json!({"accountId": "abc", "displayName": "Ada"}));
        });
        let search = server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/search/jql");
            then.status(200).json_body_obj(&serde_json::json!({
                "issues": [{
                    "key": "ACME-1",
                    "fields": {
                        "created": "2024-01-02T10:00:00.000+0000",
                        "summary": "Kickoff",
                        "status": {"name": "Open"},
                        "labels": ["urgent"],
                        "customfield_19999": {"id": "7", "value": "Mobile"}
                    }
                }]
            }));
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("generated").join("literals.ts");
        let options = GenerateOptions {
            output: Some(out.clone()),
            skip_build: false,
        };

        let report = generate(&config(&server), &options).expect("generate");

        assert!(search.hits() >= 3);
        assert!(report.failed_categories.is_empty());
        assert!(!report.built);
        assert_eq!(report.output_path, out);

        let written = std::fs::read_to_string(&out).expect("read output");
        assert!(written.starts_with("// Auto-generated on "));
        assert!(written.contains("export type StatusName = \"Open\"\n"));
        assert!(written.contains("export type Label = \"urgent\"\n"));
        assert!(written.contains("export type Custom19999Value = \"Mobile\"\n"));
    }

    #[test]
    fn generate_survives_failing_search() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/search/jql");
            then.status(500).body("down");
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let options = GenerateOptions {
            output: Some(dir.path().join("literals.ts")),
            skip_build: true,
        };

        let report = generate(&config(&server), &options).expect("degrades, not fails");

        assert_eq!(report.issues, 0);
        assert_eq!(report.failed_categories.len(), 3);
        let written = std::fs::read_to_string(dir.path().join("literals.ts")).expect("read");
        assert!(!written.contains("export type"));
    }

    #[test]
    fn pull_requests_require_bitbucket_token() {
        let server = MockServer::start();
        let err = pull_requests(
            &config(&server),
            "ACME-1",
            &PullRequestOptions::default(),
        )
        .expect_err("no token");
        assert!(matches!(err, RunError::MissingCredential("bitbucket.api_token")));
    }

    #[test]
    fn pull_requests_default_to_configured_user() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/2.0/workspaces/acme/pullrequests/e");
            then.status(200).json_body_obj(&serde_json::json!({
                "values": [{
                    "title": "ACME-1 fix",
                    "source": {"branch": {"name": "bugfix/ACME-1"}},
                    "links": {"html": {"href": "https://bitbucket.org/acme/web/pull-requests/9"}}
                }]
            }));
        });
        let mut cfg = config(&server);
        cfg.bitbucket.api_token = Some("bb".into());

        let records = pull_requests(&cfg, "ACME-1", &PullRequestOptions::default())
            .expect("records");

        mock.assert();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].branch_name, "bugfix/ACME-1");
    }

    #[test]
    fn visible_projects_degrade_to_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/project/search");
            then.status(403).body("forbidden");
        });

        let keys = visible_projects(&config(&server)).expect("lookup never fails");
        assert!(keys.is_empty());
    }

    #[test]
    fn project_repositories_query_by_project_key() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/2.0/repositories/acme")
                .query_param("q", r#"project.key="ACME""#);
            then.status(200).json_body_obj(&serde_json::json!({
                "values": [{"slug": "web", "full_name": "acme/web"}]
            }));
        });
        let mut cfg = config(&server);
        cfg.bitbucket.api_token = Some("bb".into());

        let repos = project_repositories(&cfg, "ACME").expect("repositories");

        mock.assert();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].full_name.as_deref(), Some("acme/web"));
    }
}
