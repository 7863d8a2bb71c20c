//! Issue retrieval strategies and per-category assembly.
//!
//! Three categories are fetched independently:
//! - **client**: marker-type issues per project batch plus the explicit
//!   `KEY-1..KEY-N` range per project, deduplicated by key and sorted oldest
//!   first, followed by the issues assigned to the current user. The
//!   assigned issues are intentionally not deduplicated against the rest.
//! - **internal**: every issue of the internal projects.
//! - **special**: an explicit list of issue keys.
//!
//! A failing category degrades to an empty list; the others still complete.

use std::fmt;
use std::thread;

use crate::http::TransportError;
use crate::issue::{dedupe_by_key, project_prefix, sort_by_created, RawIssue, StandardizedIssue};
use crate::normalize::FieldNormalizer;
use crate::pager::Pager;

pub const MY_ISSUES_JQL: &str = "assignee = currentUser() ORDER BY created DESC";
const ORDER_BY_CREATED: &str = "ORDER BY created DESC";

/// Runs a JQL query to completion through a pager.
pub trait IssueSearch: Sync {
    fn search(&self, jql: &str, pager: &Pager) -> Result<Vec<RawIssue>, TransportError>;

    fn search_keys(&self, jql: &str, pager: &Pager) -> Result<Vec<String>, TransportError> {
        Ok(self
            .search(jql, pager)?
            .into_iter()
            .map(|issue| issue.key)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Client,
    Internal,
    Special,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Client => "client",
            Category::Internal => "internal",
            Category::Special => "special",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySettings {
    pub marker_issue_type: String,
    pub summary_denylist: Vec<String>,
    pub key_range_upper: usize,
    pub project_batch_size: usize,
    pub parallelism: usize,
    pub discover_assigned_projects: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            marker_issue_type: "Project".to_string(),
            summary_denylist: vec!["old".to_string(), "deprecated".to_string()],
            key_range_upper: 15,
            project_batch_size: 25,
            parallelism: 4,
            discover_assigned_projects: false,
        }
    }
}

/// Key lists driving the three categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryKeys {
    pub client_projects: Vec<String>,
    pub internal_projects: Vec<String>,
    pub special_issues: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Aggregate {
    pub client: Vec<StandardizedIssue>,
    pub internal: Vec<StandardizedIssue>,
    pub special: Vec<StandardizedIssue>,
    pub failed: Vec<Category>,
}

impl Aggregate {
    /// Client, internal and special issues in that order. Duplicates across
    /// categories are kept.
    pub fn iter(&self) -> impl Iterator<Item = &StandardizedIssue> {
        self.client
            .iter()
            .chain(self.internal.iter())
            .chain(self.special.iter())
    }

    pub fn len(&self) -> usize {
        self.client.len() + self.internal.len() + self.special.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct AggregationEngine<S> {
    search: S,
    normalizer: FieldNormalizer,
    pager: Pager,
    settings: QuerySettings,
}

impl<S: IssueSearch> AggregationEngine<S> {
    pub fn new(search: S, normalizer: FieldNormalizer, pager: Pager, settings: QuerySettings) -> Self {
        Self {
            search,
            normalizer,
            pager,
            settings,
        }
    }

    pub fn searcher(&self) -> &S {
        &self.search
    }

    /// Fetches all three categories concurrently. Never fails as a whole.
    pub fn run(&self, keys: &CategoryKeys) -> Aggregate {
        let (client, internal, special) = thread::scope(|scope| {
            let client = scope.spawn(|| {
                let projects = self.client_projects(&keys.client_projects);
                self.client_issues(&projects)
            });
            let internal = scope.spawn(|| self.internal_issues(&keys.internal_projects));
            let special = scope.spawn(|| self.special_issues(&keys.special_issues));
            (join(client), join(internal), join(special))
        });

        let mut aggregate = Aggregate::default();
        aggregate.client = self.settle(Category::Client, client, &mut aggregate.failed);
        aggregate.internal = self.settle(Category::Internal, internal, &mut aggregate.failed);
        aggregate.special = self.settle(Category::Special, special, &mut aggregate.failed);

        tracing::info!(
            client = aggregate.client.len(),
            internal = aggregate.internal.len(),
            special = aggregate.special.len(),
            failed = aggregate.failed.len(),
            "aggregated issues"
        );
        aggregate
    }

    fn settle(
        &self,
        category: Category,
        result: Result<Vec<StandardizedIssue>, TransportError>,
        failed: &mut Vec<Category>,
    ) -> Vec<StandardizedIssue> {
        match result {
            Ok(issues) => issues,
            Err(err) => {
                tracing::warn!(%category, error = %err, "category retrieval failed; continuing without it");
                self.pager.metrics().inc_failed_query();
                failed.push(category);
                Vec::new()
            }
        }
    }

    /// Configured client projects, optionally extended with the projects of
    /// issues assigned to the current user.
    pub fn client_projects(&self, configured: &[String]) -> Vec<String> {
        let mut projects = configured.to_vec();
        if !self.settings.discover_assigned_projects {
            return projects;
        }

        match self.search.search_keys(MY_ISSUES_JQL, &self.pager) {
            Ok(keys) => {
                for prefix in keys.iter().filter_map(|key| project_prefix(key)) {
                    if !projects.iter().any(|p| p == prefix) {
                        projects.push(prefix.to_string());
                    }
                }
                tracing::info!(projects = projects.len(), "discovered client projects");
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to discover assigned projects; using configured list");
            }
        }
        projects
    }

    pub fn client_issues(
        &self,
        project_keys: &[String],
    ) -> Result<Vec<StandardizedIssue>, TransportError> {
        if project_keys.is_empty() {
            tracing::debug!("no client projects configured");
            return Ok(Vec::new());
        }

        let assigned = self.fetch(&assigned_to_me_jql(project_keys))?;

        let batches: Vec<&[String]> = project_keys
            .chunks(self.settings.project_batch_size.max(1))
            .collect();
        let mut project_issues: Vec<StandardizedIssue> = self
            .run_parallel(&batches, |batch| {
                self.fetch(&marker_jql(
                    batch,
                    &self.settings.marker_issue_type,
                    &self.settings.summary_denylist,
                ))
            })?
            .into_iter()
            .flatten()
            .collect();

        let ranges = self.run_parallel(project_keys, |project| {
            self.fetch(&key_range_jql(
                project,
                self.settings.key_range_upper,
                &self.settings.summary_denylist,
            ))
        })?;
        project_issues.extend(ranges.into_iter().flatten());

        let mut project_issues = dedupe_by_key(project_issues);
        sort_by_created(&mut project_issues);

        tracing::debug!(
            project_issues = project_issues.len(),
            assigned = assigned.len(),
            "assembled client issues"
        );
        project_issues.extend(assigned);
        Ok(project_issues)
    }

    pub fn internal_issues(
        &self,
        project_keys: &[String],
    ) -> Result<Vec<StandardizedIssue>, TransportError> {
        if project_keys.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch(&project_jql(project_keys, &self.settings.summary_denylist))
    }

    pub fn special_issues(
        &self,
        issue_keys: &[String],
    ) -> Result<Vec<StandardizedIssue>, TransportError> {
        if issue_keys.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch(&issue_keys_jql(issue_keys, &self.settings.summary_denylist))
    }

    fn fetch(&self, jql: &str) -> Result<Vec<StandardizedIssue>, TransportError> {
        tracing::debug!(jql, "running query");
        let raw = self.search.search(jql, &self.pager)?;
        Ok(raw
            .into_iter()
            .map(|issue| self.normalizer.standardize_issue(issue))
            .collect())
    }

    /// Runs `f` over `inputs` in waves of `parallelism` threads. Results keep
    /// input order; the first error wins.
    fn run_parallel<T, R, F>(&self, inputs: &[T], f: F) -> Result<Vec<R>, TransportError>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R, TransportError> + Sync,
    {
        let mut out = Vec::with_capacity(inputs.len());
        for wave in inputs.chunks(self.settings.parallelism.max(1)) {
            let results: Vec<Result<R, TransportError>> = thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .iter()
                    .map(|input| scope.spawn(|| f(input)))
                    .collect();
                handles.into_iter().map(join).collect()
            });
            for result in results {
                out.push(result?);
            }
        }
        Ok(out)
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
}

fn quote_jql(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quoted_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| quote_jql(v.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn summary_filter(denylist: &[String]) -> String {
    denylist
        .iter()
        .map(|token| format!(" AND summary !~ {}", quote_jql(token)))
        .collect()
}

pub fn assigned_to_me_jql(project_keys: &[String]) -> String {
    format!(
        "project IN ({}) AND assignee = currentUser() {ORDER_BY_CREATED}",
        quoted_list(project_keys)
    )
}

pub fn marker_jql(project_keys: &[String], marker_issue_type: &str, denylist: &[String]) -> String {
    format!(
        "project IN ({}) AND issuetype = {}{} {ORDER_BY_CREATED}",
        quoted_list(project_keys),
        quote_jql(marker_issue_type),
        summary_filter(denylist)
    )
}

pub fn key_range_jql(project_key: &str, upper: usize, denylist: &[String]) -> String {
    let keys: Vec<String> = (1..=upper).map(|n| format!("{project_key}-{n}")).collect();
    format!(
        "issuekey IN ({}){} {ORDER_BY_CREATED}",
        quoted_list(&keys),
        summary_filter(denylist)
    )
}

pub fn project_jql(project_keys: &[String], denylist: &[String]) -> String {
    format!(
        "project IN ({}){} {ORDER_BY_CREATED}",
        quoted_list(project_keys),
        summary_filter(denylist)
    )
}

pub fn issue_keys_jql(issue_keys: &[String], denylist: &[String]) -> String {
    format!(
        "issuekey IN ({}){} {ORDER_BY_CREATED}",
        quoted_list(issue_keys),
        summary_filter(denylist)
    )
}
