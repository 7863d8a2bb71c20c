use std::thread;

use serde::Serialize;

use crate::bitbucket::{open_branch_query, RawPullRequest, Repository};
use crate::http::TransportError;
use crate::pager::Pager;

/// Remote listings the correlator needs.
pub trait PullRequestSource: Sync {
    fn user_pull_requests(
        &self,
        workspace: &str,
        user: &str,
        query: &str,
        pager: &Pager,
    ) -> Result<Vec<RawPullRequest>, TransportError>;

    fn contributor_repositories(
        &self,
        workspace: &str,
        pager: &Pager,
    ) -> Result<Vec<Repository>, TransportError>;

    fn repository_pull_requests(
        &self,
        workspace: &str,
        repo_slug: &str,
        query: &str,
        pager: &Pager,
    ) -> Result<Vec<RawPullRequest>, TransportError>;

    /// Repositories filed under the project with key `project_key`.
    fn repositories_for_project(
        &self,
        workspace: &str,
        project_key: &str,
        pager: &Pager,
    ) -> Result<Vec<Repository>, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRecord {
    pub branch_name: String,
    pub title: String,
    pub pr_link: String,
}

/// Drops pull requests without a branch name or an HTML link.
pub fn project(pull_requests: Vec<RawPullRequest>) -> Vec<PullRequestRecord> {
    pull_requests
        .into_iter()
        .filter_map(|pr| {
            let branch_name = pr.branch_name().filter(|b| !b.is_empty())?.to_string();
            let pr_link = pr.html_link().filter(|l| !l.is_empty())?.to_string();
            Some(PullRequestRecord {
                branch_name,
                title: pr.title,
                pr_link,
            })
        })
        .collect()
}

pub struct PullRequestCorrelator<S> {
    source: S,
    pager: Pager,
    parallelism: usize,
}

impl<S: PullRequestSource> PullRequestCorrelator<S> {
    pub fn new(source: S, pager: Pager, parallelism: usize) -> Self {
        Self {
            source,
            pager,
            parallelism: parallelism.max(1),
        }
    }

    /// Open pull requests of one user in the workspace whose branch mentions
    /// `issue_key`.
    pub fn for_user(
        &self,
        workspace: &str,
        user: &str,
        issue_key: &str,
    ) -> Result<Vec<PullRequestRecord>, TransportError> {
        let raw = self.source.user_pull_requests(
            workspace,
            user,
            &open_branch_query(issue_key),
            &self.pager,
        )?;
        Ok(project(raw))
    }

    /// Queries every repository the identity contributes to. A repository
    /// whose query fails contributes nothing; only the listing itself can
    /// fail the call.
    pub fn across_repositories(
        &self,
        workspace: &str,
        issue_key: &str,
    ) -> Result<Vec<PullRequestRecord>, TransportError> {
        let repositories = self.source.contributor_repositories(workspace, &self.pager)?;
        tracing::info!(repositories = repositories.len(), workspace, "scanning repositories");

        let query = open_branch_query(issue_key);
        let mut raw = Vec::new();
        for wave in repositories.chunks(self.parallelism) {
            let results: Vec<Vec<RawPullRequest>> = thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .iter()
                    .map(|repo| scope.spawn(|| self.repository_or_empty(workspace, repo, &query)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                    })
                    .collect()
            });
            raw.extend(results.into_iter().flatten());
        }

        Ok(project(raw))
    }

    /// Repositories linked to a project key. An empty result is logged.
    pub fn project_repositories(
        &self,
        workspace: &str,
        project_key: &str,
    ) -> Result<Vec<Repository>, TransportError> {
        let repositories = self
            .source
            .repositories_for_project(workspace, project_key, &self.pager)?;
        if repositories.is_empty() {
            tracing::warn!(project_key, workspace, "no repositories linked to project");
        }
        Ok(repositories)
    }

    fn repository_or_empty(
        &self,
        workspace: &str,
        repo: &Repository,
        query: &str,
    ) -> Vec<RawPullRequest> {
        match self
            .source
            .repository_pull_requests(workspace, &repo.slug, query, &self.pager)
        {
            Ok(prs) => prs,
            Err(err) => {
                tracing::warn!(repo = %repo.slug, error = %err, "pull request query failed; skipping repository");
                self.pager.metrics().inc_failed_query();
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::bitbucket::{Branch, BranchSource, Link, PullRequestLinks};
    use crate::metrics::Metrics;
    use crate::pager::PagerSettings;

    fn pr(title: &str, branch: Option<&str>, link: Option<&str>) -> RawPullRequest {
        RawPullRequest {
            title: title.into(),
            source: Some(BranchSource {
                branch: Some(Branch {
                    name: branch.map(ToString::to_string),
                }),
            }),
            links: Some(PullRequestLinks {
                html: Some(Link {
                    href: link.map(ToString::to_string),
                }),
            }),
            ..RawPullRequest::default()
        }
    }

    #[derive(Default)]
    struct StubSource {
        repos: Vec<&'static str>,
        per_repo: HashMap<&'static str, Result<Vec<RawPullRequest>, u16>>,
        user: Vec<RawPullRequest>,
    }

    fn http_error(status: u16) -> TransportError {
        TransportError::Http {
            status: reqwest::StatusCode::from_u16(status).expect("status"),
            body: "stub".into(),
        }
    }

    impl PullRequestSource for StubSource {
        fn user_pull_requests(
            &self,
            _workspace: &str,
            _user: &str,
            query: &str,
            _pager: &Pager,
        ) -> Result<Vec<RawPullRequest>, TransportError> {
            assert!(query.contains("state = \"OPEN\""));
            Ok(self.user.clone())
        }

        fn contributor_repositories(
            &self,
            _workspace: &str,
            _pager: &Pager,
        ) -> Result<Vec<Repository>, TransportError> {
            Ok(self
                .repos
                .iter()
                .map(|slug| Repository {
                    slug: slug.to_string(),
                    full_name: None,
                })
                .collect())
        }

        fn repositories_for_project(
            &self,
            workspace: &str,
            _project_key: &str,
            pager: &Pager,
        ) -> Result<Vec<Repository>, TransportError> {
            self.contributor_repositories(workspace, pager)
        }

        fn repository_pull_requests(
            &self,
            _workspace: &str,
            repo_slug: &str,
            _query: &str,
            _pager: &Pager,
        ) -> Result<Vec<RawPullRequest>, TransportError> {
            match self.per_repo.get(repo_slug) {
                Some(Ok(prs)) => Ok(prs.clone()),
                Some(Err(status)) => Err(http_error(*status)),
                None => Ok(Vec::new()),
            }
        }
    }

    fn correlator(source: StubSource) -> (PullRequestCorrelator<StubSource>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let pager = Pager::new(PagerSettings::default(), Arc::clone(&metrics)).with_pause(|_| {});
        (PullRequestCorrelator::new(source, pager, 2), metrics)
    }

    #[test]
    fn failing_repository_is_isolated() {
        let source = StubSource {
            repos: vec!["broken", "web", "api"],
            per_repo: HashMap::from([
                ("broken", Err(500)),
                (
                    "web",
                    Ok(vec![pr(
                        "ACME-12 login",
                        Some("feature/ACME-12"),
                        Some("https://bitbucket.org/acme/web/pull-requests/1"),
                    )]),
                ),
                ("api", Ok(Vec::new())),
            ]),
            ..StubSource::default()
        };
        let (correlator, metrics) = correlator(source);

        let records = correlator
            .across_repositories("acme", "ACME-12")
            .expect("does not fail");

        assert_eq!(
            records,
            vec![PullRequestRecord {
                branch_name: "feature/ACME-12".into(),
                title: "ACME-12 login".into(),
                pr_link: "https://bitbucket.org/acme/web/pull-requests/1".into(),
            }]
        );
        assert_eq!(metrics.snapshot().failed_queries, 1);
    }

    #[test]
    fn projection_drops_incomplete_records() {
        let records = project(vec![
            pr("ok", Some("ACME-1"), Some("https://x/1")),
            pr("no branch", None, Some("https://x/2")),
            pr("no link", Some("ACME-1"), None),
            pr("empty branch", Some(""), Some("https://x/3")),
            RawPullRequest::default(),
        ]);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "ok");
    }

    #[test]
    fn user_strategy_projects_results() {
        let source = StubSource {
            user: vec![
                pr("first", Some("ACME-3-a"), Some("https://x/1")),
                pr("second", None, Some("https://x/2")),
            ],
            ..StubSource::default()
        };
        let (correlator, _) = correlator(source);

        let records = correlator
            .for_user("acme", "ada", "ACME-3")
            .expect("records");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].branch_name, "ACME-3-a");
    }

    #[test]
    fn records_serialize_in_camel_case() {
        let record = PullRequestRecord {
            branch_name: "b".into(),
            title: "t".into(),
            pr_link: "l".into(),
        };
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"branchName": "b", "title": "t", "prLink": "l"})
        );
    }

    #[test]
    fn project_repositories_pass_through() {
        let source = StubSource {
            repos: vec!["web", "api"],
            ..StubSource::default()
        };
        let (correlator, _) = correlator(source);

        let repos = correlator
            .project_repositories("acme", "ACME")
            .expect("repositories");

        let slugs: Vec<_> = repos.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["web", "api"]);
    }
}
