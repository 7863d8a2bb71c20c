use std::marker::PhantomData;
use std::sync::Arc;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::http::{normalize_base_url, HttpClient, HttpSettings, TransportError};
use crate::metrics::Metrics;
use crate::pager::{Page, PageSource, Pager};
use crate::pullrequests::PullRequestSource;

pub const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";
const REPOSITORY_PAGELEN: usize = 100;
const PULL_REQUEST_PAGELEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Repository {
    pub slug: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPullRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: Option<BranchSource>,
    #[serde(default)]
    pub links: Option<PullRequestLinks>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchSource {
    #[serde(default)]
    pub branch: Option<Branch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestLinks {
    #[serde(default)]
    pub html: Option<Link>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub href: Option<String>,
}

impl RawPullRequest {
    pub fn branch_name(&self) -> Option<&str> {
        self.source
            .as_ref()?
            .branch
            .as_ref()?
            .name
            .as_deref()
    }

    pub fn html_link(&self) -> Option<&str> {
        self.links.as_ref()?.html.as_ref()?.href.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

/// Bitbucket filter for open pull requests whose source branch mentions
/// `issue_key`.
pub fn open_branch_query(issue_key: &str) -> String {
    let escaped = issue_key.replace('\\', "\\\\").replace('"', "\\\"");
    format!("source.branch.name ~ \"{escaped}\" AND state = \"OPEN\"")
}

/// Bitbucket filter for repositories linked to a Bitbucket project key.
pub fn project_repository_query(project_key: &str) -> String {
    let escaped = project_key.replace('\\', "\\\\").replace('"', "\\\"");
    format!("project.key=\"{escaped}\"")
}

#[derive(Debug, Clone)]
pub struct BitbucketClient {
    pub base_url: String,
    username: String,
    api_token: String,
    http: HttpClient,
}

impl BitbucketClient {
    pub fn new(
        base_url: &str,
        username: String,
        api_token: String,
        settings: &HttpSettings,
        metrics: Arc<Metrics>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            username,
            api_token,
            http: HttpClient::new(settings, metrics)?,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let invalid = || TransportError::InvalidBaseUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collect<T: DeserializeOwned>(
        &self,
        url: Url,
        query: Vec<(&'static str, String)>,
        pager: &Pager,
    ) -> Result<Vec<T>, TransportError> {
        pager.collect(&LinkPaged {
            client: self,
            url,
            query,
            _item: PhantomData,
        })
    }
}

/// A Bitbucket listing whose continuation token is the absolute `next` URL.
struct LinkPaged<'a, T> {
    client: &'a BitbucketClient,
    url: Url,
    query: Vec<(&'static str, String)>,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PageSource for LinkPaged<'_, T> {
    type Item = T;
    type Error = TransportError;

    fn fetch_page(&self, page_size: usize, token: Option<&str>) -> Result<Page<T>, TransportError> {
        let client = self.client;
        let payload: Paginated<T> = match token {
            Some(next) => client.http.get_json(|http| {
                http.get(next)
                    .basic_auth(&client.username, Some(&client.api_token))
            })?,
            None => {
                let mut query = self.query.clone();
                query.push(("pagelen", page_size.to_string()));
                client.http.get_json(|http| {
                    http.get(self.url.clone())
                        .basic_auth(&client.username, Some(&client.api_token))
                        .query(&query)
                })?
            }
        };

        tracing::debug!(
            url = %self.url,
            page_len = payload.values.len(),
            has_next = payload.next.is_some(),
            "bitbucket page"
        );

        Ok(Page {
            items: payload.values,
            next_token: payload.next,
        })
    }
}

impl PullRequestSource for BitbucketClient {
    fn user_pull_requests(
        &self,
        workspace: &str,
        user: &str,
        query: &str,
        pager: &Pager,
    ) -> Result<Vec<RawPullRequest>, TransportError> {
        let url = self.endpoint(&["workspaces", workspace, "pullrequests", user])?;
        self.collect(
            url,
            vec![("q", query.to_string())],
            &pager.with_page_size(PULL_REQUEST_PAGELEN),
        )
    }

    fn contributor_repositories(
        &self,
        workspace: &str,
        pager: &Pager,
    ) -> Result<Vec<Repository>, TransportError> {
        let url = self.endpoint(&["repositories", workspace])?;
        self.collect(
            url,
            vec![("role", "contributor".to_string())],
            &pager.with_page_size(REPOSITORY_PAGELEN),
        )
    }

    fn repositories_for_project(
        &self,
        workspace: &str,
        project_key: &str,
        pager: &Pager,
    ) -> Result<Vec<Repository>, TransportError> {
        let url = self.endpoint(&["repositories", workspace])?;
        self.collect(
            url,
            vec![("q", project_repository_query(project_key))],
            &pager.with_page_size(REPOSITORY_PAGELEN),
        )
    }

    fn repository_pull_requests(
        &self,
        workspace: &str,
        repo_slug: &str,
        query: &str,
        pager: &Pager,
    ) -> Result<Vec<RawPullRequest>, TransportError> {
        let url = self.endpoint(&["repositories", workspace, repo_slug, "pullrequests"])?;
        self.collect(
            url,
            vec![("q", query.to_string())],
            &pager.with_page_size(PULL_REQUEST_PAGELEN),
        )
    }
}
