use std::sync::Arc;

use serde::Deserialize;

use crate::aggregate::IssueSearch;
use crate::http::{normalize_base_url, HttpClient, HttpSettings, TransportError};
use crate::issue::RawIssue;
use crate::metrics::Metrics;
use crate::pager::{Page, PageSource, Pager};

const SEARCH_PATH: &str = "/rest/api/2/search/jql";
const PROJECT_SEARCH_PATH: &str = "/rest/api/2/project/search";
const ALL_FIELDS: &str = "*all";
const KEY_FIELD: &str = "key";

#[derive(Debug, Clone)]
pub struct JiraIdentity {
    pub account_id: Option<String>,
    pub display_name: Option<String>,
    pub email_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JiraClient {
    pub base_url: String,
    email: String,
    api_token: String,
    http: HttpClient,
}

impl JiraClient {
    pub fn new(
        base_url: &str,
        email: String,
        api_token: String,
        settings: &HttpSettings,
        metrics: Arc<Metrics>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            email,
            api_token,
            http: HttpClient::new(settings, metrics)?,
        })
    }

    /// Fetches one page of the enhanced JQL search.
    pub fn search_page(
        &self,
        jql: &str,
        page_size: usize,
        fields: &str,
        token: Option<&str>,
    ) -> Result<Page<RawIssue>, TransportError> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let mut query = vec![
            ("jql", jql.to_string()),
            ("maxResults", page_size.to_string()),
            ("fields", fields.to_string()),
        ];
        if fields == ALL_FIELDS {
            query.push(("expand", "renderedFields".to_string()));
        }
        if let Some(token) = token {
            query.push(("nextPageToken", token.to_string()));
        }

        let payload: SearchResponse = self.http.get_json(|http| {
            http.get(&url)
                .basic_auth(&self.email, Some(&self.api_token))
                .query(&query)
        })?;

        tracing::debug!(
            jql,
            page_len = payload.issues.len(),
            next_page_token_present = payload.next_page_token.is_some(),
            is_last = ?payload.is_last,
            "jira search page"
        );

        let next_token = if payload.is_last == Some(true) {
            None
        } else {
            payload.next_page_token
        };

        Ok(Page {
            items: payload.issues,
            next_token,
        })
    }

    pub fn get_myself(&self) -> Result<JiraIdentity, TransportError> {
        let url = format!("{}/rest/api/2/myself", self.base_url);
        let payload: MyselfResponse = self.http.get_json(|http| {
            http.get(&url)
                .basic_auth(&self.email, Some(&self.api_token))
        })?;

        Ok(JiraIdentity {
            account_id: payload.account_id,
            display_name: payload.display_name,
            email_address: payload.email_address,
        })
    }

    /// One page of the projects visible to the authenticated identity,
    /// starting at offset `start_at`.
    pub fn project_page(
        &self,
        page_size: usize,
        start_at: usize,
    ) -> Result<Page<String>, TransportError> {
        let url = format!("{}{}", self.base_url, PROJECT_SEARCH_PATH);
        let query = [
            ("startAt", start_at.to_string()),
            ("maxResults", page_size.to_string()),
        ];
        let payload: ProjectSearchResponse = self.http.get_json(|http| {
            http.get(&url)
                .basic_auth(&self.email, Some(&self.api_token))
                .query(&query)
        })?;

        let count = payload.values.len();
        let next_token = if payload.is_last.unwrap_or(true) || count == 0 {
            None
        } else {
            Some((start_at + count).to_string())
        };

        Ok(Page {
            items: payload.values.into_iter().map(|p| p.key).collect(),
            next_token,
        })
    }

    /// Keys of every project the identity can see.
    pub fn list_visible_projects(&self, pager: &Pager) -> Result<Vec<String>, TransportError> {
        pager.collect(&ProjectSearch { client: self })
    }
}

struct ProjectSearch<'a> {
    client: &'a JiraClient,
}

impl PageSource for ProjectSearch<'_> {
    type Item = String;
    type Error = TransportError;

    fn fetch_page(&self, page_size: usize, token: Option<&str>) -> Result<Page<String>, TransportError> {
        let start_at = token.and_then(|t| t.parse().ok()).unwrap_or(0);
        self.client.project_page(page_size, start_at)
    }
}

struct JqlSearch<'a> {
    client: &'a JiraClient,
    jql: &'a str,
    fields: &'a str,
}

impl PageSource for JqlSearch<'_> {
    type Item = RawIssue;
    type Error = TransportError;

    fn fetch_page(
        &self,
        page_size: usize,
        token: Option<&str>,
    ) -> Result<Page<RawIssue>, TransportError> {
        self.client
            .search_page(self.jql, page_size, self.fields, token)
    }
}

impl IssueSearch for JiraClient {
    fn search(&self, jql: &str, pager: &Pager) -> Result<Vec<RawIssue>, TransportError> {
        pager.collect(&JqlSearch {
            client: self,
            jql,
            fields: ALL_FIELDS,
        })
    }

    fn search_keys(&self, jql: &str, pager: &Pager) -> Result<Vec<String>, TransportError> {
        let issues = pager.collect(&JqlSearch {
            client: self,
            jql,
            fields: KEY_FIELD,
        })?;
        Ok(issues.into_iter().map(|issue| issue.key).collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    is_last: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSearchResponse {
    #[serde(default)]
    values: Vec<ProjectRef>,
    #[serde(default)]
    is_last: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyselfResponse {
    account_id: Option<String>,
    display_name: Option<String>,
    email_address: Option<String>,
}
