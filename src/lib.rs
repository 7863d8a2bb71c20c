//! `jira-literals` derives TypeScript literal union types from live Jira data
//! and correlates Jira issues with open Bitbucket pull requests.

/// Issue retrieval strategies and per-category assembly.
pub mod aggregate;
/// Bitbucket Cloud API client.
pub mod bitbucket;
/// Downstream build step with a timeout.
pub mod build;
/// Literal catalogs observed in issue fields.
pub mod catalog;
/// Literal type rendering and output file writing.
pub mod codegen;
/// Runtime configuration loading and validation.
pub mod config;
/// Shared HTTP transport with concurrency limits and retries.
pub mod http;
/// Jira issue records and ordering helpers.
pub mod issue;
/// Jira API client.
pub mod jira;
/// Tracing subscriber setup.
pub mod logging;
/// Runtime metrics counters.
pub mod metrics;
/// Field key standardization.
pub mod normalize;
/// Token-driven pagination.
pub mod pager;
/// Pull request correlation by issue key.
pub mod pullrequests;
/// End-to-end command pipelines.
pub mod run;
