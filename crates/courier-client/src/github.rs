use std::time::Duration;

use async_trait::async_trait;
use courier_core::error::{AppError, FetchError};
use courier_core::models::FetchedContent;
use courier_core::traits::ContentResolver;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, LINK};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::http_backend::{USER_AGENT, map_reqwest_error};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Comment pages followed per issue (100 comments each).
const MAX_COMMENT_PAGES: usize = 10;
const ISSUE_PATTERN: &str =
    r"^https?://(?:(?:www|m)\.)?github\.com/([^/]+)/([^/]+)/issues/(\d+)(?:[/?#].*)?$";

/// Resolves GitHub issue URLs into Markdown: the issue followed by its
/// comments, fetched from the REST API.
#[derive(Clone)]
pub struct GithubIssueResolver {
    client: Client,
    api_url: String,
    token: Option<String>,
    timeout: Duration,
    raise_on_failure: bool,
    issue_url: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IssueRef {
    owner: String,
    repo: String,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    title: String,
    #[serde(default)]
    state: String,
    user: Option<User>,
    #[serde(default)]
    created_at: String,
    body: Option<String>,
    #[serde(default)]
    comments: u64,
}

#[derive(Debug, Deserialize)]
struct Comment {
    user: Option<User>,
    #[serde(default)]
    created_at: String,
    body: Option<String>,
}

impl GithubIssueResolver {
    pub const NAME: &'static str = "github_issue";

    pub fn new(token: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        let issue_url = Regex::new(ISSUE_PATTERN)
            .map_err(|e| AppError::ConfigError(format!("Invalid issue pattern: {e}")))?;

        Ok(Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            timeout: DEFAULT_TIMEOUT,
            raise_on_failure: false,
            issue_url,
        })
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Turn per-URL failures into a batch-level [`AppError::Resolver`].
    pub fn raise_on_failure(mut self, raise: bool) -> Self {
        self.raise_on_failure = raise;
        self
    }

    fn parse(&self, url: &str) -> Option<IssueRef> {
        let caps = self.issue_url.captures(url)?;
        Some(IssueRef {
            owner: caps.get(1)?.as_str().to_string(),
            repo: caps.get(2)?.as_str().to_string(),
            number: caps.get(3)?.as_str().parse().ok()?,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let (value, _) = self.get_page(&format!("{}{}", self.api_url, path)).await?;
        Ok(value)
    }

    /// GETs `endpoint` and returns the body with the `rel="next"` link, if any.
    async fn get_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<(T, Option<String>), FetchError> {
        let mut request = self
            .client
            .get(endpoint)
            .timeout(self.timeout)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: endpoint.to_string(),
            });
        }

        let next = next_link(response.headers());
        let value = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(format!("Invalid GitHub response: {e}")))?;
        Ok((value, next))
    }

    async fn fetch_comments(&self, base: &str, expected: u64) -> Result<Vec<Comment>, FetchError> {
        let mut comments = Vec::new();
        let mut next = Some(format!("{}{base}/comments?per_page=100", self.api_url));
        let mut pages = 0;

        while let Some(endpoint) = next.take() {
            if pages == MAX_COMMENT_PAGES {
                tracing::warn!(
                    issue = %base,
                    fetched = comments.len(),
                    expected,
                    "Comment page limit reached, truncating"
                );
                break;
            }
            let (page, link): (Vec<Comment>, _) = self.get_page(&endpoint).await?;
            comments.extend(page);
            next = link;
            pages += 1;
        }
        Ok(comments)
    }

    async fn fetch_issue(&self, url: &str) -> Result<Option<FetchedContent>, FetchError> {
        let Some(issue_ref) = self.parse(url) else {
            tracing::warn!(url, "Not a GitHub issue URL");
            return Ok(None);
        };
        let IssueRef {
            owner,
            repo,
            number,
        } = &issue_ref;

        let base = format!("/repos/{owner}/{repo}/issues/{number}");
        let issue: Issue = self.get(&base).await?;
        let comments: Vec<Comment> = if issue.comments > 0 {
            self.fetch_comments(&base, issue.comments).await?
        } else {
            Vec::new()
        };

        tracing::debug!(url, comments = comments.len(), "Fetched GitHub issue");
        let markdown = render(&issue_ref, &issue, &comments);

        Ok(Some(
            FetchedContent::text(url, markdown, "text/markdown")
                .with_title(issue.title.clone())
                .with_meta("source", "github")
                .with_meta("repo", format!("{owner}/{repo}"))
                .with_meta("issue", number.to_string()),
        ))
    }
}

/// Target of the `rel="next"` entry in a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

fn login(user: Option<&User>) -> &str {
    user.map(|u| u.login.as_str()).unwrap_or("ghost")
}

fn render(issue_ref: &IssueRef, issue: &Issue, comments: &[Comment]) -> String {
    let mut md = format!("# {} (#{})\n\n", issue.title, issue_ref.number);
    md.push_str(&format!(
        "**Repository**: {}/{} | **State**: {} | **Opened by**: {} | **Date**: {}\n\n",
        issue_ref.owner,
        issue_ref.repo,
        issue.state,
        login(issue.user.as_ref()),
        issue.created_at
    ));
    md.push_str(issue.body.as_deref().unwrap_or("").trim());
    md.push_str("\n\n---\n\n");

    if comments.is_empty() {
        return md;
    }
    md.push_str(&format!("## {} Comments\n\n", comments.len()));
    for comment in comments {
        md.push_str(&format!(
            "### {} ({})\n\n",
            login(comment.user.as_ref()),
            comment.created_at
        ));
        md.push_str(comment.body.as_deref().unwrap_or("").trim());
        md.push_str("\n\n---\n\n");
    }
    md
}

#[async_trait]
impl ContentResolver for GithubIssueResolver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, url: &str) -> bool {
        self.issue_url.is_match(url)
    }

    async fn resolve(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedContent>, AppError> {
        let mut contents = Vec::with_capacity(urls.len());
        for url in urls {
            if cancel.is_cancelled() {
                tracing::debug!(url, "Cancelled before fetching issue");
                break;
            }
            match self.fetch_issue(url).await {
                Ok(Some(content)) => contents.push(content),
                Ok(None) => {}
                Err(e) if self.raise_on_failure => {
                    return Err(AppError::resolver(Self::NAME, format!("{url}: {e}")));
                }
                Err(e) => tracing::warn!(url, error = %e, "Failed to fetch GitHub issue"),
            }
        }
        Ok(contents)
    }
}
