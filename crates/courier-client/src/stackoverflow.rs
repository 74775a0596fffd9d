use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use courier_core::error::{AppError, FetchError};
use courier_core::models::FetchedContent;
use courier_core::traits::ContentResolver;
use regex::Regex;
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cleaner::HtmdCleaner;
use crate::http_backend::{USER_AGENT, map_reqwest_error};

pub const DEFAULT_API_URL: &str = "https://api.stackexchange.com/2.3";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves Stack Overflow question URLs through the Stack Exchange API and
/// renders the question with its answers as Markdown.
#[derive(Clone)]
pub struct StackOverflowResolver {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    timeout: Duration,
    raise_on_failure: bool,
    question_id: Regex,
    cleaner: HtmdCleaner,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct ApiResponse<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
    #[serde(default)]
    score: i64,
    owner: Option<Owner>,
    #[serde(default)]
    creation_date: i64,
    #[serde(default)]
    body: String,
}

impl StackOverflowResolver {
    pub const NAME: &'static str = "stackoverflow";

    pub fn new(api_key: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        let question_id = Regex::new(r"stackoverflow\.com/questions/(\d+)")
            .map_err(|e| AppError::ConfigError(format!("Invalid question pattern: {e}")))?;

        Ok(Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout: DEFAULT_TIMEOUT,
            raise_on_failure: false,
            question_id,
            cleaner: HtmdCleaner::new(),
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

    fn extract_question_id(&self, url: &str) -> Option<u64> {
        self.question_id
            .captures(url)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, FetchError> {
        let mut query: Vec<(&str, &str)> = vec![("site", "stackoverflow"), ("filter", "withbody")];
        query.extend_from_slice(params);
        if let Some(key) = &self.api_key {
            query.push(("key", key.as_str()));
        }

        let endpoint = format!("{}{}", self.api_url, path);
        let url = Url::parse_with_params(&endpoint, &query)
            .map_err(|e| FetchError::Transport(format!("Invalid API URL {endpoint}: {e}")))?;

        let response = self
            .client
            .get(url.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: endpoint,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Transport(format!("Invalid Stack Exchange response: {e}")))
    }

    async fn fetch_question(&self, url: &str) -> Result<Option<FetchedContent>, FetchError> {
        let Some(id) = self.extract_question_id(url) else {
            tracing::warn!(url, "No question id in Stack Overflow URL");
            return Ok(None);
        };

        let questions: ApiResponse<Post> = self.get(&format!("/questions/{id}"), &[]).await?;
        let Some(question) = questions.items.into_iter().next() else {
            tracing::warn!(url, question_id = id, "Stack Overflow question not found");
            return Ok(None);
        };

        let mut answers: ApiResponse<Post> = self
            .get(
                &format!("/questions/{id}/answers"),
                &[("sort", "votes"), ("order", "desc")],
            )
            .await?;
        answers.items.sort_by(|a, b| b.score.cmp(&a.score));

        let title = decode_entities(&question.title);
        let markdown = self.render(&title, &question, &answers.items);

        Ok(Some(
            FetchedContent::text(url, markdown, "text/markdown")
                .with_title(title)
                .with_meta("source", Self::NAME)
                .with_meta("question_id", id.to_string()),
        ))
    }

    fn render(&self, title: &str, question: &Post, answers: &[Post]) -> String {
        let mut md = format!("# {title}\n\n");
        md.push_str(&format!(
            "**Score**: {} | **Asked by**: {} | **Date**: {}\n\n",
            question.score,
            author(question),
            format_date(question.creation_date)
        ));
        md.push_str(&self.cleaner.to_markdown_lossy(&question.body));
        md.push_str("\n\n---\n\n");
        md.push_str(&format!("## {} Answers\n\n", answers.len()));

        for (i, answer) in answers.iter().enumerate() {
            md.push_str(&format!("### Answer {} (Score: {})\n\n", i + 1, answer.score));
            md.push_str(&format!(
                "**Answered by**: {} | **Date**: {}\n\n",
                author(answer),
                format_date(answer.creation_date)
            ));
            md.push_str(&self.cleaner.to_markdown_lossy(&answer.body));
            md.push_str("\n\n---\n\n");
        }
        md
    }
}

fn author(post: &Post) -> String {
    post.owner
        .as_ref()
        .and_then(|o| o.display_name.as_deref())
        .map(decode_entities)
        .unwrap_or_else(|| "Anonymous".to_string())
}

fn format_date(epoch_secs: i64) -> String {
    DateTime::from_timestamp(epoch_secs, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// The API HTML-escapes titles and display names.
fn decode_entities(s: &str) -> String {
    Html::parse_fragment(s)
        .root_element()
        .text()
        .collect::<String>()
}

#[async_trait]
impl ContentResolver for StackOverflowResolver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, url: &str) -> bool {
        url.contains("stackoverflow.com/questions")
    }

    async fn resolve(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedContent>, AppError> {
        let mut contents = Vec::with_capacity(urls.len());
        for url in urls {
            if cancel.is_cancelled() {
                tracing::debug!(url, "Cancelled before fetching question");
                break;
            }
            match self.fetch_question(url).await {
                Ok(Some(content)) => contents.push(content),
                Ok(None) => {}
                Err(e) if self.raise_on_failure => {
                    return Err(AppError::resolver(Self::NAME, format!("{url}: {e}")));
                }
                Err(e) => {
                    tracing::warn!(url, error = %e, "Failed to fetch Stack Overflow question");
                }
            }
        }
        Ok(contents)
    }
}
