use crate::error::SearchError;
use crate::retry::{check_status, classify, RetryPolicy};
use crate::traits::TitleFilter;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1-mini";
const BACKEND: &str = "llm";

#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Asks a chat model which title candidates are dishes, desserts, drinks or snacks.
pub struct ChatCompletionTitleFilter {
    config: ChatCompletionConfig,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionTitleFilter {
    pub fn new(config: ChatCompletionConfig) -> Result<Self, SearchError> {
        if config.model.trim().is_empty() {
            return Err(SearchError::Configuration(
                "llm model must not be empty".to_string(),
            ));
        }
        let endpoint = format!(
            "{}/chat/completions",
            url::Url::parse(&config.base_url)?
                .as_str()
                .trim_end_matches('/')
        );
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, SearchError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: 0.0,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|error| classify(BACKEND, self.config.timeout, error))?;
        let response = check_status(BACKEND, response).await?;
        let parsed: ChatResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "completion has no content".to_string(),
            })
    }
}

#[async_trait]
impl TitleFilter for ChatCompletionTitleFilter {
    async fn filter_food_names(&self, candidates: &[String]) -> Result<Vec<String>, SearchError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = food_filter_prompt(candidates);
        let reply = self
            .config
            .retry
            .run(BACKEND, || self.complete(&prompt))
            .await?;
        let names = parse_name_lines(&reply);
        debug!(
            candidates = candidates.len(),
            kept = names.len(),
            "filtered title candidates"
        );
        Ok(names)
    }
}

pub fn food_filter_prompt(candidates: &[String]) -> String {
    format!(
        "다음 텍스트 목록은 PDF에서 추출된 굵은 글씨 또는 큰 폰트 후보들입니다.\n\
         이 중에서 '음식,디저트,음료,간식'만 골라서, 불필요한 기호 없이 깔끔한 리스트로 반환해 주세요.\n\
         리스트의 항목은 중복을 허용하지 않습니다.\n\n\
         후보 목록:\n{}\n\n\
         반환 형식:\n\
         기호 없이 한줄에 하나씩 음식명만",
        candidates.join("\n")
    )
}

/// One name per non-empty line; list markers are stripped and repeats dropped.
pub fn parse_name_lines(reply: &str) -> Vec<String> {
    static LIST_MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = LIST_MARKER
        .get_or_init(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("static list marker"));

    let mut seen = HashSet::new();
    reply
        .lines()
        .map(|line| marker.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_lines_become_unique_names() {
        let reply = "김치찌개\n\n- 불고기\n2. 식혜\n3색 나물\n김치찌개\n  ";
        assert_eq!(
            parse_name_lines(reply),
            vec![
                "김치찌개".to_string(),
                "불고기".to_string(),
                "식혜".to_string(),
                "3색 나물".to_string()
            ]
        );
    }

    #[test]
    fn prompt_lists_each_candidate_on_its_own_line() {
        let prompt = food_filter_prompt(&["예열 방법".to_string(), "호박죽".to_string()]);
        assert!(prompt.contains("후보 목록:\n예열 방법\n호박죽\n"));
        assert!(prompt.contains("음식,디저트,음료,간식"));
    }

    #[test]
    fn empty_model_is_rejected() {
        let result = ChatCompletionTitleFilter::new(ChatCompletionConfig {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key: None,
            model: " ".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
        });
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }

    #[tokio::test]
    async fn no_candidates_skip_the_call() {
        let filter = ChatCompletionTitleFilter::new(ChatCompletionConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            timeout: Duration::from_millis(100),
            retry: RetryPolicy::none(),
        })
        .expect("filter");
        assert!(filter
            .filter_food_names(&[])
            .await
            .expect("empty input")
            .is_empty());
    }
}
