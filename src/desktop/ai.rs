//! Language model integration.
//!
//! `ChatBackend` is the seam to the model provider. `AiService` wraps a
//! backend with the prompts for each desktop feature and turns every failure
//! into a fixed fallback value, so callers never see an AI error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::models::FileNode;
use crate::config::AiSection;
use crate::errors::AiError;

// ── Backend ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    /// Ask the provider for a JSON object reply.
    pub json_mode: bool,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Single-shot completion returning the assistant's text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, AiError>;
    fn model_id(&self) -> &str;
}

async fn check_response_status(resp: reqwest::Response) -> Result<Value, AiError> {
    let status = resp.status().as_u16();
    let body: Value = resp.json().await?;
    if status >= 400 {
        let message = body["error"]["message"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .unwrap_or("unknown API error")
            .to_string();
        return Err(AiError::Api { status, message });
    }
    Ok(body)
}

/// OpenAI-compatible `chat/completions` client.
pub struct OpenAiBackend {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AiError> {
        let mut body = json!({
            "model": &self.model,
            "messages": request.messages,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or(AiError::EmptyReply)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Stand-in used when no API key is configured.
pub struct DisabledBackend;

#[async_trait]
impl ChatBackend for DisabledBackend {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, AiError> {
        Err(AiError::NotConfigured)
    }

    fn model_id(&self) -> &str {
        "disabled"
    }
}

// ── Results ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandInterpretation {
    pub original_command: String,
    pub interpretation: String,
    pub bash_command: String,
    pub confidence: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiResponse {
    pub content: String,
    pub suggestions: Vec<String>,
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileAnalysis {
    pub suggestions: Vec<String>,
    pub insights: Vec<String>,
    pub optimizations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Error,
    Warning,
    Improvement,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeSuggestion {
    pub line: u32,
    pub suggestion: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedFile {
    pub file: FileNode,
    pub relevance: f64,
}

const CHAT_FALLBACK: &str = "I'm experiencing technical difficulties. Please try again later.";
const CHAT_EMPTY: &str = "I'm sorry, I couldn't process your request.";
const OPTIMIZE_FALLBACK: &str = "System optimization temporarily unavailable";
const RANK_FALLBACK_RELEVANCE: f64 = 0.5;

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_object(reply: &str) -> Result<Value, AiError> {
    let value: Value = serde_json::from_str(reply)?;
    if !value.is_object() && !value.is_array() {
        return Err(AiError::EmptyReply);
    }
    Ok(value)
}

// ── Service ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AiService {
    backend: Arc<dyn ChatBackend>,
}

impl AiService {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledBackend))
    }

    /// OpenAI backend when an API key is configured, disabled otherwise.
    pub fn from_config(config: &AiSection) -> Result<Self, AiError> {
        match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let backend = OpenAiBackend::new(
                    &config.base_url,
                    &config.model,
                    key,
                    Duration::from_secs(config.timeout_secs),
                )?;
                info!(model = %config.model, base_url = %config.base_url, "AI backend enabled");
                Ok(Self::new(Arc::new(backend)))
            }
            None => {
                info!("No AI API key configured; AI features will return fallbacks");
                Ok(Self::disabled())
            }
        }
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    async fn ask_json(&self, system: String, user: String) -> Result<Value, AiError> {
        let reply = self
            .backend
            .complete(CompletionRequest {
                messages: vec![PromptMessage::system(system), PromptMessage::user(user)],
                json_mode: true,
            })
            .await?;
        parse_object(&reply)
    }

    /// Translate a natural-language command into a shell command.
    pub async fn interpret_command(&self, command: &str, cwd: &str) -> CommandInterpretation {
        let system = format!(
            "You are an AI assistant that interprets natural language commands and converts them to bash commands.\n\
             Current directory: {cwd}\n\
             Respond with JSON in this format: {{\"interpretation\": \"human-readable explanation\", \
             \"bashCommand\": \"actual bash command\", \"confidence\": 0.95, \
             \"explanation\": \"detailed explanation of what the command does\"}}"
        );
        match self.ask_json(system, command.to_string()).await {
            Ok(result) => CommandInterpretation {
                original_command: command.to_string(),
                interpretation: result["interpretation"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Command interpretation unavailable")
                    .to_string(),
                bash_command: result["bashCommand"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(command)
                    .to_string(),
                confidence: result["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
                explanation: result["explanation"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("No explanation available")
                    .to_string(),
            },
            Err(e) => {
                warn!(error = %e, "AI command interpretation failed");
                CommandInterpretation {
                    original_command: command.to_string(),
                    interpretation: "Could not interpret command".into(),
                    bash_command: command.to_string(),
                    confidence: 0.1,
                    explanation: "AI service temporarily unavailable".into(),
                }
            }
        }
    }

    /// Free-form assistant reply. `context` lines are appended to the system prompt.
    pub async fn chat_response(&self, message: &str, context: &[String]) -> AiResponse {
        let context_line = if context.is_empty() {
            String::new()
        } else {
            format!("\nContext: {}", context.join(" "))
        };
        let request = CompletionRequest {
            messages: vec![
                PromptMessage::system(format!(
                    "You are an AI assistant for a Linux operating system. You help users with system \
                     navigation, troubleshooting, and optimization. Be helpful, concise, and technical \
                     when appropriate.{context_line}"
                )),
                PromptMessage::user(message),
            ],
            json_mode: false,
        };
        match self.backend.complete(request).await {
            Ok(content) => AiResponse {
                content,
                suggestions: Vec::new(),
                metadata: serde_json::Map::new(),
            },
            Err(AiError::EmptyReply) => AiResponse {
                content: CHAT_EMPTY.into(),
                suggestions: Vec::new(),
                metadata: serde_json::Map::new(),
            },
            Err(e) => {
                warn!(error = %e, "AI chat response failed");
                let mut metadata = serde_json::Map::new();
                metadata.insert("error".into(), Value::Bool(true));
                AiResponse {
                    content: CHAT_FALLBACK.into(),
                    suggestions: Vec::new(),
                    metadata,
                }
            }
        }
    }

    pub async fn analyze_file(&self, file_name: &str, content: &str) -> FileAnalysis {
        let system = "You are a code analysis AI. Analyze the given file and provide suggestions, \
                      insights, and optimizations.\nRespond with JSON in this format: \
                      {\"suggestions\": [\"suggestion1\"], \"insights\": [\"insight1\"], \
                      \"optimizations\": [\"optimization1\"]}"
            .to_string();
        let user = format!("File: {file_name}\n\nContent:\n{content}");
        match self.ask_json(system, user).await {
            Ok(result) => FileAnalysis {
                suggestions: string_list(&result["suggestions"]),
                insights: string_list(&result["insights"]),
                optimizations: string_list(&result["optimizations"]),
            },
            Err(e) => {
                warn!(error = %e, file_name, "AI file analysis failed");
                FileAnalysis::default()
            }
        }
    }

    /// Line-level review comments. Entries that do not match the expected
    /// shape are skipped.
    pub async fn code_suggestions(&self, code: &str, language: &str) -> Vec<CodeSuggestion> {
        let system = format!(
            "You are a code review AI. Analyze the {language} code and provide line-specific suggestions.\n\
             Respond with JSON in this format: {{\"suggestions\": [{{\"line\": 1, \
             \"suggestion\": \"suggestion text\", \"type\": \"error|warning|improvement\"}}]}}"
        );
        match self.ask_json(system, code.to_string()).await {
            Ok(result) => {
                let items = if result.is_array() {
                    result
                } else {
                    result["suggestions"].clone()
                };
                items
                    .as_array()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|e| serde_json::from_value(e.clone()).ok())
                            .collect()
                    })
                    .unwrap_or_default()
            }
            Err(e) => {
                warn!(error = %e, language, "AI code suggestions failed");
                Vec::new()
            }
        }
    }

    pub async fn optimize_system(&self, metrics: &serde_json::Map<String, Value>) -> Vec<String> {
        let system = "You are a system optimization AI. Based on the system metrics, provide \
                      optimization recommendations.\nRespond with JSON in this format: \
                      {\"optimizations\": [\"optimization1\", \"optimization2\"]}"
            .to_string();
        let user = format!("System metrics: {}", Value::Object(metrics.clone()));
        match self.ask_json(system, user).await {
            Ok(result) => string_list(&result["optimizations"]),
            Err(e) => {
                warn!(error = %e, "AI system optimization failed");
                vec![OPTIMIZE_FALLBACK.to_string()]
            }
        }
    }

    /// Order candidate files by relevance to `query`, highest first.
    pub async fn rank_files(&self, query: &str, files: Vec<FileNode>) -> Vec<RankedFile> {
        if files.is_empty() {
            return Vec::new();
        }
        let listing: Vec<Value> = files
            .iter()
            .enumerate()
            .map(|(i, f)| json!({ "index": i, "name": f.name, "path": f.path }))
            .collect();
        let system = "You are a file search AI. Given a search query and list of files, rank them \
                      by relevance.\nRespond with JSON in this format: \
                      {\"results\": [{\"index\": 0, \"relevance\": 0.95, \"reason\": \"explanation\"}]}"
            .to_string();
        let user = format!("Search query: {query}\n\nFiles: {}", Value::Array(listing));

        match self.ask_json(system, user).await {
            Ok(result) => {
                let mut ranked: Vec<RankedFile> = result["results"]
                    .as_array()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|entry| {
                                let index = usize::try_from(entry["index"].as_u64()?).ok()?;
                                let file = files.get(index)?.clone();
                                Some(RankedFile {
                                    file,
                                    relevance: entry["relevance"].as_f64().unwrap_or(0.0),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                ranked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
                ranked
            }
            Err(e) => {
                warn!(error = %e, query, "AI file ranking failed");
                files
                    .into_iter()
                    .map(|file| RankedFile {
                        file,
                        relevance: RANK_FALLBACK_RELEVANCE,
                    })
                    .collect()
            }
        }
    }
}
