pub mod prompts;

pub use prompts::{PromptComposer, PROMPT_TEMPLATE_VERSION};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::charts::{extract_charts, ChartSpec, RejectedChart};
use crate::config::{AnalysisType, GenerationConfig, MergedTemplate, PublicationType};
use crate::utils::{CopilotError, CopilotResult};
use prompts::{CRITIQUE_SYSTEM_ROLE, GENERATION_SYSTEM_ROLE};

/// 生成失败时展示给用户的前缀
pub const GENERATION_ERROR_PREFIX: &str = "An error occurred while generating the document: ";

/// 一次对话补全请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// 文档生成：温度固定为 0
    pub fn generation(config: &GenerationConfig, prompt: String) -> Self {
        Self {
            system: GENERATION_SYSTEM_ROLE.to_string(),
            prompt,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: Some(0.0),
        }
    }

    pub fn critique(config: &GenerationConfig, prompt: String) -> Self {
        Self {
            system: CRITIQUE_SYSTEM_ROLE.to_string(),
            prompt,
            model: config.model.clone(),
            max_tokens: config.critique_max_tokens,
            temperature: None,
        }
    }
}

/// 外部文本生成服务
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> CopilotResult<String>;
}

/// Chat Completions 请求体
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Chat Completions 响应体
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI 兼容的 HTTP 客户端
pub struct OpenAiClient {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl OpenAiClient {
    pub fn new(config: GenerationConfig) -> CopilotResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if !config.proxy.is_empty() {
            match reqwest::Proxy::all(&config.proxy) {
                Ok(proxy) => {
                    info!("使用代理: {}", config.proxy);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    warn!("代理配置无效 '{}': {}", config.proxy, e);
                }
            }
        }

        let client = builder.build()?;
        Ok(Self { client, config })
    }

    async fn do_request(&self, request: &ChatRequest<'_>) -> CopilotResult<String> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopilotError::GenerationError(format!("API 返回错误 {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CopilotError::GenerationError("API 响应中没有内容".to_string()))
    }
}

#[async_trait]
impl GenerationService for OpenAiClient {
    /// 带指数退避的重试
    async fn complete(&self, request: &CompletionRequest) -> CopilotResult<String> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                info!("API 重试 ({}/{})，等待 {}ms...", attempt + 1, attempts, delay.as_millis());
                tokio::time::sleep(delay).await;
            }

            match self.do_request(&body).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!("API 调用失败 (尝试 {}/{}): {}", attempt + 1, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CopilotError::GenerationError("API 调用失败".to_string())))
    }
}

/// 生成请求，同时作为缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationRequest {
    pub publication: PublicationType,
    pub analysis: AnalysisType,
    pub source_text: String,
    pub instructions: String,
}

/// 生成结果：原始文本与通过校验的图表
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub content: String,
    pub charts: Vec<ChartSpec>,
    pub rejected: Vec<RejectedChart>,
}

#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Generated(Arc<GenerationResult>),
    Failed { message: String },
}

impl GenerationOutcome {
    pub fn failed(reason: impl fmt::Display) -> Self {
        GenerationOutcome::Failed {
            message: format!("{}{}", GENERATION_ERROR_PREFIX, reason),
        }
    }

    pub fn result(&self) -> Option<&Arc<GenerationResult>> {
        match self {
            GenerationOutcome::Generated(result) => Some(result),
            GenerationOutcome::Failed { .. } => None,
        }
    }

    /// 成功时为生成文本，失败时为带前缀的错误信息
    pub fn display_text(&self) -> &str {
        match self {
            GenerationOutcome::Generated(result) => &result.content,
            GenerationOutcome::Failed { message } => message,
        }
    }
}

/// 组装提示词、调用生成服务并提取图表
pub struct DocumentWriter {
    service: Arc<dyn GenerationService>,
    config: GenerationConfig,
}

impl DocumentWriter {
    pub fn new(service: Arc<dyn GenerationService>, config: GenerationConfig) -> Self {
        Self { service, config }
    }

    pub fn service(&self) -> &Arc<dyn GenerationService> {
        &self.service
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub async fn write(&self, request: &GenerationRequest, merged: &MergedTemplate) -> GenerationOutcome {
        info!(
            "开始生成: {} / {} (来源 {} 字符)",
            request.publication,
            request.analysis,
            request.source_text.len()
        );

        let prompt = PromptComposer::compose(
            merged,
            request.publication,
            request.analysis,
            &request.source_text,
            &request.instructions,
        );
        let completion = CompletionRequest::generation(&self.config, prompt);

        match self.service.complete(&completion).await {
            Ok(content) => {
                let extraction = extract_charts(&content);
                info!(
                    "生成完成: {} 字符, 图表 {} 个",
                    content.len(),
                    extraction.charts.len()
                );
                GenerationOutcome::Generated(Arc::new(GenerationResult {
                    content,
                    charts: extraction.charts,
                    rejected: extraction.rejected,
                }))
            }
            Err(e) => {
                error!("文档生成失败: {}", e);
                GenerationOutcome::failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, TemplateRegistry};
    use std::sync::Mutex;

    struct ScriptedService {
        reply: CopilotResult<String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        async fn complete(&self, request: &CompletionRequest) -> CopilotResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(CopilotError::GenerationError(e.to_string())),
            }
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            publication: PublicationType::CongressAbstract,
            analysis: AnalysisType::PrimaryEfficacy,
            source_text: "CSR".into(),
            instructions: String::new(),
        }
    }

    #[tokio::test]
    async fn generation_uses_deterministic_settings_and_extracts_charts() {
        let reply = "## Background\nText.\n\n## Visualizations\n```json\n{\"type\":\"bar\",\"title\":\"ORR\",\"x_label\":\"Arm\",\"y_label\":\"%\",\"data_series\":[\"ORR\"],\"data\":[{\"Arm\":\"A\",\"ORR\":40}]}\n```\n";
        let service = Arc::new(ScriptedService {
            reply: Ok(reply.to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let config = AppConfig::default().generation;
        let writer = DocumentWriter::new(service.clone(), config);
        let req = request();
        let merged = TemplateRegistry::merged(req.publication, req.analysis);

        let outcome = writer.write(&req, &merged).await;
        let result = outcome.result().expect("generated");
        assert_eq!(result.charts.len(), 1);
        assert_eq!(outcome.display_text(), reply);

        let seen = service.seen.lock().unwrap();
        assert_eq!(seen[0].temperature, Some(0.0));
        assert_eq!(seen[0].max_tokens, 16000);
        assert_eq!(seen[0].model, "gpt-4o-2024-08-06");
        assert_eq!(seen[0].system, GENERATION_SYSTEM_ROLE);
    }

    #[tokio::test]
    async fn service_failure_becomes_prefixed_outcome() {
        let service = Arc::new(ScriptedService {
            reply: Err(CopilotError::GenerationError("quota exceeded".into())),
            seen: Mutex::new(Vec::new()),
        });
        let writer = DocumentWriter::new(service, AppConfig::default().generation);
        let req = request();
        let merged = TemplateRegistry::merged(req.publication, req.analysis);

        let outcome = writer.write(&req, &merged).await;
        assert!(outcome.result().is_none());
        assert!(outcome.display_text().starts_with(GENERATION_ERROR_PREFIX));
        assert!(outcome.display_text().contains("quota exceeded"));
    }

    #[test]
    fn chat_request_omits_temperature_for_critique() {
        let config = AppConfig::default().generation;
        let critique = CompletionRequest::critique(&config, "Evaluate".into());
        let body = ChatRequest {
            model: &critique.model,
            messages: vec![ChatMessage { role: "user", content: &critique.prompt }],
            max_tokens: critique.max_tokens,
            temperature: critique.temperature,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 1000);
        assert!(json.get("temperature").is_none());
    }
}
