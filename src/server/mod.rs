//! 交互页面：表单提交 → 完整生成流程 → 结果页

pub mod pages;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::assembler::OutputFormat;
use crate::config::{AnalysisType, PublicationType, ServerConfig};
use crate::parser::SourceFile;
use crate::pipeline::{Copilot, PublicationJob};
use crate::utils::{CopilotError, CopilotResult};

#[derive(Clone)]
pub struct AppState {
    copilot: Arc<Copilot>,
}

impl AppState {
    pub fn new(copilot: Arc<Copilot>) -> Self {
        Self { copilot }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/generate", post(generate))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// 阻塞运行直到进程结束
pub async fn serve(copilot: Copilot, config: &ServerConfig) -> CopilotResult<()> {
    let state = AppState::new(Arc::new(copilot));
    let app = router(state, config.max_upload_mb * 1024 * 1024);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("页面已启动: http://{}", config.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> Html<String> {
    Html(pages::index_page())
}

fn bad_request(message: String) -> Response {
    warn!("表单无效: {}", message);
    (StatusCode::BAD_REQUEST, Html(pages::error_page(&message))).into_response()
}

/// 表单字段，缺省值与页面默认选项一致
struct GenerateForm {
    publication: Option<String>,
    analysis: Option<String>,
    files: Vec<SourceFile>,
    text: String,
    instructions: String,
    format: Option<String>,
}

impl GenerateForm {
    fn into_job(self) -> CopilotResult<PublicationJob> {
        let publication: PublicationType = self
            .publication
            .as_deref()
            .ok_or_else(|| CopilotError::ConfigError("缺少 publication 字段".to_string()))?
            .parse()?;
        let analysis: AnalysisType = self
            .analysis
            .as_deref()
            .ok_or_else(|| CopilotError::ConfigError("缺少 analysis 字段".to_string()))?
            .parse()?;
        let format = match self.format.as_deref() {
            Some(value) => value.parse()?,
            None => OutputFormat::Word,
        };

        Ok(PublicationJob {
            publication,
            analysis,
            files: self.files,
            text: self.text,
            instructions: self.instructions,
            format,
        })
    }
}

async fn read_form(mut multipart: Multipart) -> Result<GenerateForm, String> {
    let mut form = GenerateForm {
        publication: None,
        analysis: None,
        files: Vec::new(),
        text: String::new(),
        instructions: String::new(),
        format: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Multipart error: {e}"))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "files" {
            let file_name = field.file_name().unwrap_or("").to_string();
            let content_type = field.content_type().unwrap_or("").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| format!("Failed to read file: {e}"))?;
            // 未选择文件时浏览器仍会提交一个空字段
            if file_name.is_empty() && bytes.is_empty() {
                continue;
            }
            form.files.push(SourceFile::new(file_name, content_type, bytes.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| format!("Failed to read field '{name}': {e}"))?;
        match name.as_str() {
            "publication" => form.publication = Some(value),
            "analysis" => form.analysis = Some(value),
            "text" => form.text = value,
            "instructions" => form.instructions = value,
            "format" => form.format = Some(value),
            other => warn!("忽略未知表单字段: {}", other),
        }
    }
    Ok(form)
}

async fn generate(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(message) => return bad_request(message),
    };
    let job = match form.into_job() {
        Ok(job) => job,
        Err(e) => return bad_request(e.to_string()),
    };

    info!(
        "收到生成请求: {} / {}, 文件 {} 个, 格式 {}",
        job.publication,
        job.analysis,
        job.files.len(),
        job.format
    );

    match state.copilot.run(job).await {
        Ok(report) => Html(pages::report_page(&report)).into_response(),
        Err(CopilotError::EmptySource) => {
            bad_request("Please enter some information or upload at least one file before generating.".to_string())
        }
        Err(e) => {
            error!("生成流程异常: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(pages::error_page(&format!("An unexpected error occurred: {}", e))),
            )
                .into_response()
        }
    }
}
