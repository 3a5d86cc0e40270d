//! 一次完整的出版物生成：来源合并 → 生成 → 图表与质量评估 → 文档

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::assembler::{artifact_filename, assemble, OutputFormat};
use crate::charts::{ChartRender, ChartRenderer, ChartSpec, RenderedChart};
use crate::config::{AnalysisType, AppConfig, PublicationType, TemplateRegistry};
use crate::parser::{IngestionPipeline, IngestionReport, SkippedFile, SourceFile};
use crate::quality::{QualityAssessment, QualityAssessor};
use crate::storage::MemoCache;
use crate::utils::{CopilotError, CopilotResult};
use crate::writer::{
    DocumentWriter, GenerationOutcome, GenerationRequest, GenerationResult, GenerationService, OpenAiClient,
    PROMPT_TEMPLATE_VERSION,
};

type CacheKey = (u32, GenerationRequest);

/// 可下载的产物
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub filename: String,
    pub mime: &'static str,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// 一次生成任务的输入
#[derive(Debug, Clone)]
pub struct PublicationJob {
    pub publication: PublicationType,
    pub analysis: AnalysisType,
    pub files: Vec<SourceFile>,
    /// 仅在没有上传文件时使用
    pub text: String,
    pub instructions: String,
    pub format: OutputFormat,
}

#[derive(Debug)]
pub struct PublicationReport {
    pub publication: PublicationType,
    pub analysis: AnalysisType,
    pub skipped: Vec<SkippedFile>,
    pub outcome: GenerationOutcome,
    pub charts: Vec<ChartRender>,
    pub quality: Option<QualityAssessment>,
    pub document: Option<Artifact>,
    pub document_error: Option<String>,
    pub raw_text: Option<Artifact>,
    pub generated_at: DateTime<Local>,
}

/// 解析、绘图与组装是 CPU 密集的同步代码，放到阻塞线程池执行，不占用异步工作线程
async fn blocking<T, F>(work: F) -> CopilotResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await?)
}

pub struct Copilot {
    ingestion: Arc<IngestionPipeline>,
    writer: DocumentWriter,
    assessor: QualityAssessor,
    renderer: Arc<ChartRenderer>,
    cache: MemoCache<CacheKey, Arc<GenerationResult>>,
}

impl Copilot {
    pub fn new(service: Arc<dyn GenerationService>, config: &AppConfig) -> Self {
        Self {
            ingestion: Arc::new(IngestionPipeline::new()),
            writer: DocumentWriter::new(Arc::clone(&service), config.generation.clone()),
            assessor: QualityAssessor::new(service, config.generation.clone()),
            renderer: Arc::new(ChartRenderer::new()),
            cache: MemoCache::new(config.cache.capacity),
        }
    }

    /// 使用真实的 HTTP 客户端；缺少密钥时拒绝构造
    pub fn from_config(config: &AppConfig) -> CopilotResult<Self> {
        config.require_api_key()?;
        config.validate()?;
        let client = OpenAiClient::new(config.generation.clone())?;
        Ok(Self::new(Arc::new(client), config))
    }

    /// 文件解析在阻塞线程池中进行
    pub async fn ingest(&self, files: Vec<SourceFile>) -> CopilotResult<IngestionReport> {
        let ingestion = Arc::clone(&self.ingestion);
        blocking(move || ingestion.combine(&files)).await
    }

    /// 相同请求只调用一次生成服务；失败结果不缓存
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        let key = (PROMPT_TEMPLATE_VERSION, request.clone());
        if let Some(hit) = self.cache.get(&key) {
            info!("命中生成缓存: {} / {}", request.publication, request.analysis);
            return GenerationOutcome::Generated(hit);
        }

        let merged = TemplateRegistry::merged(request.publication, request.analysis);
        let outcome = self.writer.write(request, &merged).await;
        if let Some(result) = outcome.result() {
            self.cache.insert(key, Arc::clone(result));
        }
        outcome
    }

    pub async fn assess(
        &self,
        content: &str,
        publication: PublicationType,
        analysis: AnalysisType,
    ) -> QualityAssessment {
        let merged = TemplateRegistry::merged(publication, analysis);
        self.assessor.assess(content, publication, analysis, &merged).await
    }

    pub async fn render_charts(&self, specs: Vec<ChartSpec>) -> CopilotResult<Vec<ChartRender>> {
        let renderer = Arc::clone(&self.renderer);
        blocking(move || renderer.render_all(&specs)).await
    }

    /// 只嵌入绘制成功的图表
    pub async fn assemble(
        &self,
        content: String,
        charts: &[ChartRender],
        publication: PublicationType,
        analysis: AnalysisType,
        format: OutputFormat,
    ) -> CopilotResult<Artifact> {
        let rendered: Vec<RenderedChart> = charts.iter().filter_map(|c| c.rendered().cloned()).collect();
        let bytes = blocking(move || {
            let merged = TemplateRegistry::merged(publication, analysis);
            assemble(&content, &rendered, &merged, format)
        })
        .await??;
        Ok(Artifact {
            filename: artifact_filename(publication, analysis, format.extension()),
            mime: format.mime(),
            bytes,
        })
    }

    /// 上传文件优先；全部跳过或为空时才使用文本框内容
    async fn source_text(&self, files: Vec<SourceFile>, text: &str) -> CopilotResult<(String, Vec<SkippedFile>)> {
        let mut skipped = Vec::new();
        if !files.is_empty() {
            let report = self.ingest(files).await?;
            skipped = report.skipped;
            if !report.text.trim().is_empty() {
                return Ok((report.text, skipped));
            }
            warn!("上传文件中没有可用文本");
        }
        if !text.trim().is_empty() {
            return Ok((text.to_string(), skipped));
        }
        Err(CopilotError::EmptySource)
    }

    pub async fn run(&self, job: PublicationJob) -> CopilotResult<PublicationReport> {
        let PublicationJob {
            publication,
            analysis,
            files,
            text,
            instructions,
            format,
        } = job;
        let (source_text, skipped) = self.source_text(files, &text).await?;
        let request = GenerationRequest {
            publication,
            analysis,
            source_text,
            instructions,
        };

        let outcome = self.generate(&request).await;
        let mut report = PublicationReport {
            publication,
            analysis,
            skipped,
            outcome,
            charts: Vec::new(),
            quality: None,
            document: None,
            document_error: None,
            raw_text: None,
            generated_at: Local::now(),
        };

        let Some(result) = report.outcome.result().cloned() else {
            warn!("生成失败，跳过图表、质量评估与文档组装");
            return Ok(report);
        };

        if result.charts.is_empty() {
            info!("本次生成没有图表");
        }
        report.charts = self.render_charts(result.charts.clone()).await?;
        report.quality = Some(self.assess(&result.content, publication, analysis).await);

        match self
            .assemble(result.content.clone(), &report.charts, publication, analysis, format)
            .await
        {
            Ok(artifact) => report.document = Some(artifact),
            Err(e) => {
                error!("文档组装失败: {}", e);
                report.document_error = Some(e.to_string());
            }
        }
        report.raw_text = Some(Artifact {
            filename: artifact_filename(publication, analysis, "txt"),
            mime: "text/plain",
            bytes: result.content.as_bytes().to_vec(),
        });

        info!(
            "任务完成: {} / {}, 图表 {} 个, 文档{}",
            publication,
            analysis,
            report.charts.len(),
            if report.document.is_some() { "已生成" } else { "未生成" }
        );
        Ok(report)
    }
}
