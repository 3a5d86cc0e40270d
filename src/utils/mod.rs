pub mod logger;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("缺少生成服务访问密钥: 请设置 OPENAI_API_KEY 或 config/settings.toml 中的 [generation] api_key")]
    MissingCredential,

    #[error("未找到模板配置: {0}")]
    TemplateNotFound(String),

    #[error("文件解析错误 ({file}): {message}")]
    IngestError { file: String, message: String },

    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("没有可用的源内容：请上传至少一个文件或输入文本")]
    EmptySource,

    #[error("生成服务错误: {0}")]
    GenerationError(String),

    #[error("图表 '{title}' 绘制失败: {message}")]
    ChartRender { title: String, message: String },

    #[error("文档生成错误: {0}")]
    AssemblyError(String),

    #[error("质量评估错误: {0}")]
    QualityError(String),

    #[error("后台任务失败: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub type CopilotResult<T> = Result<T, CopilotError>;

/// 截断到最多 `max_chars` 个字符
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundary() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("aéb", 2), "aé");
        assert_eq!(truncate_chars("", 5), "");
    }
}
