use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use pubcopilot::charts::ChartRender;
use pubcopilot::config::templates::{recommended_sources, LengthUnit};
use pubcopilot::config::{AnalysisType, AppConfig, PublicationType, TemplateRegistry, DEFAULT_CONFIG_PATH};
use pubcopilot::parser::SourceFile;
use pubcopilot::quality::{citation_feedback, readability_rating, QualityAssessment};
use pubcopilot::utils::logger;
use pubcopilot::writer::GenerationOutcome;
use pubcopilot::{server, Copilot, PublicationJob};

#[derive(Parser)]
#[command(name = "pubcopilot")]
#[command(about = "临床试验出版物生成助手", long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成默认配置文件
    Init {
        /// 覆盖已有配置
        #[arg(long)]
        force: bool,
    },
    /// 列出出版物/分析类型，或查看两者合并后的模板
    Templates {
        #[arg(short, long)]
        publication: Option<String>,
        #[arg(short, long)]
        analysis: Option<String>,
    },
    /// 根据源文档生成出版物
    Generate {
        /// 出版物类型，如 "Manuscript" 或 manuscript
        #[arg(short, long)]
        publication: String,
        /// 分析类型，如 "Safety Analysis" 或 safety
        #[arg(short, long)]
        analysis: String,
        /// 源文档 (PDF/DOCX/TXT/XLS/XLSX/CSV)
        files: Vec<PathBuf>,
        /// 没有文件时使用的源文本
        #[arg(long)]
        text: Option<String>,
        /// 附加指令
        #[arg(short, long, default_value = "")]
        instructions: String,
        /// 输出格式: word 或 pdf
        #[arg(short, long, default_value = "word")]
        format: String,
        /// 输出目录
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
        /// 同时保存原始生成文本
        #[arg(long)]
        raw: bool,
    },
    /// 启动交互页面
    Serve {
        /// 监听地址，覆盖配置文件
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_logger(cli.verbose);
    info!("pubcopilot 启动");

    match cli.command {
        Commands::Init { force } => init_command(&cli.config, force)?,
        Commands::Templates {
            publication,
            analysis,
        } => templates_command(publication.as_deref(), analysis.as_deref())?,
        Commands::Generate {
            publication,
            analysis,
            files,
            text,
            instructions,
            format,
            output,
            raw,
        } => {
            let job = PublicationJob {
                publication: publication.parse()?,
                analysis: analysis.parse()?,
                files: read_sources(&files)?,
                text: text.unwrap_or_default(),
                instructions,
                format: format.parse()?,
            };
            generate_command(&cli.config, job, &output, raw).await?
        }
        Commands::Serve { bind } => serve_command(&cli.config, bind).await?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("读取配置失败: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn init_command(path: &Path, force: bool) -> Result<()> {
    info!("初始化配置...");

    if path.exists() && !force {
        warn!("配置文件已存在: {}（使用 --force 覆盖）", path.display());
        return Ok(());
    }

    let path_str = path.to_string_lossy();
    AppConfig::default()
        .save(&path_str)
        .with_context(|| format!("写入配置失败: {}", path.display()))?;
    info!("已生成配置文件: {}", path.display());

    info!("✅ 初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 {} 或设置 OPENAI_API_KEY 环境变量", path.display());
    info!("  2. 运行 'pubcopilot generate -p manuscript -a safety <文件>' 或 'pubcopilot serve'");
    Ok(())
}

fn templates_command(publication: Option<&str>, analysis: Option<&str>) -> Result<()> {
    let (Some(publication), Some(analysis)) = (publication, analysis) else {
        println!("Publication types:");
        for p in PublicationType::ALL {
            println!("  {:<28} ({})", p.name(), p.slug());
        }
        println!("\nAnalysis types:");
        for a in AnalysisType::ALL {
            println!("  {:<32} ({})", a.name(), a.slug());
        }
        return Ok(());
    };

    let publication: PublicationType = publication.parse()?;
    let analysis: AnalysisType = analysis.parse()?;
    let merged = TemplateRegistry::merged(publication, analysis);

    println!("{} / {}\n", publication, analysis);
    println!("Sections:\n{}\n", merged.structure_list());
    println!("Publication limit: {}", merged.publication_limit);
    println!("Analysis limit:    {}", merged.analysis_limit);
    if let Some(min) = merged.min_words {
        println!("Minimum length:    {} words", min);
    }
    if let Some(limit) = merged.limit_for(LengthUnit::Characters) {
        println!("Character budget:  {}", limit);
    }
    println!("Font sizes:        {}", merged.font_size_summary());
    println!("\nRecommended source documents:");
    for source in recommended_sources(analysis) {
        println!("  - {}", source);
    }
    Ok(())
}

fn read_sources(files: &[PathBuf]) -> Result<Vec<SourceFile>> {
    files
        .iter()
        .map(|path| SourceFile::from_path(path).with_context(|| format!("读取源文件失败: {}", path.display())))
        .collect()
}

fn print_quality(quality: &QualityAssessment, publication: PublicationType) {
    println!("\n== Content Quality Assessment ==");
    if let Some(error) = &quality.error {
        println!("Quality assessment failed: {}", error);
        return;
    }
    println!("Total Words: {}", quality.total_words);
    if let Some(chars) = quality.total_characters {
        println!("Total Characters: {}", chars);
    }
    if let Some(r) = &quality.readability {
        println!(
            "Readability: {} (Flesch-Kincaid Grade Level: {:.1}, Reading Ease: {:.1}, SMOG: {:.1})",
            readability_rating(r.flesch_kincaid_grade, publication),
            r.flesch_kincaid_grade,
            r.flesch_reading_ease,
            r.smog_index
        );
    }
    println!("Section Balance:");
    for (heading, words, share) in quality.section_balance() {
        println!("  - {}: {} words ({:.1}%)", heading, words, share);
    }
    println!("Top Keywords:");
    for keyword in quality.keyword_density.iter().take(5) {
        println!("  - {}: {:.2}%", keyword.word, keyword.density * 100.0);
    }
    println!("Citations: {}", citation_feedback(quality.citation_count));
    println!("AI Evaluation:\n{}", quality.ai_evaluation);
}

async fn generate_command(config_path: &Path, job: PublicationJob, output: &Path, raw: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let copilot = Copilot::from_config(&config)?;
    let publication = job.publication;

    let report = copilot.run(job).await?;
    for skipped in &report.skipped {
        warn!("已跳过 {}: {}", skipped.name, skipped.reason);
    }

    if let GenerationOutcome::Failed { message } = &report.outcome {
        anyhow::bail!("{}", message);
    }

    for chart in &report.charts {
        if let ChartRender::Failed { title, message, spec_json } = chart {
            warn!("图表 '{}' 未能绘制: {}\n{}", title, message, spec_json);
        }
    }
    if let Some(quality) = &report.quality {
        print_quality(quality, publication);
    }

    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("创建输出目录失败: {}", output.display()))?;

    match (&report.document, &report.document_error) {
        (Some(document), _) => {
            let path = output.join(&document.filename);
            tokio::fs::write(&path, &document.bytes).await?;
            info!("✅ 文档已生成: {}", path.display());
        }
        (None, Some(error)) => warn!("文档生成失败: {}", error),
        (None, None) => {}
    }

    if raw {
        if let Some(text) = &report.raw_text {
            let path = output.join(&text.filename);
            tokio::fs::write(&path, &text.bytes).await?;
            info!("原始文本已保存: {}", path.display());
        }
    }
    Ok(())
}

async fn serve_command(config_path: &Path, bind: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let copilot = Copilot::from_config(&config)?;
    server::serve(copilot, &config.server).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubcopilot::assembler::OutputFormat;

    #[test]
    fn cli_parses_generate_arguments() {
        let cli = Cli::try_parse_from([
            "pubcopilot", "generate", "-p", "poster", "-a", "pk", "csr.pdf", "tlf.xlsx", "--format", "pdf", "--raw",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate { publication, analysis, files, format, raw, .. } => {
                assert_eq!(publication.parse::<PublicationType>().unwrap(), PublicationType::Poster);
                assert_eq!(analysis.parse::<AnalysisType>().unwrap(), AnalysisType::Pharmacokinetic);
                assert_eq!(files.len(), 2);
                assert_eq!(format.parse::<OutputFormat>().unwrap(), OutputFormat::Pdf);
                assert!(raw);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("settings.toml");
        init_command(&path, false).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.cache.capacity, AppConfig::default().cache.capacity);
        // 已存在时不覆盖
        init_command(&path, false).unwrap();
    }
}
