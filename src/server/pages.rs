use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pulldown_cmark::{html, CowStr, Event, Options, Parser};

use crate::charts::{strip_visualizations, ChartRender};
use crate::config::templates::recommended_sources;
use crate::config::{AnalysisType, PublicationType, TemplateRegistry};
use crate::pipeline::{Artifact, PublicationReport};
use crate::quality::{citation_feedback, readability_rating, QualityAssessment};
use crate::writer::GenerationOutcome;

const PAGE_STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; color: #333; line-height: 1.6; }
.container { max-width: 1100px; margin: 0 auto; padding: 20px; }
header { background: linear-gradient(135deg, #1a237e 0%, #283593 100%); color: white; padding: 32px 30px; border-radius: 12px; margin-bottom: 24px; }
header h1 { font-size: 26px; margin-bottom: 6px; }
header .meta { opacity: 0.85; font-size: 14px; }
.card { background: white; border-radius: 12px; padding: 24px 30px; margin-bottom: 20px; box-shadow: 0 2px 8px rgba(0,0,0,0.08); }
h3 { font-size: 17px; color: #283593; margin: 4px 0 12px 0; padding-left: 12px; border-left: 4px solid #5c6bc0; }
label { display: block; font-weight: 600; margin: 14px 0 6px 0; }
select, textarea, input[type=file] { width: 100%; padding: 8px; border: 1px solid #c5cae9; border-radius: 6px; font-size: 14px; }
textarea { min-height: 120px; }
button { margin-top: 18px; background: #283593; color: white; border: none; padding: 10px 24px; border-radius: 6px; font-size: 15px; cursor: pointer; }
.content table { border-collapse: collapse; margin: 12px 0; }
.content th { background: #e8eaf6; padding: 6px 10px; border: 1px solid #c5cae9; }
.content td { padding: 6px 10px; border: 1px solid #e0e0e0; }
.content h2 { font-size: 20px; color: #1a237e; margin: 18px 0 8px 0; }
.content p, .content ul, .content ol { margin-bottom: 10px; }
.content ul, .content ol { padding-left: 24px; }
.chart img { width: 100%; height: auto; display: block; margin-bottom: 6px; }
.chart .caption { font-size: 13px; color: #666; margin-bottom: 16px; }
.warning { background: #fff8e1; border-left: 3px solid #ffc107; padding: 10px 14px; margin-bottom: 10px; border-radius: 0 6px 6px 0; }
.error { background: #ffebee; border-left: 3px solid #e53935; padding: 10px 14px; margin-bottom: 10px; border-radius: 0 6px 6px 0; color: #b71c1c; }
.info { background: #e3f2fd; border-left: 3px solid #1e88e5; padding: 10px 14px; margin-bottom: 10px; border-radius: 0 6px 6px 0; }
pre { background: #fafafa; padding: 12px; border-radius: 6px; font-size: 12px; overflow-x: auto; }
.evaluation { white-space: pre-wrap; font-size: 14px; }
.downloads a { display: inline-block; margin-right: 12px; background: #e8eaf6; padding: 8px 14px; border-radius: 6px; color: #1a237e; text-decoration: none; }
.sources { font-size: 13px; color: #555; }
.downloads .meta { font-size: 12px; color: #999; margin-top: 14px; }
"#;

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>{style}</style>
</head>
<body>
<div class="container">
<header>
  <h1>Clinical Trial Publication Copilot</h1>
  <div class="meta">{title}</div>
</header>
{body}
</div>
</body>
</html>"#,
        title = html_escape(title),
        style = PAGE_STYLE,
        body = body,
    )
}

/// Markdown 转 HTML，原始 HTML 片段按文本转义
pub fn markdown_html(text: &str) -> String {
    let parser = Parser::new_ext(text, Options::ENABLE_TABLES).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(CowStr::from(raw.into_string())),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn options<T: Copy>(items: &[T], label: impl Fn(T) -> &'static str) -> String {
    items
        .iter()
        .map(|item| {
            let name = label(*item);
            format!(r#"<option value="{0}">{0}</option>"#, html_escape(name))
        })
        .collect()
}

pub fn index_page() -> String {
    let mut body = String::new();
    body.push_str(r#"<form class="card" method="post" action="/generate" enctype="multipart/form-data">
<h3>Generate a publication</h3>
"#);
    body.push_str(&format!(
        r#"<label for="publication">Publication type</label>
<select id="publication" name="publication">{}</select>
<label for="analysis">Analysis type</label>
<select id="analysis" name="analysis">{}</select>
"#,
        options(PublicationType::ALL, |p| p.name()),
        options(AnalysisType::ALL, |a| a.name()),
    ));
    body.push_str(
        r#"<label for="files">Source documents (PDF, Word, TXT, XLS, XLSX, CSV)</label>
<input id="files" type="file" name="files" multiple accept=".pdf,.docx,.txt,.xls,.xlsx,.csv">
<label for="text">Or paste source text (used only when no files are uploaded)</label>
<textarea id="text" name="text"></textarea>
<label for="instructions">Additional instructions</label>
<textarea id="instructions" name="instructions"></textarea>
<label for="format">Output format</label>
<select id="format" name="format"><option value="word">Word Document</option><option value="pdf">PDF</option></select>
<button type="submit">Generate</button>
</form>
"#,
    );

    // 各分析类型推荐的源文档与合并后的章节
    body.push_str(r#"<div class="card sources"><h3>Recommended source documents</h3>"#);
    for analysis in AnalysisType::ALL {
        let merged = TemplateRegistry::merged(PublicationType::Manuscript, *analysis);
        body.push_str(&format!(
            "<details><summary>{}</summary><ul>",
            html_escape(analysis.name())
        ));
        for source in recommended_sources(*analysis) {
            body.push_str(&format!("<li>{}</li>", html_escape(source)));
        }
        body.push_str(&format!(
            "</ul><p>Manuscript sections: {}</p></details>",
            html_escape(&merged.sections.join(", "))
        ));
    }
    body.push_str("</div>\n");

    page("Publication generator", &body)
}

pub fn error_page(message: &str) -> String {
    let body = format!(
        r#"<div class="card"><div class="error">{}</div><a href="/">Back</a></div>"#,
        html_escape(message)
    );
    page("Error", &body)
}

fn download_link(label: &str, artifact: &Artifact) -> String {
    format!(
        r#"<a href="{href}" download="{file}">{label}</a>"#,
        href = data_uri(artifact.mime, &artifact.bytes),
        file = html_escape(&artifact.filename),
        label = html_escape(label),
    )
}

fn charts_section(report: &PublicationReport, html: &mut String) {
    html.push_str(r#"<div class="card"><h3>Visualizations</h3>"#);
    if let Some(result) = report.outcome.result() {
        for _ in &result.rejected {
            html.push_str(r#"<div class="warning">Received invalid chart data. Unable to visualize this chart.</div>"#);
        }
    }
    if report.charts.is_empty() {
        html.push_str(r#"<div class="info">No charts were generated for this content.</div>"#);
    }
    for chart in &report.charts {
        match chart {
            ChartRender::Rendered(rendered) => html.push_str(&format!(
                r#"<div class="chart"><img src="{src}" alt="{title}"><div class="caption">{title}</div></div>"#,
                src = data_uri("image/png", &rendered.png),
                title = html_escape(&rendered.title),
            )),
            ChartRender::Failed { title, message, spec_json } => html.push_str(&format!(
                r#"<div class="warning">Could not create chart '{title}': {message}. Please check the chart data.</div><p>Chart data:</p><pre>{spec}</pre>"#,
                title = html_escape(title),
                message = html_escape(message),
                spec = html_escape(spec_json),
            )),
        }
    }
    html.push_str("</div>\n");
}

fn quality_section(quality: &QualityAssessment, publication: PublicationType, html: &mut String) {
    html.push_str(r#"<div class="card"><h3>Content Quality Assessment</h3>"#);
    if let Some(error) = &quality.error {
        html.push_str(&format!(
            r#"<div class="error">Quality assessment failed: {}</div></div>"#,
            html_escape(error)
        ));
        return;
    }

    html.push_str(&format!("<p>Total Words: {}</p>", quality.total_words));
    if let Some(chars) = quality.total_characters {
        html.push_str(&format!("<p>Total Characters: {}</p>", chars));
    }
    if let Some(readability) = &quality.readability {
        let grade = readability.flesch_kincaid_grade;
        html.push_str(&format!(
            "<p>Readability: {} (Flesch-Kincaid Grade Level: {:.1}, Reading Ease: {:.1}, SMOG: {:.1})</p>",
            readability_rating(grade, publication),
            grade,
            readability.flesch_reading_ease,
            readability.smog_index,
        ));
        if publication == PublicationType::PlainLanguageSummary {
            html.push_str("<p>Note: For Plain Language Summaries, aim for a 6th to 8th-grade reading level.</p>");
        }
    }

    html.push_str("<p>Section Balance:</p><ul>");
    for (heading, words, share) in quality.section_balance() {
        html.push_str(&format!(
            "<li>{}: {} words ({:.1}%)</li>",
            html_escape(heading),
            words,
            share
        ));
    }
    html.push_str("</ul><p>Top Keywords:</p><ul>");
    for keyword in quality.keyword_density.iter().take(5) {
        html.push_str(&format!(
            "<li>{}: {:.2}%</li>",
            html_escape(&keyword.word),
            keyword.density * 100.0
        ));
    }
    html.push_str("</ul>");
    html.push_str(&format!(
        "<p>Citations: {}</p>",
        html_escape(&citation_feedback(quality.citation_count))
    ));
    html.push_str(&format!(
        r#"<p>AI Evaluation:</p><div class="evaluation">{}</div></div>"#,
        html_escape(&quality.ai_evaluation)
    ));
}

pub fn report_page(report: &PublicationReport) -> String {
    let mut html = String::new();

    for skipped in &report.skipped {
        html.push_str(&format!(
            r#"<div class="warning">Skipped {}: {}</div>"#,
            html_escape(&skipped.name),
            html_escape(&skipped.reason)
        ));
    }

    let title = format!("{} / {}", report.publication, report.analysis);
    let result = match &report.outcome {
        GenerationOutcome::Failed { message } => {
            html.push_str(&format!(r#"<div class="card"><div class="error">{}</div></div>"#, html_escape(message)));
            return page(&title, &html);
        }
        GenerationOutcome::Generated(result) => result,
    };

    html.push_str(&format!(
        r#"<div class="card content"><h3>Generated Content</h3>{}</div>"#,
        markdown_html(strip_visualizations(&result.content))
    ));
    charts_section(report, &mut html);
    if let Some(quality) = &report.quality {
        quality_section(quality, report.publication, &mut html);
    }

    html.push_str(r#"<div class="card downloads"><h3>Downloads</h3>"#);
    match (&report.document, &report.document_error) {
        (Some(document), _) => {
            let label = format!("Download {}", document.filename);
            html.push_str(&download_link(&label, document));
        }
        (None, Some(error)) => html.push_str(&format!(
            r#"<div class="error">Error generating downloadable document: {}</div>"#,
            html_escape(error)
        )),
        (None, None) => {}
    }
    if let Some(raw) = &report.raw_text {
        html.push_str(&download_link("Download Raw Content as Text", raw));
    }
    html.push_str(&format!(
        r#"<div class="meta">Generated at {}</div>"#,
        report.generated_at.format("%Y-%m-%d %H:%M:%S")
    ));
    html.push_str("</div>\n");

    page(&title, &html)
}
