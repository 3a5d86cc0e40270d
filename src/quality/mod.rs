//! 生成内容的质量评估：可读性、章节篇幅、关键词、引用与 AI 点评

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{error, info, warn};

use crate::config::{AnalysisType, GenerationConfig, MergedTemplate, PublicationType};
use crate::utils::{CopilotError, CopilotResult};
use crate::writer::{CompletionRequest, GenerationService, PromptComposer};

pub const CRITIQUE_FAILED: &str = "AI evaluation failed due to an error.";
const TOP_KEYWORDS: usize = 10;
/// 无二级标题时整篇计数使用的名称
const WHOLE_DOCUMENT: &str = "Document";
const PREAMBLE: &str = "Preamble";

static WORD_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid regex"));
static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\w+\s+et\s+al\.,\s+\d{4}\)|\[\d+\]").expect("valid regex"));
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readability {
    pub flesch_kincaid_grade: f64,
    pub flesch_reading_ease: f64,
    pub smog_index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionCount {
    pub heading: String,
    pub words: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordDensity {
    pub word: String,
    pub count: usize,
    pub density: f64,
}

/// 评估结果；整体失败时只有 `error` 有值
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityAssessment {
    pub readability: Option<Readability>,
    pub section_word_counts: Vec<SectionCount>,
    pub total_words: usize,
    pub total_characters: Option<usize>,
    pub keyword_density: Vec<KeywordDensity>,
    pub citation_count: usize,
    pub ai_evaluation: String,
    pub error: Option<String>,
}

impl QualityAssessment {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// 各章节词数及其占比（百分数）
    pub fn section_balance(&self) -> Vec<(&str, usize, f64)> {
        let total: usize = self.section_word_counts.iter().map(|s| s.words).sum();
        self.section_word_counts
            .iter()
            .map(|s| {
                let share = if total == 0 {
                    0.0
                } else {
                    s.words as f64 * 100.0 / total as f64
                };
                (s.heading.as_str(), s.words, share)
            })
            .collect()
    }
}

pub struct QualityAssessor {
    service: Arc<dyn GenerationService>,
    config: GenerationConfig,
}

impl QualityAssessor {
    pub fn new(service: Arc<dyn GenerationService>, config: GenerationConfig) -> Self {
        Self { service, config }
    }

    /// 不返回错误：任何意外失败都折叠为只含 error 的结果
    pub async fn assess(
        &self,
        content: &str,
        publication: PublicationType,
        analysis: AnalysisType,
        merged: &MergedTemplate,
    ) -> QualityAssessment {
        match self.try_assess(content, publication, analysis, merged).await {
            Ok(assessment) => assessment,
            Err(e) => {
                error!("质量评估失败: {}", e);
                QualityAssessment::failed(e.to_string())
            }
        }
    }

    async fn try_assess(
        &self,
        content: &str,
        publication: PublicationType,
        analysis: AnalysisType,
        merged: &MergedTemplate,
    ) -> CopilotResult<QualityAssessment> {
        let readability = readability(content)?;

        let (section_word_counts, total_words) = match section_word_counts(content) {
            Some(sections) => {
                let total = sections.iter().map(|s| s.words).sum();
                (sections, total)
            }
            None => {
                warn!("未找到二级标题，按全文计数");
                let total = content.split_whitespace().count();
                (
                    vec![SectionCount {
                        heading: WHOLE_DOCUMENT.to_string(),
                        words: total,
                    }],
                    total,
                )
            }
        };

        let total_characters = merged.counts_characters().then(|| content.chars().count());
        let keyword_density = keyword_density(content, TOP_KEYWORDS);
        let citation_count = citation_count(content);
        let ai_evaluation = self.critique(content, publication, analysis).await;

        info!(
            "质量评估完成: {} 词, FK {:.1}, 引用 {} 处",
            total_words, readability.flesch_kincaid_grade, citation_count
        );

        Ok(QualityAssessment {
            readability: Some(readability),
            section_word_counts,
            total_words,
            total_characters,
            keyword_density,
            citation_count,
            ai_evaluation,
            error: None,
        })
    }

    async fn critique(&self, content: &str, publication: PublicationType, analysis: AnalysisType) -> String {
        let prompt = PromptComposer::critique(content, publication, analysis);
        let request = CompletionRequest::critique(&self.config, prompt);
        match self.service.complete(&request).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!("AI 点评失败: {}", e);
                CRITIQUE_FAILED.to_string()
            }
        }
    }
}

/// 元音组计数的音节近似
pub fn count_syllables(word: &str) -> usize {
    let word: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(|c| c.to_lowercase())
        .collect();
    if word.is_empty() {
        return 0;
    }

    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut count = 0;
    let mut previous_vowel = false;
    for &c in &word {
        let vowel = is_vowel(c);
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }

    // 词尾不发音的 e（"-le" 除外）
    let n = word.len();
    if n > 2 && word[n - 1] == 'e' && word[n - 2] != 'l' && !is_vowel(word[n - 2]) && count > 1 {
        count -= 1;
    }
    count.max(1)
}

pub fn readability(text: &str) -> CopilotResult<Readability> {
    let words: Vec<&str> = text
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphabetic))
        .collect();
    if words.is_empty() {
        return Err(CopilotError::QualityError("文本中没有可评估的单词".to_string()));
    }

    let sentences = SENTENCE_END
        .find_iter(text)
        .count()
        .max(1) as f64;
    let word_count = words.len() as f64;
    let syllables: Vec<usize> = words.iter().map(|w| count_syllables(w)).collect();
    let total_syllables = syllables.iter().sum::<usize>() as f64;
    let polysyllables = syllables.iter().filter(|&&s| s >= 3).count() as f64;

    let words_per_sentence = word_count / sentences;
    let syllables_per_word = total_syllables / word_count;

    let grade = 0.39 * words_per_sentence + 11.8 * syllables_per_word - 15.59;
    let ease = 206.835 - 1.015 * words_per_sentence - 84.6 * syllables_per_word;
    // SMOG 至少需要三个句子
    let smog = if sentences < 3.0 {
        0.0
    } else {
        1.0430 * (polysyllables * 30.0 / sentences).sqrt() + 3.1291
    };

    Ok(Readability {
        flesch_kincaid_grade: round2(grade),
        flesch_reading_ease: round2(ease),
        smog_index: round2(smog),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn heading_of(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("##")?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// 按 "## " 标题切分，只数正文词数；没有任何二级标题时返回 None
pub fn section_word_counts(text: &str) -> Option<Vec<SectionCount>> {
    let mut sections: Vec<SectionCount> = Vec::new();
    let mut preamble = 0usize;
    let mut seen_heading = false;

    for line in text.lines() {
        match heading_of(line) {
            Some(heading) => {
                seen_heading = true;
                sections.push(SectionCount {
                    heading: heading.to_string(),
                    words: 0,
                });
            }
            None => {
                let words = line.split_whitespace().count();
                match sections.last_mut() {
                    Some(section) => section.words += words,
                    None => preamble += words,
                }
            }
        }
    }

    if !seen_heading {
        return None;
    }
    if preamble > 0 {
        sections.insert(
            0,
            SectionCount {
                heading: PREAMBLE.to_string(),
                words: preamble,
            },
        );
    }
    Some(sections)
}

/// 出现次数最多的前 `top` 个小写词，次数相同按首次出现顺序
pub fn keyword_density(text: &str, top: usize) -> Vec<KeywordDensity> {
    let lowered = text.to_lowercase();
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut total = 0usize;

    for token in WORD_TOKEN.find_iter(&lowered) {
        let word = token.as_str();
        total += 1;
        let entry = counts.entry(word).or_insert(0);
        if *entry == 0 {
            order.push(word);
        }
        *entry += 1;
    }
    if total == 0 {
        return Vec::new();
    }

    // 稳定排序保留首次出现顺序
    let mut ranked: Vec<(&str, usize)> = order.into_iter().map(|w| (w, counts[w])).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(top)
        .map(|(word, count)| KeywordDensity {
            word: word.to_string(),
            count,
            density: count as f64 / total as f64,
        })
        .collect()
}

pub fn citation_count(text: &str) -> usize {
    CITATION.find_iter(text).count()
}

/// 可读性评级，通俗摘要以 6 到 8 年级为目标
pub fn readability_rating(fk_grade: f64, publication: PublicationType) -> &'static str {
    if publication == PublicationType::PlainLanguageSummary {
        if (6.0..=8.0).contains(&fk_grade) {
            "Excellent"
        } else if (5.0..6.0).contains(&fk_grade) || (fk_grade > 8.0 && fk_grade <= 9.0) {
            "Good"
        } else if (4.0..5.0).contains(&fk_grade) || (fk_grade > 9.0 && fk_grade <= 10.0) {
            "Fair"
        } else {
            "Needs Improvement"
        }
    } else if fk_grade < 10.0 {
        "Excellent"
    } else if fk_grade < 12.0 {
        "Good"
    } else if fk_grade < 14.0 {
        "Fair"
    } else {
        "Challenging"
    }
}

pub fn citation_feedback(count: usize) -> String {
    match count {
        0 => "No citations found. Consider adding relevant citations to support your arguments.".to_string(),
        1..=4 => "Few citations found. Consider adding more to strengthen your arguments.".to_string(),
        n => format!("Good number of citations ({}).", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, TemplateRegistry};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FixedCritique(Option<&'static str>);

    #[async_trait]
    impl GenerationService for FixedCritique {
        async fn complete(&self, request: &CompletionRequest) -> CopilotResult<String> {
            assert_eq!(request.temperature, None);
            self.0
                .map(str::to_string)
                .ok_or_else(|| CopilotError::GenerationError("offline".into()))
        }
    }

    fn assessor(reply: Option<&'static str>) -> QualityAssessor {
        QualityAssessor::new(Arc::new(FixedCritique(reply)), AppConfig::default().generation)
    }

    fn words(n: usize, word: &str) -> String {
        vec![word; n].join(" ")
    }

    #[test]
    fn section_counts_exclude_heading_lines() {
        let text = format!(
            "## Background\n{}\n\n## Methods\n{}\n",
            words(40, "alpha"),
            words(60, "beta")
        );
        let sections = section_word_counts(&text).unwrap();
        assert_eq!(
            sections,
            vec![
                SectionCount { heading: "Background".into(), words: 40 },
                SectionCount { heading: "Methods".into(), words: 60 },
            ]
        );
        assert_eq!(sections.iter().map(|s| s.words).sum::<usize>(), 100);
    }

    #[test]
    fn third_level_headings_stay_inside_their_section() {
        let sections = section_word_counts("## Results\nOne two.\n### Subgroup\nThree.").unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].words, 5);
        assert!(section_word_counts("No headings here.").is_none());
    }

    #[test]
    fn syllable_heuristic() {
        assert_eq!(count_syllables("cat"), 1);
        assert_eq!(count_syllables("table"), 2);
        assert_eq!(count_syllables("make"), 1);
        assert_eq!(count_syllables("efficacy"), 4);
        assert_eq!(count_syllables("42"), 0);
    }

    #[test]
    fn simple_text_reads_easily() {
        let score = readability("The cat sat. The dog ran. The sun is hot.").unwrap();
        assert!(score.flesch_reading_ease > 90.0);
        assert!(score.flesch_kincaid_grade < 2.0);
        assert!(readability("   ").is_err());
    }

    #[test]
    fn keywords_rank_by_count_then_first_seen() {
        let top = keyword_density("Drug B and drug A. Drug A works", 3);
        let ranked: Vec<(&str, usize)> = top.iter().map(|k| (k.word.as_str(), k.count)).collect();
        assert_eq!(ranked, vec![("drug", 3), ("a", 2), ("b", 1)]);
        assert!((top[0].density - 3.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn both_citation_styles_count() {
        let text = "As shown (Smith et al., 2021) and [3], also [12] but not (Smith, 2021).";
        assert_eq!(citation_count(text), 3);
        assert_eq!(citation_feedback(0), "No citations found. Consider adding relevant citations to support your arguments.");
        assert_eq!(citation_feedback(7), "Good number of citations (7).");
    }

    #[test]
    fn ratings_follow_publication_bands() {
        assert_eq!(readability_rating(7.0, PublicationType::PlainLanguageSummary), "Excellent");
        assert_eq!(readability_rating(9.5, PublicationType::PlainLanguageSummary), "Fair");
        assert_eq!(readability_rating(12.0, PublicationType::PlainLanguageSummary), "Needs Improvement");
        assert_eq!(readability_rating(11.0, PublicationType::Manuscript), "Good");
        assert_eq!(readability_rating(15.0, PublicationType::Manuscript), "Challenging");
    }

    #[tokio::test]
    async fn full_assessment_counts_characters_for_abstracts() {
        let merged = TemplateRegistry::merged(PublicationType::CongressAbstract, AnalysisType::Safety);
        let content = "## Background\nSafety was assessed (Lee et al., 2020).\n\n## Results\nNo new signals.";
        let assessment = assessor(Some("Solid draft."))
            .assess(content, PublicationType::CongressAbstract, AnalysisType::Safety, &merged)
            .await;

        assert!(assessment.error.is_none());
        assert_eq!(assessment.total_words, 10);
        assert_eq!(assessment.total_characters, Some(content.chars().count()));
        assert_eq!(assessment.citation_count, 1);
        assert_eq!(assessment.ai_evaluation, "Solid draft.");
    }

    #[tokio::test]
    async fn critique_failure_degrades_only_that_field() {
        let merged = TemplateRegistry::merged(PublicationType::Manuscript, AnalysisType::Safety);
        let assessment = assessor(None)
            .assess("Plain words only.", PublicationType::Manuscript, AnalysisType::Safety, &merged)
            .await;

        assert_eq!(assessment.ai_evaluation, CRITIQUE_FAILED);
        assert!(assessment.readability.is_some());
        assert_eq!(assessment.total_characters, None);
        assert_eq!(assessment.section_word_counts[0].heading, WHOLE_DOCUMENT);
        assert_eq!(assessment.total_words, 3);
    }

    #[tokio::test]
    async fn empty_text_becomes_error_only_assessment() {
        let merged = TemplateRegistry::merged(PublicationType::Poster, AnalysisType::Interim);
        let assessment = assessor(Some("unused"))
            .assess("", PublicationType::Poster, AnalysisType::Interim, &merged)
            .await;

        assert!(assessment.error.is_some());
        assert!(assessment.readability.is_none());
        assert!(assessment.ai_evaluation.is_empty());
    }
}
