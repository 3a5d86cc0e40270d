//! 出版物模板与分析模板的静态配置表

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::{CopilotError, CopilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FontRole {
    Title,
    Heading,
    Subheading,
    Body,
}

impl FontRole {
    pub fn label(&self) -> &'static str {
        match self {
            FontRole::Title => "Title",
            FontRole::Heading => "Heading",
            FontRole::Subheading => "Subheading",
            FontRole::Body => "Body",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    Words,
    Characters,
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthUnit::Words => write!(f, "words"),
            LengthUnit::Characters => write!(f, "characters"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LengthLimit {
    pub value: u32,
    pub unit: LengthUnit,
}

impl LengthLimit {
    const fn words(value: u32) -> Self {
        Self { value, unit: LengthUnit::Words }
    }

    const fn characters(value: u32) -> Self {
        Self { value, unit: LengthUnit::Characters }
    }
}

impl fmt::Display for LengthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// 单个模板：章节顺序、篇幅上限、字号
#[derive(Debug)]
pub struct DocumentTemplate {
    pub name: &'static str,
    pub sections: &'static [&'static str],
    pub limit: LengthLimit,
    pub min_words: Option<u32>,
    pub font_sizes: &'static [(FontRole, u32)],
}

macro_rules! template_enum {
    ($name:ident { $($variant:ident => ($label:expr, $slug:expr)),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// 显示名称，同时也是模板表中的键
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn slug(&self) -> &'static str {
                match self {
                    $($name::$variant => $slug),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = CopilotError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|t| t.name().eq_ignore_ascii_case(needle) || t.slug().eq_ignore_ascii_case(needle))
                    .ok_or_else(|| CopilotError::TemplateNotFound(needle.to_string()))
            }
        }
    };
}

template_enum!(PublicationType {
    CongressAbstract => ("Congress Abstract", "congress-abstract"),
    Manuscript => ("Manuscript", "manuscript"),
    Poster => ("Poster", "poster"),
    PlainLanguageSummary => ("Plain Language Summary", "plain-language-summary"),
});

template_enum!(AnalysisType {
    PrimaryEfficacy => ("Primary Efficacy Analysis", "primary-efficacy"),
    Safety => ("Safety Analysis", "safety"),
    Pharmacokinetic => ("Pharmacokinetic (PK) Analysis", "pk"),
    Subgroup => ("Subgroup Analysis", "subgroup"),
    Interim => ("Interim Analysis", "interim"),
    PostHoc => ("Post-hoc Analysis", "post-hoc"),
    TrialInProgress => ("Trial in Progress", "trial-in-progress"),
    BaselineCharacteristics => ("Baseline Characteristics", "baseline"),
});

const ANALYSIS_FONTS: &[(FontRole, u32)] = &[
    (FontRole::Title, 16),
    (FontRole::Heading, 14),
    (FontRole::Body, 12),
];

static PUBLICATION_TEMPLATES: &[DocumentTemplate] = &[
    DocumentTemplate {
        name: "Congress Abstract",
        sections: &[
            "Title", "Authors", "Affiliations", "Background", "Methods", "Results",
            "Conclusions", "Funding", "Keywords",
        ],
        limit: LengthLimit::characters(2000),
        min_words: None,
        font_sizes: &[(FontRole::Title, 14), (FontRole::Body, 11)],
    },
    DocumentTemplate {
        name: "Manuscript",
        sections: &[
            "Title", "Authors", "Affiliations", "Abstract", "Introduction", "Methods",
            "Results", "Discussion", "Conclusion", "Acknowledgements", "References",
            "Tables and Figures",
        ],
        limit: LengthLimit::words(3500),
        min_words: None,
        font_sizes: &[
            (FontRole::Title, 16),
            (FontRole::Heading, 14),
            (FontRole::Subheading, 12),
            (FontRole::Body, 11),
        ],
    },
    DocumentTemplate {
        name: "Poster",
        sections: &[
            "Title", "Authors", "Affiliations", "Introduction", "Methods", "Results",
            "Conclusion", "References", "Acknowledgements",
        ],
        limit: LengthLimit::characters(10000),
        min_words: None,
        font_sizes: &[
            (FontRole::Title, 60),
            (FontRole::Heading, 36),
            (FontRole::Subheading, 24),
            (FontRole::Body, 18),
        ],
    },
    DocumentTemplate {
        name: "Plain Language Summary",
        sections: &[
            "Title", "Key Points", "Background", "What was the study about?",
            "How was the study done?", "What were the results?",
            "What do the results mean for patients?", "What's next?", "Disclosures", "Review",
        ],
        limit: LengthLimit::words(750),
        min_words: Some(200),
        font_sizes: &[(FontRole::Title, 16), (FontRole::Body, 12)],
    },
];

static ANALYSIS_TEMPLATES: &[DocumentTemplate] = &[
    DocumentTemplate {
        name: "Primary Efficacy Analysis",
        sections: &[
            "Title", "Authors", "Affiliations", "Abstract", "Introduction", "Methods",
            "Primary Results", "Discussion", "Conclusion", "References", "Keywords",
        ],
        limit: LengthLimit::words(2000),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
    DocumentTemplate {
        name: "Safety Analysis",
        sections: &[
            "Title", "Authors", "Affiliations", "Abstract", "Introduction", "Methods",
            "Safety Results", "Discussion", "Conclusion", "References", "Keywords",
        ],
        limit: LengthLimit::words(2000),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
    DocumentTemplate {
        name: "Pharmacokinetic (PK) Analysis",
        sections: &[
            "Title", "Authors", "Affiliations", "Abstract", "Introduction", "Methods",
            "PK Results", "Discussion", "Conclusion", "References", "Keywords",
        ],
        limit: LengthLimit::words(2000),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
    DocumentTemplate {
        name: "Subgroup Analysis",
        sections: &[
            "Title", "Authors", "Affiliations", "Abstract", "Introduction", "Methods",
            "Subgroup Results", "Discussion", "Conclusion", "References", "Keywords",
        ],
        limit: LengthLimit::words(2000),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
    DocumentTemplate {
        name: "Interim Analysis",
        sections: &[
            "Title", "Authors", "Affiliations", "Background", "Study Design",
            "Interim Objectives", "Methods", "Interim Results", "Discussion", "Conclusion",
            "Keywords",
        ],
        limit: LengthLimit::words(1500),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
    DocumentTemplate {
        name: "Post-hoc Analysis",
        sections: &[
            "Title", "Authors", "Affiliations", "Abstract", "Introduction", "Methods",
            "Post-hoc Results", "Discussion", "Conclusion", "References", "Keywords",
        ],
        limit: LengthLimit::words(2000),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
    DocumentTemplate {
        name: "Trial in Progress",
        sections: &[
            "Title", "Authors", "Affiliations", "Background", "Study Design", "Objectives",
            "Methods", "Current Status", "Conclusion", "Keywords",
        ],
        limit: LengthLimit::words(500),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
    DocumentTemplate {
        name: "Baseline Characteristics",
        sections: &[
            "Title", "Authors", "Affiliations", "Introduction", "Methods",
            "Baseline Characteristics", "Results", "Conclusion", "Keywords",
        ],
        limit: LengthLimit::words(1000),
        min_words: None,
        font_sizes: ANALYSIS_FONTS,
    },
];

/// 两个模板合并后的结果
#[derive(Debug, Clone, Serialize)]
pub struct MergedTemplate {
    pub sections: Vec<String>,
    pub font_sizes: BTreeMap<FontRole, u32>,
    pub publication_limit: LengthLimit,
    pub analysis_limit: LengthLimit,
    pub min_words: Option<u32>,
}

impl MergedTemplate {
    /// 指定单位下起约束作用的篇幅上限（取两者中较小者）
    pub fn limit_for(&self, unit: LengthUnit) -> Option<LengthLimit> {
        [self.publication_limit, self.analysis_limit]
            .into_iter()
            .filter(|l| l.unit == unit)
            .min_by_key(|l| l.value)
    }

    pub fn counts_characters(&self) -> bool {
        self.publication_limit.unit == LengthUnit::Characters
    }

    pub fn font_size(&self, role: FontRole) -> Option<u32> {
        self.font_sizes.get(&role).copied()
    }

    /// "Title: 16pt, Heading: 14pt, Body: 12pt"
    pub fn font_size_summary(&self) -> String {
        self.font_sizes
            .iter()
            .map(|(role, size)| format!("{}: {}pt", role.label(), size))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn structure_list(&self) -> String {
        self.sections
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct TemplateRegistry;

impl TemplateRegistry {
    pub fn publication(name: &str) -> CopilotResult<&'static DocumentTemplate> {
        PUBLICATION_TEMPLATES
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CopilotError::TemplateNotFound(format!("publication type '{}'", name)))
    }

    pub fn analysis(name: &str) -> CopilotResult<&'static DocumentTemplate> {
        ANALYSIS_TEMPLATES
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CopilotError::TemplateNotFound(format!("analysis type '{}'", name)))
    }

    /// 按名称合并出版物模板与分析模板
    pub fn merge(publication: &str, analysis: &str) -> CopilotResult<MergedTemplate> {
        let pub_template = Self::publication(publication)?;
        let analysis_template = Self::analysis(analysis)?;
        Ok(merge_templates(pub_template, analysis_template))
    }

    pub fn merged(publication: PublicationType, analysis: AnalysisType) -> MergedTemplate {
        // 枚举与模板表一一对应，查找不会失败
        match Self::merge(publication.name(), analysis.name()) {
            Ok(merged) => merged,
            Err(e) => unreachable!("模板表缺少枚举项: {}", e),
        }
    }
}

fn merge_templates(publication: &DocumentTemplate, analysis: &DocumentTemplate) -> MergedTemplate {
    let mut sections: Vec<String> = Vec::new();
    for section in publication.sections.iter().chain(analysis.sections.iter()) {
        if !sections.iter().any(|s| s == section) {
            sections.push(section.to_string());
        }
    }

    // analysis 的字号覆盖 publication 的同名项
    let mut font_sizes: BTreeMap<FontRole, u32> = publication.font_sizes.iter().copied().collect();
    font_sizes.extend(analysis.font_sizes.iter().copied());

    MergedTemplate {
        sections,
        font_sizes,
        publication_limit: publication.limit,
        analysis_limit: analysis.limit,
        min_words: publication.min_words.or(analysis.min_words),
    }
}

/// 各分析类型推荐准备的源文档
pub fn recommended_sources(analysis: AnalysisType) -> &'static [&'static str] {
    match analysis {
        AnalysisType::PrimaryEfficacy => &[
            "Clinical Study Report (CSR)",
            "Study Protocol",
            "Statistical Analysis Plan (SAP)",
            "Raw Efficacy Data",
            "Tables, Listings, and Figures (TLFs) for Primary Endpoints",
        ],
        AnalysisType::Safety => &[
            "Clinical Study Report (CSR)",
            "Safety Data (e.g., Adverse Events, Lab Data)",
            "Study Protocol",
            "Safety Monitoring Plan",
            "Tables, Listings, and Figures (TLFs) for Safety Parameters",
        ],
        AnalysisType::Pharmacokinetic => &[
            "PK Data Set",
            "Bioanalytical Report",
            "PK Analysis Plan",
            "Study Protocol",
            "PK Modeling Results",
        ],
        AnalysisType::Subgroup => &[
            "Clinical Study Report (CSR)",
            "Statistical Analysis Plan (SAP)",
            "Raw Data for Relevant Subgroups",
            "Pre-specified Subgroup Definitions",
            "Tables, Listings, and Figures (TLFs) for Subgroup Analyses",
        ],
        AnalysisType::Interim => &[
            "Interim Clinical Study Report",
            "Study Protocol",
            "Interim Analysis Plan",
            "Data Cut-off Specifications",
            "Independent Data Monitoring Committee (IDMC) Reports",
        ],
        AnalysisType::PostHoc => &[
            "Clinical Study Report (CSR)",
            "Raw Data Sets",
            "Post-hoc Analysis Plan",
            "Justification for Additional Analyses",
            "Previous Publication Manuscripts (if applicable)",
        ],
        AnalysisType::TrialInProgress => &[
            "Study Protocol",
            "Investigator's Brochure",
            "Clinical Trial Registration Information",
            "Enrollment Data (if available)",
            "Preliminary Safety Data (if available)",
        ],
        AnalysisType::BaselineCharacteristics => &[
            "Clinical Study Report (CSR) or Interim Report",
            "Study Protocol",
            "Statistical Analysis Plan (SAP)",
            "Demographic and Baseline Data",
            "Tables, Listings, and Figures (TLFs) for Baseline Characteristics",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_enum_value_has_a_template() {
        for p in PublicationType::ALL {
            assert!(TemplateRegistry::publication(p.name()).is_ok(), "{}", p);
        }
        for a in AnalysisType::ALL {
            assert!(TemplateRegistry::analysis(a.name()).is_ok(), "{}", a);
        }
    }

    #[test]
    fn merged_sections_cover_both_templates_without_duplicates() {
        for &p in PublicationType::ALL {
            for &a in AnalysisType::ALL {
                let merged = TemplateRegistry::merged(p, a);
                let pub_t = TemplateRegistry::publication(p.name()).unwrap();
                let ana_t = TemplateRegistry::analysis(a.name()).unwrap();

                for s in pub_t.sections.iter().chain(ana_t.sections.iter()) {
                    assert!(merged.sections.iter().any(|m| m == s), "{} / {} 缺少 {}", p, a, s);
                }

                let unique: HashSet<&String> = merged.sections.iter().collect();
                assert_eq!(unique.len(), merged.sections.len(), "{} / {} 存在重复章节", p, a);

                // 首次出现顺序：publication 的章节在前且保持原顺序
                let prefix: Vec<&str> = merged.sections.iter().take(pub_t.sections.len()).map(|s| s.as_str()).collect();
                assert_eq!(prefix, pub_t.sections.to_vec());
            }
        }
    }

    #[test]
    fn analysis_font_sizes_override_publication() {
        let merged = TemplateRegistry::merged(PublicationType::CongressAbstract, AnalysisType::Safety);
        assert_eq!(merged.font_size(FontRole::Title), Some(16));
        assert_eq!(merged.font_size(FontRole::Body), Some(12));
        assert_eq!(merged.font_size(FontRole::Heading), Some(14));
        assert_eq!(merged.font_size_summary(), "Title: 16pt, Heading: 14pt, Body: 12pt");

        let poster = TemplateRegistry::merged(PublicationType::Poster, AnalysisType::Interim);
        // Subheading only exists on the poster side
        assert_eq!(poster.font_size(FontRole::Subheading), Some(24));
    }

    #[test]
    fn limits_apply_in_their_own_unit() {
        let merged = TemplateRegistry::merged(PublicationType::CongressAbstract, AnalysisType::TrialInProgress);
        assert!(merged.counts_characters());
        assert_eq!(merged.limit_for(LengthUnit::Characters), Some(LengthLimit::characters(2000)));
        assert_eq!(merged.limit_for(LengthUnit::Words), Some(LengthLimit::words(500)));

        let manuscript = TemplateRegistry::merged(PublicationType::Manuscript, AnalysisType::Safety);
        assert!(!manuscript.counts_characters());
        assert_eq!(manuscript.limit_for(LengthUnit::Words), Some(LengthLimit::words(2000)));
        assert_eq!(manuscript.limit_for(LengthUnit::Characters), None);
    }

    #[test]
    fn unknown_names_are_reported() {
        let err = TemplateRegistry::merge("Press Release", "Safety Analysis").unwrap_err();
        assert!(matches!(err, CopilotError::TemplateNotFound(_)));
        assert!(TemplateRegistry::merge("Manuscript", "Meta Analysis").is_err());
    }

    #[test]
    fn types_parse_from_name_or_slug() {
        assert_eq!("manuscript".parse::<PublicationType>().unwrap(), PublicationType::Manuscript);
        assert_eq!(
            "Plain Language Summary".parse::<PublicationType>().unwrap(),
            PublicationType::PlainLanguageSummary
        );
        assert_eq!("pk".parse::<AnalysisType>().unwrap(), AnalysisType::Pharmacokinetic);
        assert!("nonsense".parse::<AnalysisType>().is_err());
    }

    #[test]
    fn every_analysis_type_has_source_recommendations() {
        for &a in AnalysisType::ALL {
            assert_eq!(recommended_sources(a).len(), 5);
        }
    }
}
