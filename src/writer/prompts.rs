//! 生成提示词与评审提示词

use crate::charts::ChartKind;
use crate::config::{AnalysisType, MergedTemplate, PublicationType};
use crate::config::templates::LengthUnit;
use crate::parser::TableParser;
use crate::utils::truncate_chars;

/// 提示词模板版本，改动任何模板文字时递增，使旧缓存失效
pub const PROMPT_TEMPLATE_VERSION: u32 = 1;

pub const GENERATION_SYSTEM_ROLE: &str = "You are a professional scientific medical writing assistant specializing in transforming Clinical Study Reports (CSRs) and other source documents into various publication types.";

pub const CRITIQUE_SYSTEM_ROLE: &str = "You are a scientific writing expert.";

/// 评审时送入的正文字符上限
pub const CRITIQUE_MAX_CHARS: usize = 64_000;

const ACKNOWLEDGEMENT_GUIDE: &str = r#"**Acknowledgement:**
- ALWAYS include an Acknowledgement section at the end of the document with the following text:
  "This [publication type] was created with the assistance of generative AI technology.""#;

pub struct PromptComposer;

impl PromptComposer {
    /// 按出版物类型选择模板，拼出一条完整的生成指令
    pub fn compose(
        merged: &MergedTemplate,
        publication: PublicationType,
        analysis: AnalysisType,
        source_text: &str,
        instructions: &str,
    ) -> String {
        match publication {
            PublicationType::PlainLanguageSummary => {
                plain_language_prompt(publication, analysis, source_text, instructions)
            }
            PublicationType::CongressAbstract => {
                congress_abstract_prompt(merged, publication, analysis, source_text, instructions)
            }
            PublicationType::Manuscript => {
                let tables = TableParser::new().extract_pipe_tables(source_text);
                manuscript_prompt(merged, analysis, &tables, source_text, instructions)
            }
            PublicationType::Poster => {
                let tables = TableParser::new().extract_pipe_tables(source_text);
                generic_prompt(merged, publication, analysis, &tables, source_text, instructions)
            }
        }
    }

    pub fn critique(content: &str, publication: PublicationType, analysis: AnalysisType) -> String {
        let content = truncate_chars(content, CRITIQUE_MAX_CHARS);
        match publication {
            PublicationType::PlainLanguageSummary => format!(
                "Evaluate the following Plain Language Summary for a {analysis}.\n\
                 Provide a comprehensive assessment of its quality, focusing on:\n\
                 1. Clarity and simplicity of language (aim for 6th to 8th-grade reading level)\n\
                 2. Avoidance of jargon and technical terms\n\
                 3. Logical flow and organization of information\n\
                 4. Relevance to patient audience\n\
                 5. Inclusion of key sections (Background, Purpose, Methods, Results, Implications)\n\
                 6. Use of everyday examples or analogies to explain complex concepts\n\
                 7. Appropriate length (200-750 words)\n\n\
                 Highlight any areas that need improvement and suggest specific enhancements.\n\n\
                 Content:\n{content}\n\nEvaluation:",
            ),
            _ => format!(
                "Evaluate the following {publication} content for a {analysis}.\n\
                 Provide a comprehensive assessment of its quality, coherence, and adherence to scientific writing standards.\n\
                 Highlight any areas that need improvement and suggest specific enhancements.\n\n\
                 Content:\n{content}\n\nEvaluation:",
            ),
        }
    }
}

/// 所有模板共用的图表说明，限定 "type" 只能取固定取值
fn visualization_guide() -> String {
    let tokens = ChartKind::ALL
        .iter()
        .map(|k| k.token())
        .collect::<Vec<_>>()
        .join("|");
    format!(
        r###"**Visualizations:**
- Extract key numerical data from the input and suggest up to 2 relevant charts or visualizations.
- For each chart, provide the following in JSON format, enclosed within triple backticks and specify the language as JSON:

```json
{{
  "type": "{tokens}",
  "title": "Chart Title",
  "x_label": "X-axis Label",
  "y_label": "Y-axis Label",
  "data_series": ["Numerical Series1", "Numerical Series2", ...],
  "data": [
    {{"X-axis Value": ..., "Numerical Series1": ..., "Numerical Series2": ...}},
    ...
  ]
}}
```

- The "type" value MUST be exactly one of: {tokens}. Charts with any other type are discarded.
- Series requirements: pie and histogram take exactly one series; scatter takes exactly two (x, y); survival takes duration, event and an optional group series; heatmap takes row, column and value series; waterfall, box and violin take a category series and a value series.
- Every row in "data" must contain a value for every name in "data_series".

After completing the publication and analysis content, provide a separate section titled "## Visualizations" containing all chart JSON data."###
    )
}

fn length_lines(merged: &MergedTemplate) -> String {
    format!(
        "- **Publication:** Maximum {}.\n- **Analysis:** Maximum {}.",
        merged.publication_limit, merged.analysis_limit
    )
}

fn plain_language_prompt(
    publication: PublicationType,
    analysis: AnalysisType,
    source_text: &str,
    instructions: &str,
) -> String {
    format!(
        r#"{role}

You are tasked with generating a comprehensive Plain Language Summary that combines the structure and guidelines of the following:

**Publication Type:** {publication}
**Analysis Type:** {analysis}

### **Guidelines:**

**Target Reading Level:**
- Write the summary at a 6th to 8th-grade reading level.
- Aim for short sentences averaging 15 words or fewer.
- Use simple sentence structures; avoid complex or compound sentences.

**Language and Style:**
- Use common, everyday words instead of medical jargon.
- If medical terms are necessary, explain them in simple language.
- Write in active voice and present tense where appropriate.
- Engage the reader by addressing them directly when suitable.

**Structure and Content:**
- **Title:** Simple and clear, reflecting the main message (10-15 words).
- **Key Points:** 3-5 bullet points summarizing the most important takeaways.
- **Background:** Brief context about the condition and why the study was done (2-3 sentences).
- **What Was the Study About?:** Clear statement of the study's purpose (1-2 sentences).
- **How Was the Study Done?:** Simple description of the study methods, avoiding technical details (2-3 sentences).
- **What Were the Results?:** Key findings in plain language, focusing on what's most relevant to patients (3-4 sentences).
- **What Do the Results Mean for Patients?:** Practical implications for patient care or decision-making (2-3 sentences).
- **What's Next?:** Mention any study limitations or ongoing research (1-2 sentences).
- **Disclosures:** Include funding sources and any potential conflicts of interest.
- **Review Statement:** State that the summary was reviewed by a medical expert and a patient advocate (if applicable).

Use Markdown second-level headers (## Heading) for every section.

**Acronyms and Abbreviations:**
- Spell out acronyms upon first use and provide a simple explanation if necessary.

{visuals}
- Keep visuals simple, clearly labeled and easy to understand.

**Writing Tips:**
- Keep paragraphs brief (3-5 sentences).
- Use bullet points or numbered lists where appropriate.
- Address common questions patients might have.
- Avoid unnecessary words or filler content.

{ack}

**Final Review:**
- Before finalizing, read the summary aloud to ensure it flows naturally.
- Verify that the FKGL is between 6 and 8 using readability assessment tools.
- Make adjustments to sentence length and word choice as needed to achieve the target reading level.

Input:
{source_text}

Additional Instructions:
{instructions}
"#,
        role = GENERATION_SYSTEM_ROLE,
        visuals = visualization_guide(),
        ack = ACKNOWLEDGEMENT_GUIDE,
    )
}

fn congress_abstract_prompt(
    merged: &MergedTemplate,
    publication: PublicationType,
    analysis: AnalysisType,
    source_text: &str,
    instructions: &str,
) -> String {
    let char_limit = merged
        .limit_for(LengthUnit::Characters)
        .map(|l| l.value)
        .unwrap_or(2000);
    format!(
        r#"{role}

You are tasked with generating a scientific congress abstract following these guidelines:

**Publication Type:** {publication}
**Analysis Type:** {analysis}

### **Guidelines:**

1. **Structure:**
   Create an abstract with the following four sections, each as a Markdown second-level header (## Heading):
   a) Background: Provide a brief introduction explaining the study's rationale.
   b) Methods: Describe the key methodological procedures concisely.
   c) Results: Summarize the main findings of the research.
   d) Conclusions: State the primary conclusions drawn from the study.

2. **Title:**
   - Craft a title that reflects the abstract's content using significant words.
   - Do not include study results or conclusions in the title.
   - Avoid using commercial names in the title.

3. **Content Guidelines:**
   - Use generic names for compounds in lower case.
   - If including commercial names in the text, use the ® symbol and place them in brackets after the generic name, e.g., "generic (Commercial®)".
   - Provide the name(s) of the legal entity/entities responsible for the study's governance, coordination, and execution.
   - Include the name(s) of organizations providing funding.

4. **Abbreviations:**
   - Define all abbreviations upon first use.
   - Spell out terms in full at first mention, followed by the abbreviation in parentheses.
   - Take extra care to identify complex chemotherapeutic regimens clearly.

5. **Length:**
   - Limit the abstract to {char_limit} characters, excluding spaces.

6. **Additional Notes:**
   - Ensure all information is accurate and reflects the study correctly.
   - Maintain a professional and scientific tone throughout the abstract.
   - Focus on presenting the most crucial and impactful aspects of the study within the limited space.

{visuals}

{ack}

Input:
{source_text}

Additional Instructions:
{instructions}
"#,
        role = GENERATION_SYSTEM_ROLE,
        visuals = visualization_guide(),
        ack = ACKNOWLEDGEMENT_GUIDE,
    )
}

fn manuscript_prompt(
    merged: &MergedTemplate,
    analysis: AnalysisType,
    tables: &str,
    source_text: &str,
    instructions: &str,
) -> String {
    format!(
        r#"You are a professional scientific medical writing assistant. Generate a comprehensive manuscript for a clinical trial, adhering to international reporting standards (e.g., CONSORT). Ensure ALL of the following sections and details are included, each as a Markdown second-level header (## Heading):

1. Title: Concise, informative title reflecting the study's main focus.

2. Abstract: Structured summary (250-300 words) including:
   - Background
   - Methods (design, participants, interventions, main outcomes)
   - Results (number randomized, primary and key secondary outcomes)
   - Conclusions
   - Trial Registration: NCT number

3. Introduction:
   - Background: Explain the scientific context and rationale
   - Objectives: State specific objectives and hypotheses

4. Methods:
   - Trial Design: type of trial and its framework, allocation ratio, important changes to methods after commencement with reasons
   - Participants: eligibility criteria, settings and locations, study duration including recruitment and follow-up
   - Interventions: precise details for each group (drug, manufacturer, dose, route, regimen), washout and run-in phases, compliance monitoring, allowed or prohibited concomitant treatments
   - Outcomes: primary and secondary outcome measures with how and when they were assessed, changes after commencement, validity and reliability
   - Sample Size: how it was determined, interim analyses and stopping guidelines
   - Randomization: sequence generation, allocation concealment, implementation
   - Blinding: who was blinded, similarity of interventions, evaluation of blinding success
   - Statistical Methods: group comparisons for primary and secondary outcomes, handling of missing data, multiplicity adjustments, analysis populations, subgroup/adjusted/sensitivity analyses, statistical software
   - Ethical Considerations: ethics committee approval, informed consent, guidelines followed, data monitoring and safety procedures

5. Results:
   - Participant Flow: numbers screened, eligible, consented, randomized, treated and analyzed, with reasons for non-participation, losses and exclusions
   - Recruitment: dates of recruitment and follow-up, why the trial ended if applicable
   - Baseline Data: table of baseline demographic and clinical characteristics per group
   - Numbers Analyzed: participants per analysis, whether by original assigned groups, protocol deviations
   - Outcomes and Estimation: results per group, effect size with precision (95% confidence interval), absolute and relative effects for binary outcomes
   - Ancillary Analyses: subgroup, adjusted and sensitivity analyses, distinguishing pre-specified from exploratory
   - Harms: absolute risks of important adverse events, serious adverse events, withdrawals due to adverse events, most common adverse events (>5%), timing, severity and duration

6. Discussion:
   - Limitations: Trial limitations, addressing sources of potential bias, imprecision, and, if relevant, multiplicity of analyses
   - Generalizability: External validity of the trial findings
   - Interpretation: Interpretation consistent with results, balancing benefits and harms, and considering other relevant evidence

7. Other Information:
   - Registration: Registration number and name of trial registry
   - Protocol: Where the full trial protocol can be accessed, if available
   - Funding: Sources of funding and other support, role of funders

Use Markdown table syntax for tables, built from actual data in the source where available.

{visuals}

{ack}

Ensure that all sections are comprehensive and adhere to the guidelines provided. Use the following input to generate the manuscript:

Analysis Type: {analysis}
Maximum Length: {limit}
Font Sizes: {fonts}
Structure:
{structure}
Extracted Data:
{tables}
Input: {source_text}
Additional Instructions: {instructions}

Generate the complete manuscript, ensuring all required sections and details are included. Adhere to the specified maximum length and structure guidelines.
"#,
        limit = merged.publication_limit,
        fonts = merged.font_size_summary(),
        structure = merged.structure_list(),
        visuals = visualization_guide(),
        ack = ACKNOWLEDGEMENT_GUIDE,
    )
}

fn generic_prompt(
    merged: &MergedTemplate,
    publication: PublicationType,
    analysis: AnalysisType,
    tables: &str,
    source_text: &str,
    instructions: &str,
) -> String {
    format!(
        r#"{role}

You are tasked with generating a comprehensive document that combines the structure and guidelines of the following:

**Publication Type:** {publication}
**Analysis Type:** {analysis}

### **Guidelines:**

1. **Document Length:**
{lengths}

2. **Font Sizes:**
- {fonts}

3. **Structure:**
- The document should include all sections from both the publication type and analysis type. Ensure that each section is clearly marked using Markdown syntax (e.g., ## Title, ### Methods).
- Provide detailed and comprehensive content for each section. Aim for at least 2-3 sentences per section, unless otherwise specified.

4. **Content Generation:**
- Use clear and concise language appropriate for a scientific publication.
- If specific information is not provided in the input, use placeholder text or general statements that would be appropriate for the section.

5. {visuals}

6. **Tables:**
- Include up to 5-7 essential tables that complement the text.
- For each table:
  - Provide a detailed title
  - List column headers
  - Use actual data from the source document if available. Here's the extracted tabular data:
{tables}
  - If actual data is not available or incomplete, provide placeholder data or ranges based on the study information
- Use Markdown table syntax for creating tables.

7. {ack}

Adherence to Guidelines:
Strictly adhere to the format and guidelines for both the publication type and analysis type.
Ensure that ALL sections specified in the combined structure are present and contain at least minimal content.

Combined Structure:
{structure}

Input:
{source_text}

Additional Instructions:
{instructions}
"#,
        role = GENERATION_SYSTEM_ROLE,
        lengths = length_lines(merged),
        fonts = merged.font_size_summary(),
        visuals = visualization_guide(),
        structure = merged.structure_list(),
        ack = ACKNOWLEDGEMENT_GUIDE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateRegistry;

    fn compose(publication: PublicationType, source: &str) -> String {
        let analysis = AnalysisType::Safety;
        let merged = TemplateRegistry::merged(publication, analysis);
        PromptComposer::compose(&merged, publication, analysis, source, "Focus on grade 3+ events.")
    }

    #[test]
    fn every_template_requests_charts_and_acknowledgement() {
        for publication in PublicationType::ALL {
            let prompt = compose(*publication, "CSR text");
            assert!(prompt.contains("## Visualizations"), "{}", publication);
            assert!(prompt.contains("```json"), "{}", publication);
            assert!(
                prompt.contains("was created with the assistance of generative AI technology."),
                "{}",
                publication
            );
            assert!(prompt.contains("bar|line|pie|scatter|histogram|survival|heatmap|waterfall|box|violin"));
            assert!(prompt.contains("CSR text"));
            assert!(prompt.contains("Focus on grade 3+ events."));
        }
    }

    #[test]
    fn visualization_guide_keeps_closing_instruction() {
        let guide = visualization_guide();
        assert!(guide.ends_with(
            r###"provide a separate section titled "## Visualizations" containing all chart JSON data."###
        ));
        assert!(guide.contains(r#""type": "bar|line|pie"#));
        assert!(!guide.contains("{{"));
    }

    #[test]
    fn poster_prompt_carries_structure_limits_and_tables() {
        let source = "| AE | n |\n| Nausea | 12 |\n";
        let prompt = compose(PublicationType::Poster, source);
        assert!(prompt.contains("**Publication:** Maximum 10000 characters."));
        assert!(prompt.contains("**Analysis:** Maximum 2000 words."));
        assert!(prompt.contains("- Safety Results"));
        assert!(prompt.contains("| AE | n |\n| Nausea | 12 |"));
    }

    #[test]
    fn manuscript_without_tables_uses_sentinel() {
        let prompt = compose(PublicationType::Manuscript, "narrative only");
        assert!(prompt.contains("No tabular data found in the source document."));
        assert!(prompt.contains("Maximum Length: 3500 words"));
    }

    #[test]
    fn critique_prompt_variants() {
        let pls = PromptComposer::critique("Body", PublicationType::PlainLanguageSummary, AnalysisType::Safety);
        assert!(pls.starts_with("Evaluate the following Plain Language Summary for a Safety Analysis."));

        let generic = PromptComposer::critique("Body", PublicationType::Poster, AnalysisType::Interim);
        assert!(generic.starts_with("Evaluate the following Poster content for a Interim Analysis."));
        assert!(generic.ends_with("Content:\nBody\n\nEvaluation:"));
    }

    #[test]
    fn critique_truncates_long_content() {
        let long = "x".repeat(CRITIQUE_MAX_CHARS + 500);
        let prompt = PromptComposer::critique(&long, PublicationType::Manuscript, AnalysisType::Safety);
        assert!(prompt.len() < CRITIQUE_MAX_CHARS + 400);
    }
}
