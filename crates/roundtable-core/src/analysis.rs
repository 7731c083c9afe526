//! Document analysis.
//!
//! [`analyze`] is a cheap, model-free inspection of a reference document:
//! paragraph and section layout, likely headers, table rows, list items,
//! frequently repeated terms, named organizations and a few metadata
//! guesses. Used by `rtable analyze` to preview a document before a
//! discussion.
//!
//! The deep pass adds a model-written content analysis
//! ([`analyze_content`]), folds both into a [`DocumentReport`] whose summary
//! falls back to the structure when the model is unavailable, and picks out
//! the passages and keywords most useful for retrieval
//! ([`key_information`]).

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::actions::Language;
use crate::error::GenerationError;
use crate::generate::{CompletionRequest, Generator};
use crate::tokens::{count_tokens, ApproxCounter};

/// Numbered, roman, chapter, bracketed and bullet-marked headings.
static HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:\s*第[一二三四五六七八九十１２３４５６７８９０]+[章節項].*|\s*\d+[.\-\s].*|\s*[IVXivx]+[.\s].*|\s*(?i:chapter|section|part)\s+\d+.*|【.*】|［.*］|■.*|●.*)$",
    )
    .unwrap()
});

static LIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•◦▪▫]|\d+[.)]|[a-zA-Zａ-ｚＡ-Ｚ][.)])").unwrap());

static TERM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[一-龠ぁ-んァ-ヶー々a-zA-Z0-9]{2,}").unwrap());

static DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}[年/\-]\s*\d{1,2}[月/\-]\s*\d{1,2}日?|(?:令和|平成)\d+年\d+月\d+日").unwrap()
});

static BRACKET_TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【(.+?)】|\[(.+?)\]").unwrap());

static FIGURE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:図|表)\s*\d+|(?i:\b(?:figure|table)\s+\d+)").unwrap());

static ARTICLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*\d+\s*条|(?i:\barticle\s+\d+)").unwrap());

/// Organization names: `株式会社X`, `X株式会社`, `X大学`, `X協会`, `Acme社`
/// and English company or institution names.
static ENTITY_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"株式会社[一-龠ァ-ヶーA-Za-zＡ-Ｚａ-ｚ0-9]{2,}",
        r"[一-龠ァ-ヶーA-Za-zＡ-Ｚａ-ｚ0-9]{2,}(?:株式会社|大学|協会)",
        r"[A-Z][A-Za-z]+\s*社",
        r"\b[A-Z][A-Za-z&]*(?:\s+[A-Z][A-Za-z&]*)*\s+(?:Inc|Corp|Corporation|Ltd|LLC|University|Association)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Numbered heading of one part of a content analysis, with whatever
/// follows the name on the same line.
static ANALYSIS_HEADING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t#*]*[1-5][.)．][ \t*]*(?P<name>(?i:summary|main topics|key points|key data|document analysis)|要約|主要トピック|重要ポイント|重要データ|文書分析)\**(?P<rest>[^\n]*)$",
    )
    .unwrap()
});

static BULLET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[・\-*•]|\d+[.)])\s*").unwrap());

const MAX_KEY_TERMS: usize = 20;
const MAX_KEY_ENTITIES: usize = 10;
const METADATA_SAMPLE_CHARS: usize = 1000;
const TYPE_SAMPLE_CHARS: usize = 2000;
const MAX_TITLE_CHARS: usize = 100;

/// Documents longer than this are sampled before the content analysis.
pub const CONTENT_SAMPLE_CHARS: usize = 12_000;
/// Length of each of the head, middle and tail samples.
pub const SAMPLE_PART_CHARS: usize = 4_000;
/// Shorter documents are not worth a content analysis.
pub const MIN_ANALYSIS_CHARS: usize = 100;
/// A section opening shorter than this is not a key passage.
const MIN_PASSAGE_CHARS: usize = 50;
const MAX_LIST_PASSAGES: usize = 5;
const MAX_TABLE_PASSAGES: usize = 3;
const KEYWORDS_PER_POINT: usize = 3;

/// A run of paragraphs under one detected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocSection {
    pub header: String,
    /// Paragraph index of the header.
    pub start_paragraph: usize,
    pub paragraphs: usize,
    pub chars: usize,
    /// First paragraph after the header.
    pub opening: Option<String>,
}

/// Document genre, guessed from keywords near the start of the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Report,
    Minutes,
    Specification,
    Manual,
    Contract,
    Proposal,
    DataAnalysis,
}

/// Checked in order; the first type with a keyword in the sample wins.
/// English keywords are matched against the lowercased sample.
const DOCUMENT_TYPES: &[(DocumentType, &[&str])] = &[
    (
        DocumentType::Report,
        &["報告", "レポート", "調査結果", "分析", "report", "findings", "analysis"],
    ),
    (
        DocumentType::Minutes,
        &["議事録", "会議", "打ち合わせ", "ミーティング", "minutes", "meeting", "agenda"],
    ),
    (
        DocumentType::Specification,
        &["仕様", "要件", "設計", "specification", "requirements", "design"],
    ),
    (
        DocumentType::Manual,
        &["マニュアル", "手順", "ガイド", "使い方", "manual", "procedure", "guide", "how to"],
    ),
    (
        DocumentType::Contract,
        &["契約", "規約", "約款", "条項", "contract", "agreement", "terms and conditions", "clause"],
    ),
    (
        DocumentType::Proposal,
        &["企画", "プロポーザル", "提案", "計画", "proposal", "propose"],
    ),
    (
        DocumentType::DataAnalysis,
        &["データ", "統計", "分析結果", "調査データ", "statistics", "dataset", "survey data"],
    ),
];

impl DocumentType {
    pub fn label(self, language: Language) -> &'static str {
        match (self, language) {
            (DocumentType::Report, Language::En) => "report",
            (DocumentType::Minutes, Language::En) => "meeting minutes",
            (DocumentType::Specification, Language::En) => "specification",
            (DocumentType::Manual, Language::En) => "manual",
            (DocumentType::Contract, Language::En) => "contract",
            (DocumentType::Proposal, Language::En) => "proposal",
            (DocumentType::DataAnalysis, Language::En) => "data analysis",
            (DocumentType::Report, Language::Ja) => "報告書",
            (DocumentType::Minutes, Language::Ja) => "議事録",
            (DocumentType::Specification, Language::Ja) => "仕様書",
            (DocumentType::Manual, Language::Ja) => "マニュアル",
            (DocumentType::Contract, Language::Ja) => "契約書",
            (DocumentType::Proposal, Language::Ja) => "企画書",
            (DocumentType::DataAnalysis, Language::Ja) => "データ分析",
        }
    }
}

/// Result of [`analyze`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentStructure {
    pub total_chars: usize,
    pub estimated_tokens: usize,
    /// Non-blank lines.
    pub paragraph_count: usize,
    pub sections: Vec<DocSection>,
    pub potential_headers: Vec<String>,
    /// Lines with at least two pipes.
    pub table_rows: Vec<String>,
    pub list_items: Vec<String>,
    /// Most frequent terms occurring at least twice.
    pub key_terms: Vec<String>,
    pub estimated_title: Option<String>,
    pub possible_date: Option<String>,
    pub document_kind: Option<&'static str>,
    pub document_type: Option<DocumentType>,
    /// Organization names in order of appearance, at most ten.
    pub key_entities: Vec<String>,
}

impl DocumentStructure {
    /// One-line description of the structure.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} paragraphs, {} sections, {} table rows, {} list items (~{} tokens)",
            self.paragraph_count,
            self.sections.len(),
            self.table_rows.len(),
            self.list_items.len(),
            self.estimated_tokens
        );
        if let Some(kind) = self.document_kind {
            line.push_str(&format!("; looks like a {kind}"));
        }
        if let Some(doc_type) = self.document_type {
            line.push_str(&format!("; type: {}", doc_type.label(Language::En)));
        }
        if !self.key_terms.is_empty() {
            let top: Vec<&str> = self.key_terms.iter().take(5).map(String::as_str).collect();
            line.push_str(&format!("; key terms: {}", top.join(", ")));
        }
        line
    }
}

/// Analyze the layout of `text`.
pub fn analyze(text: &str) -> DocumentStructure {
    let paragraphs: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut structure = DocumentStructure {
        total_chars: text.chars().count(),
        estimated_tokens: count_tokens(&ApproxCounter, text),
        paragraph_count: paragraphs.len(),
        ..DocumentStructure::default()
    };

    for (i, para) in paragraphs.iter().enumerate() {
        let is_header = HEADER_REGEX.is_match(para);
        if is_header {
            structure.potential_headers.push(para.trim().to_string());
            structure.sections.push(DocSection {
                header: para.trim().to_string(),
                start_paragraph: i,
                paragraphs: 0,
                chars: 0,
                opening: None,
            });
        } else if let Some(section) = structure.sections.last_mut() {
            section.paragraphs += 1;
            section.chars += para.chars().count();
            section.opening.get_or_insert_with(|| para.trim().to_string());
        }
        if para.matches('|').count() >= 2 {
            structure.table_rows.push(para.trim().to_string());
        }
        if LIST_REGEX.is_match(para) {
            structure.list_items.push(para.trim().to_string());
        }
    }

    if structure.sections.is_empty() && !paragraphs.is_empty() {
        structure.sections.push(DocSection {
            header: "Body".to_string(),
            start_paragraph: 0,
            paragraphs: paragraphs.len(),
            chars: structure.total_chars,
            opening: paragraphs.first().map(|p| p.trim().to_string()),
        });
    }

    structure.key_terms = key_terms(text);

    let sample = head_chars(text, METADATA_SAMPLE_CHARS);
    structure.estimated_title = estimate_title(text, sample);
    structure.possible_date = DATE_REGEX.find(sample).map(|m| m.as_str().to_string());
    structure.document_kind = document_kind(text);
    structure.document_type = document_type(head_chars(text, TYPE_SAMPLE_CHARS));
    structure.key_entities = key_entities(text);

    tracing::debug!(
        paragraphs = structure.paragraph_count,
        sections = structure.sections.len(),
        "analyzed document structure"
    );
    structure
}

/// Terms seen at least twice, most frequent first, ties in order of
/// first appearance.
fn key_terms(text: &str) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (order, m) in TERM_REGEX.find_iter(text).enumerate() {
        counts.entry(m.as_str()).or_insert((0, order)).0 += 1;
    }
    let mut terms: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(term, (count, first))| (term, count, first))
        .collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    terms
        .into_iter()
        .take(MAX_KEY_TERMS)
        .filter(|(_, count, _)| *count > 1)
        .map(|(term, _, _)| term.to_string())
        .collect()
}

fn estimate_title(text: &str, sample: &str) -> Option<String> {
    let first = text.lines().next().unwrap_or_default().trim();
    if !first.is_empty() && first.chars().count() < MAX_TITLE_CHARS {
        return Some(first.to_string());
    }
    BRACKET_TITLE_REGEX
        .captures(sample)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

fn document_kind(text: &str) -> Option<&'static str> {
    if text.contains("===") && (text.contains("シート") || text.contains("Sheet")) {
        Some("spreadsheet export")
    } else if ARTICLE_REGEX.is_match(text) {
        Some("contract or regulation")
    } else if FIGURE_REGEX.is_match(text) {
        Some("report or paper")
    } else {
        None
    }
}

fn document_type(sample: &str) -> Option<DocumentType> {
    let lower = sample.to_lowercase();
    DOCUMENT_TYPES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(doc_type, _)| *doc_type)
}

fn key_entities(text: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    for m in ENTITY_REGEXES.iter().flat_map(|re| re.find_iter(text)) {
        let name = m.as_str().trim();
        if !entities.iter().any(|e| e == name) {
            entities.push(name.to_string());
            if entities.len() == MAX_KEY_ENTITIES {
                break;
            }
        }
    }
    entities
}

fn head_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// `n` characters of `text` starting at character `start`.
fn char_window(text: &str, start: usize, n: usize) -> &str {
    let from = text.char_indices().nth(start).map_or(text.len(), |(i, _)| i);
    head_chars(&text[from..], n)
}

/// The text sent for content analysis: the whole document, or for long
/// documents its head, middle and tail joined by `...` lines.
pub fn content_sample(text: &str) -> String {
    let len = text.chars().count();
    if len <= CONTENT_SAMPLE_CHARS {
        return text.to_string();
    }
    let head = head_chars(text, SAMPLE_PART_CHARS);
    let middle = char_window(text, len / 2 - SAMPLE_PART_CHARS / 2, SAMPLE_PART_CHARS);
    let tail = char_window(text, len - SAMPLE_PART_CHARS, SAMPLE_PART_CHARS);
    format!("{head}\n...\n{middle}\n...\n{tail}")
}

/// Build the content-analysis request for `text`.
pub fn content_analysis_request(text: &str, language: Language) -> CompletionRequest {
    let sample = content_sample(text);
    let user = match language {
        Language::En => format!(
            "Analyze the following document in detail and report in this format:\n\n\
             1. Summary (3-5 sentences covering the whole document)\n\
             2. Main topics (a list of 3-7 main topics)\n\
             3. Key points (5-10 bulleted facts or claims)\n\
             4. Key data (bulleted figures, statistics and quantities; write \"None\" if there are none)\n\
             5. Document analysis (2-3 paragraphs on purpose, audience and overall character)\n\n\
             Base every statement strictly on the document and add nothing it does not say. \
             When listing key points or data, quote the relevant passage in \"double quotes\" where possible.\n\n\
             [Document]\n{sample}"
        ),
        Language::Ja => format!(
            "以下の文書を分析し、その内容と構造を詳細に解析してください。\n\
             分析結果は以下の形式で提供してください：\n\n\
             1. 要約（3-5文で文書全体の内容を簡潔に要約）\n\
             2. 主要トピック（文書から抽出された3-7個の主要なトピックをリスト）\n\
             3. 重要ポイント（箇条書きで5-10個の重要な事実や主張）\n\
             4. 重要データ（文書に含まれる重要な数値、統計、数量データを箇条書き。ない場合は「なし」）\n\
             5. 文書分析（文書の目的、対象読者、全体的な特徴について2-3段落）\n\n\
             必ず文書の内容に厳密に基づいた分析を行い、文書に存在しない情報や推測を含めないでください。\
             重要ポイントやデータを挙げる際は、可能な限り元の文書の該当部分からの引用を「」で囲んで含めてください。\n\n\
             [文書]\n{sample}"
        ),
    };
    CompletionRequest {
        system: "You analyze reference documents accurately and without speculation.".to_string(),
        user,
    }
}

/// Model-written analysis of a document's content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentAnalysis {
    pub summary: String,
    pub main_topics: Vec<String>,
    pub key_points: Vec<String>,
    pub key_data: Vec<String>,
    /// The full model response.
    pub details: String,
}

/// Split a content-analysis response into its numbered parts. Headings may
/// be English or Japanese; parts the response lacks stay empty.
pub fn parse_content_analysis(response: &str) -> ContentAnalysis {
    let mut analysis = ContentAnalysis {
        details: response.trim().to_string(),
        ..ContentAnalysis::default()
    };

    let headings: Vec<regex::Captures> = ANALYSIS_HEADING_REGEX.captures_iter(response).collect();
    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(name), Some(rest)) = (caps.get(0), caps.name("name"), caps.name("rest"))
        else {
            continue;
        };
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(response.len(), |m| m.start());
        let inline = rest.as_str().trim_start_matches([':', '：', ' ', '*']).trim();
        let body = format!("{inline}\n{}", &response[whole.end()..end]);

        match name.as_str().to_lowercase().as_str() {
            "summary" | "要約" => analysis.summary = body.split_whitespace().collect::<Vec<_>>().join(" "),
            "main topics" | "主要トピック" => analysis.main_topics = items(&body),
            "key points" | "重要ポイント" => analysis.key_points = items(&body),
            "key data" | "重要データ" => {
                let data = items(&body);
                if !data.iter().all(|d| is_none_marker(d)) {
                    analysis.key_data = data;
                }
            }
            _ => {}
        }
    }
    analysis
}

fn items(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| BULLET_REGEX.replace(line.trim(), "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn is_none_marker(item: &str) -> bool {
    let word = item.trim_end_matches(['.', '。']).to_lowercase();
    matches!(word.as_str(), "none" | "なし" | "n/a" | "特になし")
}

/// Ask `generator` for a content analysis of `text`.
///
/// # Errors
///
/// The classified [`GenerationError`] when the completion fails. Documents
/// shorter than [`MIN_ANALYSIS_CHARS`] fail without calling the generator.
pub async fn analyze_content(
    generator: &dyn Generator,
    text: &str,
    language: Language,
) -> Result<ContentAnalysis, GenerationError> {
    if text.trim().chars().count() < MIN_ANALYSIS_CHARS {
        return Err(GenerationError::classified("document is too short to analyze"));
    }
    tracing::info!(model = generator.model_name(), ?language, "analyzing document content");
    let request = content_analysis_request(text, language);
    let response = generator.complete(&request).await?;
    Ok(parse_content_analysis(&response))
}

/// Combined structure and content analysis of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentReport {
    pub name: String,
    pub structure: DocumentStructure,
    pub content: Option<ContentAnalysis>,
    /// The model's summary, or one built from the structure.
    pub summary: String,
    pub content_error: Option<String>,
    pub key_information: KeyInformation,
}

/// Build the full report for `text`. Without a generator, or when the
/// content analysis fails, the summary is built from the structure and
/// the failure is kept in `content_error`.
pub async fn analysis_report(
    generator: Option<&dyn Generator>,
    text: &str,
    name: &str,
    language: Language,
) -> DocumentReport {
    let structure = analyze(text);
    let (content, content_error) = match generator {
        Some(generator) => match analyze_content(generator, text, language).await {
            Ok(content) => (Some(content), None),
            Err(e) => {
                tracing::warn!(error = %e, "content analysis failed, summarizing from structure");
                (None, Some(e.to_string()))
            }
        },
        None => (None, None),
    };

    let summary = match content.as_ref().map(|c| c.summary.trim()) {
        Some(summary) if !summary.is_empty() => summary.to_string(),
        _ => structure_summary(&structure, name, language),
    };
    let key_information = key_information(text, content.as_ref());

    DocumentReport {
        name: name.to_string(),
        structure,
        content,
        summary,
        content_error,
        key_information,
    }
}

fn structure_summary(structure: &DocumentStructure, name: &str, language: Language) -> String {
    let title = structure.estimated_title.as_deref().unwrap_or(name);
    let doc_type = structure.document_type.map(|t| t.label(language));
    let paragraphs = structure.paragraph_count;
    let sections = structure.sections.len();
    match language {
        Language::En => {
            let mut out = format!("Document \"{title}\"");
            if let Some(t) = doc_type {
                out.push_str(&format!(" ({t})"));
            }
            out.push_str(&format!(" has {paragraphs} paragraphs in {sections} sections."));
            if let Some(date) = &structure.possible_date {
                out.push_str(&format!(" It is dated {date}."));
            }
            out
        }
        Language::Ja => {
            let mut out = format!("文書「{title}」");
            if let Some(t) = doc_type {
                out.push_str(&format!("（{t}）"));
            }
            out.push_str(&format!("は{paragraphs}段落、{sections}セクションで構成されています。"));
            if let Some(date) = &structure.possible_date {
                out.push_str(&format!("文書の日付は{date}です。"));
            }
            out
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Medium,
}

/// A passage worth indexing or quoting, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyPassage {
    pub text: String,
    pub source: String,
    pub importance: Importance,
}

/// Retrieval-oriented highlights of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyInformation {
    pub key_passages: Vec<KeyPassage>,
    pub key_entities: Vec<String>,
    /// Main topics of the content analysis.
    pub key_concepts: Vec<String>,
    pub search_keywords: Vec<String>,
}

/// Pick out key passages, entities, concepts and search keywords.
///
/// Section openings longer than 50 characters and the first three table
/// rows are high-importance passages; the first five list items are medium.
/// Key points of `content` contribute up to three keywords each. Text
/// shorter than [`MIN_ANALYSIS_CHARS`] yields nothing.
pub fn key_information(text: &str, content: Option<&ContentAnalysis>) -> KeyInformation {
    if text.chars().count() < MIN_ANALYSIS_CHARS {
        return KeyInformation::default();
    }
    let structure = analyze(text);
    let mut info = KeyInformation::default();

    for section in &structure.sections {
        if let Some(opening) = &section.opening {
            if opening.chars().count() > MIN_PASSAGE_CHARS {
                info.key_passages.push(KeyPassage {
                    text: opening.clone(),
                    source: section.header.clone(),
                    importance: Importance::High,
                });
            }
        }
    }
    for item in structure.list_items.iter().take(MAX_LIST_PASSAGES) {
        info.key_passages.push(KeyPassage {
            text: item.clone(),
            source: "list item".to_string(),
            importance: Importance::Medium,
        });
    }
    for row in structure.table_rows.iter().take(MAX_TABLE_PASSAGES) {
        info.key_passages.push(KeyPassage {
            text: row.clone(),
            source: "table row".to_string(),
            importance: Importance::High,
        });
    }

    info.key_entities = structure.key_entities;

    let mut keywords = structure.key_terms;
    if let Some(content) = content {
        info.key_concepts = content.main_topics.clone();
        for point in &content.key_points {
            keywords.extend(
                TERM_REGEX
                    .find_iter(point)
                    .take(KEYWORDS_PER_POINT)
                    .map(|m| m.as_str().to_string()),
            );
        }
    }
    let mut seen = HashSet::new();
    keywords.retain(|k| seen.insert(k.clone()));
    info.search_keywords = keywords;
    info
}
