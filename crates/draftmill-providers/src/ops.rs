//! Purpose-specific LLM operations.
//!
//! Each operation is one [`ChatModel::chat`] call plus deterministic
//! post-processing. All output normalization (JSON fence stripping,
//! heading removal, link force-append, structure repair) happens here —
//! the HTTP wrapper stays dumb.

use draftmill_types::{
    ArticleType, Block, BlockType, InternalLink, LinkPosition, SerpEntry,
    StructureAnalysis,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::{ChatMessage, ChatModel};
use crate::ProviderError;

const PROVIDER: &str = "openrouter";

/// Default word-count target when no competitor page yielded a usable one.
pub const DEFAULT_AVERAGE_WORDS: u32 = 2_000;

/// Minimum number of blocks a structure analysis must recommend.
pub const MIN_BLOCKS: usize = 5;

/// Maximum research questions per content block.
pub const MAX_QUESTIONS: usize = 5;

/// Shared prompt context derived from the job configuration.
#[derive(Debug, Clone, Copy)]
pub struct ArticleBrief<'a> {
    pub main_keyword: &'a str,
    pub article_type: ArticleType,
    pub language: &'a str,
    pub keywords: &'a [String],
    pub lsi_keywords: &'a [String],
    pub style_comment: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// 1. Structure analysis
// ---------------------------------------------------------------------------

/// Output of the structure-analysis operation.
#[derive(Debug, Clone)]
pub struct StructureOutcome {
    pub analysis: StructureAnalysis,
    pub blocks: Vec<Block>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStructure {
    #[serde(default)]
    average_word_count: u32,
    #[serde(default)]
    common_patterns: Vec<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    recommended_structure: Vec<RawBlock>,
}

/// Tolerant block shape: models drop ids and optional fields routinely.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    #[serde(rename = "type")]
    block_type: BlockType,
    #[serde(default)]
    heading: String,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    lsi_keywords: Vec<String>,
    #[serde(default)]
    questions: Option<Vec<String>>,
}

/// Analyze competitor structures and recommend a block outline.
pub async fn analyze_structure(
    chat: &dyn ChatModel,
    brief: &ArticleBrief<'_>,
    serp: &[SerpEntry],
    average_word_count: u32,
) -> Result<StructureOutcome, ProviderError> {
    let competitors: Vec<String> = serp
        .iter()
        .filter(|entry| entry.error.is_none())
        .map(|entry| {
            format!(
                "#{} {} ({} words)\n{}",
                entry.position,
                entry.title,
                entry.word_count,
                entry.headings.join("\n")
            )
        })
        .collect();

    let messages = [
        ChatMessage::system(
            "You are an SEO content strategist. Respond with a single JSON object \
             {\"averageWordCount\", \"commonPatterns\", \"strengths\", \"weaknesses\", \
             \"recommendedStructure\"} where recommendedStructure is an array of blocks \
             {\"type\", \"heading\", \"instruction\", \"lsiKeywords\", \"questions\"}. \
             Block types: h1, intro, h2, h3, conclusion, faq. Exactly one h1. \
             At least five blocks. No prose outside the JSON.",
        ),
        ChatMessage::user(format!(
            "Main keyword: {keyword}\nArticle type: {article_type:?}\nLanguage: {language}\n\
             Extra keywords: {keywords}\nLSI keywords: {lsi}\nStyle notes: {style}\n\
             Competitor average word count: {avg}\n\nCompetitor structures:\n{competitors}",
            keyword = brief.main_keyword,
            article_type = brief.article_type,
            language = brief.language,
            keywords = brief.keywords.join(", "),
            lsi = brief.lsi_keywords.join(", "),
            style = brief.style_comment.unwrap_or("none"),
            avg = average_word_count,
            competitors = competitors.join("\n\n"),
        )),
    ];

    let content = chat.chat(&messages, 0.3, 4_000).await?;
    let raw: RawStructure = parse_json(&content)?;

    if raw.recommended_structure.len() < MIN_BLOCKS {
        return Err(ProviderError::malformed(
            PROVIDER,
            format!(
                "structure analysis recommended {} blocks, need at least {MIN_BLOCKS}",
                raw.recommended_structure.len()
            ),
        ));
    }

    let blocks = normalize_blocks(raw.recommended_structure, brief.main_keyword);
    let analysis = StructureAnalysis {
        average_word_count: if raw.average_word_count > 0 {
            raw.average_word_count
        } else {
            average_word_count
        },
        common_patterns: raw.common_patterns,
        strengths: raw.strengths,
        weaknesses: raw.weaknesses,
    };

    Ok(StructureOutcome { analysis, blocks })
}

/// Repair a model-produced block list into an invariant-respecting one:
/// contiguous ids from 0, exactly one h1, empty intro heading, questions
/// only on content blocks and at most [`MAX_QUESTIONS`] each.
fn normalize_blocks(raw: Vec<RawBlock>, main_keyword: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(raw.len() + 1);
    let mut saw_h1 = false;
    for raw_block in raw {
        let mut block_type = raw_block.block_type;
        if block_type == BlockType::H1 {
            if saw_h1 {
                block_type = BlockType::H2;
            }
            saw_h1 = true;
        }
        let heading = if block_type == BlockType::Intro {
            String::new()
        } else {
            raw_block.heading
        };
        let questions = raw_block
            .questions
            .filter(|_| block_type.carries_questions())
            .map(|qs| qs.into_iter().take(MAX_QUESTIONS).collect::<Vec<_>>())
            .filter(|qs: &Vec<String>| !qs.is_empty());
        blocks.push(Block {
            id: 0,
            block_type,
            heading,
            instruction: raw_block.instruction,
            lsi_keywords: raw_block.lsi_keywords,
            questions,
            answered_questions: None,
            content: None,
        });
    }
    if !saw_h1 {
        blocks.insert(
            0,
            Block {
                id: 0,
                block_type: BlockType::H1,
                heading: main_keyword.to_string(),
                instruction: String::new(),
                lsi_keywords: Vec::new(),
                questions: None,
                answered_questions: None,
                content: None,
            },
        );
    }
    for (index, block) in blocks.iter_mut().enumerate() {
        block.id = index as u32;
    }
    blocks
}

// ---------------------------------------------------------------------------
// 2. Block enrichment
// ---------------------------------------------------------------------------

/// Rewrite block instructions in depth and attach research questions.
pub async fn enrich_blocks(
    chat: &dyn ChatModel,
    brief: &ArticleBrief<'_>,
    blocks: &[Block],
) -> Result<Vec<Block>, ProviderError> {
    let messages = [
        ChatMessage::system(
            "You refine article outlines. For every block, rewrite \"instruction\" \
             to be a detailed writing brief, and for h2/h3 blocks add up to five short \
             research questions. Respond with the full JSON array of blocks \
             {\"type\", \"heading\", \"instruction\", \"lsiKeywords\", \"questions\"} \
             in the same order. No prose outside the JSON.",
        ),
        ChatMessage::user(format!(
            "Main keyword: {keyword}\nLanguage: {language}\nStyle notes: {style}\n\n\
             Current outline:\n{outline}",
            keyword = brief.main_keyword,
            language = brief.language,
            style = brief.style_comment.unwrap_or("none"),
            outline = serde_json::to_string_pretty(blocks).unwrap_or_default(),
        )),
    ];

    let content = chat.chat(&messages, 0.4, 8_000).await?;
    let raw: Vec<RawBlock> = parse_json(&content)?;
    if raw.is_empty() {
        return Err(ProviderError::malformed(PROVIDER, "enrichment returned no blocks"));
    }
    Ok(normalize_blocks(raw, brief.main_keyword))
}

// ---------------------------------------------------------------------------
// 3. Block writing
// ---------------------------------------------------------------------------

fn block_prompt(block: &Block) -> String {
    match block.block_type {
        BlockType::H1 => format!(
            "Write a one-paragraph lead directly under the article title \"{}\". \
             Hook the reader; do not repeat the title.",
            block.heading
        ),
        BlockType::Intro => "Write the article introduction: what the reader will \
             learn and why it matters. Two to three paragraphs."
            .to_string(),
        BlockType::H2 | BlockType::H3 => format!(
            "Write the body of the section \"{}\". Follow the brief faithfully.",
            block.heading
        ),
        BlockType::Conclusion => "Write the conclusion: summarize the key takeaways \
             and end with a clear next step for the reader."
            .to_string(),
        BlockType::Faq => "Write a FAQ section: four to six common questions with \
             concise answers, each question as a bold line."
            .to_string(),
    }
}

/// Write one block, with the already-written article as style context.
pub async fn write_block(
    chat: &dyn ChatModel,
    brief: &ArticleBrief<'_>,
    block: &Block,
    prior_markdown: &str,
    target_words: u32,
) -> Result<String, ProviderError> {
    let answered = block
        .answered_questions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|a| format!("Q: {}\nA: {} (source: {})", a.question, a.answer, a.source))
        .collect::<Vec<_>>()
        .join("\n");

    let messages = [
        ChatMessage::system(format!(
            "You are writing one section of a {language} article about \
             \"{keyword}\". Match the voice of the prior sections. Return markdown \
             for the section body only: no section heading, no title. \
             Target article length: about {target_words} words overall.\
             {style}",
            language = brief.language,
            keyword = brief.main_keyword,
            style = brief
                .style_comment
                .map(|s| format!(" Style notes: {s}."))
                .unwrap_or_default(),
        )),
        ChatMessage::user(format!(
            "{prompt}\n\nWriting brief: {instruction}\nWork in these terms naturally: {lsi}\n\
             {answers}\n\nArticle so far:\n{prior}",
            prompt = block_prompt(block),
            instruction = block.instruction,
            lsi = block.lsi_keywords.join(", "),
            answers = if answered.is_empty() {
                String::new()
            } else {
                format!("Research findings to draw on:\n{answered}")
            },
            prior = prior_markdown,
        )),
    ];

    let content = chat.chat(&messages, 0.7, 4_000).await?;
    Ok(strip_leading_heading(&content))
}

/// Drop an accidental leading markdown heading from generated content.
pub fn strip_leading_heading(text: &str) -> String {
    let trimmed = text.trim_start();
    if trimmed.starts_with('#') {
        match trimmed.split_once('\n') {
            Some((_, rest)) => rest.trim_start().to_string(),
            None => String::new(),
        }
    } else {
        text.trim().to_string()
    }
}

// ---------------------------------------------------------------------------
// 4. Link-block selection (pure, no LLM call)
// ---------------------------------------------------------------------------

/// One internal link assigned to one block.
#[derive(Debug, Clone)]
pub struct LinkAssignment {
    pub block_id: u32,
    pub link: InternalLink,
}

/// Assign every internal link to a target block by position.
///
/// `intro`/`conclusion` links all land on the single intro/conclusion
/// block; `body` links go to distinct h2/h3 blocks in order; `any` links
/// go to distinct non-h1/non-faq blocks in order. When eligible blocks run
/// out, assignment wraps around so no link is dropped.
pub fn assign_links(links: &[InternalLink], blocks: &[Block]) -> Vec<LinkAssignment> {
    let intro = blocks.iter().find(|b| b.block_type == BlockType::Intro);
    let conclusion = blocks
        .iter()
        .find(|b| b.block_type == BlockType::Conclusion);
    let body_targets: Vec<u32> = blocks
        .iter()
        .filter(|b| matches!(b.block_type, BlockType::H2 | BlockType::H3))
        .map(|b| b.id)
        .collect();
    let any_targets: Vec<u32> = blocks
        .iter()
        .filter(|b| !matches!(b.block_type, BlockType::H1 | BlockType::Faq))
        .map(|b| b.id)
        .collect();
    let fallback = blocks.first().map(|b| b.id);

    let mut body_cursor = 0usize;
    let mut any_cursor = 0usize;
    let mut assignments = Vec::with_capacity(links.len());

    for link in links {
        let target = match link.position {
            LinkPosition::Intro => intro.map(|b| b.id).or(fallback),
            LinkPosition::Conclusion => conclusion.map(|b| b.id).or(fallback),
            LinkPosition::Body => {
                if body_targets.is_empty() {
                    any_targets.first().copied().or(fallback)
                } else {
                    let id = body_targets[body_cursor % body_targets.len()];
                    body_cursor += 1;
                    Some(id)
                }
            }
            LinkPosition::Any => {
                if any_targets.is_empty() {
                    fallback
                } else {
                    let id = any_targets[any_cursor % any_targets.len()];
                    any_cursor += 1;
                    Some(id)
                }
            }
        };
        if let Some(block_id) = target {
            assignments.push(LinkAssignment {
                block_id,
                link: link.clone(),
            });
        } else {
            warn!(url = %link.url, "no block available for link");
        }
    }
    assignments
}

// ---------------------------------------------------------------------------
// 5. Link insertion
// ---------------------------------------------------------------------------

/// Rewrite one block's markdown to weave in its assigned links, then
/// guarantee every URL is present.
pub async fn insert_links(
    chat: &dyn ChatModel,
    block: &Block,
    links: &[InternalLink],
) -> Result<String, ProviderError> {
    let link_list = links
        .iter()
        .map(|l| format!("- [{}]({})", l.anchor_text(), l.url))
        .collect::<Vec<_>>()
        .join("\n");

    let messages = [
        ChatMessage::system(
            "Rewrite the given markdown so it naturally incorporates every listed \
             link, keeping anchor text and URLs exactly as given. Return the \
             rewritten markdown only.",
        ),
        ChatMessage::user(format!(
            "Links to incorporate:\n{link_list}\n\nMarkdown:\n{content}",
            content = block.content.as_deref().unwrap_or(""),
        )),
    ];

    let rewritten = chat.chat(&messages, 0.4, 4_000).await?;
    Ok(ensure_links(&rewritten, links))
}

/// Force-append any link whose URL is missing from `text` as its own
/// paragraph. Trailing-slash presence is treated as equivalent.
pub fn ensure_links(text: &str, links: &[InternalLink]) -> String {
    let mut out = text.trim_end().to_string();
    for link in links {
        if !url_present(&out, &link.url) {
            out.push_str("\n\n");
            out.push_str(&link.markdown());
        }
    }
    out
}

/// Whether a URL occurs in the text, with or without a trailing slash.
pub fn url_present(text: &str, url: &str) -> bool {
    let bare = url.trim_end_matches('/');
    text.contains(bare) || text.contains(&format!("{bare}/"))
}

/// Extract `[anchor](url)` pairs from markdown.
pub fn extract_markdown_links(text: &str) -> Vec<(String, String)> {
    let mut links = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = text[i..].find("](") {
                let anchor_end = i + close;
                let url_start = anchor_end + 2;
                if let Some(end) = text[url_start..].find(')') {
                    let anchor = text[i + 1..anchor_end].to_string();
                    let url = text[url_start..url_start + end].to_string();
                    links.push((anchor, url));
                    i = url_start + end + 1;
                    continue;
                }
            }
        }
        // Byte-wise scan is safe: '[' never splits a UTF-8 sequence.
        i += 1;
    }
    links
}

// ---------------------------------------------------------------------------
// 6. Quality review
// ---------------------------------------------------------------------------

/// One review finding to address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixTask {
    pub block_id: u32,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestion: String,
}

/// Review the written article and return at least three fix tasks.
pub async fn review_article(
    chat: &dyn ChatModel,
    blocks: &[Block],
) -> Result<Vec<FixTask>, ProviderError> {
    let article = blocks
        .iter()
        .map(|b| format!("[block {}] {}", b.id, b.markdown()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let messages = [
        ChatMessage::system(
            "You are an exacting editor. Identify the weakest blocks and respond \
             with a JSON array of {\"blockId\", \"issues\", \"suggestion\"}. \
             No prose outside the JSON.",
        ),
        ChatMessage::user(article),
    ];

    let content = chat.chat(&messages, 0.3, 4_000).await?;
    let mut tasks: Vec<FixTask> = parse_json(&content)?;

    // A thin review gets padded with synthetic polish passes over randomly
    // chosen content blocks, so the fix stage always has work.
    if tasks.len() < 2 {
        let candidates: Vec<u32> = blocks
            .iter()
            .filter(|b| b.content.as_deref().is_some_and(|c| !c.is_empty()))
            .map(|b| b.id)
            .collect();
        let mut rng = rand::rng();
        while tasks.len() < 3 && !candidates.is_empty() {
            use rand::RngExt;
            let pick: f64 = rng.random();
            let id = candidates[(pick * candidates.len() as f64) as usize
                % candidates.len()];
            tasks.push(FixTask {
                block_id: id,
                issues: vec!["Tighten the prose and improve flow".to_string()],
                suggestion: "Polish wording, trim filler, keep facts intact".to_string(),
            });
        }
    }
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// 7. Block fix
// ---------------------------------------------------------------------------

/// Rewrite a block's content to address review issues, preserving every
/// markdown link the pre-fix content carried.
pub async fn fix_block(
    chat: &dyn ChatModel,
    block: &Block,
    task: &FixTask,
) -> Result<String, ProviderError> {
    let before = block.content.as_deref().unwrap_or("");
    let inventory = extract_markdown_links(before);

    let messages = [
        ChatMessage::system(
            "Rewrite the given markdown to resolve the listed issues. Preserve all \
             links exactly. Return the rewritten markdown only.",
        ),
        ChatMessage::user(format!(
            "Issues:\n{issues}\nSuggestion: {suggestion}\n\nMarkdown:\n{before}",
            issues = task.issues.join("\n"),
            suggestion = task.suggestion,
        )),
    ];

    let mut fixed = chat.chat(&messages, 0.4, 4_000).await?;
    fixed = strip_leading_heading(&fixed);
    for (anchor, url) in inventory {
        if !url_present(&fixed, &url) {
            fixed.push_str(&format!("\n\n[{anchor}]({url})"));
        }
    }
    Ok(fixed)
}

// ---------------------------------------------------------------------------
// 8. SEO metadata
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawSeo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

/// Generate SEO title and description, truncated to 60/160 characters.
/// Falls back to keyword-derived defaults on any failure.
pub async fn seo_metadata(
    chat: &dyn ChatModel,
    main_keyword: &str,
    article: &str,
) -> (String, String) {
    let messages = [
        ChatMessage::system(
            "Write SEO metadata for the given article. Respond with a JSON object \
             {\"title\", \"description\"}: title at most 60 characters, description \
             at most 160. No prose outside the JSON.",
        ),
        ChatMessage::user(format!("Main keyword: {main_keyword}\n\n{article}")),
    ];

    let result: Result<RawSeo, ProviderError> = match chat.chat(&messages, 0.3, 500).await
    {
        Ok(content) => parse_json(&content),
        Err(e) => Err(e),
    };

    match result {
        Ok(seo) if !seo.title.is_empty() => (
            truncate_chars(&seo.title, 60),
            truncate_chars(&seo.description, 160),
        ),
        other => {
            if let Err(e) = other {
                warn!(error = %e, "seo metadata generation failed, using fallback");
            }
            (
                truncate_chars(main_keyword, 60),
                truncate_chars(&format!("Comprehensive guide about {main_keyword}"), 160),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Shared post-processing helpers
// ---------------------------------------------------------------------------

/// Parse the JSON document inside a model response, tolerating markdown
/// fences and surrounding prose.
fn parse_json<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, ProviderError> {
    let json = extract_json(content);
    serde_json::from_str(json)
        .map_err(|e| ProviderError::malformed(PROVIDER, format!("{e}: {json}")))
}

/// Slice the first JSON object or array out of a response.
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    let object = trimmed.find('{').and_then(|start| {
        trimmed.rfind('}').filter(|end| *end > start).map(|end| (start, end))
    });
    let array = trimmed.find('[').and_then(|start| {
        trimmed.rfind(']').filter(|end| *end > start).map(|end| (start, end))
    });
    let span = match (object, array) {
        (Some(o), Some(a)) => {
            if a.0 < o.0 {
                Some(a)
            } else {
                Some(o)
            }
        }
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    };
    match span {
        Some((start, end)) => &trimmed[start..=end],
        None => trimmed,
    }
}

/// Character-boundary-safe truncation.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::llm::TokenUsage;

    /// Replays a queue of canned responses.
    struct Scripted {
        responses: Mutex<VecDeque<String>>,
    }

    impl Scripted {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::malformed(PROVIDER, "script exhausted"))
        }

        fn token_usage(&self, _reset: bool) -> TokenUsage {
            TokenUsage::default()
        }
    }

    fn brief<'a>() -> ArticleBrief<'a> {
        ArticleBrief {
            main_keyword: "best coffee makers 2024",
            article_type: ArticleType::Informational,
            language: "en",
            keywords: &[],
            lsi_keywords: &[],
            style_comment: None,
        }
    }

    fn structure_json(block_count: usize) -> String {
        let mut blocks = vec![
            serde_json::json!({"type": "h1", "heading": "Best Coffee Makers", "instruction": "title"}),
            serde_json::json!({"type": "intro", "heading": "Intro", "instruction": "open"}),
        ];
        for i in 0..block_count.saturating_sub(4) {
            blocks.push(serde_json::json!({
                "type": "h2",
                "heading": format!("Section {i}"),
                "instruction": "write",
                "questions": ["What?", "Why?"]
            }));
        }
        blocks.push(serde_json::json!({"type": "conclusion", "heading": "Wrap", "instruction": "close"}));
        blocks.push(serde_json::json!({"type": "faq", "heading": "FAQ", "instruction": "answer", "questions": ["Q?"]}));
        serde_json::json!({
            "averageWordCount": 1500,
            "commonPatterns": ["listicle"],
            "strengths": ["depth"],
            "weaknesses": ["stale"],
            "recommendedStructure": blocks
        })
        .to_string()
    }

    #[tokio::test]
    async fn structure_analysis_normalizes_blocks() {
        let chat = Scripted::new(&[&structure_json(7)]);
        let outcome = analyze_structure(&chat, &brief(), &[], 1800)
            .await
            .expect("structure");
        assert!(outcome.blocks.len() >= MIN_BLOCKS);
        // Exactly one h1.
        assert_eq!(
            outcome
                .blocks
                .iter()
                .filter(|b| b.block_type == BlockType::H1)
                .count(),
            1
        );
        // Intro heading forced empty, no questions outside h2/h3.
        for block in &outcome.blocks {
            if block.block_type == BlockType::Intro {
                assert!(block.heading.is_empty());
            }
            if !block.block_type.carries_questions() {
                assert!(block.questions.is_none());
            }
        }
        // Ids contiguous from zero.
        for (i, block) in outcome.blocks.iter().enumerate() {
            assert_eq!(block.id, i as u32);
        }
        assert_eq!(outcome.analysis.average_word_count, 1500);
    }

    #[tokio::test]
    async fn structure_analysis_rejects_thin_outline() {
        let chat = Scripted::new(&[&structure_json(4)]);
        let result = analyze_structure(&chat, &brief(), &[], 2000).await;
        assert!(matches!(result, Err(ProviderError::Malformed { .. })));
    }

    #[tokio::test]
    async fn structure_analysis_tolerates_fenced_json() {
        let fenced = format!("```json\n{}\n```", structure_json(6));
        let chat = Scripted::new(&[&fenced]);
        assert!(analyze_structure(&chat, &brief(), &[], 2000).await.is_ok());
    }

    #[tokio::test]
    async fn structure_analysis_inserts_missing_h1() {
        let json = serde_json::json!({
            "recommendedStructure": [
                {"type": "intro", "heading": "x"},
                {"type": "h2", "heading": "a"},
                {"type": "h2", "heading": "b"},
                {"type": "h2", "heading": "c"},
                {"type": "conclusion", "heading": "end"}
            ]
        })
        .to_string();
        let chat = Scripted::new(&[&json]);
        let outcome = analyze_structure(&chat, &brief(), &[], 2000)
            .await
            .expect("structure");
        assert_eq!(outcome.blocks[0].block_type, BlockType::H1);
        assert_eq!(outcome.blocks[0].heading, "best coffee makers 2024");
    }

    #[tokio::test]
    async fn duplicate_h1_is_demoted() {
        let json = serde_json::json!({
            "recommendedStructure": [
                {"type": "h1", "heading": "one"},
                {"type": "h1", "heading": "two"},
                {"type": "intro", "heading": ""},
                {"type": "h2", "heading": "a"},
                {"type": "conclusion", "heading": "end"}
            ]
        })
        .to_string();
        let chat = Scripted::new(&[&json]);
        let outcome = analyze_structure(&chat, &brief(), &[], 2000)
            .await
            .expect("structure");
        let h1s: Vec<_> = outcome
            .blocks
            .iter()
            .filter(|b| b.block_type == BlockType::H1)
            .collect();
        assert_eq!(h1s.len(), 1);
        assert_eq!(h1s[0].heading, "one");
    }

    #[tokio::test]
    async fn enrichment_caps_questions_at_five() {
        let json = serde_json::json!([
            {"type": "h1", "heading": "t"},
            {"type": "intro", "heading": ""},
            {"type": "h2", "heading": "a", "questions": ["1","2","3","4","5","6","7"]},
            {"type": "h2", "heading": "b"},
            {"type": "conclusion", "heading": "end"}
        ])
        .to_string();
        let chat = Scripted::new(&[&json]);
        let blocks = enrich_blocks(&chat, &brief(), &[]).await.expect("enrich");
        let questioned = blocks
            .iter()
            .find(|b| b.heading == "a")
            .expect("block a");
        assert_eq!(questioned.questions.as_ref().unwrap().len(), MAX_QUESTIONS);
    }

    #[tokio::test]
    async fn write_block_strips_leading_heading() {
        let chat = Scripted::new(&["## Accidental Heading\nThe real content."]);
        let block = Block {
            id: 2,
            block_type: BlockType::H2,
            heading: "Section".to_string(),
            instruction: "write".to_string(),
            lsi_keywords: vec![],
            questions: None,
            answered_questions: None,
            content: None,
        };
        let content = write_block(&chat, &brief(), &block, "", 2000)
            .await
            .expect("write");
        assert_eq!(content, "The real content.");
    }

    fn outline() -> Vec<Block> {
        let mk = |id: u32, t: BlockType, heading: &str| Block {
            id,
            block_type: t,
            heading: heading.to_string(),
            instruction: String::new(),
            lsi_keywords: vec![],
            questions: None,
            answered_questions: None,
            content: Some(format!("content of {heading}")),
        };
        vec![
            mk(0, BlockType::H1, "Title"),
            mk(1, BlockType::Intro, ""),
            mk(2, BlockType::H2, "A"),
            mk(3, BlockType::H3, "B"),
            mk(4, BlockType::Conclusion, "End"),
            mk(5, BlockType::Faq, "FAQ"),
        ]
    }

    fn link(url: &str, position: LinkPosition) -> InternalLink {
        InternalLink {
            url: url.to_string(),
            anchor: Some("anchor".to_string()),
            anchorless: false,
            display: Default::default(),
            position,
        }
    }

    #[test]
    fn intro_and_conclusion_links_share_their_block() {
        let links = vec![
            link("https://a.example", LinkPosition::Intro),
            link("https://b.example", LinkPosition::Intro),
            link("https://c.example", LinkPosition::Conclusion),
        ];
        let assignments = assign_links(&links, &outline());
        assert_eq!(assignments[0].block_id, 1);
        assert_eq!(assignments[1].block_id, 1);
        assert_eq!(assignments[2].block_id, 4);
    }

    #[test]
    fn body_links_go_to_distinct_h2_h3_in_order() {
        let links = vec![
            link("https://a.example", LinkPosition::Body),
            link("https://b.example", LinkPosition::Body),
            link("https://c.example", LinkPosition::Body),
        ];
        let assignments = assign_links(&links, &outline());
        assert_eq!(assignments[0].block_id, 2);
        assert_eq!(assignments[1].block_id, 3);
        // Wraps around rather than dropping the third link.
        assert_eq!(assignments[2].block_id, 2);
    }

    #[test]
    fn any_links_avoid_h1_and_faq() {
        let links = vec![
            link("https://a.example", LinkPosition::Any),
            link("https://b.example", LinkPosition::Any),
            link("https://c.example", LinkPosition::Any),
            link("https://d.example", LinkPosition::Any),
        ];
        let assignments = assign_links(&links, &outline());
        for assignment in &assignments {
            assert!(![0u32, 5u32].contains(&assignment.block_id));
        }
        // Distinct, in block order, for the first pass.
        assert_eq!(assignments[0].block_id, 1);
        assert_eq!(assignments[1].block_id, 2);
        assert_eq!(assignments[2].block_id, 3);
        assert_eq!(assignments[3].block_id, 4);
    }

    #[tokio::test]
    async fn insert_links_force_appends_missing_url() {
        // Model ignores the link entirely.
        let chat = Scripted::new(&["rewritten without any link"]);
        let block = &outline()[2];
        let links = vec![link("https://shop.example/coffee", LinkPosition::Body)];
        let result = insert_links(&chat, block, &links).await.expect("insert");
        assert!(result.contains("https://shop.example/coffee"));
        let last_paragraph = result.rsplit("\n\n").next().unwrap();
        assert_eq!(last_paragraph, "[anchor](https://shop.example/coffee)");
    }

    #[test]
    fn url_presence_ignores_trailing_slash() {
        assert!(url_present("see https://a.example/x/ here", "https://a.example/x"));
        assert!(url_present("see https://a.example/x here", "https://a.example/x/"));
        assert!(!url_present("nothing here", "https://a.example/x"));
    }

    #[test]
    fn markdown_links_are_extracted() {
        let links =
            extract_markdown_links("pre [one](https://a.example) mid [two](https://b.example/p)");
        assert_eq!(
            links,
            vec![
                ("one".to_string(), "https://a.example".to_string()),
                ("two".to_string(), "https://b.example/p".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn thin_review_is_padded_to_three_tasks() {
        let chat = Scripted::new(&[r#"[{"blockId": 2, "issues": ["weak"], "suggestion": "fix"}]"#]);
        let tasks = review_article(&chat, &outline()).await.expect("review");
        assert!(tasks.len() >= 3);
        assert_eq!(tasks[0].block_id, 2);
    }

    #[tokio::test]
    async fn adequate_review_is_not_padded() {
        let chat = Scripted::new(&[
            r#"[{"blockId": 2, "issues": ["a"], "suggestion": "s"},
               {"blockId": 3, "issues": ["b"], "suggestion": "t"}]"#,
        ]);
        let tasks = review_article(&chat, &outline()).await.expect("review");
        assert_eq!(tasks.len(), 2);
    }

    #[tokio::test]
    async fn fix_block_restores_dropped_links() {
        let chat = Scripted::new(&["cleaner text without the link"]);
        let mut block = outline()[2].clone();
        block.content = Some("text with [shop](https://shop.example/coffee) inline".to_string());
        let task = FixTask {
            block_id: 2,
            issues: vec!["verbose".to_string()],
            suggestion: "trim".to_string(),
        };
        let fixed = fix_block(&chat, &block, &task).await.expect("fix");
        assert!(fixed.ends_with("[shop](https://shop.example/coffee)"));
    }

    #[tokio::test]
    async fn seo_metadata_truncates() {
        let long_title = "T".repeat(80);
        let long_description = "D".repeat(200);
        let response = serde_json::json!({
            "title": long_title,
            "description": long_description
        })
        .to_string();
        let chat = Scripted::new(&[&response]);
        let (title, description) = seo_metadata(&chat, "kw", "article").await;
        assert_eq!(title.chars().count(), 60);
        assert_eq!(description.chars().count(), 160);
    }

    #[tokio::test]
    async fn seo_metadata_falls_back_on_failure() {
        let chat = Scripted::new(&[]); // script exhausted: chat errors
        let (title, description) = seo_metadata(&chat, "best coffee makers 2024", "a").await;
        assert_eq!(title, "best coffee makers 2024");
        assert_eq!(description, "Comprehensive guide about best coffee makers 2024");
    }

    #[test]
    fn extract_json_prefers_earliest_document() {
        assert_eq!(extract_json("noise {\"a\": 1} trailing"), "{\"a\": 1}");
        assert_eq!(extract_json("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(extract_json("plain"), "plain");
    }

    #[test]
    fn strip_leading_heading_cases() {
        assert_eq!(strip_leading_heading("# H\nbody"), "body");
        assert_eq!(strip_leading_heading("body only"), "body only");
        assert_eq!(strip_leading_heading("### H"), "");
    }
}
