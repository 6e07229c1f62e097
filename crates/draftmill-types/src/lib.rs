//! # Types
//!
//! Core domain types for draftmill: the job record and its artifacts, the
//! status state machine, principals and projects, and the event payloads
//! carried by the bus.
//!
//! ## Serialization
//!
//! Record types serialize with camelCase field names (the wire format the
//! HTTP surface and the session gateway speak); enums serialize as the
//! lowercase tag strings clients send and receive (`paused_after_serp`,
//! `list-start`, ...).
//!
//! ## Stability
//!
//! These types are persisted; additions must keep old stored documents
//! deserializable (`#[serde(default)]` on new fields).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of SERP entries a job accumulates.
pub const MAX_SERP_ENTRIES: usize = 10;
/// Maximum project name length in characters.
pub const MAX_PROJECT_NAME: usize = 100;
/// Maximum project description length in characters.
pub const MAX_PROJECT_DESCRIPTION: usize = 500;
/// Maximum SEO title length in characters.
pub const MAX_SEO_TITLE: usize = 60;
/// Maximum SEO description length in characters.
pub const MAX_SEO_DESCRIPTION: usize = 160;

/// The article-type tag a job is created with.
///
/// Closed set; the structure-analysis prompt keys off it but no pipeline
/// control flow does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleType {
    Informational,
    Commercial,
    Transactional,
    Navigational,
    Review,
    Comparison,
    Howto,
    Listicle,
}

/// Severity tag on a job log entry.
///
/// `Thinking` carries model reasoning streamed to subscribers; it is data,
/// not process logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Thinking,
}

/// Structural role of one article block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    H1,
    Intro,
    H2,
    H3,
    Conclusion,
    Faq,
}

impl BlockType {
    /// Whether blocks of this type may carry research questions.
    ///
    /// `intro`, `h1`, `faq` and `conclusion` blocks never do; questions are
    /// stripped from them during structure analysis.
    pub fn carries_questions(&self) -> bool {
        matches!(self, BlockType::H2 | BlockType::H3)
    }
}

/// How an internal link is rendered inside its target block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkDisplay {
    #[default]
    Inline,
    ListStart,
    ListEnd,
    Sidebar,
}

/// Which part of the article an internal link targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPosition {
    Intro,
    #[default]
    Body,
    Conclusion,
    Any,
}

/// The job status state machine.
///
/// Initial: `queued`. Active states are entered in stage order; pause
/// points sit at stage boundaries and wait for an explicit continue;
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    ParsingSerp,
    AnalyzingStructure,
    EnrichingBlocks,
    AnsweringQuestions,
    WritingArticle,
    InsertingLinks,
    ReviewingArticle,
    PausedAfterSerp,
    PausedAfterStructure,
    PausedAfterBlocks,
    PausedAfterAnswers,
    PausedAfterWriting,
    PausedAfterReview,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this status is a stage-boundary pause point.
    pub fn is_pause_point(&self) -> bool {
        matches!(
            self,
            JobStatus::PausedAfterSerp
                | JobStatus::PausedAfterStructure
                | JobStatus::PausedAfterBlocks
                | JobStatus::PausedAfterAnswers
                | JobStatus::PausedAfterWriting
                | JobStatus::PausedAfterReview
        )
    }

    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The wire string for this status (same as the serde tag).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::ParsingSerp => "parsing_serp",
            JobStatus::AnalyzingStructure => "analyzing_structure",
            JobStatus::EnrichingBlocks => "enriching_blocks",
            JobStatus::AnsweringQuestions => "answering_questions",
            JobStatus::WritingArticle => "writing_article",
            JobStatus::InsertingLinks => "inserting_links",
            JobStatus::ReviewingArticle => "reviewing_article",
            JobStatus::PausedAfterSerp => "paused_after_serp",
            JobStatus::PausedAfterStructure => "paused_after_structure",
            JobStatus::PausedAfterBlocks => "paused_after_blocks",
            JobStatus::PausedAfterAnswers => "paused_after_answers",
            JobStatus::PausedAfterWriting => "paused_after_writing",
            JobStatus::PausedAfterReview => "paused_after_review",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse a wire status string.
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a job's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Free-form structured payload attached by the producing stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<serde_json::Value>,
}

impl JobLogEntry {
    /// Convenience constructor stamping the current instant.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            additional_data: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// One scraped competitor page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerpEntry {
    pub url: String,
    pub title: String,
    /// 1-based rank in the search results.
    pub position: u32,
    /// Heading outline in document order, each as `"hN: text"`.
    #[serde(default)]
    pub headings: Vec<String>,
    /// Cleaned body text.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub word_count: u32,
    /// Scrape failure, if any. A failed entry still counts toward the ten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate competitor analysis produced by stage 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureAnalysis {
    pub average_word_count: u32,
    #[serde(default)]
    pub common_patterns: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// A question answered from the vector store during stage 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsweredQuestion {
    pub question: String,
    pub answer: String,
    pub source: String,
    pub similarity: f32,
}

/// One structural unit of the article.
///
/// Block ids are unique within a job and renumbered contiguously from 0 by
/// the enrichment stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: u32,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub heading: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub lsi_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_questions: Option<Vec<AnsweredQuestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Block {
    /// Render this block back to markdown: heading line per type, then the
    /// written content. The intro block renders content only.
    pub fn markdown(&self) -> String {
        let content = self.content.as_deref().unwrap_or("");
        let heading = match self.block_type {
            BlockType::H1 => format!("# {}", self.heading),
            BlockType::Intro => String::new(),
            BlockType::H2 | BlockType::Conclusion | BlockType::Faq => {
                format!("## {}", self.heading)
            }
            BlockType::H3 => format!("### {}", self.heading),
        };
        match (heading.is_empty(), content.is_empty()) {
            (true, _) => content.to_string(),
            (false, true) => heading,
            (false, false) => format!("{heading}\n\n{content}"),
        }
    }
}

/// Reassemble the article text from rendered blocks, in block order.
/// Blocks without content contribute their heading only.
pub fn assemble_article(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::markdown)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// An internal-link descriptor attached to a job at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalLink {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// When set, the URL itself is used as the rendered anchor.
    #[serde(default)]
    pub anchorless: bool,
    #[serde(default, rename = "displayType")]
    pub display: LinkDisplay,
    #[serde(default)]
    pub position: LinkPosition,
}

impl InternalLink {
    /// The anchor text this link renders with.
    pub fn anchor_text(&self) -> &str {
        if self.anchorless {
            return &self.url;
        }
        self.anchor.as_deref().unwrap_or(&self.url)
    }

    /// Markdown rendering used when a link must be force-appended.
    pub fn markdown(&self) -> String {
        format!("[{}]({})", self.anchor_text(), self.url)
    }
}

/// Immutable job configuration, fixed at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub main_keyword: String,
    pub article_type: ArticleType,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub language: String,
    pub region: String,
    #[serde(default)]
    pub lsi_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_comment: Option<String>,
    /// Suppresses every pause point, collapsing the pipeline into one
    /// worker invocation.
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub internal_links: Vec<InternalLink>,
}

/// The central entity: one article-generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub owner_id: Uuid,
    #[serde(flatten)]
    pub config: JobConfig,
    pub status: JobStatus,
    /// 0–100; non-decreasing within one run, frozen on failure.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub log: Vec<JobLogEntry>,
    #[serde(default)]
    pub serp_entries: Vec<SerpEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_analysis: Option<StructureAnalysis>,
    #[serde(default, rename = "articleBlocks")]
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_description: Option<String>,
    /// Terminal error string, set on the `failed` transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a freshly queued job.
    pub fn new(project_id: Uuid, owner_id: Uuid, config: JobConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            owner_id,
            config,
            status: JobStatus::Queued,
            progress: 0,
            current_step: None,
            log: Vec::new(),
            serp_entries: Vec::new(),
            structure_analysis: None,
            blocks: Vec::new(),
            article: None,
            seo_title: None,
            seo_description: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// The three external provider credential kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Openrouter,
    Supabase,
    Firecrawl,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Openrouter => "openrouter",
            CredentialKind::Supabase => "supabase",
            CredentialKind::Firecrawl => "firecrawl",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openrouter" => Some(CredentialKind::Openrouter),
            "supabase" => Some(CredentialKind::Supabase),
            "firecrawl" => Some(CredentialKind::Firecrawl),
            _ => None,
        }
    }

    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::Openrouter,
        CredentialKind::Supabase,
        CredentialKind::Firecrawl,
    ];
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored provider credential: the encrypted envelope plus validation
/// bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl CredentialSlot {
    pub fn is_set(&self) -> bool {
        self.ciphertext.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// The three credential slots of a principal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    #[serde(default)]
    pub openrouter: CredentialSlot,
    #[serde(default)]
    pub supabase: CredentialSlot,
    #[serde(default)]
    pub firecrawl: CredentialSlot,
}

impl CredentialSet {
    pub fn get(&self, kind: CredentialKind) -> &CredentialSlot {
        match kind {
            CredentialKind::Openrouter => &self.openrouter,
            CredentialKind::Supabase => &self.supabase,
            CredentialKind::Firecrawl => &self.firecrawl,
        }
    }

    pub fn get_mut(&mut self, kind: CredentialKind) -> &mut CredentialSlot {
        match kind {
            CredentialKind::Openrouter => &mut self.openrouter,
            CredentialKind::Supabase => &mut self.supabase,
            CredentialKind::Firecrawl => &mut self.firecrawl,
        }
    }
}

/// An authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    /// bcrypt verifier for the interactive password. Never serialized to
    /// clients; the API layer projects principals before returning them.
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_hash: Option<String>,
    #[serde(default)]
    pub credentials: CredentialSet,
    pub created_at: DateTime<Utc>,
}

/// A project grouping jobs under one owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-(client IP, principal) PIN attempt counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinAttempt {
    pub ip: String,
    pub principal_id: Uuid,
    pub attempts: u32,
    pub blocked: bool,
    pub last_attempt: DateTime<Utc>,
}

/// Queue-side lifecycle of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Waiting => "waiting",
            QueueState::Active => "active",
            QueueState::Completed => "completed",
            QueueState::Failed => "failed",
        }
    }
}

/// Snapshot of queue depth, served by `/api/generations/queue/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A claimed unit of queue work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    /// Pause point to resume from; `None` starts from stage 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_from: Option<JobStatus>,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

// ---------------------------------------------------------------------------
// Bus events
// ---------------------------------------------------------------------------

/// The single pub/sub channel every process publishes to.
pub const EVENT_CHANNEL: &str = "socket:events";

/// Event names as delivered to client sessions.
pub const EVENT_LOG: &str = "generation:log";
pub const EVENT_STATUS: &str = "generation:status";
pub const EVENT_BLOCKS: &str = "generation:blocks";
pub const EVENT_COMPLETED: &str = "generation:completed";
pub const EVENT_ERROR: &str = "generation:error";

/// Room label for one job's subscribers.
pub fn generation_room(id: Uuid) -> String {
    format!("generation:{id}")
}

/// Envelope carried on the pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub room: String,
    pub event: String,
    pub data: serde_json::Value,
}

/// Payload of [`EVENT_LOG`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub generation_id: Uuid,
    pub log: JobLogEntry,
}

/// Payload of [`EVENT_STATUS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub generation_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
}

/// Payload of [`EVENT_BLOCKS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocksEvent {
    pub generation_id: Uuid,
    pub blocks: Vec<Block>,
}

/// Payload of [`EVENT_COMPLETED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedEvent {
    pub generation_id: Uuid,
    pub article: String,
}

/// Payload of [`EVENT_ERROR`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub generation_id: Uuid,
    pub error: String,
}
