//! The seven-stage runner.

use std::collections::BTreeMap;

use chrono::Utc;
use draftmill_providers::ops::{self, ArticleBrief, DEFAULT_AVERAGE_WORDS};
use draftmill_providers::{fetch_serp, find_answer};
use draftmill_types::{
    BlocksEvent, CompletedEvent, ErrorEvent, EVENT_BLOCKS, EVENT_COMPLETED, EVENT_ERROR,
    EVENT_LOG, EVENT_STATUS, Job, JobConfig, JobLogEntry, JobStatus, LogEvent, LogLevel,
    SerpEntry, StatusEvent, assemble_article, generation_room,
};
use tracing::warn;
use uuid::Uuid;

use crate::{BLOCK_WRITE_DELAY, PipelineError, QUESTION_DELAY, StageContext};

/// Stage labels used in job log messages.
const STAGE_LABELS: [&str; 7] = [
    "SERP parsing",
    "Structure analysis",
    "Block enrichment",
    "Question answering",
    "Article writing",
    "Link insertion",
    "Article review",
];

/// Pause status persisted after each stage (stage 6 never pauses).
const PAUSE_STATES: [Option<JobStatus>; 7] = [
    Some(JobStatus::PausedAfterSerp),
    Some(JobStatus::PausedAfterStructure),
    Some(JobStatus::PausedAfterBlocks),
    Some(JobStatus::PausedAfterAnswers),
    Some(JobStatus::PausedAfterWriting),
    None,
    Some(JobStatus::PausedAfterReview),
];

/// First stage index to run when resuming from a pause state.
fn start_index(continue_from: Option<JobStatus>) -> usize {
    match continue_from {
        Some(JobStatus::PausedAfterSerp) => 1,
        Some(JobStatus::PausedAfterStructure) => 2,
        Some(JobStatus::PausedAfterBlocks) => 3,
        Some(JobStatus::PausedAfterAnswers) => 4,
        Some(JobStatus::PausedAfterWriting) => 5,
        Some(JobStatus::PausedAfterReview) => 7,
        _ => 0,
    }
}

/// How one runner invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job reached a pause point and released its worker slot.
    Paused(JobStatus),
    /// The job reached `completed`.
    Completed,
}

/// Drives a job through the pipeline. One instance per worker invocation.
pub struct StageRunner {
    ctx: StageContext,
}

/// Serialize an event payload; these types cannot fail to serialize, and
/// a publish payload is best-effort anyway.
fn payload<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

impl StageRunner {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Run the pipeline from the stage the skip table selects.
    ///
    /// Returns the pause state when the job voluntarily suspends, or
    /// `Completed`. Errors have already been persisted as the `failed`
    /// transition when this returns `Err` (the queue layer decides retry).
    pub async fn run(
        &self,
        job_id: Uuid,
        continue_from: Option<JobStatus>,
    ) -> Result<RunOutcome, PipelineError> {
        let mut job = self.ctx.store.fetch_job(job_id).await?;
        let start = start_index(continue_from);

        if start == 0 {
            let now = Utc::now();
            self.ctx.store.set_started(job.id, now).await?;
            job.started_at = Some(now);
            self.set_status(&mut job, JobStatus::Processing, 5, Some("Starting"))
                .await?;
            let message = format!("Generation started for \"{}\"", job.config.main_keyword);
            self.log(&mut job, LogLevel::Info, message).await?;
        }

        for index in start..7 {
            let result = match index {
                0 => self.stage_serp(&mut job).await,
                1 => self.stage_structure(&mut job).await,
                2 => self.stage_enrich(&mut job).await,
                3 => self.stage_answers(&mut job).await,
                4 => self.stage_write(&mut job).await,
                5 => self.stage_links(&mut job).await,
                6 => self.stage_review(&mut job).await,
                _ => unreachable!("stage index out of range"),
            };

            match result {
                Ok(()) => {}
                // Link insertion degrades, never kills the job.
                Err(e) if index == 5 => {
                    self.log(
                        &mut job,
                        LogLevel::Warn,
                        format!("{} failed: {e}; keeping partial article", STAGE_LABELS[5]),
                    )
                    .await?;
                }
                Err(e) => return Err(self.fail(&mut job, index, e).await),
            }

            if !job.config.continuous
                && let Some(pause) = PAUSE_STATES[index]
            {
                let progress = job.progress;
                self.set_status(&mut job, pause, progress, None).await?;
                self.log(
                    &mut job,
                    LogLevel::Info,
                    format!(
                        "Paused after {}; waiting for continue",
                        STAGE_LABELS[index].to_lowercase()
                    ),
                )
                .await?;
                return Ok(RunOutcome::Paused(pause));
            }
        }

        self.complete(&mut job).await
    }

    // -----------------------------------------------------------------
    // Stage 1: SERP ingestion
    // -----------------------------------------------------------------

    async fn stage_serp(&self, job: &mut Job) -> Result<(), PipelineError> {
        let search = self.ctx.search()?.clone();
        self.set_status(
            job,
            JobStatus::ParsingSerp,
            10,
            Some("Parsing search results"),
        )
        .await?;
        self.log(
            job,
            LogLevel::Info,
            format!(
                "Fetching search results for \"{}\" ({}-{})",
                job.config.main_keyword, job.config.region, job.config.language
            ),
        )
        .await?;

        let store = self.ctx.store.clone();
        let bus = self.ctx.bus.clone();
        let job_id = job.id;
        let room = generation_room(job_id);

        let entries = fetch_serp(
            search.as_ref(),
            &job.config.main_keyword,
            &job.config.region,
            &job.config.language,
            |entry: SerpEntry, index: usize| {
                let store = store.clone();
                let bus = bus.clone();
                let room = room.clone();
                async move {
                    if let Err(e) = store.push_serp_entry(job_id, &entry).await {
                        warn!(error = %e, "failed to persist SERP entry");
                        return;
                    }
                    // 10 → 50, linear over up to ten entries.
                    let progress = 10 + (4 * (index as u8 + 1)).min(40);
                    if let Err(e) = store
                        .set_status(
                            job_id,
                            JobStatus::ParsingSerp,
                            progress,
                            Some("Parsing search results"),
                        )
                        .await
                    {
                        warn!(error = %e, "failed to persist SERP progress");
                        return;
                    }
                    bus.publish(
                        &room,
                        EVENT_STATUS,
                        payload(&StatusEvent {
                            generation_id: job_id,
                            status: JobStatus::ParsingSerp,
                            progress,
                        }),
                    )
                    .await;
                }
            },
        )
        .await?;

        job.serp_entries = entries;
        let average = average_word_count(&job.serp_entries);
        self.set_status(
            job,
            JobStatus::ParsingSerp,
            50,
            Some("Parsing search results"),
        )
        .await?;
        self.log(
            job,
            LogLevel::Info,
            format!(
                "Parsed {} competitor pages (average {} words)",
                job.serp_entries.len(),
                average
            ),
        )
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stage 2: structure analysis
    // -----------------------------------------------------------------

    async fn stage_structure(&self, job: &mut Job) -> Result<(), PipelineError> {
        let chat = self.ctx.chat()?.clone();
        self.set_status(
            job,
            JobStatus::AnalyzingStructure,
            55,
            Some("Analyzing competitor structure"),
        )
        .await?;
        self.log(
            job,
            LogLevel::Info,
            format!(
                "Analyzing structure across {} competitor pages",
                job.serp_entries.iter().filter(|e| e.error.is_none()).count()
            ),
        )
        .await?;

        let config = job.config.clone();
        let brief = brief_of(&config);
        let average = average_word_count(&job.serp_entries);
        let outcome =
            ops::analyze_structure(chat.as_ref(), &brief, &job.serp_entries, average)
                .await?;

        self.ctx
            .store
            .set_structure_analysis(job.id, &outcome.analysis)
            .await?;
        job.structure_analysis = Some(outcome.analysis);
        job.blocks = outcome.blocks;
        self.persist_blocks(job).await?;
        self.set_status(job, JobStatus::AnalyzingStructure, 65, None).await?;
        self.log(
            job,
            LogLevel::Info,
            format!("Recommended structure has {} blocks", job.blocks.len()),
        )
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stage 3: block enrichment
    // -----------------------------------------------------------------

    async fn stage_enrich(&self, job: &mut Job) -> Result<(), PipelineError> {
        let chat = self.ctx.chat()?.clone();
        self.set_status(
            job,
            JobStatus::EnrichingBlocks,
            75,
            Some("Enriching block briefs"),
        )
        .await?;

        let config = job.config.clone();
        let brief = brief_of(&config);
        let enriched = ops::enrich_blocks(chat.as_ref(), &brief, &job.blocks).await?;
        job.blocks = enriched;
        self.persist_blocks(job).await?;
        self.set_status(job, JobStatus::EnrichingBlocks, 85, None).await?;

        let question_count: usize = job
            .blocks
            .iter()
            .filter_map(|b| b.questions.as_ref().map(Vec::len))
            .sum();
        self.log(
            job,
            LogLevel::Info,
            format!("Block briefs enriched; {question_count} research questions queued"),
        )
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stage 4: question answering
    // -----------------------------------------------------------------

    async fn stage_answers(&self, job: &mut Job) -> Result<(), PipelineError> {
        let vector = self.ctx.vector()?.clone();
        self.set_status(
            job,
            JobStatus::AnsweringQuestions,
            90,
            Some("Answering research questions"),
        )
        .await?;

        for index in 0..job.blocks.len() {
            let questions = job.blocks[index].questions.clone().unwrap_or_default();
            if questions.is_empty() {
                continue;
            }

            let mut answered = Vec::new();
            for (qi, question) in questions.iter().enumerate() {
                if qi > 0 {
                    tokio::time::sleep(QUESTION_DELAY).await;
                }
                if let Some(answer) = find_answer(vector.as_ref(), question).await? {
                    answered.push(answer);
                }
            }

            let heading = job.blocks[index].heading.clone();
            let asked = questions.len();
            let found = answered.len();
            {
                let block = &mut job.blocks[index];
                if answered.is_empty() {
                    block.questions = None;
                    block.answered_questions = None;
                } else {
                    block.questions =
                        Some(answered.iter().map(|a| a.question.clone()).collect());
                    block.answered_questions = Some(answered);
                }
            }
            self.persist_blocks(job).await?;
            self.log(
                job,
                LogLevel::Info,
                format!("Answered {found} of {asked} questions for \"{heading}\""),
            )
            .await?;
        }

        self.set_status(job, JobStatus::AnsweringQuestions, 95, None).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stage 5: article writing
    // -----------------------------------------------------------------

    async fn stage_write(&self, job: &mut Job) -> Result<(), PipelineError> {
        let chat = self.ctx.chat()?.clone();
        self.set_status(job, JobStatus::WritingArticle, 97, Some("Writing article"))
            .await?;

        let config = job.config.clone();
        let brief = brief_of(&config);
        let target_words = job
            .structure_analysis
            .as_ref()
            .map(|a| a.average_word_count)
            .filter(|w| *w > 0)
            .unwrap_or(DEFAULT_AVERAGE_WORDS);

        let mut buffer = String::new();
        for index in 0..job.blocks.len() {
            if index > 0 {
                tokio::time::sleep(BLOCK_WRITE_DELAY).await;
            }
            let block = job.blocks[index].clone();
            let content =
                ops::write_block(chat.as_ref(), &brief, &block, &buffer, target_words)
                    .await?;
            job.blocks[index].content = Some(content);

            let markdown = job.blocks[index].markdown();
            if !buffer.is_empty() {
                buffer.push_str("\n\n");
            }
            buffer.push_str(&markdown);
            self.persist_blocks(job).await?;
        }

        self.ctx.store.set_article(job.id, &buffer).await?;
        let words = buffer.split_whitespace().count();
        job.article = Some(buffer);
        self.set_status(job, JobStatus::WritingArticle, 99, None).await?;
        self.log(
            job,
            LogLevel::Info,
            format!("Article draft complete ({words} words)"),
        )
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stage 6: link insertion (optional, never pauses, never fatal)
    // -----------------------------------------------------------------

    async fn stage_links(&self, job: &mut Job) -> Result<(), PipelineError> {
        if job.config.internal_links.is_empty() {
            return Ok(());
        }
        let chat = self.ctx.chat()?.clone();
        self.log(
            job,
            LogLevel::Info,
            format!("Inserting {} internal links", job.config.internal_links.len()),
        )
        .await?;

        let assignments = ops::assign_links(&job.config.internal_links, &job.blocks);
        let mut by_block: BTreeMap<u32, Vec<draftmill_types::InternalLink>> =
            BTreeMap::new();
        for assignment in assignments {
            by_block
                .entry(assignment.block_id)
                .or_default()
                .push(assignment.link);
        }

        for (block_id, links) in by_block {
            let Some(position) = job.blocks.iter().position(|b| b.id == block_id) else {
                continue;
            };
            let block = job.blocks[position].clone();
            let content = ops::insert_links(chat.as_ref(), &block, &links).await?;
            job.blocks[position].content = Some(content);
        }

        let article = assemble_article(&job.blocks);
        self.ctx.store.set_article(job.id, &article).await?;
        job.article = Some(article);
        self.persist_blocks(job).await?;
        self.log(job, LogLevel::Info, "Internal links inserted".to_string())
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stage 7: review & SEO
    // -----------------------------------------------------------------

    async fn stage_review(&self, job: &mut Job) -> Result<(), PipelineError> {
        let chat = self.ctx.chat()?.clone();
        self.set_status(
            job,
            JobStatus::ReviewingArticle,
            99,
            Some("Reviewing article"),
        )
        .await?;

        let tasks = ops::review_article(chat.as_ref(), &job.blocks).await?;
        self.log(
            job,
            LogLevel::Info,
            format!("Review produced {} fix tasks", tasks.len()),
        )
        .await?;

        for task in tasks {
            let Some(position) = job.blocks.iter().position(|b| b.id == task.block_id)
            else {
                continue;
            };
            if job.blocks[position].content.is_none() {
                continue;
            }
            let block = job.blocks[position].clone();
            let fixed = ops::fix_block(chat.as_ref(), &block, &task).await?;
            job.blocks[position].content = Some(fixed);
            self.persist_blocks(job).await?;
        }

        let article = assemble_article(&job.blocks);
        self.ctx.store.set_article(job.id, &article).await?;

        let (title, description) =
            ops::seo_metadata(chat.as_ref(), &job.config.main_keyword, &article).await;
        self.ctx.store.set_seo(job.id, &title, &description).await?;
        job.article = Some(article);
        job.seo_title = Some(title);
        job.seo_description = Some(description);
        self.log(job, LogLevel::Info, "SEO metadata generated".to_string())
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------

    async fn complete(&self, job: &mut Job) -> Result<RunOutcome, PipelineError> {
        let now = Utc::now();
        self.ctx.store.set_completed(job.id, now).await?;
        job.completed_at = Some(now);
        self.set_status(job, JobStatus::Completed, 100, Some("Completed")).await?;

        let mut entry = JobLogEntry::new(LogLevel::Info, "Generation completed");
        if let Some(chat) = &self.ctx.chat {
            entry = entry.with_data(payload(&chat.token_usage(false)));
        }
        self.ctx.store.append_log(job.id, &entry).await?;
        job.log.push(entry.clone());
        self.ctx
            .bus
            .publish(
                &generation_room(job.id),
                EVENT_LOG,
                payload(&LogEvent {
                    generation_id: job.id,
                    log: entry,
                }),
            )
            .await;

        self.ctx
            .bus
            .publish(
                &generation_room(job.id),
                EVENT_COMPLETED,
                payload(&CompletedEvent {
                    generation_id: job.id,
                    article: job.article.clone().unwrap_or_default(),
                }),
            )
            .await;
        Ok(RunOutcome::Completed)
    }

    /// Persist the failed transition and hand the error back to the queue.
    async fn fail(
        &self,
        job: &mut Job,
        stage_index: usize,
        error: PipelineError,
    ) -> PipelineError {
        let message = format!("{} failed: {error}", STAGE_LABELS[stage_index]);
        if let Err(e) = self
            .log(job, LogLevel::Error, message.clone())
            .await
        {
            warn!(error = %e, "failed to append failure log entry");
        }
        if let Err(e) = self.ctx.store.set_error(job.id, &message).await {
            warn!(error = %e, "failed to persist job error");
        }
        let progress = job.progress; // frozen on failure
        if let Err(e) = self
            .set_status(job, JobStatus::Failed, progress, None)
            .await
        {
            warn!(error = %e, "failed to persist failed status");
        }
        self.ctx
            .bus
            .publish(
                &generation_room(job.id),
                EVENT_ERROR,
                payload(&ErrorEvent {
                    generation_id: job.id,
                    error: message,
                }),
            )
            .await;
        error
    }

    // -----------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------

    async fn log(
        &self,
        job: &mut Job,
        level: LogLevel,
        message: String,
    ) -> Result<(), PipelineError> {
        let entry = JobLogEntry::new(level, message);
        self.ctx.store.append_log(job.id, &entry).await?;
        job.log.push(entry.clone());
        self.ctx
            .bus
            .publish(
                &generation_room(job.id),
                EVENT_LOG,
                payload(&LogEvent {
                    generation_id: job.id,
                    log: entry,
                }),
            )
            .await;
        Ok(())
    }

    async fn set_status(
        &self,
        job: &mut Job,
        status: JobStatus,
        progress: u8,
        current_step: Option<&str>,
    ) -> Result<(), PipelineError> {
        // Progress never regresses within a run.
        let progress = progress.max(job.progress).min(100);
        self.ctx
            .store
            .set_status(job.id, status, progress, current_step)
            .await?;
        job.status = status;
        job.progress = progress;
        job.current_step = current_step.map(String::from);
        self.ctx
            .bus
            .publish(
                &generation_room(job.id),
                EVENT_STATUS,
                payload(&StatusEvent {
                    generation_id: job.id,
                    status,
                    progress,
                }),
            )
            .await;
        Ok(())
    }

    async fn persist_blocks(&self, job: &mut Job) -> Result<(), PipelineError> {
        self.ctx.store.set_blocks(job.id, &job.blocks).await?;
        self.ctx
            .bus
            .publish(
                &generation_room(job.id),
                EVENT_BLOCKS,
                payload(&BlocksEvent {
                    generation_id: job.id,
                    blocks: job.blocks.clone(),
                }),
            )
            .await;
        Ok(())
    }
}

fn brief_of(config: &JobConfig) -> ArticleBrief<'_> {
    ArticleBrief {
        main_keyword: &config.main_keyword,
        article_type: config.article_type,
        language: &config.language,
        keywords: &config.keywords,
        lsi_keywords: &config.lsi_keywords,
        style_comment: config.style_comment.as_deref(),
    }
}

/// Average word count across successfully scraped entries, defaulting to
/// [`DEFAULT_AVERAGE_WORDS`] when nothing usable was produced.
fn average_word_count(entries: &[SerpEntry]) -> u32 {
    let counts: Vec<u32> = entries
        .iter()
        .filter(|e| e.error.is_none() && e.word_count > 0)
        .map(|e| e.word_count)
        .collect();
    if counts.is_empty() {
        return DEFAULT_AVERAGE_WORDS;
    }
    counts.iter().sum::<u32>() / counts.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_table_matches_pause_states() {
        assert_eq!(start_index(None), 0);
        assert_eq!(start_index(Some(JobStatus::PausedAfterSerp)), 1);
        assert_eq!(start_index(Some(JobStatus::PausedAfterStructure)), 2);
        assert_eq!(start_index(Some(JobStatus::PausedAfterBlocks)), 3);
        assert_eq!(start_index(Some(JobStatus::PausedAfterAnswers)), 4);
        assert_eq!(start_index(Some(JobStatus::PausedAfterWriting)), 5);
        assert_eq!(start_index(Some(JobStatus::PausedAfterReview)), 7);
        // Non-pause states restart from the beginning.
        assert_eq!(start_index(Some(JobStatus::Failed)), 0);
    }

    #[test]
    fn average_word_count_skips_failed_entries() {
        let entry = |count: u32, error: Option<&str>| SerpEntry {
            url: "https://example.com".to_string(),
            title: String::new(),
            position: 1,
            headings: vec![],
            content: String::new(),
            word_count: count,
            error: error.map(String::from),
        };
        assert_eq!(average_word_count(&[]), DEFAULT_AVERAGE_WORDS);
        assert_eq!(
            average_word_count(&[entry(1000, None), entry(2000, None)]),
            1500
        );
        assert_eq!(
            average_word_count(&[entry(1000, None), entry(9000, Some("boom"))]),
            1000
        );
        assert_eq!(
            average_word_count(&[entry(0, None)]),
            DEFAULT_AVERAGE_WORDS
        );
    }
}
