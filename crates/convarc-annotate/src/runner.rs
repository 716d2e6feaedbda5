use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;
use crate::data::{self, ContentPartData, MessageTextData};
use crate::result::{AnnotationResult, AnnotationValue, AnnotatorSpec};
use crate::traits::{
    ContentPartAnnotator, DialogueAnnotator, ExchangeAnnotator, ExchangePlatformAnnotator,
    MessageAnnotator, PromptResponseAnnotator,
};
use convarc_store::{AnnotationReader, AnnotationWriter, CursorManager, Store, WriteContext};
use convarc_types::EntityType;

/// Statistics for one annotator run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub entities_processed: i64,
    pub entities_skipped: i64,
    pub annotations_created: i64,
    pub failed: bool,
}

impl RunStats {
    /// The batch-driver view: annotation count, or -1 on failure
    pub fn as_count(&self) -> i64 {
        if self.failed {
            -1
        } else {
            self.annotations_created
        }
    }
}

/// Cursor-driven annotator execution.
///
/// For each annotator: look up (or create at epoch) its cursor, iterate
/// entities ordered by sort timestamp strictly after the high-water mark,
/// check prerequisites, call `annotate`, persist results, then fold the
/// run's statistics and wall-clock runtime back into the cursor. A storage
/// failure stops the run without advancing the mark past the failing
/// entity.
pub struct AnnotatorRunner<'a> {
    store: &'a Store,
}

impl<'a> AnnotatorRunner<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn run_message(&self, annotator: &dyn MessageAnnotator) -> Result<RunStats> {
        let spec = annotator.spec().clone();
        self.run_with(
            &spec,
            EntityType::Message,
            |mark| {
                let items = data::load_messages_after(self.store, mark)?;
                Ok(filter_message_roles(items, &spec))
            },
            |data| annotator.annotate(data),
        )
    }

    pub fn run_exchange(&self, annotator: &dyn ExchangeAnnotator) -> Result<RunStats> {
        let spec = annotator.spec().clone();
        self.run_with(
            &spec,
            EntityType::Exchange,
            |mark| data::load_exchanges_after(self.store, mark),
            |data| annotator.annotate(data),
        )
    }

    pub fn run_exchange_platform(
        &self,
        annotator: &dyn ExchangePlatformAnnotator,
    ) -> Result<RunStats> {
        let spec = annotator.spec().clone();
        self.run_with(
            &spec,
            EntityType::Exchange,
            |mark| data::load_platform_exchanges_after(self.store, mark),
            |data| annotator.annotate(data),
        )
    }

    pub fn run_dialogue(&self, annotator: &dyn DialogueAnnotator) -> Result<RunStats> {
        let spec = annotator.spec().clone();
        self.run_with(
            &spec,
            EntityType::Dialogue,
            |mark| data::load_dialogues_after(self.store, mark),
            |data| annotator.annotate(data),
        )
    }

    pub fn run_content_part(&self, annotator: &dyn ContentPartAnnotator) -> Result<RunStats> {
        let spec = annotator.spec().clone();
        self.run_with(
            &spec,
            EntityType::ContentPart,
            |mark| {
                let items = data::load_text_parts_after(self.store, mark)?;
                Ok(filter_part_roles(items, &spec))
            },
            |data| annotator.annotate(data),
        )
    }

    pub fn run_prompt_response(&self, annotator: &dyn PromptResponseAnnotator) -> Result<RunStats> {
        let spec = annotator.spec().clone();
        self.run_with(
            &spec,
            EntityType::PromptResponse,
            |mark| data::load_prompt_responses_after(self.store, mark),
            |data| annotator.annotate(data),
        )
    }

    fn run_with<D>(
        &self,
        spec: &AnnotatorSpec,
        entity_type: EntityType,
        load: impl FnOnce(DateTime<Utc>) -> Result<Vec<(Uuid, D, DateTime<Utc>)>>,
        annotate: impl Fn(&D) -> Vec<AnnotationResult>,
    ) -> Result<RunStats> {
        let started = Instant::now();
        let cursors = CursorManager::new(self.store);
        let cursor = cursors.get_or_create(spec.name, spec.version, entity_type)?;

        let items = load(cursor.high_water_mark)?;
        info!(
            annotator = spec.name,
            entity_type = entity_type.as_str(),
            candidates = items.len(),
            "annotator run started"
        );

        let reader = AnnotationReader::new(self.store);
        let writer = AnnotationWriter::new(self.store);

        let mut stats = RunStats::default();
        let mut new_mark = cursor.high_water_mark;

        for (entity_id, data, sort_ts) in items {
            let step = self.process_entity(
                spec,
                entity_type,
                entity_id,
                &data,
                &reader,
                &writer,
                &annotate,
            );
            match step {
                Ok(Outcome::Skipped) => {
                    stats.entities_processed += 1;
                    stats.entities_skipped += 1;
                    new_mark = new_mark.max(sort_ts);
                }
                Ok(Outcome::Annotated(created)) => {
                    stats.entities_processed += 1;
                    stats.annotations_created += created;
                    new_mark = new_mark.max(sort_ts);
                }
                Err(err) => {
                    // The cursor must not advance past the failing entity
                    warn!(
                        annotator = spec.name,
                        entity = %entity_id,
                        error = %err,
                        "annotator failed; run stopped"
                    );
                    stats.failed = true;
                    break;
                }
            }
        }

        let runtime_seconds = started.elapsed().as_secs_f64();
        cursors.update(
            &cursor,
            stats.entities_processed,
            stats.annotations_created,
            new_mark,
            runtime_seconds,
        )?;

        info!(
            annotator = spec.name,
            entities = stats.entities_processed,
            skipped = stats.entities_skipped,
            annotations = stats.annotations_created,
            failed = stats.failed,
            "annotator run finished"
        );

        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_entity<D>(
        &self,
        spec: &AnnotatorSpec,
        entity_type: EntityType,
        entity_id: Uuid,
        data: &D,
        reader: &AnnotationReader<'_>,
        writer: &AnnotationWriter<'_>,
        annotate: &impl Fn(&D) -> Vec<AnnotationResult>,
    ) -> Result<Outcome> {
        for key in spec.requires_flags {
            if !reader.has_flag(entity_type, entity_id, key)? {
                return Ok(Outcome::Skipped);
            }
        }
        for key in spec.requires_strings {
            if !reader.has_string(entity_type, entity_id, key)? {
                return Ok(Outcome::Skipped);
            }
        }
        for key in spec.skip_if_flags {
            if reader.has_flag(entity_type, entity_id, key)? {
                return Ok(Outcome::Skipped);
            }
        }
        for key in spec.skip_if_strings {
            if reader.has_string(entity_type, entity_id, key)? {
                return Ok(Outcome::Skipped);
            }
        }

        let mut created = 0;
        for result in annotate(data) {
            let ctx = WriteContext {
                source_version: Some(spec.version),
                confidence: result.confidence,
                reason: result.reason.as_deref(),
            };
            let wrote = match &result.value {
                AnnotationValue::Flag => {
                    writer.write_flag(entity_type, entity_id, &result.key, spec.name, ctx)?
                }
                AnnotationValue::String(value) => writer.write_string(
                    entity_type,
                    entity_id,
                    &result.key,
                    value,
                    spec.name,
                    ctx,
                )?,
                AnnotationValue::Numeric(value) => writer.write_numeric(
                    entity_type,
                    entity_id,
                    &result.key,
                    *value,
                    spec.name,
                    ctx,
                )?,
                AnnotationValue::Json(value) => writer.write_json(
                    entity_type,
                    entity_id,
                    &result.key,
                    value,
                    spec.name,
                    ctx,
                )?,
            };
            if wrote {
                created += 1;
            }
        }

        Ok(Outcome::Annotated(created))
    }
}

enum Outcome {
    Skipped,
    Annotated(i64),
}

fn filter_message_roles(
    items: Vec<(Uuid, MessageTextData, DateTime<Utc>)>,
    spec: &AnnotatorSpec,
) -> Vec<(Uuid, MessageTextData, DateTime<Utc>)> {
    match &spec.role_filter {
        Some(role) => items
            .into_iter()
            .filter(|(_, data, _)| data.role == *role)
            .collect(),
        None => items,
    }
}

fn filter_part_roles(
    items: Vec<(Uuid, ContentPartData, DateTime<Utc>)>,
    spec: &AnnotatorSpec,
) -> Vec<(Uuid, ContentPartData, DateTime<Utc>)> {
    match &spec.role_filter {
        Some(role) => items
            .into_iter()
            .filter(|(_, data, _)| data.role == *role)
            .collect(),
        None => items,
    }
}

/// The standard annotator catalog, each family ordered by priority
/// (highest first) so platform ground truth lands before heuristics.
pub struct Catalog {
    pub message: Vec<Box<dyn MessageAnnotator>>,
    pub exchange: Vec<Box<dyn ExchangeAnnotator>>,
    pub exchange_platform: Vec<Box<dyn ExchangePlatformAnnotator>>,
    pub dialogue: Vec<Box<dyn DialogueAnnotator>>,
    pub content_part: Vec<Box<dyn ContentPartAnnotator>>,
    pub prompt_response: Vec<Box<dyn PromptResponseAnnotator>>,
}

impl Catalog {
    pub fn standard() -> Self {
        let mut catalog = Self {
            message: crate::message::standard_annotators(),
            exchange: crate::exchange::standard_annotators(),
            exchange_platform: crate::platform::standard_annotators(),
            dialogue: crate::dialogue::standard_annotators(),
            content_part: crate::content_part::standard_annotators(),
            prompt_response: crate::prompt_response::standard_annotators(),
        };
        catalog
            .message
            .sort_by(|a, b| b.spec().priority.cmp(&a.spec().priority));
        catalog
            .exchange
            .sort_by(|a, b| b.spec().priority.cmp(&a.spec().priority));
        catalog
            .exchange_platform
            .sort_by(|a, b| b.spec().priority.cmp(&a.spec().priority));
        catalog
            .dialogue
            .sort_by(|a, b| b.spec().priority.cmp(&a.spec().priority));
        catalog
            .content_part
            .sort_by(|a, b| b.spec().priority.cmp(&a.spec().priority));
        catalog
            .prompt_response
            .sort_by(|a, b| b.spec().priority.cmp(&a.spec().priority));
        catalog
    }
}

impl<'a> AnnotatorRunner<'a> {
    /// Run every annotator in the catalog. Returns (annotator name, count)
    /// pairs where a failed run counts as -1; one failure never aborts the
    /// rest of the run.
    pub fn run_catalog(&self, catalog: &Catalog) -> Vec<(String, i64)> {
        let mut results = Vec::new();

        for annotator in &catalog.exchange_platform {
            let name = annotator.spec().name.to_string();
            results.push((name, count_of(self.run_exchange_platform(annotator.as_ref()))));
        }
        for annotator in &catalog.message {
            let name = annotator.spec().name.to_string();
            results.push((name, count_of(self.run_message(annotator.as_ref()))));
        }
        for annotator in &catalog.content_part {
            let name = annotator.spec().name.to_string();
            results.push((name, count_of(self.run_content_part(annotator.as_ref()))));
        }
        for annotator in &catalog.exchange {
            let name = annotator.spec().name.to_string();
            results.push((name, count_of(self.run_exchange(annotator.as_ref()))));
        }
        for annotator in &catalog.dialogue {
            let name = annotator.spec().name.to_string();
            results.push((name, count_of(self.run_dialogue(annotator.as_ref()))));
        }
        for annotator in &catalog.prompt_response {
            let name = annotator.spec().name.to_string();
            results.push((name, count_of(self.run_prompt_response(annotator.as_ref()))));
        }

        results
    }
}

fn count_of(outcome: Result<RunStats>) -> i64 {
    match outcome {
        Ok(stats) => stats.as_count(),
        Err(err) => {
            warn!(error = %err, "annotator run errored");
            -1
        }
    }
}
