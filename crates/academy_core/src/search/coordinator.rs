//! Search execution: validation, plan, fetch, page cut, enrichment.
//!
//! # Responsibility
//! - Validate a [`SearchQuery`] against the entity schema and paging limits.
//! - Run the chosen [`Plan`], falling back from full text to a filtered scan
//!   when the engine fails.
//! - Build a [`Page`] from a `limit + 1` keyset fetch.
//!
//! # Invariants
//! - `has_more` is decided on the sorted fetch before post-filtering, so the
//!   next cursor always resumes after the last row the store returned for this
//!   page. Post-filtered full-text pages may therefore hold fewer than `limit`
//!   items, or none, while `has_more` is still `true`.
//! - Interruption is never treated as an engine failure.

use crate::cancel::CallContext;
use crate::config::SearchConfig;
use crate::enrich::ResultEnricher;
use crate::model::entity::{EntityKind, EntitySchema, FieldSpec};
use crate::model::query::{Page, Predicate, SearchQuery, SortOrder, SortSpec};
use crate::model::record::{Record, TenantId};
use crate::model::validation::ValidationError;
use crate::repo::{
    CountQuery, FullTextQuery, Keyset, RecordStore, ScanQuery, StoreError, TextFilter,
};
use crate::search::cursor::CursorCodec;
use crate::search::fts::engine_failure_reason;
use crate::search::plan::Plan;
use crate::search::{SearchError, SearchResult};
use log::{debug, info, warn};
use std::time::Instant;

/// Validated form of a [`SearchQuery`].
#[derive(Debug)]
struct ResolvedQuery {
    tenant_id: TenantId,
    free_text: Option<String>,
    predicates: Vec<Predicate>,
    sort_field: &'static FieldSpec,
    order: SortOrder,
    keyset: Keyset,
    limit: u32,
    include_total: bool,
}

/// Runs searches for one entity kind against a store.
pub struct SearchCoordinator<'a> {
    store: &'a dyn RecordStore,
    config: &'a SearchConfig,
}

impl<'a> SearchCoordinator<'a> {
    pub fn new(store: &'a dyn RecordStore, config: &'a SearchConfig) -> Self {
        Self { store, config }
    }

    /// Returns one page of `kind` records matching `query`.
    ///
    /// # Errors
    /// - `Validation` for malformed queries or cursors.
    /// - `Interrupted` when `ctx` is cancelled or past its deadline.
    /// - `Store` when the filtered path itself fails.
    pub fn search(
        &self,
        kind: EntityKind,
        query: &SearchQuery,
        ctx: &CallContext,
    ) -> SearchResult<Page> {
        let started_at = Instant::now();
        ctx.check()?;

        let schema = kind.schema();
        let resolved = self.resolve(schema, query)?;
        let plan = Plan::choose(resolved.free_text.as_deref(), resolved.predicates.clone());
        info!(
            "event=search_plan module=search status=start kind={} plan={} filters={} text_chars={} limit={} resumed={}",
            kind.as_str(),
            plan.name(),
            resolved.predicates.len(),
            resolved
                .free_text
                .as_deref()
                .map_or(0, |text| text.chars().count()),
            resolved.limit,
            resolved.keyset.after.is_some()
        );

        let (plan, mut rows) = self.execute(kind, plan, &resolved, ctx)?;

        let sort_field = resolved.sort_field.name;
        rows.sort_by(|a, b| match resolved.order {
            SortOrder::Asc => a.keyset_cmp(b, sort_field),
            SortOrder::Desc => b.keyset_cmp(a, sort_field),
        });

        let limit = resolved.limit as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last()
                .map(|last| CursorCodec::encode(last, sort_field, resolved.order))
        } else {
            None
        };

        let fetched = rows.len();
        let post = plan.post_filters();
        if !post.is_empty() {
            rows.retain(|record| post.iter().all(|predicate| predicate.matches(record)));
        }

        let total_count = if resolved.include_total {
            self.count(kind, &plan, &resolved, ctx)?
        } else {
            None
        };

        ctx.check()?;
        let degraded = ResultEnricher::for_kind(kind).enrich(
            self.store,
            resolved.tenant_id,
            &mut rows,
            ctx,
        )?;

        info!(
            "event=search module=search status=ok kind={} plan={} fetched={fetched} returned={} has_more={has_more} degraded={} duration_ms={}",
            kind.as_str(),
            plan.name(),
            rows.len(),
            degraded.len(),
            started_at.elapsed().as_millis()
        );

        Ok(Page {
            items: rows,
            has_more: next_cursor.is_some(),
            next_cursor,
            total_count,
            degraded,
        })
    }

    fn resolve(&self, schema: &EntitySchema, query: &SearchQuery) -> SearchResult<ResolvedQuery> {
        let limit = query.limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(ValidationError::LimitOutOfRange {
                limit,
                max: self.config.max_limit,
            }
            .into());
        }

        let free_text = query
            .free_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty());
        if let Some(text) = free_text {
            let chars = text.chars().count();
            if chars > self.config.max_free_text_chars {
                return Err(ValidationError::FreeTextTooLong {
                    chars,
                    max: self.config.max_free_text_chars,
                }
                .into());
            }
        }

        let sort = query
            .sort
            .clone()
            .unwrap_or_else(|| SortSpec::new(schema.default_sort, SortOrder::Asc));
        let sort_field = schema.require_field(&sort.field)?;
        if !sort_field.sortable {
            return Err(ValidationError::FieldNotSortable(sort.field).into());
        }

        let predicates = query
            .filters
            .iter()
            .map(|(name, filter)| Predicate::parse(schema, name, filter))
            .collect::<Result<Vec<_>, _>>()?;

        let after = match query.cursor.as_deref() {
            None => None,
            Some(token) => {
                let position = CursorCodec::decode(token)?;
                position.ensure_matches(schema.kind, sort_field.name, sort.order)?;
                sort_field.check_value(&position.key).map_err(|_| {
                    ValidationError::InvalidCursor(format!(
                        "cursor key does not fit field `{}`",
                        sort_field.name
                    ))
                })?;
                Some((position.key, position.id))
            }
        };

        Ok(ResolvedQuery {
            tenant_id: query.tenant_id,
            free_text: free_text.map(str::to_string),
            predicates,
            sort_field,
            order: sort.order,
            keyset: Keyset {
                field: sort_field.name,
                order: sort.order,
                after,
            },
            limit,
            include_total: query.include_total,
        })
    }

    /// Fetches `limit + 1` rows, falling back once on full-text failure.
    fn execute(
        &self,
        kind: EntityKind,
        plan: Plan,
        resolved: &ResolvedQuery,
        ctx: &CallContext,
    ) -> SearchResult<(Plan, Vec<Record>)> {
        let fetch = resolved.limit + 1;

        if let Plan::FullText(full_text) = &plan {
            ctx.check()?;
            let attempt = self.store.full_text(&FullTextQuery {
                kind,
                tenant_id: resolved.tenant_id,
                match_expression: &full_text.match_expression,
                predicates: &full_text.pushed,
                keyset: &resolved.keyset,
                fetch,
            });
            match attempt {
                Ok(rows) => return Ok((plan, rows)),
                Err(StoreError::Interrupted) => {
                    return Err(SearchError::Interrupted(ctx.interrupt_reason()))
                }
                Err(err) => {
                    warn!(
                        "event=search_fallback module=search status=degraded kind={} from=full_text to=filtered reason={} error={err}",
                        kind.as_str(),
                        engine_failure_reason(&err)
                    );
                }
            }
        }

        let filtered = plan.fallback();
        ctx.check()?;
        let rows = self
            .store
            .scan(&ScanQuery {
                kind,
                tenant_id: resolved.tenant_id,
                predicates: &filtered.predicates,
                contains: &filtered.contains,
                keyset: &resolved.keyset,
                fetch,
            })
            .map_err(|err| store_error(err, ctx))?;
        Ok((Plan::Filtered(filtered), rows))
    }

    /// Best-effort total; failures other than interruption yield `None`.
    fn count(
        &self,
        kind: EntityKind,
        plan: &Plan,
        resolved: &ResolvedQuery,
        ctx: &CallContext,
    ) -> SearchResult<Option<u64>> {
        ctx.check()?;
        let query = match plan {
            Plan::FullText(full_text) => CountQuery {
                kind,
                tenant_id: resolved.tenant_id,
                text: Some(TextFilter::FullText(&full_text.match_expression)),
                predicates: &full_text.pushed,
            },
            Plan::Filtered(filtered) => CountQuery {
                kind,
                tenant_id: resolved.tenant_id,
                text: (!filtered.contains.is_empty())
                    .then_some(TextFilter::Contains(&filtered.contains)),
                predicates: &filtered.predicates,
            },
        };

        match self.store.count(&query) {
            Ok(total) => Ok(Some(total)),
            Err(StoreError::Interrupted) => Err(SearchError::Interrupted(ctx.interrupt_reason())),
            Err(err) => {
                warn!(
                    "event=search_count module=search status=degraded kind={} plan={} error={err}",
                    kind.as_str(),
                    plan.name()
                );
                Ok(None)
            }
        }
    }
}

fn store_error(err: StoreError, ctx: &CallContext) -> SearchError {
    match err {
        StoreError::Interrupted => SearchError::Interrupted(ctx.interrupt_reason()),
        other => {
            debug!("event=search module=search status=error error={other}");
            SearchError::Store(other)
        }
    }
}
