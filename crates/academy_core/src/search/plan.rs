//! Query plan selection.
//!
//! # Invariants
//! - A plan is chosen once per call; the only transition is
//!   `FullText -> Filtered` on engine failure.
//! - The filtered plan pushes every predicate down and post-filters nothing.

use crate::model::query::Predicate;
use crate::search::fts::{build_match_expression, split_terms};

/// How one search call reads from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    FullText(FullTextPlan),
    Filtered(FilteredPlan),
}

/// Ranked full-text query with partial predicate push-down.
#[derive(Debug, Clone, PartialEq)]
pub struct FullTextPlan {
    pub match_expression: String,
    pub terms: Vec<String>,
    pub pushed: Vec<Predicate>,
    /// Evaluated in memory on the fetched window.
    pub post: Vec<Predicate>,
}

/// Keyset scan; free text, if any, becomes substring matching.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPlan {
    pub contains: Vec<String>,
    pub predicates: Vec<Predicate>,
}

impl Plan {
    /// Chooses the full-text plan when there is usable free text.
    pub fn choose(free_text: Option<&str>, predicates: Vec<Predicate>) -> Self {
        let terms = free_text.map(split_terms).unwrap_or_default();
        let Some(match_expression) = build_match_expression(&terms) else {
            return Self::Filtered(FilteredPlan {
                contains: Vec::new(),
                predicates,
            });
        };

        let (pushed, post): (Vec<_>, Vec<_>) = predicates
            .into_iter()
            .partition(|predicate| predicate.field.full_text_pushdown);
        Self::FullText(FullTextPlan {
            match_expression,
            terms,
            pushed,
            post,
        })
    }

    /// Same semantics without the full-text engine.
    pub fn fallback(self) -> FilteredPlan {
        match self {
            Self::FullText(plan) => {
                let mut predicates = plan.pushed;
                predicates.extend(plan.post);
                FilteredPlan {
                    contains: plan.terms,
                    predicates,
                }
            }
            Self::Filtered(plan) => plan,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FullText(_) => "full_text",
            Self::Filtered(_) => "filtered",
        }
    }

    pub fn post_filters(&self) -> &[Predicate] {
        match self {
            Self::FullText(plan) => &plan.post,
            Self::Filtered(_) => &[],
        }
    }
}
