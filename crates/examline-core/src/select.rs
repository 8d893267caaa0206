//! Question selection engine.
//!
//! Takes the raw candidate pool fetched from a bank, strips exact and
//! near-duplicate questions, then samples a fixed-size working set without
//! replacement. Sequence numbers are assigned in sampled order, so two runs
//! over the same pool are expected to produce different orderings.

use std::collections::HashSet;

use rand::Rng;
use thiserror::Error;

use crate::model::Question;

/// Pairwise text-similarity ratio at or above this marks a near-duplicate.
const SIMILARITY_THRESHOLD: f64 = 0.9;

/// Why a working set could not be drawn.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    /// The candidate pool was empty (bank failed or returned nothing).
    #[error("question bank unavailable")]
    BankUnavailable,

    /// After de-duplication the pool is smaller than the requested size;
    /// sampling with repetition is never done.
    #[error("insufficient questions: need {need}, have {have}")]
    Insufficient { need: usize, have: usize },
}

/// Draw `n` distinct questions from the pool, tagged 1..n in sampled order.
pub fn draw(pool: Vec<Question>, n: usize) -> Result<Vec<Question>, SelectionError> {
    draw_with_rng(pool, n, &mut rand::thread_rng())
}

/// [`draw`] with an injected RNG for deterministic tests.
pub fn draw_with_rng<R: Rng>(
    pool: Vec<Question>,
    n: usize,
    rng: &mut R,
) -> Result<Vec<Question>, SelectionError> {
    if pool.is_empty() {
        return Err(SelectionError::BankUnavailable);
    }

    let filtered = dedupe(pool);
    if filtered.len() < n {
        return Err(SelectionError::Insufficient {
            need: n,
            have: filtered.len(),
        });
    }

    let picked = rand::seq::index::sample(rng, filtered.len(), n);
    let mut drawn: Vec<Question> = Vec::with_capacity(n);
    for (i, idx) in picked.into_iter().enumerate() {
        let mut q = filtered[idx].clone();
        q.seq = (i + 1) as u32;
        drawn.push(q);
    }
    Ok(drawn)
}

/// Remove exact duplicates (by question text, first occurrence wins), then
/// near-duplicates against everything already accepted. Quadratic over the
/// filtered pool, which stays in the low hundreds.
fn dedupe(pool: Vec<Question>) -> Vec<Question> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut accepted: Vec<Question> = Vec::new();

    for q in pool {
        if !seen.insert(q.text.clone()) {
            continue;
        }
        let near_dup = accepted
            .iter()
            .any(|a| strsim::normalized_levenshtein(&a.text, &q.text) >= SIMILARITY_THRESHOLD);
        if near_dup {
            tracing::debug!(text = %q.text, "dropping near-duplicate question");
            continue;
        }
        accepted.push(q);
    }
    accepted
}
