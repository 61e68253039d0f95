use crate::config::NameAliases;
use crate::model::StudentRecord;
use strsim::normalized_levenshtein;

/// Last names separate students better than first names within one class,
/// so they carry more of the combined score.
const FIRST_NAME_WEIGHT: f64 = 0.4;
const LAST_NAME_WEIGHT: f64 = 0.6;

/// A fuzzy winner must beat the runner-up by at least this much, otherwise
/// the match is ambiguous and rejected.
const MIN_SCORE_GAP: f64 = 0.02;

/// Resolve a sheet identity to an existing record. Stages: exact match
/// scoped to the class, alias-table lookup followed by exact match, then
/// fuzzy matching across all records. Returns an index into `records`;
/// `None` means the caller should create a new record.
pub fn resolve(
    records: &[StudentRecord],
    first: &str,
    last: &str,
    class_name: &str,
    aliases: &NameAliases,
    threshold: f64,
) -> Option<usize> {
    let (first, last) = aliases.resolve(class_name, first, last);

    if let Some(i) = records.iter().position(|r| {
        r.class_name == class_name && r.first_name == first && r.last_name == last
    }) {
        return Some(i);
    }

    fuzzy_match(records, &first, &last, threshold)
}

/// Alias resolution alone, for callers that only need the canonical name
/// (e.g. when creating a new record from sheet input).
pub fn canonical_name(
    aliases: &NameAliases,
    class_name: &str,
    first: &str,
    last: &str,
) -> (String, String) {
    aliases.resolve(class_name, first, last)
}

fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

fn fuzzy_match(
    records: &[StudentRecord],
    first: &str,
    last: &str,
    threshold: f64,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    let mut second: f64 = 0.0;

    for (i, r) in records.iter().enumerate() {
        let score = FIRST_NAME_WEIGHT * similarity(first, &r.first_name)
            + LAST_NAME_WEIGHT * similarity(last, &r.last_name);
        match best {
            Some((_, b)) if score <= b => {
                if score > second {
                    second = score;
                }
            }
            _ => {
                if let Some((_, b)) = best {
                    second = b;
                }
                best = Some((i, score));
            }
        }
    }

    let (index, score) = best?;
    if score < threshold {
        return None;
    }
    if score - second < MIN_SCORE_GAP {
        tracing::warn!(
            "ambiguous fuzzy name match for {} {}: {} {} and a runner-up score within {:.3}; not resolving",
            first,
            last,
            records[index].first_name,
            records[index].last_name,
            MIN_SCORE_GAP
        );
        return None;
    }

    // A fuzzy hit means the sheet likely has a typo; flag it even though
    // processing proceeds.
    tracing::warn!(
        "fuzzy name match: sheet {} {} resolved to {} {} (similarity {:.2}); verify spelling in the source file",
        first,
        last,
        records[index].first_name,
        records[index].last_name,
        score
    );
    Some(index)
}
