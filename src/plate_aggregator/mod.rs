//! PlateAggregator - Cross-Frame Reading Selection
//!
//! ## Responsibilities
//!
//! - Group recognition attempts by normalized plate text
//! - Rank groups by (occurrence count, mean confidence)
//! - Yield no reading when no attempt carried text

use crate::recognition_client::RecognitionAttempt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregated best reading for a run.
///
/// Derived from the run's attempt list, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateReading {
    /// Normalized plate text (upper-case, whitespace stripped)
    pub text: String,
    /// Number of attempts that agreed on this text
    pub occurrences: u32,
    /// Mean confidence across the agreeing attempts
    pub mean_confidence: f32,
}

/// Normalize plate text for grouping: upper-case, whitespace stripped
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Select the best reading across a run's attempts.
///
/// More agreeing frames wins; ties broken by higher mean confidence.
/// Returns None when no attempt yielded any plate text.
pub fn aggregate(attempts: &[RecognitionAttempt]) -> Option<PlateReading> {
    let mut groups: HashMap<String, (u32, f64)> = HashMap::new();

    for attempt in attempts {
        let Some(ref text) = attempt.plate else {
            continue;
        };
        let key = normalize(text);
        if key.is_empty() {
            continue;
        }
        let entry = groups.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += attempt.confidence as f64;
    }

    groups
        .into_iter()
        .map(|(text, (count, sum))| PlateReading {
            text,
            occurrences: count,
            mean_confidence: (sum / count as f64) as f32,
        })
        .max_by(|a, b| {
            a.occurrences.cmp(&b.occurrences).then(
                a.mean_confidence
                    .partial_cmp(&b.mean_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        })
}
