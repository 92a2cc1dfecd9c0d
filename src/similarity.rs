// 🔤 Similarity Engine - Normalized Levenshtein scoring
// Scores two strings 0-100, where 100 = identical after trim + lowercase

use serde::{Deserialize, Serialize};

// ============================================================================
// MATCH STRENGTH
// ============================================================================

/// Classification of a similarity score.
///
/// Used uniformly wherever a score needs a category: individual field
/// matches, whole duplicate groups, and aggregate statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrength {
    /// Similarity exactly 100
    Exact,

    /// Similarity 90-99
    High,

    /// Similarity 75-89
    Medium,

    /// Similarity below 75
    Low,
}

impl MatchStrength {
    /// Classify a 0-100 similarity score
    pub fn from_similarity(similarity: u8) -> Self {
        if similarity == 100 {
            MatchStrength::Exact
        } else if similarity >= 90 {
            MatchStrength::High
        } else if similarity >= 75 {
            MatchStrength::Medium
        } else {
            MatchStrength::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrength::Exact => "exact",
            MatchStrength::High => "high",
            MatchStrength::Medium => "medium",
            MatchStrength::Low => "low",
        }
    }
}

// ============================================================================
// SIMILARITY SCORE
// ============================================================================

/// Compute similarity between two strings as an integer 0-100.
///
/// - 100: equal after trimming and lowercasing
/// - 0: either side empty after trimming, or completely dissimilar
/// - otherwise: `round((1 - distance / max_len) * 100)` where distance is
///   the Levenshtein edit distance over the normalized strings
///
/// Pure and deterministic. O(m*n) time and space in the string lengths.
pub fn similarity_score(a: &str, b: &str) -> u8 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        return 0;
    }
    if a == b {
        return 100;
    }

    // Char-based, not byte-based, so accented names score correctly
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    let distance = levenshtein_distance(&a_chars, &b_chars);
    let max_len = a_chars.len().max(b_chars.len());

    ((1.0 - distance as f64 / max_len as f64) * 100.0).round() as u8
}

/// Calculate Levenshtein distance between two char sequences
///
/// Levenshtein distance = minimum number of single-character edits
/// (insertions, deletions, substitutions) to change one string into another
fn levenshtein_distance(s1: &[char], s2: &[char]) -> usize {
    let len1 = s1.len();
    let len2 = s2.len();

    let mut matrix = vec![vec![0usize; len2 + 1]; len1 + 1];

    // Base cases: transforming to/from the empty prefix
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1[i - 1] == s2[j - 1] { 0 } else { 1 };

            matrix[i][j] = std::cmp::min(
                std::cmp::min(
                    matrix[i - 1][j] + 1, // deletion
                    matrix[i][j - 1] + 1, // insertion
                ),
                matrix[i - 1][j - 1] + cost, // substitution
            );
        }
    }

    matrix[len1][len2]
}

// ============================================================================
// TESTS
// ============================================================================
