// 🔍 Duplicate Detection Engine - Fuzzy matching + transitive grouping
// Compares every student pair across name/email/phone/CPF and clusters
// matching pairs into duplicate groups with aggregate statistics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::db::Student;
use crate::normalize::{normalize_cpf, normalize_email, normalize_phone, normalize_text};
use crate::similarity::{similarity_score, MatchStrength};

// ============================================================================
// MATCH FIELD
// ============================================================================

/// The closed set of identity fields the comparator evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Name,
    Email,
    Phone,
    Cpf,
}

impl MatchField {
    /// Human-readable label (also the key of the stats histogram)
    pub fn label(&self) -> &'static str {
        match self {
            MatchField::Name => "Name",
            MatchField::Email => "Email",
            MatchField::Phone => "Phone",
            MatchField::Cpf => "CPF",
        }
    }
}

// ============================================================================
// FIELD MATCH
// ============================================================================

/// Result of comparing one field between two students
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMatch {
    pub field: MatchField,
    pub label: String,

    /// Raw values as entered, before normalization
    pub value_a: String,
    pub value_b: String,

    /// Similarity score 0-100
    pub similarity: u8,

    pub match_type: MatchStrength,
}

// ============================================================================
// DETECTION OPTIONS
// ============================================================================

/// Caller-tunable knobs for a detection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionOptions {
    /// Group-admission floor applied on top of the per-field thresholds
    pub min_similarity: u8,

    /// Only accept a pair if at least one of its matches is similarity 100
    pub include_exact_only: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        DetectionOptions {
            min_similarity: 70,
            include_exact_only: false,
        }
    }
}

// ============================================================================
// DUPLICATE GROUP
// ============================================================================

/// A cluster of 2+ students believed to be the same person
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Assigned sequentially from 1 within one detection run
    pub id: u32,

    /// Members, insertion order, never the same student id twice
    pub students: Vec<Student>,

    /// Every field match that contributed to this group
    pub matches: Vec<FieldMatch>,

    /// Max similarity across all contributing matches
    pub overall_similarity: u8,

    /// Classification of `overall_similarity`
    pub match_type: MatchStrength,

    /// Field of the best match (ties: first in evaluation order)
    pub primary_field: MatchField,
}

impl DuplicateGroup {
    fn new(id: u32, a: &Student, b: &Student, matches: Vec<FieldMatch>) -> Self {
        let mut group = DuplicateGroup {
            id,
            students: vec![a.clone(), b.clone()],
            matches,
            overall_similarity: 0,
            match_type: MatchStrength::Low,
            primary_field: MatchField::Name,
        };
        group.refresh_summary();
        group
    }

    /// Append a newly linked student and its pair matches
    fn absorb(&mut self, student: &Student, mut matches: Vec<FieldMatch>) {
        if !self.students.iter().any(|s| s.id == student.id) {
            self.students.push(student.clone());
        }
        self.matches.append(&mut matches);
        self.refresh_summary();
    }

    /// Recompute overall similarity, strength, and primary field from the
    /// contributing matches. Strict `>` keeps the earliest of tied scores,
    /// which within a pair means first in field evaluation order.
    fn refresh_summary(&mut self) {
        let mut best: Option<&FieldMatch> = None;
        for m in &self.matches {
            match best {
                Some(b) if m.similarity <= b.similarity => {}
                _ => best = Some(m),
            }
        }
        if let Some(best) = best {
            self.overall_similarity = best.similarity;
            self.match_type = MatchStrength::from_similarity(best.similarity);
            self.primary_field = best.field;
        }
    }
}

// ============================================================================
// DUPLICATE DETECTOR
// ============================================================================

pub struct DuplicateDetector {
    /// Per-field similarity thresholds (a field below its threshold emits
    /// no match at all, not even a low-similarity one)
    pub name_threshold: u8,
    pub email_threshold: u8,
    pub phone_threshold: u8,
    pub cpf_threshold: u8,

    /// Minimum normalized lengths; shorter values are skipped entirely
    pub phone_min_digits: usize,
    pub cpf_min_digits: usize,
}

impl DuplicateDetector {
    /// Create detector with default thresholds
    pub fn new() -> Self {
        DuplicateDetector {
            name_threshold: 70,
            email_threshold: 85,
            phone_threshold: 85,
            cpf_threshold: 90,
            phone_min_digits: 8,
            cpf_min_digits: 11,
        }
    }

    /// Compare the identity fields of two students.
    ///
    /// Emits one `FieldMatch` per field where both sides have non-empty
    /// normalized values and the similarity meets the field threshold.
    /// Evaluation order is fixed: name, email, phone, cpf.
    pub fn compare_fields(&self, a: &Student, b: &Student) -> Vec<FieldMatch> {
        let mut matches = Vec::new();

        if let Some(m) = self.check_name(a, b) {
            matches.push(m);
        }
        if let Some(m) = self.check_email(a, b) {
            matches.push(m);
        }
        if let Some(m) = self.check_phone(a, b) {
            matches.push(m);
        }
        if let Some(m) = self.check_cpf(a, b) {
            matches.push(m);
        }

        matches
    }

    fn check_name(&self, a: &Student, b: &Student) -> Option<FieldMatch> {
        let norm_a = normalize_text(a.name.as_deref());
        let norm_b = normalize_text(b.name.as_deref());
        self.build_match(
            MatchField::Name,
            a.name.as_deref(),
            b.name.as_deref(),
            &norm_a,
            &norm_b,
            self.name_threshold,
        )
    }

    fn check_email(&self, a: &Student, b: &Student) -> Option<FieldMatch> {
        let norm_a = normalize_email(a.email.as_deref());
        let norm_b = normalize_email(b.email.as_deref());
        self.build_match(
            MatchField::Email,
            a.email.as_deref(),
            b.email.as_deref(),
            &norm_a,
            &norm_b,
            self.email_threshold,
        )
    }

    fn check_phone(&self, a: &Student, b: &Student) -> Option<FieldMatch> {
        let norm_a = normalize_phone(a.phone.as_deref());
        let norm_b = normalize_phone(b.phone.as_deref());

        // Partial numbers are too ambiguous to compare
        if norm_a.chars().count() < self.phone_min_digits
            || norm_b.chars().count() < self.phone_min_digits
        {
            return None;
        }

        self.build_match(
            MatchField::Phone,
            a.phone.as_deref(),
            b.phone.as_deref(),
            &norm_a,
            &norm_b,
            self.phone_threshold,
        )
    }

    fn check_cpf(&self, a: &Student, b: &Student) -> Option<FieldMatch> {
        let norm_a = normalize_cpf(a.cpf.as_deref());
        let norm_b = normalize_cpf(b.cpf.as_deref());

        // A CPF has 11 digits; incomplete ones are skipped even when the
        // similarity would pass the threshold
        if norm_a.len() < self.cpf_min_digits || norm_b.len() < self.cpf_min_digits {
            return None;
        }

        self.build_match(
            MatchField::Cpf,
            a.cpf.as_deref(),
            b.cpf.as_deref(),
            &norm_a,
            &norm_b,
            self.cpf_threshold,
        )
    }

    fn build_match(
        &self,
        field: MatchField,
        raw_a: Option<&str>,
        raw_b: Option<&str>,
        norm_a: &str,
        norm_b: &str,
        threshold: u8,
    ) -> Option<FieldMatch> {
        if norm_a.is_empty() || norm_b.is_empty() {
            return None;
        }

        let similarity = similarity_score(norm_a, norm_b);
        if similarity < threshold {
            return None;
        }

        Some(FieldMatch {
            field,
            label: field.label().to_string(),
            value_a: raw_a.unwrap_or_default().to_string(),
            value_b: raw_b.unwrap_or_default().to_string(),
            similarity,
            match_type: MatchStrength::from_similarity(similarity),
        })
    }

    /// Find all duplicate groups in a list of students.
    ///
    /// Every unordered pair is compared exactly once; matching pairs are
    /// merged transitively into groups via the membership map. Output is
    /// sorted descending by overall similarity. Never fails: empty and
    /// single-element inputs return an empty list.
    pub fn find_duplicates(
        &self,
        students: &[Student],
        options: &DetectionOptions,
    ) -> Vec<DuplicateGroup> {
        let mut groups: Vec<DuplicateGroup> = Vec::new();

        // All state is local to this call
        let mut membership: HashMap<String, usize> = HashMap::new();
        let mut processed: HashSet<(String, String)> = HashSet::new();
        let mut next_group_id: u32 = 1;

        for i in 0..students.len() {
            for j in (i + 1)..students.len() {
                let a = &students[i];
                let b = &students[j];

                // Defensive: the i<j loop already visits each pair once,
                // but duplicate ids in the input would re-visit a pair
                if !processed.insert(pair_key(&a.id, &b.id)) {
                    continue;
                }

                let matches = self.compare_fields(a, b);
                if matches.is_empty() {
                    continue;
                }

                let matches: Vec<FieldMatch> = matches
                    .into_iter()
                    .filter(|m| m.similarity >= options.min_similarity)
                    .collect();
                if matches.is_empty() {
                    continue;
                }

                if options.include_exact_only && !matches.iter().any(|m| m.similarity == 100) {
                    continue;
                }

                match (
                    membership.get(&a.id).copied(),
                    membership.get(&b.id).copied(),
                ) {
                    (None, None) => {
                        let group = DuplicateGroup::new(next_group_id, a, b, matches);
                        next_group_id += 1;
                        membership.insert(a.id.clone(), groups.len());
                        membership.insert(b.id.clone(), groups.len());
                        groups.push(group);
                    }
                    (Some(idx), None) => {
                        groups[idx].absorb(b, matches);
                        membership.insert(b.id.clone(), idx);
                    }
                    (None, Some(idx)) => {
                        groups[idx].absorb(a, matches);
                        membership.insert(a.id.clone(), idx);
                    }
                    (Some(_), Some(_)) => {
                        // Both sides already grouped. The pair is dropped and
                        // the two groups stay separate even when different,
                        // matching the behavior of the original detector.
                        // A union-find merge would be the alternative.
                    }
                }
            }
        }

        groups.sort_by(|a, b| b.overall_similarity.cmp(&a.overall_similarity));
        groups
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Order-independent key for the visited-pair set
fn pair_key(id_a: &str, id_b: &str) -> (String, String) {
    if id_a <= id_b {
        (id_a.to_string(), id_b.to_string())
    } else {
        (id_b.to_string(), id_a.to_string())
    }
}

/// Find duplicate groups with the default thresholds
pub fn find_duplicates(students: &[Student], options: &DetectionOptions) -> Vec<DuplicateGroup> {
    DuplicateDetector::new().find_duplicates(students, options)
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Aggregate statistics over a detection run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateStats {
    pub total_groups: usize,

    /// Sum of group sizes (records involved in any group)
    pub total_duplicates: usize,

    pub exact_matches: usize,
    pub high_similarity: usize,
    pub medium_similarity: usize,
    pub low_similarity: usize,

    /// Groups per primary-field label
    pub by_field: BTreeMap<String, usize>,
}

/// Derive statistics from a group list. Pure aggregation, no side effects.
pub fn duplicate_stats(groups: &[DuplicateGroup]) -> DuplicateStats {
    let mut stats = DuplicateStats {
        total_groups: groups.len(),
        ..Default::default()
    };

    for group in groups {
        stats.total_duplicates += group.students.len();

        match group.match_type {
            MatchStrength::Exact => stats.exact_matches += 1,
            MatchStrength::High => stats.high_similarity += 1,
            MatchStrength::Medium => stats.medium_similarity += 1,
            MatchStrength::Low => stats.low_similarity += 1,
        }

        *stats
            .by_field
            .entry(group.primary_field.label().to_string())
            .or_insert(0) += 1;
    }

    stats
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, name: &str, email: &str, phone: &str, cpf: &str) -> Student {
        let opt = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };
        Student {
            id: id.to_string(),
            name: opt(name),
            email: opt(email),
            phone: opt(phone),
            cpf: opt(cpf),
            imported_at: None,
            source_file: String::new(),
        }
    }

    #[test]
    fn test_empty_and_single_input() {
        let options = DetectionOptions::default();
        assert!(find_duplicates(&[], &options).is_empty());

        let only = student("1", "Maria Silva", "m@x.com", "", "");
        assert!(find_duplicates(&[only], &options).is_empty());
    }

    #[test]
    fn test_exact_email_match() {
        let a = student("1", "", "A@Test.com", "", "");
        let b = student("2", "", "a@test.com ", "", "");

        let groups = find_duplicates(&[a, b], &DetectionOptions::default());

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.matches.len(), 1);
        assert_eq!(group.matches[0].field, MatchField::Email);
        assert_eq!(group.matches[0].similarity, 100);
        assert_eq!(group.matches[0].match_type, MatchStrength::Exact);
        assert_eq!(group.overall_similarity, 100);
        assert_eq!(group.primary_field, MatchField::Email);
    }

    #[test]
    fn test_pair_can_match_on_multiple_fields() {
        let a = student("1", "Maria Silva", "maria@x.com", "+55 (11) 99999-8888", "");
        let b = student("2", "Maria Sylva", "maria@x.com", "5511999998888", "");

        let groups = find_duplicates(&[a, b], &DetectionOptions::default());

        assert_eq!(groups.len(), 1);
        // name (fuzzy), email (exact), phone (exact after stripping)
        assert_eq!(groups[0].matches.len(), 3);
        assert_eq!(groups[0].overall_similarity, 100);
        // Email wins the tie with phone by evaluation order
        assert_eq!(groups[0].primary_field, MatchField::Email);
    }

    #[test]
    fn test_transitive_chain_forms_single_group() {
        // A-B match on name, B-C match on email, A and C share nothing
        let a = student("a", "Maria Silva", "", "", "");
        let b = student("b", "Maria Sylva", "maria@x.com", "", "");
        let c = student("c", "Regina Duarte", "maria@x.com", "", "");

        let groups = find_duplicates(&[a, b, c], &DetectionOptions::default());

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].students.len(), 3);

        let ids: Vec<&str> = groups[0].students.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_transitive_chain_without_direct_match() {
        // A~B and B~C are within edit distance 2 of 10 chars (similarity 80),
        // A~C is distance 4 (similarity 60, below the name threshold)
        let a = student("a", "aaaaaaaaaa", "", "", "");
        let b = student("b", "aaaaaaaabb", "", "", "");
        let c = student("c", "aaaaaabbbb", "", "", "");

        let detector = DuplicateDetector::new();
        assert!(detector.compare_fields(&a, &c).is_empty());

        let groups = detector.find_duplicates(
            &[a.clone(), b.clone(), c.clone()],
            &DetectionOptions::default(),
        );

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].students.len(), 3);
    }

    #[test]
    fn test_no_duplicate_members_when_triangle_closes() {
        // All three names pairwise similar: (a,b) creates the group,
        // (a,c) appends c, (b,c) is dropped with both sides grouped
        let a = student("a", "Maria Silva", "", "", "");
        let b = student("b", "Maria Sylva", "", "", "");
        let c = student("c", "Maria Silvas", "", "", "");

        let groups = find_duplicates(&[a, b, c], &DetectionOptions::default());

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].students.len(), 3);

        let mut ids: Vec<&str> = groups[0].students.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_pair_between_two_existing_groups_is_dropped() {
        // (a,c) and (b,d) form two groups via distinct emails; the late
        // (c,d) CPF pair finds both sides grouped and is dropped
        let a = student("a", "", "turma1@x.com", "", "");
        let b = student("b", "", "turma2@y.com", "", "");
        let c = student("c", "", "turma1@x.com", "", "111.444.777-35");
        let d = student("d", "", "turma2@y.com", "", "11144477735");

        let groups = find_duplicates(&[a, b, c, d], &DetectionOptions::default());

        assert_eq!(groups.len(), 2);
        for group in &groups {
            assert_eq!(group.students.len(), 2);
        }
    }

    #[test]
    fn test_short_cpf_is_skipped() {
        // 10 digits on one side: below the 11-digit minimum, so no match
        // even though the similarity would clear the threshold
        let a = student("1", "", "", "", "123.456.789-0");
        let b = student("2", "", "", "", "12345678901");

        let groups = find_duplicates(&[a, b], &DetectionOptions::default());
        assert!(groups.is_empty());
    }

    #[test]
    fn test_short_phone_is_skipped() {
        let a = student("1", "", "", "9999-888", "");
        let b = student("2", "", "", "9999-888", "");

        let groups = find_duplicates(&[a, b], &DetectionOptions::default());
        assert!(groups.is_empty());
    }

    #[test]
    fn test_include_exact_only_rejects_fuzzy_pairs() {
        // Name similarity 91 (high, not exact)
        let a = student("1", "maria silva", "", "", "");
        let b = student("2", "maria silvo", "", "", "");

        let fuzzy = find_duplicates(&[a.clone(), b.clone()], &DetectionOptions::default());
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].overall_similarity, 91);

        let options = DetectionOptions {
            include_exact_only: true,
            ..Default::default()
        };
        assert!(find_duplicates(&[a, b], &options).is_empty());
    }

    #[test]
    fn test_min_similarity_floor() {
        // "abcd" vs "abce": similarity 75, above the name threshold of 70
        let a = student("1", "abcd", "", "", "");
        let b = student("2", "abce", "", "", "");

        assert_eq!(
            find_duplicates(&[a.clone(), b.clone()], &DetectionOptions::default()).len(),
            1
        );

        let options = DetectionOptions {
            min_similarity: 80,
            ..Default::default()
        };
        assert!(find_duplicates(&[a, b], &options).is_empty());
    }

    #[test]
    fn test_groups_sorted_by_similarity_descending() {
        // Three disjoint pairs: email exact (100), name distance 1 of 11
        // (91), name distance 2 of 10 (80)
        let records = vec![
            student("1", "abcdefghij", "", "", ""),
            student("2", "abcdefghxy", "", "", ""),
            student("3", "maria silva", "", "", ""),
            student("4", "maria silvo", "", "", ""),
            student("5", "", "exato@x.com", "", ""),
            student("6", "", "exato@x.com", "", ""),
        ];

        let groups = find_duplicates(&records, &DetectionOptions::default());

        let similarities: Vec<u8> = groups.iter().map(|g| g.overall_similarity).collect();
        assert_eq!(similarities, vec![100, 91, 80]);
    }

    #[test]
    fn test_stats_on_empty_input() {
        let stats = duplicate_stats(&[]);

        assert_eq!(stats.total_groups, 0);
        assert_eq!(stats.total_duplicates, 0);
        assert_eq!(stats.exact_matches, 0);
        assert_eq!(stats.high_similarity, 0);
        assert_eq!(stats.medium_similarity, 0);
        assert_eq!(stats.low_similarity, 0);
        assert!(stats.by_field.is_empty());
    }

    #[test]
    fn test_stats_aggregation() {
        let records = vec![
            student("1", "", "exato@x.com", "", ""),
            student("2", "", "exato@x.com", "", ""),
            student("3", "maria silva", "", "", ""),
            student("4", "maria silvo", "", "", ""),
            student("5", "abcd", "", "", ""),
            student("6", "abce", "", "", ""),
        ];

        let groups = find_duplicates(&records, &DetectionOptions::default());
        let stats = duplicate_stats(&groups);

        assert_eq!(stats.total_groups, 3);
        assert_eq!(stats.total_duplicates, 6);
        assert_eq!(stats.exact_matches, 1); // email pair at 100
        assert_eq!(stats.high_similarity, 1); // name pair at 91
        assert_eq!(stats.medium_similarity, 1); // name pair at 75
        assert_eq!(stats.low_similarity, 0);

        assert_eq!(stats.by_field.get("Email"), Some(&1));
        assert_eq!(stats.by_field.get("Name"), Some(&2));
    }

    #[test]
    fn test_missing_fields_never_match_or_panic() {
        let a = student("1", "", "", "", "");
        let b = student("2", "Maria Silva", "m@x.com", "11999998888", "11144477735");

        assert!(find_duplicates(&[a, b], &DetectionOptions::default()).is_empty());
    }
}
