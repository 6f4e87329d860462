use serde::Serialize;

/// A record the matcher may bind a fetched listing to.
#[derive(Debug, Clone, Copy)]
pub struct MatchCandidate<'a> {
    pub id: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub record_id: String,
    pub similarity: f64,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Containment,
    Fuzzy,
}

/// Containment in either direction scores at least this much, even when
/// the edit distance says otherwise. "Nike Hoodie" inside
/// "Nike Hoodie XL Blue" is a far stronger signal than the raw distance
/// between the two strings suggests.
const CONTAINMENT_FLOOR: f64 = 0.85;

/// Picks the existing record whose title best matches `title`, or `None`
/// when nothing reaches `threshold`.
///
/// Tiers, cheapest first: exact equality after trim + lowercase returns
/// immediately at 1.0; containment either way floors the score at 0.85;
/// otherwise normalized Levenshtein similarity. The first candidate with
/// the highest score wins ties.
pub fn find_best_match(
    title: &str,
    candidates: &[MatchCandidate<'_>],
    threshold: f64,
) -> Option<MatchResult> {
    let query = normalize(title);
    let mut best: Option<MatchResult> = None;

    for candidate in candidates {
        let other = normalize(candidate.title);
        if query == other {
            return Some(MatchResult {
                record_id: candidate.id.to_string(),
                similarity: 1.0,
                kind: MatchKind::Exact,
            });
        }

        let mut score = similarity_normalized(&query, &other);
        let mut kind = MatchKind::Fuzzy;
        if !query.is_empty() && !other.is_empty() && (other.contains(&query) || query.contains(&other))
        {
            score = score.max(CONTAINMENT_FLOOR);
            kind = MatchKind::Containment;
        }

        if best.as_ref().is_none_or(|b| score > b.similarity) {
            best = Some(MatchResult {
                record_id: candidate.id.to_string(),
                similarity: score,
                kind,
            });
        }
    }

    best.filter(|found| found.similarity >= threshold)
}

/// Similarity in `[0, 1]` between two raw titles: 1.0 for equality after
/// trim + lowercase, otherwise `1 - distance / longer_length`.
pub fn similarity(a: &str, b: &str) -> f64 {
    similarity_normalized(&normalize(a), &normalize(b))
}

fn similarity_normalized(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    if a_len == 0 || b_len == 0 {
        return 0.0;
    }
    let distance = levenshtein(a, b);
    1.0 - distance as f64 / a_len.max(b_len) as f64
}

fn normalize(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Classic two-row edit distance over characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates<'a>(titles: &'a [(&'a str, &'a str)]) -> Vec<MatchCandidate<'a>> {
        titles
            .iter()
            .map(|(id, title)| MatchCandidate { id, title })
            .collect()
    }

    #[test]
    fn exact_match_ignores_case_and_edge_whitespace() {
        let pool = candidates(&[("a", "Nike Polo XL"), ("b", "nike polo xl ")]);
        let found = find_best_match("Nike Polo XL", &pool, 0.95).expect("match");
        assert_eq!(found.record_id, "a");
        assert_eq!(found.similarity, 1.0);
        assert_eq!(found.kind, MatchKind::Exact);
    }

    #[test]
    fn exact_match_short_circuits_on_first_hit() {
        let pool = candidates(&[("first", "Vintage Tee"), ("second", "vintage tee")]);
        let found = find_best_match("Vintage Tee", &pool, 0.8).expect("match");
        assert_eq!(found.record_id, "first");
    }

    #[test]
    fn containment_floors_the_score() {
        let pool = candidates(&[("h1", "Nike Hoodie XL Blue")]);
        let found = find_best_match("Nike Hoodie", &pool, 0.8).expect("match");
        assert_eq!(found.kind, MatchKind::Containment);
        assert!(found.similarity >= 0.85);
    }

    #[test]
    fn containment_works_in_both_directions() {
        let pool = candidates(&[("short", "Levi's 501")]);
        let found = find_best_match("Levi's 501 Jeans 34x32", &pool, 0.8).expect("match");
        assert_eq!(found.kind, MatchKind::Containment);
    }

    #[test]
    fn near_duplicate_scores_by_edit_distance() {
        let score = similarity("Nike Air Max 90", "Nike Air Max 91");
        assert!((score - 14.0 / 15.0).abs() < 1e-9);
        let pool = candidates(&[("m", "Nike Air Max 91"), ("x", "Leather Wallet")]);
        let found = find_best_match("Nike Air Max 90", &pool, 0.9).expect("match");
        assert_eq!(found.record_id, "m");
        assert_eq!(found.kind, MatchKind::Fuzzy);
    }

    #[test]
    fn unrelated_titles_fall_below_threshold() {
        let pool = candidates(&[("x", "Blue Jeans")]);
        assert!(find_best_match("Red Scarf", &pool, 0.8).is_none());
    }

    #[test]
    fn threshold_is_inclusive() {
        let pool = candidates(&[("h1", "Nike Hoodie XL Blue")]);
        assert!(find_best_match("Nike Hoodie", &pool, 0.85).is_some());
    }

    #[test]
    fn empty_query_matches_nothing_nonempty() {
        let pool = candidates(&[("x", "Anything")]);
        assert!(find_best_match("   ", &pool, 0.5).is_none());
        assert_eq!(similarity("", "Anything"), 0.0);
    }

    #[test]
    fn best_score_wins_across_candidates() {
        let pool = candidates(&[("far", "Corduroy Pants"), ("near", "Nike Air Max 90 ")]);
        let found = find_best_match("nike air max 90", &pool, 0.8).expect("match");
        assert_eq!(found.record_id, "near");
        assert_eq!(found.similarity, 1.0);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
