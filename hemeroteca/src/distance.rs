//! Edit distance used by the direct-scan matcher

/// Maximum accepted edits for a query of `len` characters: `round(0.4 * len)`.
pub fn fuzzy_threshold(len: usize) -> usize {
    (4 * len + 5) / 10
}

/// Length slack used to prune candidates: `floor(0.4 * len)`.
pub fn length_slack(len: usize) -> usize {
    4 * len / 10
}

/// Damerau-Levenshtein edit distance (optimal string alignment) with threshold pruning.
/// Counts insertions, deletions, substitutions, and adjacent transpositions each as 1 edit.
/// Returns `Some(distance)` if distance <= max_dist, `None` otherwise.
pub fn edit_distance_bounded(a: &str, b: &str, max_dist: usize) -> Option<usize> {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    osa_distance_bounded(&a_chars, &b_chars, max_dist)
}

/// Same as [`edit_distance_bounded`] over pre-split characters.
pub fn osa_distance_bounded(a: &[char], b: &[char], max_dist: usize) -> Option<usize> {
    let m = a.len();
    let n = b.len();

    if m.abs_diff(n) > max_dist {
        return None;
    }

    let mut prev2 = vec![0usize; n + 1];
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        let mut row_min = curr[0];

        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);

            if i >= 2 && j >= 2 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                curr[j] = curr[j].min(prev2[j - 2] + 1);
            }

            row_min = row_min.min(curr[j]);
        }

        // A full row over the limit can only grow from here
        if row_min > max_dist {
            return None;
        }

        std::mem::swap(&mut prev2, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    let result = prev[n];
    (result <= max_dist).then_some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(fuzzy_threshold(4), 2);
        assert_eq!(fuzzy_threshold(3), 1);
        assert_eq!(fuzzy_threshold(5), 2);
        assert_eq!(fuzzy_threshold(7), 3);
        assert_eq!(fuzzy_threshold(1), 0);
        assert_eq!(length_slack(4), 1);
        assert_eq!(length_slack(5), 2);
        assert_eq!(length_slack(2), 0);
    }

    #[test]
    fn test_edit_distance_exact() {
        assert_eq!(edit_distance_bounded("agua", "agua", 2), Some(0));
    }

    #[test]
    fn test_edit_distance_one_deletion() {
        assert_eq!(edit_distance_bounded("higine", "higiene", 1), Some(1));
    }

    #[test]
    fn test_edit_distance_one_substitution() {
        assert_eq!(edit_distance_bounded("cordon", "cordón", 1), Some(1));
    }

    #[test]
    fn test_edit_distance_exceeds_threshold() {
        assert_eq!(edit_distance_bounded("agua", "peste", 2), None);
    }

    #[test]
    fn test_edit_distance_length_prune() {
        assert_eq!(edit_distance_bounded("rey", "reyezuelo", 2), None);
    }

    #[test]
    fn test_edit_distance_empty_strings() {
        assert_eq!(edit_distance_bounded("", "", 0), Some(0));
        assert_eq!(edit_distance_bounded("ab", "", 2), Some(2));
        assert_eq!(edit_distance_bounded("abc", "", 2), None);
    }

    #[test]
    fn test_edit_distance_transposition() {
        assert_eq!(edit_distance_bounded("invasoin", "invasion", 1), Some(1));
        assert_eq!(edit_distance_bounded("gaua", "agua", 1), Some(1));
    }

    #[test]
    fn test_agua_boundary() {
        let max = fuzzy_threshold("Agua".chars().count());
        assert_eq!(max, 2);
        assert_eq!(edit_distance_bounded("Agua", "Aguas", max), Some(1));
        assert_eq!(edit_distance_bounded("Agua", "Agxy", max), Some(2));
        assert_eq!(edit_distance_bounded("Agua", "Axyz", max), None);
    }

    #[test]
    fn test_edit_distance_is_case_sensitive() {
        assert_eq!(edit_distance_bounded("Agua", "agua", 2), Some(1));
    }
}
