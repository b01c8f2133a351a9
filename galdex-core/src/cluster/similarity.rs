//! Default title similarity metric.

use galdex_contracts::similarity::TitleSimilarity;

/// Lowercase, strip punctuation, collapse whitespace. Comparisons run on
/// this form so release-group decoration does not split clusters.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_space = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Jaro-Winkler over normalized titles: symmetric, reflexive, in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinklerSimilarity;

impl TitleSimilarity for JaroWinklerSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_decoration() {
        assert_eq!(normalize_title("Summer Pockets"), "summer pockets");
        assert_eq!(normalize_title("SUMMER-POCKETS!!"), "summer pockets");
        assert_eq!(normalize_title("  summer   pockets  "), "summer pockets");
    }

    #[test]
    fn metric_contract_holds() {
        let sim = JaroWinklerSimilarity;

        // Reflexive.
        assert!((sim.score("clannad", "clannad") - 1.0).abs() < 1e-9);
        // Symmetric.
        let ab = sim.score("clannad", "clannad side stories");
        let ba = sim.score("clannad side stories", "clannad");
        assert!((ab - ba).abs() < 1e-9);
        // Bounded.
        let far = sim.score("clannad", "completely different");
        assert!((0.0..=1.0).contains(&far));
        assert!((0.0..=1.0).contains(&ab));
    }

    #[test]
    fn near_duplicates_score_high() {
        let sim = JaroWinklerSimilarity;
        let score = sim.score(
            &normalize_title("Summer Pockets"),
            &normalize_title("Summer  Pockets!"),
        );
        assert!(score > 0.95, "score was {score}");

        let edition = sim.score(
            &normalize_title("Summer Pockets"),
            &normalize_title("Summer Pockets RB"),
        );
        assert!(edition > 0.88, "score was {edition}");
    }
}
