use serde::Serialize;
use strsim::jaro_winkler;

use crate::parser::clean_title;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            Confidence::High
        } else if score >= 0.85 {
            Confidence::Medium
        } else if score >= 0.70 {
            Confidence::Low
        } else {
            Confidence::None
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct TitleMatch {
    pub title: String,
    pub score: f64,
    pub confidence: Confidence,
}

/// Roman numerals II..IX. A bare `X` is deliberately absent so titles like
/// "Malcolm X" survive untouched.
const ROMAN: &[(&str, &str)] = &[
    ("ii", "2"),
    ("iii", "3"),
    ("iv", "4"),
    ("v", "5"),
    ("vi", "6"),
    ("vii", "7"),
    ("viii", "8"),
    ("ix", "9"),
];

/// Clean a title and substitute space-bounded roman numerals, skipping the
/// first word so "V for Vendetta" keeps its V.
fn normalize(title: &str) -> String {
    let cleaned = clean_title(title);
    cleaned
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                return word.to_string();
            }
            ROMAN
                .iter()
                .find(|(roman, _)| *roman == word)
                .map(|(_, arabic)| arabic.to_string())
                .unwrap_or_else(|| word.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn numbers(normalized: &str) -> Vec<u64> {
    normalized
        .split_whitespace()
        .filter_map(|w| w.parse().ok())
        .collect()
}

/// Weight the similarity by sequence-number agreement so "Rocky III" does
/// not swallow "Rocky II" on string distance alone.
fn adjust(score: f64, parsed: &[u64], candidate: &[u64]) -> f64 {
    if parsed.is_empty() {
        return score;
    }
    if candidate.is_empty() {
        return score * 0.85;
    }
    if parsed.iter().any(|n| candidate.contains(n)) {
        (score * 1.05).min(1.0)
    } else {
        score * 0.90
    }
}

/// Find the library title best matching a parsed release title.
pub fn match_title(parsed: &str, candidates: &[String]) -> TitleMatch {
    let parsed_norm = normalize(parsed);
    let parsed_numbers = numbers(&parsed_norm);
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let candidate_norm = normalize(candidate);
        let score = jaro_winkler(&parsed_norm, &candidate_norm);
        let score = adjust(score, &parsed_numbers, &numbers(&candidate_norm));
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    match best {
        Some((i, score)) if Confidence::from_score(score) != Confidence::None => TitleMatch {
            title: candidates[i].clone(),
            score,
            confidence: Confidence::from_score(score),
        },
        Some((_, score)) => TitleMatch {
            title: String::new(),
            score,
            confidence: Confidence::None,
        },
        None => TitleMatch {
            title: String::new(),
            score: 0.0,
            confidence: Confidence::None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_is_high() {
        let result = match_title("The Walking Dead", &titles(&["The Walking Dead"]));
        assert_eq!(Confidence::High, result.confidence);
        assert_eq!("The Walking Dead", result.title);
    }

    #[test]
    fn sequel_number_agreement() {
        let result = match_title(
            "Back to the Future 2",
            &titles(&["Back to the Future Part II"]),
        );
        assert!(result.score >= 0.85, "score was {}", result.score);
        assert!(result.confidence >= Confidence::Medium);
    }

    #[test]
    fn roman_numeral_guard() {
        // Final X is not a numeral; the match must stay exact.
        let result = match_title("Malcolm X", &titles(&["Malcolm X"]));
        assert_eq!(Confidence::High, result.confidence);
        assert!((result.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn numbered_parse_against_plain_candidate_is_discounted() {
        let plain = match_title("Alien", &titles(&["Alien"]));
        let numbered = match_title("Alien 3", &titles(&["Alien"]));
        assert!(numbered.score < plain.score);
    }

    #[test]
    fn unrelated_titles_return_empty() {
        let result = match_title("Completely Different Thing", &titles(&["The Office"]));
        assert_eq!(Confidence::None, result.confidence);
        assert_eq!("", result.title);
    }

    #[test]
    fn picks_best_of_many() {
        let result = match_title(
            "The Office US",
            &titles(&["The Office (UK)", "The Office (US)", "Office Space"]),
        );
        assert_eq!("The Office (US)", result.title);
    }
}
