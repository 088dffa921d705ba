//! Fuzzy substring matching for citation re-localization.
//!
//! OCR noise and model paraphrase mean a citation's text is often not an
//! exact substring of its page. Scores are partial-ratio style on a 0-100
//! scale: the best alignment of the shorter string inside the longer one.

/// Lowercase and collapse whitespace.
pub fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Partial-ratio similarity in [0, 100]: the best normalized edit
/// similarity of the shorter string against same-length windows of the
/// longer one.
pub fn partial_ratio(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    let long_chars: Vec<char> = long.chars().collect();
    let short_len = short.chars().count();

    if short_len >= long_chars.len() {
        return (strsim::normalized_levenshtein(short, long) * 100.0) as f32;
    }

    let mut best = 0.0f32;
    for start in 0..=(long_chars.len() - short_len) {
        let window: String = long_chars[start..start + short_len].iter().collect();
        let score = (strsim::normalized_levenshtein(short, &window) * 100.0) as f32;
        if score > best {
            best = score;
            if best >= 99.5 {
                break;
            }
        }
    }
    best
}

/// Find the best fuzzy occurrence of `needle` inside `haystack`.
///
/// Short needles (<20 normalized chars) require exact containment — a
/// partial-ratio over a handful of characters says nothing. Longer needles
/// slide a window across the haystack (stride 10, window size needle+20)
/// and keep the best partial-ratio score, early-exiting above
/// `early_exit` for high-confidence matches.
pub fn find_in_text(needle: &str, haystack: &str, early_exit: f32) -> f32 {
    if needle.is_empty() || haystack.is_empty() {
        return 0.0;
    }

    let needle_clean = normalize(needle);
    let haystack_clean = normalize(haystack);

    if needle_clean.chars().count() < 20 {
        return if haystack_clean.contains(&needle_clean) {
            100.0
        } else {
            0.0
        };
    }

    if haystack_clean.contains(&needle_clean) {
        return 100.0;
    }

    let hay_chars: Vec<char> = haystack_clean.chars().collect();
    let needle_len = needle_clean.chars().count();
    let window_len = needle_len + 20;

    let mut best = 0.0f32;
    let mut start = 0usize;
    while start < hay_chars.len() {
        let end = (start + window_len).min(hay_chars.len());
        let window: String = hay_chars[start..end].iter().collect();
        let score = partial_ratio(&needle_clean, &window);
        if score > best {
            best = score;
            if best > early_exit {
                break;
            }
        }
        if end == hay_chars.len() {
            break;
        }
        start += 10;
    }
    best
}

/// Best-scoring sentence of `text` against `target`, with its score.
/// Used for sentence-level citation text replacement.
pub fn best_sentence_match(target: &str, text: &str) -> Option<(String, f32)> {
    let mut best: Option<(String, f32)> = None;
    for sentence in split_sentences(text) {
        let trimmed = sentence.trim();
        if trimmed.is_empty() {
            continue;
        }
        let score = partial_ratio(&normalize(target), &normalize(trimmed));
        if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
            best = Some((trimmed.to_string(), score));
        }
    }
    best
}

/// Split on sentence terminators followed by whitespace. The returned
/// slices are raw page text, so a chosen sentence remains an exact
/// substring of the page.
fn split_sentences(text: &str) -> Vec<&str> {
    use std::sync::OnceLock;
    static SENT_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SENT_RE.get_or_init(|| regex::Regex::new(r"[.!?]\s+").expect("sentence regex"));

    let mut out = Vec::new();
    let mut last = 0usize;
    for m in re.find_iter(text) {
        // Keep the terminator, drop the trailing whitespace.
        out.push(&text[last..m.start() + 1]);
        last = m.end();
    }
    if last < text.len() {
        out.push(&text[last..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn identical_strings_score_100() {
        assert!(partial_ratio("the trustee shall act", "the trustee shall act") >= 99.5);
    }

    #[test]
    fn contained_substring_scores_100() {
        let page = "Preamble text. The trustee shall distribute income annually. More text.";
        assert!(partial_ratio("The trustee shall distribute income", page) >= 99.5);
    }

    #[test]
    fn unrelated_strings_score_low() {
        let score = partial_ratio(
            "the trustee shall distribute income",
            "zebra quantum xylophone matrix",
        );
        assert!(score < 50.0, "got {score}");
    }

    #[test]
    fn short_needle_requires_exact_containment() {
        assert_eq!(find_in_text("trustee", "the trustee shall act", 95.0), 100.0);
        assert_eq!(find_in_text("trustee", "no match here at all", 95.0), 0.0);
    }

    #[test]
    fn ocr_noise_still_matches_above_threshold() {
        let citation = "the trustee shall distribute all net income to the beneficiary";
        // OCR noise: dropped and substituted characters.
        let page = "Provisions follow. the trustee sha1l distribute a1l net incorne to the \
                    beneficiary each year. End of page.";
        let score = find_in_text(citation, page, 95.0);
        assert!(score > 80.0, "got {score}");
    }

    #[test]
    fn whitespace_and_case_are_ignored(){
        let score = find_in_text(
            "The   Trustee SHALL distribute income to them",
            "preface… the trustee shall distribute income to them. after",
            95.0,
        );
        assert!(score >= 99.5, "got {score}");
    }

    #[test]
    fn best_sentence_match_picks_the_right_sentence() {
        let page = "The grantor is Jane Doe. The trustee shall distribute income quarterly. \
                    This trust is irrevocable.";
        let (sentence, score) =
            best_sentence_match("trustee shall distribute income every quarter", page).unwrap();
        assert!(sentence.contains("distribute income quarterly"), "got {sentence}");
        assert!(score > 70.0);
        // The chosen sentence is an exact substring of the page, so a
        // corrected citation revalidates exactly.
        assert!(page.contains(&sentence));
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(partial_ratio("", "x"), 0.0);
        assert_eq!(find_in_text("", "x", 95.0), 0.0);
        assert_eq!(find_in_text("x", "", 95.0), 0.0);
    }

    proptest! {
        /// Scores stay within [0, 100] on arbitrary input.
        #[test]
        fn scores_bounded(a in "\\PC{0,60}", b in "\\PC{0,200}") {
            let p = partial_ratio(&a, &b);
            prop_assert!((0.0..=100.0).contains(&p));
            let f = find_in_text(&a, &b, 95.0);
            prop_assert!((0.0..=100.0).contains(&f));
        }

        /// A needle embedded verbatim in a long haystack is always found.
        #[test]
        fn verbatim_embedding_found(pad_a in "[a-z ]{0,80}", pad_b in "[a-z ]{0,80}") {
            let needle = "the trustee shall distribute the remaining principal";
            let haystack = format!("{pad_a} {needle} {pad_b}");
            prop_assert!(find_in_text(needle, &haystack, 95.0) >= 99.5);
        }
    }
}
