//! Search keywords derived from entity names.

const MAX_KEYWORDS: usize = 30;

/// Splits camelCase, snake_case and SCREAMING_CASE names into lowercase
/// keywords, plus every segment of the qualified name. Order preserved,
/// duplicates dropped, capped at thirty.
pub fn keywords_for(name: &str, qualified_name: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |word: &str| {
        let word = word.to_lowercase();
        if word.len() > 1 && !out.contains(&word) && out.len() < MAX_KEYWORDS {
            out.push(word);
        }
    };

    push(name);
    for word in split_words(name) {
        push(&word);
    }
    for segment in qualified_name.split(['\\', '.', ':']) {
        if segment.is_empty() || segment == name {
            continue;
        }
        push(segment);
        for word in split_words(segment) {
            push(&word);
        }
    }
    out
}

fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
