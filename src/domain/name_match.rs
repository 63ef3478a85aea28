//! Fuzzy comparison of a claimed account holder name against the legal name a
//! bank returns. Banks commonly return "SURNAME FIRSTNAME MIDDLE" in upper
//! case, so both names are normalised and also compared token-sorted.

const HONORIFICS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "dr", "prof", "chief", "alhaji", "alhaja", "engr", "sir",
    "madam", "rev", "pastor",
];

const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv"];

pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();

    cleaned
        .split_whitespace()
        .filter(|token| !HONORIFICS.contains(token) && !SUFFIXES.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sorted_tokens(normalized: &str) -> String {
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// `2 * LCS / (len_a + len_b)` over characters; 1.0 for identical strings.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];

    (2 * lcs) as f64 / total as f64
}

/// Best of the in-order and token-sorted similarity of the normalised names.
pub fn name_similarity(claimed: &str, resolved: &str) -> f64 {
    let claimed = normalize_name(claimed);
    let resolved = normalize_name(resolved);
    if claimed.is_empty() || resolved.is_empty() {
        return 0.0;
    }

    let direct = similarity_ratio(&claimed, &resolved);
    let sorted = similarity_ratio(&sorted_tokens(&claimed), &sorted_tokens(&resolved));
    direct.max(sorted)
}
