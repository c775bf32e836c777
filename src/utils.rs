// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Appends a property key to a dotted path, quoting keys that are not plain
/// identifiers.
pub(crate) fn join_key(path: &str, key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !plain {
        format!("{path}[{key:?}]")
    } else if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Returns the candidate nearest to `x` by Levenshtein distance, or None if
/// none were promising. Case and underscores are ignored when matching, so
/// `envVars` is near `env_vars`.
pub(crate) fn nearest<'a>(
    x: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let folded = fold(x);

    let mut best = None;
    // Allow up to 50% typos.
    let mut best_d = (folded.len() + 1) / 2;
    for c in candidates {
        let d = levenshtein(&folded, &fold(c), best_d);
        if d < best_d {
            best_d = d;
            best = Some(c);
        }
    }
    best
}

fn fold(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// The Levenshtein edit distance between x and y, computed over a single
/// row. May return early with an approximate value greater than `max`.
fn levenshtein(x: &str, y: &str, max: usize) -> usize {
    let x: Vec<char> = x.chars().collect();
    let y: Vec<char> = y.chars().collect();

    let (x, y) = if x.len() > y.len() { (y, x) } else { (x, y) };

    if y.len() - x.len() > max {
        return max + 1;
    }

    let mut row: Vec<usize> = (0..=x.len()).collect();
    for (j, yc) in y.iter().enumerate() {
        let mut prev = row[0];
        row[0] = j + 1;
        let mut row_min = row[0];
        for (i, xc) in x.iter().enumerate() {
            let cost = if xc == yc { prev } else { prev + 1 };
            prev = row[i + 1];
            row[i + 1] = cost.min(row[i] + 1).min(prev + 1);
            row_min = row_min.min(row[i + 1]);
        }
        if row_min > max {
            return max + 1;
        }
    }
    row[x.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_finds_close_match() {
        assert_eq!(nearest("strigs", ["strings", "numbers"]), Some("strings"));
    }

    #[test]
    fn nearest_ignores_case_and_underscores() {
        assert_eq!(nearest("envvars", ["env_Vars", "files"]), Some("env_Vars"));
    }

    #[test]
    fn nearest_rejects_distant_candidates() {
        assert_eq!(nearest("abc", ["wxyz"]), None);
    }

    #[test]
    fn exact_match_is_distance_zero() {
        assert_eq!(levenshtein("same", "same", 2), 0);
    }
}
