//! Parsing of the engine's isotope summary string.

use std::collections::BTreeMap;

/// Splits `"Cs137(H)+Ba133(F)"` into `{Cs137: H, Ba133: F}`.
///
/// `None` entries are skipped; a name without a confidence maps to `""`.
pub fn parse_isotope_confidences(isotope_string: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for entry in isotope_string.split('+') {
        let entry = entry.trim();
        if entry.is_empty() || entry.eq_ignore_ascii_case("none") {
            continue;
        }

        let (name, confidence) = match (entry.find('('), entry.rfind(')')) {
            (Some(open), Some(close)) if close > open => {
                (entry[..open].trim(), entry[open + 1..close].trim())
            }
            (Some(open), _) => (entry[..open].trim(), entry[open + 1..].trim()),
            _ => (entry, ""),
        };
        out.insert(name.to_string(), confidence.to_string());
    }
    out
}

/// Splits a comma-separated engine list, dropping empty entries.
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confidences() {
        let parsed = parse_isotope_confidences("Cs137(H)+Ba133(F) + U235(L)");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["Cs137"], "H");
        assert_eq!(parsed["Ba133"], "F");
        assert_eq!(parsed["U235"], "L");
    }

    #[test]
    fn test_parse_none_and_bare_names() {
        assert!(parse_isotope_confidences("None").is_empty());
        assert!(parse_isotope_confidences("").is_empty());
        let parsed = parse_isotope_confidences("NONE+Co60");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["Co60"], "");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("Cs137, Ba133,"), vec!["Cs137", "Ba133"]);
        assert!(split_list("").is_empty());
    }
}
