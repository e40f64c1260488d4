//! Canonical body identity

use crate::types::IdentityFamily;

/// Lowercase, drop parenthesised designations and a leading catalog number,
/// collapse whitespace: `"  433 Eros (A898 PA)"` becomes `"eros"`
pub fn normalize_name(name: &str) -> String {
    let mut stripped = String::with_capacity(name.len());
    let mut depth = 0usize;
    for ch in name.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.extend(ch.to_lowercase()),
            _ => {}
        }
    }

    let mut words: Vec<&str> = stripped.split_whitespace().collect();
    // Numbered names like "433 Eros"; provisional designations ("2015 TC25") keep the year
    if words.len() > 1
        && words[0].chars().all(|c| c.is_ascii_digit())
        && !words[1].chars().any(|c| c.is_ascii_digit())
    {
        words.remove(0);
    }
    if words.is_empty() {
        // Names that are only a designation, e.g. "(2015 TC25)"
        let bare: String = name
            .chars()
            .filter(|c| *c != '(' && *c != ')')
            .flat_map(char::to_lowercase)
            .collect();
        return bare.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    words.join(" ")
}

/// Canonical id: the catalog number when known, else `family:normalized-name`
pub fn canonical_id(catalog_id: Option<u64>, family: IdentityFamily, name_key: &str) -> String {
    match catalog_id {
        Some(id) => id.to_string(),
        None => format!("{}:{}", family.as_str(), name_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  433 Eros (A898 PA)"), "eros");
        assert_eq!(normalize_name("1 Ceres"), "ceres");
        assert_eq!(normalize_name("Io"), "io");
        assert_eq!(normalize_name("85   Io"), "io");
        assert_eq!(normalize_name("(2015 TC25)"), "2015 tc25");
        assert_eq!(normalize_name("2015 TC25"), "2015 tc25");
        assert_eq!(normalize_name("1P/Halley"), "1p/halley");
        assert_eq!(normalize_name("99942"), "99942");
    }

    #[test]
    fn test_canonical_id_keeps_families_apart() {
        let moon = canonical_id(None, IdentityFamily::Satellite, "io");
        let asteroid = canonical_id(None, IdentityFamily::SmallBody, "io");
        assert_ne!(moon, asteroid);
        assert_eq!(canonical_id(Some(2_000_085), IdentityFamily::SmallBody, "io"), "2000085");
    }
}
