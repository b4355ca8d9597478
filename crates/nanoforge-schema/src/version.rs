/// Pack the first four dot-separated components of a release version into
/// one comparable integer, each component zero-padded to four digits.
/// Returns `None` for non-numeric components.
pub fn release_precision(version: &str) -> Option<u64> {
    let mut packed = String::with_capacity(16);
    for part in version.split('.').take(4) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // Components longer than four digits would overflow the packing.
        if part.len() > 4 {
            return None;
        }
        packed.push_str(&format!("{part:0>4}"));
    }
    packed.parse().ok()
}

/// Whether the local release differs from the remote one at release
/// precision. Unparsable versions never report as outdated.
pub fn is_outdated(local: &str, remote: &str) -> bool {
    match (release_precision(local), release_precision(remote)) {
        (Some(l), Some(r)) => l != r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_components_zero_padded() {
        // "0.1.37" -> "0000" "0001" "0037" -> 10037
        assert_eq!(release_precision("0.1.37"), Some(10037));
        // "1.2.3.4" -> "0001" "0002" "0003" "0004"
        assert_eq!(release_precision("1.2.3.4"), Some(1_0002_0003_0004));
    }

    #[test]
    fn equal_versions_are_not_outdated() {
        assert!(!is_outdated("0.1.37", "0.1.37"));
    }

    #[test]
    fn differing_versions_are_outdated() {
        assert!(is_outdated("0.1.37", "0.1.38"));
        assert!(is_outdated("0.1.37.1", "0.1.37.2"));
    }

    #[test]
    fn only_first_four_components_matter() {
        assert!(!is_outdated("0.1.37.1.9", "0.1.37.1.8"));
    }

    #[test]
    fn unparsable_versions_never_report_outdated() {
        assert!(!is_outdated("0.0", "nightly"));
        assert!(!is_outdated("", "0.1.37"));
    }

    #[test]
    fn ordering_matches_numeric_intuition() {
        let older = release_precision("0.1.9").unwrap();
        let newer = release_precision("0.1.10").unwrap();
        assert!(older < newer);
    }
}
