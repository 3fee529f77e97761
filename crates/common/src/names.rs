//! Naming rules shared by the controller.
//!
//! Domain syntax checks follow DNS-1123 subdomain rules with the extra
//! requirement of at least two labels. Record names are bounded by the
//! storage backend's 63 character limit.

use sha2::{Digest, Sha256};

/// Maximum length of a record name in the resource store.
pub const MAX_NAME_LENGTH: usize = 63;

/// Maximum length of a DNS-1123 subdomain.
const MAX_SUBDOMAIN_LENGTH: usize = 253;

/// Length of the hash suffix appended by [`limit`].
const HASH_LENGTH: usize = 5;

/// Check whether `name` is a fully-qualified domain name.
///
/// A single trailing dot is accepted. The remainder must be a lowercase
/// DNS-1123 subdomain of at most 253 characters with at least two labels.
pub fn is_fqdn(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_SUBDOMAIN_LENGTH {
        return false;
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    labels.iter().all(|label| is_dns1123_label(label))
}

fn is_dns1123_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
}

/// Bound `s` to fewer than `count` characters.
///
/// Strings shorter than `count` are returned unchanged. Longer strings are
/// cut and suffixed with `-` plus a short hash of the full input, so two
/// inputs that share a long prefix still map to different names.
pub fn limit(s: &str, count: usize) -> String {
    if s.len() < count {
        return s.to_string();
    }

    let keep = floor_char_boundary(s, count.saturating_sub(HASH_LENGTH + 1));
    format!("{}-{}", &s[..keep], short_hash(s))
}

fn short_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LENGTH);
    hex
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// First segment of an object uid (text before the first `-`).
pub fn uid_segment(uid: &str) -> &str {
    uid.split('-').next().unwrap_or(uid)
}

/// Deterministic TLS record name for an application domain.
///
/// Produces `<app>-tls-<domain>-<segment>`, truncating the
/// `<app>-tls-<domain>` prefix so the whole name fits
/// [`MAX_NAME_LENGTH`]. The trailing uid segment is always kept intact.
pub fn tls_secret_name(app_name: &str, domain: &str, segment: &str) -> String {
    let budget = MAX_NAME_LENGTH.saturating_sub(segment.len() + 1);
    format!("{}-{}", limit(&format!("{app_name}-tls-{domain}"), budget), segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_is_fqdn() {
        assert!(is_fqdn("app.example.com"));
        assert!(is_fqdn("app.example.com."));
        assert!(is_fqdn("a-b.c1.io"));

        assert!(!is_fqdn(""));
        assert!(!is_fqdn("localhost"));
        assert!(!is_fqdn("App.Example.com"));
        assert!(!is_fqdn("-app.example.com"));
        assert!(!is_fqdn("app..example.com"));
        assert!(!is_fqdn("*.example.com"));
        assert!(!is_fqdn("app_1.example.com"));
    }

    #[test]
    fn test_limit_short_input_unchanged() {
        assert_eq!(limit("short", 10), "short");
    }

    #[test]
    fn test_limit_long_input_hashed() {
        let limited = limit("abcdefghijklmnopqrstuvwxyz", 12);
        assert_eq!(limited.len(), 12);
        assert!(limited.starts_with("abcdef-"));
    }

    #[test]
    fn test_uid_segment() {
        assert_eq!(uid_segment("1a2b3c4d-5e6f-7081"), "1a2b3c4d");
        assert_eq!(uid_segment("nodash"), "nodash");
    }

    #[test]
    fn test_tls_secret_name_short() {
        assert_eq!(
            tls_secret_name("app", "app.example.com", "1a2b3c4d"),
            "app-tls-app.example.com-1a2b3c4d"
        );
    }

    #[test]
    fn test_tls_secret_name_distinguishes_shared_prefix() {
        let long = "a".repeat(60);
        let one = tls_secret_name("app", &format!("{long}.one.com"), "seg");
        let two = tls_secret_name("app", &format!("{long}.two.com"), "seg");
        assert_ne!(one, two);
        assert!(one.ends_with("-seg"));
    }

    proptest! {
        #[test]
        fn prop_tls_secret_name_bounded(
            app in "[a-z][a-z0-9-]{0,40}",
            domain in "[a-z0-9.-]{1,120}",
            segment in "[a-f0-9]{8}",
        ) {
            let name = tls_secret_name(&app, &domain, &segment);
            prop_assert!(name.len() <= MAX_NAME_LENGTH);
            let expected_suffix = format!("-{}", segment);
            prop_assert!(name.ends_with(&expected_suffix));
        }
    }
}
