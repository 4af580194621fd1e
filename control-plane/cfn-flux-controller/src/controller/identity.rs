use sha2::{Digest, Sha256};

/// CloudFormation's limit on change set names.
pub const MAX_CHANGE_SET_NAME_LEN: usize = 128;
const HASH_LEN: usize = 16;

/// Deterministic change set name for a generation and source revision.
///
/// Characters outside `[A-Za-z0-9-]` become `-`, so revisions differing only
/// in separators (`a@b:c`, `a/b:c`) share a name. Flux revisions embed the
/// commit or content digest, which keeps that from happening between two
/// revisions of one source. Names that would exceed the
/// provider limit keep a prefix of the revision and end with 16 hex
/// characters of the revision's SHA-256, so distinct long revisions still
/// get distinct names.
pub fn change_set_name(generation: i64, revision: &str) -> String {
    let head = format!("flux-{generation}-");
    if revision.is_empty() {
        return format!("{head}unknown");
    }
    let token: String = revision
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    if head.len() + token.len() <= MAX_CHANGE_SET_NAME_LEN {
        return format!("{head}{token}");
    }

    let hash = format!("{:x}", Sha256::digest(revision.as_bytes()));
    let keep = MAX_CHANGE_SET_NAME_LEN.saturating_sub(head.len() + 1 + HASH_LEN);
    // token is ASCII after normalisation, so byte slicing is safe
    format!("{head}{}-{}", &token[..keep.min(token.len())], &hash[..HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_flux_revisions() {
        assert_eq!(
            change_set_name(3, "main@sha1:0123abcd"),
            "flux-3-main-sha1-0123abcd"
        );
        assert_eq!(
            change_set_name(1, "v1.2.0/sha256:ff"),
            "flux-1-v1-2-0-sha256-ff"
        );
        assert_eq!(change_set_name(7, ""), "flux-7-unknown");
    }

    #[test]
    fn is_deterministic_and_sensitive_to_both_inputs() {
        let a = change_set_name(2, "main@sha1:abc");
        assert_eq!(a, change_set_name(2, "main@sha1:abc"));
        assert_ne!(a, change_set_name(3, "main@sha1:abc"));
        assert_ne!(a, change_set_name(2, "main@sha1:abd"));
    }

    #[test]
    fn long_revisions_are_cut_to_the_limit_with_a_hash() {
        let long_a = format!("refs/heads/{}@sha1:aaa", "x".repeat(200));
        let long_b = format!("refs/heads/{}@sha1:bbb", "x".repeat(200));
        let a = change_set_name(12, &long_a);
        let b = change_set_name(12, &long_b);
        assert_eq!(a.len(), MAX_CHANGE_SET_NAME_LEN);
        assert_eq!(b.len(), MAX_CHANGE_SET_NAME_LEN);
        assert!(a.starts_with("flux-12-refs-heads-xxx"));
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn separators_normalise_to_the_same_dash() {
        assert_eq!(change_set_name(4, "a@b:c"), change_set_name(4, "a/b:c"));
        assert_ne!(
            change_set_name(4, "main@sha1:0123abcd"),
            change_set_name(4, "main@sha1:0123abce")
        );
    }

    #[test]
    fn non_ascii_characters_are_replaced_one_for_one() {
        assert_eq!(change_set_name(1, "feätüre"), "flux-1-fe-t-re");
    }
}
