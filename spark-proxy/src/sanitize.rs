//! Hostname segment derivation for per-user Spark masters.
//!
//! The cluster manager names each master service after the owning user,
//! sanitized to a DNS-1123 subdomain. The proxy has to derive the very same
//! name on its own, otherwise requests silently go to a host that does not
//! exist.

/// Maximum length of a DNS-1123 subdomain.
pub const MAX_NAME_LEN: usize = 253;

fn is_alnum(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

/// Maps an arbitrary name onto a DNS-1123 subdomain-safe string.
///
/// Lowercases, replaces anything outside `[a-z0-9.-]` with `-`, strips
/// non-alphanumeric runs at both ends, collapses repeated `-` and truncates
/// to 253 characters.
pub fn sanitize_k8s_name(name: &str) -> String {
    let replaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| if is_alnum(c) || c == '.' || c == '-' { c } else { '-' })
        .collect();

    let trimmed = replaced
        .trim_start_matches(|c: char| !is_alnum(c))
        .trim_end_matches(|c: char| !is_alnum(c));

    let mut sanitized = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(c);
    }

    // Only ASCII is left, so byte and char offsets agree.
    sanitized.truncate(MAX_NAME_LEN);
    sanitized
}
