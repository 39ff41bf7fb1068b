//! Derives object-store names from arbitrary keys.
//!
//! Address records are looked up by the name derived from their key (a
//! hostname, an app name, ...), so [`name`] must stay stable across releases:
//! changing it orphans every existing record.

use sha2::{Digest, Sha256};

/// Maximum length of a DNS-1123 subdomain.
pub const MAX_LEN: usize = 253;

const DIGEST_LEN: usize = 10;

/// Returns a DNS-1123 subdomain name identifying `key`.
///
/// Keys that are already legal names are returned unchanged. Other keys are
/// sanitized and suffixed with the first characters of the SHA-256 digest of
/// the original key, so that distinct keys that sanitize to the same prefix
/// still get distinct names.
pub fn name(key: &str) -> String {
    if is_dns1123_subdomain(key) {
        return key.to_string();
    }

    let sanitized = key
        .chars()
        .map(|c| if is_legal(c) { c } else { '-' })
        .collect::<String>();
    let sanitized = sanitized.trim_start_matches(|c: char| !is_alphanumeric(c));

    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    let suffix = &digest[..DIGEST_LEN];

    // All characters are ASCII at this point, so byte offsets are char offsets.
    let max_prefix = MAX_LEN - DIGEST_LEN - 1;
    let prefix = if sanitized.len() < max_prefix {
        sanitized
    } else {
        &sanitized[..max_prefix]
    };

    if prefix.is_empty() {
        return suffix.to_string();
    }

    format!("{}-{}", fix_dots(prefix), suffix)
}

/// Checks `s` against the DNS-1123 subdomain grammar.
pub fn is_dns1123_subdomain(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_LEN {
        return false;
    }

    s.split('.').all(|label| {
        let bytes = label.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(&first), Some(&last)) => {
                is_alphanumeric(first as char)
                    && is_alphanumeric(last as char)
                    && label.chars().all(|c| is_alphanumeric(c) || c == '-')
            }
            _ => false,
        }
    })
}

/// Replaces every `.` that is not surrounded by alphanumerics with `-`.
///
/// The prefix is always followed by `-` and the digest, so a trailing dot is
/// treated as followed by a non-alphanumeric. Lengths are preserved.
fn fix_dots(prefix: &str) -> String {
    let bytes = prefix.as_bytes();
    let mut out = String::with_capacity(prefix.len());
    for (i, &b) in bytes.iter().enumerate() {
        let c = b as char;
        if c != '.' {
            out.push(c);
            continue;
        }

        let prev_ok = out.chars().last().map(is_alphanumeric).unwrap_or(false);
        let next_ok = bytes
            .get(i + 1)
            .map(|&n| is_alphanumeric(n as char))
            .unwrap_or(false);
        out.push(if prev_ok && next_ok { '.' } else { '-' });
    }
    out
}

fn is_legal(c: char) -> bool {
    is_alphanumeric(c) || c == '.' || c == '-'
}

fn is_alphanumeric(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}
