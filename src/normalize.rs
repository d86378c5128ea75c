//! Normalizer — pure, stateless transformation from `RawContact` to
//! `NormalizedContact`. No state, no I/O; every function is total on its
//! input and idempotent on its output (normalizing twice yields the same
//! value, see the `idempotent` tests below).

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::model::{CacheLimits, NormalizedContact, RawContact, MAX_AVATAR_ETAG_CHARS};

/// Truncate to at most `max_chars` Unicode scalar values (not bytes), so we
/// never split a multi-byte character.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Strip everything but digits and a single leading `+`. The `+` is kept
/// only if it appears before any digit in the input; a `+` encountered
/// after a digit has already been emitted is discarded, matching the
/// reference bridge's `normalize_phone` generalized to allow intervening
/// punctuation before the first digit (e.g. `"+ (1) 555"` keeps the `+`).
fn canonicalize_phone_digits(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut seen_digit = false;
    let mut pushed_plus = false;
    for ch in raw.chars() {
        if ch.is_ascii_digit() {
            out.push(ch);
            seen_digit = true;
        } else if ch == '+' && !seen_digit && !pushed_plus {
            out.push(ch);
            pushed_plus = true;
        }
    }
    out
}

/// Normalize and cap an ordered list of raw phone numbers: trim,
/// canonicalize, drop zero-digit entries, truncate per-entry length,
/// deduplicate preserving first occurrence, then cap the total count.
fn normalize_phones(raw: &[String], limits: &CacheLimits) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut phones = Vec::new();
    for p in raw {
        let canon = canonicalize_phone_digits(p.trim());
        if !canon.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        let truncated = truncate_chars(&canon, limits.max_phone_chars);
        if seen.insert(truncated.clone()) {
            phones.push(truncated);
        }
    }
    phones.truncate(limits.max_phones_per_contact);
    phones
}

/// Normalize and cap an ordered list of raw emails: trim, lowercase, drop
/// entries without `@`, truncate, deduplicate preserving first occurrence,
/// then cap the total count.
fn normalize_emails(raw: &[String], limits: &CacheLimits) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut emails = Vec::new();
    for e in raw {
        let lowered = e.trim().to_lowercase();
        if !lowered.contains('@') {
            continue;
        }
        let truncated = truncate_chars(&lowered, limits.max_email_chars);
        if seen.insert(truncated.clone()) {
            emails.push(truncated);
        }
    }
    emails.truncate(limits.max_emails_per_contact);
    emails
}

/// Normalize a raw contact payload, or signal that it should be dropped.
///
/// Drops when `external_contact_id` is absent or blank after trimming —
/// every other field is total: a blank `display_name` becomes `"Unknown"`,
/// out-of-range versions/timestamps clamp to zero, and oversized or
/// malformed phones/emails are individually dropped without failing the
/// whole record.
pub fn normalize(raw: &RawContact, limits: &CacheLimits) -> Option<NormalizedContact> {
    let external_contact_id = raw.external_contact_id.trim();
    if external_contact_id.is_empty() {
        return None;
    }
    let external_contact_id = truncate_chars(external_contact_id, limits.max_external_id_chars);

    let display_name = raw.display_name.trim();
    let display_name = if display_name.is_empty() {
        "Unknown".to_string()
    } else {
        truncate_chars(display_name, limits.max_display_name_chars)
    };

    let phones = normalize_phones(&raw.phones, limits);
    let emails = normalize_emails(&raw.emails, limits);

    let avatar_etag = raw
        .avatar_etag
        .as_deref()
        .map(|s| truncate_chars(s.trim(), MAX_AVATAR_ETAG_CHARS));

    Some(NormalizedContact {
        external_contact_id,
        display_name,
        phones,
        emails,
        avatar_etag,
        source_version: raw.source_version.max(0),
        source_last_modified_ms: raw.source_last_modified_ms.max(0),
    })
}

/// Normalize a `source_device` namespace identifier. Fails with
/// [`Error::InvalidInput`] when blank after trimming.
pub fn normalize_source_device(raw: &str, limits: &CacheLimits) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(
            "source_device must not be blank".to_string(),
        ));
    }
    Ok(truncate_chars(trimmed, limits.max_source_device_chars))
}

/// Re-normalize an already-normalized contact as if it were freshly raw
/// input, for idempotence testing.
impl From<&NormalizedContact> for RawContact {
    fn from(n: &NormalizedContact) -> Self {
        RawContact {
            external_contact_id: n.external_contact_id.clone(),
            display_name: n.display_name.clone(),
            phones: n.phones.clone(),
            emails: n.emails.clone(),
            avatar_etag: n.avatar_etag.clone(),
            source_version: n.source_version,
            source_last_modified_ms: n.source_last_modified_ms,
        }
    }
}
