//! Local file naming for segments and outputs.

use std::collections::HashSet;

use crate::manifest::SegmentRef;

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a string for use in filenames across all platforms.
///
/// Control characters and Windows-invalid characters become `_` (runs
/// collapse to one), leading/trailing spaces and dots are trimmed, and
/// Windows reserved names get a `_` prefix. Returns "unnamed" when nothing
/// usable is left.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{reserved}.")) {
            return format!("_{trimmed}");
        }
    }

    trimmed.to_string()
}

/// Last path component of a manifest URI, without query or fragment.
fn uri_basename(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default()
}

/// Deterministic local names for a track's segments, in input order.
///
/// Names come from the URI basename. A basename already taken by an earlier
/// segment gets the sequence index as a prefix, so byte-range playlists that
/// reuse one file still map to distinct local files.
pub fn segment_file_names(segments: &[SegmentRef]) -> Vec<String> {
    let mut taken = HashSet::with_capacity(segments.len());
    segments
        .iter()
        .map(|segment| {
            let base = uri_basename(&segment.uri);
            let mut name = if base.is_empty() {
                format!("segment-{}.ts", segment.sequence_index)
            } else {
                sanitize_filename(base)
            };
            while taken.contains(&name) {
                name = format!("{}-{name}", segment.sequence_index);
            }
            taken.insert(name.clone());
            name
        })
        .collect()
}

/// `output_<resolution>_<language>.<container>`
pub fn output_file_name(resolution: &str, language: &str, container: &str) -> String {
    format!(
        "output_{}_{}.{container}",
        sanitize_filename(resolution),
        sanitize_filename(language)
    )
}
