//! Manifest-relative URL resolution.
//!
//! Sub-manifest URIs resolve against the top-level manifest's directory and
//! segment URIs resolve against their own sub-manifest's directory. Callers
//! compute each base from the document that actually listed the URI.

use url::Url;

use crate::error::DownloadError;

/// Parse a caller-supplied URL, requiring it to be absolute and hierarchical.
pub fn parse_absolute(input: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(input.trim()).map_err(|e| DownloadError::invalid_url(input, e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(DownloadError::invalid_url(
            input,
            "URL cannot be used as a base for relative references",
        ));
    }
    Ok(url)
}

/// Directory of a manifest URL: path up to and including the last `/`,
/// without query or fragment.
pub fn manifest_base(manifest_url: &Url) -> Url {
    // `.` resolves to the containing directory and drops query/fragment.
    manifest_url
        .join(".")
        .unwrap_or_else(|_| manifest_url.clone())
}

/// Resolve `reference` against `base` using RFC 3986 rules.
///
/// Absolute references are returned as-is; scheme-relative, root-relative
/// and dot-segment references are resolved normally.
pub fn resolve(base: &Url, reference: &str) -> Result<Url, url::ParseError> {
    base.join(reference.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn base_drops_file_name_and_query() {
        let base = manifest_base(&url("https://cdn.example.com/show/master.m3u8?token=abc"));
        assert_eq!(base.as_str(), "https://cdn.example.com/show/");
    }

    #[test]
    fn base_of_directory_url_is_itself() {
        let base = manifest_base(&url("https://cdn.example.com/show/"));
        assert_eq!(base.as_str(), "https://cdn.example.com/show/");
    }

    #[test]
    fn resolves_relative_references() {
        let base = url("https://cdn.example.com/show/720p/");
        let cases = [
            ("seg0.ts", "https://cdn.example.com/show/720p/seg0.ts"),
            ("../audio/hi.m3u8", "https://cdn.example.com/show/audio/hi.m3u8"),
            ("/root.ts", "https://cdn.example.com/root.ts"),
            ("//other.example.net/a.ts", "https://other.example.net/a.ts"),
            ("https://mirror.example.org/x.ts", "https://mirror.example.org/x.ts"),
            ("seg1.ts?sig=1", "https://cdn.example.com/show/720p/seg1.ts?sig=1"),
        ];
        for (reference, expected) in cases {
            assert_eq!(resolve(&base, reference).unwrap().as_str(), expected, "{reference}");
        }
    }

    #[test]
    fn segment_and_variant_bases_differ() {
        let top = url("https://cdn.example.com/show/master.m3u8");
        let variant = resolve(&manifest_base(&top), "video/720/index.m3u8").unwrap();
        let segment = resolve(&manifest_base(&variant), "seg0.ts").unwrap();
        assert_eq!(segment.as_str(), "https://cdn.example.com/show/video/720/seg0.ts");
    }

    #[test]
    fn rejects_relative_and_opaque_inputs() {
        assert!(parse_absolute("master.m3u8").is_err());
        assert!(parse_absolute("mailto:someone@example.com").is_err());
        assert!(parse_absolute(" https://cdn.example.com/master.m3u8 ").is_ok());
    }
}
