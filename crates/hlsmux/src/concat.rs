use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::DownloadError;

/// Ordered local segment paths for one track, in ascending sequence index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcatList {
    entries: Vec<PathBuf>,
}

impl ConcatList {
    /// Build from slots indexed by sequence index. Every slot must be filled.
    pub(crate) fn from_slots(slots: Vec<Option<PathBuf>>) -> Option<Self> {
        let entries = slots.into_iter().collect::<Option<Vec<_>>>()?;
        Some(Self { entries })
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render in the ffmpeg concat demuxer format.
    pub fn render(&self) -> String {
        let mut out = String::from("ffconcat version 1.0\n");
        for path in &self.entries {
            let _ = writeln!(out, "file '{}'", escape_path(path));
        }
        out
    }

    /// Write the rendered list to `path`.
    pub async fn write_to(&self, path: &Path) -> Result<(), DownloadError> {
        tokio::fs::write(path, self.render())
            .await
            .map_err(|e| DownloadError::io("writing concat list", path, e))
    }
}

/// Quote for a single-quoted concat entry: `'` becomes `'\''`.
fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_header_and_entries_in_order() {
        let list = ConcatList::from_slots(vec![
            Some(PathBuf::from("/tmp/s/video/seg0.ts")),
            Some(PathBuf::from("/tmp/s/video/seg1.ts")),
        ])
        .unwrap();

        assert_eq!(
            list.render(),
            "ffconcat version 1.0\nfile '/tmp/s/video/seg0.ts'\nfile '/tmp/s/video/seg1.ts'\n"
        );
    }

    #[test]
    fn single_quotes_are_escaped() {
        let list = ConcatList::from_slots(vec![Some(PathBuf::from("/tmp/it's/seg0.ts"))]).unwrap();
        assert!(list.render().contains(r"file '/tmp/it'\''s/seg0.ts'"));
    }

    #[test]
    fn missing_slot_is_rejected() {
        assert!(ConcatList::from_slots(vec![Some(PathBuf::from("a")), None]).is_none());
    }

    #[test]
    fn empty_list_has_only_header() {
        let list = ConcatList::from_slots(Vec::new()).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.render(), "ffconcat version 1.0\n");
    }
}
