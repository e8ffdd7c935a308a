//! Optional tag enrichment during scanning (title/artist/album only — the
//! core's descriptors and cues never depend on tags).

use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Tags extracted from audio file metadata, for display purposes only.
#[derive(Debug, Clone, Default)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
}

/// Read tags from an audio file. Returns empty tags on failure (unsupported
/// container, missing tag block, etc.) rather than erroring the scan.
pub fn read_tags(path: &Path) -> TagInfo {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("could not read tags from {}: {}", path.display(), e);
            return TagInfo::default();
        }
    };

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return TagInfo::default();
    };

    TagInfo {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        track_number: tag.track(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_tags() {
        let tags = read_tags(Path::new("/nonexistent/track.mp3"));
        assert!(tags.title.is_none());
        assert!(tags.artist.is_none());
    }
}
