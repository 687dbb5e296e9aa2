use crate::error::SelectionError;
use crate::manifest::{AudioTrack, ManifestCatalog, Variant};

/// Pick one variant and one audio track from `catalog`.
///
/// `None` or an empty string selects the first entry in manifest order.
/// Otherwise the label must match exactly.
pub fn select_tracks<'a>(
    catalog: &'a ManifestCatalog,
    resolution: Option<&str>,
    track_name: Option<&str>,
) -> Result<(&'a Variant, &'a AudioTrack), SelectionError> {
    let (Some(first_variant), Some(first_track)) =
        (catalog.variants.first(), catalog.audio_tracks.first())
    else {
        return Err(SelectionError::NoCatalog);
    };

    let variant = match resolution.filter(|r| !r.is_empty()) {
        None => first_variant,
        Some(requested) => catalog
            .variants
            .iter()
            .find(|v| v.resolution == requested)
            .ok_or_else(|| SelectionError::ResolutionNotFound {
                requested: requested.to_string(),
                available: catalog.resolutions(),
            })?,
    };

    let track = match track_name.filter(|t| !t.is_empty()) {
        None => first_track,
        Some(requested) => catalog
            .audio_tracks
            .iter()
            .find(|t| t.name == requested)
            .ok_or_else(|| SelectionError::TrackNotFound {
                requested: requested.to_string(),
                available: catalog.track_names(),
            })?,
    };

    Ok((variant, track))
}
