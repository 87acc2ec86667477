use std::cmp::Ordering;
use thiserror::Error;

use crate::media::rendition::Rendition;

/// Ratio assumed for renditions that reveal neither a ratio nor dimensions
pub const FALLBACK_ASPECT_RATIO: f64 = 16.0 / 9.0;

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("no renditions to choose from")]
    NoRenditions,
}

/// Pick the rendition to download under a hard size ceiling.
///
/// Candidates with a known size within the ceiling are ranked by closeness
/// to the source aspect ratio, then by height, then by bitrate. Without any
/// such candidate the smallest known size wins (closest ratio first when the
/// source ratio is known), and without any size information the lowest
/// resolution wins.
pub fn select<'a>(
    renditions: &'a [Rendition],
    source_aspect_ratio: Option<f64>,
    size_ceiling_bytes: u64,
) -> Result<&'a Rendition, SelectionError> {
    if renditions.is_empty() {
        return Err(SelectionError::NoRenditions);
    }

    let distance = |rendition: &Rendition| match source_aspect_ratio {
        Some(source) => (effective_aspect_ratio(rendition) - source).abs(),
        None => 0.0,
    };

    let fits: Vec<&Rendition> = renditions
        .iter()
        .filter(|r| matches!(r.filesize_bytes, Some(size) if size <= size_ceiling_bytes))
        .collect();

    if !fits.is_empty() {
        return Ok(first_by(fits, |a, b| {
            distance(a)
                .total_cmp(&distance(b))
                .then_with(|| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)))
                .then_with(|| b.bitrate.unwrap_or(0.0).total_cmp(&a.bitrate.unwrap_or(0.0)))
        }));
    }

    let sized: Vec<&Rendition> = renditions
        .iter()
        .filter(|r| r.filesize_bytes.is_some())
        .collect();

    if !sized.is_empty() {
        return Ok(first_by(sized, |a, b| {
            distance(a)
                .total_cmp(&distance(b))
                .then_with(|| a.filesize_bytes.cmp(&b.filesize_bytes))
        }));
    }

    Ok(first_by(renditions.iter().collect(), |a, b| {
        a.height.unwrap_or(0).cmp(&b.height.unwrap_or(0))
    }))
}

/// Declared ratio, else width/height, else the fallback constant
pub fn effective_aspect_ratio(rendition: &Rendition) -> f64 {
    rendition.aspect_ratio().unwrap_or(FALLBACK_ASPECT_RATIO)
}

// Earliest element among equals, so ties resolve to input order
fn first_by<'a, F>(candidates: Vec<&'a Rendition>, compare: F) -> &'a Rendition
where
    F: Fn(&Rendition, &Rendition) -> Ordering,
{
    let mut best = candidates[0];
    for &candidate in &candidates[1..] {
        if compare(candidate, best) == Ordering::Less {
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;
    const CEILING: u64 = 50 * MIB;

    fn pick(renditions: &[Rendition], ratio: Option<f64>) -> String {
        select(renditions, ratio, CEILING).unwrap().format_id.clone()
    }

    #[test]
    fn test_empty_list_is_an_error() {
        assert_eq!(select(&[], None, CEILING), Err(SelectionError::NoRenditions));
    }

    #[test]
    fn test_skips_renditions_over_the_ceiling() {
        let renditions = vec![
            Rendition::new("a").with_height(480).with_filesize(80 * MIB),
            Rendition::new("b").with_height(360).with_filesize(20 * MIB),
        ];
        assert_eq!(pick(&renditions, None), "b");
    }

    #[test]
    fn test_prefers_closest_aspect_ratio() {
        let renditions = vec![
            Rendition::new("x").with_aspect_ratio(1.33).with_filesize(10 * MIB),
            Rendition::new("y").with_aspect_ratio(1.77).with_filesize(10 * MIB),
        ];
        assert_eq!(pick(&renditions, Some(1.78)), "y");
    }

    #[test]
    fn test_aspect_ratio_beats_resolution() {
        let renditions = vec![
            Rendition::new("tall").with_dimensions(1080, 1920).with_filesize(30 * MIB),
            Rendition::new("wide").with_dimensions(640, 360).with_filesize(5 * MIB),
        ];
        assert_eq!(pick(&renditions, Some(16.0 / 9.0)), "wide");
    }

    #[test]
    fn test_ratio_tie_breaks_on_height_then_bitrate() {
        let renditions = vec![
            Rendition::new("low").with_dimensions(640, 360).with_bitrate(900.0).with_filesize(MIB),
            Rendition::new("high-slow").with_dimensions(1280, 720).with_bitrate(1500.0).with_filesize(MIB),
            Rendition::new("high-fast").with_dimensions(1280, 720).with_bitrate(2500.0).with_filesize(MIB),
        ];
        assert_eq!(pick(&renditions, Some(16.0 / 9.0)), "high-fast");
    }

    #[test]
    fn test_without_source_ratio_highest_resolution_wins() {
        let renditions = vec![
            Rendition::new("sd").with_aspect_ratio(1.33).with_height(480).with_filesize(MIB),
            Rendition::new("hd").with_aspect_ratio(2.4).with_height(720).with_filesize(MIB),
        ];
        assert_eq!(pick(&renditions, None), "hd");
    }

    #[test]
    fn test_unknown_ratio_uses_fallback() {
        let renditions = vec![
            Rendition::new("square").with_aspect_ratio(1.0).with_filesize(MIB),
            Rendition::new("unknown").with_filesize(MIB),
        ];
        assert_eq!(pick(&renditions, Some(1.7)), "unknown");
    }

    #[test]
    fn test_unsized_renditions_are_not_candidates_when_one_fits() {
        let renditions = vec![
            Rendition::new("big-unknown").with_height(2160),
            Rendition::new("small").with_height(240).with_filesize(MIB),
        ];
        assert_eq!(pick(&renditions, None), "small");
    }

    #[test]
    fn test_all_over_ceiling_falls_back_to_smallest() {
        let renditions = vec![
            Rendition::new("ninety").with_filesize(90 * MIB),
            Rendition::new("sixty").with_filesize(60 * MIB),
        ];
        assert_eq!(pick(&renditions, None), "sixty");
    }

    #[test]
    fn test_over_ceiling_fallback_prefers_ratio_then_size() {
        let renditions = vec![
            Rendition::new("small-square").with_aspect_ratio(1.0).with_filesize(55 * MIB),
            Rendition::new("big-wide").with_aspect_ratio(1.78).with_filesize(95 * MIB),
            Rendition::new("wide").with_aspect_ratio(1.78).with_filesize(70 * MIB),
        ];
        assert_eq!(pick(&renditions, Some(1.78)), "wide");
    }

    #[test]
    fn test_no_sizes_at_all_picks_lowest_height() {
        let renditions = vec![
            Rendition::new("720").with_height(720),
            Rendition::new("360a").with_height(360),
            Rendition::new("360b").with_height(360),
        ];
        assert_eq!(pick(&renditions, Some(1.78)), "360a");
    }

    #[test]
    fn test_missing_height_counts_as_zero() {
        let renditions = vec![
            Rendition::new("720").with_height(720),
            Rendition::new("audio-ish"),
        ];
        assert_eq!(pick(&renditions, None), "audio-ish");
    }

    #[test]
    fn test_result_always_from_compliant_subset() {
        let ceilings = [MIB, 10 * MIB, 25 * MIB, 50 * MIB];
        let renditions = vec![
            Rendition::new("a").with_height(1080).with_filesize(48 * MIB),
            Rendition::new("b").with_height(720).with_filesize(24 * MIB),
            Rendition::new("c").with_height(480).with_filesize(9 * MIB),
            Rendition::new("d").with_height(2160),
        ];

        for ceiling in ceilings {
            let chosen = select(&renditions, Some(1.78), ceiling).unwrap();
            let any_fits = renditions
                .iter()
                .any(|r| matches!(r.filesize_bytes, Some(s) if s <= ceiling));
            if any_fits {
                assert!(chosen.filesize_bytes.unwrap() <= ceiling);
            }
        }
    }
}
