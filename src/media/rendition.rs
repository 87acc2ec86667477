use serde::Deserialize;

/// Codec value the extraction tool uses for a missing stream
const NO_CODEC: &str = "none";

/// One downloadable variant of the source media
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub format_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub declared_aspect_ratio: Option<f64>,
    pub bitrate: Option<f64>,
    pub filesize_bytes: Option<u64>,
}

impl Rendition {
    pub fn new(format_id: impl Into<String>) -> Self {
        Self {
            format_id: format_id.into(),
            width: None,
            height: None,
            declared_aspect_ratio: None,
            bitrate: None,
            filesize_bytes: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: f64) -> Self {
        self.declared_aspect_ratio = Some(ratio);
        self
    }

    pub fn with_bitrate(mut self, bitrate: f64) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_filesize(mut self, bytes: u64) -> Self {
        self.filesize_bytes = Some(bytes);
        self
    }

    /// Declared ratio if present, else width/height if both are known
    pub fn aspect_ratio(&self) -> Option<f64> {
        positive(self.declared_aspect_ratio).or_else(|| ratio_of(self.width, self.height))
    }
}

/// Metadata returned by the list-renditions capability
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaListing {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub aspect_ratio: Option<f64>,
    #[serde(default)]
    pub formats: Vec<FormatEntry>,
}

/// A single format entry as reported by the extraction tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatEntry {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub aspect_ratio: Option<f64>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
}

impl FormatEntry {
    /// A format is muxed unless the tool explicitly reports a stream as absent
    pub fn has_audio_and_video(&self) -> bool {
        self.vcodec.as_deref() != Some(NO_CODEC) && self.acodec.as_deref() != Some(NO_CODEC)
    }

    fn to_rendition(&self) -> Option<Rendition> {
        let format_id = self.format_id.as_ref().filter(|id| !id.is_empty())?;

        Some(Rendition {
            format_id: format_id.clone(),
            width: self.width.filter(|w| *w > 0),
            height: self.height.filter(|h| *h > 0),
            declared_aspect_ratio: positive(self.aspect_ratio),
            bitrate: self.tbr.filter(|b| b.is_finite() && *b >= 0.0),
            filesize_bytes: self.filesize,
        })
    }
}

impl MediaListing {
    /// Aspect ratio of the source itself, if the listing reveals it
    pub fn source_aspect_ratio(&self) -> Option<f64> {
        positive(self.aspect_ratio).or_else(|| ratio_of(self.width, self.height))
    }

    /// Renditions carrying both audio and video, in listing order
    pub fn muxed_renditions(&self) -> Vec<Rendition> {
        self.formats
            .iter()
            .filter(|format| format.has_audio_and_video())
            .filter_map(FormatEntry::to_rendition)
            .collect()
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn ratio_of(width: Option<u32>, height: Option<u32>) -> Option<f64> {
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(w as f64 / h as f64),
        _ => None,
    }
}
