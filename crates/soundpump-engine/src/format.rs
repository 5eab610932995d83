use std::collections::BTreeMap;
use std::fmt;

/// Shape of a PCM/float stream.
///
/// Produced by negotiation or reported by the endpoint mixer; never mutated
/// afterwards. Equality is structural, tags included, so two descriptors
/// that differ only in an encoding extension are distinct formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Open attribute bag for encoding-specific extensions.
    pub tags: BTreeMap<String, String>,
}

impl AudioFormat {
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Bytes per frame: one sample per channel.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Endpoint verdict on a proposed format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSupport {
    Supported,
    /// Rejected, but the endpoint proposed an alternative it would accept.
    ClosestMatch(AudioFormat),
    Unsupported,
}

impl FormatSupport {
    pub fn is_supported(&self) -> bool {
        matches!(self, FormatSupport::Supported)
    }

    pub fn closest_match(&self) -> Option<&AudioFormat> {
        match self {
            FormatSupport::ClosestMatch(format) => Some(format),
            _ => None,
        }
    }
}
