use parking_lot::RwLock;
use std::sync::Arc;

use soundpump_foundation::{AudioError, ShareMode};

use crate::format::{AudioFormat, FormatSupport};
use crate::native::{
    DeviceProperties, NativeStream, PropertyValue, DEVICE_FORMAT_KEY, OEM_FORMAT_KEY,
};

/// Ranks and validates candidate formats against the endpoint.
///
/// The suggestion list is computed lazily, once per session, and cached on
/// the negotiator instance; [`invalidate`](Self::invalidate) clears it when
/// the session deinitializes.
pub struct FormatNegotiator {
    props: Arc<dyn DeviceProperties>,
    share_mode: ShareMode,
    prefer_device_native: bool,
    cached: RwLock<Option<Vec<AudioFormat>>>,
}

impl FormatNegotiator {
    pub fn new(
        props: Arc<dyn DeviceProperties>,
        share_mode: ShareMode,
        prefer_device_native: bool,
    ) -> Self {
        Self {
            props,
            share_mode,
            prefer_device_native,
            cached: RwLock::new(None),
        }
    }

    /// Whether the endpoint accepts `format`, and the alternative it
    /// proposed if not.
    pub fn is_supported(
        &self,
        stream: &dyn NativeStream,
        format: &AudioFormat,
    ) -> Result<(bool, Option<AudioFormat>), AudioError> {
        Ok(match stream.is_format_supported(self.share_mode, format)? {
            FormatSupport::Supported => (true, None),
            FormatSupport::ClosestMatch(alternative) => (false, Some(alternative)),
            FormatSupport::Unsupported => (false, None),
        })
    }

    /// Ordered suggestions: the mixer format (or its closest supported
    /// match) and any device-declared preferred formats that verify as
    /// supported. Memoized per session.
    pub fn suggest(&self, stream: &dyn NativeStream) -> Result<Vec<AudioFormat>, AudioError> {
        if let Some(cached) = self.cached.read().as_ref() {
            return Ok(cached.clone());
        }

        let mixer = self.mixer_candidates(stream)?;
        let oem = self.oem_candidates(stream)?;

        let suggestions: Vec<AudioFormat> = if self.prefer_device_native {
            oem.into_iter().chain(mixer).collect()
        } else {
            mixer.into_iter().chain(oem).collect()
        };

        *self.cached.write() = Some(suggestions.clone());
        Ok(suggestions)
    }

    /// Suggestions with the given formats filtered out.
    pub fn suggest_excluding(
        &self,
        stream: &dyn NativeStream,
        excluded: &[AudioFormat],
    ) -> Result<Vec<AudioFormat>, AudioError> {
        Ok(self
            .suggest(stream)?
            .into_iter()
            .filter(|candidate| !excluded.contains(candidate))
            .collect())
    }

    /// Drops the memoized suggestion list. Called when the session returns
    /// to deinitialized.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }

    fn mixer_candidates(
        &self,
        stream: &dyn NativeStream,
    ) -> Result<Vec<AudioFormat>, AudioError> {
        let mixer = stream.mix_format()?;
        Ok(match stream.is_format_supported(self.share_mode, &mixer)? {
            FormatSupport::Supported => vec![mixer],
            FormatSupport::ClosestMatch(alternative) => vec![alternative],
            FormatSupport::Unsupported => Vec::new(),
        })
    }

    fn oem_candidates(
        &self,
        stream: &dyn NativeStream,
    ) -> Result<Vec<AudioFormat>, AudioError> {
        let mut candidates = Vec::new();
        for key in [DEVICE_FORMAT_KEY, OEM_FORMAT_KEY] {
            let Some(PropertyValue::Format(format)) = self.props.try_attribute(key) else {
                continue;
            };
            if candidates.contains(&format) {
                continue;
            }
            // A hint only joins the list once the endpoint verifies it.
            if self.is_supported(stream, &format)?.0 {
                candidates.push(format);
            }
        }
        Ok(candidates)
    }
}
