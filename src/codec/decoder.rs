//! Detached decoder for lazily read sections
//!
//! A `SectionDecoder` is a cheap clone of the reader state needed to decode
//! one routed entry later: the bundle bytes, the string pool and the
//! compile options. It is shared with the CSS manager, the chunk manager
//! and the keyed template caches, and may be sent to worker threads.

use std::ops::Range;
use std::sync::Arc;

use super::css;
use super::header::CompileOptions;
use super::stream::{DecodeResult, InputStream};
use super::value::{StringSource, decode_value};
use crate::bundle::ContextBundle;
use crate::bundle::css::SharedCssFragment;
use crate::bundle::template_cache::{ElementTemplateInfo, ParsedStyles};
use crate::utils::error::DecodeError;

#[derive(Debug, Clone)]
pub struct SectionDecoder {
    stream: InputStream,
    strings: Arc<Vec<String>>,
    options: Arc<CompileOptions>,
}

impl SectionDecoder {
    pub fn new(stream: InputStream, strings: Arc<Vec<String>>, options: Arc<CompileOptions>) -> Self {
        Self {
            stream,
            strings,
            options,
        }
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    fn at(&self, range: &Range<usize>) -> DecodeResult<InputStream> {
        if range.start > range.end || range.end > self.stream.len() {
            return Err(DecodeError::Invalid(format!(
                "range {}..{} outside bundle of {} bytes",
                range.start,
                range.end,
                self.stream.len()
            )));
        }
        let mut stream = self.stream.clone();
        stream.seek(range.start)?;
        Ok(stream)
    }

    pub fn decode_css_fragment(&self, range: Range<usize>) -> DecodeResult<SharedCssFragment> {
        let mut stream = self.at(&range)?;
        css::decode_fragment(&mut stream, range.end, &self.strings)
    }

    /// A context bundle occupies its whole range
    pub fn decode_context_bundle(&self, range: Range<usize>) -> DecodeResult<ContextBundle> {
        let mut stream = self.at(&range)?;
        let bytes = stream.read_bytes(range.end - range.start)?;
        Ok(ContextBundle::new(bytes))
    }

    pub fn decode_element_template(
        &self,
        key: &str,
        range: Range<usize>,
    ) -> DecodeResult<ElementTemplateInfo> {
        let mut stream = self.at(&range)?;
        let value = decode_value(&mut stream, StringSource::Pool(&self.strings))?;
        let mut info: ElementTemplateInfo = serde_json::from_value(value).map_err(|e| {
            DecodeError::Invalid(format!("element template {} is malformed: {}", key, e))
        })?;
        info.key = key.to_string();
        info.exist = true;
        Ok(info)
    }

    /// Parsed styles: compactU32 count, (compactU32 len, fragment)*
    pub fn decode_parsed_styles(&self, key: &str, range: Range<usize>) -> DecodeResult<ParsedStyles> {
        let mut stream = self.at(&range)?;
        let count = stream.read_compact_u32()?;
        let mut styles = ParsedStyles::new();
        for _ in 0..count {
            let len = stream.read_compact_u32()? as usize;
            let end = stream.offset() + len;
            if end > range.end {
                return Err(DecodeError::Invalid(format!(
                    "parsed styles {} overrun their range",
                    key
                )));
            }
            let fragment = css::decode_fragment(&mut stream, end, &self.strings)?;
            stream.seek(end)?;
            styles.insert(fragment.id(), fragment);
        }
        Ok(styles)
    }
}

/// Adapters with the signature the keyed caches expect
pub(crate) fn element_template_entry(
    decoder: &SectionDecoder,
    key: &str,
    range: Range<usize>,
) -> DecodeResult<ElementTemplateInfo> {
    decoder.decode_element_template(key, range)
}

pub(crate) fn parsed_styles_entry(
    decoder: &SectionDecoder,
    key: &str,
    range: Range<usize>,
) -> DecodeResult<ParsedStyles> {
    decoder.decode_parsed_styles(key, range)
}
