//! CSS section layout
//!
//! ```text
//! route:    compactU32 count, (compactS32 id, compactU32 start, compactU32 end)*
//! fragment: compactS32 id, compactU32 dep_count, compactS32 dep*,
//!           u32 packed (rules in low 16 bits, keyframes in high 16 bits),
//!           (str selector, compactU32 n, (compactU32 prop, value)*)*,
//!           (str name, value)*,
//!           [u8 1, u32 n, (str family, value)*]   font faces, optional
//! ```
//! Route offsets are relative to the cursor after the route.

use std::collections::BTreeMap;
use std::ops::Range;

use super::stream::{DecodeResult, InputStream, OutputStream};
use super::value::{StringPoolBuilder, StringSink, StringSource, decode_value, encode_value};
use crate::bundle::css::{CssParseToken, SharedCssFragment};
use crate::utils::error::DecodeError;

const FONT_FACE_TRAILER: u8 = 1;
const FONT_FACE_TRAILER_MIN_SIZE: usize = 5;

/// Decoded CSS route with absolute offsets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CssRoute {
    pub fragments: BTreeMap<i32, Range<usize>>,
    /// Absolute end of the CSS section
    pub end: usize,
}

pub fn decode_css_route(stream: &mut InputStream) -> DecodeResult<CssRoute> {
    let count = stream.read_compact_u32()?;
    let mut raw = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        let id = stream.read_compact_s32()?;
        let start = stream.read_compact_u32()? as usize;
        let end = stream.read_compact_u32()? as usize;
        if start > end {
            return Err(DecodeError::Invalid(format!(
                "css fragment {} has inverted range {}..{}",
                id, start, end
            )));
        }
        raw.push((id, start, end));
    }
    let base = stream.offset();
    let max_end = raw.iter().map(|(_, _, end)| *end).max().unwrap_or(0);
    let end = base + max_end;
    if end > stream.len() {
        return Err(DecodeError::Invalid(format!(
            "css section ends at {} beyond stream length {}",
            end,
            stream.len()
        )));
    }
    let fragments = raw
        .into_iter()
        .map(|(id, start, end)| (id, base + start..base + end))
        .collect();
    Ok(CssRoute { fragments, end })
}

pub fn decode_fragment(
    stream: &mut InputStream,
    end: usize,
    strings: &[String],
) -> DecodeResult<SharedCssFragment> {
    let pool = StringSource::Pool(strings);
    let id = stream.read_compact_s32()?;
    let dep_count = stream.read_compact_u32()?;
    let mut deps = Vec::with_capacity(dep_count.min(1024) as usize);
    for _ in 0..dep_count {
        deps.push(stream.read_compact_s32()?);
    }
    let mut fragment = SharedCssFragment::new(id, deps);

    let packed = stream.read_u32()?;
    let rule_count = packed & 0xffff;
    let keyframes_count = packed >> 16;
    for _ in 0..rule_count {
        let mut token = CssParseToken::new(stream.read_string()?);
        let attr_count = stream.read_compact_u32()?;
        for _ in 0..attr_count {
            let property = stream.read_compact_u32()?;
            let value = decode_value(stream, pool)?;
            token.attributes.insert(property, value);
        }
        fragment.add_rule(token);
    }
    for _ in 0..keyframes_count {
        let name = stream.read_string()?;
        let frames = decode_value(stream, pool)?;
        fragment.add_keyframes(name, frames);
    }
    while end.saturating_sub(stream.offset()) >= FONT_FACE_TRAILER_MIN_SIZE {
        let kind = stream.read_u8()?;
        if kind != FONT_FACE_TRAILER {
            return Err(DecodeError::Invalid(format!(
                "unknown css trailer {} in fragment {}",
                kind, id
            )));
        }
        let count = stream.read_u32()?;
        for _ in 0..count {
            let family = stream.read_string()?;
            let face = decode_value(stream, pool)?;
            fragment.add_font_face(family, face);
        }
    }
    if stream.offset() > end {
        return Err(DecodeError::Invalid(format!(
            "css fragment {} overruns its range by {} bytes",
            id,
            stream.offset() - end
        )));
    }
    Ok(fragment)
}

pub fn encode_fragment(
    out: &mut OutputStream,
    fragment: &SharedCssFragment,
    pool: &mut StringPoolBuilder,
) {
    out.write_compact_s32(fragment.id());
    out.write_compact_u32(fragment.dependent_ids().len() as u32);
    for dep in fragment.dependent_ids() {
        out.write_compact_s32(*dep);
    }
    let rules = fragment.rule_count() as u32 & 0xffff;
    let keyframes = fragment.keyframes().len() as u32 & 0xffff;
    out.write_u32(rules | (keyframes << 16));
    for selector in fragment.rule_set() {
        out.write_string(selector);
        let attributes = fragment
            .find_rule(selector)
            .map(|token| token.attributes.clone())
            .unwrap_or_default();
        out.write_compact_u32(attributes.len() as u32);
        for (property, value) in &attributes {
            out.write_compact_u32(*property);
            encode_value(out, value, &mut StringSink::Pool(pool));
        }
    }
    for (name, frames) in fragment.keyframes() {
        out.write_string(name);
        encode_value(out, frames, &mut StringSink::Pool(pool));
    }
    if !fragment.font_faces().is_empty() {
        out.write_u8(FONT_FACE_TRAILER);
        out.write_u32(fragment.font_faces().len() as u32);
        for (family, face) in fragment.font_faces() {
            out.write_string(family);
            encode_value(out, face, &mut StringSink::Pool(pool));
        }
    }
}

/// Encode a route followed by the fragments it points at
pub fn encode_css_section(
    out: &mut OutputStream,
    fragments: &[SharedCssFragment],
    pool: &mut StringPoolBuilder,
) {
    let mut body = OutputStream::new();
    let mut route = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let start = body.len();
        encode_fragment(&mut body, fragment, pool);
        route.push((fragment.id(), start, body.len()));
    }
    out.write_compact_u32(route.len() as u32);
    for (id, start, end) in route {
        out.write_compact_s32(id);
        out.write_compact_u32(start as u32);
        out.write_compact_u32(end as u32);
    }
    out.write_bytes(body.as_slice());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_fragment() -> SharedCssFragment {
        let mut fragment = SharedCssFragment::new(3, vec![1, 2]);
        fragment.add_rule(CssParseToken::new(".title").with_attribute(7, json!("red")));
        fragment.add_rule(CssParseToken::new("#main .item").with_attribute(9, json!(12)));
        fragment.add_keyframes("fade", json!({"from": {"opacity": 0}}));
        fragment.add_font_face("Inter", json!({"src": "inter.ttf"}));
        fragment
    }

    #[test]
    fn test_css_section_route_is_absolute() {
        let mut pool = StringPoolBuilder::new();
        let mut out = OutputStream::new();
        out.write_bytes(&[0xee; 3]);
        encode_css_section(&mut out, &[sample_fragment()], &mut pool);

        let mut stream = InputStream::new(out.into_inner());
        stream.seek(3).unwrap();
        let route = decode_css_route(&mut stream).unwrap();
        let range = route.fragments[&3].clone();
        assert_eq!(range.start, stream.offset());
        assert_eq!(route.end, stream.len());

        stream.seek(range.start).unwrap();
        let decoded = decode_fragment(&mut stream, range.end, pool.strings()).unwrap();
        assert_eq!(decoded, sample_fragment());
        assert_eq!(stream.offset(), range.end);
    }

    #[test]
    fn test_fragment_overrun_is_rejected() {
        let mut pool = StringPoolBuilder::new();
        let mut out = OutputStream::new();
        encode_fragment(&mut out, &sample_fragment(), &mut pool);
        let len = out.len();
        let mut stream = InputStream::new(out.into_inner());
        let err = decode_fragment(&mut stream, len - 8, pool.strings());
        assert!(err.is_err());
    }

    #[test]
    fn test_inverted_route_range() {
        let mut out = OutputStream::new();
        out.write_compact_u32(1);
        out.write_compact_s32(1);
        out.write_compact_u32(5);
        out.write_compact_u32(2);
        assert!(decode_css_route(&mut InputStream::new(out.into_inner())).is_err());
    }
}
