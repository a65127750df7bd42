//! Bundle header and compile options
//!
//! The header extension is a self-describing TLV block. Recognized keys are
//! reinterpreted into `CompileOptions`; unknown keys are kept verbatim so a
//! newer bundle survives a round trip through an older engine.

use std::collections::BTreeMap;

use serde_json::Value;

use super::section::{AirMode, ArchOption, FeOption, HEADER_EXT_INFO_MAGIC};
use super::stream::{DecodeResult, InputStream, OutputStream};
use crate::utils::error::DecodeError;

/// Header-extension field ids
pub mod ext_key {
    pub const TARGET_SDK_VERSION: u16 = 0;
    pub const ENABLE_FIBER_ARCH: u16 = 1;
    pub const ENABLE_FLEXIBLE_TEMPLATE: u16 = 2;
    pub const ENABLE_LAZY_CSS_DECODE: u16 = 3;
    pub const ENABLE_ASYNC_CSS_DECODE: u16 = 4;
    pub const ENABLE_ASYNC_LEPUS_CHUNK_DECODE: u16 = 5;
    pub const ENABLE_CSS_PARSER: u16 = 6;
    pub const RADON_MODE: u16 = 7;
    pub const FRONT_END_DSL: u16 = 8;
    pub const ARCH_OPTION: u16 = 9;
    pub const LYNX_AIR_MODE: u16 = 10;
    pub const ENABLE_TRIAL_OPTIONS: u16 = 11;
    pub const TEMPLATE_DEBUG_URL: u16 = 12;
    pub const ENABLE_REUSE_CONTEXT: u16 = 13;
    pub const ENABLE_USE_CONTEXT_POOL: u16 = 14;
    pub const ENABLE_CSS_CLASS_MERGE: u16 = 15;
    pub const USE_LEPUS_NG: u16 = 16;
}

/// Options the front-end compiler baked into the bundle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    pub target_sdk_version: String,
    pub enable_fiber_arch: bool,
    pub enable_flexible_template: bool,
    pub enable_lazy_css_decode: FeOption,
    pub enable_async_css_decode: FeOption,
    pub enable_async_lepus_chunk_decode: bool,
    pub enable_css_parser: bool,
    pub radon_mode: u8,
    pub front_end_dsl: u8,
    pub arch_option: ArchOption,
    pub lynx_air_mode: AirMode,
    pub enable_trial_options: bool,
    pub template_debug_url: String,
    pub enable_reuse_context: bool,
    pub enable_use_context_pool: bool,
    pub enable_css_class_merge: bool,
    pub use_lepus_ng: bool,
    /// Fields this engine does not understand, keyed by id
    pub unknown_fields: BTreeMap<u16, Vec<u8>>,
}

impl CompileOptions {
    /// Decode a `HeaderExtInfo` block into options
    pub fn decode_header_ext(stream: &mut InputStream) -> DecodeResult<Self> {
        let magic = stream.read_u32()?;
        if magic != HEADER_EXT_INFO_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let field_count = stream.read_u32()?;
        let mut options = CompileOptions::default();
        for _ in 0..field_count {
            let key = stream.read_u16()?;
            let size = stream.read_u32()? as usize;
            let payload = stream.read_bytes(size)?;
            options.apply_field(key, payload)?;
        }
        Ok(options)
    }

    fn apply_field(&mut self, key: u16, payload: Vec<u8>) -> DecodeResult<()> {
        let byte = || payload.first().copied().unwrap_or(0);
        let text = || {
            String::from_utf8(payload.clone())
                .map_err(|_| DecodeError::Invalid(format!("header field {} is not utf-8", key)))
        };
        match key {
            ext_key::TARGET_SDK_VERSION => self.target_sdk_version = text()?,
            ext_key::ENABLE_FIBER_ARCH => self.enable_fiber_arch = byte() != 0,
            ext_key::ENABLE_FLEXIBLE_TEMPLATE => self.enable_flexible_template = byte() != 0,
            ext_key::ENABLE_LAZY_CSS_DECODE => {
                self.enable_lazy_css_decode = FeOption::from_u8(byte())
            }
            ext_key::ENABLE_ASYNC_CSS_DECODE => {
                self.enable_async_css_decode = FeOption::from_u8(byte())
            }
            ext_key::ENABLE_ASYNC_LEPUS_CHUNK_DECODE => {
                self.enable_async_lepus_chunk_decode = byte() != 0
            }
            ext_key::ENABLE_CSS_PARSER => self.enable_css_parser = byte() != 0,
            ext_key::RADON_MODE => self.radon_mode = byte(),
            ext_key::FRONT_END_DSL => self.front_end_dsl = byte(),
            ext_key::ARCH_OPTION => self.arch_option = ArchOption::from_u8(byte()),
            ext_key::LYNX_AIR_MODE => self.lynx_air_mode = AirMode::from_u8(byte()),
            ext_key::ENABLE_TRIAL_OPTIONS => self.enable_trial_options = byte() != 0,
            ext_key::TEMPLATE_DEBUG_URL => self.template_debug_url = text()?,
            ext_key::ENABLE_REUSE_CONTEXT => self.enable_reuse_context = byte() != 0,
            ext_key::ENABLE_USE_CONTEXT_POOL => self.enable_use_context_pool = byte() != 0,
            ext_key::ENABLE_CSS_CLASS_MERGE => self.enable_css_class_merge = byte() != 0,
            ext_key::USE_LEPUS_NG => self.use_lepus_ng = byte() != 0,
            _ => {
                log::debug!("keeping unknown header field {} ({} bytes)", key, payload.len());
                self.unknown_fields.insert(key, payload);
            }
        }
        Ok(())
    }

    /// Encode as a `HeaderExtInfo` block
    pub fn encode_header_ext(&self, out: &mut OutputStream) {
        let mut fields: Vec<(u16, Vec<u8>)> = vec![
            (ext_key::TARGET_SDK_VERSION, self.target_sdk_version.as_bytes().to_vec()),
            (ext_key::ENABLE_FIBER_ARCH, vec![u8::from(self.enable_fiber_arch)]),
            (ext_key::ENABLE_FLEXIBLE_TEMPLATE, vec![u8::from(self.enable_flexible_template)]),
            (ext_key::ENABLE_LAZY_CSS_DECODE, vec![self.enable_lazy_css_decode as u8]),
            (ext_key::ENABLE_ASYNC_CSS_DECODE, vec![self.enable_async_css_decode as u8]),
            (
                ext_key::ENABLE_ASYNC_LEPUS_CHUNK_DECODE,
                vec![u8::from(self.enable_async_lepus_chunk_decode)],
            ),
            (ext_key::ENABLE_CSS_PARSER, vec![u8::from(self.enable_css_parser)]),
            (ext_key::RADON_MODE, vec![self.radon_mode]),
            (ext_key::FRONT_END_DSL, vec![self.front_end_dsl]),
            (ext_key::ARCH_OPTION, vec![self.arch_option as u8]),
            (ext_key::LYNX_AIR_MODE, vec![self.lynx_air_mode as u8]),
            (ext_key::ENABLE_TRIAL_OPTIONS, vec![u8::from(self.enable_trial_options)]),
            (ext_key::TEMPLATE_DEBUG_URL, self.template_debug_url.as_bytes().to_vec()),
            (ext_key::ENABLE_REUSE_CONTEXT, vec![u8::from(self.enable_reuse_context)]),
            (ext_key::ENABLE_USE_CONTEXT_POOL, vec![u8::from(self.enable_use_context_pool)]),
            (ext_key::ENABLE_CSS_CLASS_MERGE, vec![u8::from(self.enable_css_class_merge)]),
            (ext_key::USE_LEPUS_NG, vec![u8::from(self.use_lepus_ng)]),
        ];
        fields.extend(self.unknown_fields.iter().map(|(k, v)| (*k, v.clone())));

        out.write_u32(HEADER_EXT_INFO_MAGIC);
        out.write_u32(fields.len() as u32);
        for (key, payload) in fields {
            out.write_u16(key);
            out.write_u32(payload.len() as u32);
            out.write_bytes(&payload);
        }
    }

    /// CSS is decoded per fragment on first use
    pub fn lazy_css(&self) -> bool {
        self.enable_lazy_css_decode.is_enabled()
    }

    /// CSS is decoded on the worker pool
    pub fn async_css(&self) -> bool {
        self.enable_async_css_decode.is_enabled()
    }

    pub fn is_air(&self) -> bool {
        self.arch_option == ArchOption::Air && self.lynx_air_mode == AirMode::Strict
    }
}

/// Decoded bundle header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateHeader {
    pub total_size: u32,
    pub magic: u32,
    pub legacy_version: String,
    pub ios_version: String,
    pub android_version: String,
    pub compile_options: CompileOptions,
    pub template_info: Option<Value>,
    pub trial_options: Option<Value>,
    pub app_type: String,
}

impl TemplateHeader {
    /// Engine version the bundle targets
    pub fn engine_version(&self) -> &str {
        if self.compile_options.target_sdk_version.is_empty() {
            &self.android_version
        } else {
            &self.compile_options.target_sdk_version
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_ext_preserves_unknown_fields() {
        let mut options = CompileOptions {
            target_sdk_version: "2.8".to_string(),
            enable_fiber_arch: true,
            enable_lazy_css_decode: FeOption::Enable,
            arch_option: ArchOption::Fiber,
            ..Default::default()
        };
        options.unknown_fields.insert(99, vec![1, 2, 3]);

        let mut out = OutputStream::new();
        options.encode_header_ext(&mut out);
        let decoded =
            CompileOptions::decode_header_ext(&mut InputStream::new(out.into_inner())).unwrap();

        assert_eq!(decoded, options);
        assert!(decoded.lazy_css());
        assert!(!decoded.async_css());
    }

    #[test]
    fn test_header_ext_bad_magic() {
        let mut out = OutputStream::new();
        out.write_u32(0xdead_beef);
        out.write_u32(0);
        let err = CompileOptions::decode_header_ext(&mut InputStream::new(out.into_inner()));
        assert_eq!(err.unwrap_err(), DecodeError::BadMagic(0xdead_beef));
    }

    #[test]
    fn test_engine_version_prefers_target_sdk() {
        let mut header = TemplateHeader {
            android_version: "1.4".to_string(),
            ..Default::default()
        };
        assert_eq!(header.engine_version(), "1.4");
        header.compile_options.target_sdk_version = "2.1".to_string();
        assert_eq!(header.engine_version(), "2.1");
    }
}
