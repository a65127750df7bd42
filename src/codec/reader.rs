//! Bundle decoder
//!
//! Decoding runs header -> app type -> body. A flat body is a counted list
//! of sections. A routed body starts with a section route whose offsets are
//! relative to the cursor after the route; sections are then visited in the
//! canonical order for the bundle's architecture.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use serde_json::Value;

use super::css::decode_css_route;
use super::decoder::{SectionDecoder, element_template_entry, parsed_styles_entry};
use super::header::{CompileOptions, TemplateHeader};
use super::section::{
    APP_TYPE_CARD, ArchOption, BinarySection, FIBER_SECTION_ORDER, LEGACY_SECTION_ORDER,
    MAGIC_LEPUS, MAGIC_QUICK,
};
use super::stream::{DecodeResult, InputStream};
use super::value::{StringSource, decode_value};
use crate::bundle::css::CssStyleSheetManager;
use crate::bundle::template_cache::LazyKeyedCache;
use crate::bundle::{
    ComponentMould, ContextBundle, DynamicComponentMould, JsContent, LepusChunkManager,
    PageMould, TemplateBundle,
};
use crate::config::{PageConfig, ThemedTrans};
use crate::thread::WorkerPool;
use crate::utils::error::DecodeError;
use crate::utils::version::{self, Version};

/// Bytecode engine id understood by this build
pub const JS_BYTECODE_ENGINE_QUICK: u32 = 1;

/// Knobs for one decode
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Reject bundles whose app type differs
    pub expected_app_type: Option<String>,
    /// Decode CSS greedily even if the bundle asks for lazy decoding
    pub disable_lazy_css_decode: bool,
    /// Decode every section greedily on the calling thread
    pub force_greedy: bool,
    /// Pool for async decoding; the shared pool when unset
    pub worker_pool: Option<WorkerPool>,
}

/// Check `min <= version <= max`, naming all three on failure
pub fn check_version(kind: &str, version: &str, min: &str, max: &str) -> DecodeResult<()> {
    let parsed = Version::parse(version);
    if parsed.within(&Version::parse(min), &Version::parse(max)) {
        return Ok(());
    }
    Err(DecodeError::Version(format!(
        "{} version mismatch: binary version {}, client version {}, min supported version {}",
        kind, version, max, min
    )))
}

pub struct TemplateBinaryReader {
    stream: InputStream,
    options: ReaderOptions,
    header: TemplateHeader,
    compile_options: Arc<CompileOptions>,
    strings: Arc<Vec<String>>,
    section_route: BTreeMap<BinarySection, Range<usize>>,
    error_message: String,
}

impl TemplateBinaryReader {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::with_options(bytes, ReaderOptions::default())
    }

    pub fn with_options(bytes: impl Into<Arc<[u8]>>, options: ReaderOptions) -> Self {
        Self {
            stream: InputStream::new(bytes),
            options,
            header: TemplateHeader::default(),
            compile_options: Arc::new(CompileOptions::default()),
            strings: Arc::new(Vec::new()),
            section_route: BTreeMap::new(),
            error_message: String::new(),
        }
    }

    pub fn header(&self) -> &TemplateHeader {
        &self.header
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.compile_options
    }

    /// Absolute section ranges of a routed body
    pub fn section_route(&self) -> &BTreeMap<BinarySection, Range<usize>> {
        &self.section_route
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Reader over the same bytes that decodes everything greedily
    pub fn create_recycler(&self) -> TemplateBundleRecycler {
        TemplateBundleRecycler {
            bytes: self.stream.data().clone(),
            options: self.options.clone(),
        }
    }

    /// Decode the whole bundle
    pub fn decode(&mut self) -> DecodeResult<TemplateBundle> {
        let result = self.decode_internal();
        if let Err(err) = &result {
            self.error_message = err.to_string();
            log::error!("template decode failed: {}", self.error_message);
        }
        result
    }

    fn decode_internal(&mut self) -> DecodeResult<TemplateBundle> {
        self.stream.seek(0)?;
        self.section_route.clear();
        self.decode_header()?;

        let mut bundle = TemplateBundle::new();
        bundle.magic = self.header.magic;
        bundle.total_size = self.stream.len();
        bundle.app_type = self.header.app_type.clone();
        bundle.legacy_version = self.header.legacy_version.clone();
        bundle.compile_options = (*self.compile_options).clone();
        bundle.template_info = self.header.template_info.clone();
        bundle.trial_options = self.header.trial_options.clone();
        bundle.support_component_js = Version::parse(&self.header.legacy_version)
            > Version::parse(version::NEED_CONSOLE_LEPUS_VERSION);

        if self.compile_options.enable_flexible_template {
            self.decode_routed_body(&mut bundle)?;
        } else {
            self.decode_flat_body(&mut bundle)?;
        }
        self.finish(&mut bundle);
        log::debug!(
            "decoded {} bundle: {} bytes, {} strings, {} js files",
            bundle.app_type,
            bundle.total_size,
            bundle.string_pool.len(),
            bundle.js_bundle.len()
        );
        Ok(bundle)
    }

    fn decode_header(&mut self) -> DecodeResult<()> {
        let stream = &mut self.stream;
        let total_size = stream.read_u32()?;
        if total_size as usize != stream.len() {
            return Err(DecodeError::SizeMismatch {
                expected: total_size,
                actual: stream.len(),
            });
        }
        let magic = stream.read_u32()?;
        if magic != MAGIC_LEPUS && magic != MAGIC_QUICK {
            return Err(DecodeError::BadMagic(magic));
        }
        let legacy_version = stream.read_string()?;
        check_version(
            "lepus",
            &legacy_version,
            version::MIN_SUPPORTED_LEPUS_VERSION,
            version::LEPUS_VERSION,
        )?;
        let ios_version = stream.read_string()?;
        let android_version = stream.read_string()?;
        check_version(
            "engine",
            &android_version,
            version::MIN_SUPPORTED_VERSION,
            version::CURRENT_ENGINE_VERSION,
        )?;

        let mut options = if Version::parse(&android_version)
            >= Version::parse(version::FEATURE_HEADER_EXT_INFO_VERSION)
        {
            CompileOptions::decode_header_ext(stream)?
        } else {
            CompileOptions::default()
        };
        if options.target_sdk_version.is_empty() {
            options.target_sdk_version = android_version.clone();
        } else {
            check_version(
                "target sdk",
                &options.target_sdk_version,
                version::MIN_SUPPORTED_VERSION,
                version::CURRENT_ENGINE_VERSION,
            )?;
        }

        let template_info = if Version::parse(&options.target_sdk_version)
            >= Version::parse(version::FEATURE_TEMPLATE_INFO_VERSION)
        {
            Some(decode_value(stream, StringSource::Inline)?)
        } else {
            None
        };
        let trial_options = if options.enable_trial_options {
            Some(decode_value(stream, StringSource::Inline)?)
        } else {
            None
        };

        let app_type = stream.read_string()?;
        if let Some(expected) = &self.options.expected_app_type {
            if *expected != app_type {
                return Err(DecodeError::Invalid(format!(
                    "app type mismatch, expect {}, actual {}",
                    expected, app_type
                )));
            }
        }
        let _snapshot = stream.read_bool()?;

        self.header = TemplateHeader {
            total_size,
            magic,
            legacy_version,
            ios_version,
            android_version,
            compile_options: options.clone(),
            template_info,
            trial_options,
            app_type,
        };
        self.compile_options = Arc::new(options);
        Ok(())
    }

    fn decode_flat_body(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let count = self.stream.read_u8()?;
        for _ in 0..count {
            let tag = self.stream.read_u8()?;
            self.decode_specific_section(tag, bundle)?;
        }
        Ok(())
    }

    fn decode_routed_body(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        self.decode_section_route()?;
        let order = if self.compile_options.enable_fiber_arch {
            FIBER_SECTION_ORDER
        } else {
            LEGACY_SECTION_ORDER
        };
        for section in order {
            let Some(range) = self.section_route.get(section).cloned() else {
                continue;
            };
            self.stream.seek(range.start)?;
            let tag = self.stream.read_u8()?;
            self.decode_specific_section(tag, bundle)?;
            if self.stream.offset() > range.end {
                return Err(DecodeError::Invalid(format!(
                    "section {} overruns its route",
                    section.as_str()
                )));
            }
        }
        Ok(())
    }

    fn decode_section_route(&mut self) -> DecodeResult<()> {
        let tag = self.stream.read_u8()?;
        if tag != BinarySection::SectionRoute.as_u8() {
            return Err(DecodeError::Invalid(format!(
                "expected section route, found tag {}",
                tag
            )));
        }
        let _route_kind = self.stream.read_u8()?;
        let count = self.stream.read_compact_u32()?;
        let mut raw = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let tag = self.stream.read_u8()?;
            let section = BinarySection::from_u8(tag).ok_or(DecodeError::UnknownSection(tag))?;
            let start = self.stream.read_compact_u32()? as usize;
            let end = self.stream.read_compact_u32()? as usize;
            raw.push((section, start, end));
        }
        let base = self.stream.offset();
        for (section, start, end) in raw {
            let range = base + start..base + end;
            if start > end || range.end > self.stream.len() {
                return Err(DecodeError::Invalid(format!(
                    "section {} route {}..{} is out of bounds",
                    section.as_str(),
                    range.start,
                    range.end
                )));
            }
            self.section_route.insert(section, range);
        }
        Ok(())
    }

    fn decoder(&self) -> SectionDecoder {
        SectionDecoder::new(
            self.stream.clone(),
            self.strings.clone(),
            self.compile_options.clone(),
        )
    }

    fn worker_pool(&self) -> WorkerPool {
        self.options
            .worker_pool
            .clone()
            .unwrap_or_else(WorkerPool::shared)
    }

    fn decode_specific_section(&mut self, tag: u8, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let section = BinarySection::from_u8(tag).ok_or(DecodeError::UnknownSection(tag))?;
        log::trace!("decoding section {}", section.as_str());
        match section {
            BinarySection::String => self.decode_string_section(bundle),
            BinarySection::Css => self.decode_css_section(bundle),
            BinarySection::Js => self.decode_js_section(bundle),
            BinarySection::JsBytecode => self.decode_js_bytecode_section(bundle),
            BinarySection::Config => self.decode_config_section(bundle),
            BinarySection::RootLepus => {
                bundle.context_bundle = Some(self.read_context_bundle()?);
                Ok(())
            }
            BinarySection::LepusChunk => self.decode_lepus_chunk_section(bundle),
            BinarySection::ElementTemplate => Err(DecodeError::Invalid(
                "The legacy element template is no longer supported. Please upgrade the \
                 compiler to use the new element template."
                    .to_string(),
            )),
            BinarySection::NewElementTemplate => {
                let (router, decoder) = self.read_keyed_router()?;
                let cache = LazyKeyedCache::with_router(router, decoder, element_template_entry);
                if self.options.force_greedy {
                    cache.decode_all()?;
                }
                bundle.element_templates = Arc::new(cache);
                Ok(())
            }
            BinarySection::ParsedStyles => {
                let (router, decoder) = self.read_keyed_router()?;
                if matches!(self.compile_options.arch_option, ArchOption::Fiber | ArchOption::Air)
                {
                    let cache = LazyKeyedCache::with_router(router, decoder, parsed_styles_entry);
                    if self.options.force_greedy {
                        cache.decode_all()?;
                    }
                    bundle.parsed_styles = Arc::new(cache);
                }
                Ok(())
            }
            BinarySection::CustomSections => {
                let count = self.stream.read_compact_u32()?;
                for _ in 0..count {
                    let key = self.stream.read_string()?;
                    let value = decode_value(&mut self.stream, StringSource::Inline)?;
                    bundle.custom_sections.insert(key, value);
                }
                Ok(())
            }
            BinarySection::Page => {
                let count = self.stream.read_compact_u32()?;
                for _ in 0..count {
                    let id = self.stream.read_compact_u32()?;
                    let css_id = self.stream.read_compact_s32()?;
                    let data = self.read_pooled_value()?;
                    bundle.page_moulds.insert(id, PageMould { id, css_id, data });
                }
                Ok(())
            }
            BinarySection::Component => {
                let count = self.stream.read_compact_u32()?;
                for _ in 0..count {
                    let id = self.stream.read_compact_u32()?;
                    let name = self.stream.read_string()?;
                    let path = self.stream.read_string()?;
                    let css_id = self.stream.read_compact_s32()?;
                    bundle.component_moulds.insert(
                        id,
                        ComponentMould {
                            id,
                            name,
                            path,
                            css_id,
                        },
                    );
                }
                Ok(())
            }
            BinarySection::DynamicComponent => {
                let count = self.stream.read_compact_u32()?;
                for _ in 0..count {
                    let id = self.stream.read_compact_u32()?;
                    let name = self.stream.read_string()?;
                    let path = self.stream.read_string()?;
                    bundle
                        .dynamic_component_moulds
                        .insert(id, DynamicComponentMould { id, name, path });
                }
                Ok(())
            }
            BinarySection::UsingDynamicComponentInfo => {
                let count = self.stream.read_compact_u32()?;
                for _ in 0..count {
                    let name = self.stream.read_string()?;
                    let url = self.stream.read_string()?;
                    bundle.dynamic_component_declarations.insert(name, url);
                }
                Ok(())
            }
            BinarySection::Themed => {
                let value = self.read_pooled_value()?;
                let themed: ThemedTrans = serde_json::from_value(value)
                    .map_err(|e| DecodeError::Invalid(format!("themed section: {}", e)))?;
                bundle.themed = Some(themed);
                Ok(())
            }
            BinarySection::App => {
                let descriptor = self.read_pooled_value()?;
                if let Some(name) = descriptor.get("name").and_then(Value::as_str) {
                    bundle.app_name = name.to_string();
                }
                bundle.app_descriptor = descriptor;
                let program = self.read_context_bundle()?;
                if !program.is_empty() && bundle.context_bundle.is_none() {
                    bundle.context_bundle = Some(program);
                }
                Ok(())
            }
            BinarySection::SectionRoute => Err(DecodeError::Invalid(
                "section route can only lead the body".to_string(),
            )),
        }
    }

    fn read_pooled_value(&mut self) -> DecodeResult<Value> {
        decode_value(&mut self.stream, StringSource::Pool(&self.strings))
    }

    fn read_context_bundle(&mut self) -> DecodeResult<ContextBundle> {
        let len = self.stream.read_compact_u64()? as usize;
        Ok(ContextBundle::new(self.stream.read_bytes(len)?))
    }

    fn decode_string_section(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let count = self.stream.read_compact_u32()?;
        let mut strings = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            strings.push(self.stream.read_string()?);
        }
        self.strings = Arc::new(strings);
        bundle.string_pool = self.strings.clone();
        Ok(())
    }

    fn decode_css_section(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let route = decode_css_route(&mut self.stream)?;
        let manager = Arc::new(CssStyleSheetManager::with_route(
            route.fragments,
            self.decoder(),
        ));
        let lazy = self.compile_options.lazy_css() && !self.options.disable_lazy_css_decode;
        let async_decode = self.compile_options.async_css();
        if self.options.force_greedy || (!lazy && !async_decode) {
            manager.decode_all()?;
        } else if async_decode {
            manager.start_async_decode(&self.worker_pool());
        }
        bundle.css = manager;
        self.stream.seek(route.end)
    }

    fn decode_js_section(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let count = self.stream.read_u32()?;
        for _ in 0..count {
            let path = self.stream.read_string()?;
            let content = self.stream.read_string()?;
            bundle.js_bundle.insert(path, JsContent::Source(content));
        }
        Ok(())
    }

    fn decode_js_bytecode_section(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let engine = self.stream.read_u32()?;
        if engine != JS_BYTECODE_ENGINE_QUICK {
            return Err(DecodeError::Invalid(format!(
                "unsupported js bytecode engine {}",
                engine
            )));
        }
        let count = self.stream.read_u32()?;
        for _ in 0..count {
            let index = self.stream.read_compact_u32()? as usize;
            let path = self.strings.get(index).cloned().ok_or_else(|| {
                DecodeError::Invalid(format!("bytecode path index {} out of range", index))
            })?;
            let len = self.stream.read_compact_u64()? as usize;
            let bytes = self.stream.read_bytes(len)?;
            bundle.js_bundle.insert(path, JsContent::Bytecode(bytes));
        }
        Ok(())
    }

    fn decode_config_section(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let text = self.stream.read_string()?;
        let config = PageConfig::from_json_str(&text)
            .map_err(|e| DecodeError::Invalid(format!("parse page config failed: {}", e)))?;
        bundle.page_config = Some(config);
        Ok(())
    }

    /// `compactU32 count, (str name, compactU32 start, compactU32 end)*,
    /// compactU32 body_len, body`
    fn decode_lepus_chunk_section(&mut self, bundle: &mut TemplateBundle) -> DecodeResult<()> {
        let (route, decoder) = self.read_keyed_router()?;
        let manager = Arc::new(LepusChunkManager::with_route(route, decoder));
        if self.options.force_greedy {
            manager.decode_all()?;
        } else if self.compile_options.enable_async_lepus_chunk_decode {
            manager.start_async_decode(&self.worker_pool());
        }
        bundle.lepus_chunks = manager;
        Ok(())
    }

    /// Router shared by chunks, element templates and parsed styles.
    /// Leaves the cursor after the body.
    fn read_keyed_router(&mut self) -> DecodeResult<(BTreeMap<String, Range<usize>>, SectionDecoder)> {
        let count = self.stream.read_compact_u32()?;
        let mut raw = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let key = self.stream.read_string()?;
            let start = self.stream.read_compact_u32()? as usize;
            let end = self.stream.read_compact_u32()? as usize;
            raw.push((key, start, end));
        }
        let body_len = self.stream.read_compact_u32()? as usize;
        let base = self.stream.offset();
        let mut router = BTreeMap::new();
        for (key, start, end) in raw {
            if start > end || end > body_len {
                return Err(DecodeError::Invalid(format!(
                    "entry {} range {}..{} exceeds body of {} bytes",
                    key, start, end, body_len
                )));
            }
            router.insert(key, base + start..base + end);
        }
        self.stream.skip(body_len)?;
        Ok((router, self.decoder()))
    }

    fn finish(&self, bundle: &mut TemplateBundle) {
        let options = &self.compile_options;
        let config = bundle.page_config.get_or_insert_with(PageConfig::default);
        config.target_sdk_version = options.target_sdk_version.clone();
        config.enable_fiber_arch = options.enable_fiber_arch;
        config.radon_mode = options.radon_mode;
        config.support_component_js = bundle.support_component_js;
        config.themed = bundle.themed.clone();
        if bundle.app_name.is_empty() && bundle.app_type == APP_TYPE_CARD {
            bundle.app_name = "card".to_string();
        }
    }
}

/// Produces a fully decoded copy of a bundle for sharing with other
/// instances
#[derive(Debug, Clone)]
pub struct TemplateBundleRecycler {
    bytes: Arc<[u8]>,
    options: ReaderOptions,
}

impl TemplateBundleRecycler {
    /// Greedy decode with fresh managers and baked CSS
    pub fn complete_decode(&self) -> DecodeResult<TemplateBundle> {
        let options = ReaderOptions {
            force_greedy: true,
            ..self.options.clone()
        };
        let mut reader = TemplateBinaryReader::with_options(self.bytes.clone(), options);
        let bundle = reader.decode()?;
        for id in bundle.css.fragment_ids() {
            bundle.css.get_baked_fragment(id)?;
        }
        Ok(bundle)
    }
}
