//! Bundle encoder
//!
//! Produces bytes in the layout `TemplateBinaryReader` consumes, either as
//! a flat section list or as a routed body.

use std::collections::BTreeMap;

use serde_json::Value;

use super::css::{encode_css_section, encode_fragment};
use super::header::CompileOptions;
use super::reader::JS_BYTECODE_ENGINE_QUICK;
use super::section::{APP_TYPE_CARD, APP_TYPE_DYNAMIC_COMPONENT, BinarySection, MAGIC_QUICK};
use super::stream::OutputStream;
use super::value::{StringPoolBuilder, StringSink, encode_value};
use crate::bundle::css::SharedCssFragment;
use crate::bundle::template_cache::ElementTemplateInfo;
use crate::bundle::{ComponentMould, DynamicComponentMould, PageMould};
use crate::utils::version::{self, Version};

#[derive(Debug, Clone)]
pub struct TemplateBinaryWriter {
    magic: u32,
    legacy_version: String,
    ios_version: String,
    engine_version: String,
    compile_options: CompileOptions,
    template_info: Value,
    trial_options: Value,
    app_type: String,
    css_fragments: Vec<SharedCssFragment>,
    js: Vec<(String, String)>,
    js_bytecode: Vec<(String, Vec<u8>)>,
    config: Option<String>,
    root_lepus: Option<Vec<u8>>,
    lepus_chunks: Vec<(String, Vec<u8>)>,
    custom_sections: Vec<(String, Value)>,
    element_templates: Vec<(String, ElementTemplateInfo)>,
    parsed_styles: Vec<(String, Vec<SharedCssFragment>)>,
    page_moulds: Vec<PageMould>,
    component_moulds: Vec<ComponentMould>,
    dynamic_component_moulds: Vec<DynamicComponentMould>,
    declarations: BTreeMap<String, String>,
    themed: Option<Value>,
    app: Option<(Value, Vec<u8>)>,
    legacy_element_template: bool,
}

impl TemplateBinaryWriter {
    pub fn new(app_type: &str) -> Self {
        Self {
            magic: MAGIC_QUICK,
            legacy_version: "1.0.0".to_string(),
            ios_version: version::CURRENT_ENGINE_VERSION.to_string(),
            engine_version: version::CURRENT_ENGINE_VERSION.to_string(),
            compile_options: CompileOptions::default(),
            template_info: Value::Object(Default::default()),
            trial_options: Value::Null,
            app_type: app_type.to_string(),
            css_fragments: Vec::new(),
            js: Vec::new(),
            js_bytecode: Vec::new(),
            config: None,
            root_lepus: None,
            lepus_chunks: Vec::new(),
            custom_sections: Vec::new(),
            element_templates: Vec::new(),
            parsed_styles: Vec::new(),
            page_moulds: Vec::new(),
            component_moulds: Vec::new(),
            dynamic_component_moulds: Vec::new(),
            declarations: BTreeMap::new(),
            themed: None,
            app: None,
            legacy_element_template: false,
        }
    }

    pub fn card() -> Self {
        Self::new(APP_TYPE_CARD)
    }

    pub fn dynamic_component() -> Self {
        Self::new(APP_TYPE_DYNAMIC_COMPONENT)
    }

    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn legacy_version(mut self, version: &str) -> Self {
        self.legacy_version = version.to_string();
        self
    }

    pub fn engine_version(mut self, version: &str) -> Self {
        self.ios_version = version.to_string();
        self.engine_version = version.to_string();
        self
    }

    pub fn compile_options(mut self, options: CompileOptions) -> Self {
        self.compile_options = options;
        self
    }

    pub fn template_info(mut self, info: Value) -> Self {
        self.template_info = info;
        self
    }

    pub fn trial_options(mut self, options: Value) -> Self {
        self.compile_options.enable_trial_options = true;
        self.trial_options = options;
        self
    }

    pub fn css_fragment(mut self, fragment: SharedCssFragment) -> Self {
        self.css_fragments.push(fragment);
        self
    }

    pub fn js(mut self, path: &str, source: &str) -> Self {
        self.js.push((path.to_string(), source.to_string()));
        self
    }

    pub fn js_bytecode(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.js_bytecode.push((path.to_string(), bytes));
        self
    }

    pub fn config(mut self, json: &str) -> Self {
        self.config = Some(json.to_string());
        self
    }

    pub fn root_lepus(mut self, program: Vec<u8>) -> Self {
        self.root_lepus = Some(program);
        self
    }

    pub fn lepus_chunk(mut self, name: &str, program: Vec<u8>) -> Self {
        self.lepus_chunks.push((name.to_string(), program));
        self
    }

    pub fn custom_section(mut self, key: &str, value: Value) -> Self {
        self.custom_sections.push((key.to_string(), value));
        self
    }

    pub fn element_template(mut self, key: &str, info: ElementTemplateInfo) -> Self {
        self.element_templates.push((key.to_string(), info));
        self
    }

    pub fn parsed_styles(mut self, key: &str, fragments: Vec<SharedCssFragment>) -> Self {
        self.parsed_styles.push((key.to_string(), fragments));
        self
    }

    pub fn page_mould(mut self, mould: PageMould) -> Self {
        self.page_moulds.push(mould);
        self
    }

    pub fn component_mould(mut self, mould: ComponentMould) -> Self {
        self.component_moulds.push(mould);
        self
    }

    pub fn dynamic_component_mould(mut self, mould: DynamicComponentMould) -> Self {
        self.dynamic_component_moulds.push(mould);
        self
    }

    pub fn declaration(mut self, name: &str, url: &str) -> Self {
        self.declarations.insert(name.to_string(), url.to_string());
        self
    }

    pub fn themed(mut self, themed: Value) -> Self {
        self.themed = Some(themed);
        self
    }

    pub fn app(mut self, descriptor: Value, program: Vec<u8>) -> Self {
        self.app = Some((descriptor, program));
        self
    }

    /// Emit a legacy element-template section, which readers reject
    pub fn legacy_element_template(mut self) -> Self {
        self.legacy_element_template = true;
        self
    }

    fn target_sdk_version(&self) -> &str {
        if self.compile_options.target_sdk_version.is_empty() {
            &self.engine_version
        } else {
            &self.compile_options.target_sdk_version
        }
    }

    /// Encode into bundle bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut out = OutputStream::new();
        out.write_u32(0);
        out.write_u32(self.magic);
        out.write_string(&self.legacy_version);
        out.write_string(&self.ios_version);
        out.write_string(&self.engine_version);
        if Version::parse(&self.engine_version)
            >= Version::parse(version::FEATURE_HEADER_EXT_INFO_VERSION)
        {
            self.compile_options.encode_header_ext(&mut out);
        }
        if Version::parse(self.target_sdk_version())
            >= Version::parse(version::FEATURE_TEMPLATE_INFO_VERSION)
        {
            encode_value(&mut out, &self.template_info, &mut StringSink::Inline);
        }
        if self.compile_options.enable_trial_options {
            encode_value(&mut out, &self.trial_options, &mut StringSink::Inline);
        }
        out.write_string(&self.app_type);
        out.write_bool(false);

        let sections = self.encode_sections();
        if self.compile_options.enable_flexible_template {
            write_routed_body(&mut out, &sections);
        } else {
            out.write_u8(sections.len() as u8);
            for (_, bytes) in &sections {
                out.write_bytes(bytes);
            }
        }

        let total = out.len() as u32;
        out.patch_u32(0, total);
        out.into_inner()
    }

    /// Each entry is `u8 tag + body`; the string table comes first
    fn encode_sections(&self) -> Vec<(BinarySection, Vec<u8>)> {
        let mut pool = StringPoolBuilder::new();
        for (path, _) in &self.js_bytecode {
            pool.intern(path);
        }
        let mut sections = Vec::new();
        let mut push = |section: BinarySection, body: OutputStream| {
            let mut bytes = Vec::with_capacity(body.len() + 1);
            bytes.push(section.as_u8());
            bytes.extend_from_slice(body.as_slice());
            sections.push((section, bytes));
        };

        if !self.parsed_styles.is_empty() {
            let entries = self
                .parsed_styles
                .iter()
                .map(|(key, fragments)| {
                    let mut body = OutputStream::new();
                    body.write_compact_u32(fragments.len() as u32);
                    for fragment in fragments {
                        let mut encoded = OutputStream::new();
                        encode_fragment(&mut encoded, fragment, &mut pool);
                        body.write_compact_u32(encoded.len() as u32);
                        body.write_bytes(encoded.as_slice());
                    }
                    (key.clone(), body.into_inner())
                })
                .collect::<Vec<_>>();
            push(BinarySection::ParsedStyles, keyed_router(&entries));
        }
        if self.legacy_element_template {
            push(BinarySection::ElementTemplate, OutputStream::new());
        }
        if !self.css_fragments.is_empty() {
            let mut body = OutputStream::new();
            encode_css_section(&mut body, &self.css_fragments, &mut pool);
            push(BinarySection::Css, body);
        }
        if !self.js.is_empty() {
            let mut body = OutputStream::new();
            body.write_u32(self.js.len() as u32);
            for (path, source) in &self.js {
                body.write_string(path);
                body.write_string(source);
            }
            push(BinarySection::Js, body);
        }
        if !self.js_bytecode.is_empty() {
            let mut body = OutputStream::new();
            body.write_u32(JS_BYTECODE_ENGINE_QUICK);
            body.write_u32(self.js_bytecode.len() as u32);
            for (path, bytes) in &self.js_bytecode {
                body.write_compact_u32(pool.intern(path));
                body.write_compact_u64(bytes.len() as u64);
                body.write_bytes(bytes);
            }
            push(BinarySection::JsBytecode, body);
        }
        if !self.component_moulds.is_empty() {
            let mut body = OutputStream::new();
            body.write_compact_u32(self.component_moulds.len() as u32);
            for mould in &self.component_moulds {
                body.write_compact_u32(mould.id);
                body.write_string(&mould.name);
                body.write_string(&mould.path);
                body.write_compact_s32(mould.css_id);
            }
            push(BinarySection::Component, body);
        }
        if let Some((descriptor, program)) = &self.app {
            let mut body = OutputStream::new();
            encode_value(&mut body, descriptor, &mut StringSink::Pool(&mut pool));
            body.write_compact_u64(program.len() as u64);
            body.write_bytes(program);
            push(BinarySection::App, body);
        }
        if !self.page_moulds.is_empty() {
            let mut body = OutputStream::new();
            body.write_compact_u32(self.page_moulds.len() as u32);
            for mould in &self.page_moulds {
                body.write_compact_u32(mould.id);
                body.write_compact_s32(mould.css_id);
                encode_value(&mut body, &mould.data, &mut StringSink::Pool(&mut pool));
            }
            push(BinarySection::Page, body);
        }
        if let Some(config) = &self.config {
            let mut body = OutputStream::new();
            body.write_string(config);
            push(BinarySection::Config, body);
        }
        if let Some(program) = &self.root_lepus {
            let mut body = OutputStream::new();
            body.write_compact_u64(program.len() as u64);
            body.write_bytes(program);
            push(BinarySection::RootLepus, body);
        }
        if !self.lepus_chunks.is_empty() {
            let entries: Vec<(String, Vec<u8>)> = self.lepus_chunks.clone();
            push(BinarySection::LepusChunk, keyed_router(&entries));
        }
        if !self.dynamic_component_moulds.is_empty() {
            let mut body = OutputStream::new();
            body.write_compact_u32(self.dynamic_component_moulds.len() as u32);
            for mould in &self.dynamic_component_moulds {
                body.write_compact_u32(mould.id);
                body.write_string(&mould.name);
                body.write_string(&mould.path);
            }
            push(BinarySection::DynamicComponent, body);
        }
        if !self.declarations.is_empty() {
            let mut body = OutputStream::new();
            body.write_compact_u32(self.declarations.len() as u32);
            for (name, url) in &self.declarations {
                body.write_string(name);
                body.write_string(url);
            }
            push(BinarySection::UsingDynamicComponentInfo, body);
        }
        if let Some(themed) = &self.themed {
            let mut body = OutputStream::new();
            encode_value(&mut body, themed, &mut StringSink::Pool(&mut pool));
            push(BinarySection::Themed, body);
        }
        if !self.custom_sections.is_empty() {
            let mut body = OutputStream::new();
            body.write_compact_u32(self.custom_sections.len() as u32);
            for (key, value) in &self.custom_sections {
                body.write_string(key);
                encode_value(&mut body, value, &mut StringSink::Inline);
            }
            push(BinarySection::CustomSections, body);
        }
        if !self.element_templates.is_empty() {
            let entries = self
                .element_templates
                .iter()
                .map(|(key, info)| {
                    let value = serde_json::to_value(info).unwrap_or(Value::Null);
                    let mut body = OutputStream::new();
                    encode_value(&mut body, &value, &mut StringSink::Pool(&mut pool));
                    (key.clone(), body.into_inner())
                })
                .collect::<Vec<_>>();
            push(BinarySection::NewElementTemplate, keyed_router(&entries));
        }

        let mut strings = OutputStream::new();
        strings.write_compact_u32(pool.strings().len() as u32);
        for text in pool.strings() {
            strings.write_string(text);
        }
        let mut table = vec![BinarySection::String.as_u8()];
        table.extend_from_slice(strings.as_slice());
        sections.insert(0, (BinarySection::String, table));
        sections
    }
}

fn keyed_router(entries: &[(String, Vec<u8>)]) -> OutputStream {
    let mut body = OutputStream::new();
    let mut route = Vec::with_capacity(entries.len());
    for (key, bytes) in entries {
        let start = body.len();
        body.write_bytes(bytes);
        route.push((key, start, body.len()));
    }
    let mut out = OutputStream::new();
    out.write_compact_u32(route.len() as u32);
    for (key, start, end) in route {
        out.write_string(key);
        out.write_compact_u32(start as u32);
        out.write_compact_u32(end as u32);
    }
    out.write_compact_u32(body.len() as u32);
    out.write_bytes(body.as_slice());
    out
}

fn write_routed_body(out: &mut OutputStream, sections: &[(BinarySection, Vec<u8>)]) {
    out.write_u8(BinarySection::SectionRoute.as_u8());
    out.write_u8(0);
    out.write_compact_u32(sections.len() as u32);
    let mut cursor = 0usize;
    for (section, bytes) in sections {
        out.write_u8(section.as_u8());
        out.write_compact_u32(cursor as u32);
        out.write_compact_u32((cursor + bytes.len()) as u32);
        cursor += bytes.len();
    }
    for (_, bytes) in sections {
        out.write_bytes(bytes);
    }
}
