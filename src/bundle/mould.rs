//! Moulds and script payloads carried by a bundle

use serde_json::Value;

/// Initial data of a page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMould {
    pub id: u32,
    pub css_id: i32,
    pub data: Value,
}

/// A statically declared component
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentMould {
    pub id: u32,
    pub name: String,
    pub path: String,
    pub css_id: i32,
}

/// A lazy-bundle component referenced by the page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicComponentMould {
    pub id: u32,
    pub name: String,
    pub path: String,
}

/// Script source shipped for the background thread
#[derive(Debug, Clone, PartialEq)]
pub enum JsContent {
    Source(String),
    Bytecode(Vec<u8>),
}

impl JsContent {
    pub fn len(&self) -> usize {
        match self {
            JsContent::Source(source) => source.len(),
            JsContent::Bytecode(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_bytecode(&self) -> bool {
        matches!(self, JsContent::Bytecode(_))
    }
}
