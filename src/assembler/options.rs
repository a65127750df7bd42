//! Options threaded through the load and update pipelines

use serde_json::{Value, json};

use crate::utils::time::current_time_micros;

/// How a data update should be applied to the page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePageOption {
    /// Update came from the host rather than from script
    pub from_native: bool,
    /// Replace the page data instead of merging into it
    pub reset_page_data: bool,
    pub update_first_time: bool,
    pub reload_template: bool,
    pub reload_from_js: bool,
    pub global_props_changed: bool,
}

impl UpdatePageOption {
    pub fn from_native() -> Self {
        Self {
            from_native: true,
            ..Self::default()
        }
    }

    pub fn reset() -> Self {
        Self {
            from_native: true,
            reset_page_data: true,
            ..Self::default()
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "fromNative": self.from_native,
            "resetPageData": self.reset_page_data,
            "updateFirstTime": self.update_first_time,
            "reloadTemplate": self.reload_template,
            "reloadFromJS": self.reload_from_js,
            "globalPropsChanged": self.global_props_changed,
        })
    }

    /// True if the host should hear about this update through
    /// `on_data_updated`
    pub fn notifies_host(&self) -> bool {
        (self.from_native && !self.reload_template && !self.reload_from_js)
            || (self.from_native && self.reset_page_data)
    }
}

/// Identity and timing switches of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub pipeline_id: String,
    pub pipeline_origin: String,
    pub need_timestamps: bool,
    pub is_first_screen: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            pipeline_id: format!("pipeline-{}", current_time_micros()),
            pipeline_origin: String::new(),
            need_timestamps: false,
            is_first_screen: false,
        }
    }
}

impl PipelineOptions {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.pipeline_origin = origin.into();
        self
    }

    pub fn to_value(&self) -> Value {
        json!({
            "pipelineID": self.pipeline_id,
            "pipelineOrigin": self.pipeline_origin,
            "needTimestamps": self.need_timestamps,
            "isFirstScreen": self.is_first_screen,
        })
    }
}

/// Host switches for one `load_template` call
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub pipeline: PipelineOptions,
    /// Render without telling script the page is ready
    pub pre_painting: bool,
    /// Hand a fully decoded copy of the bundle back to the host
    pub recycle_bundle: bool,
}

/// A data update produced by the background script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDataTask {
    pub component_id: String,
    pub data: Value,
    pub callback_id: i64,
    pub update_type: UpdateDataType,
    /// Script stack of the caller, kept for tracing
    pub stacks: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateDataType {
    #[default]
    SetState,
    SetData,
    Reload,
}

impl UpdateDataTask {
    pub fn new(component_id: impl Into<String>, data: Value) -> Self {
        Self {
            component_id: component_id.into(),
            data,
            callback_id: -1,
            ..Self::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.component_id.is_empty() || self.component_id == CARD_COMPONENT_ID
    }
}

/// Component id script uses for the page itself
pub const CARD_COMPONENT_ID: &str = "card";
