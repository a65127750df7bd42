//! Section tags, magic words and enumerated compile options

/// Legacy lepus VM bundle ("LEPS")
pub const MAGIC_LEPUS: u32 = 0x5350_454C;
/// Modern quick VM bundle ("QUCK")
pub const MAGIC_QUICK: u32 = 0x4B43_5551;
/// `HeaderExtInfo` block magic
pub const HEADER_EXT_INFO_MAGIC: u32 = 0x4845_5849;

/// App type of a card bundle
pub const APP_TYPE_CARD: &str = "card";
/// App type of a lazy sub-bundle
pub const APP_TYPE_DYNAMIC_COMPONENT: &str = "dynamic_component";

/// Section type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BinarySection {
    String = 0,
    Css = 1,
    Js = 2,
    JsBytecode = 3,
    Component = 4,
    Page = 5,
    App = 6,
    Config = 7,
    RootLepus = 8,
    LepusChunk = 9,
    ElementTemplate = 10,
    ParsedStyles = 11,
    CustomSections = 12,
    Themed = 13,
    DynamicComponent = 14,
    UsingDynamicComponentInfo = 15,
    NewElementTemplate = 16,
    SectionRoute = 17,
}

impl BinarySection {
    pub fn from_u8(tag: u8) -> Option<Self> {
        use BinarySection::*;
        Some(match tag {
            0 => String,
            1 => Css,
            2 => Js,
            3 => JsBytecode,
            4 => Component,
            5 => Page,
            6 => App,
            7 => Config,
            8 => RootLepus,
            9 => LepusChunk,
            10 => ElementTemplate,
            11 => ParsedStyles,
            12 => CustomSections,
            13 => Themed,
            14 => DynamicComponent,
            15 => UsingDynamicComponentInfo,
            16 => NewElementTemplate,
            17 => SectionRoute,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        use BinarySection::*;
        match self {
            String => "STRING",
            Css => "CSS",
            Js => "JS",
            JsBytecode => "JS_BYTECODE",
            Component => "COMPONENT",
            Page => "PAGE",
            App => "APP",
            Config => "CONFIG",
            RootLepus => "ROOT_LEPUS",
            LepusChunk => "LEPUS_CHUNK",
            ElementTemplate => "ELEMENT_TEMPLATE",
            ParsedStyles => "PARSED_STYLES",
            CustomSections => "CUSTOM_SECTIONS",
            Themed => "THEMED",
            DynamicComponent => "DYNAMIC_COMPONENT",
            UsingDynamicComponentInfo => "USING_DYNAMIC_COMPONENT_INFO",
            NewElementTemplate => "NEW_ELEMENT_TEMPLATE",
            SectionRoute => "SECTION_ROUTE",
        }
    }
}

/// Routed decode order for fiber bundles
pub const FIBER_SECTION_ORDER: &[BinarySection] = &[
    BinarySection::String,
    BinarySection::ParsedStyles,
    BinarySection::ElementTemplate,
    BinarySection::Css,
    BinarySection::Js,
    BinarySection::JsBytecode,
    BinarySection::Config,
    BinarySection::RootLepus,
    BinarySection::LepusChunk,
    BinarySection::CustomSections,
    BinarySection::NewElementTemplate,
];

/// Routed decode order for legacy bundles
pub const LEGACY_SECTION_ORDER: &[BinarySection] = &[
    BinarySection::String,
    BinarySection::ParsedStyles,
    BinarySection::Css,
    BinarySection::Js,
    BinarySection::JsBytecode,
    BinarySection::Component,
    BinarySection::App,
    BinarySection::Page,
    BinarySection::Config,
    BinarySection::DynamicComponent,
    BinarySection::UsingDynamicComponentInfo,
    BinarySection::Themed,
    BinarySection::CustomSections,
];

/// Front-end tri-state compile option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeOption {
    #[default]
    Undefined = 0,
    Enable = 1,
    Disable = 2,
}

impl FeOption {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => FeOption::Enable,
            2 => FeOption::Disable,
            _ => FeOption::Undefined,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == FeOption::Enable
    }
}

/// Render architecture the bundle was compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchOption {
    #[default]
    Radon = 0,
    Fiber = 1,
    Air = 2,
}

impl ArchOption {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ArchOption::Fiber,
            2 => ArchOption::Air,
            _ => ArchOption::Radon,
        }
    }
}

/// Air mode of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AirMode {
    #[default]
    None = 0,
    Strict = 1,
}

impl AirMode {
    pub fn from_u8(value: u8) -> Self {
        if value == 1 { AirMode::Strict } else { AirMode::None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_tags_round_trip() {
        for tag in 0..=17u8 {
            let section = BinarySection::from_u8(tag).unwrap();
            assert_eq!(section.as_u8(), tag);
        }
        assert!(BinarySection::from_u8(18).is_none());
    }

    #[test]
    fn test_magic_spelling() {
        assert_eq!(&MAGIC_LEPUS.to_le_bytes(), b"LEPS");
        assert_eq!(&MAGIC_QUICK.to_le_bytes(), b"QUCK");
    }

    #[test]
    fn test_orders_start_with_strings() {
        assert_eq!(FIBER_SECTION_ORDER[0], BinarySection::String);
        assert_eq!(LEGACY_SECTION_ORDER[0], BinarySection::String);
        assert!(!LEGACY_SECTION_ORDER.contains(&BinarySection::RootLepus));
    }
}
