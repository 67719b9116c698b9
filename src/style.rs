use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::LabelError;
use crate::types::Color;

pub const DEFAULT_STYLE: &str = "product__body_1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl HAlign {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" | "0" => Some(Self::Left),
            "center" | "centre" | "1" => Some(Self::Center),
            "right" | "2" => Some(Self::Right),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for HAlign {
    // Accepts names or the numeric codes 0/1/2 used by older style tables.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let raw = match &value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "invalid alignment {other}"
                )));
            }
        };
        HAlign::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown alignment {raw}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    #[default]
    Top,
    #[serde(alias = "center")]
    Middle,
}

/// Concrete paragraph style after lookup and overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub name: String,
    pub font_name: String,
    pub font_size: f32,
    pub leading: f32,
    pub alignment: HAlign,
    pub left_indent: f32,
    pub valign: VAlign,
    pub text_color: Color,
}

/// Partial style. Every field that is set replaces the base style's value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleOverrides {
    #[serde(alias = "font_name")]
    pub font_name: Option<String>,
    #[serde(alias = "font_size")]
    pub font_size: Option<f32>,
    pub leading: Option<f32>,
    pub alignment: Option<HAlign>,
    #[serde(alias = "left_indent")]
    pub left_indent: Option<f32>,
    #[serde(alias = "valign", alias = "v_align")]
    pub v_align: Option<VAlign>,
    #[serde(alias = "text_color", deserialize_with = "deserialize_color")]
    pub text_color: Option<Color>,
}

fn deserialize_color<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Color>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => Color::from_hex(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color {raw}"))),
    }
}

impl StyleOverrides {
    pub fn is_empty(&self) -> bool {
        *self == StyleOverrides::default()
    }

    /// `self` on top of `base`: fields set here win.
    pub fn merged_over(&self, base: &StyleOverrides) -> StyleOverrides {
        StyleOverrides {
            font_name: self.font_name.clone().or_else(|| base.font_name.clone()),
            font_size: self.font_size.or(base.font_size),
            leading: self.leading.or(base.leading),
            alignment: self.alignment.or(base.alignment),
            left_indent: self.left_indent.or(base.left_indent),
            v_align: self.v_align.or(base.v_align),
            text_color: self.text_color.or(base.text_color),
        }
    }
}

// `leading` is kept only when the entry set it; otherwise it follows the resolved font size.
#[derive(Debug, Clone)]
struct StyleEntry {
    style: Style,
    leading: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct StyleSheet {
    styles: BTreeMap<String, StyleEntry>,
}

impl Default for StyleSheet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StyleSheet {
    /// Product and contractor label styles.
    pub fn builtin() -> Self {
        let mut sheet = Self {
            styles: BTreeMap::new(),
        };
        let entries: [(&str, &str, f32, HAlign, VAlign); 10] = [
            ("product__title", "TimesNewRoman", 12.0, HAlign::Center, VAlign::Middle),
            ("product__body_1", "Tahoma", 7.0, HAlign::Left, VAlign::Top),
            ("product__body_2", "Tahoma", 6.0, HAlign::Left, VAlign::Top),
            ("product__caption", "Georgia", 8.0, HAlign::Center, VAlign::Middle),
            ("product__nutrition", "Tahoma Bold", 6.0, HAlign::Left, VAlign::Top),
            ("product__date", "Tahoma Bold", 7.0, HAlign::Left, VAlign::Top),
            ("product__info", "Tahoma", 5.0, HAlign::Left, VAlign::Top),
            ("contractor__title", "Roboto Semibold", 14.0, HAlign::Center, VAlign::Middle),
            ("contractor__body", "Roboto Medium", 10.0, HAlign::Left, VAlign::Top),
            ("contractor__info", "Roboto Medium", 6.0, HAlign::Left, VAlign::Top),
        ];
        for (name, font, size, alignment, valign) in entries {
            sheet.insert_entry(
                Style {
                    name: name.to_string(),
                    font_name: font.to_string(),
                    font_size: size,
                    leading: size,
                    alignment,
                    left_indent: 0.0,
                    valign,
                    text_color: Color::BLACK,
                },
                None,
            );
        }
        sheet
    }

    /// Adds a concrete style; its leading is kept as set.
    pub fn insert(&mut self, style: Style) {
        let leading = Some(style.leading);
        self.insert_entry(style, leading);
    }

    fn insert_entry(&mut self, style: Style, leading: Option<f32>) {
        self.styles
            .insert(style.name.clone(), StyleEntry { style, leading });
    }

    pub fn get(&self, name: &str) -> Option<&Style> {
        self.styles.get(name).map(|entry| &entry.style)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.styles.keys().map(String::as_str)
    }

    /// Built-in styles extended with the named entries of a JSON object.
    pub fn from_json(json: &str) -> Result<Self, LabelError> {
        let mut sheet = Self::builtin();
        sheet.extend_from_json(json)?;
        Ok(sheet)
    }

    /// Adds or redefines styles from `{ "name": { "fontSize": 8, ... } }`. An entry may name a
    /// `parent` style to start from; otherwise it starts from the default style.
    pub fn extend_from_json(&mut self, json: &str) -> Result<(), LabelError> {
        #[derive(Deserialize)]
        struct Entry {
            #[serde(default)]
            parent: Option<String>,
            #[serde(flatten)]
            overrides: StyleOverrides,
        }

        let entries: BTreeMap<String, Entry> = serde_json::from_str(json)?;
        for (name, entry) in entries {
            let parent = entry.parent.as_deref().unwrap_or(DEFAULT_STYLE);
            if entry.parent.is_some() && self.get(parent).is_none() {
                return Err(LabelError::input(format!(
                    "style {name} references unknown parent {parent}"
                )));
            }
            let leading = entry
                .overrides
                .leading
                .or_else(|| self.styles.get(parent).and_then(|p| p.leading));
            let mut style = self.resolve(parent, &entry.overrides);
            style.name = name;
            self.insert_entry(style, leading);
        }
        Ok(())
    }

    fn default_entry(&self) -> StyleEntry {
        self.styles.get(DEFAULT_STYLE).cloned().unwrap_or_else(|| StyleEntry {
            style: Style {
                name: DEFAULT_STYLE.to_string(),
                font_name: "Helvetica".to_string(),
                font_size: 7.0,
                leading: 7.0,
                alignment: HAlign::Left,
                left_indent: 0.0,
                valign: VAlign::Top,
                text_color: Color::BLACK,
            },
            leading: None,
        })
    }

    /// Named style with `overrides` applied. Unknown names resolve to the default style.
    /// Leading comes from the overrides, then the entry, then the resolved font size.
    pub fn resolve(&self, name: &str, overrides: &StyleOverrides) -> Style {
        let StyleEntry {
            style: mut style,
            leading,
        } = match self.styles.get(name) {
            Some(entry) => entry.clone(),
            None => {
                log::debug!("style {name} not found, using {DEFAULT_STYLE}");
                self.default_entry()
            }
        };
        if let Some(font_name) = &overrides.font_name {
            style.font_name = font_name.clone();
        }
        if let Some(size) = overrides.font_size {
            style.font_size = size;
        }
        style.leading = overrides.leading.or(leading).unwrap_or(style.font_size);
        if let Some(alignment) = overrides.alignment {
            style.alignment = alignment;
        }
        if let Some(indent) = overrides.left_indent {
            style.left_indent = indent;
        }
        if let Some(valign) = overrides.v_align {
            style.valign = valign;
        }
        if let Some(color) = overrides.text_color {
            style.text_color = color;
        }
        style
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_falls_back_to_default() {
        let sheet = StyleSheet::builtin();
        let style = sheet.resolve("missing__style", &StyleOverrides::default());
        assert_eq!(style.name, DEFAULT_STYLE);
        assert_eq!(style.font_size, 7.0);
    }

    #[test]
    fn overrides_take_precedence_and_drive_leading() {
        let sheet = StyleSheet::builtin();
        let overrides = StyleOverrides {
            font_size: Some(9.5),
            alignment: Some(HAlign::Right),
            ..Default::default()
        };
        let style = sheet.resolve("product__title", &overrides);
        assert_eq!(style.font_size, 9.5);
        assert_eq!(style.leading, 9.5);
        assert_eq!(style.alignment, HAlign::Right);
        assert_eq!(style.font_name, "TimesNewRoman");

        let explicit = StyleOverrides {
            font_size: Some(9.5),
            leading: Some(11.0),
            ..Default::default()
        };
        assert_eq!(sheet.resolve("product__title", &explicit).leading, 11.0);
    }

    #[test]
    fn builtin_registry_has_all_label_styles() {
        let sheet = StyleSheet::builtin();
        for name in [
            "product__title",
            "product__body_1",
            "product__body_2",
            "product__caption",
            "product__nutrition",
            "product__date",
            "product__info",
            "contractor__title",
            "contractor__body",
            "contractor__info",
        ] {
            assert!(sheet.get(name).is_some(), "{name}");
        }
    }

    #[test]
    fn json_styles_extend_registry() {
        let sheet = StyleSheet::from_json(
            r##"{
                "promo": {"parent": "product__title", "fontSize": 16, "textColor": "#ff0000"},
                "tiny": {"font_size": 4, "alignment": 2, "vAlign": "middle"}
            }"##,
        )
        .unwrap();
        let promo = sheet.get("promo").unwrap();
        assert_eq!(promo.font_name, "TimesNewRoman");
        assert_eq!(promo.font_size, 16.0);
        assert_eq!(promo.leading, 16.0);
        assert_eq!(promo.text_color, Color::rgb(1.0, 0.0, 0.0));
        let tiny = sheet.get("tiny").unwrap();
        assert_eq!(tiny.alignment, HAlign::Right);
        assert_eq!(tiny.valign, VAlign::Middle);
        assert_eq!(tiny.font_name, "Tahoma");
    }

    #[test]
    fn entry_leading_survives_resolution() {
        let sheet = StyleSheet::from_json(
            r#"{
                "loose": {"fontSize": 8, "leading": 12},
                "looser": {"parent": "loose", "fontSize": 9}
            }"#,
        )
        .unwrap();
        assert_eq!(sheet.get("loose").unwrap().leading, 12.0);
        assert_eq!(
            sheet.resolve("loose", &StyleOverrides::default()).leading,
            12.0
        );
        let bigger = StyleOverrides {
            font_size: Some(10.0),
            ..Default::default()
        };
        assert_eq!(sheet.resolve("loose", &bigger).leading, 12.0);
        let tighter = StyleOverrides {
            leading: Some(9.0),
            ..Default::default()
        };
        assert_eq!(sheet.resolve("loose", &tighter).leading, 9.0);
        assert_eq!(sheet.resolve("looser", &StyleOverrides::default()).leading, 12.0);
        // Entries without their own leading still track the font size.
        assert_eq!(sheet.resolve("product__title", &bigger).leading, 10.0);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = StyleSheet::from_json(r#"{"x": {"parent": "nope"}}"#).unwrap_err();
        assert!(matches!(err, LabelError::Input(_)));
    }
}
