use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ElementDrawError, LabelError};
use crate::style::{StyleOverrides, DEFAULT_STYLE};
use crate::types::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementKind {
    #[default]
    Text,
    Image,
    Barcode,
    BarcodeV2,
}

impl ElementKind {
    /// Unrecognized names draw as text.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "barcode" => Self::Barcode,
            "barcode_v2" => Self::BarcodeV2,
            _ => Self::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Barcode => "barcode",
            Self::BarcodeV2 => "barcode_v2",
        }
    }
}

impl<'de> Deserialize<'de> for ElementKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().map(ElementKind::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ElementOptions {
    #[serde(deserialize_with = "lenient_number")]
    pub min_fontsize: Option<f32>,
}

/// One positioned drawable. Geometry is in millimeters from the top-left page corner.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ElementSpec {
    #[serde(deserialize_with = "lenient_number")]
    pub x: Option<f32>,
    #[serde(deserialize_with = "lenient_number")]
    pub y: Option<f32>,
    #[serde(deserialize_with = "lenient_number")]
    pub width: Option<f32>,
    #[serde(deserialize_with = "lenient_number")]
    pub height: Option<f32>,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub style: Option<String>,
    pub options: ElementOptions,
    pub filename: Option<String>,
    pub debug: bool,
    pub style_overrides: StyleOverrides,
}

// Numbers, numeric strings and null. Anything else reads as absent and is reported by
// `ElementSpec::rect`.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

impl ElementSpec {
    pub fn style_name(&self) -> &str {
        self.style.as_deref().unwrap_or(DEFAULT_STYLE)
    }

    /// Element box in points. Fails when a coordinate is malformed or a dimension is not positive.
    pub fn rect(&self) -> Result<Rect, ElementDrawError> {
        let x = self.x.ok_or(ElementDrawError::MalformedField { field: "x" })?;
        let y = self.y.ok_or(ElementDrawError::MalformedField { field: "y" })?;
        let width = self
            .width
            .filter(|w| *w > 0.0)
            .ok_or(ElementDrawError::MalformedField { field: "width" })?;
        let height = self
            .height
            .filter(|h| *h > 0.0)
            .ok_or(ElementDrawError::MalformedField { field: "height" })?;
        Ok(Rect::from_mm(x, y, width, height))
    }

    /// Geometry and style only, with the outline forced on.
    pub fn preview_outline(&self) -> ElementSpec {
        ElementSpec {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            style: self.style.clone(),
            debug: true,
            ..Default::default()
        }
    }
}

/// Element specs in template document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Elements(Vec<(String, ElementSpec)>);

impl Elements {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends `spec`, replacing an existing element with the same key in place.
    pub fn insert(&mut self, key: impl Into<String>, spec: ElementSpec) {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = spec;
        } else {
            self.0.push((key, spec));
        }
    }

    pub fn get(&self, key: &str) -> Option<&ElementSpec> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ElementSpec)> {
        self.0.iter().map(|(k, spec)| (k.as_str(), spec))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ElementSpec)> for Elements {
    fn from_iter<I: IntoIterator<Item = (String, ElementSpec)>>(iter: I) -> Self {
        let mut elements = Elements::new();
        for (key, spec) in iter {
            elements.insert(key, spec);
        }
        elements
    }
}

impl<'de> Deserialize<'de> for Elements {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ElementsVisitor;

        impl<'de> Visitor<'de> for ElementsVisitor {
            type Value = Elements;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of element specs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Elements, A::Error> {
                let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, spec)) = map.next_entry::<String, ElementSpec>()? {
                    if out.iter().any(|(k, _): &(String, ElementSpec)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate element key {key}")));
                    }
                    out.push((key, spec));
                }
                Ok(Elements(out))
            }
        }

        deserializer.deserialize_map(ElementsVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Template {
    #[serde(default, deserialize_with = "lenient_number")]
    pub width: Option<f32>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub height: Option<f32>,
    #[serde(default)]
    pub elements: Elements,
}

impl Template {
    pub fn new(width_mm: f32, height_mm: f32, elements: Elements) -> Self {
        Self {
            width: Some(width_mm),
            height: Some(height_mm),
            elements,
        }
    }

    /// Parses and validates a template document.
    pub fn from_json(json: &str) -> Result<Self, LabelError> {
        let template: Template = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    /// Page size in millimeters. Only meaningful after [`Template::validate`].
    pub fn page_size_mm(&self) -> (f32, f32) {
        (self.width.unwrap_or(0.0), self.height.unwrap_or(0.0))
    }

    /// Page-level checks only. Element geometry and filenames are checked per element while
    /// drawing, so one bad element never rejects the whole label.
    pub fn validate(&self) -> Result<(), LabelError> {
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if !value.is_some_and(|v| v > 0.0) {
                return Err(LabelError::input(format!(
                    "template {field} must be a positive number"
                )));
            }
        }
        Ok(())
    }

    /// Outline-only copy of the template with a payload naming each element by its key.
    pub fn preview(&self) -> (Template, Payload) {
        let elements = self
            .elements
            .iter()
            .map(|(key, spec)| (key.to_string(), spec.preview_outline()))
            .collect();
        let payload = self
            .elements
            .keys()
            .map(|key| (key.to_string(), Value::String(key.to_string())))
            .collect();
        (
            Template {
                width: self.width,
                height: self.height,
                elements,
            },
            payload,
        )
    }
}

/// Render-time values keyed by element key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, LabelError> {
        let value: Value = serde_json::from_str(json)?;
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Payload::new()),
            _ => Err(LabelError::input("payload must be a JSON object")),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The value as drawable text. Absent and null values are empty.
    pub fn text(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Payload(iter.into_iter().collect())
    }
}
