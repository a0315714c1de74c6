use std::collections::BTreeMap;

use reel_core::{Color, Size2D};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::AttributeValue;

/// A loaded animation document: vector content plus its animations.
///
/// The document-loading collaborator produces this from the source file;
/// the player only ever sees this parsed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationDocument {
    /// Unique document identifier, assigned at load when absent.
    #[serde(default = "new_document_id")]
    pub id: String,
    /// Intrinsic content width (view box units).
    pub width: f64,
    /// Intrinsic content height (view box units).
    pub height: f64,
    /// Fill painted under the content, inside the letterbox.
    #[serde(default)]
    pub background: Option<String>,
    /// Elements that are only painted through a `use` reference.
    #[serde(default)]
    pub defs: Vec<Element>,
    /// Painted elements, back to front.
    #[serde(default)]
    pub content: Vec<Element>,
    #[serde(default)]
    pub animations: Vec<RawAnimation>,
}

fn new_document_id() -> String {
    Uuid::new_v4().to_string()
}

impl AnimationDocument {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            id: new_document_id(),
            width,
            height,
            background: None,
            defs: Vec::new(),
            content: Vec::new(),
            animations: Vec::new(),
        }
    }

    pub fn size(&self) -> Size2D {
        Size2D::new(self.width, self.height)
    }

    pub fn background_color(&self) -> Option<Color> {
        self.background
            .as_deref()
            .and_then(|bg| Color::parse(bg).ok())
    }

    pub fn add_element(&mut self, element: Element) {
        self.content.push(element);
    }

    pub fn add_def(&mut self, element: Element) {
        self.defs.push(element);
    }

    pub fn add_animation(&mut self, animation: RawAnimation) {
        self.animations.push(animation);
    }

    /// Find an element by id anywhere in `defs` or `content`.
    pub fn find(&self, id: &str) -> Option<&Element> {
        self.defs
            .iter()
            .chain(self.content.iter())
            .find_map(|e| e.find(id))
    }

    /// All elements, depth-first, defs first.
    pub fn all_elements(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        for element in self.defs.iter().chain(self.content.iter()) {
            element.collect(&mut out);
        }
        out
    }
}

/// The geometric kind of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementKind {
    /// `x`, `y`, `width`, `height`.
    Rect,
    /// `cx`, `cy`, `rx`, `ry`.
    Ellipse,
    Group {
        #[serde(default)]
        children: Vec<Element>,
    },
    /// Paints the element named by `href` (or `xlink:href`), offset by `x`, `y`.
    Use,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub kind: ElementKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Element {
    fn with_kind(kind: ElementKind) -> Self {
        Self {
            id: None,
            kind,
            attributes: BTreeMap::new(),
        }
    }

    pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::with_kind(ElementKind::Rect)
            .attr("x", AttributeValue::Number(x))
            .attr("y", AttributeValue::Number(y))
            .attr("width", AttributeValue::Number(width))
            .attr("height", AttributeValue::Number(height))
    }

    pub fn ellipse(cx: f64, cy: f64, rx: f64, ry: f64) -> Self {
        Self::with_kind(ElementKind::Ellipse)
            .attr("cx", AttributeValue::Number(cx))
            .attr("cy", AttributeValue::Number(cy))
            .attr("rx", AttributeValue::Number(rx))
            .attr("ry", AttributeValue::Number(ry))
    }

    pub fn group(children: Vec<Element>) -> Self {
        Self::with_kind(ElementKind::Group { children })
    }

    pub fn use_ref(href: impl Into<String>) -> Self {
        Self::with_kind(ElementKind::Use).attr("xlink:href", AttributeValue::Text(href.into()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn fill(self, color: Color) -> Self {
        self.attr("fill", AttributeValue::Color(color))
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// The reference target of a `use` element, without the leading `#`.
    pub fn href(&self) -> Option<&str> {
        self.attribute("xlink:href")
            .or_else(|| self.attribute("href"))
            .and_then(AttributeValue::as_text)
            .map(|s| s.trim_start_matches('#'))
    }

    pub fn children(&self) -> &[Element] {
        match &self.kind {
            ElementKind::Group { children } => children.as_slice(),
            _ => &[],
        }
    }

    fn find(&self, id: &str) -> Option<&Element> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Element>) {
        out.push(self);
        for child in self.children() {
            child.collect(out);
        }
    }
}

/// One `<animate>` record as written in the document: SMIL attribute
/// strings, not yet validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnimation {
    /// Id of the animated element (`href` of the animate element).
    pub target: String,
    pub attribute_name: String,
    /// `;`-separated keyframe values.
    pub values: String,
    /// Clock value such as `2s`, `500ms`, `0.5min`.
    pub dur: String,
    #[serde(default)]
    pub repeat_count: Option<String>,
    #[serde(default)]
    pub calc_mode: Option<String>,
    #[serde(default)]
    pub key_times: Option<String>,
    #[serde(default)]
    pub key_splines: Option<String>,
    #[serde(default)]
    pub fill: Option<String>,
}

impl RawAnimation {
    pub fn new(
        target: impl Into<String>,
        attribute_name: impl Into<String>,
        values: impl Into<String>,
        dur: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            attribute_name: attribute_name.into(),
            values: values.into(),
            dur: dur.into(),
            ..Default::default()
        }
    }

    pub fn repeat_count(mut self, value: impl Into<String>) -> Self {
        self.repeat_count = Some(value.into());
        self
    }

    pub fn calc_mode(mut self, value: impl Into<String>) -> Self {
        self.calc_mode = Some(value.into());
        self
    }

    pub fn key_times(mut self, value: impl Into<String>) -> Self {
        self.key_times = Some(value.into());
        self
    }

    pub fn key_splines(mut self, value: impl Into<String>) -> Self {
        self.key_splines = Some(value.into());
        self
    }

    pub fn fill(mut self, value: impl Into<String>) -> Self {
        self.fill = Some(value.into());
        self
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.target, self.attribute_name)
    }
}
