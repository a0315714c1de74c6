//! # reel-ir
//!
//! The Reel animation model: documents made of vector elements plus the
//! SMIL-style attribute animations that drive them.
//!
//! Documents are parsed and validated once at load. The resulting
//! [`AnimationDirective`]s are immutable, and the [`Timeline`] evaluates
//! them as a pure function of elapsed time.

pub mod animation;
pub mod document;
pub mod parse;
pub mod timeline;
pub mod validate;
pub mod value;

pub use animation::{AnimationDirective, CalcMode, DirectiveSpec, FillMode, KeySpline, RepeatCount};
pub use document::{AnimationDocument, Element, ElementKind, RawAnimation};
pub use parse::{compile_animations, load_document};
pub use timeline::{AttributeOverrides, RepeatMode, Timeline, TimelineSnapshot};
pub use validate::{ensure_valid, validate_document};
pub use value::AttributeValue;
