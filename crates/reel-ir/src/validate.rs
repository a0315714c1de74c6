use std::collections::HashSet;

use reel_core::{ReelError, ReelResult};

use crate::document::{AnimationDocument, ElementKind};

/// Validate a document for structural correctness.
///
/// Animation attribute syntax is checked separately, when the animations
/// are compiled.
pub fn validate_document(document: &AnimationDocument) -> Result<(), Vec<ReelError>> {
    let mut errors = Vec::new();

    let valid_extent = |v: f64| v > 0.0 && v.is_finite();
    if !valid_extent(document.width) || !valid_extent(document.height) {
        errors.push(ReelError::Validation(format!(
            "document size must be positive, got {}x{}",
            document.width, document.height
        )));
    }

    if let Some(bg) = &document.background {
        if document.background_color().is_none() {
            errors.push(ReelError::Validation(format!(
                "invalid background color '{}'",
                bg
            )));
        }
    }

    let elements = document.all_elements();

    let mut ids = HashSet::new();
    for element in &elements {
        if let Some(id) = &element.id {
            if !ids.insert(id.as_str()) {
                errors.push(ReelError::Validation(format!("duplicate element id '{}'", id)));
            }
        }
    }

    for element in &elements {
        if element.kind != ElementKind::Use {
            continue;
        }
        match element.href() {
            Some(target) if ids.contains(target) => {}
            Some(target) => errors.push(ReelError::Validation(format!(
                "use element references unknown id '{}'",
                target
            ))),
            None => errors.push(ReelError::Validation(
                "use element without href".into(),
            )),
        }
    }

    for animation in &document.animations {
        if !ids.contains(animation.target.as_str()) {
            errors.push(ReelError::Validation(format!(
                "animation '{}' targets unknown id '{}'",
                animation.label(),
                animation.target
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// [`validate_document`] folded into a single error, for callers that only
/// need to know whether the document can be played.
pub fn ensure_valid(document: &AnimationDocument) -> ReelResult<()> {
    validate_document(document).map_err(|errors| {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        ReelError::Validation(joined)
    })
}
