use std::sync::Arc;

use reel_core::{Color, Duration, ManualClock, ReelError};
use reel_ir::{compile_animations, load_document, AttributeValue, Timeline};

const SPINNER: &str = r##"{
    "width": 64,
    "height": 32,
    "background": "#ffffff",
    "defs": [
        { "id": "frame0", "type": "rect", "attributes": { "x": 0, "y": 0, "width": 8, "height": 8, "fill": "red" } },
        { "id": "frame1", "type": "ellipse", "attributes": { "cx": 4, "cy": 4, "rx": 4, "ry": 4, "fill": "blue" } }
    ],
    "content": [
        { "id": "flip", "type": "use", "attributes": { "xlink:href": "#frame0", "x": 10, "y": 10 } },
        { "type": "group", "children": [
            { "id": "bar", "type": "rect", "attributes": { "x": 0, "y": 24, "width": 0, "height": 4, "fill": "#000000" } }
        ] }
    ],
    "animations": [
        { "target": "flip", "attributeName": "xlink:href", "values": "#frame0;#frame1", "dur": "500ms", "repeatCount": "indefinite", "calcMode": "discrete" },
        { "target": "bar", "attributeName": "width", "values": "0;64", "dur": "2s", "fill": "freeze" },
        { "target": "bar", "attributeName": "fill", "values": "#000000;#ffffff", "dur": "2s", "fill": "remove" }
    ]
}"##;

fn timeline_for(json: &str) -> (Arc<ManualClock>, Timeline) {
    let document = load_document(json).unwrap();
    let directives = compile_animations(&document).unwrap();
    let clock = Arc::new(ManualClock::new());
    let mut timeline = Timeline::new(clock.clone());
    timeline.load(directives);
    (clock, timeline)
}

#[test]
fn test_load_assigns_id_and_keeps_structure() {
    let document = load_document(SPINNER).unwrap();
    assert!(!document.id.is_empty());
    assert_eq!(document.defs.len(), 2);
    assert_eq!(
        document.find("bar").unwrap().attribute("width"),
        Some(&AttributeValue::Number(0.0))
    );
    assert_eq!(document.find("flip").unwrap().href(), Some("frame0"));
    assert_eq!(document.background_color(), Some(Color::WHITE));
}

#[test]
fn test_playback_through_document() {
    let (clock, mut timeline) = timeline_for(SPINNER);
    timeline.set_loop_enabled(false);
    assert_eq!(timeline.duration(), Duration::from_seconds(2.0));

    clock.advance(Duration::from_millis(750.0));
    let overrides = timeline.resolve_now();
    assert_eq!(
        overrides.get("flip", "xlink:href"),
        Some(&AttributeValue::Text("#frame1".into()))
    );
    let width = overrides.get("bar", "width").and_then(AttributeValue::as_number).unwrap();
    assert!((width - 24.0).abs() < 1e-9);

    clock.advance(Duration::from_seconds(5.0));
    let overrides = timeline.resolve_now();
    assert!(timeline.has_ended());
    assert_eq!(overrides.get("bar", "width"), Some(&AttributeValue::Number(64.0)));
    // fill="remove" falls back to the element's own paint.
    assert_eq!(
        overrides.get("bar", "fill").and_then(AttributeValue::as_color),
        Some(Color::BLACK)
    );
}

#[test]
fn test_bad_clock_value_names_the_directive() {
    let json = SPINNER.replace("\"dur\": \"2s\", \"fill\": \"freeze\"", "\"dur\": \"soon\"");
    let document = load_document(&json).unwrap();
    match compile_animations(&document).unwrap_err() {
        ReelError::Parse { directive, .. } => assert_eq!(directive, "bar.width"),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn test_dangling_use_is_rejected_at_load() {
    let json = SPINNER.replace("\"#frame0\", \"x\"", "\"#missing\", \"x\"");
    let err = load_document(&json).unwrap_err();
    assert!(matches!(err, ReelError::Validation(_)));
    assert!(err.to_string().contains("missing"));
}
