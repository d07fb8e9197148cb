use super::*;

fn button_draft() -> AnnotationDraft {
    AnnotationDraft::element(
        TargetDescriptor::new(".btn")
            .with_text("Get Started")
            .with_tag_name("button"),
        "make it bigger",
    )
    .with_pathname("/")
}

#[test]
fn test_from_draft_starts_pending() {
    let annotation = Annotation::from_draft("a1", button_draft());
    assert_eq!(annotation.id, "a1");
    assert_eq!(annotation.state, AnnotationState::Pending);
    assert_eq!(annotation.attempts, 0);
    assert_eq!(annotation.target.selector, ".btn");
    assert!(annotation.received_at > 0);
    assert!(annotation.is_pending());
}

#[test]
fn test_from_draft_fills_missing_timestamp() {
    let mut draft = button_draft();
    draft.timestamp = 0;
    let annotation = Annotation::from_draft("a1", draft);
    assert_eq!(annotation.timestamp, annotation.received_at);
}

#[test]
fn test_apply_resolve_records_summary() {
    let mut annotation = Annotation::from_draft("a1", button_draft());
    annotation.apply(&LifecycleEvent::Acknowledge).unwrap();
    let state = annotation
        .apply(&LifecycleEvent::Resolve {
            summary: "padding doubled".to_string(),
        })
        .unwrap();
    assert_eq!(state, AnnotationState::Resolved);
    assert_eq!(annotation.resolution.as_deref(), Some("padding doubled"));
}

#[test]
fn test_apply_rejected_leaves_record_untouched() {
    let mut annotation = Annotation::from_draft("a1", button_draft());
    let before = annotation.clone();
    let err = annotation
        .apply(&LifecycleEvent::Resolve {
            summary: "nope".to_string(),
        })
        .unwrap_err();
    assert_eq!(err.from, AnnotationState::Pending);
    assert_eq!(annotation, before);
}

#[test]
fn test_apply_fail_counts_attempts() {
    let mut annotation = Annotation::from_draft("a1", button_draft());
    for round in 1..=2 {
        annotation.apply(&LifecycleEvent::Acknowledge).unwrap();
        annotation
            .apply(&LifecycleEvent::Fail {
                reason: format!("exit {round}"),
            })
            .unwrap();
        assert_eq!(annotation.attempts, round);
    }
    assert!(annotation.is_pending());
    assert_eq!(annotation.last_failure.as_deref(), Some("exit 2"));
}

#[test]
fn test_apply_reset_clears_outcome() {
    let mut annotation = Annotation::from_draft("a1", button_draft());
    annotation
        .apply(&LifecycleEvent::Dismiss {
            reason: "duplicate".to_string(),
        })
        .unwrap();
    annotation.apply(&LifecycleEvent::Reset).unwrap();
    assert!(annotation.is_pending());
    assert!(annotation.dismiss_reason.is_none());
}

#[test]
fn test_annotation_wire_is_camel_case() {
    let annotation = Annotation::from_draft("a1", button_draft());
    let json = serde_json::to_value(&annotation).unwrap();
    assert_eq!(json["target"]["tagName"], "button");
    assert_eq!(json["state"], "pending");
    assert_eq!(json["kind"], "element");
    assert!(json.get("receivedAt").is_some());
    assert!(json.get("lastFailure").is_none());
}

#[test]
fn test_draft_deserialization_is_lenient() {
    let json = r#"{
        "type": "drawing",
        "comment": "circle this",
        "drawing": {"strokes": [[{"x": 1, "y": 2}, {"x": 3, "y": 4}]], "color": "red"},
        "viewport": {"width": 1280, "height": 720, "scrollY": 40}
    }"#;
    let draft: AnnotationDraft = serde_json::from_str(json).unwrap();
    assert_eq!(draft.kind, AnnotationKind::Drawing);
    assert!(draft.id.is_none());
    assert_eq!(draft.drawing.as_ref().unwrap().point_count(), 2);
    assert_eq!(draft.viewport.scroll_y, 40.0);
    assert_eq!(draft.viewport.scroll_x, 0.0);
    assert!(draft.target.selector.is_empty());
}

#[test]
fn test_target_optional_fields() {
    let json = r#"{"selector":".card","cssClasses":["card","shadow"],"attributes":{"data-id":"7"}}"#;
    let target: TargetDescriptor = serde_json::from_str(json).unwrap();
    assert_eq!(target.css_classes.as_ref().unwrap().len(), 2);
    assert_eq!(target.attributes.as_ref().unwrap()["data-id"], "7");
}
