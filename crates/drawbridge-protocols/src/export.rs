//! Versioned annotation export document for external tooling.

use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, AnnotationKind, TargetDescriptor, Viewport};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: String,
    /// Export time, epoch milliseconds.
    pub timestamp: i64,
    pub viewport: Viewport,
    pub pathname: String,
    pub annotations: Vec<ExportedAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedAnnotation {
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub id: String,
    #[serde(flatten)]
    pub target: TargetDescriptor,
    pub timestamp: i64,
    pub pathname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl From<&Annotation> for ExportedAnnotation {
    fn from(annotation: &Annotation) -> Self {
        Self {
            kind: annotation.kind,
            id: annotation.id.clone(),
            target: annotation.target.clone(),
            timestamp: annotation.timestamp,
            pathname: annotation.pathname.clone(),
            comment: Some(annotation.comment.clone()).filter(|c| !c.is_empty()),
        }
    }
}

impl ExportDocument {
    /// Build a document for `pathname`. The viewport is taken from the most
    /// recent annotation on that page.
    pub fn for_page<'a>(
        pathname: impl Into<String>,
        annotations: impl IntoIterator<Item = &'a Annotation>,
    ) -> Self {
        let pathname = pathname.into();
        let selected: Vec<&Annotation> = annotations
            .into_iter()
            .filter(|a| pathname.is_empty() || a.pathname == pathname)
            .collect();
        let viewport = selected
            .iter()
            .max_by_key(|a| a.timestamp)
            .map(|a| a.viewport)
            .unwrap_or_default();

        Self {
            version: EXPORT_VERSION.to_string(),
            timestamp: crate::now_millis(),
            viewport,
            pathname,
            annotations: selected.into_iter().map(ExportedAnnotation::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationDraft;

    fn stored(id: &str, pathname: &str, comment: &str) -> Annotation {
        let draft = AnnotationDraft::element(
            TargetDescriptor::new(".btn").with_tag_name("button"),
            comment,
        )
        .with_pathname(pathname);
        Annotation::from_draft(id, draft)
    }

    #[test]
    fn test_export_filters_by_pathname() {
        let all = vec![
            stored("a1", "/", "bigger"),
            stored("a2", "/pricing", "smaller"),
            stored("a3", "/", ""),
        ];
        let doc = ExportDocument::for_page("/", &all);
        assert_eq!(doc.version, EXPORT_VERSION);
        assert_eq!(doc.annotations.len(), 2);
        assert_eq!(doc.annotations[0].id, "a1");
        assert!(doc.annotations[1].comment.is_none());
    }

    #[test]
    fn test_export_flattens_target() {
        let all = vec![stored("a1", "/", "bigger")];
        let json = serde_json::to_value(ExportDocument::for_page("", &all)).unwrap();
        let first = &json["annotations"][0];
        assert_eq!(first["type"], "element");
        assert_eq!(first["selector"], ".btn");
        assert_eq!(first["tagName"], "button");
        assert!(first["boundingBox"].get("width").is_some());
        assert!(json["viewport"].get("scrollX").is_some());
    }
}
