// Preview postMessage protocol
// Typed message unions exchanged between the host (preview bridge) and
// the injected runtime inside the sandboxed preview document. This is
// the only channel across the trust boundary: the sandbox may contain
// arbitrary generated markup, so nothing but these serializable
// messages crosses in either direction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime interaction mode; `preview` follows links, `design` selects elements
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    Preview,
    Design,
}

/// Sibling reorder direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Commands sent host -> runtime. All mutation commands address an
/// element by its synthetic id; a stale or unknown id is a silent no-op.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum HostCommand {
    ModeChange {
        mode: InteractionMode,
    },
    /// Replace the element's outer markup
    UpdateElement {
        id: String,
        new_html: String,
    },
    /// Targeted field edits from the inspector panel
    UpdateElementManual {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        class_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        dom_id: Option<String>,
        #[serde(rename = "innerHTML", skip_serializing_if = "Option::is_none")]
        inner_html: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        inner_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        src: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
    /// Set a single inline style property
    UpdateElementStyle {
        id: String,
        property: String,
        value: String,
    },
    ActionMove {
        id: String,
        direction: MoveDirection,
    },
    ActionDelete {
        id: String,
    },
    ActionDuplicate {
        id: String,
    },
    ActionSelectParent {
        id: String,
    },
}

/// Events reported runtime -> host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RuntimeEvent {
    ElementSelected {
        #[serde(flatten)]
        payload: SelectedElementPayload,
    },
    Deselect,
    /// Full serialized document after a mutation; the runtime has no
    /// persistence of its own, so this is how edits become durable.
    DocumentUpdated {
        html: String,
    },
    /// Preview-mode navigation intent for a same-document `.html` link
    NavigateFile {
        file_name: String,
    },
    /// Published read-only viewer variant of NavigateFile
    ViewerNavigate {
        file_name: String,
    },
}

/// Selection report for the host-side inspector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectedElementPayload {
    /// Synthetic element id (`ai-el-<random>`), assigned lazily on first
    /// selection; never stable across document reloads
    pub id: String,
    pub tag_name: String,
    pub dom_id: String,
    pub class_name: String,
    #[serde(rename = "innerHTML")]
    pub inner_html: String,
    pub inner_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(rename = "outerHTML")]
    pub outer_html: String,
    /// Best-effort ancestor path, nearest-last, at most 4 labels with a
    /// leading sentinel when truncated
    pub dom_path: String,
    /// Effective visual style over the editable property set
    pub styles: BTreeMap<String, String>,
    pub rect: ElementRect,
}

/// Bounding rectangle of the selected element. The server-side document
/// model performs no layout; real geometry is attached browser-side.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Event envelope stamped with the document generation it was produced
/// under. The bridge increments the generation on every iframe reload
/// and discards events from earlier generations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEnvelope {
    pub generation: u64,
    #[serde(flatten)]
    pub event: RuntimeEvent,
}
