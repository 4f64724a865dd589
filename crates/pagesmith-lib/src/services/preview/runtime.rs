// Injection protocol runtime
// The component that lives inside the sandboxed preview document. It
// holds the document model and a little mutable interaction state, and
// talks to the host exclusively through the typed message unions in
// models::protocol. It performs no I/O and never touches anything
// outside its own document; a command addressing a synthetic id that no
// longer exists is a silent no-op.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;

use crate::models::{
    ElementRect, HostCommand, InteractionMode, MoveDirection, RuntimeEvent, SelectedElementPayload,
};
use crate::services::navigation::internal_page_target;

use super::dom::{Document, Element, Node, NodePath};

/// Attribute carrying the synthetic element id
pub const SYNTHETIC_ID_ATTR: &str = "data-ai-el";

/// Maximum ancestor labels reported in a dom path before truncation
const DOM_PATH_DEPTH: usize = 4;
const DOM_PATH_SENTINEL: &str = "\u{2026}";

/// The fixed set of CSS properties reported as an element's effective
/// visual style. Inline declarations win over computed values; the
/// server-side model has no layout engine, so only inline declarations
/// are observable here.
pub const EDITABLE_STYLE_PROPS: &[&str] = &[
    "color",
    "background-color",
    "background-image",
    "background-size",
    "background-position",
    "font-size",
    "font-family",
    "font-weight",
    "font-style",
    "line-height",
    "letter-spacing",
    "text-align",
    "text-decoration",
    "text-transform",
    "margin",
    "margin-top",
    "margin-right",
    "margin-bottom",
    "margin-left",
    "padding",
    "padding-top",
    "padding-right",
    "padding-bottom",
    "padding-left",
    "border",
    "border-width",
    "border-style",
    "border-color",
    "border-radius",
    "width",
    "height",
    "max-width",
    "min-height",
    "display",
    "position",
    "top",
    "right",
    "bottom",
    "left",
    "flex-direction",
    "justify-content",
    "align-items",
    "gap",
    "opacity",
    "box-shadow",
    "z-index",
    "overflow",
];

/// Runtime state scoped to one document load. Rebuilt from scratch on
/// every reload; reload already invalidates identity-based selection,
/// so there is no cross-reload state to preserve.
pub struct PreviewRuntime {
    doc: Document,
    mode: InteractionMode,
    selected: Option<String>,
}

impl PreviewRuntime {
    /// Parse a fresh document. Synthetic ids left over in persisted
    /// markup are stripped; identity never survives a reload.
    pub fn new(html: &str) -> Self {
        let mut doc = Document::parse(html);
        strip_synthetic_ids(&mut doc.nodes);
        Self {
            doc,
            mode: InteractionMode::Preview,
            selected: None,
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn serialize_document(&self) -> String {
        self.doc.serialize()
    }

    /// Simulate a document-capture-phase click on the first element
    /// matching `selector` (supported forms: `tag`, `#id`, `.class`).
    pub fn click(&mut self, selector: &str) -> Vec<RuntimeEvent> {
        let Some(path) = self.find_selector(selector) else {
            return Vec::new();
        };
        match self.mode {
            InteractionMode::Design => self.select_path(&path),
            InteractionMode::Preview => self.navigate_from(&path),
        }
    }

    /// Apply a host command, returning the events it produces.
    pub fn handle_command(&mut self, command: HostCommand) -> Vec<RuntimeEvent> {
        match command {
            HostCommand::ModeChange { mode } => {
                // Idempotent: re-sending the current mode is harmless
                self.mode = mode;
                Vec::new()
            }
            HostCommand::UpdateElement { id, new_html } => self.replace_outer(&id, &new_html),
            HostCommand::UpdateElementManual {
                id,
                class_name,
                dom_id,
                inner_html,
                inner_text,
                src,
                alt,
            } => {
                let Some(path) = self.find_synthetic(&id) else {
                    return Vec::new();
                };
                let Some(el) = self.doc.element_mut(&path) else {
                    return Vec::new();
                };
                if let Some(value) = class_name {
                    el.set_attr("class", &value);
                }
                if let Some(value) = dom_id {
                    el.set_attr("id", &value);
                }
                if let Some(value) = src {
                    el.set_attr("src", &value);
                }
                if let Some(value) = alt {
                    el.set_attr("alt", &value);
                }
                if let Some(value) = inner_html {
                    el.children = Document::parse_fragment(&value);
                }
                if let Some(value) = inner_text {
                    el.set_inner_text(&value);
                }
                self.document_updated()
            }
            HostCommand::UpdateElementStyle {
                id,
                property,
                value,
            } => {
                let Some(path) = self.find_synthetic(&id) else {
                    return Vec::new();
                };
                if let Some(el) = self.doc.element_mut(&path) {
                    el.set_style_property(&property, &value);
                }
                self.document_updated()
            }
            HostCommand::ActionMove { id, direction } => self.move_element(&id, direction),
            HostCommand::ActionDelete { id } => self.delete_element(&id),
            HostCommand::ActionDuplicate { id } => self.duplicate_element(&id),
            HostCommand::ActionSelectParent { id } => self.select_parent(&id),
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn select_path(&mut self, path: &NodePath) -> Vec<RuntimeEvent> {
        // Unhighlight the previous selection before anything else
        self.selected = None;

        let dom_path = self.dom_path_label(path);
        let Some(el) = self.doc.element_mut(path) else {
            return Vec::new();
        };
        let id = match el.attr(SYNTHETIC_ID_ATTR) {
            Some(existing) => existing.to_string(),
            None => {
                let fresh = new_synthetic_id();
                el.set_attr(SYNTHETIC_ID_ATTR, &fresh);
                fresh
            }
        };

        let styles: BTreeMap<String, String> = el
            .inline_styles()
            .into_iter()
            .filter(|(prop, _)| EDITABLE_STYLE_PROPS.contains(&prop.as_str()))
            .collect();

        let payload = SelectedElementPayload {
            id: id.clone(),
            tag_name: el.tag.to_ascii_uppercase(),
            dom_id: el.attr("id").unwrap_or_default().to_string(),
            class_name: el.attr("class").unwrap_or_default().to_string(),
            inner_html: el.inner_html(),
            inner_text: el.inner_text(),
            src: el.attr("src").map(str::to_string),
            alt: el.attr("alt").map(str::to_string),
            outer_html: el.outer_html(),
            dom_path,
            styles,
            // No layout engine in the document model; geometry is
            // attached browser-side
            rect: ElementRect::default(),
        };

        self.selected = Some(id);
        vec![RuntimeEvent::ElementSelected { payload }]
    }

    fn navigate_from(&self, path: &NodePath) -> Vec<RuntimeEvent> {
        // Walk self-then-ancestors looking for an anchor, like a click
        // bubbling to the nearest <a>
        let mut candidates: Vec<&Element> = Vec::new();
        if let Some(el) = self.doc.element(path) {
            candidates.push(el);
        }
        let mut ancestors = self.doc.ancestor_elements(path);
        ancestors.reverse();
        candidates.extend(ancestors);

        for el in candidates {
            if el.tag != "a" {
                continue;
            }
            let Some(href) = el.attr("href") else {
                return Vec::new();
            };
            // Default navigation is always suppressed; only internal
            // page links produce an intent
            return match internal_page_target(href) {
                Some(file_name) => vec![RuntimeEvent::NavigateFile { file_name }],
                None => Vec::new(),
            };
        }
        Vec::new()
    }

    fn select_parent(&mut self, id: &str) -> Vec<RuntimeEvent> {
        let Some(path) = self.find_synthetic(id) else {
            return Vec::new();
        };
        if path.len() < 2 {
            return Vec::new();
        }
        let parent_path: NodePath = path[..path.len() - 1].to_vec();
        if self.doc.element(&parent_path).is_none() {
            return Vec::new();
        }
        // Re-dispatch the selection path rather than duplicating it
        self.select_path(&parent_path)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    fn replace_outer(&mut self, id: &str, new_html: &str) -> Vec<RuntimeEvent> {
        let Some(path) = self.find_synthetic(id) else {
            return Vec::new();
        };
        let replacement = Document::parse_fragment(new_html);
        let Some((siblings, index)) = self.doc.siblings_mut(&path) else {
            return Vec::new();
        };
        siblings.splice(index..=index, replacement);
        self.document_updated()
    }

    fn move_element(&mut self, id: &str, direction: MoveDirection) -> Vec<RuntimeEvent> {
        let Some(path) = self.find_synthetic(id) else {
            return Vec::new();
        };
        let Some((siblings, index)) = self.doc.siblings_mut(&path) else {
            return Vec::new();
        };
        // Reorder among element siblings only; text and comment nodes
        // keep their positions relative to the swap
        let target = match direction {
            MoveDirection::Up => siblings[..index]
                .iter()
                .rposition(|node| matches!(node, Node::Element(_))),
            MoveDirection::Down => siblings[index + 1..]
                .iter()
                .position(|node| matches!(node, Node::Element(_)))
                .map(|offset| index + 1 + offset),
        };
        let Some(target) = target else {
            // Already first/last element sibling
            return Vec::new();
        };
        siblings.swap(index, target);
        self.document_updated()
    }

    fn delete_element(&mut self, id: &str) -> Vec<RuntimeEvent> {
        let Some(path) = self.find_synthetic(id) else {
            return Vec::new();
        };
        let Some((siblings, index)) = self.doc.siblings_mut(&path) else {
            return Vec::new();
        };
        siblings.remove(index);
        self.selected = None;
        let mut events = vec![RuntimeEvent::Deselect];
        events.extend(self.document_updated());
        events
    }

    fn duplicate_element(&mut self, id: &str) -> Vec<RuntimeEvent> {
        let Some(path) = self.find_synthetic(id) else {
            return Vec::new();
        };
        let Some(el) = self.doc.element(&path) else {
            return Vec::new();
        };
        let mut clone = el.clone();
        // The clone gets a fresh synthetic id, never the source's; ids
        // inside the subtree are dropped and reassigned on selection
        clone.remove_attr_recursive(SYNTHETIC_ID_ATTR);
        clone.set_attr(SYNTHETIC_ID_ATTR, &new_synthetic_id());
        let Some((siblings, index)) = self.doc.siblings_mut(&path) else {
            return Vec::new();
        };
        siblings.insert(index + 1, Node::Element(clone));
        self.document_updated()
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn document_updated(&self) -> Vec<RuntimeEvent> {
        vec![RuntimeEvent::DocumentUpdated {
            html: self.doc.serialize(),
        }]
    }

    fn find_synthetic(&self, id: &str) -> Option<NodePath> {
        self.doc
            .find_path(|el| el.attr(SYNTHETIC_ID_ATTR) == Some(id))
    }

    fn find_selector(&self, selector: &str) -> Option<NodePath> {
        if let Some(id) = selector.strip_prefix('#') {
            self.doc.find_path(|el| el.attr("id") == Some(id))
        } else if let Some(class) = selector.strip_prefix('.') {
            self.doc.find_path(|el| {
                el.attr("class")
                    .map(|c| c.split_whitespace().any(|part| part == class))
                    .unwrap_or(false)
            })
        } else {
            let tag = selector.to_ascii_lowercase();
            self.doc.find_path(|el| el.tag == tag)
        }
    }

    /// Ancestor chain label ending at the element itself, at most
    /// DOM_PATH_DEPTH entries, truncated with a leading sentinel.
    fn dom_path_label(&self, path: &NodePath) -> String {
        let mut labels: Vec<String> = self
            .doc
            .ancestor_elements(path)
            .iter()
            .map(|el| element_label(el))
            .collect();
        if let Some(el) = self.doc.element(path) {
            labels.push(element_label(el));
        }
        let truncated = labels.len() > DOM_PATH_DEPTH;
        let start = labels.len().saturating_sub(DOM_PATH_DEPTH);
        let mut parts: Vec<String> = Vec::new();
        if truncated {
            parts.push(DOM_PATH_SENTINEL.to_string());
        }
        parts.extend(labels.drain(start..));
        parts.join(" > ")
    }
}

fn element_label(el: &Element) -> String {
    if let Some(id) = el.attr("id").filter(|id| !id.is_empty()) {
        return format!("{}#{}", el.tag, id);
    }
    if let Some(class) = el.attr("class") {
        if let Some(first) = class.split_whitespace().next() {
            return format!("{}.{}", el.tag, first);
        }
    }
    el.tag.clone()
}

fn new_synthetic_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("ai-el-{}", suffix)
}

fn strip_synthetic_ids(nodes: &mut [Node]) {
    for node in nodes {
        if let Node::Element(el) = node {
            el.remove_attr(SYNTHETIC_ID_ATTR);
            strip_synthetic_ids(&mut el.children);
        }
    }
}
