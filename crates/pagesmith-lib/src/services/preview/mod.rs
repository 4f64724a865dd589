// Preview bridge
// Host-side half of the preview protocol. Owns the document generation
// counter and the per-load runtime, routes runtime events into the
// session (write-back + history snapshot), and resolves navigation
// intents against the session's file map.

pub mod dom;
pub mod runtime;

use thiserror::Error;

use crate::models::{HostCommand, PreviewEnvelope, RuntimeEvent, SelectedElementPayload, Session};
use crate::services::navigation::resolve_in_file_map;

pub use runtime::{PreviewRuntime, SYNTHETIC_ID_ATTR};

/// Marker id on the injected script tag; injection is idempotent.
pub const NAV_SCRIPT_MARKER: &str = "pagesmith-bridge";

/// Navigation interception script served with every preview document.
/// Capture-phase listener so page scripts cannot swallow the click; all
/// default anchor navigation is suppressed and only same-document
/// relative .html targets are reported upward.
pub const NAV_SCRIPT: &str = r##"<script id="pagesmith-bridge">
(function () {
  document.addEventListener("click", function (ev) {
    var el = ev.target;
    while (el && el.tagName !== "A") el = el.parentElement;
    if (!el) return;
    ev.preventDefault();
    var href = el.getAttribute("href") || "";
    if (/^(https?:|\/\/|mailto:|tel:|data:|javascript:)/.test(href)) return;
    if (href.indexOf("#") === 0) return;
    var target = href.replace(/^\.?\//, "").split(/[#?]/)[0];
    if (!/\.html$/.test(target)) return;
    parent.postMessage({ type: "NAVIGATE_FILE", fileName: target }, "*");
  }, true);
})();
</script>"##;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("file not found in session: {0}")]
    UnknownFile(String),
    #[error("no active preview document")]
    NoActiveDocument,
}

/// What a routed event did, for the caller to act on (re-serve the
/// preview after navigation, persist the session after a save, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEffect {
    Selected(SelectedElementPayload),
    Deselected,
    DocumentSaved,
    Navigated(String),
}

pub struct PreviewBridge {
    generation: u64,
    runtime: Option<PreviewRuntime>,
    selection: Option<SelectedElementPayload>,
}

impl Default for PreviewBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewBridge {
    pub fn new() -> Self {
        Self {
            generation: 0,
            runtime: None,
            selection: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn selection(&self) -> Option<&SelectedElementPayload> {
        self.selection.as_ref()
    }

    pub fn runtime_mut(&mut self) -> Option<&mut PreviewRuntime> {
        self.runtime.as_mut()
    }

    /// Load `file_name` into the preview. Bumps the generation counter
    /// (events from the previous document become stale) and rebuilds
    /// the runtime, which invalidates every synthetic id. Returns the
    /// HTML to serve, with the navigation script injected.
    pub fn activate_file(
        &mut self,
        session: &mut Session,
        file_name: &str,
    ) -> Result<String, PreviewError> {
        let Some(html) = session.generated_files.get(file_name).cloned() else {
            return Err(PreviewError::UnknownFile(file_name.to_string()));
        };
        session.active_file_name = Some(file_name.to_string());
        self.generation += 1;
        self.selection = None;
        self.runtime = Some(PreviewRuntime::new(&html));
        log::info!(
            "[preview-bridge] activated {} (generation {})",
            file_name,
            self.generation
        );
        Ok(inject_bridge_script(&html))
    }

    /// Route one runtime event envelope. Envelopes stamped with an
    /// older generation belong to an unloaded document and are dropped.
    pub fn handle_event(
        &mut self,
        session: &mut Session,
        envelope: PreviewEnvelope,
    ) -> Option<BridgeEffect> {
        if envelope.generation != self.generation {
            log::debug!(
                "[preview-bridge] dropping stale event (generation {} != {})",
                envelope.generation,
                self.generation
            );
            return None;
        }
        match envelope.event {
            RuntimeEvent::ElementSelected { payload } => {
                self.selection = Some(payload.clone());
                Some(BridgeEffect::Selected(payload))
            }
            RuntimeEvent::Deselect => {
                self.selection = None;
                Some(BridgeEffect::Deselected)
            }
            RuntimeEvent::DocumentUpdated { html } => {
                // The only durable path for in-preview edits
                let active = session.active_file_name.clone()?;
                session.generated_files.insert(active, html);
                session.push_snapshot();
                Some(BridgeEffect::DocumentSaved)
            }
            RuntimeEvent::NavigateFile { file_name }
            | RuntimeEvent::ViewerNavigate { file_name } => {
                let Some(resolved) = resolve_in_file_map(&file_name, &session.generated_files)
                else {
                    log::debug!("[preview-bridge] unresolved navigation target {}", file_name);
                    return None;
                };
                if self.activate_file(session, &resolved).is_err() {
                    return None;
                }
                Some(BridgeEffect::Navigated(resolved))
            }
        }
    }

    /// Forward a host command to the runtime and route whatever events
    /// it produces, stamped with the current generation.
    pub fn send_command(
        &mut self,
        session: &mut Session,
        command: HostCommand,
    ) -> Result<Vec<BridgeEffect>, PreviewError> {
        let generation = self.generation;
        let runtime = self.runtime.as_mut().ok_or(PreviewError::NoActiveDocument)?;
        let events = runtime.handle_command(command);
        let mut effects = Vec::new();
        for event in events {
            if let Some(effect) = self.handle_event(session, PreviewEnvelope { generation, event })
            {
                effects.push(effect);
            }
        }
        Ok(effects)
    }
}

/// Insert the navigation script before `</body>`, or append when the
/// document has no body close tag. Already-instrumented documents pass
/// through unchanged.
pub fn inject_bridge_script(html: &str) -> String {
    if html.contains(NAV_SCRIPT_MARKER) {
        return html.to_string();
    }
    match html.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + NAV_SCRIPT.len() + 1);
            out.push_str(&html[..pos]);
            out.push_str(NAV_SCRIPT);
            out.push('\n');
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{}\n{}", html, NAV_SCRIPT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionMode;

    fn session_with_files() -> Session {
        let mut session = Session::empty("s1".to_string());
        session.generated_files.insert(
            "index.page.html".to_string(),
            "<html><body><div class=\"hero\">hi</div><a href=\"pricing.page.html\">Pricing</a></body></html>"
                .to_string(),
        );
        session.generated_files.insert(
            "pricing.page.html".to_string(),
            "<html><body><h1>Pricing</h1></body></html>".to_string(),
        );
        session.push_snapshot();
        session
    }

    #[test]
    fn test_activate_injects_script_once() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        let html = bridge.activate_file(&mut session, "index.page.html").unwrap();
        assert!(html.contains(NAV_SCRIPT_MARKER));
        assert_eq!(inject_bridge_script(&html), html);
        assert_eq!(session.active_file_name.as_deref(), Some("index.page.html"));
    }

    #[test]
    fn test_activate_unknown_file_fails() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        assert!(matches!(
            bridge.activate_file(&mut session, "missing.html"),
            Err(PreviewError::UnknownFile(_))
        ));
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        bridge.activate_file(&mut session, "index.page.html").unwrap();
        let stale = PreviewEnvelope {
            generation: bridge.generation() - 1,
            event: RuntimeEvent::DocumentUpdated {
                html: "<p>stale</p>".to_string(),
            },
        };
        assert!(bridge.handle_event(&mut session, stale).is_none());
        assert!(!session.generated_files["index.page.html"].contains("stale"));
    }

    #[test]
    fn test_document_updated_writes_back_and_snapshots() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        bridge.activate_file(&mut session, "index.page.html").unwrap();
        let before = session.history.len();
        let effect = bridge.handle_event(
            &mut session,
            PreviewEnvelope {
                generation: bridge.generation(),
                event: RuntimeEvent::DocumentUpdated {
                    html: "<html><body><div class=\"hero\">edited</div></body></html>".to_string(),
                },
            },
        );
        assert_eq!(effect, Some(BridgeEffect::DocumentSaved));
        assert!(session.generated_files["index.page.html"].contains("edited"));
        assert_eq!(session.history.len(), before + 1);
    }

    #[test]
    fn test_navigation_resolves_tier_suffix() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        bridge.activate_file(&mut session, "index.page.html").unwrap();
        let generation = bridge.generation();
        let effect = bridge.handle_event(
            &mut session,
            PreviewEnvelope {
                generation,
                event: RuntimeEvent::NavigateFile {
                    file_name: "pricing.organism.html".to_string(),
                },
            },
        );
        assert_eq!(
            effect,
            Some(BridgeEffect::Navigated("pricing.page.html".to_string()))
        );
        // Navigation reloaded the document
        assert!(bridge.generation() > generation);
        assert_eq!(
            session.active_file_name.as_deref(),
            Some("pricing.page.html")
        );
    }

    #[test]
    fn test_unresolved_navigation_is_silent() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        bridge.activate_file(&mut session, "index.page.html").unwrap();
        let effect = bridge.handle_event(
            &mut session,
            PreviewEnvelope {
                generation: bridge.generation(),
                event: RuntimeEvent::NavigateFile {
                    file_name: "nowhere.html".to_string(),
                },
            },
        );
        assert!(effect.is_none());
        assert_eq!(session.active_file_name.as_deref(), Some("index.page.html"));
    }

    #[test]
    fn test_send_command_routes_runtime_events() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        bridge.activate_file(&mut session, "index.page.html").unwrap();
        bridge
            .send_command(
                &mut session,
                HostCommand::ModeChange {
                    mode: InteractionMode::Design,
                },
            )
            .unwrap();

        // Select through the runtime, then delete via a host command
        let events = bridge.runtime_mut().unwrap().click(".hero");
        let generation = bridge.generation();
        let id = match bridge
            .handle_event(
                &mut session,
                PreviewEnvelope {
                    generation,
                    event: events.into_iter().next().unwrap(),
                },
            )
            .unwrap()
        {
            BridgeEffect::Selected(payload) => payload.id,
            other => panic!("unexpected {:?}", other),
        };
        assert!(bridge.selection().is_some());

        let effects = bridge
            .send_command(&mut session, HostCommand::ActionDelete { id })
            .unwrap();
        assert_eq!(effects[0], BridgeEffect::Deselected);
        assert_eq!(effects[1], BridgeEffect::DocumentSaved);
        assert!(bridge.selection().is_none());
        assert!(!session.generated_files["index.page.html"].contains("hero"));
    }

    #[test]
    fn test_send_command_without_document_fails() {
        let mut session = session_with_files();
        let mut bridge = PreviewBridge::new();
        assert!(matches!(
            bridge.send_command(
                &mut session,
                HostCommand::ModeChange {
                    mode: InteractionMode::Design
                }
            ),
            Err(PreviewError::NoActiveDocument)
        ));
    }
}
