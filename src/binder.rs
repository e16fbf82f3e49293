//! Change-event trigger: sanitize PDFs as soon as a user picks them.
//!
//! File inputs are discovered on the initial scan, after every structural
//! mutation and after every framework morph update, and each is bound once
//! (tagged with `data-sanitized`). When a marked input's selection changes,
//! its PDFs are rebuilt through the shared service and the input's file
//! list is replaced before the host framework reads it.
//!
//! Replacing the list fires a synthetic `change` event of our own. A
//! per-input [`GuardState`] makes sure that event is swallowed instead of
//! starting a second round.

use crate::dom::{DomEvent, Element, Mutation, NodeId};
use crate::file::UploadFile;
use crate::pipeline::{Outcome, SanitizationResult};
use crate::service::SanitizeService;
use crate::sync::mutex_lock;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Mutex;

/// Opt-in marker; the value must be exactly `"true"`.
pub const MARKER_ATTRIBUTE: &str = "data-pdf-sanitize";
/// Set on inputs the binder has seen.
pub const BOUND_ATTRIBUTE: &str = "data-sanitized";

/// Re-entrancy state of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardState {
    #[default]
    Idle,
    Sanitizing,
    /// The next change event is our own and must be ignored.
    SuppressNext,
}

/// What a change event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDisposition {
    /// Not a marked file input with PDFs selected.
    Ignored,
    /// The synthetic event fired after a replacement.
    Suppressed,
    /// A sanitization round for this input is already running.
    Busy,
    /// The file list was replaced; `sanitized` files were rebuilt.
    Replaced { sanitized: usize },
    /// The input left the page while its files were processed.
    Abandoned,
}

/// `true` when the input opted in with `data-pdf-sanitize="true"`.
pub fn is_marked(el: &Element) -> bool {
    el.attr(MARKER_ATTRIBUTE) == Some("true")
}

/// A file input whose `accept` list allows PDFs (or is absent).
pub fn accepts_pdf(el: &Element) -> bool {
    el.is_file_input()
        && match el.attr("accept").map(str::trim) {
            None | Some("") => true,
            Some(accept) => accept.to_ascii_lowercase().contains("pdf"),
        }
}

pub struct TriggerBinder {
    service: SanitizeService,
    guards: Mutex<HashMap<NodeId, GuardState>>,
    log_errors: bool,
}

impl TriggerBinder {
    pub fn new(service: SanitizeService) -> Self {
        let log_errors = service.pipeline().config().log_errors;
        Self {
            service,
            guards: Mutex::new(HashMap::new()),
            log_errors,
        }
    }

    /// Bind every not-yet-bound PDF-accepting file input under `root`.
    /// Returns how many were newly bound.
    pub fn scan(&self, root: NodeId) -> usize {
        let bound = self.service.page().write(|doc| {
            let fresh = doc.find_all(root, |e| accepts_pdf(e) && !e.has_attr(BOUND_ATTRIBUTE));
            for &input in &fresh {
                doc.element_mut(input).set_attr(BOUND_ATTRIBUTE, "true");
            }
            fresh.len()
        });
        if bound > 0 {
            log_gated!(self.log_errors, debug, "Bound {} file input(s)", bound);
        }
        bound
    }

    /// Rescan the subtrees a mutation batch inserted.
    pub fn on_mutations(&self, mutations: &[Mutation]) -> usize {
        mutations
            .iter()
            .map(|m| match *m {
                Mutation::Added(node) => self.scan(node),
                Mutation::Removed(node) => {
                    self.forget_subtree(node);
                    0
                }
            })
            .sum()
    }

    /// Rescan after the host framework morphed `root`.
    pub fn on_morph_updated(&self, root: NodeId) -> usize {
        self.scan(root)
    }

    pub fn guard_state(&self, input: NodeId) -> GuardState {
        mutex_lock(&self.guards, "binder.guard_state")
            .get(&input)
            .copied()
            .unwrap_or_default()
    }

    fn set_guard(&self, input: NodeId, state: GuardState) {
        let mut guards = mutex_lock(&self.guards, "binder.set_guard");
        match state {
            GuardState::Idle => guards.remove(&input),
            state => guards.insert(input, state),
        };
    }

    fn forget_subtree(&self, node: NodeId) {
        let nodes = self.service.page().read(|doc| doc.descendants(node));
        let mut guards = mutex_lock(&self.guards, "binder.forget_subtree");
        for n in nodes {
            // A running round still owns its guard.
            if guards.get(&n) != Some(&GuardState::Sanitizing) {
                guards.remove(&n);
            }
        }
    }

    /// Capture-phase `change` handler for `input`.
    pub async fn handle_change(&self, input: NodeId) -> ChangeDisposition {
        {
            let mut guards = mutex_lock(&self.guards, "binder.handle_change");
            match guards.get(&input).copied().unwrap_or_default() {
                GuardState::SuppressNext => {
                    guards.remove(&input);
                    return ChangeDisposition::Suppressed;
                }
                GuardState::Sanitizing => return ChangeDisposition::Busy,
                GuardState::Idle => {}
            }
        }

        let files = self.service.page().read(|doc| {
            let el = doc.element(input);
            if el.is_file_input() && is_marked(el) {
                el.files().to_vec()
            } else {
                Vec::new()
            }
        });
        if !files.iter().any(UploadFile::is_pdf) {
            return ChangeDisposition::Ignored;
        }

        self.set_guard(input, GuardState::Sanitizing);
        let results = join_all(files.iter().map(|file| async move {
            if file.is_pdf() {
                self.service.sanitize_file(file, Some(input)).await
            } else {
                SanitizationResult::passthrough(file.clone(), Outcome::NotApplicable)
            }
        }))
        .await;

        let sanitized = results.iter().filter(|r| r.is_sanitized()).count();
        let replacement: Vec<UploadFile> = results.into_iter().map(|r| r.file).collect();

        let replaced = self.service.page().write(|doc| {
            if !doc.is_connected(input) {
                return false;
            }
            doc.set_files(input, replacement);
            true
        });
        if !replaced {
            log_gated!(
                self.log_errors,
                warn,
                "Input {:?} was removed while its files were sanitized",
                input
            );
            self.set_guard(input, GuardState::Idle);
            return ChangeDisposition::Abandoned;
        }

        self.set_guard(input, GuardState::SuppressNext);
        self.service.page().write(|doc| doc.dispatch_change(input));
        log_gated!(
            self.log_errors,
            info,
            "Replaced files of input {:?} ({} sanitized)",
            input,
            sanitized
        );
        ChangeDisposition::Replaced { sanitized }
    }

    /// Deliver queued mutations and events until the page is quiet.
    /// Returns the disposition of every change event handled.
    pub async fn dispatch_pending(&self) -> Vec<(NodeId, ChangeDisposition)> {
        let mut handled = Vec::new();
        loop {
            let (mutations, events) = self
                .service
                .page()
                .write(|doc| (doc.take_mutations(), doc.take_events()));
            if mutations.is_empty() && events.is_empty() {
                return handled;
            }
            self.on_mutations(&mutations);
            for event in events {
                match event {
                    DomEvent::Change { target } => {
                        let disposition = self.handle_change(target).await;
                        handled.push((target, disposition));
                    }
                    DomEvent::MorphUpdated { root } => {
                        self.on_morph_updated(root);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn input(doc: &mut Document, accept: Option<&str>) -> NodeId {
        let node = doc.append_new(doc.body(), "input");
        doc.element_mut(node).set_attr("type", "file");
        if let Some(accept) = accept {
            doc.element_mut(node).set_attr("accept", accept);
        }
        node
    }

    #[test]
    fn accept_filter() {
        let mut doc = Document::new();
        let any = input(&mut doc, None);
        let pdf = input(&mut doc, Some("application/pdf,.docx"));
        let ext = input(&mut doc, Some(".PDF"));
        let images = input(&mut doc, Some("image/*"));
        let text = doc.append_new(doc.body(), "input");

        assert!(accepts_pdf(doc.element(any)));
        assert!(accepts_pdf(doc.element(pdf)));
        assert!(accepts_pdf(doc.element(ext)));
        assert!(!accepts_pdf(doc.element(images)));
        assert!(!accepts_pdf(doc.element(text)));
    }

    #[test]
    fn marker_must_be_exactly_true() {
        let mut doc = Document::new();
        let node = input(&mut doc, None);
        assert!(!is_marked(doc.element(node)));
        doc.element_mut(node).set_attr(MARKER_ATTRIBUTE, "TRUE");
        assert!(!is_marked(doc.element(node)));
        doc.element_mut(node).set_attr(MARKER_ATTRIBUTE, "true");
        assert!(is_marked(doc.element(node)));
    }

    #[test]
    fn guard_defaults_to_idle() {
        assert_eq!(GuardState::default(), GuardState::Idle);
    }
}
