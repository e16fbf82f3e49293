//! In-page progress overlay for a field being sanitized.
//!
//! The overlay is anchored on the visual wrapper of the triggering file
//! input, found by an [`AnchorResolver`]. The page may ship its own markup
//! in a `#pdf-sanitizer-progress-template` element; otherwise a plain
//! overlay → content → (spinner, message, percent) structure is built.
//! While the overlay is up, the anchor carries busy markers so the field
//! cannot be interacted with.
//!
//! Nothing here can fail a sanitization: missing elements are logged and
//! skipped.

use crate::config::SanitizerConfig;
use crate::dom::{Document, NodeId, Page};
use crate::sync::mutex_lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

pub const OVERLAY_CLASS: &str = "pdf-sanitizer-progress-overlay";
pub const CONTENT_CLASS: &str = "pdf-sanitizer-progress-content";
pub const SPINNER_CLASS: &str = "pdf-sanitizer-spinner";
pub const MESSAGE_CLASS: &str = "pdf-sanitizer-message";
pub const PERCENT_CLASS: &str = "pdf-sanitizer-percent";
pub const TEMPLATE_ID: &str = "pdf-sanitizer-progress-template";
pub const BUSY_ATTRIBUTE: &str = "data-pdf-sanitizing";
pub const INDICATOR_ATTRIBUTE: &str = "data-pdf-sanitizer-indicator";
const SPIN_ANIMATION_ID: &str = "pdf-sanitizer-spin-animation";

/// How long the overlay fades before it is removed.
pub const FADE_OUT: Duration = Duration::from_millis(200);

/// Wrapper classes of the host form framework, most specific first.
pub const PRIORITY_CLASSES: &[&str] = &[
    "fi-fo-file-upload-wrapper",
    "fi-fo-field-wrp",
    "fi-input-wrp",
    "fi-input",
];

/// Picks the element the overlay covers for a given input.
pub trait AnchorResolver: Send + Sync {
    fn resolve(&self, doc: &Document, input: NodeId) -> Option<NodeId>;
}

/// Walks up from the input looking for a known wrapper class, then for any
/// sizeable classed `div`.
#[derive(Debug, Clone)]
pub struct ClassChainResolver {
    classes: Vec<String>,
    max_hops: usize,
    min_fallback_size: (f32, f32),
}

impl Default for ClassChainResolver {
    fn default() -> Self {
        Self {
            classes: PRIORITY_CLASSES.iter().map(|c| c.to_string()).collect(),
            max_hops: 15,
            min_fallback_size: (100.0, 50.0),
        }
    }
}

impl ClassChainResolver {
    /// Replace the prioritized wrapper classes.
    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes = classes.into_iter().map(Into::into).collect();
        self
    }
}

impl AnchorResolver for ClassChainResolver {
    fn resolve(&self, doc: &Document, input: NodeId) -> Option<NodeId> {
        let mut current = Some(input);
        for _ in 0..self.max_hops {
            let node = current?;
            let el = doc.element(node);
            let (w, h) = el.size();

            if w > 0.0 && h > 0.0 && self.classes.iter().any(|c| el.has_class(c)) {
                return Some(node);
            }
            let (min_w, min_h) = self.min_fallback_size;
            if el.tag() == "div" && !el.classes().is_empty() && w > min_w && h > min_h {
                return Some(node);
            }
            current = doc.parent(node);
        }
        None
    }
}

/// Where an overlay was drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationContext {
    pub input: NodeId,
    pub anchor: NodeId,
    pub overlay: NodeId,
}

/// Overlay bookkeeping for one anchor.
#[derive(Default)]
struct AnchorRuns {
    /// Runs that called `show` and have not yet called `hide`.
    active: usize,
    /// Removal scheduled by the last `hide`, cancelled by the next `show`.
    removal: Option<AbortHandle>,
}

#[derive(Default)]
struct OverlayState {
    runs: HashMap<NodeId, AnchorRuns>,
    /// Detached overlays, reattached before new ones are built.
    spare: Vec<NodeId>,
}

/// What `hide` found on the anchor.
enum Hiding {
    /// Another run still uses the overlay.
    StillInUse,
    /// No overlay; busy markers were cleared.
    Cleared,
    Fading { anchor: NodeId, overlay: NodeId },
}

/// Shows, updates and hides the overlay.
///
/// Several runs may share one anchor (two PDFs in one input). The overlay
/// stays up until the last of them calls [`ProgressPresenter::hide`].
pub struct ProgressPresenter {
    enabled: bool,
    log_errors: bool,
    resolver: Arc<dyn AnchorResolver>,
    fade_out: Duration,
    state: Arc<Mutex<OverlayState>>,
}

impl ProgressPresenter {
    pub fn new(config: &SanitizerConfig) -> Self {
        Self {
            enabled: config.show_progress,
            log_errors: config.log_errors,
            resolver: Arc::new(ClassChainResolver::default()),
            fade_out: FADE_OUT,
            state: Arc::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AnchorResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_fade_out(mut self, fade_out: Duration) -> Self {
        self.fade_out = fade_out;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Draw (or refresh) the overlay on the anchor of `input`.
    ///
    /// Every successful call must be paired with one [`hide`](Self::hide).
    pub fn show(&self, page: &Page, input: NodeId, message: &str) -> Option<PresentationContext> {
        if !self.enabled {
            return None;
        }
        page.write(|doc| {
            let anchor = self.anchor_or_wrap(doc, input);
            let mut state = mutex_lock(&self.state, "presenter.show");
            {
                let runs = state.runs.entry(anchor).or_default();
                runs.active += 1;
                if let Some(removal) = runs.removal.take() {
                    removal.abort();
                }
            }

            let anchor_el = doc.element_mut(anchor);
            if matches!(anchor_el.style("position"), None | Some("static")) {
                anchor_el.set_style("position", "relative");
            }

            let overlay = match find_overlay(doc, anchor) {
                Some(overlay) => overlay,
                None => {
                    let overlay = match state.spare.pop() {
                        Some(spare) => {
                            clear_percent(doc, spare);
                            spare
                        }
                        None => template_overlay(doc).unwrap_or_else(|| build_overlay(doc)),
                    };
                    doc.append_child(anchor, overlay);
                    overlay
                }
            };
            drop(state);

            set_message(doc, overlay, message);
            let overlay_el = doc.element_mut(overlay);
            overlay_el.set_style("display", "flex");
            overlay_el.set_style("visibility", "visible");
            overlay_el.set_style("opacity", "1");

            let anchor_el = doc.element_mut(anchor);
            anchor_el.set_attr(BUSY_ATTRIBUTE, "true");
            anchor_el.set_style("pointer-events", "none");
            anchor_el.set_style("opacity", "0.7");

            log_gated!(
                self.log_errors,
                debug,
                "Progress overlay shown on <{}> for input {:?}",
                doc.element(anchor).tag(),
                input
            );
            Some(PresentationContext {
                input,
                anchor,
                overlay,
            })
        })
    }

    /// Change the message and percentage of a shown overlay.
    pub fn update(
        &self,
        page: &Page,
        ctx: &PresentationContext,
        message: &str,
        percent: Option<u8>,
    ) {
        page.write(|doc| {
            if !doc.contains(ctx.anchor, ctx.overlay) {
                return;
            }
            if let Some(msg) = doc.find(ctx.overlay, |e| e.has_class(MESSAGE_CLASS)) {
                doc.element_mut(msg).set_text(message);
            }
            if let Some(pct) = doc.find(ctx.overlay, |e| e.has_class(PERCENT_CLASS)) {
                let text = percent.map(|p| format!("{p}%")).unwrap_or_default();
                doc.element_mut(pct).set_text(text);
            }
        });
    }

    /// End one run on the anchor of `input`.
    ///
    /// When it was the last run, the overlay fades out and is then removed
    /// with the busy markers, on a spawned task (immediately without a
    /// runtime). Returns the task handle if one was spawned. A `show` on the
    /// same anchor before the removal cancels it.
    pub fn hide(&self, page: &Page, input: NodeId) -> Option<JoinHandle<()>> {
        let hiding = page.write(|doc| {
            let anchor = self.resolver.resolve(doc, input).or_else(|| doc.parent(input))?;
            let mut state = mutex_lock(&self.state, "presenter.hide");
            let runs = state.runs.entry(anchor).or_default();
            runs.active = runs.active.saturating_sub(1);
            if runs.active > 0 {
                return Some(Hiding::StillInUse);
            }
            match find_overlay(doc, anchor) {
                Some(overlay) => {
                    let el = doc.element_mut(overlay);
                    el.set_style("opacity", "0");
                    el.set_style("transition", "opacity 0.2s ease-in-out");
                    Some(Hiding::Fading { anchor, overlay })
                }
                None => {
                    state.runs.remove(&anchor);
                    clear_busy(doc, anchor);
                    Some(Hiding::Cleared)
                }
            }
        });

        let (anchor, overlay) = match hiding {
            Some(Hiding::Fading { anchor, overlay }) => (anchor, overlay),
            Some(Hiding::StillInUse) => {
                log_gated!(self.log_errors, debug, "Overlay for input {:?} still in use", input);
                return None;
            }
            Some(Hiding::Cleared) => return None,
            None => {
                log_gated!(
                    self.log_errors,
                    warn,
                    "No anchor found to hide progress for input {:?}",
                    input
                );
                return None;
            }
        };

        let finish = {
            let page = page.clone();
            let state = Arc::clone(&self.state);
            move || finish_hide(&page, &state, anchor, overlay)
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let fade_out = self.fade_out;
                let task = handle.spawn(async move {
                    tokio::time::sleep(fade_out).await;
                    finish();
                });
                let mut state = mutex_lock(&self.state, "presenter.schedule");
                if let Some(runs) = state.runs.get_mut(&anchor) {
                    runs.removal = Some(task.abort_handle());
                }
                Some(task)
            }
            Err(_) => {
                finish();
                None
            }
        }
    }

    fn anchor_or_wrap(&self, doc: &mut Document, input: NodeId) -> NodeId {
        if let Some(anchor) = self.resolver.resolve(doc, input) {
            return anchor;
        }
        match doc.parent(input) {
            Some(parent) if parent != doc.body() => parent,
            parent => {
                log_gated!(
                    self.log_errors,
                    warn,
                    "No wrapper found for input {:?}, wrapping it for the progress overlay",
                    input
                );
                let wrapper = doc.create_element("div");
                let el = doc.element_mut(wrapper);
                el.set_style("position", "relative");
                el.set_style("display", "inline-block");
                el.set_style("width", "100%");
                if let Some(parent) = parent {
                    doc.insert_before(parent, wrapper, Some(input));
                }
                doc.append_child(wrapper, input);
                wrapper
            }
        }
    }
}

/// Remove a faded overlay unless a newer run took the anchor over.
fn finish_hide(page: &Page, state: &Mutex<OverlayState>, anchor: NodeId, overlay: NodeId) {
    page.write(|doc| {
        let mut state = mutex_lock(state, "presenter.finish_hide");
        if state.runs.get(&anchor).is_some_and(|runs| runs.active > 0) {
            return;
        }
        state.runs.remove(&anchor);
        clear_busy(doc, anchor);
        if doc.parent(overlay) == Some(anchor) {
            doc.remove(overlay);
            state.spare.push(overlay);
        }
    });
}

fn find_overlay(doc: &Document, anchor: NodeId) -> Option<NodeId> {
    doc.find(anchor, |e| e.has_class(OVERLAY_CLASS))
}

fn clear_busy(doc: &mut Document, anchor: NodeId) {
    let el = doc.element_mut(anchor);
    el.remove_attr(BUSY_ATTRIBUTE);
    el.remove_style("pointer-events");
    el.remove_style("opacity");
}

fn template_overlay(doc: &mut Document) -> Option<NodeId> {
    let template = doc.element_by_id(TEMPLATE_ID)?;
    let source = doc.find(template, |e| e.has_class(OVERLAY_CLASS))?;
    Some(doc.deep_clone(source))
}

fn build_overlay(doc: &mut Document) -> NodeId {
    if doc.element_by_id(SPIN_ANIMATION_ID).is_none() {
        let head = doc.head();
        let style = doc.append_new(head, "style");
        let el = doc.element_mut(style);
        el.set_attr("id", SPIN_ANIMATION_ID);
        el.set_text(
            "@keyframes pdf-sanitizer-spin { \
             from { transform: rotate(0deg); } \
             to { transform: rotate(360deg); } }",
        );
    }

    let overlay = doc.create_element("div");
    let el = doc.element_mut(overlay);
    el.add_class(OVERLAY_CLASS);
    el.set_attr(INDICATOR_ATTRIBUTE, "true");
    for (k, v) in [
        ("position", "absolute"),
        ("inset", "0"),
        ("background", "rgba(17, 24, 39, 0.75)"),
        ("display", "flex"),
        ("align-items", "center"),
        ("justify-content", "center"),
        ("z-index", "50"),
        ("border-radius", "0.5rem"),
        ("transition", "opacity 0.2s ease-in-out"),
    ] {
        el.set_style(k, v);
    }

    let content = doc.append_new(overlay, "div");
    doc.element_mut(content).add_class(CONTENT_CLASS);
    for class in [SPINNER_CLASS, MESSAGE_CLASS, PERCENT_CLASS] {
        let child = doc.append_new(content, "div");
        doc.element_mut(child).add_class(class);
    }
    overlay
}

fn clear_percent(doc: &mut Document, overlay: NodeId) {
    if let Some(pct) = doc.find(overlay, |e| e.has_class(PERCENT_CLASS)) {
        doc.element_mut(pct).set_text("");
    }
}

fn set_message(doc: &mut Document, overlay: NodeId, message: &str) {
    let msg = match doc.find(overlay, |e| e.has_class(MESSAGE_CLASS)) {
        Some(msg) => msg,
        None => {
            let parent = doc
                .find(overlay, |e| e.has_class(CONTENT_CLASS))
                .unwrap_or(overlay);
            let msg = doc.append_new(parent, "div");
            doc.element_mut(msg).add_class(MESSAGE_CLASS);
            msg
        }
    };
    doc.element_mut(msg).set_text(message);
}
