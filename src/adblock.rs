//! Heuristic removal of injected ad elements from the embedded player
//! document.
//!
//! [`FrameObserver`] mirrors the lifecycle of a DOM mutation observer bound
//! to a frame: it is attached to a frame source, starts observing once that
//! source reports a load, strips ad elements under the target of every
//! child-list record it is handed, and is disconnected when the frame goes
//! away or its source changes.

use anyhow::{anyhow, Result};
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, warn};

pub const AD_SELECTORS: [&str; 5] = [
    r#"div[id^="adb"]"#,
    r#"div[class*="ad-"]"#,
    r#"iframe[src*="ads"]"#,
    ".video-ads",
    "#player-ads",
];

#[derive(Debug, Clone)]
pub struct AdStripper {
    selectors: Vec<Selector>,
}

/// Serialized document after stripping, with the number of elements removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripped {
    pub html: String,
    pub removed: usize,
}

impl AdStripper {
    pub fn new() -> Result<Self> {
        Self::with_selectors(&AD_SELECTORS)
    }

    pub fn with_selectors(sources: &[&str]) -> Result<Self> {
        let selectors = sources
            .iter()
            .map(|s| Selector::parse(s).map_err(|e| anyhow!("invalid selector '{}': {:?}", s, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { selectors })
    }

    /// Remove every element below the elements matched by `target` that
    /// matches one of the ad selectors. The targets themselves are kept.
    pub fn strip_under(&self, doc: &mut Html, target: &Selector) -> usize {
        let mut doomed = Vec::new();
        for scope in doc.select(target) {
            for selector in &self.selectors {
                for el in scope.select(selector) {
                    if el.id() != scope.id() && !doomed.contains(&el.id()) {
                        doomed.push(el.id());
                    }
                }
            }
        }
        for id in &doomed {
            if let Some(mut node) = doc.tree.get_mut(*id) {
                node.detach();
            }
        }
        doomed.len()
    }

    /// Strip a standalone HTML fragment, returning the fragment's markup.
    pub fn strip_fragment(&self, fragment: &str) -> Result<Stripped> {
        let mut doc = Html::parse_fragment(fragment);
        let root = Selector::parse("html").map_err(|e| anyhow!("{:?}", e))?;
        let removed = self.strip_under(&mut doc, &root);
        Ok(Stripped {
            html: doc.root_element().inner_html(),
            removed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes,
}

/// One mutation record. The target is addressed by a CSS selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: String,
}

impl MutationRecord {
    pub fn child_list(target: impl Into<String>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target: target.into(),
        }
    }

    pub fn attributes(target: impl Into<String>) -> Self {
        Self {
            kind: MutationKind::Attributes,
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    Detached,
    AwaitingLoad,
    Observing,
}

#[derive(Debug, Clone)]
pub struct FrameObserver {
    stripper: AdStripper,
    source: Option<String>,
    state: FrameState,
}

impl FrameObserver {
    pub fn new(stripper: AdStripper) -> Self {
        Self {
            stripper,
            source: None,
            state: FrameState::Detached,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Bind to a frame source and wait for its load. Rebinding to a different
    /// source disconnects the previous observation first.
    pub fn attach(&mut self, source: &str) {
        if self.state != FrameState::Detached && self.source.as_deref() == Some(source) {
            return;
        }
        self.disconnect();
        debug!("Ad observer waiting for load of {}", source);
        self.source = Some(source.to_string());
        self.state = FrameState::AwaitingLoad;
    }

    /// Returns whether the observer now observes `source`. Loads of stale
    /// sources are ignored; a reload of the current source keeps observing.
    pub fn on_load(&mut self, source: &str) -> bool {
        if self.source.as_deref() != Some(source) {
            debug!("Ignoring load of stale frame {}", source);
            return false;
        }
        match self.state {
            FrameState::Detached => false,
            FrameState::AwaitingLoad | FrameState::Observing => {
                self.state = FrameState::Observing;
                true
            }
        }
    }

    /// Handle one batch of mutation records against the frame document.
    /// Returns the number of elements removed.
    pub fn observe(&self, doc: &mut Html, records: &[MutationRecord]) -> usize {
        if self.state != FrameState::Observing {
            return 0;
        }
        let mut removed = 0;
        for record in records {
            if record.kind != MutationKind::ChildList {
                continue;
            }
            match Selector::parse(&record.target) {
                Ok(target) => removed += self.stripper.strip_under(doc, &target),
                Err(e) => warn!("Skipping mutation with bad target '{}': {:?}", record.target, e),
            }
        }
        removed
    }

    /// Process a freshly loaded document: its body arriving counts as one
    /// child-list mutation on `body`.
    pub fn process_document(&self, html: &str) -> Stripped {
        let mut doc = Html::parse_document(html);
        let removed = self.observe(&mut doc, &[MutationRecord::child_list("body")]);
        Stripped {
            html: doc.html(),
            removed,
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(source) = self.source.take() {
            debug!("Ad observer disconnected from {}", source);
        }
        self.state = FrameState::Detached;
    }
}
