//! Table-of-contents and anchor navigation over a render engine.
//!
//! Every navigation takes a fresh [`NavigationToken`]. A navigation that sees
//! a newer token once its awaits complete is dropped without effect.

use std::cell::Cell;
use std::rc::Rc;

use bookclub_core::NavigationToken;
use tracing::{debug, warn};

use crate::render::{DisplayTarget, RenderEngine, RenderError, SectionDocument, SpineItem};

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationOutcome {
    Displayed(DisplayTarget),
    /// The href matched nothing in the spine.
    NotFound,
    /// A newer navigation was issued while this one was pending.
    Stale,
    Failed(RenderError),
}

pub struct ChapterNavigator<R: RenderEngine> {
    engine: Rc<R>,
    token: Cell<NavigationToken>,
    in_flight: Cell<usize>,
}

struct InFlight<'a>(&'a Cell<usize>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a Cell<usize>) -> Self {
        counter.set(counter.get() + 1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl<R: RenderEngine> ChapterNavigator<R> {
    pub fn new(engine: Rc<R>) -> Self {
        Self {
            engine,
            token: Cell::new(NavigationToken::default()),
            in_flight: Cell::new(0),
        }
    }

    pub fn current_token(&self) -> NavigationToken {
        self.token.get()
    }

    pub fn is_navigating(&self) -> bool {
        self.in_flight.get() > 0
    }

    fn issue(&self) -> NavigationToken {
        let token = self.token.get().next();
        self.token.set(token);
        token
    }

    fn is_stale(&self, token: NavigationToken) -> bool {
        self.token.get() != token
    }

    /// Finds the spine item for a stored href, tolerating relative/absolute
    /// mismatches in either direction.
    pub fn resolve(&self, href: &str) -> Option<SpineItem> {
        let (base, _) = split_fragment(href);
        let target = normalize_href(base);
        if target.is_empty() {
            return None;
        }
        if let Some(item) = self.engine.spine_item(&target) {
            return Some(item);
        }
        self.engine.spine().into_iter().find(|item| {
            let candidate = item.href.as_str();
            candidate == target
                || candidate.ends_with(&format!("/{target}"))
                || candidate.ends_with(target.as_str())
                || target.ends_with(&format!("/{candidate}"))
                || target.ends_with(candidate)
        })
    }

    /// Displays the section for `href`, scrolled to its fragment when the
    /// section contains a matching element.
    pub async fn go_to(&self, href: &str) -> NavigationOutcome {
        let Some(item) = self.resolve(href) else {
            warn!(href, "navigation target not found in spine");
            return NavigationOutcome::NotFound;
        };
        let token = self.issue();
        let _guard = InFlight::enter(&self.in_flight);

        let mut target = DisplayTarget::Href(item.href.clone());
        if let (_, Some(fragment)) = split_fragment(href) {
            let fragment = percent_decode(fragment);
            match self.engine.load_section(&item.href).await {
                Ok(section) => match find_anchor(&section, &fragment) {
                    Some(cfi) => target = DisplayTarget::Cfi(cfi),
                    None => debug!(fragment = %fragment, "anchor not found; showing section start"),
                },
                Err(err) => debug!(error = %err, "section load failed; showing section start"),
            }
        }

        self.display(token, target).await
    }

    /// Displays an exact location, e.g. an annotation's CFI.
    pub async fn jump_to(&self, cfi: &str) -> NavigationOutcome {
        let token = self.issue();
        let _guard = InFlight::enter(&self.in_flight);
        self.display(token, DisplayTarget::Cfi(cfi.to_string())).await
    }

    async fn display(&self, token: NavigationToken, target: DisplayTarget) -> NavigationOutcome {
        if self.is_stale(token) {
            debug!(token = token.0, "navigation superseded before display");
            return NavigationOutcome::Stale;
        }
        match self.engine.display(&target).await {
            Ok(()) if self.is_stale(token) => NavigationOutcome::Stale,
            Ok(()) => NavigationOutcome::Displayed(target),
            Err(err) => {
                warn!(error = %err, "display failed");
                NavigationOutcome::Failed(err)
            }
        }
    }

    /// Previous page; ignored while a navigation is pending.
    pub fn prev(&self) -> bool {
        if self.is_navigating() {
            return false;
        }
        self.engine.prev();
        true
    }

    pub fn next(&self) -> bool {
        if self.is_navigating() {
            return false;
        }
        self.engine.next();
        true
    }
}

fn find_anchor(section: &impl SectionDocument, fragment: &str) -> Option<String> {
    section
        .element_by_id(fragment)
        .or_else(|| section.element_by_name(fragment))
        .or_else(|| section.anchor_by_id(fragment))
}

fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment).filter(|f| !f.is_empty())),
        None => (href, None),
    }
}

/// Strips the fragment, percent-decodes and drops a leading `./`.
pub fn normalize_href(href: &str) -> String {
    let (base, _) = split_fragment(href.trim());
    let decoded = percent_decode(base);
    match decoded.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => decoded,
    }
}

/// Decodes `%XX` escapes; input with invalid escapes or non-UTF-8 results is
/// returned unchanged.
pub fn percent_decode(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input
                .get(i + 1..i + 3)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            match hex {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                None => return input.to_string(),
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| input.to_string())
}
