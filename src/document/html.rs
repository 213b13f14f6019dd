//! Build a [`Document`] from HTML markup
//!
//! Markup carries no playback state, so media elements start out the way a
//! browser reports them before loading: no duration, `HAVE_NOTHING`,
//! `NETWORK_EMPTY`, zero intrinsic size. When a media element has no `src`
//! attribute its current source is taken from the first `<source>` child with
//! a `src`, mirroring resource selection.

use anyhow::{Context, Result};
use scraper::{ElementRef, Html};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

use super::{Document, DocumentQuery, NodeId};
use crate::constants::media;

pub fn parse_document(markup: &str, base_url: Option<Url>) -> Document {
    let html = Html::parse_document(markup);
    let root = html.root_element();

    let mut doc = Document::with_root(root.value().name());
    doc.set_base_url(base_url);
    let doc_root = doc.root();
    copy_children(&mut doc, doc_root, root);

    let body = doc
        .children(doc_root)
        .iter()
        .copied()
        .find(|&child| doc.element(child).is_some_and(|e| e.is("body")));
    if let Some(body) = body {
        doc.set_body(body);
    }

    prime_media(&mut doc);
    doc
}

pub fn load_document(path: &Path, base_url: Option<Url>) -> Result<Document> {
    let markup = fs::read_to_string(path)
        .with_context(|| format!("Failed to read HTML document {}", path.display()))?;
    let doc = parse_document(&markup, base_url);
    info!(
        path = %path.display(),
        videos = doc.query_all(media::VIDEO_TAG).len(),
        audios = doc.query_all(media::AUDIO_TAG).len(),
        "Loaded document"
    );
    Ok(doc)
}

/// Parse `markup` as a fragment and append its top-level elements to
/// `parent`. Returns the appended nodes.
pub fn append_fragment(doc: &mut Document, parent: NodeId, markup: &str) -> Result<Vec<NodeId>> {
    let fragment = Html::parse_fragment(markup);
    let holder = doc.fragment_holder();
    copy_children(doc, holder, fragment.root_element());

    let top_level: Vec<NodeId> = doc.children(holder).to_vec();
    for &node in &top_level {
        doc.append_child(parent, node)
            .with_context(|| format!("Failed to append fragment node {node} to {parent}"))?;
    }
    prime_media(doc);
    debug!(parent = %parent, count = top_level.len(), "Appended fragment");
    Ok(top_level)
}

fn copy_children(doc: &mut Document, parent: NodeId, source: ElementRef<'_>) {
    for child in source.children().filter_map(ElementRef::wrap) {
        let node = doc.create_element(child.value().name());
        if let Some(element) = doc.element_mut(node) {
            for (name, value) in child.value().attrs() {
                element.set_attribute(name, value);
            }
        }
        // Building a fresh subtree: `node` is new and detached, so this cannot fail.
        if doc.append_child(parent, node).is_ok() {
            copy_children(doc, node, child);
        }
    }
}

/// Fill in `current_src` for media elements that have not been primed yet
fn prime_media(doc: &mut Document) {
    let media_nodes: Vec<NodeId> = doc
        .query_all(media::VIDEO_TAG)
        .into_iter()
        .chain(doc.query_all(media::AUDIO_TAG))
        .collect();

    for node in media_nodes {
        let needs_source = doc
            .element(node)
            .is_some_and(|e| e.media.current_src.is_none());
        if !needs_source {
            continue;
        }

        let selected = match doc.element(node).and_then(|e| e.attribute("src")) {
            Some(src) if !src.is_empty() => Some(src.to_string()),
            _ => doc
                .query_within(node, media::SOURCE_TAG)
                .into_iter()
                .filter_map(|source| doc.element(source)?.attribute("src"))
                .find(|src| !src.is_empty())
                .map(str::to_string),
        };

        let resolved = selected.map(|src| resolve_url(doc.base_url(), &src));
        if let Some(element) = doc.element_mut(node) {
            element.media.current_src = resolved;
        }
    }
}

/// Resolve `raw` against `base`; left as-is when there is no base or it does
/// not join
pub fn resolve_url(base: Option<&Url>, raw: &str) -> String {
    match base.map(|b| b.join(raw)) {
        Some(Ok(url)) => url.to_string(),
        _ => raw.to_string(),
    }
}
