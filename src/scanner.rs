//! Media asset scanning
//!
//! A scan walks every video element and then every audio element in
//! document order and captures what the panel shows for each one. Nothing in
//! the document is modified. Structural fields (ids, kinds, sources) are
//! stable between scans of an unchanged tree; the playback fields are read
//! live and may differ from one scan to the next.

use serde::Serialize;
use tracing::{debug, info};

use crate::constants::media;
use crate::document::html::resolve_url;
use crate::document::{DocumentQuery, Element, NodeId};
use crate::types::{Dimensions, MediaKind};

/// Alternate `<source>` offered by a media element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    pub url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaAsset {
    /// `<kind>_<ordinal>`; positional, not stable if elements are reordered
    pub id: String,
    pub kind: MediaKind,
    pub primary_source: String,
    pub alternate_sources: Vec<SourceDescriptor>,
    /// Video only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    pub duration: String,
    pub ready_state: &'static str,
    pub network_state: &'static str,
    /// Element the asset was read from
    #[serde(skip)]
    pub node: NodeId,
}

/// Result of one scan: videos in document order, then audios
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AssetSnapshot {
    assets: Vec<MediaAsset>,
}

impl AssetSnapshot {
    pub fn assets(&self) -> &[MediaAsset] {
        &self.assets
    }

    pub fn of_kind(&self, kind: MediaKind) -> impl Iterator<Item = &MediaAsset> {
        self.assets.iter().filter(move |asset| asset.kind == kind)
    }

    pub fn count(&self, kind: MediaKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MediaAsset> {
        self.assets.iter().find(|asset| asset.id == id)
    }
}

/// Stateless scanner; every call produces a fresh snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct AssetScanner;

impl AssetScanner {
    pub fn new() -> Self {
        Self
    }

    pub fn scan(&self, doc: &impl DocumentQuery) -> AssetSnapshot {
        let mut assets = Vec::new();
        for kind in MediaKind::ALL {
            for (ordinal, node) in doc.query_all(kind.tag()).into_iter().enumerate() {
                if let Some(element) = doc.element(node) {
                    assets.push(extract_asset(doc, node, element, kind, ordinal));
                }
            }
        }

        let snapshot = AssetSnapshot { assets };
        if snapshot.is_empty() {
            info!("No media assets detected");
        } else {
            info!(
                total = snapshot.len(),
                videos = snapshot.count(MediaKind::Video),
                audios = snapshot.count(MediaKind::Audio),
                "Asset scan complete"
            );
            for asset in snapshot.assets() {
                debug!(asset = ?asset, "Scanned asset");
            }
        }
        snapshot
    }
}

fn extract_asset(
    doc: &impl DocumentQuery,
    node: NodeId,
    element: &Element,
    kind: MediaKind,
    ordinal: usize,
) -> MediaAsset {
    let base = doc.base_url();

    let primary_source = element
        .attribute("src")
        .filter(|src| !src.is_empty())
        .map(|src| resolve_url(base, src))
        .or_else(|| element.media.current_src.clone().filter(|src| !src.is_empty()))
        .unwrap_or_else(|| media::NO_SOURCE.to_string());

    let alternate_sources = doc
        .query_within(node, media::SOURCE_TAG)
        .into_iter()
        .filter_map(|source| doc.element(source))
        .map(|source| SourceDescriptor {
            url: source
                .attribute("src")
                .map(|src| resolve_url(base, src))
                .unwrap_or_default(),
            mime_type: source
                .attribute("type")
                .filter(|t| !t.is_empty())
                .unwrap_or(media::UNKNOWN_MIME)
                .to_string(),
        })
        .collect();

    let dimensions = (kind == MediaKind::Video)
        .then(|| Dimensions::new(element.media.video_width, element.media.video_height));

    // A zero length reports the same as a missing one
    let duration = match element.media.duration {
        Some(seconds) if seconds != 0.0 => format_duration(seconds),
        _ => media::UNKNOWN_DURATION.to_string(),
    };

    MediaAsset {
        id: format!("{kind}_{ordinal}"),
        kind,
        primary_source,
        alternate_sources,
        dimensions,
        duration,
        ready_state: ready_state_name(element.media.ready_state),
        network_state: network_state_name(element.media.network_state),
        node,
    }
}

/// `m:ss`; non-finite lengths are `"Unknown"`
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() {
        return media::UNKNOWN_DURATION.to_string();
    }
    let mins = (seconds / 60.0).floor() as i64;
    let secs = (seconds % 60.0).floor() as i64;
    format!("{mins}:{secs:02}")
}

pub fn ready_state_name(code: u16) -> &'static str {
    media::READY_STATES
        .get(usize::from(code))
        .copied()
        .unwrap_or(media::UNKNOWN_STATE)
}

pub fn network_state_name(code: u16) -> &'static str {
    media::NETWORK_STATES
        .get(usize::from(code))
        .copied()
        .unwrap_or(media::UNKNOWN_STATE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use url::Url;

    fn add(doc: &mut Document, parent: NodeId, tag: &str) -> NodeId {
        let node = doc.create_element(tag);
        doc.append_child(parent, node).unwrap();
        node
    }

    fn interleaved_page(videos: usize, audios: usize) -> Document {
        let mut doc = Document::new();
        let body = doc.body();
        for i in 0..videos.max(audios) {
            let section = add(&mut doc, body, "section");
            if i < audios {
                add(&mut doc, section, "audio");
            }
            if i < videos {
                add(&mut doc, section, "video");
            }
        }
        doc
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(75.0), "1:15");
        assert_eq!(format_duration(59.0), "0:59");
        assert_eq!(format_duration(59.9), "0:59");
        assert_eq!(format_duration(3600.0), "60:00");
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(f64::INFINITY), "Unknown");
        assert_eq!(format_duration(f64::NAN), "Unknown");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ready_state_name(0), "HAVE_NOTHING");
        assert_eq!(ready_state_name(4), "HAVE_ENOUGH_DATA");
        assert_eq!(ready_state_name(5), "UNKNOWN");
        assert_eq!(network_state_name(3), "NETWORK_NO_SOURCE");
        assert_eq!(network_state_name(4), "UNKNOWN");
        assert_eq!(network_state_name(u16::MAX), "UNKNOWN");
    }

    #[test]
    fn test_ids_per_kind_in_document_order() {
        let doc = interleaved_page(3, 2);
        let snapshot = AssetScanner::new().scan(&doc);

        assert_eq!(snapshot.len(), 5);
        let ids: Vec<&str> = snapshot.assets().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["video_0", "video_1", "video_2", "audio_0", "audio_1"]);

        let video_nodes: Vec<NodeId> = snapshot.of_kind(MediaKind::Video).map(|a| a.node).collect();
        assert_eq!(video_nodes, doc.query_all("video"));
    }

    #[test]
    fn test_empty_document() {
        let snapshot = AssetScanner::new().scan(&Document::new());
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.count(MediaKind::Audio), 0);
    }

    #[test]
    fn test_source_fallback_order() {
        let mut doc = Document::new();
        doc.set_base_url(Some(Url::parse("https://site.test/watch/").unwrap()));
        let body = doc.body();

        let explicit = add(&mut doc, body, "video");
        let element = doc.element_mut(explicit).unwrap();
        element.set_attribute("src", "movie.mp4");
        element.media.current_src = Some("https://elsewhere.test/other.mp4".to_string());

        let current = add(&mut doc, body, "video");
        let element = doc.element_mut(current).unwrap();
        element.set_attribute("src", "");
        element.media.current_src = Some("https://site.test/picked.webm".to_string());

        add(&mut doc, body, "video");

        let snapshot = AssetScanner::new().scan(&doc);
        assert_eq!(snapshot.get("video_0").unwrap().primary_source, "https://site.test/watch/movie.mp4");
        assert_eq!(snapshot.get("video_1").unwrap().primary_source, "https://site.test/picked.webm");
        assert_eq!(snapshot.get("video_2").unwrap().primary_source, "N/A");
    }

    #[test]
    fn test_alternate_sources_in_order() {
        let mut doc = Document::new();
        let body = doc.body();
        let audio = add(&mut doc, body, "audio");

        let ogg = add(&mut doc, audio, "source");
        let element = doc.element_mut(ogg).unwrap();
        element.set_attribute("src", "track.ogg");
        element.set_attribute("type", "audio/ogg");

        let mp3 = add(&mut doc, audio, "source");
        doc.element_mut(mp3).unwrap().set_attribute("src", "track.mp3");

        let asset = AssetScanner::new().scan(&doc).get("audio_0").cloned().unwrap();
        assert_eq!(
            asset.alternate_sources,
            vec![
                SourceDescriptor { url: "track.ogg".into(), mime_type: "audio/ogg".into() },
                SourceDescriptor { url: "track.mp3".into(), mime_type: "Unknown".into() },
            ]
        );
        assert!(asset.dimensions.is_none());
    }

    #[test]
    fn test_live_fields() {
        let mut doc = Document::new();
        let body = doc.body();
        let video = add(&mut doc, body, "video");
        let state = &mut doc.element_mut(video).unwrap().media;
        state.duration = Some(125.4);
        state.ready_state = 4;
        state.network_state = 1;
        state.video_width = 1280;
        state.video_height = 720;

        let unknown = add(&mut doc, body, "audio");
        let state = &mut doc.element_mut(unknown).unwrap().media;
        state.duration = Some(f64::INFINITY);
        state.ready_state = 9;
        state.network_state = 7;

        let snapshot = AssetScanner::new().scan(&doc);
        let video = snapshot.get("video_0").unwrap();
        assert_eq!(video.duration, "2:05");
        assert_eq!(video.ready_state, "HAVE_ENOUGH_DATA");
        assert_eq!(video.network_state, "NETWORK_IDLE");
        assert_eq!(video.dimensions.unwrap().to_string(), "1280x720");

        let audio = snapshot.get("audio_0").unwrap();
        assert_eq!(audio.duration, "Unknown");
        assert_eq!(audio.ready_state, "UNKNOWN");
        assert_eq!(audio.network_state, "UNKNOWN");
    }

    #[test]
    fn test_zero_or_missing_duration_unknown() {
        let mut doc = Document::new();
        let body = doc.body();
        let zero = add(&mut doc, body, "audio");
        doc.element_mut(zero).unwrap().media.duration = Some(0.0);
        add(&mut doc, body, "audio");

        let snapshot = AssetScanner::new().scan(&doc);
        assert!(snapshot.assets().iter().all(|a| a.duration == "Unknown"));
    }

    #[test]
    fn test_rescan_of_unchanged_document_is_structurally_identical() {
        let mut doc = interleaved_page(2, 2);
        let scanner = AssetScanner::new();
        let first = scanner.scan(&doc);

        let video = doc.query_all("video")[0];
        let state = &mut doc.element_mut(video).unwrap().media;
        state.duration = Some(30.0);
        state.ready_state = 3;

        let second = scanner.scan(&doc);
        let structure = |s: &AssetSnapshot| {
            s.assets()
                .iter()
                .map(|a| (a.id.clone(), a.kind, a.primary_source.clone(), a.alternate_sources.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(structure(&first), structure(&second));
        assert_ne!(first.get("video_0").unwrap().duration, second.get("video_0").unwrap().duration);
    }

    #[test]
    fn test_scan_does_not_mutate_document() {
        let doc = interleaved_page(1, 1);
        let before: Vec<Element> = doc.query_all("video").into_iter().chain(doc.query_all("audio"))
            .map(|n| doc.element(n).unwrap().clone())
            .collect();
        AssetScanner::new().scan(&doc);
        let after: Vec<Element> = doc.query_all("video").into_iter().chain(doc.query_all("audio"))
            .map(|n| doc.element(n).unwrap().clone())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_snapshot_serializes_as_list() {
        let doc = interleaved_page(1, 0);
        let json = serde_json::to_value(AssetScanner::new().scan(&doc)).unwrap();
        assert_eq!(json[0]["id"], "video_0");
        assert_eq!(json[0]["kind"], "video");
        assert_eq!(json[0]["primary_source"], "N/A");
        assert!(json[0].get("node").is_none());
    }
}
