//! Presentation boundary
//!
//! The coordinator pushes snapshots, announcements and the minimized flag
//! through [`Presenter`]. `ConsolePresenter` renders them as plain text on
//! stdout; a graphical panel would implement the same trait.

use std::fmt::Write as _;

use crate::persistence::Announcement;
use crate::scanner::AssetSnapshot;
use crate::types::MediaKind;

pub trait Presenter {
    fn show_assets(&mut self, snapshot: &AssetSnapshot);
    fn show_announcements(&mut self, announcements: &[Announcement]);
    fn set_minimized(&mut self, minimized: bool);
}

/// Text panel on stdout. While minimized only one-line summaries are printed.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    minimized: bool,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for ConsolePresenter {
    fn show_assets(&mut self, snapshot: &AssetSnapshot) {
        if self.minimized {
            println!("[media assets: {}]", snapshot.len());
        } else {
            print!("{}", render_assets(snapshot));
        }
    }

    fn show_announcements(&mut self, announcements: &[Announcement]) {
        if self.minimized {
            println!("[announcements: {}]", announcements.len());
        } else {
            print!("{}", render_announcements(announcements));
        }
    }

    fn set_minimized(&mut self, minimized: bool) {
        self.minimized = minimized;
        println!("[panel {}]", if minimized { "minimized" } else { "expanded" });
    }
}

pub fn render_assets(snapshot: &AssetSnapshot) -> String {
    let mut out = String::from("== Media Assets ==\n");
    if snapshot.is_empty() {
        out.push_str("No media assets found on this page\n");
        return out;
    }

    for asset in snapshot.assets() {
        let _ = writeln!(out, "[{}] {} ({})", asset.kind, asset.id, asset.ready_state);
        let _ = writeln!(out, "  {}", asset.primary_source);
        if !asset.alternate_sources.is_empty() {
            out.push_str("  Sources:\n");
            for source in &asset.alternate_sources {
                let _ = writeln!(out, "    {} ({})", source.url, source.mime_type);
            }
        }
        let _ = write!(out, "  Duration: {}  Network: {}", asset.duration, asset.network_state);
        if asset.kind == MediaKind::Video
            && let Some(dimensions) = asset.dimensions
        {
            let _ = write!(out, "  Size: {dimensions}");
        }
        out.push('\n');
    }
    out
}

pub fn render_announcements(announcements: &[Announcement]) -> String {
    let mut out = String::from("== Announcements ==\n");
    if announcements.is_empty() {
        out.push_str("No announcements available\n");
        return out;
    }

    for announcement in announcements {
        let title = if announcement.title.is_empty() {
            "Announcement"
        } else {
            &announcement.title
        };
        let _ = writeln!(out, "* {title}");
        if !announcement.message.is_empty() {
            let _ = writeln!(out, "  {}", announcement.message);
        }
        if !announcement.timestamp.is_empty() {
            let _ = writeln!(out, "  ({})", announcement.timestamp);
        }
    }
    out
}
