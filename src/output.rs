//! CLI report formatting.
//!
//! Progress while a run is underway goes through `tracing`. This module
//! renders the summary printed once a command finishes.
//!
//! # Output Format
//!
//! ## Sync
//!
//! ```text
//! /
//!     3 images, 2 albums: up to date
//! 2024/trip/
//!     4 images: 1 deleted, 2 generated, manifest, page
//!     Location: thumbs/2024/trip/index.html
//! 2024/broken/
//!     FAILED (transient I/O): store error: request failed ...
//!
//! Synced 2 albums, 1 failed
//! Cache: 2 downloaded (10342 bytes), 1 cached
//! ```
//!
//! ## Plan
//!
//! ```text
//! 2024/trip/
//!     4 images, 1 album
//!     needed: b_thumb_0c11aa.jpg
//!     obsolete: a_thumb_ab12cd.jpg
//!
//! 1 album, 1 artifact to generate, 1 to delete
//! ```
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::error::ErrorKind;
use crate::scan::Album;
use crate::sync::{AlbumReport, TreeReport, display_path};

// ============================================================================
// Shared helpers
// ============================================================================

/// `1 image`, `3 images`. Words ending in `y` after a consonant take `ies`.
pub fn pluralize(n: usize, word: &str) -> String {
    if n == 1 {
        return format!("1 {word}");
    }
    let plural = match word.strip_suffix('y') {
        Some(stem) if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) => format!("{stem}ies"),
        _ => format!("{word}s"),
    };
    format!("{n} {plural}")
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::TransientIo => "transient I/O",
        ErrorKind::TransformFailure => "transform",
        ErrorKind::InternalConsistency => "internal",
        ErrorKind::Configuration => "configuration",
    }
}

/// `3 images, 2 albums` with the album part omitted when there are none.
fn contents_line(images: usize, albums: usize) -> String {
    if albums == 0 {
        pluralize(images, "image")
    } else {
        format!("{}, {}", pluralize(images, "image"), pluralize(albums, "album"))
    }
}

// ============================================================================
// Sync
// ============================================================================

fn album_lines(album: &AlbumReport) -> Vec<String> {
    let mut lines = vec![display_path(&album.path).to_string()];
    let contents = contents_line(album.images, album.subdirectories);

    if !album.changed() {
        lines.push(format!("{}{}: up to date", indent(1), contents));
        return lines;
    }

    let mut actions = Vec::new();
    if album.downloaded > 0 {
        actions.push(format!("{} downloaded", album.downloaded));
    }
    if album.deleted > 0 {
        actions.push(format!("{} deleted", album.deleted));
    }
    if album.generated > 0 {
        actions.push(format!("{} generated", album.generated));
    }
    if album.manifest_updated {
        actions.push("manifest".to_string());
    }
    if album.page_updated {
        actions.push("page".to_string());
    }
    lines.push(format!("{}{}: {}", indent(1), contents, actions.join(", ")));
    if album.manifest_updated || album.page_updated {
        lines.push(format!("{}Location: {}", indent(1), album.location));
    }
    lines
}

/// Format the summary of a tree sync.
pub fn format_sync_report(report: &TreeReport) -> Vec<String> {
    let mut lines = Vec::new();

    if report.swept > 0 {
        lines.push(format!("Swept {}", pluralize(report.swept, "stray temporary file")));
    }
    for key in &report.support_files {
        lines.push(format!("Uploaded {key}"));
    }

    for album in &report.albums {
        lines.extend(album_lines(album));
    }
    for failure in &report.failed {
        lines.push(display_path(&failure.path).to_string());
        lines.push(format!(
            "{}FAILED ({}): {}",
            indent(1),
            kind_label(failure.kind),
            failure.message
        ));
    }

    lines.push(String::new());
    let mut summary = format!("Synced {}", pluralize(report.albums.len(), "album"));
    if !report.failed.is_empty() {
        summary.push_str(&format!(", {} failed", report.failed.len()));
    }
    lines.push(summary);
    lines.push(format!("Cache: {}", report.cache));
    lines
}

pub fn print_sync_report(report: &TreeReport) {
    for line in format_sync_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Format the work plan of a dry run.
pub fn format_plan(albums: &[Album]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut needed = 0;
    let mut obsolete = 0;

    for album in albums {
        lines.push(display_path(&album.path).to_string());
        lines.push(format!(
            "{}{}",
            indent(1),
            contents_line(album.source_images.len(), album.subdirectories.len())
        ));
        for artifact in &album.needed {
            lines.push(format!("{}needed: {}", indent(1), artifact.name));
        }
        for name in &album.obsolete {
            lines.push(format!("{}obsolete: {}", indent(1), name));
        }
        needed += album.needed.len();
        obsolete += album.obsolete.len();
    }

    lines.push(String::new());
    lines.push(format!(
        "{}, {} to generate, {} to delete",
        pluralize(albums.len(), "album"),
        pluralize(needed, "artifact"),
        obsolete
    ));
    lines
}

pub fn print_plan(albums: &[Album]) {
    for line in format_plan(albums) {
        println!("{}", line);
    }
}
