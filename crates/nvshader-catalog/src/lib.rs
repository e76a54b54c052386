//! # nvshader-catalog
//!
//! Builds one unified list of installed games from the launchers found on
//! a Linux gaming host: Steam (VDF/ACF manifests), Lutris (YAML configs),
//! Heroic (GOG / Epic / sideload JSON) and a hand-maintained config file.
//!
//! Detectors are best-effort: a missing launcher or an unreadable file
//! contributes nothing and never aborts the merge. Output order is stable
//! (Steam, Lutris, Heroic, manual) and ids are source-prefixed, so no
//! cross-source deduplication is needed.

pub mod heroic;
pub mod lutris;
pub mod manual;
pub mod steam;

use nvshader_core::Game;

pub use heroic::HeroicDetector;
pub use lutris::LutrisDetector;
pub use manual::{ManualConfig, ManualDetector, ManualGame};
pub use steam::SteamDetector;

/// A source of installed-game records.
///
/// Implementations never fail: errors are logged and an empty (or
/// partial) list is returned.
pub trait GameDetector {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Enumerate the games this source knows about.
    fn detect(&self) -> Vec<Game>;
}

/// Run the default detector set against the ambient environment.
#[must_use]
pub fn build_catalog() -> Vec<Game> {
    let detectors: Vec<Box<dyn GameDetector>> = vec![
        Box::new(SteamDetector::new()),
        Box::new(LutrisDetector::new()),
        Box::new(HeroicDetector::new()),
        Box::new(ManualDetector::new()),
    ];
    build_catalog_with(&detectors)
}

/// Merge the output of an explicit detector list, preserving order.
#[must_use]
pub fn build_catalog_with(detectors: &[Box<dyn GameDetector>]) -> Vec<Game> {
    let mut games = Vec::new();
    for detector in detectors {
        let found = detector.detect();
        tracing::debug!(detector = detector.name(), count = found.len(), "detector finished");
        games.extend(found);
    }
    games
}

/// Split a line into the strings between its double quotes.
///
/// `"path"  "/mnt/games"` yields `["path", "/mnt/games"]`. Shared by the
/// Steam VDF and ACF scanners; unterminated quotes drop the trailing
/// fragment.
pub(crate) fn quoted_strings(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = line;
    loop {
        let Some(start) = rest.find('"') else { break };
        let after = &rest[start + 1..];
        let Some(len) = after.find('"') else { break };
        out.push(&after[..len]);
        rest = &after[len + 1..];
    }
    out
}
