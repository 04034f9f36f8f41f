use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::download::playlist::STREAM_INF_TAG;
use crate::error::Error;

static NAME_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"NAME="([^"]+)""#).unwrap());
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());
static HEIGHT_IN_FILENAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)p").unwrap());

/// One `#EXT-X-STREAM-INF` entry and the playlist line that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant<'a> {
    pub name: Option<&'a str>,
    pub height: u64,
    /// Verbatim, unresolved.
    pub playlist: &'a str,
}

fn height_of(name: Option<&str>, playlist: &str) -> Option<u64> {
    let captures = match name {
        Some(name) => DIGITS.captures(name),
        None => HEIGHT_IN_FILENAME.captures(playlist),
    }?;

    let digits = captures.get(1)?.as_str();
    match digits.parse() {
        Ok(height) => Some(height),
        Err(err) => {
            warn!(digits, playlist, "unreadable variant resolution, skipping: {}", err);
            None
        }
    }
}

/// Every variant whose height could be extracted, in playlist order.
pub fn parse_variants(playlist: &str) -> Vec<Variant<'_>> {
    let lines = playlist.lines().collect::<Vec<&str>>();

    lines
        .iter()
        .copied()
        .zip(lines.iter().copied().skip(1))
        .filter(|(line, _)| line.starts_with(STREAM_INF_TAG))
        .filter_map(|(line, next)| {
            let name = NAME_ATTRIBUTE
                .captures(line)
                .and_then(|captures| captures.get(1))
                .map(|name| name.as_str());

            match height_of(name, next) {
                Some(height) => Some(Variant { name, height, playlist: next }),
                None => {
                    debug!(stream_inf = %line, playlist = %next, "no resolution found for variant, skipping");
                    None
                }
            }
        })
        .collect()
}

/// The variant with the greatest height; the first one wins a tie.
pub fn select_variant(playlist: &str) -> Result<Variant<'_>, Error> {
    let mut best: Option<Variant> = None;

    for variant in parse_variants(playlist) {
        if best.as_ref().map_or(true, |best| variant.height > best.height) {
            best = Some(variant);
        }
    }

    let best = best.ok_or(Error::NoVariantFound)?;
    info!(height = best.height, name = ?best.name, playlist = best.playlist, "Best quality");
    Ok(best)
}
