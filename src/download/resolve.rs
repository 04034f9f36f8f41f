//! Resolution of playlist references against the URL of the manifest that
//! contains them.
//!
//! A reference is absolute when it starts with a URL scheme and relative
//! otherwise. Relative references are always joined against the directory of
//! the manifest they were read from, never against the master playlist.

use std::path::PathBuf;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::Error;

pub fn parse(input: &str) -> Result<Url, Error> {
    Url::parse(input).map_err(|source| Error::InvalidUrl {
        input: input.to_string(),
        source,
    })
}

/// `scheme ":"` where scheme is `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`.
pub fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };

    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

pub fn resolve(reference: &str, base: &Url) -> Result<Url, Error> {
    if has_scheme(reference) {
        return parse(reference);
    }

    base.join(reference).map_err(|source| Error::InvalidUrl {
        input: reference.to_string(),
        source,
    })
}

/// The directory containing `url`, with a trailing `/`.
pub fn base_of(url: &Url) -> Url {
    let mut base = url.clone();
    let dir = match url.path().rfind('/') {
        Some(idx) => url.path()[..=idx].to_string(),
        None => "/".to_string(),
    };

    base.set_path(&dir);
    base.set_query(None);
    base.set_fragment(None);
    base
}

pub fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// Last path segment of `url`, percent-decoded.
pub fn filename_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(local_component)
        .unwrap_or_default()
}

/// Directory that holds everything outside the base, one sub-directory per host.
pub const EXTERNAL_DIR: &str = "_ext";

/// Local path for `url` relative to the output directory.
///
/// URLs below `base` keep their sub-path so segments sharing a directory on the
/// server share one locally. Anything else lands under
/// `_ext/<host>[_<port>]/<full path>`, which keeps it apart from the base tree
/// and from other hosts. Components are percent-decoded and empty ones dropped.
pub fn local_path(url: &Url, base: &Url) -> PathBuf {
    let same_origin = url.origin() == base.origin();
    let (prefix, relative) = match url.path().strip_prefix(base.path()) {
        Some(rest) if same_origin => (Vec::new(), rest),
        _ => (vec![EXTERNAL_DIR.to_string(), host_dir(url)], url.path()),
    };

    prefix
        .into_iter()
        .chain(relative.split('/').filter(|part| !part.is_empty()).map(local_component))
        .collect()
}

fn host_dir(url: &Url) -> String {
    let host = url.host_str().map(local_component).unwrap_or_else(|| "_".to_string());
    match url.port() {
        Some(port) => format!("{host}_{port}"),
        None => host,
    }
}

/// Decodes one path component so it can't climb out of, or split across,
/// directories: separators become `_`, as do `.` and `..`.
fn local_component(part: &str) -> String {
    let decoded = percent_decode_str(part).decode_utf8_lossy().replace(['/', '\\'], "_");
    match decoded.as_str() {
        "." | ".." => "_".repeat(decoded.len()),
        _ => decoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(input: &str) -> Url {
        Url::parse(input).unwrap()
    }

    #[test]
    fn detects_scheme() {
        assert!(has_scheme("https://cdn.example.com/a.m3u8"));
        assert!(has_scheme("http://cdn.example.com/a.ts"));
        assert!(has_scheme("hls+s3://bucket/a.ts"));
        assert!(!has_scheme("1080p/seg-1.ts"));
        assert!(!has_scheme("/abs/path/seg-1.ts"));
        assert!(!has_scheme(":1.ts"));
        assert!(!has_scheme("1a://nope"));
    }

    #[test]
    fn absolute_reference_is_returned_unchanged() {
        let reference = "https://other.example.com/x/y/seg-3.ts?sig=abc";
        for base in [
            "https://cdn.example.com/a/b/",
            "http://localhost:8080/",
            "https://cdn.example.com/a/master.m3u8?token=1",
        ] {
            assert_eq!(resolve(reference, &url(base)).unwrap().as_str(), reference);
        }
    }

    #[test]
    fn relative_reference_joins_against_directory() {
        let base = url("https://cdn.example.com/a/b/master.m3u8?token=1#frag");

        assert_eq!(
            resolve("720p/index.m3u8", &base).unwrap().as_str(),
            "https://cdn.example.com/a/b/720p/index.m3u8"
        );
        assert_eq!(
            resolve("../c/./seg.ts", &base).unwrap().as_str(),
            "https://cdn.example.com/a/c/seg.ts"
        );
        assert_eq!(
            resolve("/root.ts", &base).unwrap().as_str(),
            "https://cdn.example.com/root.ts"
        );
    }

    #[test]
    fn invalid_absolute_reference() {
        let base = url("https://cdn.example.com/");
        let err = resolve("http://[::1", &base).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn base_of_strips_filename() {
        let master = url("https://cdn.example.com/a/b/master.m3u8?x=1");
        assert_eq!(base_of(&master).as_str(), "https://cdn.example.com/a/b/");

        let dir = url("https://cdn.example.com/a/b/");
        assert_eq!(base_of(&dir).as_str(), "https://cdn.example.com/a/b/");

        let root = url("https://cdn.example.com/master.m3u8");
        assert_eq!(base_of(&root).as_str(), "https://cdn.example.com/");
    }

    #[test]
    fn base_of_resolved_manifest() {
        let master = resolve("https://cdn.example.com/a/b/master.m3u8", &url("http://unused/")).unwrap();
        assert_eq!(base_of(&master).as_str(), "https://cdn.example.com/a/b/");
    }

    #[test]
    fn origin_drops_path() {
        let playlist = url("https://cdn.example.com:8443/a/b/index.m3u8?q=1");
        let origin = origin_of(&playlist);
        assert_eq!(origin.as_str(), "https://cdn.example.com:8443/");
        assert_eq!(
            resolve("seg-1.ts", &origin).unwrap().as_str(),
            "https://cdn.example.com:8443/seg-1.ts"
        );
    }

    #[test]
    fn filename() {
        assert_eq!(filename_of(&url("https://h/a/b/seg-60-v1-a1.ts?x=1")), "seg-60-v1-a1.ts");
        assert_eq!(filename_of(&url("https://h/a/b/seg%201.ts")), "seg 1.ts");
        assert_eq!(filename_of(&url("https://h/a/b/")), "");
    }

    #[test]
    fn local_path_mirrors_sub_directories() {
        let base = url("https://cdn.example.com/video/");

        let nested = url("https://cdn.example.com/video/1080p.h264.mp4/seg-60-v1-a1.ts");
        assert_eq!(
            local_path(&nested, &base),
            PathBuf::from("1080p.h264.mp4").join("seg-60-v1-a1.ts")
        );

        let elsewhere = url("https://other.example.com/video/1080p/seg-1.ts");
        assert_eq!(
            local_path(&elsewhere, &base),
            PathBuf::from_iter([EXTERNAL_DIR, "other.example.com", "video", "1080p", "seg-1.ts"])
        );

        let above = url("https://cdn.example.com/other/seg-2.ts");
        assert_eq!(
            local_path(&above, &base),
            PathBuf::from_iter([EXTERNAL_DIR, "cdn.example.com", "other", "seg-2.ts"])
        );
    }

    #[test]
    fn parent_reference_does_not_collide_with_sibling() {
        let playlist = url("https://cdn.example.com/v/1080p/index.m3u8");
        let base = base_of(&playlist);

        let shared = local_path(&resolve("../x/seg.ts", &base).unwrap(), &base);
        let sibling = local_path(&resolve("seg.ts", &base).unwrap(), &base);

        assert_eq!(sibling, PathBuf::from("seg.ts"));
        assert_eq!(shared, PathBuf::from_iter([EXTERNAL_DIR, "cdn.example.com", "v", "x", "seg.ts"]));
    }

    #[test]
    fn absolute_references_sharing_a_filename_stay_apart() {
        let base = url("https://cdn.example.com/v/");

        let first = local_path(&url("https://edge.example.net/a/seg-1.ts"), &base);
        let second = local_path(&url("https://edge.example.net/b/seg-1.ts"), &base);
        let other_port = local_path(&url("https://edge.example.net:8443/a/seg-1.ts"), &base);

        assert_ne!(first, second);
        assert_ne!(first, other_port);
        assert_eq!(other_port, PathBuf::from_iter([EXTERNAL_DIR, "edge.example.net_8443", "a", "seg-1.ts"]));
    }

    #[test]
    fn local_path_is_percent_decoded() {
        let base = url("https://cdn.example.com/v/");

        assert_eq!(
            local_path(&url("https://cdn.example.com/v/part%20one/seg%201.ts"), &base),
            PathBuf::from("part one").join("seg 1.ts")
        );
        assert_eq!(
            local_path(&url("https://cdn.example.com/v/a%2Fb/seg.ts"), &base),
            PathBuf::from_iter(["a_b", "seg.ts"])
        );
    }
}
