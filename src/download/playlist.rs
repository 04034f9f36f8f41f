pub mod segment;
pub mod variant;

pub const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";
pub const EXTINF_TAG: &str = "#EXTINF";
pub const SEGMENT_SUFFIX: &str = ".ts";

/// Lines of `playlist` accepted by `predicate`, in playlist order.
pub fn select_lines<'a>(playlist: &'a str, predicate: impl Fn(&str) -> bool) -> Vec<&'a str> {
    playlist.lines().filter(|line| predicate(*line)).collect()
}

pub fn segment_lines(playlist: &str) -> Vec<&str> {
    select_lines(playlist, |line| line.ends_with(SEGMENT_SUFFIX))
}

pub fn is_master(playlist: &str) -> bool {
    playlist.lines().any(|line| line.starts_with(STREAM_INF_TAG))
}
