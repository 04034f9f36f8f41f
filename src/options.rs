use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PARALLEL_DOWNLOADS: usize = 30;
pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0";

#[derive(Debug, Clone)]
pub struct Options {
    pub output_dir: PathBuf,
    pub max_parallel_downloads: usize,
    pub segment_timeout: Duration,
    /// treat any failed segment as a failed run
    pub strict: bool,
    /// stop after the segments are on disk
    pub no_mux: bool,
    pub ffmpeg: PathBuf,
    pub user_agent: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_parallel_downloads: DEFAULT_PARALLEL_DOWNLOADS,
            segment_timeout: DEFAULT_SEGMENT_TIMEOUT,
            strict: false,
            no_mux: false,
            ffmpeg: PathBuf::from("ffmpeg"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// `<download dir>/<unix timestamp>`, evaluated once per run.
pub fn default_output_dir() -> PathBuf {
    let downloads = dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."));

    downloads.join(chrono::Utc::now().timestamp().to_string())
}
