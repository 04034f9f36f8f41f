mod download;
mod error;
mod options;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::download::pipeline::{Pipeline, REPORT_FILENAME};
use crate::download::DownloadClient;
use crate::error::Error;
use crate::options::{Options, DEFAULT_USER_AGENT};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(value_parser = url_parser)]
    /// provide the master playlist url
    url: Url,

    #[clap(short, long)]
    /// directory to save everything into, defaults to a timestamped folder in your downloads
    output: Option<PathBuf>,

    #[clap(short, long)]
    /// print debug output
    verbose: bool,

    #[clap(short, long, default_value = "30")]
    /// set the maximum number of parallel downloads
    parallel: usize,

    #[clap(long, default_value = "30")]
    /// set the timeout of a single segment download in seconds
    timeout: u64,

    #[clap(long)]
    /// fail the run if any segment fails to download
    strict: bool,

    #[clap(long)]
    /// only download, do not combine the segments
    no_mux: bool,

    #[clap(long, default_value = "ffmpeg")]
    /// path of the ffmpeg executable
    ffmpeg: PathBuf,

    #[clap(long, default_value = DEFAULT_USER_AGENT)]
    /// set the User-Agent header sent with every request
    user_agent: String,

    #[clap(long)]
    /// read the media playlist from a file, segments are resolved against the url's origin
    playlist: Option<PathBuf>,
}

fn url_parser(url: &str) -> Result<Url, String> {
    if !url.starts_with("http") {
        return Err("URL must start with http or https".to_string());
    }

    Url::parse(url).map_err(|err| err.to_string())
}

async fn run(url: Url, playlist: Option<PathBuf>, options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let client = Arc::new(DownloadClient::new(&options.user_agent, options.segment_timeout)?);

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling downloads");
            interrupt.cancel();
        }
    });

    let pipeline = Pipeline::new(client, options).with_cancellation(token);

    let summary = match playlist {
        Some(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| Error::filesystem(&path, err))?;
            pipeline.run_local_playlist(&url, &text).await?
        }
        None => pipeline.run(&url).await?,
    };

    if !summary.report.failed.is_empty() {
        warn!(
            "{} of {} segments are missing, see {}",
            summary.report.failed.len(),
            summary.report.total,
            summary.output_dir.join(REPORT_FILENAME).display()
        );
    }

    match summary.output {
        Some(output) => info!("Finished downloading {} from: {}", output.display(), summary.playlist_url),
        None => info!(
            "Finished downloading segments of {} to {}",
            summary.playlist_url,
            summary.output_dir.display()
        ),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = Options {
        output_dir: args.output.unwrap_or_else(options::default_output_dir),
        max_parallel_downloads: args.parallel,
        segment_timeout: Duration::from_secs(args.timeout),
        strict: args.strict,
        no_mux: args.no_mux,
        ffmpeg: args.ffmpeg,
        user_agent: args.user_agent,
    };

    debug!(?options, "Options");

    if let Err(err) = run(args.url, args.playlist, options).await {
        error!("{}", err);
        std::process::exit(1);
    }
}
