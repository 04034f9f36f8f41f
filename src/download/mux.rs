use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::Error;

/// The external muxer that turns the local playlist into one media file.
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn not_found(&self, source: std::io::Error) -> Error {
        Error::MuxerNotFound {
            program: self.program.display().to_string(),
            source,
        }
    }

    /// Runs `ffmpeg -version` and returns its first line.
    pub async fn probe(&self) -> Result<String, Error> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| self.not_found(err))?;

        if !output.status.success() {
            return Err(self.not_found(std::io::Error::other(format!(
                "`-version` exited with {}",
                output.status
            ))));
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();

        debug!(%version, "found muxer");
        Ok(version)
    }

    /// Copies the streams of `input` into `output` without re-encoding. Both
    /// names are relative to `working_dir`.
    pub async fn mux(&self, working_dir: &Path, input: &str, output: &str) -> Result<PathBuf, Error> {
        info!(input, output, "Converting segments");

        let result = Command::new(&self.program)
            .args(["-loglevel", "error", "-y", "-i", input, "-c", "copy", output])
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| self.not_found(err))?;

        if !result.status.success() {
            return Err(Error::MuxFailed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(working_dir.join(output))
    }
}
