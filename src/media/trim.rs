use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::error::{ClipError, ClipResult};

/// Opaque `trim(source, start, end) -> clip` operation.
#[async_trait]
pub trait Trimmer: Send + Sync {
    /// Write the `[start, end)` second range of `src` to `dst`.
    ///
    /// `TrimRejected` means the tool ran and refused the input; `TrimUnavailable`
    /// means it could not be run at all.
    async fn trim(
        &self,
        src: &Path,
        start: f64,
        end: f64,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> ClipResult<()>;
}

pub struct FfmpegTrimmer {
    binary: String,
}

impl FfmpegTrimmer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(src: &Path, start: f64, end: f64, dst: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format!("{:.3}", start),
            "-i".to_string(),
            src.display().to_string(),
            "-t".to_string(),
            format!("{:.3}", end - start),
            "-c".to_string(),
            "copy".to_string(),
            dst.display().to_string(),
        ]
    }
}

impl Default for FfmpegTrimmer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Trimmer for FfmpegTrimmer {
    async fn trim(
        &self,
        src: &Path,
        start: f64,
        end: f64,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> ClipResult<()> {
        let args = Self::args(src, start, end, dst);
        debug!("Running {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClipError::TrimUnavailable(format!("spawn {}: {}", self.binary, e)))?;

        // Dropping the child on cancellation kills the process.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClipError::Cancelled),
            output = child.wait_with_output() => output
                .map_err(|e| ClipError::TrimUnavailable(format!("wait {}: {}", self.binary, e)))?,
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().last().unwrap_or("").trim().to_string();
        match output.status.code() {
            Some(code) => Err(ClipError::TrimRejected(format!(
                "{} exited with {}: {}",
                self.binary, code, detail
            ))),
            // Killed by a signal, most likely the OOM killer.
            None => Err(ClipError::TrimUnavailable(format!(
                "{} terminated by signal: {}",
                self.binary, detail
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ErrorKind;
    use std::path::PathBuf;

    #[test]
    fn test_args_encode_duration() {
        let args = FfmpegTrimmer::args(
            &PathBuf::from("/tmp/in.mp4"),
            12.0,
            17.5,
            &PathBuf::from("/tmp/out.mp4"),
        );
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "12.000");
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "5.500");
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transient() {
        let trimmer = FfmpegTrimmer::new("/nonexistent/ffmpeg-for-tests");
        let cancel = CancellationToken::new();
        let err = trimmer
            .trim(
                Path::new("/tmp/in.mp4"),
                0.0,
                1.0,
                Path::new("/tmp/out.mp4"),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
    }
}
