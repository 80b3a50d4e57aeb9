//! Batch conversion of files on disk
//!
//! Inputs are the given files plus the registered audio files found in the
//! given directories. Each is converted through the same pipeline the server
//! uses and written next to the input (or into `--out`) as
//! `<stem>_<HHMMSS>_<millis><ext>`.

use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::cli::BatchArgs;
use crate::error::{Result, TranscodeError};
use crate::format::{Format, FormatRegistry};
use crate::params::EncodeConfig;
use crate::transcode::{self, PipelineStats};

/// Outcome of a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
    /// Explicitly named files that are not a decodable format
    pub skipped: usize,
}

pub struct BatchEncoder {
    registry: FormatRegistry,
    config: EncodeConfig,
    out_dir: Option<PathBuf>,
    recursive: bool,
    batch_size: usize,
}

impl BatchEncoder {
    pub fn new(registry: FormatRegistry, config: EncodeConfig, args: &BatchArgs) -> Self {
        Self {
            registry,
            config,
            out_dir: args.out.clone(),
            recursive: args.recursive,
            batch_size: args.batch_size,
        }
    }

    /// Convert everything under `paths`, stopping early once `cancel` fires.
    pub fn run(&self, paths: &[PathBuf], cancel: &CancellationToken) -> Result<BatchSummary> {
        if let Some(out) = &self.out_dir {
            std::fs::create_dir_all(out)?;
        }

        let mut summary = BatchSummary::default();
        // Collect first so files written into an input directory are not picked up.
        let inputs = self.collect_inputs(paths, &mut summary);

        for (input, format) in inputs {
            if cancel.is_cancelled() {
                tracing::info!("batch interrupted");
                break;
            }
            match self.encode_file(&input, format, cancel) {
                Ok((output, stats)) => {
                    summary.converted += 1;
                    tracing::info!(
                        input = %input.display(),
                        output = %output.display(),
                        samples = stats.samples_out,
                        "converted"
                    );
                }
                Err(TranscodeError::Cancelled) => {
                    tracing::info!(input = %input.display(), "conversion cancelled");
                    break;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(input = %input.display(), error = %e, "conversion failed");
                }
            }
        }

        Ok(summary)
    }

    /// Decodable inputs under `paths`, in a stable order.
    fn collect_inputs(
        &self,
        paths: &[PathBuf],
        summary: &mut BatchSummary,
    ) -> Vec<(PathBuf, &'static Format)> {
        let mut inputs = Vec::new();
        for path in paths {
            if path.is_dir() {
                self.walk_dir(path, &mut inputs);
                continue;
            }
            match self.decodable(path) {
                Some(format) => inputs.push((path.clone(), format)),
                None => {
                    summary.skipped += 1;
                    tracing::warn!(path = %path.display(), "not a supported input file, skipping");
                }
            }
        }
        inputs
    }

    fn walk_dir(&self, dir: &Path, inputs: &mut Vec<(PathBuf, &'static Format)>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read directory");
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();

        for path in paths {
            if path.is_dir() {
                if self.recursive {
                    self.walk_dir(&path, inputs);
                }
            } else if let Some(format) = self.decodable(&path) {
                inputs.push((path, format));
            }
        }
    }

    fn decodable(&self, path: &Path) -> Option<&'static Format> {
        self.registry
            .lookup_by_path(path.to_str()?)
            .filter(|f| f.can_decode())
    }

    /// Convert one file; a partial output is removed on failure.
    fn encode_file(
        &self,
        input: &Path,
        format: &Format,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, PipelineStats)> {
        let stamp = chrono::Local::now().format("%H%M%S_%3f").to_string();
        let output = output_path(
            input,
            self.out_dir.as_deref(),
            &stamp,
            self.config.format().default_extension,
        );

        let reader = BufReader::new(File::open(input)?);
        let writer = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&output)?;

        match transcode::transcode(reader, format, &self.config, writer, self.batch_size, cancel) {
            Ok(stats) => Ok((output, stats)),
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(&output) {
                    tracing::warn!(path = %output.display(), error = %remove, "cannot remove partial output");
                }
                Err(e)
            }
        }
    }
}

/// `<dir>/<stem>_<stamp><ext>`, with `dir` defaulting to the input's directory.
pub fn output_path(input: &Path, out_dir: Option<&Path>, stamp: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string());
    let dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}_{}{}", stem, stamp, extension))
}
