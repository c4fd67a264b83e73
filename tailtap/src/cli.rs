use std::path::PathBuf;

use clap::Parser;

const ABOUT: &str = "Tails append-only log files under a directory and periodically reports \
aggregated stats: event/line throughput, level breakdown, latency percentiles, and top \
message keys.";

/// Command-line configuration, translated once at startup into the
/// immutable `CoordinatorConfig`/`ReporterConfig` the engine runs with.
#[derive(Debug, Parser)]
#[command(name = "tailtap", about = ABOUT, version)]
pub struct CliOptions {
    /// Directory to watch for log files.
    pub watch_path: PathBuf,

    /// Number of worker threads processing file events. Defaults to the
    /// available parallelism.
    #[arg(long, value_parser = clap::value_parser!(usize).range(1..))]
    pub workers: Option<usize>,

    /// Maximum number of queued filesystem events before new ones are
    /// dropped.
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(usize).range(1..))]
    pub queue_capacity: usize,

    /// Seconds between stats reports.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub report_interval_seconds: u64,

    /// Number of top message keys to report each interval.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(usize).range(1..))]
    pub topk: usize,

    /// Comma-separated file extensions (without the dot) that are eligible
    /// for tailing.
    #[arg(long, default_value = "log")]
    pub extensions: String,

    /// Size, in bytes, of the reusable chunk buffer each worker uses to
    /// read appended file data.
    #[arg(long, default_value_t = 65_536, value_parser = clap::value_parser!(usize).range(1..))]
    pub chunk_size_bytes: usize,

    /// Suppress the startup configuration line.
    #[arg(long)]
    pub quiet: bool,
}

impl CliOptions {
    pub fn resolved_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn extension_list(&self) -> Vec<String> {
        self.extensions
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Validates the watch path exists and is a directory. Argument parsing
    /// itself (handled by clap) already maps malformed flags to exit code 2;
    /// this check extends that same exit code to a bad path.
    pub fn validate(&self) -> Result<(), String> {
        if !self.watch_path.exists() {
            return Err(format!(
                "watch path does not exist: {}",
                self.watch_path.display()
            ));
        }
        if !self.watch_path.is_dir() {
            return Err(format!(
                "watch path is not a directory: {}",
                self.watch_path.display()
            ));
        }
        if self.extension_list().is_empty() {
            return Err("--extensions must name at least one extension".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_list_trims_and_drops_empties() {
        let opts = CliOptions::try_parse_from(["tailtap", "/tmp", "--extensions", " log, txt ,"])
            .unwrap();
        assert_eq!(opts.extension_list(), vec!["log", "txt"]);
    }

    #[test]
    fn resolved_workers_falls_back_to_available_parallelism() {
        let opts = CliOptions::try_parse_from(["tailtap", "/tmp"]).unwrap();
        assert!(opts.resolved_workers() >= 1);
    }

    #[test]
    fn validate_rejects_missing_path() {
        let opts =
            CliOptions::try_parse_from(["tailtap", "/definitely/does/not/exist"]).unwrap();
        assert!(opts.validate().is_err());
    }
}
