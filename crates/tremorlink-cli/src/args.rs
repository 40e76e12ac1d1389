// Command line arguments for the tremorlink binary

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use tremorlink_core::config::TremorLinkConfig;
use tremorlink_core::datalog::RecordMode;

#[derive(Debug, Parser, Clone)]
#[command(name = "tremorlink", version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (defaults to <config dir>/tremorlink/config.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Processing backend URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Device host or ws:// URL; repeat to give several, tried in order
    #[arg(short, long = "endpoint", global = true)]
    pub endpoints: Vec<String>,
}

impl CliArgs {
    /// Flags override every other settings layer
    pub fn apply(&self, config: &mut TremorLinkConfig) {
        if let Some(url) = &self.api_url {
            config.api.base_url = url.clone();
        }
        if !self.endpoints.is_empty() {
            config.device.endpoints = self.endpoints.clone();
        }
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List recordings known to the processing backend
    Files {
        /// List stored exports instead of raw recordings
        #[arg(long)]
        processed: bool,
    },

    /// Stream a recording (or synthetic data) to the device
    Stream(StreamCommand),

    /// Play a case study's processed file to the device
    Case(CaseCommand),

    /// Show or assign case-study files
    Cases {
        /// Case to assign (normal, earlyPD, moderatePD, advancedPD)
        #[arg(long, requires = "file")]
        assign: Option<String>,

        /// Processed file to assign to the case
        #[arg(long)]
        file: Option<String>,
    },

    /// Drive the actuator level directly
    Manual {
        /// Actuator level
        #[arg(long, default_value_t = 128)]
        value: u8,

        /// Seconds to hold before releasing control (until Ctrl-C if omitted)
        #[arg(long)]
        hold: Option<f64>,
    },

    /// Connect and report connection status changes
    Status {
        /// Seconds to watch (until Ctrl-C if omitted)
        #[arg(long)]
        wait: Option<f64>,
    },

    /// Print the effective settings
    Config {
        /// Write the effective settings to the settings file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Debug, Args, Clone)]
pub struct StreamCommand {
    /// Recording to process and stream
    #[arg(short, long, conflicts_with = "demo", required_unless_present = "demo")]
    pub file: Option<String>,

    /// Stream synthetic tremor data instead of a recording
    #[arg(long)]
    pub demo: bool,

    /// Seconds of synthetic data to generate
    #[arg(long, default_value_t = 30.0)]
    pub demo_length: f64,

    /// Seed for reproducible synthetic data
    #[arg(long, requires = "demo")]
    pub seed: Option<u64>,

    /// JSON object of normalized channels aligned to the recording
    #[arg(long)]
    pub normalized: Option<PathBuf>,

    /// Channel to stream
    #[arg(long)]
    pub channel: Option<String>,

    /// Window start in seconds
    #[arg(long, requires = "end")]
    pub start: Option<f64>,

    /// Window end in seconds (whole recording if omitted)
    #[arg(long, requires = "start")]
    pub end: Option<f64>,

    /// Loop the window until stopped
    #[arg(long = "loop")]
    pub looping: bool,

    /// Record streamed samples
    #[arg(long)]
    pub record: bool,

    /// Record every derived signal, not just the streamed channel
    #[arg(long, requires = "record")]
    pub all_signals: bool,

    /// Run without a device
    #[arg(long)]
    pub offline: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Store the recording through the processing backend
    #[arg(long, requires = "record")]
    pub save: bool,

    /// Write the recording to a local CSV file
    #[arg(long, requires = "record")]
    pub csv: Option<PathBuf>,
}

impl StreamCommand {
    pub fn record_mode(&self, default: RecordMode) -> RecordMode {
        if self.all_signals {
            RecordMode::AllSignals
        } else if self.record {
            default
        } else {
            RecordMode::SingleSignal
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct CaseCommand {
    /// Case identifier: normal, earlyPD, moderatePD or advancedPD
    pub case: String,

    /// Feature column to stream
    #[arg(long, default_value = "centeredTorque")]
    pub feature: String,

    /// Run without a device
    #[arg(long)]
    pub offline: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_args() {
        let args = CliArgs::try_parse_from([
            "tremorlink",
            "stream",
            "--file",
            "p1.csv",
            "--start",
            "1.5",
            "--end",
            "4",
            "--loop",
            "--record",
            "--all-signals",
            "-e",
            "10.0.0.2",
        ])
        .unwrap();

        let Command::Stream(stream) = &args.command else {
            panic!("expected stream command");
        };
        assert_eq!(stream.file.as_deref(), Some("p1.csv"));
        assert_eq!((stream.start, stream.end), (Some(1.5), Some(4.0)));
        assert!(stream.looping);
        assert_eq!(stream.record_mode(RecordMode::SingleSignal), RecordMode::AllSignals);

        let mut config = TremorLinkConfig::default();
        args.apply(&mut config);
        assert_eq!(config.device.endpoints, vec!["10.0.0.2"]);
    }

    #[test]
    fn test_stream_requires_source() {
        assert!(CliArgs::try_parse_from(["tremorlink", "stream"]).is_err());
        assert!(CliArgs::try_parse_from(["tremorlink", "stream", "--demo", "--offline"]).is_ok());
    }

    #[test]
    fn test_window_bounds_come_together() {
        assert!(
            CliArgs::try_parse_from(["tremorlink", "stream", "--demo", "--start", "1"]).is_err()
        );
    }
}
