use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "czi-repair")]
#[command(about = "Repairs the dimension info of JPEG-XR tiles in CZI files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Amount of output
    #[arg(short, long, value_enum, default_value_t = Verbosity::Normal, global = true)]
    pub verbosity: Verbosity,

    /// Reject directory entries that violate the format's size rules
    #[arg(long, global = true)]
    pub strict: bool,

    /// Do not draw a progress bar
    #[arg(long, global = true)]
    pub no_progress: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Report the sub-blocks that need a repair without modifying the file
    DryRun {
        /// Path to the CZI file
        #[arg(value_name = "CZI_FILE")]
        path: PathBuf,
    },

    /// Report the sub-blocks that need a repair, then patch the file in place
    Patch {
        /// Path to the CZI file
        #[arg(value_name = "CZI_FILE")]
        path: PathBuf,
    },

    /// Display information about a CZI file
    Info {
        /// Path to the CZI file
        #[arg(value_name = "CZI_FILE")]
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Returns the default log filter for this level.
    pub fn log_filter(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn",
            Self::Verbose => "debug",
        }
    }
}
