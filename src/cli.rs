use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "meshforge")]
#[command(author, version, about = "3D model conversion service")]
pub struct Cli {
    /// Path to config file (defaults to $MESHFORGE_SETTINGS)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Start {
        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Convert a single model without starting the server
    Convert {
        /// Local file or http(s) URI of the model
        #[arg(required = true)]
        input: String,

        /// Output format name, e.g. `3ds` or `obj`
        #[arg(short, long)]
        to: String,

        /// Input format name; derived from the extension when omitted
        #[arg(short, long, default_value = "auto")]
        from: String,

        /// Where to write the result (defaults to the input name with the
        /// output extension, in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Store the result in the content store and print its hash instead
        #[arg(long)]
        cache: bool,
    },

    /// List known formats, probing the general converter
    Formats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the external converters are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config or $MESHFORGE_SETTINGS if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
