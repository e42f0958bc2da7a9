// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hidlink::identity::parse_hex_u16;

#[derive(Parser)]
#[command(name = "hidlink")]
#[command(author, version, about = "Drive a HID device through the hidlink plugin")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Plugin directory holding HIDConfig.toml (default: ~/.config/hidlink)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Use a simulated device matching the stored identity instead of hardware
    #[arg(long, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run plugin commands in order, then exit
    ///
    /// Example: hidlink exec "initialize:bigKNOBv2:0xCEEB:0x0007:0xFF60:0x61" "send:ChangeLayer:2"
    Exec {
        /// Colon-delimited plugin commands
        #[arg(required = true, value_name = "COMMAND")]
        inputs: Vec<String>,
    },

    /// Read plugin commands from stdin, one per line, until EOF or `exit`
    Shell,

    /// List HID interfaces
    #[command(visible_alias = "ls")]
    List {
        /// Only show this vendor ID (hex)
        #[arg(long, value_parser = parse_hex)]
        vid: Option<u16>,

        /// Only show this product ID (hex)
        #[arg(long, value_parser = parse_hex)]
        pid: Option<u16>,

        /// Only show this usage page (hex)
        #[arg(long, value_parser = parse_hex)]
        usage_page: Option<u16>,
    },
}

fn parse_hex(s: &str) -> Result<u16, String> {
    parse_hex_u16("value", s).map_err(|e| e.to_string())
}
