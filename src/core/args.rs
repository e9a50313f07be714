use clap::Parser;
use log::kv::{ToValue, Value};

#[derive(Parser, Debug, PartialEq)]
#[command(version, about)]
pub struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Only load the named tables. May be repeated.
    #[arg(short, long = "table")]
    pub tables: Vec<String>,

    /// Print the current watermark of every configured table and exit.
    #[arg(long)]
    pub watermarks: bool,

    /// Print the run report as JSON instead of a text summary.
    #[arg(long)]
    pub json: bool,
}

impl ToValue for CliArgs {
    fn to_value(&self) -> Value<'_> {
        Value::from_debug(self)
    }
}
