use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "genset-runtime",
    version,
    about = "Generator threshold alarms and runtime prediction service"
)]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    /// Keep all state in memory even when a database URL is configured.
    #[arg(long, default_value_t = false)]
    pub memory_store: bool,
}
