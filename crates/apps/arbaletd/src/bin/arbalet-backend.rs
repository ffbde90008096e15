use arbalet_daemon::backend::{self, BackendOptions};
use clap::Parser;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "arbalet-backend")]
struct Args {
    #[arg(long, default_value = "10.42.0.1:8080")]
    listen: String,
    /// Members to install before addressing.
    #[arg(long, default_value_t = 1)]
    members: usize,
    /// COLOR frames streamed per session.
    #[arg(long, default_value_t = 100)]
    frames: usize,
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let options = BackendOptions {
        members: args.members,
        frames: args.frames,
        interval: Duration::from_millis(args.interval_ms),
    };

    let listener = TcpListener::bind(&args.listen).await?;
    log::info!("[backend] listening on <{}>", listener.local_addr()?);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                return Ok(());
            }
            session = backend::serve(&listener, &options) => match session {
                Ok(report) => log::info!(
                    "[backend] session done: {} members, {} colors, last sequence {}",
                    report.installed.len(),
                    report.colors_sent,
                    report.last_sequence
                ),
                Err(err) => log::warn!("[backend] session failed: {}", err),
            },
        }
    }
}
