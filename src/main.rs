use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sharemirror::app::{App, exit_status_for};
use sharemirror::cli::Cli;
use sharemirror::config::{Locations, Settings};
use sharemirror::shutdown::install_signal_handler;

/// stderr logging; with `-v` also `logs/sharemirror.log` under the settings dir.
fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false);

    match log_dir.filter(|_| verbose) {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "sharemirror.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            tracing_subscriber::registry().with(filter).with(stderr).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let log_dir = Settings::config_dir().map(|d| d.join("logs"));
    let guard = init_tracing(cli.verbose, log_dir.as_deref());

    let result = (|| -> anyhow::Result<sharemirror::ExitStatus> {
        let mut settings = Settings::init()?;
        if let Some(m) = cli.manifest.clone() {
            settings.manifest_path = m;
        }
        if let Some(c) = cli.cache_dir.clone() {
            settings.cache_dir = c;
        }
        let cancel = install_signal_handler()?;
        let app = App::new(settings, Locations::from_env(), cancel);
        app.dispatch(cli.command)
    })();

    let status = match result {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("{:#}", e);
            exit_status_for(&e)
        }
    };
    drop(guard);
    std::process::exit(status.code());
}
