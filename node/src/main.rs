use std::{env, process::ExitCode};

use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

const CONFIG_VAR: &str = "NODE_CONFIG";

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let Some(path) = env::args().nth(1).or_else(|| env::var(CONFIG_VAR).ok()) else {
        error!("usage: node <config.json>, or set {CONFIG_VAR}");
        return ExitCode::FAILURE;
    };

    let config = match node::load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let task = config.task.clone();
    let shutdown = CancellationToken::new();

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received interrupt, stopping");
            interrupt.cancel();
        }
    });

    info!(role = task.role.as_str(), index = task.index; "starting");

    match node::run(config, shutdown).await {
        Ok(()) => {
            info!(role = task.role.as_str(), index = task.index; "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(role = task.role.as_str(), index = task.index; "{e}");
            ExitCode::FAILURE
        }
    }
}
