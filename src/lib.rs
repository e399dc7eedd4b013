pub mod commands;
pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod host;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod permission;
pub mod reminder;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod storage;
#[cfg(test)]
mod testing;

use crate::state::AppServices;
use crate::storage::TaskStore;

/// Starts the services and serves the stdio bridge until it closes.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = config::data_dir()?;
    config::ensure_dir(&data_dir)?;
    if let Err(err) = logging::init_logging(&data_dir) {
        eprintln!("daytodo: file logging disabled: {err}");
    }
    let settings = config::load_settings(&data_dir);
    log::info!(
        "app: starting data_dir={} prune_on_start={}",
        data_dir.display(),
        settings.prune_on_start
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let prune = settings.prune_on_start;
        let services = AppServices::start(
            TaskStore::in_data_dir(&data_dir),
            settings,
            Some(data_dir.clone()),
        );
        let mut controller = services.controller(chrono::Local::now().date_naive());
        if let Err(err) = controller.startup(prune).await {
            log::error!("app: startup failed kind={} {err}", err.kind());
            services.shutdown().await;
            return Err(Box::new(err) as Box<dyn std::error::Error>);
        }

        let input = tokio::io::BufReader::new(tokio::io::stdin());
        let result = host::run_bridge(&services, controller, input, tokio::io::stdout()).await;
        services.shutdown().await;
        log::info!("app: stopped");
        result.map_err(Into::into)
    })
}
