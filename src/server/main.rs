use anyhow::Result;
use log::info;
use std::sync::Arc;
use webperf_dashboard::{
    config::ServerConfig,
    controller::{routes, Controller},
    runs::MySqlProvider,
    settings::SettingsStore,
};

#[tokio::main]
pub async fn main() -> Result<()> {
    pretty_env_logger::init();
    let config = ServerConfig::from_env()?;

    let settings = SettingsStore::new(&config.settings_path);
    info!(
        "Serving dashboard on http://{} (settings in {})",
        config.listen_addr,
        settings.path().display()
    );

    let controller = Controller::new(settings, Arc::new(MySqlProvider::new()));
    let route = routes(Arc::new(controller), config.static_dir.clone());
    warp::serve(route).run(config.listen_addr).await;

    Ok(())
}
