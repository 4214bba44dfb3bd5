use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tracing::{error, info, warn};

use pi_mount_control::config::Config;
use pi_mount_control::pulse::{LogPulse, PulseSink};
use pi_mount_control::stellarium;
use pi_mount_control::telescope_control::{NoEphemeris, TelescopeControl};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "mount-config.toml".to_string());
    let config: Config =
        confy::load_path(&config_path).wrap_err_with(|| format!("loading {}", config_path))?;

    let pulse: Arc<dyn PulseSink> = Arc::new(LogPulse);
    if !config.control.virtual_mode {
        // GPIO wiring lives outside this crate; a real sink gets injected
        // by the hardware build.
        warn!("no hardware pulse sink in this build; pulses will only be logged");
    }

    let telescope = Arc::new(TelescopeControl::new(
        config.telescope_config(pulse),
        Arc::new(NoEphemeris),
    ));
    telescope.start();

    if config.stellarium.enabled {
        let listener = tokio::net::TcpListener::bind(&config.stellarium.bind)
            .await
            .wrap_err_with(|| format!("binding stellarium bridge to {}", config.stellarium.bind))?;
        info!(addr = %config.stellarium.bind, "stellarium bridge listening");
        let handle = telescope.handle();
        tokio::spawn(async move {
            if let Err(e) = stellarium::serve(listener, handle).await {
                error!(error = %e, "stellarium bridge failed");
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .wrap_err("waiting for shutdown signal")?;
    info!("shutting down");

    let stopper = Arc::clone(&telescope);
    tokio::task::spawn_blocking(move || stopper.stop(Duration::from_secs(10)))
        .await
        .wrap_err("joining telescope control")?;
    Ok(())
}
