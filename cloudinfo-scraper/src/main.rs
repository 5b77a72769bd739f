use anyhow::Context;
use cloudinfo_scraper::bootstrap;
use cloudinfo_scraper::management;
use cloudinfo_scraper::settings::Settings;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    info!(providers = ?settings.providers, "starting cloudinfo-scraper");

    let mut app = bootstrap::build(&settings).await?;

    app.services.configure_services(&settings.providers).await;
    app.services
        .load_service_information(&settings.providers)
        .await
        .context("failed to load static service information")?;

    if settings.scrape_enabled {
        app.driver.start();
    } else {
        info!("scraping disabled, serving the store as-is");
    }

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let stop_signal = async move {
        let _ = stop_rx.wait_for(|stop| *stop).await;
    };

    let management_enabled = settings.management_enabled;
    let addr = settings.management_addr;
    let router = management::router(app.management_state());
    let mut server = tokio::spawn(async move {
        if management_enabled {
            management::serve(addr, router, stop_signal).await
        } else {
            stop_signal.await;
            Ok(())
        }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown requested");
        }
        joined = &mut server => {
            error!("management server stopped unexpectedly");
            app.driver.shutdown().await;
            app.stop_janitor();
            return joined.context("management server task failed")?;
        }
    }

    stop_tx.send_replace(true);
    app.driver.shutdown().await;
    app.stop_janitor();
    server.await.context("management server task failed")??;

    info!("cloudinfo-scraper stopped");
    Ok(())
}
