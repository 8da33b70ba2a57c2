use airquality_geoapi::configuration::get_configuration;
use airquality_geoapi::startup;
use log::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let configuration = get_configuration()?;
    info!(
        "Starting air quality API on port {} ({} backend)",
        configuration.application.port,
        if configuration.supabase.is_some() {
            "supabase"
        } else {
            "postgres"
        }
    );

    startup::run(configuration).await
}
