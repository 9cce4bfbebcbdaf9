use uaecb_rates::api::{self, ApiState};
use uaecb_rates::config::Config;
use uaecb_rates::notify::Notifier;
use uaecb_rates::scrapers::current::CurrentRatesScraper;
use uaecb_rates::scrapers::history::HistoryScraper;
use uaecb_rates::services::backfill::CurrentRatesImporter;
use uaecb_rates::services::history_import::HistoricalRatesImporter;
use uaecb_rates::store::RateStore;

use clap::{App, Arg, SubCommand};
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let app = App::new("uaecb-rates")
        .version(env!("CARGO_PKG_VERSION"))
        .about("UAE Central Bank exchange rates crawler and read-only API")
        .arg(
            Arg::with_name("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Path to the YAML configuration file")
                .takes_value(true)
                .default_value("config.yaml"),
        )
        .subcommand(
            SubCommand::with_name("load-current")
                .about("Import current exchange rates from the bank's site"),
        )
        .subcommand(
            SubCommand::with_name("load-history")
                .about("Import historical exchange rate files"),
        )
        .subcommand(SubCommand::with_name("serve").about("Serve the rates API"));

    let matches = app.get_matches();

    let config_path = matches.value_of("config").unwrap_or("config.yaml");
    let config = Config::load(config_path);

    let store = RateStore::open(
        &config.database_path,
        Duration::from_secs(config.database_busy_timeout),
    )?;

    if matches.subcommand_matches("load-current").is_some() {
        let notifier = Notifier::from_config(&config);
        let scraper = CurrentRatesScraper::new(&config)?;
        let importer = CurrentRatesImporter::new(&store, &scraper, &config, &notifier);
        importer.run().await?;
    } else if matches.subcommand_matches("load-history").is_some() {
        let notifier = Notifier::from_config(&config);
        let scraper = HistoryScraper::new(&config)?;
        let importer = HistoricalRatesImporter::new(&store, &scraper, &config, &notifier);
        importer.run().await?;
    } else if matches.subcommand_matches("serve").is_some() {
        let state = Arc::new(ApiState { store, config });
        api::serve(state).await?;
    } else {
        info!("No command specified. Use --help for usage information.");
    }

    Ok(())
}
