//! `tiltctl` - CLI for tiltplot
//!
//! This binary ingests device measurements and manages and reads plots
//! against the configured database.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::collections::BTreeSet;
use std::io::Read;

use chrono::Utc;
use clap::Parser;

use tiltplot::cli::{
    Cli, Command, ConfigCommand, DataCommand, LatestCommand, OutputFormat, PlotTarget,
    PlotsCommand,
};
use tiltplot::model::PlotDetails;
use tiltplot::storage::Storage;
use tiltplot::{
    init_logging, Config, Credentials, Measurement, NewPlot, PlotUpdate, SeriesPoint, Service,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Configuration commands must work even when the config is broken
    if let Command::Config(config_cmd) = cli.command {
        return handle_config(cli.config, config_cmd);
    }

    let config = Config::load_from(cli.config.clone())?;

    match &cli.command {
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Ingest(cmd) => {
            let service = Service::open(&config)?;
            let samples = read_samples(cmd.file.as_deref())?;
            let credentials = Credentials::DeviceKey(Some(cmd.device_key.clone()));
            let stored = service.add_measurements(&credentials, &samples).await?;
            println!("Stored {stored} measurements.");
            Ok(())
        }
        Command::Plots(plots_cmd) => {
            let service = Service::open(&config)?;
            handle_plots(&service, &cli.bearer(), plots_cmd).await
        }
        Command::Data(data_cmd) => {
            let service = Service::open(&config)?;
            handle_data(&service, &cli.bearer(), data_cmd).await
        }
        Command::Latest(latest_cmd) => {
            let service = Service::open(&config)?;
            handle_latest(&service, &cli.bearer(), latest_cmd).await
        }
        Command::Key => {
            let service = Service::open(&config)?;
            println!("{}", service.device_key(&cli.bearer()).await?);
            Ok(())
        }
        Command::Config(_) => Ok(()),
    }
}

fn read_samples(
    file: Option<&std::path::Path>,
) -> Result<Vec<Measurement>, Box<dyn std::error::Error>> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    Ok(serde_json::from_str(&text)?)
}

async fn handle_plots(
    service: &Service<Storage>,
    credentials: &Credentials,
    cmd: &PlotsCommand,
) -> CliResult {
    match cmd {
        PlotsCommand::List { json } => {
            let plots = service.list_plots(credentials).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&plots)?);
            } else if plots.is_empty() {
                println!("No plots.");
            } else {
                println!("{:>6}  {:<24}  {:<25}  {:<25}  shared", "id", "name", "start", "end");
                for plot in &plots {
                    println!(
                        "{:>6}  {:<24}  {:<25}  {:<25}  {}",
                        plot.id,
                        plot.name,
                        plot.start_time.to_rfc3339(),
                        plot.end_time
                            .map_or_else(|| "(active)".to_string(), |end| end.to_rfc3339()),
                        if plot.share_link.is_some() { "yes" } else { "no" }
                    );
                }
            }
        }
        PlotsCommand::Show { id, json } => {
            let details = service.get_plot(credentials, *id).await?;
            print_details(&details, *json)?;
        }
        PlotsCommand::Create {
            name,
            start,
            end,
            instruments,
        } => {
            let new_plot = NewPlot {
                name: name.clone(),
                start_time: start.unwrap_or_else(Utc::now),
                end_time: *end,
                instruments: instruments.clone(),
            };
            let plot = service.create_plot(credentials, &new_plot).await?;
            println!("Created plot {} ({}).", plot.id, plot.name);
        }
        PlotsCommand::Update {
            id,
            name,
            start,
            end,
            reopen,
        } => {
            let current = service.get_plot(credentials, *id).await?.plot;
            let update = PlotUpdate {
                name: name.clone().unwrap_or(current.name),
                start_time: start.unwrap_or(current.start_time),
                end_time: if *reopen { None } else { end.or(current.end_time) },
            };
            let plot = service.update_plot(credentials, *id, &update).await?;
            println!("Updated plot {} ({}).", plot.id, plot.name);
        }
        PlotsCommand::AddInstrument { id, instruments } => {
            let added = service.add_instruments(credentials, *id, instruments).await?;
            println!("Added {} instruments to plot {id}.", added.len());
        }
        PlotsCommand::Share { id } => {
            let link = service.share_plot(credentials, *id).await?;
            println!("{}", link.uuid);
        }
        PlotsCommand::Unshare { id } => {
            if service.unshare_plot(credentials, *id).await? {
                println!("Share link for plot {id} revoked.");
            } else {
                println!("Plot {id} was not shared.");
            }
        }
    }
    Ok(())
}

fn print_details(details: &PlotDetails, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(details)?);
        return Ok(());
    }

    let plot = &details.plot;
    println!("Plot {}: {}", plot.id, plot.name);
    println!("  Start:       {}", plot.start_time.to_rfc3339());
    match plot.end_time {
        Some(end) => println!("  End:         {}", end.to_rfc3339()),
        None => println!("  End:         (active)"),
    }
    if let Some(link) = details.share_link {
        println!("  Share link:  {link}");
    }
    println!("  Instruments:");
    for instrument in &details.instruments {
        println!(
            "    {:<16} {:<24} {}",
            instrument.key, instrument.name, instrument.kind
        );
    }
    Ok(())
}

async fn handle_data(
    service: &Service<Storage>,
    credentials: &Credentials,
    cmd: &DataCommand,
) -> CliResult {
    let window = cmd.window(Utc::now())?;
    let resolution = cmd.resolution;
    let series = match &cmd.target {
        PlotTarget {
            share: Some(link), ..
        } => service.shared_data(link, &window, resolution).await?,
        PlotTarget { id: Some(id), .. } => {
            service.plot_data(credentials, *id, &window, resolution).await?
        }
        PlotTarget { .. } => return Err("a plot id or --share link is required".into()),
    };
    print_series(&series, cmd.format)
}

async fn handle_latest(
    service: &Service<Storage>,
    credentials: &Credentials,
    cmd: &LatestCommand,
) -> CliResult {
    let point = match &cmd.target {
        PlotTarget {
            share: Some(link), ..
        } => service.shared_latest(link).await?,
        PlotTarget { id: Some(id), .. } => service.latest_data(credentials, *id).await?,
        PlotTarget { .. } => return Err("a plot id or --share link is required".into()),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&point)?);
    } else {
        println!("{}", point.date.to_rfc3339());
        for (key, value) in &point.values {
            println!("  {key:<16} {value}");
        }
    }
    Ok(())
}

fn print_series(series: &[SeriesPoint], format: OutputFormat) -> CliResult {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(series)?);
        return Ok(());
    }

    let channels: BTreeSet<&str> = series
        .iter()
        .flat_map(|point| point.values.keys().map(String::as_str))
        .collect();
    let cell = |point: &SeriesPoint, key: &str| {
        point
            .values
            .get(key)
            .map_or_else(String::new, ToString::to_string)
    };

    match format {
        OutputFormat::Csv => {
            let header: Vec<&str> = std::iter::once("date").chain(channels.iter().copied()).collect();
            println!("{}", header.join(","));
            for point in series {
                let mut row = vec![point.date.to_rfc3339()];
                row.extend(channels.iter().map(|key| cell(point, key)));
                println!("{}", row.join(","));
            }
        }
        OutputFormat::Table | OutputFormat::Json => {
            print!("{:<25}", "date");
            for key in &channels {
                print!("  {key:>12}");
            }
            println!();
            for point in series {
                print!("{:<25}", point.date.to_rfc3339());
                for key in &channels {
                    print!("  {:>12}", cell(point, key));
                }
                println!();
            }
            if series.is_empty() {
                println!("(no data)");
            }
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> CliResult {
    let storage = Storage::open(config.database_path())?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "database_size_bytes": stats.db_size_bytes,
            "users": stats.users,
            "plots": stats.plots,
            "measurements": stats.measurements,
            "oldest_measurement": stats.oldest_measurement,
            "newest_measurement": stats.newest_measurement,
            "bearer_tokens_enabled": config.auth.is_configured(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("tiltctl status");
        println!("--------------");
        println!("Database:      {}", config.database_path().display());
        println!("Size:          {} bytes", stats.db_size_bytes);
        println!("Users:         {}", stats.users);
        println!("Plots:         {}", stats.plots);
        println!("Measurements:  {}", stats.measurements);
        if let (Some(oldest), Some(newest)) = (stats.oldest_measurement, stats.newest_measurement) {
            println!("Range:         {} .. {}", oldest.to_rfc3339(), newest.to_rfc3339());
        }
        println!(
            "Bearer tokens: {}",
            if config.auth.is_configured() {
                "enabled"
            } else {
                "disabled (set auth.issuer and auth.audience)"
            }
        );
    }
    Ok(())
}

fn handle_config(config_path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> CliResult {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Auth]");
                println!("  Issuer:             {}", config.auth.issuer);
                println!("  Audience:           {}", config.auth.audience);
                println!("  Key URL:            {}", config.auth.key_url);
                println!("  Default key TTL:    {}s", config.auth.default_key_ttl_secs);
                println!("  Key fetch timeout:  {}s", config.auth.key_fetch_timeout_secs);
                println!();
                println!("[Query]");
                println!("  Decimal places:     {}", config.query.decimal_places);
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
