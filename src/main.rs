use std::{
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
    thread,
};

use clap::{Parser, Subcommand};
use itertools::Itertools;
use log::{error, info, warn};
use tokio::sync::mpsc::unbounded_channel;

use race_replay::{
    ClientId, HttpRaceApi, RaceApi, ReplayConfig, ReplayController, ReplayError, ReplayUpdate,
    StompConnector, TelemetryStore,
    api::session_calendar,
    standings::{TeamLookup, driver_label, ordered_cars},
    timeline::SCRUBBER_MAX_MINUTES,
    writer::{self, SessionLogSummary},
};

/// Cars printed per standings line
const STANDINGS_SHOWN: usize = 5;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the session calendar for a year
    Sessions {
        #[arg(short, long)]
        year: i32,

        #[arg(long)]
        api_url: Option<String>,
    },
    /// Replay a session headlessly
    Replay {
        #[arg(short, long)]
        year: i32,

        #[arg(short, long)]
        session_key: u32,

        #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=SCRUBBER_MAX_MINUTES as i64))]
        from_minute: Option<u32>,

        #[arg(short, long)]
        play: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        api_url: Option<String>,
    },
    /// Summarize a recorded session log
    Inspect {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Show the effective configuration, optionally saving it as the new default
    Config {
        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        save: bool,
    },
}

fn load_config(api_url: Option<String>) -> ReplayConfig {
    let mut config = match ReplayConfig::from_local_file() {
        Ok(Some(config)) => config,
        Ok(None) => ReplayConfig::default(),
        Err(e) => {
            warn!("Ignoring unreadable config file: {}", e);
            ReplayConfig::default()
        }
    };
    if let Some(url) = api_url {
        config.api_base_url = url;
    }
    config
}

async fn sessions(year: i32, api_url: Option<String>) -> Result<(), ReplayError> {
    let config = load_config(api_url);
    let api = HttpRaceApi::new(&config.api_base_url)?;
    let calendar = session_calendar(&api, year).await?;
    if calendar.is_empty() {
        println!("No sessions found for {}", year);
    }
    for session in calendar {
        println!(
            "{:>6}  {}  {} ({})",
            session.session_key,
            session.date_start.format("%Y-%m-%d %H:%M"),
            session.country_name,
            session.circuit_short_name
        );
    }
    Ok(())
}

struct ReplayOptions {
    year: i32,
    session_key: u32,
    from_minute: Option<u32>,
    play: bool,
    output: Option<PathBuf>,
    api_url: Option<String>,
}

async fn replay(options: ReplayOptions) -> Result<(), ReplayError> {
    let config = load_config(options.api_url);
    let api = Arc::new(HttpRaceApi::new(&config.api_base_url)?);
    let connector = StompConnector::from_base_url(&config.api_base_url, &config.websocket_path)?;
    info!("Streaming from {}", connector.url());

    let lookup = match api.drivers(options.year).await {
        Ok(drivers) => TeamLookup::from_drivers(options.year, &drivers),
        Err(e) => {
            warn!("No driver list, using the built-in roster: {}", e);
            TeamLookup::fallback(options.year)
        }
    };

    let (controller, handle, mut updates) =
        ReplayController::new(api, Box::new(connector), config, ClientId::generate());
    let controller_task = tokio::spawn(controller.run());

    // if we need to write an output file the updates are also forwarded to a writer thread
    let log_writer = options.output.map(|output_file| {
        let (log_tx, log_rx) = mpsc::channel::<ReplayUpdate>();
        let log_thread = thread::spawn(move || writer::write_session_log(&output_file, log_rx));
        (log_tx, log_thread)
    });

    let (shutdown_tx, mut shutdown_rx) = unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| ReplayError::SignalHandler { source: e })?;

    handle.select_session(options.year, options.session_key)?;
    if let Some(minute) = options.from_minute {
        handle.preview_seek(minute)?;
        handle.commit_seek()?;
    }
    if options.play {
        handle.play()?;
    }

    let mut cars = TelemetryStore::new();
    let mut outcome = Ok(());
    loop {
        let update = tokio::select! {
            _ = shutdown_rx.recv() => break,
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        match &update {
            ReplayUpdate::SessionLoaded {
                start_time,
                lap_count,
                ..
            } => println!(
                "Session {} starts {} ({} laps)",
                options.session_key, start_time, lap_count
            ),
            ReplayUpdate::SessionFailed { reason, .. } => {
                error!("Session {} failed to load: {}", options.session_key, reason);
                outcome = Err(ReplayError::SessionLoad {
                    session_key: options.session_key,
                    reason: reason.clone(),
                });
            }
            ReplayUpdate::ActiveLap { lap: Some(lap) } => println!("Lap {}", lap.lap_number),
            ReplayUpdate::ActiveLap { lap: None } => println!("Before race start"),
            ReplayUpdate::Connection { state } => println!("Stream {:?}", state),
            ReplayUpdate::TelemetryCleared => cars.reset(),
            ReplayUpdate::TelemetryMerged { cars: batch } => cars.merge_batch(batch.iter().cloned()),
            ReplayUpdate::Clock {
                virtual_time,
                scrubber_minutes,
                playback,
            } => {
                let top = ordered_cars(cars.snapshot(), &lookup)
                    .into_iter()
                    .take(STANDINGS_SHOWN)
                    .map(|car| format!("{} {:.0}km/h", driver_label(car.car_id), car.speed))
                    .join("  ");
                println!(
                    "{} +{}m {:?} | {}",
                    virtual_time.format("%H:%M:%S"),
                    scrubber_minutes,
                    playback,
                    top
                );
            }
        }

        if let Some((log_tx, _)) = &log_writer {
            let _ = log_tx.send(update);
        }
        if outcome.is_err() {
            break;
        }
    }

    let _ = handle.disconnect();
    drop(handle);
    let _ = controller_task.await;

    if let Some((log_tx, log_thread)) = log_writer {
        drop(log_tx);
        match log_thread.join() {
            Ok(written) => written?,
            Err(_) => error!("Session log writer panicked"),
        }
    }
    outcome
}

fn config(api_url: Option<String>, save: bool) -> Result<(), ReplayError> {
    let config = load_config(api_url);
    println!(
        "{}",
        serde_json::to_string_pretty(&config)
            .map_err(|e| ReplayError::ConfigSerializeError { source: e })?
    );
    if save {
        config.save()?;
        println!("Saved");
    }
    Ok(())
}

fn inspect(input: &Path) -> Result<(), ReplayError> {
    let updates = writer::read_session_log(input)?;
    let summary = SessionLogSummary::from_updates(&updates);
    println!("Updates:   {}", summary.updates);
    println!("Sessions:  {:?}", summary.sessions);
    println!("Batches:   {}", summary.batches);
    println!("Cars seen: {}", summary.cars_seen);
    if let (Some(first), Some(last)) = (summary.first_time, summary.last_time) {
        println!("Covered:   {} to {}", first, last);
    }
    if let (Some(first), Some(last)) = (summary.laps_seen.first(), summary.laps_seen.last()) {
        println!("Laps:      {} to {}", first, last);
    }
    Ok(())
}

fn main() {
    colog::init();

    let cli = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Could not start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Sessions { year, api_url } => runtime.block_on(sessions(year, api_url)),
        Commands::Replay {
            year,
            session_key,
            from_minute,
            play,
            output,
            api_url,
        } => runtime.block_on(replay(ReplayOptions {
            year,
            session_key,
            from_minute,
            play,
            output,
            api_url,
        })),
        Commands::Inspect { input } => inspect(&input),
        Commands::Config { api_url, save } => config(api_url, save),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
