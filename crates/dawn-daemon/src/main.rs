use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dawn_core::{
    types::parse_time_of_day, AlarmId, AudioSourceRef, DawnConfig, DeviceRef, LocalZone,
    NewAlarm, SystemClock, TimeSource,
};
use dawn_device::DeviceConnectionManager;
use dawn_engine::{
    AlarmEvent, AlarmOrchestrator, AlarmService, OrchestratorSettings, StopReason, TaskDispatcher,
};
use dawn_playback::{PlaybackController, RampSettings};
use dawn_scheduler::{
    next_fire_time, AlarmScheduler, ArmingLedger, DueTask, SqliteAlarmStore, TokioTaskQueue,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

mod headless;

use headless::{FileSourceResolver, HeadlessRadio, LogAudioOutput};

#[derive(Parser)]
#[command(name = "dawn", author, version, about = "Wake-up alarm daemon", long_about = None)]
struct Cli {
    /// Config file (default: $DAWN_CONFIG, then ~/.dawn/dawn.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Restore every enabled alarm and ring them until interrupted.
    Run,
    /// Create an alarm.
    Add {
        /// Time of day, HH:MM (24h)
        #[arg(long)]
        time: String,
        /// Sound file; the configured default plays when it cannot be found
        #[arg(long)]
        sound: Option<String>,
        /// Address of the speaker to pre-connect
        #[arg(long)]
        device: Option<String>,
        #[arg(long, requires = "device")]
        device_name: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
    List,
    Enable { id: i64 },
    Disable { id: i64 },
    Remove { id: i64 },
    /// Paired audio devices.
    Devices,
}

/// Everything `run` and the one-shot commands need, wired once.
struct Engine {
    service: AlarmService,
    orchestrator: AlarmOrchestrator,
    device: Arc<DeviceConnectionManager>,
    dispatcher: TaskDispatcher,
    due_rx: mpsc::Receiver<DueTask>,
    clock: Arc<dyn TimeSource>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dawn=info,dawn_engine=info,dawn_device=info,dawn_playback=info,dawn_scheduler=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = DawnConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        DawnConfig::default()
    });
    let engine = build(&config)?;

    match cli.command {
        Command::Run => run(engine).await?,
        Command::Add {
            time,
            sound,
            device,
            device_name,
            disabled,
        } => {
            let (hour, minute) = parse_time_of_day(&time)?;
            let mut alarm = NewAlarm::new(hour, minute)?.with_enabled(!disabled);
            if let Some(sound) = sound {
                alarm = alarm.with_audio_source(AudioSourceRef::new(sound));
            }
            if let Some(address) = device {
                let name = device_name.unwrap_or_else(|| address.clone());
                alarm = alarm.with_device(DeviceRef::new(address, name));
            }
            let alarm = engine.service.add(alarm)?;
            let zone = engine.clock.zone();
            let next = next_fire_time(alarm.hour, alarm.minute, engine.clock.now(), zone)?;
            println!(
                "Added alarm {} at {} (next: {})",
                alarm.id,
                alarm.formatted_time(),
                zone.to_local(next).format("%a %Y-%m-%d %H:%M")
            );
        }
        Command::List => print_alarms(&engine.service)?,
        Command::Enable { id } => {
            engine.service.set_enabled(AlarmId(id), true).await?;
            println!("Alarm {id} enabled");
        }
        Command::Disable { id } => {
            engine.service.set_enabled(AlarmId(id), false).await?;
            println!("Alarm {id} disabled");
        }
        Command::Remove { id } => {
            engine.service.delete(AlarmId(id)).await?;
            println!("Alarm {id} removed");
        }
        Command::Devices => {
            let devices = engine.device.bonded_devices().await?;
            if devices.is_empty() {
                println!("No paired audio devices");
            }
            for d in devices {
                println!("{}  {}  {}", d.address, d.label(), d.connection_state);
            }
        }
    }
    Ok(())
}

fn build(config: &DawnConfig) -> anyhow::Result<Engine> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)
        .with_context(|| format!("opening alarm database at {db_path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = Arc::new(SqliteAlarmStore::new(db)?);

    let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
    let ledger = Arc::new(ArmingLedger::new());
    let (due_tx, due_rx) = mpsc::channel::<DueTask>(64);
    let scheduler = Arc::new(AlarmScheduler::new(
        Arc::new(TokioTaskQueue::new(due_tx)),
        Arc::clone(&clock),
        Arc::clone(&ledger),
        config.scheduler.preconnect_lead(),
    ));

    let device = DeviceConnectionManager::new(Arc::new(HeadlessRadio::new()), &config.device);
    let playback = PlaybackController::new(
        Arc::new(LogAudioOutput::new()),
        Arc::new(FileSourceResolver::new(&config.playback.default_sound)),
        RampSettings::from_config(&config.playback),
    );
    let orchestrator = AlarmOrchestrator::new(
        playback,
        Arc::clone(&device),
        ledger,
        Arc::clone(&clock),
        OrchestratorSettings::from_config(config),
    );

    let service = AlarmService::new(store, Arc::clone(&scheduler), orchestrator.clone());
    let dispatcher = TaskDispatcher::new(
        orchestrator.clone(),
        scheduler,
        Arc::clone(&device),
        config.alarm.rearm_after_fire,
    );

    Ok(Engine {
        service,
        orchestrator,
        device,
        dispatcher,
        due_rx,
        clock,
    })
}

/// Foreground loop: boot, dispatch, stdin commands, Ctrl-C.
async fn run(engine: Engine) -> anyhow::Result<()> {
    let Engine {
        service,
        orchestrator,
        dispatcher,
        due_rx,
        ..
    } = engine;

    let armed = service.boot()?;
    info!(armed, "Dawn running; type `stop [id]`, `list`, `reload` or press Ctrl-C");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatch_loop = tokio::spawn(dispatcher.run(due_rx, shutdown_rx));
    tokio::spawn(log_events(orchestrator.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(&service, &orchestrator, line.trim()).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "stdin unreadable, commands disabled");
                    stdin_open = false;
                }
            },
        }
    }

    let stopped = orchestrator.stop_all(StopReason::Shutdown).await;
    info!(stopped, "shutting down");
    let _ = shutdown_tx.send(true);
    let _ = dispatch_loop.await;
    Ok(())
}

async fn handle_command(service: &AlarmService, orchestrator: &AlarmOrchestrator, line: &str) {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("stop"), None) => {
            let stopped = orchestrator.stop_all(StopReason::Explicit).await;
            println!("Stopped {stopped} alarm(s)");
        }
        (Some("stop"), Some(id)) => match id.parse::<i64>() {
            Ok(id) if service.stop(AlarmId(id)).await => println!("Alarm {id} stopped"),
            Ok(id) => println!("Alarm {id} is not ringing"),
            Err(_) => println!("Not an alarm id: {id}"),
        },
        (Some("list"), _) => {
            if let Err(e) = print_alarms(service) {
                warn!(error = %e, "listing alarms failed");
            }
        }
        (Some("reload"), _) => match service.boot() {
            Ok(armed) => println!("{armed} alarm(s) armed"),
            Err(e) => warn!(error = %e, code = e.code(), "reload failed"),
        },
        (Some(other), _) => println!("Unknown command `{other}`; try stop [id], list, reload"),
    }
}

fn print_alarms(service: &AlarmService) -> anyhow::Result<()> {
    let alarms = service.list()?;
    if alarms.is_empty() {
        println!("No alarms");
    }
    for a in alarms {
        println!(
            "{:>4}  {}  {:<3}  {}  {}",
            a.id,
            a.formatted_time(),
            if a.enabled { "on" } else { "off" },
            a.audio_source
                .as_ref()
                .map(AudioSourceRef::as_str)
                .unwrap_or("(default sound)"),
            a.device.as_ref().map(DeviceRef::label).unwrap_or("-"),
        );
    }
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<AlarmEvent>) {
    loop {
        match events.recv().await {
            Ok(AlarmEvent::Fired { alarm_id, run_id }) => info!(%alarm_id, %run_id, "⏰ alarm ringing"),
            Ok(AlarmEvent::Playing {
                alarm_id,
                location,
                fell_back,
                ..
            }) => info!(%alarm_id, %location, fell_back, "alarm sound playing"),
            Ok(AlarmEvent::PlaybackFailed { alarm_id, error, .. }) => {
                warn!(%alarm_id, %error, "alarm fired but could not play")
            }
            Ok(AlarmEvent::Stopped {
                alarm_id, reason, ..
            }) => info!(%alarm_id, ?reason, "alarm stopped"),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "event log lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
