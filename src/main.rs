//! Elderband Agent CLI
//!
//! Streaming vital-sign processor and emergency escalation agent.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use elderband_agent::{
    actuator::{ActuationDispatcher, SerialPeripheral},
    backend::BackendClient,
    collector::{self, classify, BrokerEvent, MqttPublisher},
    config::Config,
    core::{identity::PatientIdentity, DeviceIdentityCache, LinearSbpModel, Predictor, SessionStore},
    processor::SessionProcessor,
    reminder::ReminderScheduler,
    reporting::BackendReporter,
    stats::{create_shared_stats_with_persistence, ProcessorStats},
    VERSION,
};
use rumqttc::{Event, Outgoing};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "elderband")]
#[command(version = VERSION)]
#[command(about = "Streaming vital-sign processor and emergency escalation agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume telemetry and escalate emergencies (default)
    Run {
        /// Do not publish medication reminders
        #[arg(long)]
        no_reminders: bool,

        /// Serve /health and /stats on this port (requires server feature)
        #[arg(long)]
        status_port: Option<u16>,
    },

    /// Show cumulative processor statistics
    Status,

    /// Show effective configuration
    Config,

    /// Look up the patient bound to a device
    Lookup {
        /// Device identifier as sent by the band
        device_id: String,
    },

    /// Show when the next medication reminder fires
    NextReminder,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        no_reminders: false,
        status_port: None,
    }) {
        Commands::Run {
            no_reminders,
            status_port,
        } => cmd_run(no_reminders, status_port).await,
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::Lookup { device_id } => cmd_lookup(&device_id).await,
        Commands::NextReminder => cmd_next_reminder(),
    }
}

async fn cmd_run(no_reminders: bool, status_port: Option<u16>) -> anyhow::Result<()> {
    println!("Elderband Agent v{VERSION}");
    println!();

    let config = Config::load().context("loading configuration")?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let predictor = load_predictor(&config);

    let backend = BackendClient::new(config.backend_config())?;

    let peripheral = match SerialPeripheral::open(&config.peripheral.path) {
        Ok(peripheral) => Some(peripheral),
        Err(e) if config.peripheral.required => {
            anyhow::bail!("peripheral {} unavailable: {e}", config.peripheral.path.display());
        }
        Err(e) => {
            tracing::warn!(
                path = %config.peripheral.path.display(),
                error = %e,
                "peripheral unavailable, escalations will not be dispatched"
            );
            None
        }
    };

    println!("  Broker: {}:{}", config.broker.host, config.broker.port);
    println!("  Record store: {}", config.backend.base_url);
    println!(
        "  Peripheral: {}",
        if peripheral.is_some() {
            config.peripheral.path.display().to_string()
        } else {
            "unavailable (degraded)".to_string()
        }
    );
    println!(
        "  Window: {} samples | emergency threshold: {} | call threshold: {}",
        config.session.window_capacity, config.session.emergency_threshold, config.session.call_threshold
    );

    let settings = config.session_settings();
    let mut processor = SessionProcessor::new(
        SessionStore::new(settings),
        predictor,
        DeviceIdentityCache::new(backend.clone(), config.backend.timeout, settings.identity_retry),
        ActuationDispatcher::new(peripheral, config.peripheral.timeout),
        BackendReporter::new(Arc::new(backend), config.backend.timeout, Arc::clone(&stats)),
        Arc::clone(&stats),
    );

    let (client, mut eventloop) = collector::connect(&config.broker);
    collector::subscribe_data(&client, &config.broker.data_topic).await?;

    let reminders = if config.reminders.enabled && !no_reminders {
        let scheduler = ReminderScheduler::new(
            config.reminder_schedule()?,
            config.reminder_topics(),
            config.reminders.medicines.clone(),
            config.reminders.dismiss_after_secs.map(Duration::from_secs),
            MqttPublisher::new(client.clone()),
            Arc::clone(&stats),
        );
        println!("  Medication reminders: enabled ({})", config.reminders.timezone);
        Some(tokio::spawn(scheduler.run()))
    } else {
        println!("  Medication reminders: disabled");
        None
    };

    #[cfg(feature = "server")]
    let server_shutdown = match status_port {
        Some(port) => {
            let (addr, tx) = elderband_agent::server::run(
                elderband_agent::server::ServerConfig::new(port),
                Arc::clone(&stats),
            )
            .await?;
            println!("  Status server: http://{addr}");
            Some(tx)
        }
        None => None,
    };
    #[cfg(not(feature = "server"))]
    if status_port.is_some() {
        eprintln!("Warning: --status-port ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let terminate = terminate_signal();
    tokio::pin!(terminate);

    let exit_reason: &str;

    loop {
        tokio::select! {
            event = eventloop.poll() => {
                match event {
                    Ok(event) => match classify(&event, &config.broker.data_topic) {
                        BrokerEvent::Telemetry(payload) => {
                            processor.handle_payload(&payload).await;
                        }
                        BrokerEvent::Connected => {
                            tracing::info!("mqtt connected");
                            // The broker may have dropped our session.
                            if let Err(e) = collector::subscribe_data(&client, &config.broker.data_topic).await {
                                tracing::error!(error = %e, "re-subscribe failed");
                            }
                        }
                        BrokerEvent::Disconnected => tracing::warn!("mqtt disconnected"),
                        BrokerEvent::Ignored(topic) => tracing::debug!(topic = %topic, "unhandled topic"),
                        BrokerEvent::Other => {}
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "mqtt error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }

            _ = &mut ctrl_c => {
                exit_reason = "SIGINT";
                break;
            }

            _ = &mut terminate => {
                exit_reason = "SIGTERM";
                break;
            }
        }
    }

    tracing::warn!(signal = exit_reason, "shutting down");

    if let Some(handle) = reminders {
        handle.abort();
    }

    processor.shutdown().await;

    if client.disconnect().await.is_ok() {
        let _ = tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
    }

    #[cfg(feature = "server")]
    if let Some(tx) = server_shutdown {
        let _ = tx.send(());
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn load_predictor(config: &Config) -> Box<dyn Predictor> {
    match config.model_path {
        Some(ref path) => match LinearSbpModel::from_file(path) {
            Ok(model) => {
                tracing::info!(path = %path.display(), "loaded SBP model");
                Box::new(model)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not load SBP model, using built-in");
                Box::new(LinearSbpModel::default())
            }
        },
        None => Box::new(LinearSbpModel::default()),
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Elderband Agent Status");
    println!("======================");
    println!();

    println!("Configuration:");
    println!("  Broker: {}:{}", config.broker.host, config.broker.port);
    println!("  Data topic: {}", config.broker.data_topic);
    println!("  Record store: {}", config.backend.base_url);
    println!(
        "  Peripheral: {} ({})",
        config.peripheral.path.display(),
        if config.peripheral.path.exists() {
            "present"
        } else {
            "not found"
        }
    );
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        println!("Cumulative {}", ProcessorStats::with_persistence(stats_path).summary());
    } else {
        println!("No statistics recorded yet.");
    }

    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_lookup(device_id: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let client = BackendClient::new(config.backend_config())?;

    let record = client
        .fetch_patient_record(device_id)
        .await
        .with_context(|| format!("looking up device {device_id}"))?;
    let identity = PatientIdentity::from_record(record, config.session.default_age);

    println!("Device: {device_id}");
    println!("  Age: {}", identity.age);
    println!("  Sex: {:?}", identity.sex);
    println!(
        "  Emergency contact: {}",
        identity.emergency_contact_phone.as_deref().unwrap_or("-")
    );
    println!("  Doctor: {}", identity.doctor_phone.as_deref().unwrap_or("-"));
    println!("  Escalations dial: {}", identity.preferred_phone().unwrap_or("nobody"));
    Ok(())
}

fn cmd_next_reminder() -> anyhow::Result<()> {
    let config = Config::load()?;
    let schedule = config.reminder_schedule()?;

    match schedule.next_occurrence(Utc::now()) {
        Some((slot, at)) => {
            let local = at.with_timezone(&schedule.timezone());
            println!(
                "Next reminder: {} at {} ({})",
                slot.label,
                local.format("%Y-%m-%d %H:%M %Z"),
                at.format("%H:%M UTC")
            );
        }
        None => println!("No reminder slots configured."),
    }
    Ok(())
}
