/*!
tagwatch: RFID zone presence tracking with absence alerts
*/

use std::path::PathBuf;

use clap::{crate_version, Arg, ArgAction, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tagwatch::core::config::{OutputConfig, SinkPlugin, StoreBackend, TrackerConfig};
use tagwatch::core::scan_feed;
use tagwatch::ZoneTracker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("tagwatch")
        .version(crate_version!())
        .about("Track RFID tag presence in a detection zone and alert when a tag stays away too long")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("store")
                .short('s')
                .long("store")
                .value_name("PATH")
                .help("JSON registry file (overrides the configured store)"),
        )
        .arg(
            Arg::new("log")
                .short('l')
                .long("log")
                .value_name("PATH")
                .help("Append events to an extra text log file"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("Default absence timeout for newly seen tags (0 disables alerts)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Do not print events to the terminal"),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => TrackerConfig::from_file(path).await?,
        None => {
            let data_dir = dirs::data_local_dir()
                .map(|dir| dir.join("tagwatch"))
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&data_dir)?;
            TrackerConfig::with_data_dir(&data_dir)
        }
    };

    if let Some(path) = matches.get_one::<String>("store") {
        config.registry.store = StoreBackend::Json {
            path: PathBuf::from(path),
        };
    }
    if let Some(secs) = matches.get_one::<u64>("timeout") {
        config.registry.default_timeout_secs = *secs;
    }
    if let Some(path) = matches.get_one::<String>("log") {
        config.outputs.push(OutputConfig {
            plugin: SinkPlugin::TextLog {
                path: PathBuf::from(path),
            },
            enabled: true,
        });
    }
    if matches.get_flag("quiet") {
        config
            .outputs
            .retain(|output| !matches!(output.plugin, SinkPlugin::Terminal { .. }));
    }

    let (tracker, handle) = ZoneTracker::new(config).await?;
    let feed_pump = handle.attach_feed(scan_feed::console_feed());
    let mut tracker_task = tracker.spawn();

    info!("📡 Reading scans from stdin (one identifier per line, Ctrl-C to exit)");

    tokio::select! {
        result = &mut tracker_task => {
            feed_pump.abort();
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown requested");
            feed_pump.abort();
            handle.shutdown().await.ok();
            if let Ok(run_result) = (&mut tracker_task).await {
                run_result?;
            }
        }
    }

    Ok(())
}
