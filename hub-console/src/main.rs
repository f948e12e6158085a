//! hublink console
//!
//! Talks to a FixHub hub or soldering iron over USB serial, or to a simulated
//! one with `--simulate hub|iron`.

mod console;
mod settings;

use std::sync::Arc;

use anyhow::{bail, Result};
use hub_link::{SerialPortTransport, Transport};
use hub_protocol::registry::{hub, iron};
use hub_protocol::DeviceIdentity;
use hub_session::{spawn_hotplug_watcher, HotplugCommand, Session};
use hub_sim::SimTransport;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use console::Console;
use settings::Settings;

const USAGE: &str = "usage: hublink [--simulate hub|iron]";

/// Command-line options
#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Run against a simulated device instead of real hardware
    simulate: Option<DeviceIdentity>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Option<Self>> {
        let mut parsed = Args::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--simulate" => {
                    parsed.simulate = match args.next().as_deref() {
                        Some("hub") => Some(hub::ID),
                        Some("iron") => Some(iron::ID),
                        Some(other) => bail!("unknown device '{}'\n{}", other, USAGE),
                        None => bail!("--simulate needs a device\n{}", USAGE),
                    }
                }
                "-h" | "--help" => return Ok(None),
                other => bail!("unexpected argument '{}'\n{}", other, USAGE),
            }
        }

        Ok(Some(parsed))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries device output, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hublink=info,hub_protocol=info,hub_link=info,hub_session=info,hub_sim=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(args) = Args::parse(std::env::args().skip(1))? else {
        println!("{}\n\n{}", USAGE, console::HELP);
        return Ok(());
    };

    let settings = Settings::load();
    if Settings::settings_path().is_some_and(|p| !p.exists()) {
        if let Err(e) = settings.save() {
            tracing::warn!("{}", e);
        }
    }

    let transport: Arc<dyn Transport> = match args.simulate {
        Some(identity) => {
            tracing::info!("Starting hublink with a simulated {}", identity.device_type());
            Arc::new(SimTransport::with_device(identity))
        }
        None => {
            tracing::info!("Starting hublink");
            Arc::new(SerialPortTransport::new())
        }
    };

    let (session, events) = Session::spawn(Arc::clone(&transport), settings.to_session_config());
    let printer = tokio::spawn(console::print_events(events));

    let watcher = settings.hotplug.then(|| {
        spawn_hotplug_watcher(session.clone(), transport, settings.hotplug_interval())
    });

    let result = Console::new(session.clone(), settings.line_ending.clone())
        .run()
        .await;

    if let Some((stop_tx, handle)) = watcher {
        let _ = stop_tx.send(HotplugCommand::Shutdown).await;
        let _ = handle.await;
    }
    let _ = session.shutdown().await;
    drop(session);
    let _ = printer.await;

    result
}
