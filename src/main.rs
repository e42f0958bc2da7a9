// hidlink - command-line host for the HID plugin

mod cli;

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use hidlink::config::HidConfig;
use hidlink::log_sink::TracingSink;
use hidlink::plugin::{HidPlugin, HostContext, REQUIRED_HOST_VERSION};
use hidlink_transport::{DeviceBackend, HidBackend, SimHub};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let plugin_dir = cli.config_dir.clone().unwrap_or_else(HidConfig::default_dir);

    match cli.command {
        Commands::List {
            vid,
            pid,
            usage_page,
        } => {
            if cli.simulate {
                warn!("--simulate has no effect on list");
            }
            list(vid, pid, usage_page)
        }
        Commands::Exec { inputs } => {
            let mut plugin = start(&plugin_dir, cli.simulate)?;
            for input in &inputs {
                plugin.invoke(input);
            }
            plugin.exit();
            Ok(())
        }
        Commands::Shell => {
            let mut plugin = start(&plugin_dir, cli.simulate)?;
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = line.context("Failed to read stdin")?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                    break;
                }
                plugin.invoke(line);
            }
            plugin.exit();
            Ok(())
        }
    }
}

/// Load the plugin the way a host would
fn start(plugin_dir: &Path, simulate: bool) -> Result<HidPlugin> {
    info!("Plugin directory: {}", plugin_dir.display());
    let backend = open_backend(plugin_dir, simulate)?;
    let ctx = HostContext {
        version: REQUIRED_HOST_VERSION,
        plugin_path: plugin_dir.to_path_buf(),
        log: Arc::new(TracingSink),
    };
    Ok(HidPlugin::init(ctx, backend))
}

fn open_backend(plugin_dir: &Path, simulate: bool) -> Result<Arc<dyn DeviceBackend>> {
    let config_path = HidConfig::path_in(plugin_dir);
    let config = HidConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    if !simulate {
        let backend = HidBackend::with_config(config.interface.backend_config())
            .context("Failed to initialize hidapi")?;
        return Ok(Arc::new(backend));
    }

    let hub = SimHub::new();
    match config.identity()? {
        Some(identity) => {
            let (usage_page, usage) = identity.usage_filter().unwrap_or((0xFF00, 0x01));
            hub.add_device(SimHub::candidate(
                identity.vendor_id(),
                identity.product_id(),
                usage_page,
                usage,
                config.interface.report_length,
            ));
            info!("Simulating {}", identity);
        }
        None => warn!("No stored identity, simulated bus is empty"),
    }
    Ok(Arc::new(hub.backend()))
}

fn list(vid: Option<u16>, pid: Option<u16>, usage_page: Option<u16>) -> Result<()> {
    let backend = HidBackend::new().context("Failed to initialize hidapi")?;
    let devices: Vec<_> = backend
        .list_all()?
        .into_iter()
        .filter(|d| vid.map_or(true, |v| v == d.vendor_id))
        .filter(|d| pid.map_or(true, |p| p == d.product_id))
        .filter(|d| usage_page.map_or(true, |p| p == d.usage_page))
        .collect();

    if devices.is_empty() {
        println!("No HID interfaces found");
        return Ok(());
    }

    println!("Found {} HID interface(s):", devices.len());
    for d in &devices {
        println!(
            "  VID={:04X} PID={:04X} page={:04X} usage={:04X} {:<24} {}",
            d.vendor_id,
            d.product_id,
            d.usage_page,
            d.usage,
            d.product_name.as_deref().unwrap_or("-"),
            d.path
        );
    }
    Ok(())
}
