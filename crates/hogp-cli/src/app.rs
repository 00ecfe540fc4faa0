//! Command execution

use std::sync::Arc;

use hogp_ble::PlatformTransport;
use hogp_core::{Bridge, GattLayout, JsonLinesSource, ReportDescriptor, Shutdown};
use tokio::io::BufReader;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::Result;

/// Serve the bridge until stdin closes or ctrl-c is pressed
pub async fn run_bridge(config: AppConfig, dry_run: bool) -> Result<()> {
    let transport = if dry_run {
        PlatformTransport::dry_run()
    } else {
        PlatformTransport::new(config.bluez.clone()).await?
    };
    info!(
        "Starting '{}' on {} transport",
        config.bridge.local_name,
        transport.name()
    );

    let bridge = Bridge::new(config.bridge, Arc::new(transport))?;
    let source = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    let shutdown = Shutdown::new();

    let interrupt = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
            }
            shutdown.trigger();
        })
    };

    let result = bridge.run(source, shutdown).await;
    interrupt.abort();

    let stats = result?;
    info!(
        "Delivered {} reports ({} dropped, {} halted, {} failed)",
        stats.delivered, stats.dropped, stats.halted, stats.failed
    );
    Ok(())
}

/// Human-readable report map and GATT layout
pub fn describe(config: &AppConfig) -> Result<String> {
    let descriptor = ReportDescriptor::combined();
    let layout =
        GattLayout::new(&descriptor, &config.bridge).map_err(hogp_core::HogpError::from)?;

    let mut out = String::new();
    out.push_str(&format!(
        "Report map ({} bytes): {}\n",
        descriptor.len(),
        hex::encode(descriptor.as_bytes())
    ));
    for id in descriptor.report_ids() {
        if let Some(len) = descriptor.report_length(id) {
            out.push_str(&format!("  input report {}: {} bytes\n", id, len));
        }
    }

    for service in layout.services() {
        out.push_str(&format!("Service {}\n", service.uuid()));
        for characteristic in &service.characteristics {
            out.push_str(&format!(
                "  {} {} {:?}",
                characteristic.uuid(),
                characteristic.id,
                characteristic.flags
            ));
            if let Some(value) = &characteristic.value {
                out.push_str(&format!(" = {}", hex::encode(value)));
            }
            out.push('\n');
            for descriptor in &characteristic.descriptors {
                let value = descriptor
                    .value
                    .as_deref()
                    .map_or_else(|| "(stack managed)".to_string(), hex::encode);
                out.push_str(&format!(
                    "    {} {:?} = {}\n",
                    descriptor.kind.uuid(),
                    descriptor.kind,
                    value
                ));
            }
        }
    }
    Ok(out)
}
