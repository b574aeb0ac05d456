//! Subcommand implementations.

use std::sync::Arc;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use mythtv_client::{
    ClientConfig, ClientError, EventListener, InputSelector, SessionManager, NO_SESSION,
};
use mythtv_protocol::BackendEvent;

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
        }
        token.cancel();
    });
}

/// Spawn live TV on `channel` and hold it until Ctrl-C.
pub async fn watch(config: &ClientConfig, channel: &str) -> Result<(), ClientError> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut manager = SessionManager::new(config.manager_config());
    manager.subscribe(Arc::new(|event: &BackendEvent| {
        info!("Backend event: {} {}", event.name, event.args.join(" "));
    }));

    info!(
        "Starting live TV on channel {} via {}:{}",
        channel, config.backend.host, config.backend.port
    );
    let handle = manager.spawn_live_tv(channel).await?;
    if handle == NO_SESSION {
        warn!("No tuner available for channel {}", channel);
        manager.shutdown().await;
        return Ok(());
    }

    let result = manager
        .current_recording_path(handle, &config.storage_group_maps, &cancel)
        .await;
    match result {
        Ok(path) => {
            info!("Session {} recording to {}", handle, path);
            println!("{}", path);
            cancel.cancelled().await;
        }
        Err(ClientError::Cancelled) => {}
        Err(e) => {
            manager.shutdown().await;
            return Err(e);
        }
    }

    manager.stop_live_tv(handle).await?;
    manager.shutdown().await;
    Ok(())
}

/// Print the backend's free inputs.
pub async fn inputs(config: &ClientConfig) -> Result<(), ClientError> {
    let mut selector = InputSelector::new(config.connection_config());
    let inputs = selector.free_inputs().await;
    selector.close().await;

    let inputs = inputs?;
    if inputs.is_empty() {
        println!("No free inputs");
        return Ok(());
    }

    println!(
        "{:<20} {:>6} {:>6} {:>6} {:>8} {:>6}",
        "INPUT", "SOURCE", "INPUT", "CARD", "MPLEX", "ORDER"
    );
    for input in inputs {
        println!(
            "{:<20} {:>6} {:>6} {:>6} {:>8} {:>6}",
            input.input_name,
            input.source_id,
            input.input_id,
            input.card_id,
            input.mplex_id,
            input.live_tv_order
        );
    }
    Ok(())
}

/// Print the effective storage group maps.
pub fn maps(config: &ClientConfig) {
    if config.storage_group_maps.is_empty() {
        println!("No storage group maps configured");
        return;
    }

    println!("{:<16} {:<40} {}", "GROUP", "BACKEND DIR", "LOCAL DIR");
    for map in &config.storage_group_maps {
        println!(
            "{:<16} {:<40} {}",
            map.group_name, map.dir_name, map.dir_name_override
        );
    }
}

/// Log backend events until Ctrl-C.
pub async fn events(config: &ClientConfig) -> Result<(), ClientError> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut listener = EventListener::new(config.connection_config(), config.live_tv.event_mode)
        .with_stop_grace(config.manager_config().stop_grace);
    listener.subscribe(Arc::new(|event: &BackendEvent| {
        info!("{} {}", event.name, event.args.join(" "));
    }));
    listener.start().await?;

    cancel.cancelled().await;
    listener.stop().await;
    Ok(())
}
