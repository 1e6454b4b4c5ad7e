//! Watch command implementation.
//!
//! Runs a full sync session against a live server: reconciliation, paging
//! and push updates, printing every view event until interrupted.

use crate::client::ReqwestClient;
use pushnote_protocol::{Representable, ServiceLike};
use pushnote_sync::{
    ConnectionState, HttpServicesApi, MemoryStore, PushConnection, RepresentableChanges,
    StaticTokenProvider, SyncConfig, SyncOrchestrator, ViewEvent, WsConnector,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Runs the watch command.
pub async fn run(
    api_url: &str,
    push_url: &str,
    token: &str,
    pages: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig::new(api_url, push_url);
    let api = Arc::new(HttpServicesApi::new(
        config.api_base_url.clone(),
        ReqwestClient::new(Some(token.to_string()))?,
    ));
    let store = Arc::new(MemoryStore::new());
    let (connection, events) = PushConnection::spawn(
        config.push_url.clone(),
        config.reconnect.clone(),
        Arc::new(WsConnector::new()),
        Arc::new(StaticTokenProvider::new(token)),
    );

    let mut orchestrator = SyncOrchestrator::new(&config, api, store);
    orchestrator.attach_push(connection, events);
    orchestrator.start()?;
    info!(api_url, push_url, "watching services");

    let mut loaded_pages = 0;
    loop {
        tokio::select! {
            event = orchestrator.next_event() => {
                let Some(event) = event else { break };
                if event == ViewEvent::FetchingChanged(false) {
                    loaded_pages += 1;
                    if loaded_pages < pages {
                        orchestrator.fetch_next_page();
                    }
                }
                match format {
                    "json" => println!("{}", event_json(&event, orchestrator.list())),
                    _ => print_text(&event, orchestrator.list()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

fn connection_label(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected(reason) => format!("disconnected ({:?})", reason),
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Connected(metadata) => format!("connected to {}", metadata.url),
        ConnectionState::Authorized { session_id } => format!("authorized (session {})", session_id),
    }
}

fn item_json(item: &Representable) -> Value {
    json!({
        "id": item.id(),
        "name": item.name(),
        "local": item.is_full(),
    })
}

fn event_json(event: &ViewEvent, list: &[Representable]) -> Value {
    match event {
        ViewEvent::ListChanged(changes) => {
            let diff = match changes {
                RepresentableChanges::Full => json!("full"),
                RepresentableChanges::Partial(partial) => json!({
                    "deletions": partial.deletions,
                    "insertions": partial.insertions,
                    "modifications": partial.modifications,
                    "moves": partial.moves,
                }),
            };
            json!({
                "event": "list_changed",
                "diff": diff,
                "list": list.iter().map(item_json).collect::<Vec<_>>(),
            })
        }
        ViewEvent::FetchingChanged(fetching) => json!({ "event": "fetching", "value": fetching }),
        ViewEvent::Error(error) => json!({ "event": "error", "message": error.to_string() }),
        ViewEvent::CloseDetail(id) => json!({ "event": "close_detail", "id": id }),
        ViewEvent::ConnectionChanged(state) => {
            json!({ "event": "connection", "state": connection_label(state) })
        }
    }
}

fn print_text(event: &ViewEvent, list: &[Representable]) {
    match event {
        ViewEvent::ListChanged(changes) => {
            match changes {
                RepresentableChanges::Full => println!("list reloaded ({} services)", list.len()),
                RepresentableChanges::Partial(partial) => println!(
                    "list changed ({} services): -{:?} +{:?} ~{:?} moves {:?}",
                    list.len(),
                    partial.deletions,
                    partial.insertions,
                    partial.modifications,
                    partial.moves
                ),
            }
            for item in list {
                let marker = if item.is_full() { "*" } else { " " };
                println!("  {} {:>8}  {}", marker, item.id().to_string(), item.name());
            }
        }
        ViewEvent::FetchingChanged(true) => println!("fetching page..."),
        ViewEvent::FetchingChanged(false) => println!("page loaded"),
        ViewEvent::Error(error) => println!("error: {}", error),
        ViewEvent::CloseDetail(id) => println!("service {} was deleted", id),
        ViewEvent::ConnectionChanged(state) => println!("push: {}", connection_label(state)),
    }
}
