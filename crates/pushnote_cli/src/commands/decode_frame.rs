//! Decode-frame command implementation.

use pushnote_protocol::{ChangeEvent, ServerFrame};
use serde_json::{json, Value};
use std::io::Read;

/// Runs the decode-frame command.
pub fn run(frame: Option<String>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let text = match frame {
        Some(text) => text,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    let report = decode(text.trim())?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }
    Ok(())
}

/// Decodes a frame into a JSON report of its kind and change events.
fn decode(text: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let frame = ServerFrame::decode(text)?;
    let kind = frame.kind();
    let detail = match &frame {
        ServerFrame::Ready(ready) => json!({
            "sessionId": ready.session_id,
            "timestamp": ready.timestamp,
        }),
        ServerFrame::Error(payload) => payload.clone(),
        ServerFrame::ServiceChange(_) | ServerFrame::Replay(_) => Value::Null,
    };
    let events: Vec<Value> = frame.into_events().iter().map(describe).collect();
    Ok(json!({
        "frame": kind,
        "detail": detail,
        "events": events,
    }))
}

fn describe(event: &ChangeEvent) -> Value {
    match event {
        ChangeEvent::Add(snippets) => json!({ "kind": event.kind(), "services": snippets }),
        ChangeEvent::Create(service) | ChangeEvent::Update(service) | ChangeEvent::Upsert(service) => {
            json!({ "kind": event.kind(), "service": service })
        }
        ChangeEvent::Delete(id) => json!({ "kind": event.kind(), "id": id }),
        ChangeEvent::ChangeMultiple(events) => json!({
            "kind": event.kind(),
            "events": events.iter().map(describe).collect::<Vec<_>>(),
        }),
    }
}

fn print_text(report: &Value) {
    println!("Frame: {}", report["frame"].as_str().unwrap_or("?"));
    if !report["detail"].is_null() {
        println!("Detail: {}", report["detail"]);
    }
    let events = report["events"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    if events.is_empty() {
        println!("No change events");
        return;
    }
    println!("Change events:");
    for event in events {
        let kind = event["kind"].as_str().unwrap_or("?");
        let id = match event.get("id").or_else(|| event["service"].get("id")) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => String::new(),
        };
        let name = event["service"]["name"].as_str().unwrap_or("");
        println!("  {:<8} {:>8}  {}", kind, id, name);
    }
}
