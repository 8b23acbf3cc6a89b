use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender};
use tungstenite::WebSocket;
use tungstenite::protocol::Message;

use crate::command::ConsoleCommand;

/// Run the per-client read/write loop.
/// Reads JSON commands from the client, sends outbound messages from the broadcast channel.
pub fn run_client<S: Read + Write>(
    mut ws: WebSocket<S>,
    inbound_tx: Sender<ConsoleCommand>,
    outbound_rx: Receiver<String>,
    initial_state: String,
    shutdown: Arc<AtomicBool>,
    client_id: usize,
) {
    log::info!("HUD client {client_id} connected");

    if !initial_state.is_empty() && ws.send(Message::text(initial_state)).is_err() {
        log::info!("HUD client {client_id} disconnected on initial send");
        return;
    }

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        // Read timeout is 50ms
        match ws.read() {
            Ok(Message::Text(text)) => match parse_client_message(text.as_ref()) {
                Some(cmd) => {
                    let _ = inbound_tx.try_send(cmd);
                }
                None => log::debug!("HUD client {client_id} sent unusable message"),
            },
            Ok(Message::Close(_)) => {
                log::info!("HUD client {client_id} closed connection");
                break;
            }
            Ok(Message::Ping(data)) => {
                let _ = ws.send(Message::Pong(data));
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::debug!("HUD client {client_id} read error: {e}");
                break;
            }
        }

        let mut sent_any = false;
        for msg in outbound_rx.try_iter() {
            if msg.is_empty() {
                continue;
            }
            match ws.send(Message::text(msg)) {
                Ok(_) => sent_any = true,
                Err(e) => {
                    log::debug!("HUD client {client_id} write error: {e}");
                    return;
                }
            }
        }
        if sent_any && ws.flush().is_err() {
            break;
        }
    }

    let _ = ws.close(None);
    log::info!("HUD client {client_id} disconnected");
}

/// Parse a JSON message from a HUD client into a console command.
pub fn parse_client_message(text: &str) -> Option<ConsoleCommand> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let msg_type = v.get("type")?.as_str()?;
    let string = |key: &str| v.get(key).and_then(|s| s.as_str()).map(str::to_string);

    match msg_type {
        "select_source" => {
            let source = v.get("source")?.as_str()?.parse().ok()?;
            Some(ConsoleCommand::SelectSource(source))
        }
        "play" => Some(ConsoleCommand::Play),
        "pause" => Some(ConsoleCommand::Pause),
        "stop" => Some(ConsoleCommand::Stop),
        "next" => Some(ConsoleCommand::Next),
        "prev" => Some(ConsoleCommand::Prev),
        "radio" => Some(ConsoleCommand::Radio(string("station"))),
        "select_local" => Some(ConsoleCommand::SelectTrack(string("id")?)),
        "add_local" => {
            let paths: Vec<PathBuf> = v
                .get("paths")?
                .as_array()?
                .iter()
                .filter_map(|p| p.as_str().map(PathBuf::from))
                .collect();
            (!paths.is_empty()).then_some(ConsoleCommand::AddFiles(paths))
        }
        "devices" => Some(ConsoleCommand::Devices),
        "transfer" => Some(ConsoleCommand::Transfer(string("device_id")?)),
        "volume" => {
            let value = v.get("value")?.as_f64()? as f32;
            Some(ConsoleCommand::Volume(value.clamp(0.0, 1.0)))
        }
        "gesture" => Some(ConsoleCommand::Gesture),
        "intent" => Some(ConsoleCommand::Say(string("text")?)),
        _ => {
            log::debug!("Unknown HUD message type: {msg_type}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Source;

    #[test]
    fn parse_select_source() {
        let json = r#"{"type":"select_source","source":"local"}"#;
        assert_eq!(
            parse_client_message(json),
            Some(ConsoleCommand::SelectSource(Source::Local))
        );
        assert!(parse_client_message(r#"{"type":"select_source","source":"tape"}"#).is_none());
    }

    #[test]
    fn parse_transport_controls() {
        for (t, expected) in [
            ("play", ConsoleCommand::Play),
            ("pause", ConsoleCommand::Pause),
            ("stop", ConsoleCommand::Stop),
            ("next", ConsoleCommand::Next),
            ("gesture", ConsoleCommand::Gesture),
        ] {
            let json = format!(r#"{{"type":"{t}"}}"#);
            assert_eq!(parse_client_message(&json), Some(expected));
        }
    }

    #[test]
    fn parse_radio_with_and_without_station() {
        assert_eq!(
            parse_client_message(r#"{"type":"radio"}"#),
            Some(ConsoleCommand::Radio(None))
        );
        assert_eq!(
            parse_client_message(r#"{"type":"radio","station":"soma-groove"}"#),
            Some(ConsoleCommand::Radio(Some("soma-groove".into())))
        );
    }

    #[test]
    fn parse_select_local_and_transfer() {
        assert_eq!(
            parse_client_message(r#"{"type":"select_local","id":"local-2"}"#),
            Some(ConsoleCommand::SelectTrack("local-2".into()))
        );
        assert_eq!(
            parse_client_message(r#"{"type":"transfer","device_id":"abc"}"#),
            Some(ConsoleCommand::Transfer("abc".into()))
        );
        assert!(parse_client_message(r#"{"type":"transfer"}"#).is_none());
    }

    #[test]
    fn parse_volume_clamped() {
        assert_eq!(
            parse_client_message(r#"{"type":"volume","value":1.5}"#),
            Some(ConsoleCommand::Volume(1.0))
        );
    }

    #[test]
    fn parse_intent_text() {
        assert_eq!(
            parse_client_message(r#"{"type":"intent","text":"switch to radio"}"#),
            Some(ConsoleCommand::Say("switch to radio".into()))
        );
    }

    #[test]
    fn parse_add_local_paths() {
        assert_eq!(
            parse_client_message(r#"{"type":"add_local","paths":["/a.mp3", 3]}"#),
            Some(ConsoleCommand::AddFiles(vec!["/a.mp3".into()]))
        );
        assert!(parse_client_message(r#"{"type":"add_local","paths":[]}"#).is_none());
    }

    #[test]
    fn parse_unknown_or_invalid() {
        assert!(parse_client_message(r#"{"type":"load_effect","index":3}"#).is_none());
        assert!(parse_client_message("not json").is_none());
    }
}
