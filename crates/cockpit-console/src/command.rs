use std::path::PathBuf;
use std::str::FromStr;

use crate::error::CommandError;
use crate::store::Source;

/// Everything an operator, the HUD or an intent can ask the console to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    SelectSource(Source),
    Play,
    Pause,
    Stop,
    Next,
    Prev,
    /// Select radio and start a station (current one when `None`).
    Radio(Option<String>),
    AddFiles(Vec<PathBuf>),
    SelectTrack(String),
    Devices,
    Transfer(String),
    Volume(f32),
    Gesture,
    /// Free text routed through the intent parser.
    Say(String),
    Status,
    Quit,
}

pub const HELP: &str = "commands: source <radio|local|spotify>, play, pause, stop, next, prev, \
radio [id], add <path...>, track <id>, devices, transfer <id>, volume <0..1>, say <text>, status, quit";

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        if word.is_empty() {
            return Err(CommandError::Empty);
        }

        let cmd = match word.to_ascii_lowercase().as_str() {
            "source" | "src" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument {
                        command: "source",
                        expected: "radio, local or spotify",
                    });
                }
                ConsoleCommand::SelectSource(rest.parse()?)
            }
            "play" => ConsoleCommand::Play,
            "pause" => ConsoleCommand::Pause,
            "stop" => ConsoleCommand::Stop,
            "next" | "skip" => ConsoleCommand::Next,
            "prev" | "previous" => ConsoleCommand::Prev,
            "radio" => ConsoleCommand::Radio((!rest.is_empty()).then(|| rest.to_string())),
            "add" => {
                let paths: Vec<PathBuf> = split_args(rest).into_iter().map(PathBuf::from).collect();
                if paths.is_empty() {
                    return Err(CommandError::MissingArgument {
                        command: "add",
                        expected: "one or more file paths",
                    });
                }
                ConsoleCommand::AddFiles(paths)
            }
            "track" => ConsoleCommand::SelectTrack(required(rest, "track", "a track id")?),
            "devices" => ConsoleCommand::Devices,
            "transfer" => ConsoleCommand::Transfer(required(rest, "transfer", "a device id")?),
            "volume" | "vol" => {
                let raw = required(rest, "volume", "a level between 0 and 1")?;
                let value: f32 = raw.parse().map_err(|_| CommandError::InvalidValue {
                    what: "volume",
                    value: raw.clone(),
                })?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(CommandError::InvalidValue { what: "volume", value: raw });
                }
                ConsoleCommand::Volume(value)
            }
            "gesture" => ConsoleCommand::Gesture,
            "say" => ConsoleCommand::Say(required(rest, "say", "some text")?),
            "status" => ConsoleCommand::Status,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}

fn required(rest: &str, command: &'static str, expected: &'static str) -> Result<String, CommandError> {
    if rest.is_empty() {
        Err(CommandError::MissingArgument { command, expected })
    } else {
        Ok(rest.to_string())
    }
}

/// Whitespace split honoring double quotes, for paths with spaces.
fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    for c in s.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<ConsoleCommand, CommandError> {
        s.parse()
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("play").unwrap(), ConsoleCommand::Play);
        assert_eq!(parse("  PAUSE ").unwrap(), ConsoleCommand::Pause);
        assert_eq!(parse("skip").unwrap(), ConsoleCommand::Next);
        assert_eq!(parse("quit").unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn source_argument() {
        assert_eq!(
            parse("source spotify").unwrap(),
            ConsoleCommand::SelectSource(Source::Spotify)
        );
        assert!(matches!(parse("source"), Err(CommandError::MissingArgument { .. })));
        assert!(matches!(parse("source tape"), Err(CommandError::InvalidValue { .. })));
    }

    #[test]
    fn radio_station_is_optional() {
        assert_eq!(parse("radio").unwrap(), ConsoleCommand::Radio(None));
        assert_eq!(
            parse("radio soma-defcon").unwrap(),
            ConsoleCommand::Radio(Some("soma-defcon".into()))
        );
    }

    #[test]
    fn add_handles_quoted_paths() {
        assert_eq!(
            parse(r#"add /a/one.mp3 "/b/two words.flac""#).unwrap(),
            ConsoleCommand::AddFiles(vec!["/a/one.mp3".into(), "/b/two words.flac".into()])
        );
        assert!(parse("add").is_err());
    }

    #[test]
    fn volume_range() {
        assert_eq!(parse("volume 0.4").unwrap(), ConsoleCommand::Volume(0.4));
        assert!(matches!(parse("volume 3"), Err(CommandError::InvalidValue { .. })));
        assert!(matches!(parse("volume loud"), Err(CommandError::InvalidValue { .. })));
    }

    #[test]
    fn say_keeps_text() {
        assert_eq!(
            parse("say switch to radio please").unwrap(),
            ConsoleCommand::Say("switch to radio please".into())
        );
    }

    #[test]
    fn empty_and_unknown() {
        assert_eq!(parse("   ").unwrap_err(), CommandError::Empty);
        assert_eq!(parse("dance").unwrap_err(), CommandError::Unknown("dance".into()));
    }
}
