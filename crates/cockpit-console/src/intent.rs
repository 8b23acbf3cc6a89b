use crate::command::ConsoleCommand;
use crate::store::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    SetSource,
    StatusReport,
    NextTrack,
    PlayPause,
    Noop,
}

/// A recognised voice/assistant request and the line to speak back.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub kind: IntentKind,
    pub command: Option<ConsoleCommand>,
    pub say: String,
}

impl Intent {
    fn new(kind: IntentKind, command: Option<ConsoleCommand>, say: &str) -> Self {
        Self {
            kind,
            command,
            say: say.to_string(),
        }
    }
}

/// Keyword matcher for audio requests. First rule that matches wins.
pub fn parse_intent(text: &str) -> Intent {
    let t = text.to_lowercase();

    for (source, reply) in [
        (Source::Radio, "Source switched to Radio."),
        (Source::Local, "Source switched to Local."),
        (Source::Spotify, "Source switched to Spotify. Standing by."),
    ] {
        if mentions_switch(&t, source.as_str()) {
            return Intent::new(IntentKind::SetSource, Some(ConsoleCommand::SelectSource(source)), reply);
        }
    }

    if t.contains("status") {
        return Intent::new(IntentKind::StatusReport, None, "Status report.");
    }
    if t.contains("next track") || t.contains("skip") {
        return Intent::new(IntentKind::NextTrack, Some(ConsoleCommand::Next), "Skipping to next track.");
    }
    if t.contains("pause") || t.contains("play") {
        let play = t.contains("play") && !t.contains("pause");
        return if play {
            Intent::new(IntentKind::PlayPause, Some(ConsoleCommand::Play), "Playing.")
        } else {
            Intent::new(IntentKind::PlayPause, Some(ConsoleCommand::Pause), "Paused.")
        };
    }

    Intent::new(IntentKind::Noop, None, "Acknowledged.")
}

/// "switch ... <word>" or "to <word>".
fn mentions_switch(t: &str, word: &str) -> bool {
    if t.contains(&format!("to {word}")) {
        return true;
    }
    t.find("switch")
        .is_some_and(|i| t[i + "switch".len()..].contains(word))
}
