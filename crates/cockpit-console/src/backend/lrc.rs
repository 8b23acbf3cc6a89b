use std::path::Path;

/// Lookahead applied when picking the current line, in seconds.
const LOOKAHEAD_SECS: f64 = 0.05;

/// One timed lyric line.
#[derive(Debug, Clone, PartialEq)]
pub struct LrcLine {
    pub time_secs: f64,
    pub text: String,
}

/// Parse `[mm:ss]` / `[mm:ss.ff]` tagged lyrics.
///
/// A line may carry several timestamps; each produces its own entry. Metadata
/// tags (`[ar:...]`, `[ti:...]`) and untimed lines are skipped. The result is
/// sorted by time.
pub fn parse_lrc(text: &str) -> Vec<LrcLine> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        let mut rest = raw.trim();
        let mut stamps = Vec::new();
        while let Some(after) = rest.strip_prefix('[') {
            let Some(close) = after.find(']') else {
                break;
            };
            match parse_timestamp(&after[..close]) {
                Some(t) => stamps.push(t),
                None => break,
            }
            rest = &after[close + 1..];
        }
        if stamps.is_empty() {
            continue;
        }
        let text = rest.trim();
        for time_secs in stamps {
            lines.push(LrcLine {
                time_secs,
                text: text.to_string(),
            });
        }
    }
    lines.sort_by(|a, b| a.time_secs.total_cmp(&b.time_secs));
    lines
}

fn parse_timestamp(tag: &str) -> Option<f64> {
    let (min, sec) = tag.split_once(':')?;
    if min.is_empty() || !min.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (whole, frac) = match sec.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (sec, None),
    };
    if whole.len() != 2 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut secs = min.parse::<f64>().ok()? * 60.0 + whole.parse::<f64>().ok()?;
    if let Some(frac) = frac {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        secs += format!("0.{frac}").parse::<f64>().ok()?;
    }
    Some(secs)
}

/// The line being sung at `time_secs`, if any.
pub fn current_line(lines: &[LrcLine], time_secs: f64) -> Option<&LrcLine> {
    let cutoff = time_secs + LOOKAHEAD_SECS;
    let idx = lines.partition_point(|l| l.time_secs <= cutoff);
    idx.checked_sub(1).map(|i| &lines[i])
}

/// Read the `.lrc` next to an audio file. Missing or unreadable sidecars
/// yield no lyrics.
pub fn load_sidecar(audio_path: &Path) -> Vec<LrcLine> {
    let lrc_path = audio_path.with_extension("lrc");
    match std::fs::read_to_string(&lrc_path) {
        Ok(text) => {
            let lines = parse_lrc(&text);
            log::debug!("Loaded {} lyric line(s) from {}", lines.len(), lrc_path.display());
            lines
        }
        Err(_) => Vec::new(),
    }
}
