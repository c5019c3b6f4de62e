use crate::lyrics::types::{LyricLine, WordTiming};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static SYNCED_LYRICS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d{1,2}):(\d{2})[.:](\d{1,3})\]").unwrap());

/// Whether `text` carries at least one LRC timestamp.
pub fn is_synced(text: &str) -> bool {
    SYNCED_LYRICS_RE.is_match(text)
}

/// Parse time-synced lyrics into LyricLine structs, ordered by time.
pub fn parse_synced_lyrics(synced: &str) -> Vec<LyricLine> {
    let re = &SYNCED_LYRICS_RE;
    let mut lines = Vec::new();
    for line in synced.lines() {
        let matches: Vec<_> = re.captures_iter(line).collect();
        if matches.is_empty() {
            continue;
        }
        let text = re.replace_all(line, "").trim().to_string();
        if text.is_empty() {
            continue;
        }
        for cap in matches {
            let num = |i: usize| {
                cap.get(i)
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                    .unwrap_or(0)
            };
            let fraction = cap.get(3).map(|m| m.as_str()).unwrap_or("0");
            let fraction = f64::from(num(3)) / 10f64.powi(fraction.len() as i32);
            let time = f64::from(num(1)) * 60.0 + f64::from(num(2)) + fraction;
            lines.push(LyricLine::timed(time, text.clone()));
        }
    }
    lines.sort_by(|a, b| a.time.unwrap_or(0.0).total_cmp(&b.time.unwrap_or(0.0)));
    fill_durations(&mut lines);
    lines
}

/// Plain lyrics: one line per text line, blank lines kept as spacing.
pub fn parse_plain_lyrics(plain: &str) -> Vec<LyricLine> {
    let trimmed = plain.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.lines().map(|l| LyricLine::plain(l.trim_end())).collect()
}

/// Each timed line lasts until the next one starts.
fn fill_durations(lines: &mut [LyricLine]) {
    for i in 1..lines.len() {
        if let (Some(prev), Some(next)) = (lines[i - 1].time, lines[i].time)
            && lines[i - 1].duration.is_none()
        {
            lines[i - 1].duration = Some((next - prev).max(0.0));
        }
    }
}

/// Parse a musixmatch `subtitle_body` JSON array (`[{text, time: {total}}]`).
pub fn parse_subtitle_body(subtitle_body: &str) -> Option<Vec<LyricLine>> {
    let lines_val = serde_json::from_str::<Value>(subtitle_body).ok()?;
    let arr = lines_val.as_array()?;
    let mut parsed: Vec<LyricLine> = arr
        .iter()
        .map(|line| {
            let t = line.pointer("/time/total").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let text = line.get("text").and_then(|v| v.as_str()).unwrap_or("\u{266a}");
            LyricLine::timed(t, text)
        })
        .collect();
    fill_durations(&mut parsed);
    Some(parsed)
}

/// Parse a musixmatch `richsync_body` JSON string into lines with per-word timings.
pub fn parse_richsync_body(richsync_body: &str) -> Option<Vec<LyricLine>> {
    let lines_val = serde_json::from_str::<Value>(richsync_body).ok()?;
    let arr = lines_val.as_array()?;
    let mut parsed = Vec::new();
    for line in arr.iter() {
        let t = line.pointer("/ts").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let te = line.pointer("/te").and_then(|v| v.as_f64()).unwrap_or(t + 3.0);
        let text = line
            .get("x")
            .and_then(|v| v.as_str())
            .or_else(|| line.get("text").and_then(|v| v.as_str()))
            .unwrap_or("\u{266a}");

        // Two possible richsync shapes:
        // - explicit `words` array with {start,end,text}
        // - character-level `l` array with {c, o} items (offsets from ts)
        let words = if let Some(words_arr) = line.get("words").and_then(|v| v.as_array()) {
            let wts: Vec<WordTiming> = words_arr
                .iter()
                .map(|w| {
                    let start = w.get("start").and_then(|v| v.as_f64()).unwrap_or(t);
                    let end = w.get("end").and_then(|v| v.as_f64()).unwrap_or(start);
                    WordTiming {
                        start,
                        end: if end <= start { te } else { end },
                        text: w.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    }
                })
                .collect();
            if wts.is_empty() { None } else { Some(wts) }
        } else if let Some(l_arr) = line.get("l").and_then(|v| v.as_array()) {
            let mut wts = Vec::new();
            for (i, elem) in l_arr.iter().enumerate() {
                let word_text = elem.get("c").and_then(|v| v.as_str()).unwrap_or("");
                if word_text.trim().is_empty() {
                    continue; // Skip spaces
                }
                let start = t + elem.get("o").and_then(|v| v.as_f64()).unwrap_or(0.0);
                // The end time is the start time of the next element, or the line's end time.
                let end = l_arr
                    .get(i + 1)
                    .and_then(|next| next.get("o").and_then(|v| v.as_f64()))
                    .map(|offset| t + offset)
                    .unwrap_or(te);
                wts.push(WordTiming {
                    start,
                    end: if end <= start { te } else { end },
                    text: word_text.to_string(),
                });
            }
            if wts.is_empty() { None } else { Some(wts) }
        } else {
            None
        };

        parsed.push(LyricLine {
            text: text.to_string(),
            time: Some(t),
            duration: Some((te - t).max(0.0)),
            words,
        });
    }
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lrc_with_repeated_timestamps() {
        let lines = parse_synced_lyrics(
            "[00:12.50]Hello\n[ar:Someone]\n[00:05.00][00:20.00]Again\n[00:30.00]",
        );
        let times: Vec<_> = lines.iter().map(|l| l.time.unwrap()).collect();
        assert_eq!(times, vec![5.0, 12.5, 20.0]);
        assert_eq!(lines[1].text, "Hello");
        assert_eq!(lines[0].duration, Some(7.5));
        assert_eq!(lines[2].duration, None);
    }

    #[test]
    fn millisecond_fractions() {
        let lines = parse_synced_lyrics("[01:02.345]x");
        assert!((lines[0].time.unwrap() - 62.345).abs() < 1e-9);
    }

    #[test]
    fn detects_synced_text() {
        assert!(is_synced("[00:01.00]a"));
        assert!(!is_synced("just words\nmore words"));
    }

    #[test]
    fn plain_lines_have_no_time() {
        let lines = parse_plain_lyrics("\nfirst\n\nsecond\n");
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.time.is_none()));
        assert!(parse_plain_lyrics("  \n").is_empty());
    }

    #[test]
    fn richsync_character_offsets_become_words() {
        let body = r#"[{"ts": 1.0, "te": 3.0, "x": "hi you", "l": [{"c": "hi", "o": 0.0}, {"c": " ", "o": 0.5}, {"c": "you", "o": 1.0}]}]"#;
        let lines = parse_richsync_body(body).unwrap();
        let words = lines[0].words.as_ref().unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].start, 1.0);
        assert_eq!(words[0].end, 1.5);
        assert_eq!(words[1].end, 3.0);
        assert_eq!(lines[0].duration, Some(2.0));
    }

    #[test]
    fn subtitle_body_uses_total_time() {
        let body = r#"[{"text": "a", "time": {"total": 1.5}}, {"text": "b", "time": {"total": 4.0}}]"#;
        let lines = parse_subtitle_body(body).unwrap();
        assert_eq!(lines[0].time, Some(1.5));
        assert_eq!(lines[0].duration, Some(2.5));
        assert!(parse_subtitle_body("not json").is_none());
    }
}
