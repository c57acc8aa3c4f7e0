//! Small shared helpers: metadata comparison, track formatting, LRC parsing
//! and title normalization.

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::matcher::Matcher;
use crate::models::{LyricLine, TrackMetadata};

/// Two metadata values describe the same track iff titles match exactly and
/// artist sequences are equal element-wise.
pub fn metadata_equal(a: &TrackMetadata, b: &TrackMetadata) -> bool {
    a.title == b.title && a.artists == b.artists
}

/// Human-readable track string: `title - artist1 artist2` with artists
/// sorted, or `<nil>` when the title is empty.
pub fn format_track(meta: &TrackMetadata) -> String {
    if meta.title.is_empty() {
        return "<nil>".to_string();
    }
    let mut artists = meta.artists.clone();
    artists.sort();
    let mut out = String::with_capacity(meta.title.len() + 2);
    out.push_str(&meta.title);
    out.push_str(" -");
    for artist in &artists {
        out.push(' ');
        out.push_str(artist);
    }
    out
}

/// Cache filename for a track: the track string with `/` made safe.
pub fn format_filename(meta: &TrackMetadata) -> String {
    format!("{}.cache", format_track(meta).replace('/', "_"))
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("lrc not synced")]
pub struct NotSynced;

/// Parse a time-tagged lyric document into ordered lines.
///
/// Each input line may carry several `[mm:ss.xx]`-style tags; a line with k
/// valid tags emits k entries sharing the trimmed text. An invalid tag stops
/// tag scanning for that line and the remainder becomes the text. Returns
/// [`NotSynced`] when nothing was emitted.
pub fn parse_lrc(lrc: &str) -> Result<Vec<LyricLine>, NotSynced> {
    let mut lines = Vec::new();
    for raw in lrc.split('\n') {
        if raw.is_empty() {
            continue;
        }
        let mut rest = raw;
        let mut positions = Vec::new();
        while rest.starts_with('[') {
            let Some(j) = rest.find(']') else {
                break;
            };
            let Some(position) = parse_lrc_position(&rest.as_bytes()[1..j]) else {
                break;
            };
            positions.push(position);
            rest = &rest[j + 1..];
        }
        let text = rest.trim();
        for position in positions {
            lines.push(LyricLine {
                position,
                text: text.to_string(),
            });
        }
    }
    if lines.is_empty() {
        return Err(NotSynced);
    }
    lines.sort_by_key(|l| l.position);
    Ok(lines)
}

/// Parse the inside of one time tag to milliseconds.
///
/// Integers are separated by `:` or `.`; each separator folds the running
/// value base-60, except the trailing fractional group after `.` which is
/// scaled by 100/10/1 for 1/2/3 digits. `mm:ss` (a single `:`, two trailing
/// digits) reads as whole seconds.
fn parse_lrc_position(s: &[u8]) -> Option<i64> {
    let s_len = s.len();
    if !(5..=12).contains(&s_len) {
        return None;
    }

    let mut n: i64 = 0;
    let mut sec: i64 = 0;
    let mut sep_idx = 0usize;
    let mut sep_cnt = 0;
    for (i, &ch) in s.iter().enumerate() {
        if ch == b':' || ch == b'.' {
            sec = sec * 60 + n;
            n = 0;
            sep_idx = i;
            sep_cnt += 1;
            continue;
        }
        let digit = ch.wrapping_sub(b'0');
        if digit > 9 {
            return None;
        }
        n = n * 10 + i64::from(digit);
    }

    if s_len - sep_idx == 3 && sep_cnt == 1 && s[sep_idx] == b':' {
        return Some((sec * 60 + n) * 1000);
    }

    let mut position = sec * 1000;
    match s_len - sep_idx {
        2 => position += n * 100,
        3 => position += n * 10,
        4 => position += n,
        _ => {}
    }
    Some(position)
}

static TITLE_SEPARATORS: Lazy<Matcher> = Lazy::new(|| {
    Matcher::new(&[
        "(", "（", "[", "［", "【", "〖", "＜", "〈", "《", "-", "―", "—", " feat.", " ft.",
        " ver.",
    ])
});

/// Trimmed title prefix up to the first parenthetical or version separator.
pub fn strip_title(title: &str) -> &str {
    let bytes = title.as_bytes();
    match TITLE_SEPARATORS.index(bytes) {
        i if i >= 0 => std::str::from_utf8(&bytes[..i as usize])
            .unwrap_or(title)
            .trim(),
        _ => title.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn meta(title: &str, artists: &[&str]) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            text: String::new(),
            url: String::new(),
            duration: Duration::from_secs(258),
        }
    }

    #[test]
    fn metadata_equality_ignores_url_and_duration() {
        let mut a = meta("Song", &["X"]);
        let mut b = meta("Song", &["X"]);
        b.url = "file:///tmp/x.flac".to_string();
        b.duration = Duration::from_secs(1);
        assert!(metadata_equal(&a, &b));
        a.artists.push("Y".to_string());
        assert!(!metadata_equal(&a, &b));
    }

    #[test]
    fn format_track_sorts_artists() {
        assert_eq!(format_track(&meta("Song", &["b", "a"])), "Song - a b");
        assert_eq!(format_track(&meta("", &["a"])), "<nil>");
    }

    #[test]
    fn format_filename_replaces_slashes() {
        assert_eq!(
            format_filename(&meta("a/b", &["c"])),
            "a_b - c.cache".to_string()
        );
    }

    #[test]
    fn parse_two_lines() {
        let lines = parse_lrc("[00:10.50]a\n[00:11]b\n").unwrap();
        assert_eq!(
            lines,
            vec![
                LyricLine {
                    position: 10500,
                    text: "a".to_string()
                },
                LyricLine {
                    position: 11000,
                    text: "b".to_string()
                },
            ]
        );
    }

    #[test]
    fn parse_multi_tag_line() {
        let lines = parse_lrc("[00:01.00][00:02.00]x\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].position, 1000);
        assert_eq!(lines[1].position, 2000);
        assert!(lines.iter().all(|l| l.text == "x"));
    }

    #[test]
    fn parse_fractional_scales() {
        let lines = parse_lrc("[01:02.5]a\n[01:02.50]b\n[01:02.500]c\n").unwrap();
        assert!(lines.iter().all(|l| l.position == 62500));
    }

    #[test]
    fn parse_output_is_sorted() {
        let lines = parse_lrc("[00:20]later\n[00:10]sooner\n").unwrap();
        assert_eq!(lines[0].text, "sooner");
        assert_eq!(lines[1].text, "later");
    }

    #[test]
    fn parse_invalid_first_tag_discards_line() {
        assert_eq!(parse_lrc("[ab:cd]junk\n"), Err(NotSynced));
        assert_eq!(parse_lrc("plain text only\n"), Err(NotSynced));
        assert_eq!(parse_lrc(""), Err(NotSynced));
    }

    #[test]
    fn parse_invalid_later_tag_keeps_earlier_tags() {
        let lines = parse_lrc("[00:01.00][bad]x\n").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].position, 1000);
        assert_eq!(lines[0].text, "[bad]x");
    }

    #[test]
    fn strip_title_cases() {
        assert_eq!(strip_title("春日影 (MyGo!!!!! ver.)"), "春日影");
        assert_eq!(strip_title("Plain Song"), "Plain Song");
        assert_eq!(strip_title("Title feat. Someone"), "Title");
        assert_eq!(strip_title("曲名【cover】"), "曲名");
    }

    #[test]
    fn strip_title_is_idempotent() {
        for t in ["春日影 (MyGo!!!!! ver.)", "a - b - c", "  spaced  ", "plain"] {
            let once = strip_title(t);
            assert_eq!(strip_title(once), once);
        }
    }
}
