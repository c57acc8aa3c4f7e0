//! Core data types shared across the daemon.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Unknown,
    Playing,
    Paused,
    Stopped,
}

/// A single time-tagged lyric line. `position` is in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub position: i64,
    pub text: String,
}

/// An ordered lyric document plus the short identifier of its origin
/// (a provider id, or `"mpris"` for player-embedded text).
///
/// Invariant: `lines` are in non-decreasing `position` order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lyrics {
    pub lines: Vec<LyricLine>,
    pub source: String,
}

impl Lyrics {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Greatest index whose line position is at or before `position - offset`,
    /// or -1 when the query lands before the first line. A positive offset
    /// shifts lyric timing later.
    pub fn index_of(&self, position: i64, offset: i64) -> i64 {
        let target = position - offset;
        self.lines.partition_point(|l| l.position <= target) as i64 - 1
    }

    /// Line text at `index`; the empty string when out of range.
    pub fn get(&self, index: i64) -> &str {
        if index < 0 {
            return "";
        }
        self.lines
            .get(index as usize)
            .map(|l| l.text.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artists: Vec<String>,
    /// Player-embedded lyric document (`xesam:asText`), if any.
    pub text: String,
    pub url: String,
    pub duration: Duration,
}

/// An immutable snapshot of the player state as observed on the bus.
/// `position` is in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerProperties {
    pub metadata: TrackMetadata,
    pub position: i64,
    pub status: PlaybackStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lyrics(positions: &[i64]) -> Lyrics {
        Lyrics {
            lines: positions
                .iter()
                .map(|&p| LyricLine {
                    position: p,
                    text: format!("line {p}"),
                })
                .collect(),
            source: "test".to_string(),
        }
    }

    #[test]
    fn index_of_basic() {
        let l = lyrics(&[0, 1000, 2000]);
        assert_eq!(l.index_of(500, 0), 0);
        assert_eq!(l.index_of(2000, 0), 2);
        assert_eq!(l.index_of(-1, 0), -1);
    }

    #[test]
    fn index_of_offset_shifts_query_earlier() {
        let l = lyrics(&[0, 1000, 2000]);
        assert_eq!(l.index_of(1099, 100), 0);
        assert_eq!(l.index_of(1100, 100), 1);
        assert_eq!(l.index_of(50, 100), -1);
    }

    #[test]
    fn get_is_empty_out_of_range() {
        let l = lyrics(&[0, 1000]);
        assert_eq!(l.get(-1), "");
        assert_eq!(l.get(0), "line 0");
        assert_eq!(l.get(1), "line 1000");
        assert_eq!(l.get(2), "");
    }
}
