//! Extraction of playback properties from D-Bus variant maps.
//!
//! Players disagree about exact value types (nested variants, signed vs
//! unsigned integers), so every key is read defensively and simply skipped
//! when it does not fit.

use std::collections::HashMap;
use std::time::Duration;

use zvariant::{OwnedValue, Value};

use crate::models::{PlaybackStatus, PlayerProperties, TrackMetadata};

pub(crate) fn value_str(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.as_str().to_owned()),
        Value::Value(inner) => value_str(inner),
        _ => None,
    }
}

pub(crate) fn value_i64(value: &Value<'_>) -> Option<i64> {
    match value {
        Value::I64(v) => Some(*v),
        Value::U64(v) => Some(*v as i64),
        Value::I32(v) => Some((*v).into()),
        Value::U32(v) => Some((*v).into()),
        Value::Value(inner) => value_i64(inner),
        _ => None,
    }
}

pub(crate) fn value_str_list(value: &Value<'_>) -> Option<Vec<String>> {
    match value {
        Value::Array(array) => Some(array.iter().filter_map(value_str).collect()),
        Value::Value(inner) => value_str_list(inner),
        _ => None,
    }
}

fn value_dict(value: &Value<'_>) -> Option<HashMap<String, OwnedValue>> {
    match value {
        Value::Dict(_) => value.try_clone().ok()?.try_into().ok(),
        Value::Value(inner) => value_dict(inner),
        _ => None,
    }
}

pub(crate) fn parse_playback_status(status: &str) -> PlaybackStatus {
    match status {
        "Playing" => PlaybackStatus::Playing,
        "Paused" => PlaybackStatus::Paused,
        "Stopped" => PlaybackStatus::Stopped,
        _ => PlaybackStatus::Unknown,
    }
}

/// Parse an `mpris:*`/`xesam:*` metadata map.
pub(crate) fn parse_metadata(map: &HashMap<String, OwnedValue>) -> TrackMetadata {
    let mut meta = TrackMetadata::default();
    if let Some(title) = map.get("xesam:title").and_then(|v| value_str(v)) {
        meta.title = title.trim().to_string();
    }
    if let Some(artists) = map.get("xesam:artist").and_then(|v| value_str_list(v)) {
        meta.artists = artists;
    }
    if let Some(text) = map.get("xesam:asText").and_then(|v| value_str(v)) {
        meta.text = text;
    }
    if let Some(url) = map.get("xesam:url").and_then(|v| value_str(v)) {
        meta.url = url;
    }
    if let Some(length_us) = map.get("mpris:length").and_then(|v| value_i64(v)) {
        meta.duration = Duration::from_micros(length_us.max(0) as u64);
    }
    meta
}

/// Parse the metadata value as embedded in a property map.
pub(crate) fn parse_metadata_value(value: &Value<'_>) -> Option<TrackMetadata> {
    value_dict(value).map(|map| parse_metadata(&map))
}

/// Parse a full `org.mpris.MediaPlayer2.Player` property map, as returned by
/// `Properties.GetAll`.
pub(crate) fn parse_properties(map: &HashMap<String, OwnedValue>) -> PlayerProperties {
    let mut props = PlayerProperties::default();
    if let Some(meta) = map.get("Metadata").and_then(|v| parse_metadata_value(v)) {
        props.metadata = meta;
    }
    if let Some(position_us) = map.get("Position").and_then(|v| value_i64(v)) {
        props.position = position_us / 1000;
    }
    if let Some(status) = map.get("PlaybackStatus").and_then(|v| value_str(v)) {
        props.status = parse_playback_status(&status);
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_map_to_enum() {
        assert_eq!(parse_playback_status("Playing"), PlaybackStatus::Playing);
        assert_eq!(parse_playback_status("Paused"), PlaybackStatus::Paused);
        assert_eq!(parse_playback_status("Stopped"), PlaybackStatus::Stopped);
        assert_eq!(parse_playback_status("Buffering"), PlaybackStatus::Unknown);
        assert_eq!(parse_playback_status(""), PlaybackStatus::Unknown);
    }

    #[test]
    fn title_is_trimmed_and_length_converted() {
        let mut map = HashMap::new();
        map.insert(
            "xesam:title".to_string(),
            OwnedValue::try_from(Value::from("  Song  ")).unwrap(),
        );
        map.insert(
            "mpris:length".to_string(),
            OwnedValue::try_from(Value::from(258_000_000i64)).unwrap(),
        );
        let meta = parse_metadata(&map);
        assert_eq!(meta.title, "Song");
        assert_eq!(meta.duration, Duration::from_secs(258));
    }

    #[test]
    fn artist_list_is_extracted() {
        let mut map = HashMap::new();
        let artists = Value::from(vec!["A", "B"]);
        map.insert(
            "xesam:artist".to_string(),
            OwnedValue::try_from(artists).unwrap(),
        );
        let meta = parse_metadata(&map);
        assert_eq!(meta.artists, vec!["A".to_string(), "B".to_string()]);
    }
}
