//! Header names and the case-insensitive header map shared by every message kind.

use std::collections::HashMap;
use std::fmt;

wire_enum! {
    /// Header names the engine reads from messages and channel events.
    ///
    /// Use with [`HeaderMap::get`] or the typed accessors on
    /// [`EslEvent`](crate::event::EslEvent). Lookups are case-insensitive.
    pub enum EventHeader: ParseEventHeaderError("event header") {
        EventName => "Event-Name",
        EventSubclass => "Event-Subclass",
        UniqueId => "Unique-ID",
        OtherLegUniqueId => "Other-Leg-Unique-ID",
        ChannelCallUuid => "Channel-Call-UUID",
        ChannelName => "Channel-Name",
        ChannelState => "Channel-State",
        AnswerState => "Answer-State",
        HangupCause => "Hangup-Cause",
        Application => "Application",
        ApplicationData => "Application-Data",
        ApplicationResponse => "Application-Response",
        ApplicationUuid => "Application-UUID",
        JobUuid => "Job-UUID",
        JobCommand => "Job-Command",
        DtmfDigit => "DTMF-Digit",
        DtmfDuration => "DTMF-Duration",
        SocketMode => "Socket-Mode",
        Control => "Control",
        ReplyText => "Reply-Text",
        ContentType => "Content-Type",
        ContentLength => "Content-Length",
    }
}

/// Header map with case-insensitive lookup that keeps the original spelling of each name.
///
/// FreeSWITCH emits version-specific headers, so this stays an open string map;
/// typed access goes through [`EventHeader`]. A repeated name overwrites the earlier value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: HashMap<String, (String, String)>,
}

impl HeaderMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any value stored under the same name in any casing.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()))
            .map(|(_, old)| old)
    }

    /// Value of `name`, ignoring ASCII case.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.entries
            .get(
                &name
                    .as_ref()
                    .to_ascii_lowercase(),
            )
            .map(|(_, value)| value.as_str())
    }

    /// Whether `name` is present.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.get(name)
            .is_some()
    }

    /// Remove `name` and return its value.
    pub fn remove(&mut self, name: impl AsRef<str>) -> Option<String> {
        self.entries
            .remove(
                &name
                    .as_ref()
                    .to_ascii_lowercase(),
            )
            .map(|(_, value)| value)
    }

    /// Iterate `(name, value)` pairs with the names as received. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_display_wire_spelling() {
        assert_eq!(EventHeader::UniqueId.to_string(), "Unique-ID");
        assert_eq!(EventHeader::DtmfDigit.to_string(), "DTMF-Digit");
        assert_eq!(EventHeader::ApplicationUuid.as_str(), "Application-UUID");
    }

    #[test]
    fn header_names_parse_case_insensitively() {
        assert_eq!(
            "other-leg-unique-id".parse::<EventHeader>(),
            Ok(EventHeader::OtherLegUniqueId)
        );
        assert_eq!(
            "Nope".parse::<EventHeader>(),
            Err(ParseEventHeaderError("Nope".into()))
        );
    }

    #[test]
    fn map_lookup_ignores_case() {
        let mut map = HeaderMap::new();
        map.insert("Content-Type", "api/response");
        assert_eq!(map.get("content-type"), Some("api/response"));
        assert_eq!(map.get(EventHeader::ContentType), Some("api/response"));
        assert!(map.contains("CONTENT-TYPE"));
    }

    #[test]
    fn map_insert_replaces_across_casing() {
        let mut map = HeaderMap::new();
        map.insert("Job-UUID", "a");
        assert_eq!(map.insert("job-uuid", "b"), Some("a".to_string()));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("Job-UUID"), Some("b"));
    }

    #[test]
    fn map_keeps_original_names() {
        let map: HeaderMap = [("Unique-ID", "abc"), ("variable_foo", "bar")]
            .into_iter()
            .collect();
        let mut names: Vec<&str> = map
            .iter()
            .map(|(k, _)| k)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Unique-ID", "variable_foo"]);
    }
}
