//! Stream name conventions
//!
//! A stream name without the separator addresses a whole category; a name of
//! the form `category-id` addresses one entity's stream. The shape is inferred
//! purely from the presence of the separator.

/// Separator between category and entity id
pub const SEPARATOR: char = '-';

/// Reserved name addressing every message in the store, by global position
pub const ALL_STREAM: &str = "$all";

/// Category prefix of subscriber checkpoint streams
pub const CHECKPOINT_CATEGORY: &str = "subscriberPosition";

/// How a read against a stream name is routed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget<'a> {
    /// Every message in the store, ordered by global position
    All,
    /// One entity's stream, ordered by stream position
    Entity(&'a str),
    /// Every entity stream in a category, ordered by global position
    Category(&'a str),
}

impl<'a> ReadTarget<'a> {
    /// Classify a stream name
    pub fn of(stream_name: &'a str) -> Self {
        if stream_name == ALL_STREAM {
            Self::All
        } else if is_entity_stream(stream_name) {
            Self::Entity(stream_name)
        } else {
            Self::Category(stream_name)
        }
    }

    /// The position a message is addressed by for this kind of read
    pub fn cursor_of(&self, message: &crate::types::Message) -> i64 {
        match self {
            Self::Entity(_) => message.position,
            Self::All | Self::Category(_) => message.global_position,
        }
    }

    /// Cursor value meaning "nothing read yet"
    ///
    /// Stream positions start at 0, global positions at 1; reads always
    /// resume from `cursor + 1`.
    pub fn initial_cursor(&self) -> i64 {
        match self {
            Self::Entity(_) => -1,
            Self::All | Self::Category(_) => 0,
        }
    }
}

/// Whether a stream name addresses a single entity
pub fn is_entity_stream(stream_name: &str) -> bool {
    stream_name.contains(SEPARATOR)
}

/// Category portion of a stream name (everything before the first separator)
pub fn category(stream_name: &str) -> &str {
    stream_name
        .split_once(SEPARATOR)
        .map_or(stream_name, |(category, _)| category)
}

/// Id portion of an entity stream name, if any
pub fn entity_id(stream_name: &str) -> Option<&str> {
    stream_name.split_once(SEPARATOR).map(|(_, id)| id)
}

/// Build an entity stream name from a category and id
pub fn entity_stream(category: &str, id: impl std::fmt::Display) -> String {
    format!("{}{}{}", category, SEPARATOR, id)
}

/// Name of the checkpoint stream owned by a subscriber
pub fn checkpoint_stream(subscriber_id: &str) -> String {
    entity_stream(CHECKPOINT_CATEGORY, subscriber_id)
}
