//! Projections: fold an ordered message sequence into a point-in-time state
//!
//! A projection is pure: an initial state plus one reducer per message type.
//! Messages whose type has no reducer leave the state unchanged. Nothing is
//! persisted; callers rebuild state on demand.

use crate::types::Message;
use std::collections::HashMap;

/// Reducer for one message type
pub type Reducer<S> = fn(S, &Message) -> S;

/// Core trait for projections
pub trait Projection {
    /// State produced by folding messages
    type State;

    /// State before any message is applied
    fn init(&self) -> Self::State;

    /// Apply one message, returning the next state
    fn apply(&self, state: Self::State, message: &Message) -> Self::State;
}

/// Fold messages left to right through a projection
pub fn fold<'a, P, I>(projection: &P, messages: I) -> P::State
where
    P: Projection + ?Sized,
    I: IntoIterator<Item = &'a Message>,
{
    messages
        .into_iter()
        .fold(projection.init(), |state, message| projection.apply(state, message))
}

/// Projection built from a table of reducers keyed by message type
///
/// ```rust
/// use a3s_message_store::Projector;
///
/// #[derive(Default)]
/// struct Url {
///     created: bool,
/// }
///
/// let projection = Projector::new(Url::default).on("UrlCreated", |mut url, _| {
///     url.created = true;
///     url
/// });
/// assert!(projection.handles("UrlCreated"));
/// ```
pub struct Projector<S> {
    init: fn() -> S,
    reducers: HashMap<String, Reducer<S>>,
}

impl<S> Projector<S> {
    /// Create a projection with the given initial-state constructor
    pub fn new(init: fn() -> S) -> Self {
        Self {
            init,
            reducers: HashMap::new(),
        }
    }

    /// Register the reducer for a message type, replacing any earlier one
    pub fn on(mut self, message_type: impl Into<String>, reducer: Reducer<S>) -> Self {
        self.reducers.insert(message_type.into(), reducer);
        self
    }

    /// Whether a reducer is registered for the message type
    pub fn handles(&self, message_type: &str) -> bool {
        self.reducers.contains_key(message_type)
    }
}

impl<S> Projection for Projector<S> {
    type State = S;

    fn init(&self) -> S {
        (self.init)()
    }

    fn apply(&self, state: S, message: &Message) -> S {
        match self.reducers.get(&message.message_type) {
            Some(reducer) => reducer(state, message),
            None => state,
        }
    }
}
