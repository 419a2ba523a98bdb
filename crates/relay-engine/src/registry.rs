use std::collections::HashMap;

use mio::Token;

use crate::session::{Session, SessionId, Side};

/// Token of the listening socket.
pub const LISTENER: Token = Token(0);

/// Token of the stop waker.
pub const WAKER: Token = Token(1);

/// Token for one endpoint of a session.
///
/// Session ids start at 1, so endpoint tokens never collide with
/// [`LISTENER`] or [`WAKER`].
pub fn endpoint_token(id: SessionId, side: Side) -> Token {
    Token(id as usize * 2 + side.index())
}

/// Map an endpoint token back to its session and side.
pub fn decode_token(token: Token) -> Option<(SessionId, Side)> {
    if token == LISTENER || token == WAKER {
        return None;
    }
    let side = Side::from_index(token.0 % 2)?;
    Some(((token.0 / 2) as SessionId, side))
}

/// Every live session of one engine, keyed by session id.
///
/// A session is inserted and removed as a whole, so both of its endpoints
/// are always either present or absent together.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    next_id: SessionId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Reserve the id for the next session.
    pub fn allocate_id(&mut self) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id(), session);
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Read-and-reset every session's activity counter and return the ids
    /// that saw no activity since the previous sweep.
    pub fn sweep_idle(&mut self) -> Vec<SessionId> {
        self.sessions
            .values_mut()
            .filter_map(|session| (session.activity_mut().take() == 0).then(|| session.id()))
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
