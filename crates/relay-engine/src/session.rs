use std::fmt;
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::Interest;
use serde::Serialize;

use crate::activity::Activity;
use crate::link::Link;

/// Stable identifier of a session within one engine.
pub type SessionId = u64;

/// Which socket of a session an endpoint refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The accepted inbound connection.
    Client,
    /// The outbound connection to the rule's target.
    Target,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Target => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Side::Client),
            1 => Some(Side::Target),
            _ => None,
        }
    }

    pub fn peer(self) -> Self {
        match self {
            Side::Client => Side::Target,
            Side::Target => Side::Client,
        }
    }
}

/// Direction of byte flow through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client -> target
    Upstream,
    /// Target -> client
    Downstream,
}

impl Direction {
    /// The direction whose source is `side`.
    pub fn reading_from(side: Side) -> Self {
        match side {
            Side::Client => Direction::Upstream,
            Side::Target => Direction::Downstream,
        }
    }

    /// The direction whose destination is `side`.
    pub fn writing_to(side: Side) -> Self {
        Self::reading_from(side.peer())
    }

    pub fn source(self) -> Side {
        match self {
            Direction::Upstream => Side::Client,
            Direction::Downstream => Side::Target,
        }
    }

    pub fn destination(self) -> Side {
        self.source().peer()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Outbound connect issued, completion not yet observed.
    Connecting,
    /// Both sockets connected; bytes flow.
    Established,
}

/// Why a session was torn down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    /// A peer sent end-of-stream and every buffered byte was delivered.
    PeerClosed,
    /// No bytes moved in either direction for a whole idle interval.
    Idle,
    /// A read or write failed.
    Io(String),
    /// The outbound connection could not be established.
    ConnectFailed(String),
    /// The engine is stopping.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::Idle => write!(f, "idle timeout"),
            CloseReason::Io(err) => write!(f, "i/o error: {err}"),
            CloseReason::ConnectFailed(err) => write!(f, "connect failed: {err}"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Bytes forwarded in each direction over the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Traffic {
    pub upstream: u64,
    pub downstream: u64,
}

/// A client <-> target forwarding relationship.
///
/// Owns both sockets, both directional links and the single activity state
/// they share, so the two directions are created and destroyed together.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    state: SessionState,
    client: TcpStream,
    target: TcpStream,
    upstream: Link,
    downstream: Link,
    activity: Activity,
    registered: [Option<Interest>; 2],
}

impl Session {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        client: TcpStream,
        target: TcpStream,
        buffer_size: usize,
    ) -> Self {
        Self {
            id,
            peer,
            state: SessionState::Connecting,
            client,
            target,
            upstream: Link::new(buffer_size),
            downstream: Link::new(buffer_size),
            activity: Activity::new(),
            registered: [None, None],
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn establish(&mut self) {
        self.state = SessionState::Established;
    }

    pub fn activity_mut(&mut self) -> &mut Activity {
        &mut self.activity
    }

    pub fn link(&self, direction: Direction) -> &Link {
        match direction {
            Direction::Upstream => &self.upstream,
            Direction::Downstream => &self.downstream,
        }
    }

    pub fn stream(&self, side: Side) -> &TcpStream {
        match side {
            Side::Client => &self.client,
            Side::Target => &self.target,
        }
    }

    pub fn stream_mut(&mut self, side: Side) -> &mut TcpStream {
        match side {
            Side::Client => &mut self.client,
            Side::Target => &mut self.target,
        }
    }

    /// Split borrow used by the read and write handlers: source, destination,
    /// the direction's link, and the shared activity.
    pub fn parts(
        &mut self,
        direction: Direction,
    ) -> (&TcpStream, &TcpStream, &mut Link, &mut Activity) {
        let Session {
            client,
            target,
            upstream,
            downstream,
            activity,
            ..
        } = self;
        match direction {
            Direction::Upstream => (&*client, &*target, upstream, activity),
            Direction::Downstream => (&*target, &*client, downstream, activity),
        }
    }

    /// The session is done once it is closing and nothing is left to
    /// deliver in either direction.
    pub fn is_finished(&self) -> bool {
        self.activity.is_closing() && self.upstream.is_drained() && self.downstream.is_drained()
    }

    /// Interest the endpoint on `side` should be registered with, or `None`
    /// when it should not be polled at all.
    pub fn desired_interest(&self, side: Side) -> Option<Interest> {
        let established = self.state == SessionState::Established;
        let readable = established && self.link(Direction::reading_from(side)).wants_read();
        let writable = match self.state {
            SessionState::Connecting => side == Side::Target,
            SessionState::Established => self.link(Direction::writing_to(side)).is_suspended(),
        };
        match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    pub fn registered(&self, side: Side) -> Option<Interest> {
        self.registered[side.index()]
    }

    pub fn set_registered(&mut self, side: Side, interest: Option<Interest>) {
        self.registered[side.index()] = interest;
    }

    pub fn traffic(&self) -> Traffic {
        Traffic {
            upstream: self.upstream.forwarded(),
            downstream: self.downstream.forwarded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions_map_sides() {
        assert_eq!(Direction::reading_from(Side::Client), Direction::Upstream);
        assert_eq!(Direction::writing_to(Side::Client), Direction::Downstream);
        assert_eq!(Direction::Upstream.destination(), Side::Target);
        assert_eq!(Direction::Downstream.source(), Side::Target);
    }

    #[test]
    fn side_index_round_trips() {
        for side in [Side::Client, Side::Target] {
            assert_eq!(Side::from_index(side.index()), Some(side));
        }
        assert_eq!(Side::from_index(2), None);
    }

    /// A connected pair of non-blocking sockets, accepted side first.
    fn stream_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let outbound = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, peer) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        outbound.set_nonblocking(true).unwrap();
        (
            TcpStream::from_std(accepted),
            TcpStream::from_std(outbound),
            peer,
        )
    }

    #[test]
    fn connecting_session_waits_only_for_connect() {
        let (client, target, peer) = stream_pair();
        let session = Session::new(1, peer, client, target, 16);
        assert_eq!(session.desired_interest(Side::Client), None);
        assert_eq!(session.desired_interest(Side::Target), Some(Interest::WRITABLE));
    }

    #[test]
    fn stalled_destination_swaps_interest() {
        let (client, target, peer) = stream_pair();
        let mut session = Session::new(1, peer, client, target, 16);
        session.establish();
        assert_eq!(session.desired_interest(Side::Client), Some(Interest::READABLE));
        assert_eq!(session.desired_interest(Side::Target), Some(Interest::READABLE));

        session.upstream.suspend();
        assert_eq!(session.desired_interest(Side::Client), None);
        assert_eq!(
            session.desired_interest(Side::Target),
            Some(Interest::READABLE | Interest::WRITABLE)
        );

        session.upstream.resume();
        assert_eq!(session.desired_interest(Side::Client), Some(Interest::READABLE));
        assert_eq!(session.desired_interest(Side::Target), Some(Interest::READABLE));
    }

    #[test]
    fn finished_needs_closing_and_empty_links() {
        let (client, target, peer) = stream_pair();
        let mut session = Session::new(1, peer, client, target, 16);
        session.establish();
        assert!(!session.is_finished());

        session.downstream.fill_from(&b"tail"[..]).unwrap();
        session.activity_mut().mark_closing();
        assert!(!session.is_finished());

        session.downstream.flush_into(Vec::new()).unwrap();
        assert!(session.is_finished());
    }

    #[test]
    fn close_reason_serializes_with_kind() {
        let json = serde_json::to_string(&CloseReason::Io("reset".into())).unwrap();
        assert_eq!(json, r#"{"kind":"io","detail":"reset"}"#);

        let json = serde_json::to_string(&CloseReason::Idle).unwrap();
        assert_eq!(json, r#"{"kind":"idle"}"#);
    }
}
