use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::link::{Fill, Flush};
use crate::observer::{NullObserver, SessionEvent, SessionObserver};
use crate::registry::{decode_token, endpoint_token, SessionRegistry, LISTENER, WAKER};
use crate::session::{CloseReason, Direction, Session, SessionId, SessionState, Side};
use crate::stats::{EngineStats, StatsSnapshot};

/// Readiness events handled per wait.
const EVENTS_CAPACITY: usize = 1024;

/// Requests a running [`Engine`] to stop.
///
/// Cheap to clone and safe to use from any thread. Stopping is idempotent.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.waker.wake() {
            debug!(%err, "stop wake-up failed; engine already gone");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Outcome of moving bytes on one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The session keeps running.
    Open,
    /// The session is closing and nothing is left to deliver.
    Finished,
}

/// Forwarding engine for one rule.
///
/// Owns the readiness poll, the listening socket, and every session accepted
/// on it. [`run`](Self::run) drives all of them from the calling thread; the
/// engine does not care how that thread is scheduled.
pub struct Engine {
    config: EngineConfig,
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    stop: StopHandle,
    sessions: SessionRegistry,
    stats: Arc<EngineStats>,
    observer: Arc<dyn SessionObserver>,
}

impl Engine {
    /// Bind the listener and prepare the poll. Nothing is accepted until
    /// [`run`](Self::run) is called.
    ///
    /// On failure every resource acquired so far is released before the
    /// error is returned.
    pub fn bind(config: EngineConfig) -> Result<Self, EngineError> {
        let config = config.normalized();
        let poll = Poll::new().map_err(EngineError::Poll)?;

        let mut listener = TcpListener::bind(config.listen).map_err(|source| EngineError::Bind {
            addr: config.listen,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| EngineError::Bind {
            addr: config.listen,
            source,
        })?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(EngineError::Register)?;

        let waker = Waker::new(poll.registry(), WAKER).map_err(EngineError::Waker)?;

        Ok(Self {
            config,
            poll,
            listener,
            local_addr,
            stop: StopHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
            sessions: SessionRegistry::new(),
            stats: Arc::new(EngineStats::default()),
            observer: Arc::new(NullObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Run the event loop until stopped.
    ///
    /// Every remaining session is closed before this returns, whether the
    /// loop ended because of a stop request or a failed readiness wait.
    pub fn run(mut self) -> Result<StatsSnapshot, EngineError> {
        info!(
            engine = %self.config.label,
            listen = %self.local_addr,
            target = %self.config.target,
            buffer_size = self.config.buffer_size,
            idle_timeout = ?self.config.idle_timeout,
            "engine started"
        );

        let result = self.event_loop();
        self.close_all();
        let snapshot = self.stats.snapshot();

        match &result {
            Ok(()) => info!(engine = %self.config.label, ?snapshot, "engine stopped"),
            Err(err) => error!(engine = %self.config.label, %err, ?snapshot, "engine failed"),
        }
        result.map(|()| snapshot)
    }

    fn event_loop(&mut self) -> Result<(), EngineError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let idle_timeout = self.config.idle_timeout;
        let mut next_sweep = Instant::now() + idle_timeout;

        while !self.stop.is_stopped() {
            let timeout = next_sweep.saturating_duration_since(Instant::now());
            if let Err(err) = self.poll.poll(&mut events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(EngineError::Wait(err));
            }

            for event in events.iter() {
                self.dispatch(event);
            }

            // A busy neighbour must not postpone reaping forever, so the
            // deadline counts as well as an empty wait.
            let now = Instant::now();
            if events.is_empty() || now >= next_sweep {
                self.sweep_idle();
                next_sweep = now + idle_timeout;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &Event) {
        match event.token() {
            LISTENER => self.accept_ready(),
            WAKER => trace!(engine = %self.config.label, "stop requested"),
            token => match decode_token(token) {
                Some((id, side)) => {
                    if event.is_writable() || event.is_write_closed() || event.is_error() {
                        self.on_writable(id, side);
                    }
                    if event.is_readable() || event.is_read_closed() {
                        self.on_readable(id, side);
                    }
                }
                None => warn!(engine = %self.config.label, ?token, "event for unknown token"),
            },
        }
    }

    // ---------------------------------------------------------------------
    // Connection establishment
    // ---------------------------------------------------------------------

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((client, peer)) => self.open_session(client, peer),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    warn!(engine = %self.config.label, %err, "accept failed");
                    return;
                }
            }
        }
    }

    /// Issue the outbound connect for a freshly accepted client. Completion
    /// is observed later as write readiness on the target socket.
    fn open_session(&mut self, client: TcpStream, peer: SocketAddr) {
        let target = match TcpStream::connect(self.config.target) {
            Ok(target) => target,
            Err(err) => {
                self.stats.connect_failed();
                warn!(
                    engine = %self.config.label,
                    %peer,
                    target = %self.config.target,
                    %err,
                    "outbound connect failed"
                );
                self.observer.on_event(&SessionEvent::ConnectFailed {
                    peer,
                    error: err.to_string(),
                });
                return;
            }
        };

        let id = self.sessions.allocate_id();
        self.sessions.insert(Session::new(
            id,
            peer,
            client,
            target,
            self.config.buffer_size,
        ));
        self.stats.session_accepted();
        debug!(engine = %self.config.label, session = id, %peer, "session opened");
        self.observer.on_event(&SessionEvent::Opened { session: id, peer });

        self.sync_interest(id);
    }

    fn finish_connect(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        match connect_status(session.stream(Side::Target)) {
            Ok(false) => {
                trace!(engine = %self.config.label, session = id, "connect still in progress")
            }
            Ok(true) => {
                session.establish();
                let peer = session.peer();
                self.stats.session_established();
                debug!(engine = %self.config.label, session = id, %peer, "session established");
                self.observer.on_event(&SessionEvent::Established { session: id, peer });

                // Either side may already hold bytes.
                self.pump(id, Direction::Upstream);
                self.pump(id, Direction::Downstream);
            }
            Err(err) => {
                self.stats.connect_failed();
                warn!(
                    engine = %self.config.label,
                    session = id,
                    target = %self.config.target,
                    %err,
                    "outbound connect failed"
                );
                self.close_session(id, CloseReason::ConnectFailed(err.to_string()));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Read / write handling
    // ---------------------------------------------------------------------

    fn on_readable(&mut self, id: SessionId, side: Side) {
        let Some(session) = self.sessions.get_mut(id) else {
            trace!(engine = %self.config.label, session = id, "readable event for closed session");
            return;
        };
        let direction = Direction::reading_from(side);
        if session.state() != SessionState::Established || !session.link(direction).wants_read() {
            trace!(engine = %self.config.label, session = id, ?side, "stale readable event");
            return;
        }
        self.pump(id, direction);
    }

    fn on_writable(&mut self, id: SessionId, side: Side) {
        let Some(session) = self.sessions.get_mut(id) else {
            trace!(engine = %self.config.label, session = id, "writable event for closed session");
            return;
        };
        match session.state() {
            SessionState::Connecting if side == Side::Target => self.finish_connect(id),
            SessionState::Connecting => {}
            SessionState::Established => {
                let direction = Direction::writing_to(side);
                if session.link(direction).is_suspended() {
                    self.flush_backlog(id, direction);
                }
            }
        }
    }

    /// Read from the direction's source and forward to its destination
    /// until the source runs dry, reaches end-of-stream, or the destination
    /// pushes back.
    fn pump(&mut self, id: SessionId, direction: Direction) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let result = forward(session, direction);
        self.settle(id, result);
    }

    /// Write handler for a write-pending destination.
    fn flush_backlog(&mut self, id: SessionId, direction: Direction) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let (_, dst, link, _) = session.parts(direction);
        match link.flush_into(dst) {
            Ok(Flush::Stalled) => {
                trace!(
                    engine = %self.config.label,
                    session = id,
                    ?direction,
                    pending = link.pending(),
                    "backlog still pending"
                );
            }
            Ok(Flush::Drained) => {
                link.resume();
                trace!(engine = %self.config.label, session = id, ?direction, "backlog drained");
                if session.is_finished() {
                    self.close_session(id, CloseReason::PeerClosed);
                } else {
                    // The source's readiness edge may have fired while reads
                    // were held back, so read now instead of waiting for one.
                    self.pump(id, direction);
                }
            }
            Err(err) => self.settle(id, Err(err)),
        }
    }

    fn settle(&mut self, id: SessionId, result: io::Result<Step>) {
        match result {
            Ok(Step::Open) => self.sync_interest(id),
            Ok(Step::Finished) => self.close_session(id, CloseReason::PeerClosed),
            Err(err) => {
                debug!(engine = %self.config.label, session = id, %err, "session i/o failed");
                self.close_session(id, CloseReason::Io(err.to_string()));
            }
        }
    }

    /// Bring both endpoints' registrations in line with the session state.
    fn sync_interest(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let registry = self.poll.registry();
        let mut failure = None;

        for side in [Side::Client, Side::Target] {
            let want = session.desired_interest(side);
            let have = session.registered(side);
            if want == have {
                continue;
            }
            let token = endpoint_token(id, side);
            let stream = session.stream_mut(side);
            let result = match (have, want) {
                (None, Some(interest)) => registry.register(stream, token, interest),
                (Some(_), Some(interest)) => registry.reregister(stream, token, interest),
                (Some(_), None) => registry.deregister(stream),
                (None, None) => Ok(()),
            };
            match result {
                Ok(()) => session.set_registered(side, want),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            warn!(
                engine = %self.config.label,
                session = id,
                %err,
                "failed to update readiness interest"
            );
            self.close_session(id, CloseReason::Io(err.to_string()));
        }
    }

    // ---------------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------------

    /// Remove the session, deregister both endpoints, and drop both sockets.
    ///
    /// Never fails: a missing session or a failed deregistration is logged
    /// and reported, and the rest of the engine carries on.
    fn close_session(&mut self, id: SessionId, reason: CloseReason) {
        let Some(mut session) = self.sessions.remove(id) else {
            self.stats.inconsistency();
            error!(
                engine = %self.config.label,
                session = id,
                %reason,
                "close requested for unregistered session"
            );
            self.observer.on_event(&SessionEvent::Inconsistency {
                session: id,
                detail: format!("close ({reason}) for unregistered session"),
            });
            return;
        };

        for side in [Side::Client, Side::Target] {
            if session.registered(side).is_some() {
                if let Err(err) = self.poll.registry().deregister(session.stream_mut(side)) {
                    debug!(engine = %self.config.label, session = id, ?side, %err, "deregister failed");
                }
                session.set_registered(side, None);
            }
        }

        let traffic = session.traffic();
        let peer = session.peer();
        self.stats.session_closed(traffic.upstream, traffic.downstream);
        debug!(
            engine = %self.config.label,
            session = id,
            %peer,
            %reason,
            upstream = traffic.upstream,
            downstream = traffic.downstream,
            "session closed"
        );
        self.observer.on_event(&SessionEvent::Closed {
            session: id,
            peer,
            reason,
            traffic,
        });
        // Both sockets close when `session` drops here.
    }

    fn sweep_idle(&mut self) {
        let idle = self.sessions.sweep_idle();
        if idle.is_empty() {
            return;
        }
        self.stats.idle_reaped(idle.len());
        debug!(engine = %self.config.label, count = idle.len(), "closing idle sessions");
        for id in idle {
            self.close_session(id, CloseReason::Idle);
        }
    }

    fn close_all(&mut self) {
        let ids = self.sessions.ids();
        if !ids.is_empty() {
            debug!(engine = %self.config.label, count = ids.len(), "closing remaining sessions");
        }
        for id in ids {
            self.close_session(id, CloseReason::Shutdown);
        }
    }
}

/// Move bytes on one direction of an established session.
fn forward(session: &mut Session, direction: Direction) -> io::Result<Step> {
    let id = session.id();
    loop {
        let (src, dst, link, activity) = session.parts(direction);
        if !link.wants_read() {
            break;
        }

        let fill = link.fill_from(src)?;
        match fill {
            Fill::Read(n) => {
                activity.touch();
                trace!(session = id, ?direction, bytes = n, "read");
            }
            Fill::Eof => {
                activity.mark_closing();
                trace!(session = id, ?direction, "end of stream");
            }
            Fill::WouldBlock | Fill::Full => {}
        }

        if link.flush_into(dst)? == Flush::Stalled {
            // Slow consumer: hold reads on this direction until the
            // destination drains.
            link.suspend();
            trace!(session = id, ?direction, pending = link.pending(), "destination stalled");
            return Ok(Step::Open);
        }

        if matches!(fill, Fill::WouldBlock | Fill::Eof) {
            break;
        }
    }

    if session.is_finished() {
        Ok(Step::Finished)
    } else {
        Ok(Step::Open)
    }
}

/// `Ok(true)` once the outbound connect completed, `Ok(false)` while still
/// in progress, `Err` when it failed.
fn connect_status(stream: &TcpStream) -> io::Result<bool> {
    if let Some(err) = stream.take_error()? {
        return Err(err);
    }
    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(err) => Err(err),
    }
}
