//! Logical timestamps and the clocks that issue them.
//!
//! Every operation is addressed by a [`Ts`] `(sid, time)`. Timestamps are
//! totally ordered by `time` first and `sid` second, which is what all
//! last-write-wins decisions and RGA sibling ordering are built on.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::json_crdt_patch::enums::session;

/// Largest logical time a clock may issue (53 bits).
pub const MAX_TIME: u64 = (1 << 53) - 1;

/// A logical timestamp: `(session id, logical time)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ts {
    pub sid: u64,
    pub time: u64,
}

impl Ts {
    pub const fn new(sid: u64, time: u64) -> Self {
        Self { sid, time }
    }
}

impl Ord for Ts {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.sid.cmp(&other.sid))
    }
}

impl PartialOrd for Ts {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_ts(*self))
    }
}

/// A run of `span` consecutive ticks of one session, starting at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tss {
    pub sid: u64,
    pub time: u64,
    pub span: u64,
}

impl Tss {
    pub const fn new(sid: u64, time: u64, span: u64) -> Self {
        Self { sid, time, span }
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.time)
    }

    /// Returns `true` if `id` falls inside this span.
    pub fn contains(&self, id: Ts) -> bool {
        contains_id(self.ts(), self.span, id)
    }
}

impl fmt::Display for Tss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", print_ts(self.ts()), self.span)
    }
}

#[inline]
pub fn ts(sid: u64, time: u64) -> Ts {
    Ts::new(sid, time)
}

#[inline]
pub fn tss(sid: u64, time: u64, span: u64) -> Tss {
    Tss::new(sid, time, span)
}

/// Moves `stamp` forward by `cycles` ticks of the same session.
#[inline]
pub fn tick(stamp: Ts, cycles: u64) -> Ts {
    Ts::new(stamp.sid, stamp.time + cycles)
}

/// Total order of timestamps: time first, then session id.
#[inline]
pub fn compare(a: Ts, b: Ts) -> Ordering {
    a.cmp(&b)
}

/// Returns `true` if `[ts1, ts1 + span1)` fully covers `[ts2, ts2 + span2)`.
pub fn contains(ts1: Ts, span1: u64, ts2: Ts, span2: u64) -> bool {
    ts1.sid == ts2.sid && ts1.time <= ts2.time && ts1.time + span1 >= ts2.time + span2
}

/// Returns `true` if `[ts1, ts1 + span1)` covers the single tick `ts2`.
pub fn contains_id(ts1: Ts, span1: u64, ts2: Ts) -> bool {
    ts1.sid == ts2.sid && ts1.time <= ts2.time && ts2.time < ts1.time + span1
}

/// Span of `span` ticks starting `offset` ticks after `stamp`.
pub fn interval(stamp: Ts, offset: u64, span: u64) -> Tss {
    Tss::new(stamp.sid, stamp.time + offset, span)
}

/// Short human readable form: `.N` for the server session, `..XXXX.N` for
/// session ids longer than four digits.
pub fn print_ts(id: Ts) -> String {
    if id.sid == session::SERVER {
        return format!(".{}", id.time);
    }
    let s = id.sid.to_string();
    if s.len() > 4 {
        format!("..{}.{}", &s[s.len() - 4..], id.time)
    } else {
        format!("{}.{}", s, id.time)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("server clock cannot observe session {sid}")]
    ForeignSession { sid: u64 },
    #[error("server clock at {expected} cannot observe time {got}")]
    TimeTravel { expected: u64, got: u64 },
    #[error("logical clock overflow")]
    Overflow,
}

fn advance(time: u64, span: u64) -> Result<u64, ClockError> {
    time.checked_add(span)
        .filter(|&t| t <= MAX_TIME + 1)
        .ok_or(ClockError::Overflow)
}

/// Vector clock of a peer replica: its own session and time plus the
/// latest time observed from every other session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockVector {
    pub sid: u64,
    /// Next time this session will issue.
    pub time: u64,
    pub peers: BTreeMap<u64, Ts>,
}

impl ClockVector {
    pub fn new(sid: u64, time: u64) -> Self {
        Self {
            sid,
            time,
            peers: BTreeMap::new(),
        }
    }

    /// The timestamp the next tick will return.
    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.time)
    }

    /// Reserves `span` ticks and returns the first.
    ///
    /// # Panics
    ///
    /// When the 53-bit time domain is exhausted.
    pub fn tick(&mut self, span: u64) -> Ts {
        match self.try_tick(span) {
            Ok(id) => id,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_tick(&mut self, span: u64) -> Result<Ts, ClockError> {
        let id = self.ts();
        self.time = advance(self.time, span)?;
        Ok(id)
    }

    /// Folds `span` ticks starting at `id` into the clock. Local time moves
    /// past the last observed tick and peer entries never move back.
    pub fn observe(&mut self, id: Ts, span: u64) {
        let edge = id.time + span.saturating_sub(1);
        if id.sid != self.sid {
            let peer = self.peers.entry(id.sid).or_insert(Ts::new(id.sid, edge));
            if edge > peer.time {
                peer.time = edge;
            }
        }
        if edge >= self.time {
            self.time = edge + 1;
        }
    }

    /// Latest observed time of `sid`, if it was ever seen.
    pub fn peer(&self, sid: u64) -> Option<Ts> {
        self.peers.get(&sid).copied()
    }

    /// Independent copy writing as `sid`. The current session becomes a
    /// peer so the new session never reuses its times.
    pub fn fork(&self, sid: u64) -> ClockVector {
        let mut clock = ClockVector::new(sid, self.time);
        if sid != self.sid && self.time > 0 {
            clock.observe(Ts::new(self.sid, self.time - 1), 1);
        }
        for peer in self.peers.values() {
            if peer.sid != sid {
                clock.observe(*peer, 1);
            }
        }
        clock
    }
}

impl fmt::Display for ClockVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock {}", print_ts(self.ts()))?;
        let last = self.peers.len().saturating_sub(1);
        for (i, peer) in self.peers.values().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            write!(f, "\n{} {}", branch, print_ts(*peer))?;
        }
        Ok(())
    }
}

/// Clock of a replica whose times are assigned by a central server. Every
/// write happens in the [`session::SERVER`] session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerClockVector {
    /// Next time the server will assign.
    pub time: u64,
}

impl ServerClockVector {
    pub fn new(time: u64) -> Self {
        Self { time }
    }

    pub fn ts(&self) -> Ts {
        Ts::new(session::SERVER, self.time)
    }

    /// # Panics
    ///
    /// When the 53-bit time domain is exhausted.
    pub fn tick(&mut self, span: u64) -> Ts {
        match self.try_tick(span) {
            Ok(id) => id,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_tick(&mut self, span: u64) -> Result<Ts, ClockError> {
        let id = self.ts();
        self.time = advance(self.time, span)?;
        Ok(id)
    }

    /// Observes an operation assigned by the server. Operations of other
    /// sessions and operations from beyond the next expected time are
    /// rejected.
    pub fn observe(&mut self, id: Ts, span: u64) -> Result<(), ClockError> {
        self.check(id)?;
        let time = advance(id.time, span)?;
        if time > self.time {
            self.time = time;
        }
        Ok(())
    }

    /// Validates `id` without changing the clock.
    pub fn check(&self, id: Ts) -> Result<(), ClockError> {
        if id.sid != session::SERVER {
            return Err(ClockError::ForeignSession { sid: id.sid });
        }
        if id.time > self.time {
            return Err(ClockError::TimeTravel {
                expected: self.time,
                got: id.time,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ServerClockVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock {}", print_ts(self.ts()))
    }
}

/// The two clock flavors a model or builder can run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clock {
    Logical(ClockVector),
    Server(ServerClockVector),
}

impl Clock {
    pub fn sid(&self) -> u64 {
        match self {
            Clock::Logical(c) => c.sid,
            Clock::Server(_) => session::SERVER,
        }
    }

    pub fn time(&self) -> u64 {
        match self {
            Clock::Logical(c) => c.time,
            Clock::Server(c) => c.time,
        }
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid(), self.time())
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Clock::Server(_))
    }

    /// # Panics
    ///
    /// When the 53-bit time domain is exhausted.
    pub fn tick(&mut self, span: u64) -> Ts {
        match self {
            Clock::Logical(c) => c.tick(span),
            Clock::Server(c) => c.tick(span),
        }
    }

    pub fn try_tick(&mut self, span: u64) -> Result<Ts, ClockError> {
        match self {
            Clock::Logical(c) => c.try_tick(span),
            Clock::Server(c) => c.try_tick(span),
        }
    }

    /// A logical clock accepts any id whose ticks stay inside the 53-bit
    /// time domain; a server clock also validates the session and time.
    pub fn observe(&mut self, id: Ts, span: u64) -> Result<(), ClockError> {
        match self {
            Clock::Logical(c) => {
                advance(id.time, span.max(1))?;
                c.observe(id, span);
                Ok(())
            }
            Clock::Server(c) => c.observe(id, span),
        }
    }

    /// A logical clock forks into session `sid`; a server clock stays in the
    /// server session.
    pub fn fork(&self, sid: u64) -> Clock {
        match self {
            Clock::Logical(c) => Clock::Logical(c.fork(sid)),
            Clock::Server(c) => Clock::Server(c.clone()),
        }
    }

    /// Observed peers; empty for a server clock.
    pub fn peers(&self) -> impl Iterator<Item = Ts> + '_ {
        let peers = match self {
            Clock::Logical(c) => Some(c.peers.values().copied()),
            Clock::Server(_) => None,
        };
        peers.into_iter().flatten()
    }
}

impl From<ClockVector> for Clock {
    fn from(c: ClockVector) -> Self {
        Clock::Logical(c)
    }
}

impl From<ServerClockVector> for Clock {
    fn from(c: ServerClockVector) -> Self {
        Clock::Server(c)
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clock::Logical(c) => c.fmt(f),
            Clock::Server(c) => c.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_compare_time_first() {
        assert_eq!(compare(ts(1, 10), ts(2, 9)), Ordering::Greater);
        assert_eq!(compare(ts(2, 9), ts(1, 10)), Ordering::Less);
        assert_eq!(compare(ts(2, 10), ts(1, 10)), Ordering::Greater);
        assert_eq!(compare(ts(5, 5), ts(5, 5)), Ordering::Equal);
        assert!(ts(100, 3) < ts(1, 4));
    }

    #[test]
    fn span_containment() {
        assert!(contains(ts(1, 10), 5, ts(1, 11), 4));
        assert!(!contains(ts(1, 10), 5, ts(1, 11), 5));
        assert!(!contains(ts(1, 10), 5, ts(2, 11), 1));
        assert!(contains_id(ts(1, 10), 5, ts(1, 14)));
        assert!(!contains_id(ts(1, 10), 5, ts(1, 15)));
        assert!(tss(3, 4, 2).contains(ts(3, 5)));
        assert_eq!(interval(ts(3, 4), 2, 7), tss(3, 6, 7));
    }

    #[test]
    fn print_ts_shortens_long_sessions() {
        assert_eq!(print_ts(ts(session::SERVER, 7)), ".7");
        assert_eq!(print_ts(ts(123, 7)), "123.7");
        assert_eq!(print_ts(ts(1234567, 7)), "..4567.7");
    }

    #[test]
    fn clock_vector_tick_returns_fresh_ids() {
        let mut clock = ClockVector::new(5, 1);
        assert_eq!(clock.tick(1), ts(5, 1));
        assert_eq!(clock.tick(3), ts(5, 2));
        assert_eq!(clock.tick(1), ts(5, 5));
        assert_eq!(clock.time, 6);
    }

    #[test]
    fn clock_vector_observe() {
        let mut clock = ClockVector::new(5, 1);
        clock.observe(ts(9, 10), 3);
        assert_eq!(clock.peer(9), Some(ts(9, 12)));
        assert_eq!(clock.time, 13);
        // Older observations never move a peer back.
        clock.observe(ts(9, 2), 1);
        assert_eq!(clock.peer(9), Some(ts(9, 12)));
        assert_eq!(clock.time, 13);
    }

    #[test]
    fn clock_vector_observe_is_idempotent() {
        let mut clock = ClockVector::new(5, 1);
        clock.observe(ts(9, 4), 2);
        let once = clock.clone();
        clock.observe(ts(9, 4), 2);
        assert_eq!(clock, once);
    }

    #[test]
    fn clock_vector_observe_own_session() {
        let mut clock = ClockVector::new(5, 1);
        clock.observe(ts(5, 20), 1);
        assert!(clock.peers.is_empty());
        assert_eq!(clock.time, 21);
    }

    #[test]
    fn clock_vector_fork_keeps_history() {
        let mut clock = ClockVector::new(5, 1);
        clock.observe(ts(9, 4), 1);
        clock.tick(3);
        let fork = clock.fork(7);
        assert_eq!(fork.sid, 7);
        assert_eq!(fork.time, clock.time);
        assert_eq!(fork.peer(5), Some(ts(5, clock.time - 1)));
        assert_eq!(fork.peer(9), Some(ts(9, 4)));
    }

    #[test]
    fn tick_overflow_is_reported() {
        let mut clock = ClockVector::new(5, MAX_TIME);
        assert_eq!(clock.try_tick(1), Ok(ts(5, MAX_TIME)));
        assert_eq!(clock.try_tick(1), Err(ClockError::Overflow));
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn tick_overflow_panics() {
        let mut clock = ClockVector::new(5, MAX_TIME);
        clock.tick(2);
    }

    #[test]
    fn logical_clock_refuses_ids_past_the_time_domain() {
        let mut clock = Clock::Logical(ClockVector::new(0x20000, 1));
        assert_eq!(clock.observe(ts(0x30000, 1 << 56), 1), Err(ClockError::Overflow));
        assert_eq!(clock.observe(ts(0x30000, MAX_TIME), 2), Err(ClockError::Overflow));
        assert_eq!(clock.observe(ts(0x30000, MAX_TIME + 1), 0), Err(ClockError::Overflow));
        assert_eq!(clock.time(), 1);
        assert_eq!(clock.peers().count(), 0);

        assert_eq!(clock.observe(ts(0x30000, MAX_TIME - 1), 1), Ok(()));
        assert_eq!(clock.try_tick(1), Ok(ts(0x20000, MAX_TIME)));
    }

    #[test]
    fn server_clock_rejects_foreign_sessions() {
        let mut clock = ServerClockVector::new(1);
        assert_eq!(
            clock.observe(ts(77, 1), 1),
            Err(ClockError::ForeignSession { sid: 77 })
        );
        assert_eq!(clock.time, 1);
    }

    #[test]
    fn server_clock_rejects_time_travel() {
        let mut clock = ServerClockVector::new(5);
        assert!(clock.observe(ts(session::SERVER, 5), 2).is_ok());
        assert_eq!(clock.time, 7);
        assert_eq!(
            clock.observe(ts(session::SERVER, 9), 1),
            Err(ClockError::TimeTravel {
                expected: 7,
                got: 9
            })
        );
    }

    #[test]
    fn clock_enum_dispatch() {
        let mut logical = Clock::from(ClockVector::new(10, 1));
        assert_eq!(logical.tick(2), ts(10, 1));
        assert!(logical.observe(ts(3, 50), 1).is_ok());
        assert_eq!(logical.peers().collect::<Vec<_>>(), vec![ts(3, 50)]);

        let server = Clock::from(ServerClockVector::new(4));
        assert_eq!(server.sid(), session::SERVER);
        assert_eq!(server.fork(99).sid(), session::SERVER);
        assert_eq!(server.peers().count(), 0);
    }

    #[test]
    fn display_draws_peer_tree() {
        let mut clock = ClockVector::new(12, 3);
        clock.observe(ts(20, 1), 1);
        clock.observe(ts(30, 2), 1);
        assert_eq!(clock.to_string(), "clock 12.3\n├─ 20.1\n└─ 30.2");
    }
}
