//! CS104 APCI state machine.
//!
//! [`Session`] does no IO. Feed it received APDUs with
//! [`Session::handle_frame`], service timers with [`Session::poll_timers`]
//! and drain [`Session::poll_transmit`] / [`Session::poll_event`] after each
//! call. All timestamps come from the caller, so the machine runs under
//! tokio's paused clock in tests.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::codec::Apdu;
use crate::connection::ConnectionId;
use crate::error::{Iec60870Error, Result};
use crate::queue::QueueMark;
use crate::types::{next_seq, ApciParameters, Apci, Asdu, UFunction};
use crate::window::{SentEntry, SentWindow};

/// Which end of the link this session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Controlling station (client, master)
    Controlling,
    /// Controlled station (server, slave)
    Controlled,
}

/// Data transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Only U-frames are exchanged
    Stopped,
    /// STARTDT_ACT sent, waiting for the confirmation
    WaitingForStartDtCon,
    /// Data transfer active
    Started,
    /// STOPDT_ACT sent, waiting for the confirmation
    WaitingForStopDtCon,
    /// STOPDT_ACT received while own I-frames are unconfirmed
    UnconfirmedStopped,
}

/// Things the owner of a session has to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Received ASDU, in wire order
    Asdu(Asdu),
    /// The peer started data transfer (STARTDT_ACT)
    Activated,
    /// The peer stopped data transfer (STOPDT_ACT)
    Deactivated,
    /// Own STARTDT_ACT was confirmed
    StartDtConfirmed,
    /// Own STOPDT_ACT was confirmed
    StopDtConfirmed,
    /// A queued ASDU was acknowledged by the peer
    Confirmed(QueueMark),
}

/// Message counters of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionStatistics {
    /// APDUs sent (I, S and U)
    pub sent_messages: u64,
    /// APDUs received
    pub received_messages: u64,
    /// TESTFR_ACT received
    pub received_test_fr_act: u64,
    /// TESTFR_CON received
    pub received_test_fr_con: u64,
    /// TESTFR_ACT sent on T3 expiry
    pub sent_test_fr_act: u64,
}

/// Sans-IO CS104 connection state.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    role: Role,
    params: ApciParameters,
    state: SessionState,
    send_seq: u16,
    recv_seq: u16,
    window: SentWindow,
    unconfirmed_received: u16,
    t2_started: Option<Instant>,
    t3_deadline: Instant,
    test_deadline: Option<Instant>,
    outstanding_tests: u8,
    u_deadline: Option<Instant>,
    outbox: VecDeque<Apdu>,
    events: VecDeque<SessionEvent>,
    stats: ConnectionStatistics,
}

impl Session {
    /// New session in the stopped state.
    pub fn new(id: ConnectionId, role: Role, params: ApciParameters, now: Instant) -> Self {
        Self {
            id,
            role,
            params,
            state: SessionState::Stopped,
            send_seq: 0,
            recv_seq: 0,
            window: SentWindow::new(params.k),
            unconfirmed_received: 0,
            t2_started: None,
            t3_deadline: now + params.t3,
            test_deadline: None,
            outstanding_tests: 0,
            u_deadline: None,
            outbox: VecDeque::new(),
            events: VecDeque::new(),
            stats: ConnectionStatistics::default(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// N(S) of the next I-frame.
    pub fn send_seq(&self) -> u16 {
        self.send_seq
    }

    /// Expected N(S) of the next received I-frame.
    pub fn recv_seq(&self) -> u16 {
        self.recv_seq
    }

    /// Sent I-frames awaiting confirmation.
    pub fn unconfirmed_sent(&self) -> usize {
        self.window.len()
    }

    /// Received I-frames not yet acknowledged.
    pub fn unconfirmed_received(&self) -> u16 {
        self.unconfirmed_received
    }

    pub fn statistics(&self) -> ConnectionStatistics {
        self.stats
    }

    /// K I-frames outstanding.
    pub fn is_window_full(&self) -> bool {
        self.window.is_full()
    }

    /// Whether an I-frame may be sent right now.
    ///
    /// A controlled station only sends while data transfer is started; a
    /// controlling station may send whenever the window has room.
    pub fn can_send(&self) -> bool {
        if self.window.is_full() {
            return false;
        }
        match self.role {
            Role::Controlled => self.state == SessionState::Started,
            Role::Controlling => self.state != SessionState::WaitingForStopDtCon,
        }
    }

    /// Next APDU to write to the transport.
    pub fn poll_transmit(&mut self) -> Option<Apdu> {
        self.outbox.pop_front()
    }

    /// Next event for the owner.
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    fn transmit(&mut self, apdu: Apdu) {
        tracing::trace!(conn = %self.id, "send {}", apdu);
        self.stats.sent_messages += 1;
        self.outbox.push_back(apdu);
    }

    fn send_u(&mut self, function: UFunction) {
        self.transmit(Apdu::u_frame(function));
    }

    fn send_s_frame(&mut self) {
        self.unconfirmed_received = 0;
        self.t2_started = None;
        self.transmit(Apdu::s_frame(self.recv_seq));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(conn = %self.id, from = ?self.state, to = ?state, "state change");
            self.state = state;
        }
    }

    /// Queue an I-frame carrying `asdu`.
    ///
    /// `mark` ties the frame to a low priority queue entry; it is reported
    /// back as [`SessionEvent::Confirmed`] once the peer acknowledges it.
    pub fn send_asdu(&mut self, asdu: Asdu, mark: Option<QueueMark>, now: Instant) -> Result<()> {
        if self.window.is_full() {
            return Err(Iec60870Error::TooManyUnconfirmed(self.params.k));
        }
        if !self.can_send() {
            return Err(Iec60870Error::NotActive);
        }

        self.window.push(SentEntry {
            seq: self.send_seq,
            sent_at: now,
            mark,
        })?;
        let apdu = Apdu::i_frame(self.send_seq, self.recv_seq, asdu);
        self.send_seq = next_seq(self.send_seq);
        // N(R) is piggy-backed
        self.unconfirmed_received = 0;
        self.t2_started = None;
        self.transmit(apdu);
        Ok(())
    }

    /// Send STARTDT_ACT.
    pub fn start_dt(&mut self, now: Instant) {
        self.send_u(UFunction::StartDtAct);
        self.u_deadline = Some(now + self.params.t1);
        self.set_state(SessionState::WaitingForStartDtCon);
    }

    /// Acknowledge pending receptions, then send STOPDT_ACT.
    pub fn stop_dt(&mut self, now: Instant) {
        if self.unconfirmed_received > 0 {
            self.send_s_frame();
        }
        self.send_u(UFunction::StopDtAct);
        self.u_deadline = Some(now + self.params.t1);
        self.set_state(SessionState::WaitingForStopDtCon);
    }

    /// Leave data transfer without telling the peer; another connection of
    /// the redundancy group took over. A new STARTDT_ACT activates again.
    pub fn suspend(&mut self) {
        if self.state == SessionState::Started {
            self.set_state(SessionState::Stopped);
        }
    }

    /// Process one received APDU. Errors are fatal to the connection.
    pub fn handle_frame(&mut self, apdu: Apdu, now: Instant) -> Result<()> {
        tracing::trace!(conn = %self.id, "recv {}", apdu);
        self.stats.received_messages += 1;

        match apdu.apci {
            Apci::IFrame { send_seq, recv_seq } => {
                if self.role == Role::Controlled && self.state != SessionState::Started {
                    return Err(Iec60870Error::protocol(
                        "I-frame received while data transfer is stopped",
                    ));
                }
                let asdu = apdu
                    .asdu
                    .ok_or_else(|| Iec60870Error::invalid_frame("I-frame without ASDU"))?;

                if self.t2_started.is_none() {
                    self.t2_started = Some(now);
                }
                if send_seq != self.recv_seq {
                    return Err(Iec60870Error::SequenceMismatch {
                        expected: self.recv_seq,
                        actual: send_seq,
                    });
                }
                self.confirm(recv_seq)?;

                self.recv_seq = next_seq(self.recv_seq);
                self.unconfirmed_received += 1;
                self.events.push_back(SessionEvent::Asdu(asdu));

                if self.unconfirmed_received >= self.params.w {
                    self.send_s_frame();
                }
            }

            Apci::SFrame { recv_seq } => {
                self.confirm(recv_seq)?;

                match self.state {
                    SessionState::UnconfirmedStopped if self.window.is_empty() => {
                        self.set_state(SessionState::Stopped);
                        self.send_u(UFunction::StopDtCon);
                    }
                    SessionState::Stopped if self.role == Role::Controlled => {
                        return Err(Iec60870Error::protocol(
                            "S-frame received while data transfer is stopped",
                        ));
                    }
                    _ => {}
                }
            }

            Apci::UFrame { function } => self.handle_u_frame(function),
        }

        self.t3_deadline = now + self.params.t3;
        Ok(())
    }

    fn handle_u_frame(&mut self, function: UFunction) {
        match function {
            UFunction::TestFrAct => {
                self.stats.received_test_fr_act += 1;
                self.send_u(UFunction::TestFrCon);
            }
            UFunction::TestFrCon => {
                self.stats.received_test_fr_con += 1;
                self.outstanding_tests = 0;
                self.test_deadline = None;
            }
            UFunction::StartDtAct => {
                if self.state != SessionState::Started {
                    self.set_state(SessionState::Started);
                    self.events.push_back(SessionEvent::Activated);
                }
                self.send_u(UFunction::StartDtCon);
            }
            UFunction::StartDtCon => {
                self.u_deadline = None;
                if self.role == Role::Controlling {
                    self.set_state(SessionState::Started);
                    self.events.push_back(SessionEvent::StartDtConfirmed);
                } else {
                    tracing::debug!(conn = %self.id, "unexpected STARTDT_CON ignored");
                }
            }
            UFunction::StopDtAct => {
                if matches!(self.state, SessionState::Started) {
                    self.events.push_back(SessionEvent::Deactivated);
                }
                if self.unconfirmed_received > 0 {
                    self.send_s_frame();
                }
                if self.window.is_empty() {
                    self.set_state(SessionState::Stopped);
                    self.send_u(UFunction::StopDtCon);
                } else {
                    tracing::debug!(
                        conn = %self.id,
                        unconfirmed = self.window.len(),
                        "STOPDT_ACT with unconfirmed I-frames"
                    );
                    self.set_state(SessionState::UnconfirmedStopped);
                }
            }
            UFunction::StopDtCon => {
                self.u_deadline = None;
                if self.role == Role::Controlling {
                    self.set_state(SessionState::Stopped);
                    self.events.push_back(SessionEvent::StopDtConfirmed);
                } else {
                    tracing::debug!(conn = %self.id, "unexpected STOPDT_CON ignored");
                }
            }
        }
    }

    fn confirm(&mut self, recv_seq: u16) -> Result<()> {
        let retired = self.window.confirm(recv_seq, self.send_seq).map_err(|e| {
            tracing::warn!(conn = %self.id, error = %e, "acknowledge out of window");
            e
        })?;
        for entry in retired {
            if let Some(mark) = entry.mark {
                self.events.push_back(SessionEvent::Confirmed(mark));
            }
        }
        Ok(())
    }

    /// Service T1, T2 and T3. Errors are fatal to the connection.
    pub fn poll_timers(&mut self, now: Instant) -> Result<()> {
        if now >= self.t3_deadline {
            if self.outstanding_tests > 2 {
                tracing::warn!(conn = %self.id, "no TESTFR_CON for repeated test frames");
                return Err(Iec60870Error::T3Timeout);
            }
            tracing::debug!(conn = %self.id, "T3 expired, sending TESTFR_ACT");
            self.send_u(UFunction::TestFrAct);
            self.stats.sent_test_fr_act += 1;
            self.outstanding_tests += 1;
            self.test_deadline = Some(now + self.params.t1);
            self.t3_deadline = now + self.params.t3;
        }

        if self.test_deadline.is_some_and(|d| now >= d) {
            tracing::warn!(conn = %self.id, "T1 expired waiting for TESTFR_CON");
            return Err(Iec60870Error::T1Timeout);
        }
        if self.u_deadline.is_some_and(|d| now >= d) {
            tracing::warn!(conn = %self.id, state = ?self.state, "T1 expired waiting for U-frame confirmation");
            return Err(Iec60870Error::T1Timeout);
        }

        if self.unconfirmed_received > 0
            && self.t2_started.is_some_and(|t| now >= t + self.params.t2)
        {
            self.send_s_frame();
        }

        if let Some(oldest) = self.window.oldest() {
            if now >= oldest.sent_at + self.params.t1 {
                tracing::warn!(conn = %self.id, seq = oldest.seq, "T1 expired for I-frame");
                return Err(Iec60870Error::T1Timeout);
            }
        }

        Ok(())
    }

    /// Drop the send window, returning the queue marks of unconfirmed frames.
    pub fn reset_window(&mut self) -> Vec<QueueMark> {
        self.window.clear().into_iter().filter_map(|e| e.mark).collect()
    }
}
