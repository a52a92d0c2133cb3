//! Primary station procedures.
//!
//! [`PrimaryLink`] is the primary side towards one remote address: it
//! establishes the link (request status, reset), sends confirmed user
//! data and class requests, toggles FCB and repeats unanswered frames.
//! [`UnbalancedPrimary`] multiplexes one `PrimaryLink` per slave on a
//! shared line.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::time::Instant;

use super::{
    Control, Ft12Frame, LinkLayerMode, LinkLayerParameters, LinkLayerState, PrimaryFunction,
    SecondaryFunction,
};
use crate::error::{Iec60870Error, Result};

/// User data a master holds per slave while the line is busy.
pub(crate) const MAX_PENDING_USER_DATA: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrimaryState {
    Idle,
    ExecuteRequestStatusOfLink,
    ExecuteResetRemoteLink,
    LinkLayersAvailable,
    ExecuteServiceSendConfirm,
    ExecuteServiceRequestRespond,
    SecondaryLinkLayerBusy,
}

/// Class of user data requested from an unbalanced slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataClass {
    Class1,
    Class2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PrimaryEvent {
    StateChanged { address: u16, state: LinkLayerState },
    /// User data answering a class request
    UserData { address: u16, data: Bytes },
    /// The slave reported class 1 data (ACD)
    AccessDemand { address: u16 },
}

/// Frames to put on the line and events for the application.
#[derive(Debug, Default)]
pub(crate) struct LinkOutput {
    pub frames: VecDeque<Ft12Frame>,
    pub events: VecDeque<PrimaryEvent>,
}

pub(crate) struct PrimaryLink {
    address: u16,
    params: LinkLayerParameters,
    mode: LinkLayerMode,
    dir: bool,
    state: PrimaryState,
    link_state: LinkLayerState,
    waiting: bool,
    last_send: Instant,
    first_send: Instant,
    next_fcb: bool,
    test_pending: bool,
    test_in_flight: bool,
    request: Option<DataClass>,
    repeat: Option<Ft12Frame>,
}

impl PrimaryLink {
    /// Primary of a balanced line. The master sets DIR, the slave clears it.
    pub(crate) fn balanced(address: u16, params: LinkLayerParameters, dir: bool, now: Instant) -> Self {
        Self::new(address, params, LinkLayerMode::Balanced, dir, now)
    }

    pub(crate) fn unbalanced(address: u16, params: LinkLayerParameters, now: Instant) -> Self {
        Self::new(address, params, LinkLayerMode::Unbalanced, false, now)
    }

    fn new(address: u16, params: LinkLayerParameters, mode: LinkLayerMode, dir: bool, now: Instant) -> Self {
        Self {
            address,
            params,
            mode,
            dir,
            state: PrimaryState::Idle,
            link_state: LinkLayerState::Idle,
            waiting: false,
            last_send: now,
            first_send: now,
            next_fcb: true,
            test_pending: false,
            test_in_flight: false,
            request: None,
            repeat: None,
        }
    }

    pub(crate) fn address(&self) -> u16 {
        self.address
    }

    pub(crate) fn link_state(&self) -> LinkLayerState {
        self.link_state
    }

    /// A frame is out and its answer outstanding.
    pub(crate) fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Ask for user data of `class` once the link is free. Class 1 wins
    /// over an outstanding class 2 request.
    pub(crate) fn request_class(&mut self, class: DataClass) {
        if self.request != Some(DataClass::Class1) {
            self.request = Some(class);
        }
    }

    pub(crate) fn send_test_function(&mut self) {
        self.test_pending = true;
    }

    fn set_link_state(&mut self, state: LinkLayerState, out: &mut LinkOutput) {
        if self.link_state != state {
            tracing::debug!(address = self.address, from = %self.link_state, to = %state, "link layer state changed");
            self.link_state = state;
            out.events.push_back(PrimaryEvent::StateChanged {
                address: self.address,
                state,
            });
        }
    }

    fn fail(&mut self, out: &mut LinkOutput) {
        self.waiting = false;
        self.request = None;
        self.test_in_flight = false;
        self.repeat = None;
        self.state = PrimaryState::Idle;
        self.set_link_state(LinkLayerState::Error, out);
    }

    fn send(&mut self, function: PrimaryFunction, fcv: bool, user_data: Option<Bytes>, now: Instant, out: &mut LinkOutput) {
        let control = Control::primary(function, self.dir, fcv && self.next_fcb, fcv);
        let frame = match user_data {
            Some(user_data) => Ft12Frame::Variable {
                control,
                address: self.address,
                user_data,
            },
            None => Ft12Frame::Fixed {
                control,
                address: self.address,
            },
        };
        if fcv {
            self.next_fcb = !self.next_fcb;
            self.repeat = Some(frame.clone());
        } else {
            self.repeat = None;
        }
        self.waiting = true;
        self.last_send = now;
        self.first_send = now;
        out.frames.push_back(frame);
    }

    /// Advance the procedure: start the next exchange or repeat and time
    /// out the running one. `next_user_data` is asked at most once, when the
    /// link is free for user data.
    pub(crate) fn run(&mut self, now: Instant, next_user_data: impl FnOnce() -> Option<Bytes>, out: &mut LinkOutput) {
        match self.state {
            PrimaryState::Idle => {
                self.test_pending = false;
                self.test_in_flight = false;
                self.request = None;
                self.send(PrimaryFunction::RequestLinkStatus, false, None, now, out);
                self.state = PrimaryState::ExecuteRequestStatusOfLink;
            }
            PrimaryState::ExecuteRequestStatusOfLink | PrimaryState::ExecuteResetRemoteLink => {
                if self.waiting && now.saturating_duration_since(self.last_send) >= self.params.timeout_for_ack {
                    tracing::debug!(address = self.address, state = ?self.state, "no answer from secondary");
                    self.fail(out);
                }
            }
            PrimaryState::LinkLayersAvailable => {
                if self.test_pending {
                    self.test_pending = false;
                    self.test_in_flight = true;
                    self.send(PrimaryFunction::TestFunctionForLink, true, None, now, out);
                    self.state = PrimaryState::ExecuteServiceSendConfirm;
                } else if let Some(class) = self.request {
                    let function = match class {
                        DataClass::Class1 => PrimaryFunction::RequestUserDataClass1,
                        DataClass::Class2 => PrimaryFunction::RequestUserDataClass2,
                    };
                    self.send(function, true, None, now, out);
                    self.state = PrimaryState::ExecuteServiceRequestRespond;
                } else if let Some(data) = next_user_data() {
                    self.send(PrimaryFunction::UserDataConfirmed, true, Some(data), now, out);
                    self.state = PrimaryState::ExecuteServiceSendConfirm;
                }
            }
            PrimaryState::ExecuteServiceSendConfirm | PrimaryState::ExecuteServiceRequestRespond => {
                if !self.waiting || now.saturating_duration_since(self.last_send) < self.params.timeout_for_ack {
                    return;
                }
                if now.saturating_duration_since(self.first_send) >= self.params.timeout_repeat {
                    tracing::warn!(address = self.address, state = ?self.state, "link layer timeout");
                    self.fail(out);
                } else if let Some(frame) = self.repeat.clone() {
                    tracing::debug!(address = self.address, "repeating frame");
                    self.last_send = now;
                    out.frames.push_back(frame);
                }
            }
            PrimaryState::SecondaryLinkLayerBusy => {
                if now.saturating_duration_since(self.last_send) >= self.params.timeout_for_ack {
                    self.state = PrimaryState::Idle;
                }
            }
        }
    }

    /// Process a frame of the secondary station (PRM = 0) or `0xE5`.
    pub(crate) fn handle_response(&mut self, frame: &Ft12Frame, now: Instant, out: &mut LinkOutput) {
        let (function, acd, dfc, user_data) = match frame {
            Ft12Frame::SingleCharAck => (Some(SecondaryFunction::Ack), false, false, None),
            Ft12Frame::Fixed { control, .. } => (control.secondary_function(), control.acd(), control.dfc(), None),
            Ft12Frame::Variable { control, user_data, .. } => (
                control.secondary_function(),
                control.acd(),
                control.dfc(),
                Some(user_data.clone()),
            ),
        };
        let Some(function) = function else {
            tracing::debug!(address = self.address, frame = ?frame, "unknown secondary function");
            return;
        };
        if !self.waiting {
            tracing::debug!(address = self.address, function = ?function, "unexpected answer ignored");
            return;
        }
        self.waiting = false;

        if acd && self.mode == LinkLayerMode::Unbalanced {
            out.events.push_back(PrimaryEvent::AccessDemand { address: self.address });
        }

        if dfc {
            tracing::debug!(address = self.address, "secondary signals data flow control");
            self.state = PrimaryState::SecondaryLinkLayerBusy;
            self.last_send = now;
            self.set_link_state(LinkLayerState::Busy, out);
            return;
        }

        match (function, self.state) {
            (SecondaryFunction::StatusOfLinkOrAccessDemand, PrimaryState::ExecuteRequestStatusOfLink) => {
                self.send(PrimaryFunction::ResetRemoteLink, false, None, now, out);
                self.next_fcb = true;
                self.state = PrimaryState::ExecuteResetRemoteLink;
            }
            (SecondaryFunction::Ack, PrimaryState::ExecuteResetRemoteLink) => self.available(out),
            (SecondaryFunction::Ack, PrimaryState::ExecuteServiceSendConfirm) => {
                self.test_in_flight = false;
                self.available(out);
            }
            (SecondaryFunction::Ack | SecondaryFunction::RespNackNoData, PrimaryState::ExecuteServiceRequestRespond) => {
                self.request = None;
                self.available(out);
            }
            (SecondaryFunction::RespUserData, PrimaryState::ExecuteServiceRequestRespond) => {
                self.request = None;
                if let Some(data) = user_data {
                    out.events.push_back(PrimaryEvent::UserData {
                        address: self.address,
                        data,
                    });
                }
                self.available(out);
            }
            (SecondaryFunction::Nack, PrimaryState::ExecuteServiceSendConfirm) => {
                self.state = PrimaryState::SecondaryLinkLayerBusy;
                self.last_send = now;
                self.set_link_state(LinkLayerState::Busy, out);
            }
            (
                SecondaryFunction::LinkServiceNotFunctioning | SecondaryFunction::LinkServiceNotImplemented,
                PrimaryState::ExecuteServiceSendConfirm | PrimaryState::ExecuteServiceRequestRespond,
            ) => {
                tracing::warn!(address = self.address, function = ?function, "link service refused");
                self.test_in_flight = false;
                self.request = None;
                self.available(out);
            }
            (function, state) => {
                tracing::warn!(address = self.address, function = ?function, state = ?state, "unexpected answer");
                self.fail(out);
            }
        }
    }

    fn available(&mut self, out: &mut LinkOutput) {
        self.repeat = None;
        self.state = PrimaryState::LinkLayersAvailable;
        self.set_link_state(LinkLayerState::Available, out);
    }
}

struct Slave {
    link: PrimaryLink,
    pending: VecDeque<Bytes>,
}

/// Primary of an unbalanced line: one link per slave, served in turn.
pub(crate) struct UnbalancedPrimary {
    params: LinkLayerParameters,
    slaves: Vec<Slave>,
    current: Option<usize>,
    next: usize,
}

impl UnbalancedPrimary {
    pub(crate) fn new(params: LinkLayerParameters) -> Self {
        Self {
            params,
            slaves: Vec::new(),
            current: None,
            next: 0,
        }
    }

    fn index(&self, address: u16) -> Option<usize> {
        self.slaves.iter().position(|s| s.link.address() == address)
    }

    fn slave(&mut self, address: u16) -> Result<&mut Slave> {
        let index = self
            .index(address)
            .ok_or_else(|| Iec60870Error::invalid_parameter(format!("unknown slave address {}", address)))?;
        Ok(&mut self.slaves[index])
    }

    /// Register a slave; `false` when the address is already known.
    pub(crate) fn add_slave(&mut self, address: u16, now: Instant) -> bool {
        if self.index(address).is_some() {
            return false;
        }
        self.slaves.push(Slave {
            link: PrimaryLink::unbalanced(address, self.params, now),
            pending: VecDeque::new(),
        });
        true
    }

    pub(crate) fn link_state(&self, address: u16) -> Option<LinkLayerState> {
        self.index(address).map(|i| self.slaves[i].link.link_state())
    }

    pub(crate) fn request_class(&mut self, address: u16, class: DataClass) -> Result<()> {
        self.slave(address)?.link.request_class(class);
        Ok(())
    }

    pub(crate) fn send_test_function(&mut self, address: u16) -> Result<()> {
        self.slave(address)?.link.send_test_function();
        Ok(())
    }

    /// Queue user data for a slave; `LinkLayerBusy` while its queue is full.
    pub(crate) fn enqueue(&mut self, address: u16, data: Bytes) -> Result<()> {
        let slave = self.slave(address)?;
        if slave.pending.len() >= MAX_PENDING_USER_DATA {
            return Err(Iec60870Error::LinkLayerBusy);
        }
        slave.pending.push_back(data);
        Ok(())
    }

    pub(crate) fn has_room(&self, address: u16) -> bool {
        self.index(address)
            .is_some_and(|i| self.slaves[i].pending.len() < MAX_PENDING_USER_DATA)
    }

    /// Give the line to the next slave with work, unless an exchange runs.
    pub(crate) fn run(&mut self, now: Instant, out: &mut LinkOutput) {
        let count = self.slaves.len();
        for _ in 0..count {
            let index = match self.current {
                Some(index) => index,
                None => {
                    let index = self.next % count;
                    self.next = (index + 1) % count;
                    self.current = Some(index);
                    index
                }
            };
            let Slave { link, pending } = &mut self.slaves[index];
            link.run(now, || pending.pop_front(), out);
            if link.is_waiting() {
                return;
            }
            self.current = None;
        }
    }

    /// Route a secondary frame to the slave it came from. `0xE5` carries no
    /// address and belongs to the slave holding the line.
    pub(crate) fn handle_response(&mut self, frame: &Ft12Frame, now: Instant, out: &mut LinkOutput) {
        let index = match frame.address() {
            Some(address) => self.index(address),
            None => self.current,
        };
        let Some(index) = index else {
            tracing::debug!(address = ?frame.address(), "answer from unknown slave ignored");
            return;
        };
        let link = &mut self.slaves[index].link;
        link.handle_response(frame, now, out);
        if !link.is_waiting() && self.current == Some(index) {
            self.current = None;
        }
    }
}
