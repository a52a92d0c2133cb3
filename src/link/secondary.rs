//! Secondary station procedures.

use bytes::Bytes;

use super::primary::LinkOutput;
use super::{Control, Ft12Frame, LinkLayerMode, LinkLayerParameters, PrimaryFunction, SecondaryFunction};

/// The user of a secondary link: consumes user data, supplies class data.
pub(crate) trait SecondaryApplication {
    /// Class 1 data is queued; reported as ACD.
    fn class1_available(&self) -> bool {
        false
    }

    fn class1_data(&mut self) -> Option<Bytes> {
        None
    }

    fn class2_data(&mut self) -> Option<Bytes> {
        None
    }

    fn user_data(&mut self, data: Bytes, broadcast: bool);

    /// The primary reset the link (`only_fcb == false`) or just the FCB.
    fn reset(&mut self, _only_fcb: bool) {}
}

pub(crate) struct SecondaryLink {
    address: u16,
    params: LinkLayerParameters,
    mode: LinkLayerMode,
    dir: bool,
    expected_fcb: bool,
    last_response: Option<Ft12Frame>,
}

impl SecondaryLink {
    pub(crate) fn balanced(address: u16, params: LinkLayerParameters, dir: bool) -> Self {
        Self::new(address, params, LinkLayerMode::Balanced, dir)
    }

    pub(crate) fn unbalanced(address: u16, params: LinkLayerParameters) -> Self {
        Self::new(address, params, LinkLayerMode::Unbalanced, false)
    }

    fn new(address: u16, params: LinkLayerParameters, mode: LinkLayerMode, dir: bool) -> Self {
        Self {
            address,
            params,
            mode,
            dir,
            expected_fcb: true,
            last_response: None,
        }
    }

    fn unbalanced_mode(&self) -> bool {
        self.mode == LinkLayerMode::Unbalanced
    }

    fn fixed(&self, function: SecondaryFunction, acd: bool) -> Ft12Frame {
        Ft12Frame::Fixed {
            control: Control::secondary(function, self.dir, acd, false),
            address: self.address,
        }
    }

    fn ack(&self, acd: bool) -> Ft12Frame {
        if self.params.use_single_char_ack && !acd {
            Ft12Frame::SingleCharAck
        } else {
            self.fixed(SecondaryFunction::Ack, acd)
        }
    }

    fn respond_user_data(&self, data: Option<Bytes>, acd: bool) -> Ft12Frame {
        match data {
            Some(user_data) => Ft12Frame::Variable {
                control: Control::secondary(SecondaryFunction::RespUserData, self.dir, acd, false),
                address: self.address,
                user_data,
            },
            None if self.params.use_single_char_ack && !acd => Ft12Frame::SingleCharAck,
            None => self.fixed(SecondaryFunction::RespNackNoData, acd),
        }
    }

    /// Answer a frame of the primary station (PRM = 1).
    pub(crate) fn handle_request<A: SecondaryApplication>(&mut self, frame: &Ft12Frame, app: &mut A, out: &mut LinkOutput) {
        let (control, address, user_data) = match frame {
            Ft12Frame::SingleCharAck => return,
            Ft12Frame::Fixed { control, address } => (*control, *address, None),
            Ft12Frame::Variable {
                control,
                address,
                user_data,
            } => (*control, *address, Some(user_data.clone())),
        };
        if !control.prm() {
            return;
        }

        let unbalanced = self.unbalanced_mode();
        let broadcast =
            unbalanced && self.params.address_length > 0 && address == self.params.broadcast_address();
        if unbalanced && !broadcast && address != self.address {
            tracing::trace!(address, own = self.address, "frame for another station");
            return;
        }

        let function = control.primary_function();
        if broadcast {
            match (function, user_data) {
                (Some(PrimaryFunction::UserDataNoReply), Some(data)) => app.user_data(data, true),
                _ => tracing::debug!(function = ?function, "broadcast only allowed without reply"),
            }
            return;
        }

        if control.fcv() {
            if control.fcb() != self.expected_fcb {
                tracing::debug!(address = self.address, "FCB not toggled, repeating last answer");
                if let Some(response) = self.last_response.clone() {
                    out.frames.push_back(response);
                }
                return;
            }
            self.expected_fcb = !self.expected_fcb;
        }

        let response = match function {
            Some(PrimaryFunction::ResetRemoteLink) => {
                self.expected_fcb = true;
                app.reset(false);
                Some(self.ack(unbalanced && app.class1_available()))
            }
            Some(PrimaryFunction::ResetFcb) if unbalanced => {
                self.expected_fcb = true;
                app.reset(true);
                Some(self.ack(app.class1_available()))
            }
            Some(PrimaryFunction::TestFunctionForLink) => Some(self.ack(unbalanced && app.class1_available())),
            Some(PrimaryFunction::RequestLinkStatus) => Some(self.fixed(
                SecondaryFunction::StatusOfLinkOrAccessDemand,
                unbalanced && app.class1_available(),
            )),
            Some(PrimaryFunction::UserDataConfirmed) => {
                if let Some(data) = user_data {
                    app.user_data(data, false);
                }
                Some(self.ack(unbalanced && app.class1_available()))
            }
            Some(PrimaryFunction::UserDataNoReply) => {
                if let Some(data) = user_data {
                    app.user_data(data, false);
                }
                None
            }
            Some(PrimaryFunction::RequestUserDataClass1) if unbalanced => {
                let data = app.class1_data();
                Some(self.respond_user_data(data, app.class1_available()))
            }
            Some(PrimaryFunction::RequestUserDataClass2) if unbalanced => {
                let data = app.class2_data().or_else(|| app.class1_data());
                Some(self.respond_user_data(data, app.class1_available()))
            }
            other => {
                tracing::debug!(function = ?other, code = control.function_code(), "link service not implemented");
                Some(self.fixed(SecondaryFunction::LinkServiceNotImplemented, false))
            }
        };

        if let Some(response) = response {
            if control.fcv() {
                self.last_response = Some(response.clone());
            }
            out.frames.push_back(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Default)]
    struct Queues {
        class1: VecDeque<Bytes>,
        class2: VecDeque<Bytes>,
        received: Vec<(Bytes, bool)>,
        resets: Vec<bool>,
    }

    impl SecondaryApplication for Queues {
        fn class1_available(&self) -> bool {
            !self.class1.is_empty()
        }

        fn class1_data(&mut self) -> Option<Bytes> {
            self.class1.pop_front()
        }

        fn class2_data(&mut self) -> Option<Bytes> {
            self.class2.pop_front()
        }

        fn user_data(&mut self, data: Bytes, broadcast: bool) {
            self.received.push((data, broadcast));
        }

        fn reset(&mut self, only_fcb: bool) {
            self.resets.push(only_fcb);
        }
    }

    fn request(function: PrimaryFunction, address: u16, fcb: bool, fcv: bool) -> Ft12Frame {
        Ft12Frame::Fixed {
            control: Control::primary(function, false, fcb, fcv),
            address,
        }
    }

    fn user_data(function: PrimaryFunction, address: u16, fcb: bool, data: &'static [u8]) -> Ft12Frame {
        Ft12Frame::Variable {
            control: Control::primary(function, true, fcb, function == PrimaryFunction::UserDataConfirmed),
            address,
            user_data: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_balanced_user_data_and_repetition() {
        let mut link = SecondaryLink::balanced(1, LinkLayerParameters::default(), false);
        let mut app = Queues::default();
        let mut out = LinkOutput::default();

        link.handle_request(&request(PrimaryFunction::ResetRemoteLink, 1, false, false), &mut app, &mut out);
        assert_eq!(out.frames.pop_front(), Some(Ft12Frame::SingleCharAck));
        assert_eq!(app.resets, vec![false]);

        let first = user_data(PrimaryFunction::UserDataConfirmed, 1, true, b"a");
        link.handle_request(&first, &mut app, &mut out);
        assert_eq!(out.frames.pop_front(), Some(Ft12Frame::SingleCharAck));

        // same FCB again: the ACK was lost, answer again without delivering twice
        link.handle_request(&first, &mut app, &mut out);
        assert_eq!(out.frames.pop_front(), Some(Ft12Frame::SingleCharAck));
        assert_eq!(app.received.len(), 1);

        link.handle_request(&user_data(PrimaryFunction::UserDataConfirmed, 1, false, b"b"), &mut app, &mut out);
        assert_eq!(app.received.len(), 2);
    }

    #[test]
    fn test_link_status_and_test_function() {
        let params = LinkLayerParameters::default().use_single_char_ack(false);
        let mut link = SecondaryLink::balanced(3, params, false);
        let mut app = Queues::default();
        let mut out = LinkOutput::default();

        link.handle_request(&request(PrimaryFunction::RequestLinkStatus, 3, false, false), &mut app, &mut out);
        let status = out.frames.pop_front().unwrap();
        assert_eq!(
            status.control().and_then(|c| c.secondary_function()),
            Some(SecondaryFunction::StatusOfLinkOrAccessDemand)
        );

        link.handle_request(&request(PrimaryFunction::TestFunctionForLink, 3, true, true), &mut app, &mut out);
        let ack = out.frames.pop_front().unwrap();
        assert_eq!(ack.control().and_then(|c| c.secondary_function()), Some(SecondaryFunction::Ack));
        assert_eq!(ack.address(), Some(3));
    }

    #[test]
    fn test_unbalanced_class_polling() {
        let mut link = SecondaryLink::unbalanced(7, LinkLayerParameters::default());
        let mut app = Queues::default();
        let mut out = LinkOutput::default();

        // nothing queued: single character
        link.handle_request(&request(PrimaryFunction::RequestUserDataClass2, 7, true, true), &mut app, &mut out);
        assert_eq!(out.frames.pop_front(), Some(Ft12Frame::SingleCharAck));

        app.class1.push_back(Bytes::from_static(b"e1"));
        app.class1.push_back(Bytes::from_static(b"e2"));
        app.class2.push_back(Bytes::from_static(b"p"));

        link.handle_request(&request(PrimaryFunction::RequestUserDataClass2, 7, false, true), &mut app, &mut out);
        match out.frames.pop_front().unwrap() {
            Ft12Frame::Variable { control, user_data, .. } => {
                assert_eq!(&user_data[..], b"p");
                assert!(control.acd());
            }
            other => panic!("unexpected {:?}", other),
        }

        // class 2 empty: class 1 is served instead
        link.handle_request(&request(PrimaryFunction::RequestUserDataClass2, 7, true, true), &mut app, &mut out);
        match out.frames.pop_front().unwrap() {
            Ft12Frame::Variable { control, user_data, .. } => {
                assert_eq!(&user_data[..], b"e1");
                assert!(control.acd());
            }
            other => panic!("unexpected {:?}", other),
        }

        link.handle_request(&request(PrimaryFunction::RequestUserDataClass1, 7, false, true), &mut app, &mut out);
        match out.frames.pop_front().unwrap() {
            Ft12Frame::Variable { control, user_data, .. } => {
                assert_eq!(&user_data[..], b"e2");
                assert!(!control.acd());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbalanced_addressing() {
        let mut link = SecondaryLink::unbalanced(7, LinkLayerParameters::default());
        let mut app = Queues::default();
        let mut out = LinkOutput::default();

        link.handle_request(&request(PrimaryFunction::RequestLinkStatus, 8, false, false), &mut app, &mut out);
        assert!(out.frames.is_empty());

        link.handle_request(&user_data(PrimaryFunction::UserDataNoReply, 255, false, b"all"), &mut app, &mut out);
        assert!(out.frames.is_empty());
        assert_eq!(app.received, vec![(Bytes::from_static(b"all"), true)]);

        // confirmed user data must not be broadcast
        link.handle_request(&user_data(PrimaryFunction::UserDataConfirmed, 255, true, b"x"), &mut app, &mut out);
        assert!(out.frames.is_empty());
        assert_eq!(app.received.len(), 1);
    }

    #[test]
    fn test_unknown_service() {
        let mut link = SecondaryLink::unbalanced(1, LinkLayerParameters::default());
        let mut app = Queues::default();
        let mut out = LinkOutput::default();
        link.handle_request(
            &Ft12Frame::Fixed {
                control: Control(0x4E),
                address: 1,
            },
            &mut app,
            &mut out,
        );
        let answer = out.frames.pop_front().unwrap();
        assert_eq!(
            answer.control().and_then(|c| c.secondary_function()),
            Some(SecondaryFunction::LinkServiceNotImplemented)
        );
    }
}
