//! Application callbacks and built-in system command handling.
//!
//! Received ASDUs are handed to user code through traits. Every callback
//! answers with [`Handling`]; `Unhandled` lets the ASDU fall through to the
//! next handler and finally to a negative `UNKNOWN_TYPE_ID` confirmation.

use std::net::IpAddr;

use crate::connection::ConnectionId;
use crate::error::Result;
use crate::object::Element;
use crate::types::{ApplicationLayerParameters, Asdu, Cot, Cp16Time2a, Cp56Time2a, TypeId};

/// Outcome of a handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// The ASDU was consumed (and answered where required)
    Handled,
    /// Pass the ASDU on
    Unhandled,
}

impl Handling {
    #[inline]
    pub fn is_handled(self) -> bool {
        self == Self::Handled
    }
}

impl From<bool> for Handling {
    fn from(handled: bool) -> Self {
        if handled {
            Self::Handled
        } else {
            Self::Unhandled
        }
    }
}

/// Receiver of ASDUs on the controlling side (CS104 client, CS101 master).
///
/// `address` is the common address for CS104 and the link address of the
/// slave for CS101. Calls happen on a dispatch task in wire order.
pub trait AsduHandler: Send + Sync + 'static {
    fn handle_asdu(&self, address: u16, asdu: &Asdu) -> Handling;
}

impl<F> AsduHandler for F
where
    F: Fn(u16, &Asdu) -> Handling + Send + Sync + 'static,
{
    fn handle_asdu(&self, address: u16, asdu: &Asdu) -> Handling {
        self(address, asdu)
    }
}

/// Response path of a controlled station towards one master.
pub trait MasterConnection: Send + Sync {
    /// Identifier used in logs and events.
    fn id(&self) -> ConnectionId;

    /// Parameters ASDUs must be built with.
    fn params(&self) -> &ApplicationLayerParameters;

    /// Queue an ASDU with high priority.
    ///
    /// Fails with `NotActive` unless data transfer is started, and with
    /// `QueueOverflow` when the high priority queue is full.
    fn send_asdu(&self, asdu: Asdu) -> Result<()>;

    /// Mirror `asdu` as activation confirmation.
    fn send_act_con(&self, asdu: &Asdu, negative: bool) -> Result<()> {
        self.send_asdu(asdu.mirror(Cot::ActivationConfirm, negative))
    }

    /// Mirror `asdu` as activation termination.
    fn send_act_term(&self, asdu: &Asdu) -> Result<()> {
        self.send_asdu(asdu.mirror(Cot::ActivationTermination, false))
    }
}

/// Callbacks of a controlled station (CS104 server, CS101 slave).
///
/// The system command callbacks are only invoked after the cause of
/// transmission and the IOA (must be 0) were checked. All default to
/// `Unhandled`.
#[allow(unused_variables)]
pub trait ServerHandler: Send + Sync + 'static {
    /// C_IC_NA_1 with cause activation or deactivation.
    fn interrogation(&self, conn: &dyn MasterConnection, asdu: &Asdu, qoi: u8) -> Handling {
        Handling::Unhandled
    }

    /// C_CI_NA_1 with cause activation or deactivation.
    fn counter_interrogation(
        &self,
        conn: &dyn MasterConnection,
        asdu: &Asdu,
        qcc: u8,
    ) -> Handling {
        Handling::Unhandled
    }

    /// C_RD_NA_1 for the object at `ioa`.
    fn read(&self, conn: &dyn MasterConnection, asdu: &Asdu, ioa: u32) -> Handling {
        Handling::Unhandled
    }

    /// C_CS_NA_1. `Handled` accepts the time and is confirmed positively.
    fn clock_sync(&self, conn: &dyn MasterConnection, asdu: &Asdu, time: Cp56Time2a) -> Handling {
        Handling::Unhandled
    }

    /// C_RP_NA_1.
    fn reset_process(&self, conn: &dyn MasterConnection, asdu: &Asdu, qrp: u8) -> Handling {
        Handling::Unhandled
    }

    /// C_CD_NA_1, when delay acquisition is allowed.
    fn delay_acquisition(
        &self,
        conn: &dyn MasterConnection,
        asdu: &Asdu,
        delay: Cp16Time2a,
    ) -> Handling {
        Handling::Unhandled
    }

    /// Any ASDU not consumed above.
    fn asdu(&self, conn: &dyn MasterConnection, asdu: &Asdu) -> Handling {
        Handling::Unhandled
    }
}

/// Accept or reject incoming TCP connections by peer address.
pub trait ConnectionRequestHandler: Send + Sync + 'static {
    fn accept(&self, peer: IpAddr) -> bool;
}

impl<F> ConnectionRequestHandler for F
where
    F: Fn(IpAddr) -> bool + Send + Sync + 'static,
{
    fn accept(&self, peer: IpAddr) -> bool {
        self(peer)
    }
}

/// Which optional system commands a controlled station answers itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemCommandOptions {
    /// Confirm C_TS_NA_1 (not used in IEC 104)
    pub allow_test_command: bool,
    /// Pass C_CD_NA_1 to the handler (not used in IEC 104)
    pub allow_delay_acquisition: bool,
}

impl SystemCommandOptions {
    /// IEC 101 defaults: both commands allowed.
    pub const fn cs101() -> Self {
        Self {
            allow_test_command: true,
            allow_delay_acquisition: true,
        }
    }
}

fn reject(conn: &dyn MasterConnection, asdu: &Asdu, cot: Cot) -> Result<Handling> {
    tracing::debug!(conn = %conn.id(), "{} rejected with {}", asdu.type_id(), cot);
    conn.send_asdu(asdu.mirror(cot, true))?;
    Ok(Handling::Handled)
}

/// Run an ASDU through the built-in system command handling, then the
/// generic handler; answer `UNKNOWN_TYPE_ID` if nobody took it.
pub(crate) fn dispatch_asdu(
    handler: &dyn ServerHandler,
    conn: &dyn MasterConnection,
    asdu: &Asdu,
    options: SystemCommandOptions,
) -> Result<()> {
    if asdu.cot().is_reserved() {
        return reject(conn, asdu, Cot::UnknownCot).map(|_| ());
    }
    if system_command(handler, conn, asdu, options)?.is_handled() {
        return Ok(());
    }
    if handler.asdu(conn, asdu).is_handled() {
        return Ok(());
    }
    reject(conn, asdu, Cot::UnknownTypeId).map(|_| ())
}

fn system_command(
    handler: &dyn ServerHandler,
    conn: &dyn MasterConnection,
    asdu: &Asdu,
    options: SystemCommandOptions,
) -> Result<Handling> {
    let cot = asdu.cot();
    let activation = cot == Cot::Activation;

    match asdu.type_id() {
        TypeId::C_IC_NA_1 | TypeId::C_CI_NA_1 => {
            if !matches!(cot, Cot::Activation | Cot::Deactivation) {
                return reject(conn, asdu, Cot::UnknownCot);
            }
            let io = asdu.element(0)?;
            if io.ioa != 0 {
                return reject(conn, asdu, Cot::UnknownIoa);
            }
            Ok(match io.element {
                Element::Interrogation { qoi } => handler.interrogation(conn, asdu, qoi),
                Element::CounterInterrogation { qcc } => {
                    handler.counter_interrogation(conn, asdu, qcc)
                }
                _ => Handling::Unhandled,
            })
        }

        TypeId::C_RD_NA_1 => {
            if cot != Cot::Request {
                return reject(conn, asdu, Cot::UnknownCot);
            }
            let io = asdu.element(0)?;
            Ok(handler.read(conn, asdu, io.ioa))
        }

        TypeId::C_CS_NA_1 => {
            if !activation {
                return reject(conn, asdu, Cot::UnknownCot);
            }
            let io = asdu.element(0)?;
            if io.ioa != 0 {
                return reject(conn, asdu, Cot::UnknownIoa);
            }
            let Element::ClockSync { time } = io.element else {
                return Ok(Handling::Unhandled);
            };
            if handler.clock_sync(conn, asdu, time).is_handled() {
                conn.send_act_con(asdu, false)?;
                return Ok(Handling::Handled);
            }
            Ok(Handling::Unhandled)
        }

        TypeId::C_TS_NA_1 if options.allow_test_command => {
            if !activation {
                return reject(conn, asdu, Cot::UnknownCot);
            }
            if asdu.element(0)?.ioa != 0 {
                return reject(conn, asdu, Cot::UnknownIoa);
            }
            conn.send_act_con(asdu, false)?;
            Ok(Handling::Handled)
        }

        TypeId::C_RP_NA_1 => {
            if !activation {
                return reject(conn, asdu, Cot::UnknownCot);
            }
            let io = asdu.element(0)?;
            if io.ioa != 0 {
                return reject(conn, asdu, Cot::UnknownIoa);
            }
            Ok(match io.element {
                Element::ResetProcess { qrp } => handler.reset_process(conn, asdu, qrp),
                _ => Handling::Unhandled,
            })
        }

        TypeId::C_CD_NA_1 if options.allow_delay_acquisition => {
            if !matches!(cot, Cot::Activation | Cot::Spontaneous) {
                return reject(conn, asdu, Cot::UnknownCot);
            }
            let io = asdu.element(0)?;
            if io.ioa != 0 {
                return reject(conn, asdu, Cot::UnknownIoa);
            }
            Ok(match io.element {
                Element::DelayAcquisition { delay } => handler.delay_acquisition(conn, asdu, delay),
                _ => Handling::Unhandled,
            })
        }

        TypeId::C_TS_TA_1 => {
            if !activation {
                return reject(conn, asdu, Cot::UnknownCot);
            }
            if asdu.element(0)?.ioa != 0 {
                return reject(conn, asdu, Cot::UnknownIoa);
            }
            conn.send_act_con(asdu, false)?;
            Ok(Handling::Handled)
        }

        _ => Ok(Handling::Unhandled),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::object::InformationObject;

    /// Collects everything sent through it.
    pub(crate) struct RecordingConnection {
        params: ApplicationLayerParameters,
        pub(crate) sent: Mutex<Vec<Asdu>>,
    }

    impl RecordingConnection {
        pub(crate) fn new() -> Self {
            Self {
                params: ApplicationLayerParameters::iec104(),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn take(&self) -> Vec<Asdu> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl MasterConnection for RecordingConnection {
        fn id(&self) -> ConnectionId {
            ConnectionId(0)
        }

        fn params(&self) -> &ApplicationLayerParameters {
            &self.params
        }

        fn send_asdu(&self, asdu: Asdu) -> Result<()> {
            self.sent.lock().push(asdu);
            Ok(())
        }
    }

    struct Station;

    impl ServerHandler for Station {
        fn interrogation(&self, conn: &dyn MasterConnection, asdu: &Asdu, _qoi: u8) -> Handling {
            conn.send_act_con(asdu, false).unwrap();
            conn.send_act_term(asdu).unwrap();
            Handling::Handled
        }

        fn clock_sync(&self, _: &dyn MasterConnection, _: &Asdu, _: Cp56Time2a) -> Handling {
            Handling::Handled
        }
    }

    fn command(cot: Cot, ioa: u32, element: Element) -> Asdu {
        Asdu::with_object(
            &ApplicationLayerParameters::iec104(),
            cot,
            1,
            InformationObject::new(ioa, element),
        )
        .unwrap()
    }

    fn run(asdu: &Asdu, options: SystemCommandOptions) -> Vec<Asdu> {
        let conn = RecordingConnection::new();
        dispatch_asdu(&Station, &conn, asdu, options).unwrap();
        conn.take()
    }

    #[test]
    fn test_interrogation_reaches_handler() {
        let sent = run(
            &command(Cot::Activation, 0, Element::Interrogation { qoi: 20 }),
            SystemCommandOptions::default(),
        );
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].cot(), Cot::ActivationConfirm);
        assert_eq!(sent[1].cot(), Cot::ActivationTermination);
    }

    #[test]
    fn test_wrong_cot_rejected() {
        let sent = run(
            &command(Cot::Spontaneous, 0, Element::Interrogation { qoi: 20 }),
            SystemCommandOptions::default(),
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].cot(), Cot::UnknownCot);
        assert!(sent[0].is_negative());
    }

    #[test]
    fn test_reserved_cot_rejected() {
        let sent = run(
            &command(Cot::Reserved(42), 0, Element::Interrogation { qoi: 20 }),
            SystemCommandOptions::default(),
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].type_id(), TypeId::C_IC_NA_1);
        assert_eq!(sent[0].cot(), Cot::UnknownCot);
        assert!(sent[0].is_negative());
    }

    #[test]
    fn test_nonzero_ioa_rejected() {
        let sent = run(
            &command(Cot::Activation, 5, Element::Interrogation { qoi: 20 }),
            SystemCommandOptions::default(),
        );
        assert_eq!(sent[0].cot(), Cot::UnknownIoa);
        assert!(sent[0].is_negative());
    }

    #[test]
    fn test_clock_sync_confirmed() {
        let sent = run(
            &command(
                Cot::Activation,
                0,
                Element::ClockSync {
                    time: Cp56Time2a::default(),
                },
            ),
            SystemCommandOptions::default(),
        );
        assert_eq!(sent[0].cot(), Cot::ActivationConfirm);
        assert!(!sent[0].is_negative());
    }

    #[test]
    fn test_test_command_depends_on_options() {
        let asdu = command(Cot::Activation, 0, Element::test_command());

        let sent = run(&asdu, SystemCommandOptions::default());
        assert_eq!(sent[0].cot(), Cot::UnknownTypeId);
        assert!(sent[0].is_negative());

        let sent = run(&asdu, SystemCommandOptions::cs101());
        assert_eq!(sent[0].cot(), Cot::ActivationConfirm);
        assert!(!sent[0].is_negative());
    }

    #[test]
    fn test_unhandled_type_rejected() {
        let sent = run(
            &command(Cot::Activation, 0, Element::ResetProcess { qrp: 1 }),
            SystemCommandOptions::default(),
        );
        assert_eq!(sent[0].type_id(), TypeId::C_RP_NA_1);
        assert_eq!(sent[0].cot(), Cot::UnknownTypeId);
    }

    #[test]
    fn test_handling_from_bool() {
        assert_eq!(Handling::from(true), Handling::Handled);
        assert!(!Handling::from(false).is_handled());
    }
}
