//! IEC 60870-5-101 master and slave.
//!
//! One task per serial line owns the FT1.2 framing and the link procedures
//! of [`crate::link`]; received ASDUs are handed to a dispatch task in
//! order. The line is any `AsyncRead + AsyncWrite`: a serial port stream,
//! a terminal server connection or an in-memory pipe.

mod master;
mod slave;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::connection::ConnectionId;
use crate::error::{Iec60870Error, Result};
use crate::link::{Ft12Codec, LinkLayerParameters, LinkLayerState, LinkOutput};
use crate::types::{ApplicationLayerParameters, Asdu, PrivateTypeRegistry};

pub use master::{Cs101Master, Cs101MasterConfig};
pub use slave::{Cs101Slave, Cs101SlaveConfig, DEFAULT_CLASS_QUEUE_SIZE};

/// Events of a CS101 master or slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cs101Event {
    /// The primary link towards `address` changed state
    LinkStateChanged { address: u16, state: LinkLayerState },
    /// The line task ended
    Stopped,
}

/// Largest ASDU a variable frame can carry.
fn max_user_data(link: &LinkLayerParameters) -> usize {
    255 - 1 - link.address_length
}

fn check_asdu_fits(app: &ApplicationLayerParameters, link: &LinkLayerParameters) -> Result<()> {
    if app.max_asdu_length > max_user_data(link) {
        return Err(Iec60870Error::invalid_parameter(format!(
            "maximum ASDU length {} exceeds the {} bytes of a variable frame",
            app.max_asdu_length,
            max_user_data(link)
        )));
    }
    Ok(())
}

fn encode_user_data(asdu: &Asdu, link: &LinkLayerParameters) -> Result<Bytes> {
    if asdu.encoded_len() > max_user_data(link) {
        return Err(Iec60870Error::invalid_asdu(format!(
            "{} bytes do not fit a variable frame",
            asdu.encoded_len()
        )));
    }
    Ok(asdu.to_bytes())
}

fn decode_user_data(
    conn: ConnectionId,
    data: Bytes,
    params: &ApplicationLayerParameters,
    registry: &Option<std::sync::Arc<PrivateTypeRegistry>>,
) -> Option<Asdu> {
    match Asdu::decode(data, params, registry.clone()) {
        Ok(asdu) => Some(asdu),
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "invalid ASDU in user data");
            None
        }
    }
}

async fn write_frames<T>(framed: &mut Framed<T, Ft12Codec>, out: &mut LinkOutput) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut wrote = false;
    while let Some(frame) = out.frames.pop_front() {
        framed.feed(frame).await?;
        wrote = true;
    }
    if wrote {
        framed.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::io::duplex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::handler::{Handling, MasterConnection, ServerHandler};
    use crate::link::LinkLayerMode;
    use crate::object::{Element, InformationObject};
    use crate::server::ServerHandlers;
    use crate::types::{Cot, QualityDescriptor, TypeId};

    struct Outstation;

    impl ServerHandler for Outstation {
        fn interrogation(&self, conn: &dyn MasterConnection, asdu: &Asdu, _qoi: u8) -> Handling {
            let _ = conn.send_act_con(asdu, false);
            if let Ok(point) = Asdu::with_object(
                conn.params(),
                Cot::InterrogatedByStation,
                asdu.common_address(),
                InformationObject::new(100, Element::single_point(true, QualityDescriptor::GOOD)),
            ) {
                let _ = conn.send_asdu(point);
            }
            let _ = conn.send_act_term(asdu);
            Handling::Handled
        }
    }

    type Log = Arc<Mutex<Vec<(u16, TypeId, Cot)>>>;

    fn recording(log: Log) -> impl Fn(u16, &Asdu) -> Handling + Send + Sync + 'static {
        move |address: u16, asdu: &Asdu| {
            log.lock().push((address, asdu.type_id(), asdu.cot()));
            Handling::Handled
        }
    }

    async fn wait_for(log: &Log, count: usize) {
        while log.lock().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_available(events: &mut mpsc::Receiver<Cs101Event>, address: u16) {
        while let Some(event) = events.recv().await {
            if event
                == (Cs101Event::LinkStateChanged {
                    address,
                    state: LinkLayerState::Available,
                })
            {
                return;
            }
        }
        panic!("event channel closed");
    }

    fn point(app: &ApplicationLayerParameters, ioa: u32) -> Asdu {
        Asdu::with_object(
            app,
            Cot::Spontaneous,
            1,
            InformationObject::new(ioa, Element::single_point(true, QualityDescriptor::GOOD)),
        )
        .unwrap()
    }

    #[test]
    fn test_asdu_must_fit_frame() {
        let link = LinkLayerParameters::default();
        assert_eq!(max_user_data(&link), 253);
        assert!(check_asdu_fits(&ApplicationLayerParameters::iec101(), &link).is_ok());
        let big = ApplicationLayerParameters::iec101().max_asdu_length(254);
        assert!(check_asdu_fits(&big, &link).is_err());
    }

    #[tokio::test]
    async fn test_balanced_interrogation() {
        let (a, b) = duplex(4096);
        let log: Log = Arc::default();

        let _slave = Cs101Slave::start(b, Cs101SlaveConfig::default(), ServerHandlers::new(Outstation)).unwrap();
        let mut master = Cs101Master::start(a, Cs101MasterConfig::default(), recording(log.clone())).unwrap();
        let mut events = master.subscribe().unwrap();
        wait_available(&mut events, 2).await;
        assert_eq!(master.link_layer_state(2).await.unwrap(), LinkLayerState::Available);

        master.interrogation(Cot::Activation, 1, 20).await.unwrap();
        wait_for(&log, 3).await;
        assert_eq!(
            *log.lock(),
            vec![
                (2, TypeId::C_IC_NA_1, Cot::ActivationConfirm),
                (2, TypeId::M_SP_NA_1, Cot::InterrogatedByStation),
                (2, TypeId::C_IC_NA_1, Cot::ActivationTermination),
            ]
        );
    }

    #[tokio::test]
    async fn test_balanced_slave_sends_spontaneous_data() {
        let (a, b) = duplex(4096);
        let log: Log = Arc::default();

        let slave = Cs101Slave::start(b, Cs101SlaveConfig::default(), ServerHandlers::new(Outstation)).unwrap();
        let _master = Cs101Master::start(a, Cs101MasterConfig::default(), recording(log.clone())).unwrap();

        let app = ApplicationLayerParameters::iec101();
        slave.enqueue_user_data_class2(point(&app, 7)).unwrap();
        slave.enqueue_user_data_class1(point(&app, 8)).unwrap();
        wait_for(&log, 2).await;
        // class 1 leaves first
        assert_eq!(log.lock()[0], (2, TypeId::M_SP_NA_1, Cot::Spontaneous));
        assert_eq!(slave.link_layer_state(), LinkLayerState::Available);
    }

    #[tokio::test]
    async fn test_unbalanced_polling_and_access_demand() {
        let (a, b) = duplex(4096);
        let log: Log = Arc::default();

        let slave_config = Cs101SlaveConfig::default().mode(LinkLayerMode::Unbalanced).address(3);
        let slave = Cs101Slave::start(b, slave_config, ServerHandlers::new(Outstation)).unwrap();
        let master_config = Cs101MasterConfig::default().mode(LinkLayerMode::Unbalanced);
        let mut master = Cs101Master::start(a, master_config, recording(log.clone())).unwrap();
        let mut events = master.subscribe().unwrap();

        master.add_slave(3).await.unwrap();
        wait_available(&mut events, 3).await;

        let app = ApplicationLayerParameters::iec101();
        slave.enqueue_user_data_class2(point(&app, 1)).unwrap();
        slave.enqueue_user_data_class1(point(&app, 2)).unwrap();

        // the class 2 answer carries ACD, class 1 is then fetched unasked
        master.poll_single_slave(3).await.unwrap();
        wait_for(&log, 2).await;
        assert!(log.lock().iter().all(|entry| entry.0 == 3));
        assert!(slave.is_class1_queue_empty());
    }

    #[tokio::test]
    async fn test_unbalanced_command_answered_by_polling() {
        let (a, b) = duplex(4096);
        let log: Log = Arc::default();

        let slave_config = Cs101SlaveConfig::default().mode(LinkLayerMode::Unbalanced).address(3);
        let _slave = Cs101Slave::start(b, slave_config, ServerHandlers::new(Outstation)).unwrap();
        let master_config = Cs101MasterConfig::default().mode(LinkLayerMode::Unbalanced);
        let mut master = Cs101Master::start(a, master_config, recording(log.clone())).unwrap();
        let mut events = master.subscribe().unwrap();
        master.add_slave(3).await.unwrap();
        master.use_slave_address(3).await.unwrap();
        wait_available(&mut events, 3).await;

        master.interrogation(Cot::Activation, 1, 20).await.unwrap();
        while log.lock().len() < 3 {
            master.request_class1_data(3).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(log.lock()[0], (3, TypeId::C_IC_NA_1, Cot::ActivationConfirm));
        assert_eq!(log.lock()[2], (3, TypeId::C_IC_NA_1, Cot::ActivationTermination));
    }

    #[tokio::test]
    async fn test_master_reports_error_without_slave() {
        tokio::time::pause();
        let (a, _b) = duplex(4096);
        let mut master =
            Cs101Master::start(a, Cs101MasterConfig::default(), |_: u16, _: &Asdu| Handling::Handled).unwrap();
        let mut events = master.subscribe().unwrap();
        assert_eq!(
            events.recv().await,
            Some(Cs101Event::LinkStateChanged {
                address: 2,
                state: LinkLayerState::Error
            })
        );
    }
}
