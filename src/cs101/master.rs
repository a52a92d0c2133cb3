//! CS101 master (controlling station).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::{check_asdu_fits, decode_user_data, encode_user_data, write_frames, Cs101Event};
use crate::connection::{ConnectionId, ConnectionIdAllocator, SERVICE_INTERVAL};
use crate::error::{Iec60870Error, Result};
use crate::file::{FileClient, FileProvider, FileReceiver, DEFAULT_FILE_TIMEOUT};
use crate::handler::AsduHandler;
use crate::link::{
    DataClass, Ft12Codec, Ft12Frame, LinkLayerMode, LinkLayerParameters, LinkLayerState, LinkOutput,
    PrimaryEvent, PrimaryLink, SecondaryApplication, SecondaryLink, UnbalancedPrimary,
    MAX_PENDING_USER_DATA,
};
use crate::object::{Element, InformationObject, NameOfFile};
use crate::types::{ApplicationLayerParameters, Asdu, Cot, Cp16Time2a, Cp56Time2a, PrivateTypeRegistry};

/// Master configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cs101MasterConfig {
    pub mode: LinkLayerMode,
    pub link: LinkLayerParameters,
    pub app: ApplicationLayerParameters,
    /// Own link address, used by the secondary of a balanced master
    pub own_address: u16,
    /// Link address of the slave on a balanced line and the initially
    /// selected slave
    pub remote_address: u16,
    /// File transfer watchdog
    pub file_timeout: Duration,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub private_types: Option<Arc<PrivateTypeRegistry>>,
}

impl Default for Cs101MasterConfig {
    fn default() -> Self {
        Self {
            mode: LinkLayerMode::Balanced,
            link: LinkLayerParameters::default(),
            app: ApplicationLayerParameters::iec101(),
            own_address: 1,
            remote_address: 2,
            file_timeout: DEFAULT_FILE_TIMEOUT,
            private_types: None,
        }
    }
}

impl Cs101MasterConfig {
    pub fn mode(mut self, mode: LinkLayerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn link_layer(mut self, link: LinkLayerParameters) -> Self {
        self.link = link;
        self
    }

    pub fn application_layer(mut self, app: ApplicationLayerParameters) -> Self {
        self.app = app;
        self
    }

    pub fn own_address(mut self, address: u16) -> Self {
        self.own_address = address;
        self
    }

    pub fn remote_address(mut self, address: u16) -> Self {
        self.remote_address = address;
        self
    }

    pub fn file_timeout(mut self, timeout: Duration) -> Self {
        self.file_timeout = timeout;
        self
    }

    pub fn private_types(mut self, registry: Arc<PrivateTypeRegistry>) -> Self {
        self.private_types = Some(registry);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        self.app.validate()?;
        check_asdu_fits(&self.app, &self.link)?;
        if self.mode == LinkLayerMode::Unbalanced && self.link.address_length == 0 {
            return Err(Iec60870Error::invalid_parameter(
                "an unbalanced line needs link addresses",
            ));
        }
        let max = self.link.max_address();
        if self.own_address > max || self.remote_address > max {
            return Err(Iec60870Error::invalid_parameter(format!(
                "link address exceeds {} for {} address octets",
                max, self.link.address_length
            )));
        }
        Ok(())
    }
}

enum MasterCommand {
    Send(Asdu, oneshot::Sender<Result<()>>),
    AddSlave(u16, oneshot::Sender<Result<()>>),
    UseSlave(u16),
    Request(u16, DataClass, oneshot::Sender<Result<()>>),
    TestFunction(u16, oneshot::Sender<Result<()>>),
    LinkState(u16, oneshot::Sender<Result<LinkLayerState>>),
    GetFile {
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        receiver: Box<dyn FileReceiver>,
        reply: oneshot::Sender<Result<()>>,
    },
    SendFile {
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        provider: Arc<dyn FileProvider>,
        reply: oneshot::Sender<Result<()>>,
    },
    GetDirectory(u16, oneshot::Sender<Result<()>>),
}

enum MasterLink {
    Balanced {
        primary: PrimaryLink,
        secondary: SecondaryLink,
        queue: VecDeque<Bytes>,
    },
    Unbalanced(UnbalancedPrimary),
}

impl MasterLink {
    fn enqueue(&mut self, address: u16, data: Bytes) -> Result<()> {
        match self {
            Self::Balanced { queue, .. } => {
                if queue.len() >= MAX_PENDING_USER_DATA {
                    return Err(Iec60870Error::LinkLayerBusy);
                }
                queue.push_back(data);
                Ok(())
            }
            Self::Unbalanced(primary) => primary.enqueue(address, data),
        }
    }

    fn has_room(&self, address: u16) -> bool {
        match self {
            Self::Balanced { queue, .. } => queue.len() < MAX_PENDING_USER_DATA,
            Self::Unbalanced(primary) => primary.has_room(address),
        }
    }

    fn link_state(&self, address: u16) -> Result<LinkLayerState> {
        match self {
            Self::Balanced { primary, .. } if primary.address() == address => Ok(primary.link_state()),
            Self::Balanced { .. } => Err(Iec60870Error::invalid_parameter(format!(
                "{} is not the remote station",
                address
            ))),
            Self::Unbalanced(primary) => primary
                .link_state(address)
                .ok_or_else(|| Iec60870Error::invalid_parameter(format!("unknown slave address {}", address))),
        }
    }

    fn run(&mut self, now: Instant, out: &mut LinkOutput) {
        match self {
            Self::Balanced { primary, queue, .. } => primary.run(now, || queue.pop_front(), out),
            Self::Unbalanced(primary) => primary.run(now, out),
        }
    }
}

/// User data arriving at the master: file service first, then the handler.
struct Inbound<'a> {
    id: ConnectionId,
    address: u16,
    app: &'a ApplicationLayerParameters,
    registry: &'a Option<Arc<PrivateTypeRegistry>>,
    files: &'a mut FileClient,
    dispatch: &'a mpsc::UnboundedSender<(u16, Asdu)>,
    now: Instant,
}

impl Inbound<'_> {
    fn deliver(&mut self, data: Bytes) {
        let Some(asdu) = decode_user_data(self.id, data, self.app, self.registry) else {
            return;
        };
        if self.files.handle_asdu(&asdu, self.now).is_handled() {
            return;
        }
        if self.dispatch.send((self.address, asdu)).is_err() {
            tracing::debug!(conn = %self.id, "dispatch task gone");
        }
    }
}

impl SecondaryApplication for Inbound<'_> {
    fn user_data(&mut self, data: Bytes, _broadcast: bool) {
        self.deliver(data);
    }
}

struct MasterTask {
    id: ConnectionId,
    app: ApplicationLayerParameters,
    link_params: LinkLayerParameters,
    registry: Option<Arc<PrivateTypeRegistry>>,
    link: MasterLink,
    selected: u16,
    files: FileClient,
    out: LinkOutput,
    dispatch: mpsc::UnboundedSender<(u16, Asdu)>,
    events: mpsc::Sender<Cs101Event>,
}

impl MasterTask {
    fn emit(&self, event: Cs101Event) {
        if self.events.try_send(event).is_err() {
            tracing::debug!(conn = %self.id, ?event, "event dropped");
        }
    }

    fn send(&mut self, asdu: &Asdu) -> Result<()> {
        let data = encode_user_data(asdu, &self.link_params)?;
        self.link.enqueue(self.selected, data)
    }

    /// Move file service output to the selected slave while it has room.
    fn pull_files(&mut self, now: Instant) {
        while self.link.has_room(self.selected) {
            let asdu = match self.files.poll_transmit() {
                Some(asdu) => asdu,
                None if self.files.is_transmitting() => {
                    self.files.tick(now);
                    match self.files.poll_transmit() {
                        Some(asdu) => asdu,
                        None => break,
                    }
                }
                None => break,
            };
            if let Err(e) = self.send(&asdu) {
                tracing::warn!(conn = %self.id, error = %e, "file service ASDU not sent");
                break;
            }
        }
    }

    fn service(&mut self, now: Instant) {
        self.pull_files(now);
        self.link.run(now, &mut self.out);
        self.route_events(now);
    }

    fn route_events(&mut self, now: Instant) {
        while let Some(event) = self.out.events.pop_front() {
            match event {
                PrimaryEvent::StateChanged { address, state } => {
                    tracing::info!(conn = %self.id, address, state = %state, "link layer state changed");
                    self.emit(Cs101Event::LinkStateChanged { address, state });
                }
                PrimaryEvent::UserData { address, data } => Inbound {
                    id: self.id,
                    address,
                    app: &self.app,
                    registry: &self.registry,
                    files: &mut self.files,
                    dispatch: &self.dispatch,
                    now,
                }
                .deliver(data),
                PrimaryEvent::AccessDemand { address } => {
                    if let MasterLink::Unbalanced(primary) = &mut self.link {
                        let _ = primary.request_class(address, DataClass::Class1);
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Ft12Frame, now: Instant) {
        let from_primary = frame.control().is_some_and(|c| c.prm());
        let mut inbound = Inbound {
            id: self.id,
            address: self.selected,
            app: &self.app,
            registry: &self.registry,
            files: &mut self.files,
            dispatch: &self.dispatch,
            now,
        };
        match &mut self.link {
            MasterLink::Balanced { primary, secondary, .. } => {
                if from_primary {
                    secondary.handle_request(&frame, &mut inbound, &mut self.out);
                } else {
                    primary.handle_response(&frame, now, &mut self.out);
                }
            }
            MasterLink::Unbalanced(primary) => {
                if !from_primary {
                    primary.handle_response(&frame, now, &mut self.out);
                }
            }
        }
        self.route_events(now);
    }

    fn command(&mut self, command: MasterCommand, now: Instant) {
        match command {
            MasterCommand::Send(asdu, reply) => {
                let _ = reply.send(self.send(&asdu));
            }
            MasterCommand::AddSlave(address, reply) => {
                let result = match &mut self.link {
                    MasterLink::Unbalanced(primary) => {
                        if primary.add_slave(address, now) {
                            tracing::debug!(conn = %self.id, address, "slave added");
                        }
                        Ok(())
                    }
                    MasterLink::Balanced { .. } => Err(Iec60870Error::invalid_parameter(
                        "slaves are only added on an unbalanced line",
                    )),
                };
                let _ = reply.send(result);
            }
            MasterCommand::UseSlave(address) => self.selected = address,
            MasterCommand::Request(address, class, reply) => {
                let result = match &mut self.link {
                    MasterLink::Unbalanced(primary) => primary.request_class(address, class),
                    MasterLink::Balanced { .. } => Err(Iec60870Error::invalid_parameter(
                        "class requests are only sent on an unbalanced line",
                    )),
                };
                let _ = reply.send(result);
            }
            MasterCommand::TestFunction(address, reply) => {
                let result = match &mut self.link {
                    MasterLink::Balanced { primary, .. } => {
                        primary.send_test_function();
                        Ok(())
                    }
                    MasterLink::Unbalanced(primary) => primary.send_test_function(address),
                };
                let _ = reply.send(result);
            }
            MasterCommand::LinkState(address, reply) => {
                let _ = reply.send(self.link.link_state(address));
            }
            MasterCommand::GetFile {
                ca,
                ioa,
                nof,
                receiver,
                reply,
            } => {
                let _ = reply.send(self.files.request_file(ca, ioa, nof, receiver, now));
            }
            MasterCommand::SendFile {
                ca,
                ioa,
                nof,
                provider,
                reply,
            } => {
                let _ = reply.send(self.files.send_file(ca, ioa, nof, provider, now));
            }
            MasterCommand::GetDirectory(ca, reply) => {
                let _ = reply.send(self.files.request_directory(ca));
            }
        }
    }

    async fn drive<T>(
        &mut self,
        framed: &mut Framed<T, Ft12Codec>,
        commands: &mut mpsc::Receiver<MasterCommand>,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut tick = interval(SERVICE_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.service(Instant::now());
            write_frames(framed, &mut self.out).await?;

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),

                frame = framed.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame, Instant::now()),
                    Some(Err(e)) => return Err(e),
                    None => return Err(Iec60870Error::Connection("line closed".into())),
                },

                command = commands.recv() => match command {
                    Some(command) => self.command(command, Instant::now()),
                    None => return Ok(()),
                },

                _ = tick.tick() => self.files.tick(Instant::now()),
            }
        }
    }
}

async fn run<T>(io: T, mut task: MasterTask, mut commands: mpsc::Receiver<MasterCommand>, cancel: CancellationToken)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, Ft12Codec::new(task.link_params.address_length));
    match task.drive(&mut framed, &mut commands, &cancel).await {
        Ok(()) => tracing::debug!(conn = %task.id, "master stopped"),
        Err(e) => tracing::warn!(conn = %task.id, error = %e, "master stopped"),
    }
    task.files.close();
    task.emit(Cs101Event::Stopped);
}

async fn dispatch(id: ConnectionId, handler: Arc<dyn AsduHandler>, mut rx: mpsc::UnboundedReceiver<(u16, Asdu)>) {
    while let Some((address, asdu)) = rx.recv().await {
        if !handler.handle_asdu(address, &asdu).is_handled() {
            tracing::debug!(conn = %id, address, type_id = %asdu.type_id(), cot = ?asdu.cot(), "unhandled ASDU");
        }
    }
}

/// IEC 60870-5-101 master on one serial line.
///
/// In balanced mode the master talks to the single station at
/// `remote_address` and the link is set up right away. In unbalanced mode
/// slaves are registered with [`Cs101Master::add_slave`] and only answer
/// when polled; data a slave holds is fetched with
/// [`Cs101Master::poll_single_slave`] (class 2) and
/// [`Cs101Master::request_class1_data`]. Class 1 data announced with ACD is
/// requested automatically.
pub struct Cs101Master {
    id: ConnectionId,
    config: Cs101MasterConfig,
    commands: mpsc::Sender<MasterCommand>,
    event_rx: Option<mpsc::Receiver<Cs101Event>>,
    cancel: CancellationToken,
}

impl Cs101Master {
    /// Start the master on `io`. Received ASDUs go to `handler` with the
    /// link address of the slave.
    pub fn start<T>(io: T, config: Cs101MasterConfig, handler: impl AsduHandler) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;
        // one line per master
        let id = ConnectionIdAllocator::default().next();
        let now = Instant::now();

        let link = match config.mode {
            LinkLayerMode::Balanced => MasterLink::Balanced {
                primary: PrimaryLink::balanced(config.remote_address, config.link, true, now),
                secondary: SecondaryLink::balanced(config.own_address, config.link, true),
                queue: VecDeque::new(),
            },
            LinkLayerMode::Unbalanced => MasterLink::Unbalanced(UnbalancedPrimary::new(config.link)),
        };

        let (event_tx, event_rx) = mpsc::channel(100);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = MasterTask {
            id,
            app: config.app,
            link_params: config.link,
            registry: config.private_types.clone(),
            link,
            selected: config.remote_address,
            files: FileClient::new(id, config.app).with_timeout(config.file_timeout),
            out: LinkOutput::default(),
            dispatch: dispatch_tx,
            events: event_tx,
        };

        tracing::info!(conn = %id, mode = ?config.mode, "CS101 master started");
        tokio::spawn(dispatch(id, Arc::new(handler), dispatch_rx));
        tokio::spawn(run(io, task, cmd_rx, cancel.clone()));

        Ok(Self {
            id,
            config,
            commands: cmd_tx,
            event_rx: Some(event_rx),
            cancel,
        })
    }

    /// Subscribe to link layer events. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<Cs101Event>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &Cs101MasterConfig {
        &self.config
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop the line task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn command(&self, command: MasterCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| Iec60870Error::ChannelClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> MasterCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx)).await?;
        rx.await.map_err(|_| Iec60870Error::ChannelClosed)
    }

    /// Register a slave of an unbalanced line.
    pub async fn add_slave(&self, address: u16) -> Result<()> {
        self.request(|reply| MasterCommand::AddSlave(address, reply)).await?
    }

    /// Slave that `send_asdu` and the file service address.
    pub async fn use_slave_address(&self, address: u16) -> Result<()> {
        self.command(MasterCommand::UseSlave(address)).await
    }

    /// Request class 2 data from a slave.
    pub async fn poll_single_slave(&self, address: u16) -> Result<()> {
        self.request(|reply| MasterCommand::Request(address, DataClass::Class2, reply))
            .await?
    }

    pub async fn request_class1_data(&self, address: u16) -> Result<()> {
        self.request(|reply| MasterCommand::Request(address, DataClass::Class1, reply))
            .await?
    }

    /// Send the link test function (balanced lines ignore `address`).
    pub async fn send_link_layer_test_function(&self, address: u16) -> Result<()> {
        self.request(|reply| MasterCommand::TestFunction(address, reply)).await?
    }

    pub async fn link_layer_state(&self, address: u16) -> Result<LinkLayerState> {
        self.request(|reply| MasterCommand::LinkState(address, reply)).await?
    }

    /// Queue an ASDU for the selected slave.
    ///
    /// Fails with `LinkLayerBusy` while earlier user data still waits for
    /// the line.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        self.request(|reply| MasterCommand::Send(asdu, reply)).await?
    }

    fn command_asdu(&self, cot: Cot, ca: u16, object: InformationObject) -> Result<Asdu> {
        Asdu::with_object(&self.config.app, cot, ca, object)
    }

    /// Send interrogation command (C_IC_NA_1).
    pub async fn interrogation(&self, cot: Cot, ca: u16, qoi: u8) -> Result<()> {
        let asdu = self.command_asdu(cot, ca, InformationObject::new(0, Element::Interrogation { qoi }))?;
        self.send_asdu(asdu).await
    }

    /// Send counter interrogation command (C_CI_NA_1).
    pub async fn counter_interrogation(&self, cot: Cot, ca: u16, qcc: u8) -> Result<()> {
        let asdu = self.command_asdu(cot, ca, InformationObject::new(0, Element::CounterInterrogation { qcc }))?;
        self.send_asdu(asdu).await
    }

    /// Send read command (C_RD_NA_1).
    pub async fn read(&self, ca: u16, ioa: u32) -> Result<()> {
        let asdu = self.command_asdu(Cot::Request, ca, InformationObject::new(ioa, Element::Read))?;
        self.send_asdu(asdu).await
    }

    /// Send clock synchronization command (C_CS_NA_1).
    pub async fn clock_sync(&self, ca: u16, time: Cp56Time2a) -> Result<()> {
        let asdu = self.command_asdu(Cot::Activation, ca, InformationObject::new(0, Element::ClockSync { time }))?;
        self.send_asdu(asdu).await
    }

    /// Send test command (C_TS_NA_1).
    pub async fn test_command(&self, ca: u16) -> Result<()> {
        let asdu = self.command_asdu(Cot::Activation, ca, InformationObject::new(0, Element::test_command()))?;
        self.send_asdu(asdu).await
    }

    /// Send reset process command (C_RP_NA_1).
    pub async fn reset_process(&self, ca: u16, qrp: u8) -> Result<()> {
        let asdu = self.command_asdu(Cot::Activation, ca, InformationObject::new(0, Element::ResetProcess { qrp }))?;
        self.send_asdu(asdu).await
    }

    /// Send delay acquisition command (C_CD_NA_1).
    pub async fn delay_acquisition(&self, ca: u16, delay: Cp16Time2a) -> Result<()> {
        let asdu = self.command_asdu(
            Cot::Activation,
            ca,
            InformationObject::new(0, Element::DelayAcquisition { delay }),
        )?;
        self.send_asdu(asdu).await
    }

    /// Send a process command or setpoint.
    pub async fn control_command(&self, cot: Cot, ca: u16, command: InformationObject) -> Result<()> {
        let asdu = self.command_asdu(cot, ca, command)?;
        self.send_asdu(asdu).await
    }

    /// Download a file from the selected slave.
    pub async fn get_file(&self, ca: u16, ioa: u32, nof: NameOfFile, receiver: Box<dyn FileReceiver>) -> Result<()> {
        self.request(|reply| MasterCommand::GetFile {
            ca,
            ioa,
            nof,
            receiver,
            reply,
        })
        .await?
    }

    /// Upload a file to the selected slave.
    pub async fn send_file(&self, ca: u16, ioa: u32, nof: NameOfFile, provider: Arc<dyn FileProvider>) -> Result<()> {
        self.request(|reply| MasterCommand::SendFile {
            ca,
            ioa,
            nof,
            provider,
            reply,
        })
        .await?
    }

    /// Request the file directory; entries arrive at the ASDU handler.
    pub async fn get_directory(&self, ca: u16) -> Result<()> {
        self.request(|reply| MasterCommand::GetDirectory(ca, reply)).await?
    }
}

impl Drop for Cs101Master {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
