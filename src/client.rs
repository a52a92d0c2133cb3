//! IEC 60870-5-104 client (controlling station).
//!
//! The client runs each TCP connection on its own task (see
//! [`crate::connection`]). The [`Iec104Client`] handle talks to that task
//! through a command channel, so every method takes `&self` and can be used
//! from several tasks at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::codec::Iec104Codec;
use crate::connection::{self, ConnectionId, ConnectionIdAllocator, ConnectionParts, Station};
use crate::error::{Iec60870Error, Result};
use crate::file::{FileClient, FileProvider, FileReceiver, DEFAULT_FILE_TIMEOUT};
use crate::handler::{AsduHandler, Handling};
use crate::object::{Element, InformationObject, NameOfFile};
use crate::queue::{AsduFifo, QueueMark};
use crate::session::{ConnectionStatistics, Role, Session, SessionEvent};
use crate::types::{
    ApciParameters, ApplicationLayerParameters, Asdu, Cot, Cp16Time2a, Cp56Time2a,
    PrivateTypeRegistry, DEFAULT_PORT,
};

/// Default size of the queue for ASDUs waiting for room in the k-window.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 100;

/// Client configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Server address (host:port)
    pub address: String,
    /// Connection timeout, T0 by default
    pub connect_timeout: Duration,
    /// APCI parameters (k, w, T0..T3)
    pub apci: ApciParameters,
    /// Field widths of the application layer
    pub app: ApplicationLayerParameters,
    /// Watchdog of file transfers
    pub file_timeout: Duration,
    /// ASDUs that may wait for a free slot in the k-window
    pub send_queue_size: usize,
    /// Private ASDU types understood by this client
    #[cfg_attr(feature = "serde", serde(skip))]
    pub private_types: Option<Arc<PrivateTypeRegistry>>,
}

impl ClientConfig {
    /// Create a new configuration with the given address.
    ///
    /// A bare host gets the default port 2404.
    pub fn new(address: impl Into<String>) -> Self {
        let mut address = address.into();
        if !address.contains(':') {
            address = format!("{}:{}", address, DEFAULT_PORT);
        }
        let apci = ApciParameters::default();
        Self {
            address,
            connect_timeout: apci.t0,
            apci,
            app: ApplicationLayerParameters::iec104(),
            file_timeout: DEFAULT_FILE_TIMEOUT,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            private_types: None,
        }
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set APCI parameters; the connection timeout follows T0.
    pub fn apci(mut self, apci: ApciParameters) -> Self {
        self.connect_timeout = apci.t0;
        self.apci = apci;
        self
    }

    /// Set application layer parameters.
    pub fn application_layer(mut self, app: ApplicationLayerParameters) -> Self {
        self.app = app;
        self
    }

    /// Set file transfer timeout.
    pub fn file_timeout(mut self, timeout: Duration) -> Self {
        self.file_timeout = timeout;
        self
    }

    /// Set size of the send queue.
    pub fn send_queue_size(mut self, size: usize) -> Self {
        self.send_queue_size = size;
        self
    }

    /// Register private ASDU types.
    pub fn private_types(mut self, registry: Arc<PrivateTypeRegistry>) -> Self {
        self.private_types = Some(registry);
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        self.apci.validate()?;
        self.app.validate()?;
        if self.send_queue_size == 0 {
            return Err(Iec60870Error::invalid_parameter("send queue size must not be 0"));
        }
        Ok(())
    }
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// TCP connection established
    Opened(ConnectionId),
    /// Connection closed (by either side or by an error)
    Closed(ConnectionId),
    /// STARTDT_CON received
    StartDtConReceived(ConnectionId),
    /// STOPDT_CON received
    StopDtConReceived(ConnectionId),
    /// TCP connection could not be established
    ConnectFailed,
}

enum ClientCommand {
    Send(Asdu, oneshot::Sender<Result<()>>),
    StartDt,
    StopDt,
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
    Statistics(oneshot::Sender<ConnectionStatistics>),
    IsTransmitBufferFull(oneshot::Sender<bool>),
}

/// Connection task state of the client.
struct ClientStation {
    id: ConnectionId,
    pending: AsduFifo,
    files: FileClient,
    events: mpsc::Sender<ConnectionEvent>,
}

impl ClientStation {
    fn emit(&self, event: ConnectionEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!(conn = %self.id, "connection event dropped");
        }
    }
}

impl Station for ClientStation {
    type Command = ClientCommand;

    fn intercept(&mut self, asdu: &Asdu, now: Instant) -> Handling {
        self.files.handle_asdu(asdu, now)
    }

    fn next_asdu(&mut self) -> Option<(Asdu, Option<QueueMark>)> {
        self.files
            .poll_transmit()
            .or_else(|| self.pending.pop())
            .map(|asdu| (asdu, None))
    }

    fn session_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StartDtConfirmed => self.emit(ConnectionEvent::StartDtConReceived(self.id)),
            SessionEvent::StopDtConfirmed => self.emit(ConnectionEvent::StopDtConReceived(self.id)),
            _ => {}
        }
    }

    fn service(&mut self, now: Instant) {
        self.files.tick(now);
    }

    fn transmitting(&self) -> bool {
        self.files.is_transmitting()
    }

    fn command(&mut self, command: ClientCommand, session: &mut Session, now: Instant) -> Result<()> {
        match command {
            ClientCommand::Send(asdu, reply) => {
                let _ = reply.send(self.pending.push(asdu));
            }
            ClientCommand::StartDt => session.start_dt(now),
            ClientCommand::StopDt => session.stop_dt(now),
            ClientCommand::GetFile {
                ca,
                ioa,
                nof,
                receiver,
                reply,
            } => {
                let _ = reply.send(self.files.request_file(ca, ioa, nof, receiver, now));
            }
            ClientCommand::SendFile {
                ca,
                ioa,
                nof,
                provider,
                reply,
            } => {
                let _ = reply.send(self.files.send_file(ca, ioa, nof, provider, now));
            }
            ClientCommand::GetDirectory(ca, reply) => {
                let _ = reply.send(self.files.request_directory(ca));
            }
            ClientCommand::Statistics(reply) => {
                let _ = reply.send(session.statistics());
            }
            ClientCommand::IsTransmitBufferFull(reply) => {
                let _ = reply.send(self.pending.is_full());
            }
        }
        Ok(())
    }

    fn closed(&mut self, _unconfirmed: Vec<QueueMark>) {
        self.files.close();
        self.pending.clear();
        self.emit(ConnectionEvent::Closed(self.id));
    }
}

/// IEC 60870-5-104 client.
pub struct Iec104Client {
    config: ClientConfig,
    handler: Arc<dyn AsduHandler>,
    ids: ConnectionIdAllocator,
    event_tx: mpsc::Sender<ConnectionEvent>,
    event_rx: Option<mpsc::Receiver<ConnectionEvent>>,
    commands: Option<mpsc::Sender<ClientCommand>>,
    current: Option<ConnectionId>,
    cancel: CancellationToken,
}

impl Iec104Client {
    /// Create a new client; received ASDUs go to `handler` with the CA.
    pub fn new(config: ClientConfig, handler: impl AsduHandler) -> Self {
        let (event_tx, event_rx) = mpsc::channel(100);
        Self {
            config,
            handler: Arc::new(handler),
            ids: ConnectionIdAllocator::default(),
            event_tx,
            event_rx: Some(event_rx),
            commands: None,
            current: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to connection events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Identifier of the current (or last) connection.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Whether the connection task is running.
    pub fn is_connected(&self) -> bool {
        self.commands.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Connect to the server and start the connection task.
    ///
    /// Data transfer still has to be started with [`Self::start_dt`].
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Iec60870Error::Connection("already connected".into()));
        }
        self.config.validate()?;

        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&self.config.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let _ = self.event_tx.try_send(ConnectionEvent::ConnectFailed);
                return Err(Iec60870Error::Io(e));
            }
            Err(_) => {
                let _ = self.event_tx.try_send(ConnectionEvent::ConnectFailed);
                return Err(Iec60870Error::ConnectionTimeout);
            }
        };

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true).ok();

        let id = self.ids.next();
        tracing::info!(conn = %id, address = %self.config.address, "connected");
        self.attach(stream, id);
        Ok(())
    }

    /// Run the connection task over an established transport.
    fn attach<T>(&mut self, io: T, id: ConnectionId)
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        self.cancel = CancellationToken::new();

        let station = ClientStation {
            id,
            pending: AsduFifo::new(self.config.send_queue_size),
            files: FileClient::new(id, self.config.app).with_timeout(self.config.file_timeout),
            events: self.event_tx.clone(),
        };
        station.emit(ConnectionEvent::Opened(id));

        let parts = ConnectionParts {
            session: Session::new(id, Role::Controlling, self.config.apci, Instant::now()),
            station,
            codec: Iec104Codec::new(self.config.app).with_registry(self.config.private_types.clone()),
            commands: Some(cmd_rx),
            wake: Arc::new(Notify::new()),
            dispatch: dispatch_tx,
            cancel: self.cancel.clone(),
        };

        tokio::spawn(dispatch(id, self.handler.clone(), dispatch_rx));
        tokio::spawn(async move {
            let _ = connection::run(io, parts).await;
        });

        self.commands = Some(cmd_tx);
        self.current = Some(id);
    }

    /// Close the connection.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.commands = None;
    }

    async fn command(&self, command: ClientCommand) -> Result<()> {
        let tx = self.commands.as_ref().ok_or(Iec60870Error::NotConnected)?;
        tx.send(command).await.map_err(|_| Iec60870Error::NotConnected)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ClientCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx)).await?;
        rx.await.map_err(|_| Iec60870Error::NotConnected)
    }

    /// Queue an ASDU for sending.
    ///
    /// ASDUs wait in the send queue while the k-window is full; a full
    /// queue fails with `QueueOverflow`.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        self.request(|reply| ClientCommand::Send(asdu, reply)).await?
    }

    /// Start data transfer (STARTDT_ACT).
    pub async fn start_dt(&self) -> Result<()> {
        self.command(ClientCommand::StartDt).await
    }

    /// Stop data transfer (STOPDT_ACT).
    pub async fn stop_dt(&self) -> Result<()> {
        self.command(ClientCommand::StopDt).await
    }

    /// Message counters of the current connection.
    pub async fn statistics(&self) -> Result<ConnectionStatistics> {
        self.request(ClientCommand::Statistics).await
    }

    /// The send queue cannot take more ASDUs.
    pub async fn is_transmit_buffer_full(&self) -> Result<bool> {
        self.request(ClientCommand::IsTransmitBufferFull).await
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

    /// Send test command with time tag (C_TS_TA_1).
    pub async fn test_command_with_time(&self, ca: u16, counter: u16, time: Cp56Time2a) -> Result<()> {
        let asdu = self.command_asdu(
            Cot::Activation,
            ca,
            InformationObject::new(0, Element::TestCommandWithTime { counter, time }),
        )?;
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

    /// Send a process command or setpoint (C_SC, C_DC, C_SE, ...).
    pub async fn control_command(&self, cot: Cot, ca: u16, command: InformationObject) -> Result<()> {
        let asdu = self.command_asdu(cot, ca, command)?;
        self.send_asdu(asdu).await
    }

    /// Download a file from the server.
    pub async fn get_file(
        &self,
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        receiver: Box<dyn FileReceiver>,
    ) -> Result<()> {
        self.request(|reply| ClientCommand::GetFile {
            ca,
            ioa,
            nof,
            receiver,
            reply,
        })
        .await?
    }

    /// Upload a file to the server.
    pub async fn send_file(
        &self,
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        provider: Arc<dyn FileProvider>,
    ) -> Result<()> {
        self.request(|reply| ClientCommand::SendFile {
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
        self.request(|reply| ClientCommand::GetDirectory(ca, reply)).await?
    }
}

impl Drop for Iec104Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Hand received ASDUs to the application, in wire order.
async fn dispatch(id: ConnectionId, handler: Arc<dyn AsduHandler>, mut rx: mpsc::UnboundedReceiver<Asdu>) {
    while let Some(asdu) = rx.recv().await {
        if handler.handle_asdu(asdu.common_address(), &asdu) == Handling::Unhandled {
            tracing::debug!(conn = %id, type_id = %asdu.type_id(), cot = ?asdu.cot(), "unhandled ASDU");
        }
    }
}
