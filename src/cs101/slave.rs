//! CS101 slave (controlled station).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::{check_asdu_fits, decode_user_data, encode_user_data, write_frames, Cs101Event};
use crate::connection::{ConnectionId, ConnectionIdAllocator, SERVICE_INTERVAL};
use crate::error::{Iec60870Error, Result};
use crate::file::{AvailableFiles, FileServer, DEFAULT_FILE_TIMEOUT};
use crate::handler::{dispatch_asdu, MasterConnection, ServerHandler, SystemCommandOptions};
use crate::link::{
    Ft12Codec, Ft12Frame, LinkLayerMode, LinkLayerParameters, LinkLayerState, LinkOutput, PrimaryEvent,
    PrimaryLink, SecondaryApplication, SecondaryLink,
};
use crate::queue::AsduFifo;
use crate::server::ServerHandlers;
use crate::types::{ApplicationLayerParameters, Asdu, PrivateTypeRegistry};

/// Default capacity of the class 1 and class 2 queues.
pub const DEFAULT_CLASS_QUEUE_SIZE: usize = 100;

/// Slave configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cs101SlaveConfig {
    pub mode: LinkLayerMode,
    pub link: LinkLayerParameters,
    pub app: ApplicationLayerParameters,
    /// Own link address
    pub address: u16,
    /// Link address of the master on a balanced line
    pub remote_address: u16,
    pub class1_queue_size: usize,
    pub class2_queue_size: usize,
    /// File transfer watchdog
    pub file_timeout: Duration,
    pub system_commands: SystemCommandOptions,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub private_types: Option<Arc<PrivateTypeRegistry>>,
}

impl Default for Cs101SlaveConfig {
    fn default() -> Self {
        Self {
            mode: LinkLayerMode::Balanced,
            link: LinkLayerParameters::default(),
            app: ApplicationLayerParameters::iec101(),
            address: 2,
            remote_address: 1,
            class1_queue_size: DEFAULT_CLASS_QUEUE_SIZE,
            class2_queue_size: DEFAULT_CLASS_QUEUE_SIZE,
            file_timeout: DEFAULT_FILE_TIMEOUT,
            system_commands: SystemCommandOptions::cs101(),
            private_types: None,
        }
    }
}

impl Cs101SlaveConfig {
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

    pub fn address(mut self, address: u16) -> Self {
        self.address = address;
        self
    }

    pub fn remote_address(mut self, address: u16) -> Self {
        self.remote_address = address;
        self
    }

    pub fn class1_queue_size(mut self, size: usize) -> Self {
        self.class1_queue_size = size;
        self
    }

    pub fn class2_queue_size(mut self, size: usize) -> Self {
        self.class2_queue_size = size;
        self
    }

    pub fn file_timeout(mut self, timeout: Duration) -> Self {
        self.file_timeout = timeout;
        self
    }

    pub fn system_commands(mut self, options: SystemCommandOptions) -> Self {
        self.system_commands = options;
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
        if self.class1_queue_size == 0 || self.class2_queue_size == 0 {
            return Err(Iec60870Error::invalid_parameter("class queue size must be non-zero"));
        }
        if self.mode == LinkLayerMode::Unbalanced && self.link.address_length == 0 {
            return Err(Iec60870Error::invalid_parameter(
                "an unbalanced line needs link addresses",
            ));
        }
        let max = self.link.max_address();
        if self.address > max || self.remote_address > max {
            return Err(Iec60870Error::invalid_parameter(format!(
                "link address exceeds {} for {} address octets",
                max, self.link.address_length
            )));
        }
        if self.mode == LinkLayerMode::Unbalanced && self.address == self.link.broadcast_address() {
            return Err(Iec60870Error::invalid_parameter("the broadcast address cannot be a slave address"));
        }
        Ok(())
    }
}

/// State shared by the slave handle, the line task and the dispatch task.
struct SlaveShared {
    id: ConnectionId,
    app: ApplicationLayerParameters,
    link: LinkLayerParameters,
    class1: Mutex<AsduFifo>,
    class2: Mutex<AsduFifo>,
    link_state: Mutex<LinkLayerState>,
    wake: Notify,
}

impl SlaveShared {
    /// A full queue drops its oldest ASDU.
    fn enqueue(&self, queue: &Mutex<AsduFifo>, class: u8, asdu: Asdu) -> Result<()> {
        encode_user_data(&asdu, &self.link)?;
        {
            let mut queue = queue.lock();
            if queue.is_full() {
                queue.pop();
                tracing::debug!(conn = %self.id, class, "class queue full, oldest ASDU dropped");
            }
            queue.push(asdu)?;
        }
        self.wake.notify_one();
        Ok(())
    }

    fn enqueue_class1(&self, asdu: Asdu) -> Result<()> {
        self.enqueue(&self.class1, 1, asdu)
    }

    fn enqueue_class2(&self, asdu: Asdu) -> Result<()> {
        self.enqueue(&self.class2, 2, asdu)
    }

    fn pop(queue: &Mutex<AsduFifo>) -> Option<Bytes> {
        queue.lock().pop().map(|asdu| asdu.to_bytes())
    }

    /// Next user data for a balanced line, class 1 first.
    fn next_user_data(&self) -> Option<Bytes> {
        Self::pop(&self.class1).or_else(|| Self::pop(&self.class2))
    }
}

/// Responses of the slave go to the class 1 queue.
struct SlaveConnection(Arc<SlaveShared>);

impl MasterConnection for SlaveConnection {
    fn id(&self) -> ConnectionId {
        self.0.id
    }

    fn params(&self) -> &ApplicationLayerParameters {
        &self.0.app
    }

    fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        self.0.enqueue_class1(asdu)
    }
}

/// User data arriving at the slave: file service first, then the handler.
struct Inbound<'a> {
    shared: &'a SlaveShared,
    registry: &'a Option<Arc<PrivateTypeRegistry>>,
    files: &'a mut FileServer,
    dispatch: &'a mpsc::UnboundedSender<Asdu>,
    now: Instant,
}

impl SecondaryApplication for Inbound<'_> {
    fn class1_available(&self) -> bool {
        !self.shared.class1.lock().is_empty()
    }

    fn class1_data(&mut self) -> Option<Bytes> {
        SlaveShared::pop(&self.shared.class1)
    }

    fn class2_data(&mut self) -> Option<Bytes> {
        SlaveShared::pop(&self.shared.class2)
    }

    fn user_data(&mut self, data: Bytes, _broadcast: bool) {
        let id = self.shared.id;
        let Some(asdu) = decode_user_data(id, data, &self.shared.app, self.registry) else {
            return;
        };
        if self.files.handle_asdu(&asdu, self.now).is_handled() {
            return;
        }
        if self.dispatch.send(asdu).is_err() {
            tracing::debug!(conn = %id, "dispatch task gone");
        }
    }

    fn reset(&mut self, only_fcb: bool) {
        if !only_fcb {
            tracing::debug!(conn = %self.shared.id, "remote link reset, class queues cleared");
            self.shared.class1.lock().clear();
            self.shared.class2.lock().clear();
        }
    }
}

enum SlaveLink {
    Balanced { primary: PrimaryLink, secondary: SecondaryLink },
    Unbalanced(SecondaryLink),
}

struct SlaveTask {
    shared: Arc<SlaveShared>,
    registry: Option<Arc<PrivateTypeRegistry>>,
    link: SlaveLink,
    files: FileServer,
    out: LinkOutput,
    dispatch: mpsc::UnboundedSender<Asdu>,
    events: mpsc::Sender<Cs101Event>,
}

impl SlaveTask {
    fn emit(&self, event: Cs101Event) {
        if self.events.try_send(event).is_err() {
            tracing::debug!(conn = %self.shared.id, ?event, "event dropped");
        }
    }

    /// File service output goes to class 1 while there is room.
    fn pull_files(&mut self, now: Instant) {
        loop {
            while let Some(asdu) = self.files.poll_transmit() {
                if let Err(e) = self.shared.enqueue_class1(asdu) {
                    tracing::warn!(conn = %self.shared.id, error = %e, "file service ASDU not queued");
                }
            }
            if !self.files.is_transmitting() || self.shared.class1.lock().is_full() {
                break;
            }
            self.files.tick(now);
        }
    }

    fn service(&mut self, now: Instant) {
        self.pull_files(now);
        if let SlaveLink::Balanced { primary, .. } = &mut self.link {
            let shared = &self.shared;
            primary.run(now, || shared.next_user_data(), &mut self.out);
        }
        self.route_events();
    }

    fn route_events(&mut self) {
        while let Some(event) = self.out.events.pop_front() {
            if let PrimaryEvent::StateChanged { address, state } = event {
                tracing::info!(conn = %self.shared.id, address, state = %state, "link layer state changed");
                *self.shared.link_state.lock() = state;
                self.emit(Cs101Event::LinkStateChanged { address, state });
            }
        }
    }

    fn handle_frame(&mut self, frame: Ft12Frame, now: Instant) {
        let from_primary = frame.control().is_some_and(|c| c.prm());
        let mut inbound = Inbound {
            shared: &self.shared,
            registry: &self.registry,
            files: &mut self.files,
            dispatch: &self.dispatch,
            now,
        };
        match &mut self.link {
            SlaveLink::Balanced { primary, secondary } => {
                if from_primary {
                    secondary.handle_request(&frame, &mut inbound, &mut self.out);
                } else {
                    primary.handle_response(&frame, now, &mut self.out);
                }
            }
            SlaveLink::Unbalanced(secondary) => secondary.handle_request(&frame, &mut inbound, &mut self.out),
        }
        self.route_events();
    }

    async fn drive<T>(&mut self, framed: &mut Framed<T, Ft12Codec>, cancel: &CancellationToken) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut tick = interval(SERVICE_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shared = self.shared.clone();

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

                _ = shared.wake.notified() => {}

                _ = tick.tick() => self.files.tick(Instant::now()),
            }
        }
    }
}

async fn run<T>(io: T, mut task: SlaveTask, cancel: CancellationToken)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, Ft12Codec::new(task.shared.link.address_length));
    match task.drive(&mut framed, &cancel).await {
        Ok(()) => tracing::debug!(conn = %task.shared.id, "slave stopped"),
        Err(e) => tracing::warn!(conn = %task.shared.id, error = %e, "slave stopped"),
    }
    task.files.close();
    task.emit(Cs101Event::Stopped);
}

async fn dispatch(
    handler: Arc<dyn ServerHandler>,
    conn: SlaveConnection,
    options: SystemCommandOptions,
    mut rx: mpsc::UnboundedReceiver<Asdu>,
) {
    while let Some(asdu) = rx.recv().await {
        if let Err(e) = dispatch_asdu(handler.as_ref(), &conn, &asdu, options) {
            tracing::warn!(conn = %conn.0.id, error = %e, type_id = %asdu.type_id(), "ASDU handling failed");
        }
    }
}

/// IEC 60870-5-101 slave on one serial line.
///
/// Spontaneous and periodic data is queued as class 1 (events) or class 2
/// (cyclic) user data. On an unbalanced line the master fetches it by
/// polling and is told about waiting class 1 data through ACD; on a
/// balanced line the slave sends it on its own, class 1 first. Received
/// commands run through the same system command handling as the CS104
/// server; the connection request handler of [`ServerHandlers`] is not
/// consulted on a serial line.
pub struct Cs101Slave {
    shared: Arc<SlaveShared>,
    config: Cs101SlaveConfig,
    files: Arc<AvailableFiles>,
    event_rx: Option<mpsc::Receiver<Cs101Event>>,
    cancel: CancellationToken,
}

impl Cs101Slave {
    pub fn start<T>(io: T, config: Cs101SlaveConfig, handlers: ServerHandlers) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;
        // one line per slave
        let id = ConnectionIdAllocator::default().next();
        let now = Instant::now();

        let shared = Arc::new(SlaveShared {
            id,
            app: config.app,
            link: config.link,
            class1: Mutex::new(AsduFifo::new(config.class1_queue_size)),
            class2: Mutex::new(AsduFifo::new(config.class2_queue_size)),
            link_state: Mutex::new(LinkLayerState::Idle),
            wake: Notify::new(),
        });

        let link = match config.mode {
            LinkLayerMode::Balanced => SlaveLink::Balanced {
                primary: PrimaryLink::balanced(config.remote_address, config.link, false, now),
                secondary: SecondaryLink::balanced(config.address, config.link, false),
            },
            LinkLayerMode::Unbalanced => SlaveLink::Unbalanced(SecondaryLink::unbalanced(config.address, config.link)),
        };

        let (event_tx, event_rx) = mpsc::channel(100);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let files = FileServer::new(id, config.app, handlers.files.clone())
            .with_timeout(config.file_timeout)
            .with_file_ready_handler(handlers.file_ready.clone());
        let task = SlaveTask {
            shared: shared.clone(),
            registry: config.private_types.clone(),
            link,
            files,
            out: LinkOutput::default(),
            dispatch: dispatch_tx,
            events: event_tx,
        };

        tracing::info!(conn = %id, mode = ?config.mode, address = config.address, "CS101 slave started");
        tokio::spawn(dispatch(
            handlers.asdu.clone(),
            SlaveConnection(shared.clone()),
            config.system_commands,
            dispatch_rx,
        ));
        tokio::spawn(run(io, task, cancel.clone()));

        Ok(Self {
            shared,
            config,
            files: handlers.files,
            event_rx: Some(event_rx),
            cancel,
        })
    }

    /// Subscribe to link layer events. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<Cs101Event>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &Cs101SlaveConfig {
        &self.config
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Queue event data (class 1). A full queue drops its oldest entry.
    pub fn enqueue_user_data_class1(&self, asdu: Asdu) -> Result<()> {
        self.shared.enqueue_class1(asdu)
    }

    /// Queue cyclic data (class 2). A full queue drops its oldest entry.
    pub fn enqueue_user_data_class2(&self, asdu: Asdu) -> Result<()> {
        self.shared.enqueue_class2(asdu)
    }

    pub fn is_class1_queue_full(&self) -> bool {
        self.shared.class1.lock().is_full()
    }

    pub fn is_class2_queue_full(&self) -> bool {
        self.shared.class2.lock().is_full()
    }

    pub fn is_class1_queue_empty(&self) -> bool {
        self.shared.class1.lock().is_empty()
    }

    pub fn is_class2_queue_empty(&self) -> bool {
        self.shared.class2.lock().is_empty()
    }

    /// State of the own primary link; always `Idle` on an unbalanced line.
    pub fn link_layer_state(&self) -> LinkLayerState {
        *self.shared.link_state.lock()
    }

    /// Files offered for download.
    pub fn available_files(&self) -> &Arc<AvailableFiles> {
        &self.files
    }

    /// Stop the line task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Cs101Slave {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
