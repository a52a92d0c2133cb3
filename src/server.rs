//! IEC 60870-5-104 server (controlled station).
//!
//! Every accepted TCP connection runs on its own task with a dispatch task
//! next to it. Spontaneous data is routed through low priority
//! [`SharedQueue`]s, one per redundancy group or per connection depending
//! on the [`ServerMode`]. Responses go through the high priority FIFO of
//! the [`MasterConnection`] handed to the [`ServerHandler`].

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::Iec104Codec;
use crate::connection::{self, ConnectionId, ConnectionIdAllocator, ConnectionParts, Station};
use crate::error::{Iec60870Error, Result};
use crate::file::{AvailableFiles, FileReadyHandler, FileServer, DEFAULT_FILE_TIMEOUT};
use crate::handler::{
    dispatch_asdu, ConnectionRequestHandler, Handling, MasterConnection, ServerHandler,
    SystemCommandOptions,
};
use crate::queue::{AsduFifo, EnqueueMode, QueueMark, SharedQueue};
use crate::session::{Role, Session, SessionEvent};
use crate::types::{ApciParameters, ApplicationLayerParameters, Asdu, PrivateTypeRegistry, DEFAULT_PORT};

/// How connections share the low priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServerMode {
    /// One queue, one active connection at a time
    #[default]
    SingleRedundancyGroup,
    /// Every connection has its own queue
    ConnectionIsRedundancyGroup,
    /// Named groups, each with a queue and one active connection
    MultipleRedundancyGroups,
}

/// Set of clients sharing one event queue; only one of them is active.
///
/// A group without allowed clients is a catch-all group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RedundancyGroup {
    pub name: Option<String>,
    pub allowed_clients: Vec<IpAddr>,
}

impl RedundancyGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            allowed_clients: Vec::new(),
        }
    }

    /// Allow a client IP address in this group.
    pub fn allow(mut self, client: IpAddr) -> Self {
        self.allowed_clients.push(client);
        self
    }

    pub fn is_catch_all(&self) -> bool {
        self.allowed_clients.is_empty()
    }

    pub fn matches(&self, client: IpAddr) -> bool {
        self.allowed_clients.contains(&client)
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Local address to bind
    pub bind_address: String,
    /// TCP port, 2404 by default
    pub port: u16,
    /// Maximum number of open connections
    pub max_connections: usize,
    /// Capacity of each low priority queue
    pub queue_size: usize,
    /// Capacity of the high priority FIFO of each connection
    pub high_priority_queue_size: usize,
    /// Overflow policy of the low priority queues
    pub enqueue_mode: EnqueueMode,
    pub mode: ServerMode,
    /// Groups for the redundancy group modes
    pub redundancy_groups: Vec<RedundancyGroup>,
    pub apci: ApciParameters,
    pub app: ApplicationLayerParameters,
    /// Watchdog of file transfers
    pub file_timeout: Duration,
    /// Optional system commands answered by the server
    pub system_commands: SystemCommandOptions,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub private_types: Option<Arc<PrivateTypeRegistry>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: 10,
            queue_size: 100,
            high_priority_queue_size: 100,
            enqueue_mode: EnqueueMode::default(),
            mode: ServerMode::default(),
            redundancy_groups: Vec::new(),
            apci: ApciParameters::default(),
            app: ApplicationLayerParameters::iec104(),
            file_timeout: DEFAULT_FILE_TIMEOUT,
            system_commands: SystemCommandOptions::default(),
            private_types: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn high_priority_queue_size(mut self, size: usize) -> Self {
        self.high_priority_queue_size = size;
        self
    }

    pub fn enqueue_mode(mut self, mode: EnqueueMode) -> Self {
        self.enqueue_mode = mode;
        self
    }

    pub fn mode(mut self, mode: ServerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn redundancy_group(mut self, group: RedundancyGroup) -> Self {
        self.redundancy_groups.push(group);
        self
    }

    pub fn apci(mut self, apci: ApciParameters) -> Self {
        self.apci = apci;
        self
    }

    pub fn application_layer(mut self, app: ApplicationLayerParameters) -> Self {
        self.app = app;
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

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        self.apci.validate()?;
        self.app.validate()?;
        if self.max_connections == 0 {
            return Err(Iec60870Error::invalid_parameter("max connections must not be 0"));
        }
        if self.queue_size == 0 || self.high_priority_queue_size == 0 {
            return Err(Iec60870Error::invalid_parameter("queue sizes must not be 0"));
        }
        if self.mode == ServerMode::MultipleRedundancyGroups && self.redundancy_groups.is_empty() {
            return Err(Iec60870Error::invalid_parameter(
                "multiple redundancy groups mode needs at least one group",
            ));
        }
        Ok(())
    }

    /// Groups in effect for the configured mode.
    fn effective_groups(&self) -> Vec<RedundancyGroup> {
        match self.mode {
            ServerMode::SingleRedundancyGroup => vec![self
                .redundancy_groups
                .first()
                .cloned()
                .unwrap_or_default()],
            ServerMode::ConnectionIsRedundancyGroup => Vec::new(),
            ServerMode::MultipleRedundancyGroups => self.redundancy_groups.clone(),
        }
    }
}

/// Callbacks of a server.
pub struct ServerHandlers {
    pub asdu: Arc<dyn ServerHandler>,
    pub connection_request: Option<Arc<dyn ConnectionRequestHandler>>,
    pub file_ready: Option<Arc<dyn FileReadyHandler>>,
    /// Files offered for download
    pub files: Arc<AvailableFiles>,
}

impl ServerHandlers {
    pub fn new(handler: impl ServerHandler) -> Self {
        Self {
            asdu: Arc::new(handler),
            connection_request: None,
            file_ready: None,
            files: Arc::new(AvailableFiles::new()),
        }
    }

    pub fn connection_request(mut self, handler: impl ConnectionRequestHandler) -> Self {
        self.connection_request = Some(Arc::new(handler));
        self
    }

    pub fn file_ready(mut self, handler: impl FileReadyHandler + 'static) -> Self {
        self.file_ready = Some(Arc::new(handler));
        self
    }

    pub fn files(mut self, files: Arc<AvailableFiles>) -> Self {
        self.files = files;
        self
    }
}

/// Events emitted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Connection accepted
    Opened { id: ConnectionId, peer: SocketAddr },
    /// STARTDT received
    Active { id: ConnectionId },
    /// STOPDT received or another group member became active
    Inactive { id: ConnectionId },
    Closed { id: ConnectionId },
}

/// Snapshot of an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub active: bool,
}

enum ServerCommand {
    Suspend,
}

/// Response path of one connection.
struct ServerConnection {
    id: ConnectionId,
    params: ApplicationLayerParameters,
    active: AtomicBool,
    high_priority: Mutex<AsduFifo>,
    wake: Arc<Notify>,
}

impl ServerConnection {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the previous state.
    fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel)
    }
}

impl MasterConnection for ServerConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn params(&self) -> &ApplicationLayerParameters {
        &self.params
    }

    fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        if !self.is_active() {
            return Err(Iec60870Error::NotActive);
        }
        self.high_priority.lock().push(asdu)?;
        self.wake.notify_one();
        Ok(())
    }
}

struct Group {
    group: RedundancyGroup,
    queue: Arc<SharedQueue>,
}

struct Entry {
    peer: SocketAddr,
    group: Option<usize>,
    queue: Arc<SharedQueue>,
    handle: Arc<ServerConnection>,
    commands: mpsc::Sender<ServerCommand>,
}

/// State shared by the accept loop and all connection tasks.
struct Shared {
    config: ServerConfig,
    handlers: ServerHandlers,
    ids: ConnectionIdAllocator,
    groups: Vec<Group>,
    connections: Mutex<HashMap<ConnectionId, Entry>>,
    events: mpsc::Sender<ServerEvent>,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!("server event dropped");
        }
    }

    fn select_group(&self, peer: IpAddr) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.group.matches(peer))
            .or_else(|| self.groups.iter().position(|g| g.group.is_catch_all()))
    }

    fn accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, cancel: &CancellationToken) {
        if self.connections.lock().len() >= self.config.max_connections {
            tracing::info!(%peer, "connection rejected, limit reached");
            return;
        }
        if let Some(handler) = &self.handlers.connection_request {
            if !handler.accept(peer.ip()) {
                tracing::info!(%peer, "connection rejected by request handler");
                return;
            }
        }

        let (group, queue) = match self.config.mode {
            ServerMode::ConnectionIsRedundancyGroup => (
                None,
                SharedQueue::new(self.config.queue_size, self.config.enqueue_mode),
            ),
            _ => match self.select_group(peer.ip()) {
                Some(index) => (Some(index), self.groups[index].queue.clone()),
                None => {
                    tracing::info!(%peer, "no matching redundancy group, connection rejected");
                    return;
                }
            },
        };

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true).ok();

        let id = self.ids.next();
        let wake = Arc::new(Notify::new());
        queue.subscribe(&wake);
        let handle = Arc::new(ServerConnection {
            id,
            params: self.config.app,
            active: AtomicBool::new(false),
            high_priority: Mutex::new(AsduFifo::new(self.config.high_priority_queue_size)),
            wake: wake.clone(),
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        self.connections.lock().insert(
            id,
            Entry {
                peer,
                group,
                queue: queue.clone(),
                handle: handle.clone(),
                commands: cmd_tx,
            },
        );
        match group {
            Some(index) => tracing::info!(conn = %id, %peer, group = ?self.groups[index].group.name, "connection opened"),
            None => tracing::info!(conn = %id, %peer, "connection opened"),
        }
        self.emit(ServerEvent::Opened { id, peer });

        let files = FileServer::new(id, self.config.app, self.handlers.files.clone())
            .with_timeout(self.config.file_timeout)
            .with_file_ready_handler(self.handlers.file_ready.clone());
        let parts = ConnectionParts {
            session: Session::new(id, Role::Controlled, self.config.apci, Instant::now()),
            station: ServerStation {
                handle: handle.clone(),
                queue,
                files,
                shared: self.clone(),
            },
            codec: Iec104Codec::new(self.config.app).with_registry(self.config.private_types.clone()),
            commands: Some(cmd_rx),
            wake,
            dispatch: dispatch_tx,
            cancel: cancel.child_token(),
        };

        tokio::spawn(dispatch(
            self.handlers.asdu.clone(),
            handle,
            self.config.system_commands,
            dispatch_rx,
        ));
        tokio::spawn(async move {
            let _ = connection::run(stream, parts).await;
        });
    }

    /// Deactivate the other members of the group of `id`.
    fn activated(&self, id: ConnectionId) {
        tracing::info!(conn = %id, "connection active");
        self.emit(ServerEvent::Active { id });

        let connections = self.connections.lock();
        let Some(group) = connections.get(&id).and_then(|e| e.group) else {
            return;
        };
        for (other, entry) in connections.iter() {
            if *other != id && entry.group == Some(group) && entry.handle.set_active(false) {
                tracing::info!(conn = %other, "connection inactive, other group member activated");
                let _ = entry.commands.try_send(ServerCommand::Suspend);
                self.emit(ServerEvent::Inactive { id: *other });
            }
        }
    }

    fn removed(&self, id: ConnectionId) {
        self.connections.lock().remove(&id);
        self.emit(ServerEvent::Closed { id });
    }
}

/// Connection task state of the server.
struct ServerStation {
    handle: Arc<ServerConnection>,
    queue: Arc<SharedQueue>,
    files: FileServer,
    shared: Arc<Shared>,
}

impl Station for ServerStation {
    type Command = ServerCommand;

    fn intercept(&mut self, asdu: &Asdu, now: Instant) -> Handling {
        self.files.handle_asdu(asdu, now)
    }

    fn next_asdu(&mut self) -> Option<(Asdu, Option<QueueMark>)> {
        if !self.handle.is_active() {
            return None;
        }
        if let Some(asdu) = self.files.poll_transmit() {
            return Some((asdu, None));
        }
        if let Some(asdu) = self.handle.high_priority.lock().pop() {
            return Some((asdu, None));
        }
        self.queue.next_waiting().map(|(asdu, mark)| (asdu, Some(mark)))
    }

    fn confirmed(&mut self, mark: QueueMark) {
        self.queue.mark_confirmed(mark);
    }

    fn session_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Activated => {
                self.handle.set_active(true);
                self.shared.activated(self.handle.id);
            }
            SessionEvent::Deactivated => {
                if self.handle.set_active(false) {
                    tracing::info!(conn = %self.handle.id, "connection inactive");
                    self.shared.emit(ServerEvent::Inactive { id: self.handle.id });
                }
            }
            _ => {}
        }
    }

    fn service(&mut self, now: Instant) {
        self.files.tick(now);
    }

    fn transmitting(&self) -> bool {
        self.handle.is_active() && self.files.is_transmitting()
    }

    fn command(&mut self, command: ServerCommand, session: &mut Session, _now: Instant) -> Result<()> {
        match command {
            ServerCommand::Suspend => session.suspend(),
        }
        Ok(())
    }

    fn closed(&mut self, unconfirmed: Vec<QueueMark>) {
        self.handle.set_active(false);
        self.handle.high_priority.lock().clear();
        if !unconfirmed.is_empty() {
            self.queue.unmark_all();
        }
        self.files.close();
        self.shared.removed(self.handle.id);
    }
}

/// Run the ASDUs of one connection through the handler, in wire order.
async fn dispatch(
    handler: Arc<dyn ServerHandler>,
    conn: Arc<ServerConnection>,
    options: SystemCommandOptions,
    mut rx: mpsc::UnboundedReceiver<Asdu>,
) {
    while let Some(asdu) = rx.recv().await {
        if let Err(e) = dispatch_asdu(handler.as_ref(), conn.as_ref(), &asdu, options) {
            tracing::warn!(conn = %conn.id, error = %e, type_id = %asdu.type_id(), "ASDU handling failed");
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => shared.accept(stream, peer, &cancel),
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
    tracing::info!("server stopped");
}

/// IEC 60870-5-104 server.
pub struct Iec104Server {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    cancel: CancellationToken,
}

impl Iec104Server {
    /// Bind the listening socket and start accepting connections.
    pub async fn start(config: ServerConfig, handlers: ServerHandlers) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;

        let groups = config
            .effective_groups()
            .into_iter()
            .map(|group| Group {
                group,
                queue: SharedQueue::new(config.queue_size, config.enqueue_mode),
            })
            .collect();
        let (event_tx, event_rx) = mpsc::channel(100);
        let shared = Arc::new(Shared {
            config,
            handlers,
            ids: ConnectionIdAllocator::default(),
            groups,
            connections: Mutex::new(HashMap::new()),
            events: event_tx,
        });

        let cancel = CancellationToken::new();
        tracing::info!(address = %local_addr, mode = ?shared.config.mode, "server listening");
        tokio::spawn(accept_loop(listener, shared.clone(), cancel.clone()));

        Ok(Self {
            shared,
            local_addr,
            event_rx: Some(event_rx),
            cancel,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to server events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Queue spontaneous or periodic data for the connected clients.
    ///
    /// Data waits in the queue until a client is active. In
    /// `ConnectionIsRedundancyGroup` mode only active connections get it.
    pub fn enqueue_asdu(&self, asdu: Asdu) -> Result<()> {
        match self.shared.config.mode {
            ServerMode::ConnectionIsRedundancyGroup => {
                let connections = self.shared.connections.lock();
                for entry in connections.values().filter(|e| e.handle.is_active()) {
                    entry.queue.enqueue(asdu.clone())?;
                }
            }
            _ => {
                for group in &self.shared.groups {
                    group.queue.enqueue(asdu.clone())?;
                }
            }
        }
        Ok(())
    }

    pub fn open_connections(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<_> = self
            .shared
            .connections
            .lock()
            .iter()
            .map(|(id, entry)| ConnectionInfo {
                id: *id,
                peer: entry.peer,
                active: entry.handle.is_active(),
            })
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Files offered for download.
    pub fn available_files(&self) -> &Arc<AvailableFiles> {
        &self.shared.handlers.files
    }

    /// Stop accepting and close all connections.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Iec104Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::client::{ClientConfig, ConnectionEvent, Iec104Client};
    use crate::object::{Element, InformationObject};
    use crate::types::{Cot, QualityDescriptor, TypeId};

    struct Outstation;

    impl ServerHandler for Outstation {
        fn interrogation(&self, conn: &dyn MasterConnection, asdu: &Asdu, _qoi: u8) -> Handling {
            let _ = conn.send_act_con(asdu, false);
            for ioa in [100, 101] {
                if let Ok(points) = Asdu::with_object(
                    conn.params(),
                    Cot::InterrogatedByStation,
                    asdu.common_address(),
                    InformationObject::new(ioa, Element::single_point(true, QualityDescriptor::GOOD)),
                ) {
                    let _ = conn.send_asdu(points);
                }
            }
            let _ = conn.send_act_term(asdu);
            Handling::Handled
        }
    }

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0)
    }

    type Log = Arc<Mutex<Vec<(u16, TypeId, Cot)>>>;

    async fn connected_client(server: &Iec104Server, log: Log) -> (Iec104Client, mpsc::Receiver<ConnectionEvent>) {
        let mut client = Iec104Client::new(
            ClientConfig::new(server.local_addr().to_string()),
            move |ca: u16, asdu: &Asdu| {
                log.lock().push((ca, asdu.type_id(), asdu.cot()));
                Handling::Handled
            },
        );
        let mut events = client.subscribe().unwrap();
        client.connect().await.unwrap();
        assert!(matches!(events.recv().await, Some(ConnectionEvent::Opened(_))));
        client.start_dt().await.unwrap();
        assert!(matches!(events.recv().await, Some(ConnectionEvent::StartDtConReceived(_))));
        (client, events)
    }

    async fn wait_for(log: &Log, count: usize) {
        while log.lock().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 2404);
        assert_eq!(config.max_connections, 10);
        assert!(config.validate().is_ok());
        assert!(ServerConfig::default().max_connections(0).validate().is_err());
        assert!(ServerConfig::default()
            .mode(ServerMode::MultipleRedundancyGroups)
            .validate()
            .is_err());

        let single = ServerConfig::default().effective_groups();
        assert_eq!(single.len(), 1);
        assert!(single[0].is_catch_all());
        assert!(ServerConfig::default()
            .mode(ServerMode::ConnectionIsRedundancyGroup)
            .effective_groups()
            .is_empty());
    }

    #[test]
    fn test_redundancy_group_matching() {
        let operator = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let group = RedundancyGroup::new("control").allow(operator);
        assert!(!group.is_catch_all());
        assert!(group.matches(operator));
        assert!(!group.matches(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(RedundancyGroup::default().is_catch_all());
    }

    #[tokio::test]
    async fn test_interrogation_end_to_end() {
        let mut server = Iec104Server::start(local_config(), ServerHandlers::new(Outstation)).await.unwrap();
        let mut server_events = server.subscribe().unwrap();

        let log: Log = Arc::default();
        let (client, _events) = connected_client(&server, log.clone()).await;
        assert!(matches!(server_events.recv().await, Some(ServerEvent::Opened { .. })));
        assert!(matches!(server_events.recv().await, Some(ServerEvent::Active { .. })));

        client.interrogation(Cot::Activation, 1, 20).await.unwrap();
        wait_for(&log, 4).await;
        assert_eq!(
            *log.lock(),
            vec![
                (1, TypeId::C_IC_NA_1, Cot::ActivationConfirm),
                (1, TypeId::M_SP_NA_1, Cot::InterrogatedByStation),
                (1, TypeId::M_SP_NA_1, Cot::InterrogatedByStation),
                (1, TypeId::C_IC_NA_1, Cot::ActivationTermination),
            ]
        );
        assert_eq!(server.connections().len(), 1);
        assert!(server.connections()[0].active);
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected() {
        let server = Iec104Server::start(local_config(), ServerHandlers::new(Outstation)).await.unwrap();
        let log: Log = Arc::default();
        let (client, _events) = connected_client(&server, log.clone()).await;

        client.read(1, 4711).await.unwrap();
        wait_for(&log, 1).await;
        assert_eq!(log.lock()[0], (1, TypeId::C_RD_NA_1, Cot::UnknownTypeId));
    }

    #[tokio::test]
    async fn test_reserved_cot_answered_negatively() {
        let server = Iec104Server::start(local_config(), ServerHandlers::new(Outstation)).await.unwrap();
        let log: Log = Arc::default();
        let (client, _events) = connected_client(&server, log.clone()).await;

        client.interrogation(Cot::Reserved(42), 1, 20).await.unwrap();
        wait_for(&log, 1).await;
        assert_eq!(log.lock()[0], (1, TypeId::C_IC_NA_1, Cot::UnknownCot));

        // the connection survives
        client.interrogation(Cot::Activation, 1, 20).await.unwrap();
        wait_for(&log, 5).await;
        assert_eq!(log.lock()[1], (1, TypeId::C_IC_NA_1, Cot::ActivationConfirm));
        assert_eq!(server.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_queued_data_reaches_active_client() {
        let server = Iec104Server::start(local_config(), ServerHandlers::new(Outstation)).await.unwrap();
        let point = Asdu::with_object(
            &ApplicationLayerParameters::iec104(),
            Cot::Spontaneous,
            3,
            InformationObject::new(7, Element::single_point(false, QualityDescriptor::GOOD)),
        )
        .unwrap();
        server.enqueue_asdu(point).unwrap();

        let log: Log = Arc::default();
        let (_client, _events) = connected_client(&server, log.clone()).await;
        wait_for(&log, 1).await;
        assert_eq!(log.lock()[0], (3, TypeId::M_SP_NA_1, Cot::Spontaneous));
    }

    #[tokio::test]
    async fn test_second_connection_takes_over_group() {
        let mut server = Iec104Server::start(local_config(), ServerHandlers::new(Outstation)).await.unwrap();
        let mut server_events = server.subscribe().unwrap();

        let first: Log = Arc::default();
        let (_a, _) = connected_client(&server, first.clone()).await;
        let second: Log = Arc::default();
        let (_b, _) = connected_client(&server, second.clone()).await;

        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.push(server_events.recv().await.unwrap());
        }
        assert!(seen.contains(&ServerEvent::Inactive { id: ConnectionId(1) }));
        assert_eq!(seen.last(), Some(&ServerEvent::Inactive { id: ConnectionId(1) }));

        let active: Vec<_> = server.connections().into_iter().filter(|c| c.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, ConnectionId(2));
    }

    #[tokio::test]
    async fn test_connection_request_handler_rejects() {
        let handlers = ServerHandlers::new(Outstation).connection_request(|_: IpAddr| false);
        let mut server = Iec104Server::start(local_config(), handlers).await.unwrap();
        let mut server_events = server.subscribe().unwrap();

        let mut client = Iec104Client::new(
            ClientConfig::new(server.local_addr().to_string()),
            |_: u16, _: &Asdu| Handling::Handled,
        );
        let mut events = client.subscribe().unwrap();
        client.connect().await.unwrap();
        assert!(matches!(events.recv().await, Some(ConnectionEvent::Opened(_))));
        assert!(matches!(events.recv().await, Some(ConnectionEvent::Closed(_))));
        assert!(server_events.try_recv().is_err());
        assert_eq!(server.open_connections(), 0);
    }
}
