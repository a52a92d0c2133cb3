//! Connection task of a CS104 endpoint.
//!
//! One task per connection owns the [`Session`], the framed transport and
//! the endpoint specific [`Station`] state (queues, file service). Received
//! ASDUs the station does not consume are forwarded in order to a separate
//! dispatch task, so slow application handlers never delay timer servicing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::Iec104Codec;
use crate::error::{Iec60870Error, Result};
use crate::handler::Handling;
use crate::queue::QueueMark;
use crate::session::{Session, SessionEvent};
use crate::types::Asdu;

/// Interval of timer and file service polling.
pub(crate) const SERVICE_INTERVAL: Duration = Duration::from_millis(50);

/// Identifier of one connection, unique within its client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out connection identifiers; owned by each client or server.
#[derive(Debug, Default)]
pub(crate) struct ConnectionIdAllocator(AtomicU64);

impl ConnectionIdAllocator {
    pub(crate) fn next(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Endpoint specific part of a connection.
pub(crate) trait Station: Send + 'static {
    /// Requests from the endpoint handle.
    type Command: Send + 'static;

    /// Offered every received ASDU before the dispatch task sees it.
    fn intercept(&mut self, _asdu: &Asdu, _now: Instant) -> Handling {
        Handling::Unhandled
    }

    /// Next ASDU to send; only called while the window has room.
    fn next_asdu(&mut self) -> Option<(Asdu, Option<QueueMark>)>;

    /// A queued ASDU was acknowledged.
    fn confirmed(&mut self, _mark: QueueMark) {}

    /// Data transfer state changes.
    fn session_event(&mut self, _event: &SessionEvent) {}

    /// Periodic work (file service, timeouts).
    fn service(&mut self, _now: Instant) {}

    /// More periodic output is ready right away.
    fn transmitting(&self) -> bool {
        false
    }

    fn command(&mut self, command: Self::Command, session: &mut Session, now: Instant) -> Result<()>;

    /// Connection ended; `unconfirmed` are the marks still in the window.
    fn closed(&mut self, _unconfirmed: Vec<QueueMark>) {}
}

/// Everything a connection task needs besides the transport.
pub(crate) struct ConnectionParts<S: Station> {
    pub session: Session,
    pub station: S,
    pub codec: Iec104Codec,
    pub commands: Option<mpsc::Receiver<S::Command>>,
    pub wake: Arc<Notify>,
    pub dispatch: mpsc::UnboundedSender<Asdu>,
    pub cancel: CancellationToken,
}

/// Drive a connection until it fails, the peer closes it or it is
/// cancelled. The station is always told about the end.
pub(crate) async fn run<T, S>(io: T, parts: ConnectionParts<S>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Station,
{
    let ConnectionParts {
        mut session,
        mut station,
        codec,
        mut commands,
        wake,
        dispatch,
        cancel,
    } = parts;

    let mut framed = Framed::new(io, codec);
    let result = drive(&mut framed, &mut session, &mut station, &mut commands, &wake, &dispatch, &cancel).await;

    station.closed(session.reset_window());
    match &result {
        Ok(()) => tracing::debug!(conn = %session.id(), "connection closed"),
        Err(e) => tracing::warn!(conn = %session.id(), error = %e, "connection closed"),
    }
    result
}

async fn drive<T, S>(
    framed: &mut Framed<T, Iec104Codec>,
    session: &mut Session,
    station: &mut S,
    commands: &mut Option<mpsc::Receiver<S::Command>>,
    wake: &Notify,
    dispatch: &mpsc::UnboundedSender<Asdu>,
    cancel: &CancellationToken,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Station,
{
    let mut tick = interval(SERVICE_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        pump(session, station, dispatch, Instant::now())?;
        while station.transmitting() && session.can_send() {
            let now = Instant::now();
            station.service(now);
            pump(session, station, dispatch, now)?;
        }

        let mut wrote = false;
        while let Some(apdu) = session.poll_transmit() {
            framed.feed(apdu).await?;
            wrote = true;
        }
        if wrote {
            framed.flush().await?;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),

            frame = framed.next() => match frame {
                Some(Ok(apdu)) => session.handle_frame(apdu, Instant::now())?,
                Some(Err(e)) => return Err(e),
                None => return Err(Iec60870Error::Connection("closed by peer".into())),
            },

            command = recv(commands) => match command {
                Some(command) => station.command(command, session, Instant::now())?,
                None => *commands = None,
            },

            _ = wake.notified() => {}

            _ = tick.tick() => {
                let now = Instant::now();
                session.poll_timers(now)?;
                station.service(now);
            }
        }
    }
}

async fn recv<C>(commands: &mut Option<mpsc::Receiver<C>>) -> Option<C> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Route session events and fill the send window from the station.
fn pump<S: Station>(
    session: &mut Session,
    station: &mut S,
    dispatch: &mpsc::UnboundedSender<Asdu>,
    now: Instant,
) -> Result<()> {
    while let Some(event) = session.poll_event() {
        match event {
            SessionEvent::Asdu(asdu) => {
                if station.intercept(&asdu, now) == Handling::Unhandled
                    && dispatch.send(asdu).is_err()
                {
                    return Err(Iec60870Error::ChannelClosed);
                }
            }
            SessionEvent::Confirmed(mark) => station.confirmed(mark),
            other => station.session_event(&other),
        }
    }

    while session.can_send() {
        let Some((asdu, mark)) = station.next_asdu() else {
            break;
        };
        session.send_asdu(asdu, mark, now)?;
    }
    Ok(())
}
