//! File service of the controlled station.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{
    checksum, file_asdu, max_segment_size, wire_length, AvailableFiles, FileErrorCode,
    FileProvider, FileReadyHandler, FileReceiver, Selection, DEFAULT_FILE_TIMEOUT,
};
use crate::connection::ConnectionId;
use crate::handler::Handling;
use crate::object::{
    AckQualifier, Element, FileError, LastSectionQualifier, NameOfFile, SelectAndCallQualifier,
};
use crate::types::{ApplicationLayerParameters, Asdu, Cot};

/// State of the [`FileServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileServerState {
    UnselectedIdle,
    // download to the master
    WaitingForFileCall,
    WaitingForSectionCall,
    TransmitSection,
    WaitingForSectionAck,
    WaitingForFileAck,
    /// Abort the download with the next tick
    SendAbort,
    // upload from the master
    WaitingForSectionReady,
    ReceiveSection,
}

/// Sans-IO file transfer state machine of one slave connection.
pub struct FileServer {
    conn: ConnectionId,
    params: ApplicationLayerParameters,
    max_segment: usize,
    timeout: Duration,
    state: FileServerState,

    files: Arc<AvailableFiles>,
    ready_handler: Option<Arc<dyn FileReadyHandler>>,
    selected: Option<Arc<dyn FileProvider>>,
    receiver: Option<Box<dyn FileReceiver>>,

    ca: u16,
    ioa: u32,
    nof: NameOfFile,
    section: u8,
    section_size: usize,
    offset: usize,
    section_checksum: u8,
    file_checksum: u8,

    last_activity: Instant,
    outbox: VecDeque<Asdu>,
}

impl std::fmt::Debug for FileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileServer")
            .field("conn", &self.conn)
            .field("state", &self.state)
            .field("ioa", &self.ioa)
            .field("section", &self.section)
            .finish()
    }
}

impl FileServer {
    pub fn new(conn: ConnectionId, params: ApplicationLayerParameters, files: Arc<AvailableFiles>) -> Self {
        Self {
            conn,
            params,
            max_segment: max_segment_size(&params),
            timeout: DEFAULT_FILE_TIMEOUT,
            state: FileServerState::UnselectedIdle,
            files,
            ready_handler: None,
            selected: None,
            receiver: None,
            ca: 0,
            ioa: 0,
            nof: NameOfFile::DEFAULT,
            section: 0,
            section_size: 0,
            offset: 0,
            section_checksum: 0,
            file_checksum: 0,
            last_activity: Instant::now(),
            outbox: VecDeque::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept uploads announced by the master.
    pub fn with_file_ready_handler(mut self, handler: Option<Arc<dyn FileReadyHandler>>) -> Self {
        self.ready_handler = handler;
        self
    }

    pub fn state(&self) -> FileServerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == FileServerState::UnselectedIdle
    }

    pub fn poll_transmit(&mut self) -> Option<Asdu> {
        self.outbox.pop_front()
    }

    /// `tick` has output to produce right away.
    pub fn is_transmitting(&self) -> bool {
        matches!(self.state, FileServerState::TransmitSection | FileServerState::SendAbort)
    }

    /// The connection is gone; end a running transfer.
    pub fn close(&mut self) {
        if !self.is_idle() {
            tracing::debug!(conn = %self.conn, state = ?self.state, "file transfer ended by connection loss");
            self.end(false, FileErrorCode::AbortedByRemote);
        }
        self.outbox.clear();
    }

    fn send(&mut self, element: Element, now: Instant) {
        if let Some(asdu) = file_asdu(self.conn, &self.params, self.ca, self.ioa, element) {
            self.outbox.push_back(asdu);
        }
        self.last_activity = now;
    }

    fn reply(&mut self, asdu: &Asdu, cot: Cot, negative: bool) {
        self.outbox.push_back(asdu.mirror(cot, negative));
    }

    fn send_section_ready(&mut self, now: Instant) {
        self.send(
            Element::SectionReady {
                nof: self.nof,
                nos: self.section,
                length: wire_length(self.section_size),
                ready: true,
            },
            now,
        );
    }

    fn send_last(&mut self, qualifier: LastSectionQualifier, checksum: u8, now: Instant) {
        self.send(
            Element::LastSegmentOrSection {
                nof: self.nof,
                nos: self.section,
                qualifier,
                checksum,
            },
            now,
        );
    }

    fn send_ack(&mut self, nos: u8, qualifier: AckQualifier, error: FileError, now: Instant) {
        self.send(
            Element::AckFileOrSection {
                nof: self.nof,
                nos,
                qualifier,
                error,
            },
            now,
        );
    }

    /// Leave the transfer, notifying the provider or receiver.
    fn end(&mut self, sent: bool, received: FileErrorCode) {
        if let Some(provider) = self.selected.take() {
            provider.transfer_complete(sent);
            self.files.release(&provider);
            if sent {
                self.files.remove_file(&provider);
            }
        }
        if let Some(mut receiver) = self.receiver.take() {
            receiver.finished(received);
        }
        self.state = FileServerState::UnselectedIdle;
    }

    /// Offer a received ASDU to the file service.
    pub fn handle_asdu(&mut self, asdu: &Asdu, now: Instant) -> Handling {
        if !asdu.type_id().is_file_service() {
            return Handling::Unhandled;
        }
        let object = match asdu.element(0) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(conn = %self.conn, error = %e, "malformed file service ASDU");
                return Handling::Handled;
            }
        };
        if !self.is_idle() {
            self.last_activity = now;
        }

        match object.element {
            Element::FileReady { nof, length, .. } => self.on_file_ready(asdu, object.ioa, nof, length, now),
            Element::SectionReady {
                nos, length, ready, ..
            } => self.on_section_ready(nos, length, ready, now),
            Element::Segment { nos, data, .. } => {
                if self.state == FileServerState::ReceiveSection {
                    self.section_checksum = self.section_checksum.wrapping_add(checksum(&data));
                    if let Some(receiver) = self.receiver.as_mut() {
                        receiver.segment_received(nos, self.offset, &data);
                    }
                    self.offset += data.len();
                }
            }
            Element::LastSegmentOrSection {
                nos,
                qualifier,
                checksum,
                ..
            } => self.on_last(nos, qualifier, checksum, now),
            Element::AckFileOrSection { qualifier, .. } => self.on_ack(asdu, qualifier, now),
            Element::CallOrSelect { nof, nos, qualifier, .. } => {
                self.on_call(asdu, object.ioa, nof, nos, qualifier, now)
            }
            _ => return Handling::Unhandled,
        }
        Handling::Handled
    }

    fn on_file_ready(&mut self, asdu: &Asdu, ioa: u32, nof: NameOfFile, length: u32, now: Instant) {
        if !self.is_idle() {
            self.reply(asdu, Cot::FileTransfer, true);
            return;
        }
        let receiver = self.ready_handler.as_ref().and_then(|h| {
            h.file_ready(asdu.common_address(), ioa, nof, length as usize)
        });
        let Some(receiver) = receiver else {
            self.reply(asdu, Cot::UnknownIoa, true);
            return;
        };

        tracing::debug!(conn = %self.conn, ioa, nof = %nof, length, "accepting file upload");
        self.receiver = Some(receiver);
        self.ca = asdu.common_address();
        self.ioa = ioa;
        self.nof = nof;
        self.file_checksum = 0;
        self.send(
            Element::CallOrSelect {
                nof,
                nos: 0,
                qualifier: SelectAndCallQualifier::RequestFile,
                error: FileError::Default,
            },
            now,
        );
        self.state = FileServerState::WaitingForSectionReady;
    }

    fn on_section_ready(&mut self, nos: u8, length: u32, ready: bool, now: Instant) {
        if self.state != FileServerState::WaitingForSectionReady || !ready {
            return;
        }
        self.section = nos;
        self.section_size = length as usize;
        self.offset = 0;
        self.section_checksum = 0;
        self.send(
            Element::CallOrSelect {
                nof: self.nof,
                nos,
                qualifier: SelectAndCallQualifier::RequestSection,
                error: FileError::Default,
            },
            now,
        );
        self.state = FileServerState::ReceiveSection;
    }

    fn on_last(&mut self, nos: u8, qualifier: LastSectionQualifier, remote: u8, now: Instant) {
        let receiving = matches!(
            self.state,
            FileServerState::ReceiveSection | FileServerState::WaitingForSectionReady
        );
        if !receiving {
            return;
        }
        match qualifier {
            LastSectionQualifier::SectionTransferWithoutDeact
                if self.state == FileServerState::ReceiveSection =>
            {
                if remote == self.section_checksum {
                    self.file_checksum = self.file_checksum.wrapping_add(remote);
                    self.send_ack(nos, AckQualifier::PosAckSection, FileError::Default, now);
                } else {
                    self.send_ack(nos, AckQualifier::NegAckSection, FileError::ChecksumFailed, now);
                }
                self.state = FileServerState::WaitingForSectionReady;
            }
            LastSectionQualifier::FileTransferWithoutDeact
                if self.state == FileServerState::WaitingForSectionReady =>
            {
                if remote == self.file_checksum {
                    self.send_ack(nos, AckQualifier::PosAckFile, FileError::Default, now);
                    self.end(false, FileErrorCode::Success);
                } else {
                    self.send_ack(nos, AckQualifier::NegAckFile, FileError::ChecksumFailed, now);
                    self.end(false, FileErrorCode::ProtocolError);
                }
            }
            LastSectionQualifier::FileTransferWithDeact => {
                self.end(false, FileErrorCode::AbortedByRemote);
            }
            _ => {}
        }
    }

    fn on_ack(&mut self, asdu: &Asdu, qualifier: AckQualifier, now: Instant) {
        if asdu.cot() != Cot::FileTransfer {
            self.reply(asdu, Cot::UnknownCot, true);
            return;
        }
        if self.selected.is_none() {
            return;
        }
        match (qualifier, self.state) {
            (AckQualifier::PosAckFile, FileServerState::WaitingForFileAck) => {
                tracing::debug!(conn = %self.conn, ioa = self.ioa, "file download complete");
                self.end(true, FileErrorCode::Success);
            }
            (AckQualifier::NegAckFile, FileServerState::WaitingForFileAck) => {
                self.end(false, FileErrorCode::ProtocolError);
            }
            (AckQualifier::NegAckSection, FileServerState::WaitingForSectionAck) => {
                tracing::debug!(conn = %self.conn, section = self.section, "section rejected, resending");
                self.offset = 0;
                self.section_checksum = 0;
                self.send_section_ready(now);
                self.state = FileServerState::WaitingForSectionCall;
            }
            (AckQualifier::PosAckSection, FileServerState::WaitingForSectionAck) => {
                self.file_checksum = self.file_checksum.wrapping_add(self.section_checksum);
                self.section = self.section.wrapping_add(1);
                self.offer_section(now);
            }
            _ => self.state = FileServerState::SendAbort,
        }
    }

    /// Announce section `self.section`, or the end of the file.
    fn offer_section(&mut self, now: Instant) {
        let size = self
            .selected
            .as_ref()
            .and_then(|p| p.section_size(usize::from(self.section).saturating_sub(1)))
            .filter(|size| *size > 0);
        self.offset = 0;
        self.section_checksum = 0;
        match size {
            Some(size) => {
                self.section_size = size;
                self.send_section_ready(now);
                self.state = FileServerState::WaitingForSectionCall;
            }
            None => {
                let file_checksum = self.file_checksum;
                self.send_last(LastSectionQualifier::FileTransferWithoutDeact, file_checksum, now);
                self.state = FileServerState::WaitingForFileAck;
            }
        }
    }

    fn on_call(
        &mut self,
        asdu: &Asdu,
        ioa: u32,
        nof: NameOfFile,
        nos: u8,
        qualifier: SelectAndCallQualifier,
        now: Instant,
    ) {
        match asdu.cot() {
            Cot::FileTransfer => {}
            Cot::Request => {
                self.outbox.extend(self.files.directory(&self.params, Cot::Request));
                return;
            }
            _ => {
                self.reply(asdu, Cot::UnknownCot, true);
                return;
            }
        }

        match qualifier {
            SelectAndCallQualifier::SelectFile if self.is_idle() => {
                match self.files.select(asdu.common_address(), ioa, nof, self.conn) {
                    Selection::NotFound => self.reply(asdu, Cot::UnknownIoa, true),
                    Selection::Busy => {
                        self.ca = asdu.common_address();
                        self.ioa = ioa;
                        self.send(Element::FileReady { nof, length: 0, ready: false }, now);
                    }
                    Selection::Selected(provider) => {
                        tracing::debug!(conn = %self.conn, ioa, nof = %nof, "file selected");
                        self.ca = asdu.common_address();
                        self.ioa = ioa;
                        self.nof = nof;
                        self.file_checksum = 0;
                        let length = wire_length(provider.file_size());
                        self.selected = Some(provider);
                        self.send(Element::FileReady { nof, length, ready: true }, now);
                        self.state = FileServerState::WaitingForFileCall;
                    }
                }
            }
            SelectAndCallQualifier::DeactivateFile if !self.is_idle() => {
                tracing::debug!(conn = %self.conn, state = ?self.state, "file transfer deactivated by master");
                self.end(false, FileErrorCode::AbortedByRemote);
            }
            SelectAndCallQualifier::RequestFile if self.state == FileServerState::WaitingForFileCall => {
                if ioa != self.ioa {
                    self.reply(asdu, Cot::UnknownIoa, true);
                    return;
                }
                self.section = 1;
                self.offer_section(now);
            }
            SelectAndCallQualifier::RequestSection
                if self.state == FileServerState::WaitingForSectionCall =>
            {
                if ioa != self.ioa {
                    self.reply(asdu, Cot::UnknownIoa, true);
                    return;
                }
                if asdu.is_negative() {
                    // master skips this section
                    self.section = self.section.wrapping_add(1);
                    self.offer_section(now);
                    return;
                }
                let size = self
                    .selected
                    .as_ref()
                    .and_then(|p| p.section_size(usize::from(nos).saturating_sub(1)))
                    .filter(|size| *size > 0);
                match size {
                    Some(size) => {
                        self.section = nos;
                        self.section_size = size;
                        self.offset = 0;
                        self.section_checksum = 0;
                        self.state = FileServerState::TransmitSection;
                    }
                    None => {
                        self.last_activity = now;
                        self.reply(asdu, Cot::FileTransfer, true);
                    }
                }
            }
            SelectAndCallQualifier::DeleteFile if self.is_idle() => {
                match self.files.delete(asdu.common_address(), ioa, nof) {
                    None => self.reply(asdu, Cot::UnknownIoa, true),
                    Some(deleted) => {
                        tracing::debug!(conn = %self.conn, ioa, deleted, "delete file");
                        self.reply(asdu, Cot::FileTransfer, !deleted);
                    }
                }
            }
            _ => {}
        }
    }

    /// Produce the next segment of a download and check the watchdog.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            FileServerState::TransmitSection => self.transmit(now),
            FileServerState::SendAbort => {
                tracing::debug!(conn = %self.conn, ioa = self.ioa, "aborting file download");
                self.send_last(LastSectionQualifier::FileTransferWithDeact, 0, now);
                self.end(false, FileErrorCode::ProtocolError);
            }
            _ => {}
        }

        if !self.is_idle() && now.saturating_duration_since(self.last_activity) > self.timeout {
            tracing::warn!(conn = %self.conn, state = ?self.state, "file transfer timed out");
            if self.receiver.is_some() {
                self.send(
                    Element::CallOrSelect {
                        nof: self.nof,
                        nos: 0,
                        qualifier: SelectAndCallQualifier::DeactivateFile,
                        error: FileError::Default,
                    },
                    now,
                );
            } else {
                self.send_last(LastSectionQualifier::FileTransferWithDeact, 0, now);
            }
            self.end(false, FileErrorCode::Timeout);
        }
    }

    fn transmit(&mut self, now: Instant) {
        let remaining = self.section_size.saturating_sub(self.offset);
        if remaining == 0 {
            let section_checksum = self.section_checksum;
            self.send_last(LastSectionQualifier::SectionTransferWithoutDeact, section_checksum, now);
            self.state = FileServerState::WaitingForSectionAck;
            return;
        }

        let len = remaining.min(self.max_segment);
        let section = usize::from(self.section).saturating_sub(1);
        let data = self.selected.as_ref().and_then(|p| p.segment(section, self.offset, len));
        match data {
            Some(data) if !data.is_empty() => {
                self.section_checksum = self.section_checksum.wrapping_add(checksum(&data));
                self.offset += data.len();
                self.send(
                    Element::Segment {
                        nof: self.nof,
                        nos: self.section,
                        data,
                    },
                    now,
                );
            }
            _ => {
                tracing::warn!(conn = %self.conn, section = self.section, offset = self.offset, "file data unavailable");
                self.state = FileServerState::SendAbort;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::file::client::tests::{Collect, Download};
    use crate::file::{FileClient, TransparentFile};
    use crate::object::InformationObject;
    use crate::types::TypeId;

    const NOF: NameOfFile = NameOfFile::TRANSPARENT_FILE;

    fn params() -> ApplicationLayerParameters {
        ApplicationLayerParameters::iec104()
    }

    /// Receiver that places segments by section and offset.
    #[derive(Default)]
    struct Sections {
        data: BTreeMap<u8, Vec<u8>>,
        segments: usize,
        result: Option<FileErrorCode>,
    }

    struct Store(Arc<Mutex<Sections>>);

    impl FileReceiver for Store {
        fn finished(&mut self, result: FileErrorCode) {
            self.0.lock().result = Some(result);
        }

        fn segment_received(&mut self, section: u8, offset: usize, data: &[u8]) {
            let mut s = self.0.lock();
            s.segments += 1;
            let buf = s.data.entry(section).or_default();
            if buf.len() < offset + data.len() {
                buf.resize(offset + data.len(), 0);
            }
            buf[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    struct Completion(TransparentFile, Arc<Mutex<Option<bool>>>);

    impl FileProvider for Completion {
        fn ca(&self) -> u16 {
            self.0.ca()
        }
        fn ioa(&self) -> u32 {
            self.0.ioa()
        }
        fn name_of_file(&self) -> NameOfFile {
            self.0.name_of_file()
        }
        fn file_date(&self) -> chrono::DateTime<chrono::Utc> {
            self.0.file_date()
        }
        fn file_size(&self) -> usize {
            self.0.file_size()
        }
        fn section_size(&self, section: usize) -> Option<usize> {
            self.0.section_size(section)
        }
        fn segment(&self, section: usize, offset: usize, len: usize) -> Option<Bytes> {
            self.0.segment(section, offset, len)
        }
        fn transfer_complete(&self, success: bool) {
            *self.1.lock() = Some(success);
        }
    }

    fn sample_file() -> TransparentFile {
        let mut file = TransparentFile::new(1, 100, NOF);
        file.add_section((0..500u32).map(|i| (i * 7) as u8).collect::<Vec<_>>());
        file.add_section(vec![0xAB; 20]);
        file
    }

    /// Exchange ASDUs until both sides are quiet. Returns what the client sent.
    fn exchange(
        client: &mut FileClient,
        server: &mut FileServer,
        mut tamper: impl FnMut(Asdu) -> Asdu,
    ) -> Vec<Asdu> {
        let now = Instant::now();
        let mut log = Vec::new();
        for _ in 0..1000 {
            client.tick(now);
            server.tick(now);
            let mut moved = false;
            while let Some(asdu) = client.poll_transmit() {
                server.handle_asdu(&asdu, now);
                log.push(asdu);
                moved = true;
            }
            while let Some(asdu) = server.poll_transmit() {
                client.handle_asdu(&tamper(asdu), now);
                moved = true;
            }
            if !moved && client.is_idle() && server.is_idle() {
                break;
            }
        }
        log
    }

    fn acks(log: &[Asdu], wanted: AckQualifier) -> usize {
        log.iter()
            .filter(|a| {
                matches!(a.element(0).map(|o| o.element),
                    Ok(Element::AckFileOrSection { qualifier, .. }) if qualifier == wanted)
            })
            .count()
    }

    #[test]
    fn test_download_end_to_end() {
        let done = Arc::new(Mutex::new(None));
        let files = Arc::new(AvailableFiles::new());
        files.add_file(Arc::new(Completion(sample_file(), done.clone())));

        let mut server = FileServer::new(ConnectionId(1), params(), files.clone());
        let mut client = FileClient::new(ConnectionId(2), params());
        let received = Arc::new(Mutex::new(Sections::default()));
        client
            .request_file(1, 100, NOF, Box::new(Store(received.clone())), Instant::now())
            .unwrap();

        let log = exchange(&mut client, &mut server, |a| a);

        let r = received.lock();
        assert_eq!(r.result, Some(FileErrorCode::Success));
        assert_eq!(r.data[&1], sample_file().sections()[0].to_vec());
        assert_eq!(r.data[&2], vec![0xAB; 20]);
        assert_eq!(acks(&log, AckQualifier::PosAckSection), 2);
        assert_eq!(acks(&log, AckQualifier::NegAckSection), 0);
        assert_eq!(*done.lock(), Some(true));
        assert!(files.is_empty());
    }

    #[test]
    fn test_corrupted_segment_resends_section_once() {
        let files = Arc::new(AvailableFiles::new());
        files.add_file(Arc::new(sample_file()));
        let mut server = FileServer::new(ConnectionId(1), params(), files);
        let mut client = FileClient::new(ConnectionId(2), params());
        let received = Arc::new(Mutex::new(Sections::default()));
        client
            .request_file(1, 100, NOF, Box::new(Store(received.clone())), Instant::now())
            .unwrap();

        let mut corrupted = false;
        let log = exchange(&mut client, &mut server, |asdu| {
            if corrupted {
                return asdu;
            }
            let object = asdu.element(0).unwrap();
            let Element::Segment { nof, nos, data } = object.element else {
                return asdu;
            };
            corrupted = true;
            let mut data = data.to_vec();
            data[3] ^= 0x5A;
            Asdu::with_object(
                &params(),
                Cot::FileTransfer,
                1,
                InformationObject::new(object.ioa, Element::Segment { nof, nos, data: data.into() }),
            )
            .unwrap()
        });

        assert!(corrupted);
        assert_eq!(acks(&log, AckQualifier::NegAckSection), 1);
        assert_eq!(acks(&log, AckQualifier::PosAckSection), 2);
        assert_eq!(acks(&log, AckQualifier::PosAckFile), 1);

        let r = received.lock();
        assert_eq!(r.result, Some(FileErrorCode::Success));
        assert_eq!(r.data[&1], sample_file().sections()[0].to_vec());
        // 3 segments for section 1, resent once, plus one for section 2
        assert_eq!(r.segments, 7);
    }

    #[test]
    fn test_upload_end_to_end() {
        let received = Arc::new(Mutex::new(Sections::default()));
        let store = received.clone();
        let handler: Arc<dyn FileReadyHandler> = Arc::new(move |ca: u16, ioa: u32, _nof: NameOfFile, length: usize| {
            assert_eq!((ca, ioa, length), (1, 100, 520));
            Some(Box::new(Store(store.clone())) as Box<dyn FileReceiver>)
        });
        let mut server = FileServer::new(ConnectionId(1), params(), Arc::new(AvailableFiles::new()))
            .with_file_ready_handler(Some(handler));

        let done = Arc::new(Mutex::new(None));
        let mut client = FileClient::new(ConnectionId(2), params());
        client
            .send_file(1, 100, NOF, Arc::new(Completion(sample_file(), done.clone())), Instant::now())
            .unwrap();

        exchange(&mut client, &mut server, |a| a);

        assert_eq!(*done.lock(), Some(true));
        let r = received.lock();
        assert_eq!(r.result, Some(FileErrorCode::Success));
        assert_eq!(r.data[&2], vec![0xAB; 20]);
    }

    #[test]
    fn test_upload_rejected_without_handler() {
        let mut server = FileServer::new(ConnectionId(1), params(), Arc::new(AvailableFiles::new()));
        let mut client = FileClient::new(ConnectionId(2), params());
        let done = Arc::new(Mutex::new(None));
        client
            .send_file(1, 100, NOF, Arc::new(Completion(sample_file(), done.clone())), Instant::now())
            .unwrap();

        exchange(&mut client, &mut server, |a| a);
        assert_eq!(*done.lock(), Some(false));
        assert!(client.is_idle());
    }

    #[test]
    fn test_select_unknown_file() {
        let mut server = FileServer::new(ConnectionId(1), params(), Arc::new(AvailableFiles::new()));
        let mut client = FileClient::new(ConnectionId(2), params());
        let state = Arc::new(Mutex::new(Download::default()));
        client
            .request_file(1, 7, NOF, Box::new(Collect(state.clone())), Instant::now())
            .unwrap();

        exchange(&mut client, &mut server, |a| a);
        assert_eq!(state.lock().result, Some(FileErrorCode::UnknownIoa));
    }

    #[test]
    fn test_directory_request() {
        let files = Arc::new(AvailableFiles::new());
        files.add_file(Arc::new(sample_file()));
        let mut server = FileServer::new(ConnectionId(1), params(), files);
        let mut client = FileClient::new(ConnectionId(2), params());

        client.request_directory(1).unwrap();
        let request = client.poll_transmit().unwrap();
        assert_eq!(request.cot(), Cot::Request);
        let now = Instant::now();
        assert_eq!(server.handle_asdu(&request, now), Handling::Handled);

        let dir = server.poll_transmit().unwrap();
        assert_eq!(dir.type_id(), TypeId::F_DR_TA_1);
        assert_eq!(client.handle_asdu(&dir, now), Handling::Unhandled);
    }

    #[test]
    fn test_delete_file() {
        let files = Arc::new(AvailableFiles::new());
        files.add_file(Arc::new(sample_file()));
        let mut server = FileServer::new(ConnectionId(1), params(), files.clone());
        let delete = Asdu::with_object(
            &params(),
            Cot::FileTransfer,
            1,
            InformationObject::new(
                100,
                Element::CallOrSelect {
                    nof: NOF,
                    nos: 0,
                    qualifier: SelectAndCallQualifier::DeleteFile,
                    error: FileError::Default,
                },
            ),
        )
        .unwrap();

        server.handle_asdu(&delete, Instant::now());
        let reply = server.poll_transmit().unwrap();
        assert!(!reply.is_negative());
        assert!(files.is_empty());

        server.handle_asdu(&delete, Instant::now());
        assert_eq!(server.poll_transmit().unwrap().cot(), Cot::UnknownIoa);
    }

    #[test]
    fn test_watchdog_releases_file() {
        let files = Arc::new(AvailableFiles::new());
        files.add_file(Arc::new(sample_file()));
        let mut server = FileServer::new(ConnectionId(1), params(), files.clone())
            .with_timeout(Duration::from_millis(100));
        let mut client = FileClient::new(ConnectionId(2), params());
        let state = Arc::new(Mutex::new(Download::default()));
        let start = Instant::now();
        client
            .request_file(1, 100, NOF, Box::new(Collect(state.clone())), start)
            .unwrap();
        let select = client.poll_transmit().unwrap();
        server.handle_asdu(&select, start);
        assert_eq!(server.state(), FileServerState::WaitingForFileCall);
        // the call for the file gets lost
        client.handle_asdu(&server.poll_transmit().unwrap(), start);
        assert!(client.poll_transmit().is_some());

        server.tick(start + Duration::from_millis(101));
        assert!(server.is_idle());
        assert!(matches!(
            files.select(1, 100, NOF, ConnectionId(3)),
            Selection::Selected(_)
        ));

        let abort = server.poll_transmit().unwrap();
        assert!(matches!(
            abort.element(0).unwrap().element,
            Element::LastSegmentOrSection { qualifier: LastSectionQualifier::FileTransferWithDeact, .. }
        ));
        client.handle_asdu(&abort, start + Duration::from_millis(101));
        assert!(client.is_idle());
        assert_eq!(state.lock().result, Some(FileErrorCode::AbortedByRemote));
    }

    #[test]
    fn test_watchdog_deactivates_upload() {
        let received = Arc::new(Mutex::new(Sections::default()));
        let store = received.clone();
        let handler: Arc<dyn FileReadyHandler> = Arc::new(move |_: u16, _: u32, _: NameOfFile, _: usize| {
            Some(Box::new(Store(store.clone())) as Box<dyn FileReceiver>)
        });
        let mut server = FileServer::new(ConnectionId(1), params(), Arc::new(AvailableFiles::new()))
            .with_timeout(Duration::from_millis(100))
            .with_file_ready_handler(Some(handler));
        let mut client = FileClient::new(ConnectionId(2), params());
        let done = Arc::new(Mutex::new(None));
        let start = Instant::now();
        client
            .send_file(1, 100, NOF, Arc::new(Completion(sample_file(), done.clone())), start)
            .unwrap();
        server.handle_asdu(&client.poll_transmit().unwrap(), start);
        assert_eq!(server.state(), FileServerState::WaitingForSectionReady);
        // the call is not delivered, so the client never announces a section
        server.poll_transmit().unwrap();

        server.tick(start + Duration::from_millis(101));
        assert!(server.is_idle());
        assert_eq!(received.lock().result, Some(FileErrorCode::Timeout));

        let deactivate = server.poll_transmit().unwrap();
        assert!(matches!(
            deactivate.element(0).unwrap().element,
            Element::CallOrSelect { qualifier: SelectAndCallQualifier::DeactivateFile, .. }
        ));
        client.handle_asdu(&deactivate, start + Duration::from_millis(101));
        assert!(client.is_idle());
        assert_eq!(*done.lock(), Some(false));
    }
}
