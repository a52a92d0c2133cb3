//! File service of the controlling station.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{
    checksum, file_asdu, max_segment_size, wire_length, FileErrorCode, FileProvider, FileReceiver,
    DEFAULT_FILE_TIMEOUT,
};
use crate::connection::ConnectionId;
use crate::error::{Iec60870Error, Result};
use crate::handler::Handling;
use crate::object::{
    AckQualifier, Element, FileError, InformationObject, LastSectionQualifier, NameOfFile,
    SelectAndCallQualifier,
};
use crate::types::{ApplicationLayerParameters, Asdu, Cot};

/// State of the [`FileClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClientState {
    Idle,
    // download (monitor direction)
    WaitingForFileReady,
    /// Waiting for SECTION READY or the last section
    WaitingForSectionReady,
    /// Waiting for SEGMENT or LAST SEGMENT
    ReceivingSection,
    // upload (control direction)
    WaitingForRequestFile,
    SectionReady,
    SendSection,
    WaitingForSectionAck,
    WaitingForFileAck,
}

/// Sans-IO file transfer state machine of a master.
pub struct FileClient {
    conn: ConnectionId,
    params: ApplicationLayerParameters,
    max_segment: usize,
    timeout: Duration,
    state: FileClientState,

    ca: u16,
    ioa: u32,
    nof: NameOfFile,
    section: u8,
    section_size: usize,
    offset: usize,
    section_checksum: u8,
    file_checksum: u8,

    receiver: Option<Box<dyn FileReceiver>>,
    provider: Option<Arc<dyn FileProvider>>,
    last_activity: Instant,
    outbox: VecDeque<Asdu>,
}

impl std::fmt::Debug for FileClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileClient")
            .field("conn", &self.conn)
            .field("state", &self.state)
            .field("ca", &self.ca)
            .field("ioa", &self.ioa)
            .field("section", &self.section)
            .finish()
    }
}

impl FileClient {
    pub fn new(conn: ConnectionId, params: ApplicationLayerParameters) -> Self {
        Self {
            conn,
            params,
            max_segment: max_segment_size(&params),
            timeout: DEFAULT_FILE_TIMEOUT,
            state: FileClientState::Idle,
            ca: 0,
            ioa: 0,
            nof: NameOfFile::DEFAULT,
            section: 0,
            section_size: 0,
            offset: 0,
            section_checksum: 0,
            file_checksum: 0,
            receiver: None,
            provider: None,
            last_activity: Instant::now(),
            outbox: VecDeque::new(),
        }
    }

    /// Watchdog for a transfer without progress.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> FileClientState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == FileClientState::Idle
    }

    /// Next ASDU to send.
    pub fn poll_transmit(&mut self) -> Option<Asdu> {
        self.outbox.pop_front()
    }

    /// Segments are waiting to be produced by `tick`.
    pub fn is_transmitting(&self) -> bool {
        self.state == FileClientState::SendSection
    }

    /// Start a download: SELECT FILE.
    pub fn request_file(
        &mut self,
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        receiver: Box<dyn FileReceiver>,
        now: Instant,
    ) -> Result<()> {
        self.begin(ca, ioa, nof)?;
        self.receiver = Some(receiver);
        tracing::debug!(conn = %self.conn, ca, ioa, nof = %nof, "file download requested");
        self.send_call(SelectAndCallQualifier::SelectFile, 0, now);
        self.state = FileClientState::WaitingForFileReady;
        Ok(())
    }

    /// Start an upload: FILE READY.
    pub fn send_file(
        &mut self,
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        provider: Arc<dyn FileProvider>,
        now: Instant,
    ) -> Result<()> {
        self.begin(ca, ioa, nof)?;
        let length = wire_length(provider.file_size());
        self.provider = Some(provider);
        tracing::debug!(conn = %self.conn, ca, ioa, nof = %nof, length, "file upload announced");
        self.send(
            Element::FileReady {
                nof,
                length,
                ready: true,
            },
            now,
        );
        self.state = FileClientState::WaitingForRequestFile;
        Ok(())
    }

    /// Ask the controlled station for its file directory. The F_DR_TA_1
    /// answers reach the application handler.
    pub fn request_directory(&mut self, ca: u16) -> Result<()> {
        let asdu = Asdu::with_object(
            &self.params,
            Cot::Request,
            ca,
            InformationObject::new(
                0,
                Element::CallOrSelect {
                    nof: NameOfFile::DEFAULT,
                    nos: 0,
                    qualifier: SelectAndCallQualifier::Default,
                    error: FileError::Default,
                },
            ),
        )?;
        self.outbox.push_back(asdu);
        Ok(())
    }

    /// The connection is gone; end a running transfer.
    pub fn close(&mut self) {
        if !self.is_idle() {
            tracing::debug!(conn = %self.conn, state = ?self.state, "file transfer ended by connection loss");
            self.finish(FileErrorCode::AbortedByRemote);
        }
        self.outbox.clear();
    }

    fn begin(&mut self, ca: u16, ioa: u32, nof: NameOfFile) -> Result<()> {
        if !self.is_idle() {
            return Err(Iec60870Error::FileTransferBusy);
        }
        self.ca = ca;
        self.ioa = ioa;
        self.nof = nof;
        self.section = 0;
        self.section_size = 0;
        self.offset = 0;
        self.section_checksum = 0;
        self.file_checksum = 0;
        Ok(())
    }

    fn send(&mut self, element: Element, now: Instant) {
        if let Some(asdu) = file_asdu(self.conn, &self.params, self.ca, self.ioa, element) {
            self.outbox.push_back(asdu);
        }
        self.last_activity = now;
    }

    fn send_call(&mut self, qualifier: SelectAndCallQualifier, nos: u8, now: Instant) {
        self.send(
            Element::CallOrSelect {
                nof: self.nof,
                nos,
                qualifier,
                error: FileError::Default,
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

    fn reset(&mut self) {
        self.receiver = None;
        self.provider = None;
        self.file_checksum = 0;
        self.state = FileClientState::Idle;
    }

    /// Report the result to whichever side of a transfer is running.
    fn finish(&mut self, result: FileErrorCode) {
        if let Some(provider) = &self.provider {
            provider.transfer_complete(result == FileErrorCode::Success);
        }
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.finished(result);
        }
        if result != FileErrorCode::Success {
            tracing::debug!(conn = %self.conn, result = %result, "file transfer failed");
        }
        self.reset();
    }

    /// Abort with DEACTIVATE FILE.
    fn abort(&mut self, result: FileErrorCode, now: Instant) {
        self.send_call(SelectAndCallQualifier::DeactivateFile, 0, now);
        self.finish(result);
    }

    /// Offer a received ASDU to the file service.
    pub fn handle_asdu(&mut self, asdu: &Asdu, now: Instant) -> Handling {
        if !asdu.type_id().is_file_service() || self.is_idle() {
            return Handling::Unhandled;
        }
        let object = match asdu.element(0) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(conn = %self.conn, error = %e, "malformed file service ASDU");
                self.abort(FileErrorCode::ProtocolError, now);
                return Handling::Handled;
            }
        };
        self.last_activity = now;

        match object.element {
            Element::CallOrSelect { qualifier, .. } => self.on_call(asdu, qualifier, now),
            Element::FileReady { nof, ready, .. } => self.on_file_ready(asdu, object.ioa, nof, ready, now),
            Element::SectionReady {
                nos, ready, length, ..
            } => self.on_section_ready(nos, ready, length, now),
            Element::Segment { nos, data, .. } => self.on_segment(nos, &data, now),
            Element::LastSegmentOrSection {
                nos,
                qualifier,
                checksum,
                ..
            } => self.on_last(nos, qualifier, checksum, now),
            Element::AckFileOrSection { qualifier, .. } => self.on_ack(asdu, qualifier, now),
            _ => return Handling::Unhandled,
        }
        Handling::Handled
    }

    fn on_call(&mut self, asdu: &Asdu, qualifier: SelectAndCallQualifier, now: Instant) {
        if qualifier == SelectAndCallQualifier::DeactivateFile {
            tracing::debug!(conn = %self.conn, state = ?self.state, "file deactivated by remote");
            self.finish(FileErrorCode::AbortedByRemote);
            return;
        }
        match self.state {
            // a download request came back as a negative mirror
            FileClientState::WaitingForFileReady => {
                let result = match asdu.cot() {
                    Cot::UnknownTypeId => FileErrorCode::UnknownService,
                    Cot::UnknownCommonAddress => FileErrorCode::UnknownCa,
                    Cot::UnknownIoa => FileErrorCode::UnknownIoa,
                    _ => FileErrorCode::ProtocolError,
                };
                self.finish(result);
            }
            FileClientState::WaitingForRequestFile => {
                if asdu.common_address() != self.ca || asdu.is_negative() {
                    self.finish(FileErrorCode::ProtocolError);
                    return;
                }
                self.section = 1;
                self.start_section(now);
            }
            FileClientState::SectionReady => {
                if asdu.common_address() == self.ca {
                    self.offset = 0;
                    self.section_checksum = 0;
                    self.state = FileClientState::SendSection;
                    self.tick(now);
                }
            }
            _ => self.finish(FileErrorCode::ProtocolError),
        }
    }

    /// Announce section `self.section` or close the file after the last one.
    fn start_section(&mut self, now: Instant) {
        let size = self
            .provider
            .as_ref()
            .and_then(|p| p.section_size(usize::from(self.section).saturating_sub(1)))
            .filter(|size| *size > 0);
        self.offset = 0;
        self.section_checksum = 0;
        match size {
            Some(size) => {
                self.section_size = size;
                self.send_section_ready(now);
                self.state = FileClientState::SectionReady;
            }
            None => {
                let file_checksum = self.file_checksum;
                self.send_last(LastSectionQualifier::FileTransferWithoutDeact, file_checksum, now);
                self.state = FileClientState::WaitingForFileAck;
            }
        }
    }

    fn on_file_ready(&mut self, asdu: &Asdu, ioa: u32, nof: NameOfFile, ready: bool, now: Instant) {
        match self.state {
            FileClientState::WaitingForFileReady => {
                if asdu.common_address() != self.ca || ioa != self.ioa || nof != self.nof {
                    self.finish(FileErrorCode::ProtocolError);
                } else if ready && !asdu.is_negative() {
                    self.send_call(SelectAndCallQualifier::RequestFile, 0, now);
                    self.state = FileClientState::WaitingForSectionReady;
                } else {
                    self.finish(FileErrorCode::FileNotReady);
                }
            }
            // the announcement was rejected
            FileClientState::WaitingForRequestFile => self.finish(FileErrorCode::FileNotReady),
            _ => self.abort(FileErrorCode::ProtocolError, now),
        }
    }

    fn on_section_ready(&mut self, nos: u8, ready: bool, length: u32, now: Instant) {
        if self.state != FileClientState::WaitingForSectionReady {
            self.finish(FileErrorCode::ProtocolError);
            return;
        }
        if !ready {
            self.abort(FileErrorCode::SectionNotReady, now);
            return;
        }
        tracing::trace!(conn = %self.conn, section = nos, length, "calling section");
        self.section = nos;
        self.offset = 0;
        self.section_checksum = 0;
        self.send_call(SelectAndCallQualifier::RequestSection, nos, now);
        self.state = FileClientState::ReceivingSection;
    }

    fn on_segment(&mut self, nos: u8, data: &[u8], now: Instant) {
        if self.state != FileClientState::ReceivingSection {
            self.abort(FileErrorCode::ProtocolError, now);
            return;
        }
        self.section_checksum = self.section_checksum.wrapping_add(checksum(data));
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.segment_received(nos, self.offset, data);
        }
        self.offset += data.len();
    }

    fn on_last(&mut self, nos: u8, qualifier: LastSectionQualifier, remote: u8, now: Instant) {
        match qualifier {
            LastSectionQualifier::SectionTransferWithoutDeact => {
                if self.state != FileClientState::ReceivingSection {
                    self.abort(FileErrorCode::ProtocolError, now);
                    return;
                }
                if remote == self.section_checksum {
                    self.file_checksum = self.file_checksum.wrapping_add(remote);
                    self.send_ack(nos, AckQualifier::PosAckSection, FileError::Default, now);
                } else {
                    tracing::debug!(
                        conn = %self.conn,
                        section = nos,
                        expected = remote,
                        actual = self.section_checksum,
                        "section checksum mismatch"
                    );
                    self.send_ack(nos, AckQualifier::NegAckSection, FileError::ChecksumFailed, now);
                }
                self.state = FileClientState::WaitingForSectionReady;
            }
            LastSectionQualifier::FileTransferWithDeact => self.finish(FileErrorCode::AbortedByRemote),
            LastSectionQualifier::FileTransferWithoutDeact => {
                if self.state != FileClientState::WaitingForSectionReady {
                    self.abort(FileErrorCode::ProtocolError, now);
                } else if remote == self.file_checksum {
                    self.send_ack(nos, AckQualifier::PosAckFile, FileError::Default, now);
                    self.finish(FileErrorCode::Success);
                } else {
                    self.send_ack(nos, AckQualifier::NegAckFile, FileError::ChecksumFailed, now);
                    self.finish(FileErrorCode::ProtocolError);
                }
            }
            _ => {}
        }
    }

    fn on_ack(&mut self, asdu: &Asdu, qualifier: AckQualifier, now: Instant) {
        let valid = asdu.common_address() == self.ca && asdu.cot() == Cot::FileTransfer;
        match (self.state, qualifier) {
            (FileClientState::WaitingForSectionAck, AckQualifier::PosAckSection) if valid => {
                self.file_checksum = self.file_checksum.wrapping_add(self.section_checksum);
                self.section = self.section.wrapping_add(1);
                self.start_section(now);
            }
            (FileClientState::WaitingForSectionAck, AckQualifier::NegAckSection) if valid => {
                tracing::debug!(conn = %self.conn, section = self.section, "section rejected, resending");
                self.offset = 0;
                self.section_checksum = 0;
                self.send_section_ready(now);
                self.state = FileClientState::SectionReady;
            }
            (FileClientState::WaitingForFileAck, AckQualifier::PosAckFile) if valid => {
                tracing::debug!(conn = %self.conn, ioa = self.ioa, "file upload complete");
                self.finish(FileErrorCode::Success);
            }
            (FileClientState::WaitingForSectionAck | FileClientState::WaitingForFileAck, _) => {
                self.finish(FileErrorCode::ProtocolError);
            }
            _ => {}
        }
    }

    /// Produce the next segment of an upload and check the watchdog.
    pub fn tick(&mut self, now: Instant) {
        if self.state == FileClientState::SendSection {
            let remaining = self.section_size.saturating_sub(self.offset);
            if remaining == 0 {
                let section_checksum = self.section_checksum;
                self.send_last(LastSectionQualifier::SectionTransferWithoutDeact, section_checksum, now);
                self.state = FileClientState::WaitingForSectionAck;
            } else {
                let len = remaining.min(self.max_segment);
                let data = self.provider.as_ref().and_then(|p| {
                    p.segment(usize::from(self.section).saturating_sub(1), self.offset, len)
                });
                match data {
                    Some(data) => {
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
                    None => {
                        tracing::warn!(conn = %self.conn, section = self.section, offset = self.offset, "file data unavailable");
                        self.send_last(LastSectionQualifier::FileTransferWithDeact, 0, now);
                        self.finish(FileErrorCode::ProtocolError);
                    }
                }
            }
        }

        if !self.is_idle() && now.saturating_duration_since(self.last_activity) > self.timeout {
            tracing::warn!(conn = %self.conn, state = ?self.state, "file transfer timed out");
            self.finish(FileErrorCode::Timeout);
        }
    }
}
