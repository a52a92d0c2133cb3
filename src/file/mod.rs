//! File transfer service (F_* types 120..=126).
//!
//! A file is an ordered list of sections; each section travels as segments
//! that fit one ASDU, closed by a "last segment" message carrying the
//! additive checksum of the section. The file itself is closed by a "last
//! section" message carrying the sum of all section checksums.
//!
//! [`FileClient`] is the controlling side (download with `request_file`,
//! upload with `send_file`), [`FileServer`] the controlled side. Both are
//! sans-IO: ASDUs go in through `handle_asdu`, periodic work happens in
//! `tick`, and outgoing ASDUs are collected with `poll_transmit`.

mod client;
mod server;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::connection::ConnectionId;
use crate::object::{Element, InformationObject, NameOfFile, SOF_LFD};
use crate::types::{ApplicationLayerParameters, Asdu, AsduBuilder, Cot, Cp56Time2a};

pub use client::{FileClient, FileClientState};
pub use server::{FileServer, FileServerState};

/// Default watchdog of a transfer without progress.
pub const DEFAULT_FILE_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(3000);

/// Result of a file transfer as reported to a [`FileReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileErrorCode {
    Success,
    Timeout,
    FileNotReady,
    SectionNotReady,
    UnknownCa,
    UnknownIoa,
    UnknownService,
    ProtocolError,
    AbortedByRemote,
}

impl fmt::Display for FileErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::FileNotReady => "file not ready",
            Self::SectionNotReady => "section not ready",
            Self::UnknownCa => "unknown common address",
            Self::UnknownIoa => "unknown information object address",
            Self::UnknownService => "unknown service",
            Self::ProtocolError => "protocol error",
            Self::AbortedByRemote => "aborted by remote",
        };
        f.write_str(s)
    }
}

/// Sink of a file being received.
pub trait FileReceiver: Send {
    /// Terminal callback; called exactly once per transfer.
    fn finished(&mut self, result: FileErrorCode);

    /// One segment of `section` (numbered from 1) at byte `offset` within it.
    fn segment_received(&mut self, section: u8, offset: usize, data: &[u8]);
}

/// Source of a file being sent.
pub trait FileProvider: Send + Sync {
    fn ca(&self) -> u16;

    fn ioa(&self) -> u32;

    fn name_of_file(&self) -> NameOfFile;

    fn file_date(&self) -> DateTime<Utc>;

    /// Total size in bytes.
    fn file_size(&self) -> usize;

    /// Size of section `section` (numbered from 0), `None` past the last one.
    fn section_size(&self, section: usize) -> Option<usize>;

    /// `len` bytes of section `section` (numbered from 0) starting at `offset`.
    fn segment(&self, section: usize, offset: usize, len: usize) -> Option<Bytes>;

    /// The transfer ended; `success` means the peer acknowledged the file.
    fn transfer_complete(&self, success: bool);
}

/// Accepts files announced by a master with F_FR_NA_1.
pub trait FileReadyHandler: Send + Sync {
    /// Return a receiver to accept the file, `None` to reject it.
    fn file_ready(
        &self,
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        length: usize,
    ) -> Option<Box<dyn FileReceiver>>;
}

impl<F> FileReadyHandler for F
where
    F: Fn(u16, u32, NameOfFile, usize) -> Option<Box<dyn FileReceiver>> + Send + Sync,
{
    fn file_ready(
        &self,
        ca: u16,
        ioa: u32,
        nof: NameOfFile,
        length: usize,
    ) -> Option<Box<dyn FileReceiver>> {
        self(ca, ioa, nof, length)
    }
}

/// Additive (mod 256) checksum of file data.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Largest segment payload that fits one ASDU.
pub fn max_segment_size(params: &ApplicationLayerParameters) -> usize {
    params
        .max_asdu_length
        .saturating_sub(params.header_len() + params.size_of_ioa + crate::object::SEGMENT_HEADER_SIZE)
}

/// Lengths travel as 24 bit fields.
pub(crate) fn wire_length(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX).min(0x00FF_FFFF)
}

/// Build a single-object file service ASDU, logging when it does not fit.
pub(crate) fn file_asdu(
    conn: ConnectionId,
    params: &ApplicationLayerParameters,
    ca: u16,
    ioa: u32,
    element: Element,
) -> Option<Asdu> {
    match Asdu::with_object(params, Cot::FileTransfer, ca, InformationObject::new(ioa, element)) {
        Ok(asdu) => Some(asdu),
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "cannot build file service ASDU");
            None
        }
    }
}

/// In-memory file made of sections.
#[derive(Debug)]
pub struct TransparentFile {
    ca: u16,
    ioa: u32,
    nof: NameOfFile,
    date: DateTime<Utc>,
    sections: Vec<Bytes>,
}

impl TransparentFile {
    pub fn new(ca: u16, ioa: u32, nof: NameOfFile) -> Self {
        Self {
            ca,
            ioa,
            nof,
            date: Utc::now(),
            sections: Vec::new(),
        }
    }

    /// Append a section.
    pub fn add_section(&mut self, data: impl Into<Bytes>) {
        self.sections.push(data.into());
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn sections(&self) -> &[Bytes] {
        &self.sections
    }
}

impl FileProvider for TransparentFile {
    fn ca(&self) -> u16 {
        self.ca
    }

    fn ioa(&self) -> u32 {
        self.ioa
    }

    fn name_of_file(&self) -> NameOfFile {
        self.nof
    }

    fn file_date(&self) -> DateTime<Utc> {
        self.date
    }

    fn file_size(&self) -> usize {
        self.sections.iter().map(Bytes::len).sum()
    }

    fn section_size(&self, section: usize) -> Option<usize> {
        self.sections.get(section).map(Bytes::len)
    }

    fn segment(&self, section: usize, offset: usize, len: usize) -> Option<Bytes> {
        let data = self.sections.get(section)?;
        let end = offset.checked_add(len)?;
        (end <= data.len()).then(|| data.slice(offset..end))
    }

    fn transfer_complete(&self, _success: bool) {}
}

/// Outcome of selecting a file from [`AvailableFiles`].
pub(crate) enum Selection {
    NotFound,
    Busy,
    Selected(Arc<dyn FileProvider>),
}

struct AvailableFile {
    provider: Arc<dyn FileProvider>,
    selected_by: Option<ConnectionId>,
}

/// Files a controlled station offers for download, shared by all its
/// connections. A file can be selected by one connection at a time.
#[derive(Default)]
pub struct AvailableFiles {
    files: Mutex<Vec<AvailableFile>>,
}

impl fmt::Debug for AvailableFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvailableFiles")
            .field("files", &self.files.lock().len())
            .finish()
    }
}

impl AvailableFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, provider: Arc<dyn FileProvider>) {
        self.files.lock().push(AvailableFile {
            provider,
            selected_by: None,
        });
    }

    /// Remove a file; returns whether it was present.
    pub fn remove_file(&self, provider: &Arc<dyn FileProvider>) -> bool {
        let mut files = self.files.lock();
        let before = files.len();
        files.retain(|f| !Arc::ptr_eq(&f.provider, provider));
        files.len() != before
    }

    pub fn files(&self) -> Vec<Arc<dyn FileProvider>> {
        self.files.lock().iter().map(|f| f.provider.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    fn matches(file: &AvailableFile, ca: u16, ioa: u32, nof: NameOfFile) -> bool {
        file.provider.ca() == ca
            && file.provider.ioa() == ioa
            && (nof == NameOfFile::DEFAULT || nof == file.provider.name_of_file())
    }

    pub(crate) fn select(&self, ca: u16, ioa: u32, nof: NameOfFile, by: ConnectionId) -> Selection {
        let mut files = self.files.lock();
        let Some(file) = files.iter_mut().find(|f| Self::matches(f, ca, ioa, nof)) else {
            return Selection::NotFound;
        };
        match file.selected_by {
            Some(_) => Selection::Busy,
            None => {
                file.selected_by = Some(by);
                Selection::Selected(file.provider.clone())
            }
        }
    }

    pub(crate) fn release(&self, provider: &Arc<dyn FileProvider>) {
        if let Some(file) = self
            .files
            .lock()
            .iter_mut()
            .find(|f| Arc::ptr_eq(&f.provider, provider))
        {
            file.selected_by = None;
        }
    }

    /// Delete an unselected file; `None` if no such file exists.
    pub(crate) fn delete(&self, ca: u16, ioa: u32, nof: NameOfFile) -> Option<bool> {
        let mut files = self.files.lock();
        let pos = files.iter().position(|f| Self::matches(f, ca, ioa, nof))?;
        if files[pos].selected_by.is_some() {
            return Some(false);
        }
        files.remove(pos);
        Some(true)
    }

    /// Directory as F_DR_TA_1 sequences. A new ASDU starts when the common
    /// address changes, addresses are not consecutive or the ASDU is full.
    pub fn directory(&self, params: &ApplicationLayerParameters, cot: Cot) -> Vec<Asdu> {
        let files = self.files.lock();
        let mut out = Vec::new();
        let mut current: Option<(u16, u32, AsduBuilder)> = None;

        for (i, file) in files.iter().enumerate() {
            let p = &file.provider;
            let status = if i + 1 == files.len() { SOF_LFD } else { 0 };
            let object = InformationObject::new(
                p.ioa(),
                Element::Directory {
                    nof: p.name_of_file(),
                    length: wire_length(p.file_size()),
                    status,
                    time: Cp56Time2a::from_datetime(&p.file_date()),
                },
            );

            let continues = matches!(
                &current,
                Some((ca, ioa, _)) if *ca == p.ca() && ioa.wrapping_add(1) == p.ioa()
            );
            if !continues {
                flush_directory(current.take(), &mut out);
            }

            let (_, last, builder) = current
                .get_or_insert_with(|| (p.ca(), p.ioa(), AsduBuilder::new(params, cot, p.ca()).sequence(true)));
            if !builder.add_information_object(&object) {
                let full = std::mem::replace(builder, AsduBuilder::new(params, cot, p.ca()).sequence(true));
                flush_directory(Some((p.ca(), *last, full)), &mut out);
                builder.add_information_object(&object);
            }
            *last = p.ioa();
        }
        flush_directory(current, &mut out);
        out
    }
}

fn flush_directory(current: Option<(u16, u32, AsduBuilder)>, out: &mut Vec<Asdu>) {
    let Some((_, _, builder)) = current else {
        return;
    };
    if builder.count() == 0 {
        return;
    }
    match builder.build() {
        Ok(asdu) => out.push(asdu),
        Err(e) => tracing::warn!(error = %e, "dropping directory ASDU"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeId;

    fn file(ca: u16, ioa: u32, sections: &[&[u8]]) -> Arc<dyn FileProvider> {
        let mut f = TransparentFile::new(ca, ioa, NameOfFile::TRANSPARENT_FILE);
        for s in sections {
            f.add_section(Bytes::copy_from_slice(s));
        }
        Arc::new(f)
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_max_segment_size() {
        assert_eq!(max_segment_size(&ApplicationLayerParameters::iec104()), 249 - 6 - 3 - 4);
    }

    #[test]
    fn test_transparent_file() {
        let mut f = TransparentFile::new(1, 100, NameOfFile::TRANSPARENT_FILE);
        f.add_section(Bytes::from_static(b"hello"));
        f.add_section(Bytes::from_static(b"abc"));

        assert_eq!(f.file_size(), 8);
        assert_eq!(f.section_size(1), Some(3));
        assert_eq!(f.section_size(2), None);
        assert_eq!(f.segment(0, 1, 3).unwrap(), Bytes::from_static(b"ell"));
        assert!(f.segment(0, 4, 3).is_none());
    }

    #[test]
    fn test_select_is_exclusive() {
        let files = AvailableFiles::new();
        let f = file(1, 100, &[b"x"]);
        files.add_file(f.clone());

        assert!(matches!(files.select(1, 101, NameOfFile::DEFAULT, ConnectionId(1)), Selection::NotFound));
        assert!(matches!(files.select(1, 100, NameOfFile::DEFAULT, ConnectionId(1)), Selection::Selected(_)));
        assert!(matches!(files.select(1, 100, NameOfFile::DEFAULT, ConnectionId(2)), Selection::Busy));
        assert_eq!(files.delete(1, 100, NameOfFile::DEFAULT), Some(false));

        files.release(&f);
        assert!(matches!(files.select(1, 100, NameOfFile::TRANSPARENT_FILE, ConnectionId(2)), Selection::Selected(_)));
        files.release(&f);
        assert_eq!(files.delete(1, 100, NameOfFile::DEFAULT), Some(true));
        assert!(files.is_empty());
    }

    #[test]
    fn test_directory_splits_on_gap_and_ca() {
        let files = AvailableFiles::new();
        files.add_file(file(1, 100, &[b"abc"]));
        files.add_file(file(1, 101, &[b"de"]));
        files.add_file(file(1, 105, &[b"f"]));
        files.add_file(file(2, 106, &[b"g"]));

        let params = ApplicationLayerParameters::iec104();
        let dir = files.directory(&params, Cot::Request);
        assert_eq!(dir.len(), 3);
        assert_eq!(dir[0].type_id(), TypeId::F_DR_TA_1);
        assert!(dir[0].is_sequence());
        assert_eq!(dir[0].count(), 2);
        assert_eq!(dir[1].count(), 1);
        assert_eq!(dir[2].common_address(), 2);

        let last = dir[2].element(0).unwrap();
        match last.element {
            Element::Directory { status, length, .. } => {
                assert_eq!(status, SOF_LFD);
                assert_eq!(length, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        let first = dir[0].element(1).unwrap();
        assert_eq!(first.ioa, 101);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(FileErrorCode::Timeout.to_string(), "timeout");
        assert_eq!(FileErrorCode::AbortedByRemote.to_string(), "aborted by remote");
    }
}
