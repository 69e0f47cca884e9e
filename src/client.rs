//
// client.rs
// Dicom-Courier-rs
//
// Delivery client: pushes one stored file to the configured archive with C-STORE
// and checks reachability with C-ECHO. Every failure is reduced to an ErrorKind.
//
// Dicom-Courier-rs contributors - October 2026

use std::error::Error as StdError;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dicom::core::VR;
use dicom::dictionary_std::tags;
use dicom::encoding::transfer_syntax::TransferSyntaxIndex;
use dicom::object::open_file;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom_ul::association::client::{self, ClientAssociation, ClientAssociationOptions};
use dicom_ul::pdu::{
    AssociationRJServiceProviderPresentationReason, AssociationRJServiceUserReason,
    AssociationRJSource, PDataValue, PDataValueType, Pdu, PresentationContextResultReason,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{self, TagValue, VrMode};
use crate::error::{CodecError, ErrorKind};
use crate::models::DestinationConfig;

pub const VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";
const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";

const C_STORE_RQ: u16 = 0x0001;
const C_ECHO_RQ: u16 = 0x0030;
const DATASET_PRESENT: u16 = 0x0000;
const NO_DATASET: u16 = 0x0101;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// Pushes a single file to a storage destination.
///
/// Implementations must classify every failure themselves; the queue only
/// looks at the returned [`Outcome`].
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Deliver `path`, giving up once `deadline` has elapsed.
    async fn attempt(
        &self,
        path: &Path,
        destination: &DestinationConfig,
        deadline: Duration,
    ) -> Outcome;

    async fn test_connection(&self, destination: &DestinationConfig) -> bool;
}

/// Counters kept across attempts, exposed to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// DIMSE client over a plain TCP association.
#[derive(Debug)]
pub struct DimseClient {
    stats: Mutex<ClientStats>,
    message_id: AtomicU16,
}

impl Default for DimseClient {
    fn default() -> Self {
        Self {
            stats: Mutex::new(ClientStats::default()),
            message_id: AtomicU16::new(1),
        }
    }
}

impl DimseClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Verify the destination answers a C-ECHO within its configured timeout.
    pub async fn echo(&self, destination: &DestinationConfig) -> Outcome {
        if destination.use_tls {
            return tls_unsupported();
        }
        let dest = destination.clone();
        let message_id = self.next_message_id();
        // same floor as a delivery attempt, a zero timeout would never connect
        let deadline = destination.timeout().max(Duration::from_secs(1));
        run_blocking(deadline, move || echo_blocking(&dest, message_id, deadline)).await
    }

    fn next_message_id(&self) -> u16 {
        // zero is not a valid message id
        loop {
            let id = self.message_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn record(&self, outcome: &Outcome) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.attempts += 1;
        match outcome {
            Outcome::Success => {
                stats.successes += 1;
                stats.last_success = Some(Utc::now());
            }
            Outcome::Failure { kind, message } => {
                stats.failures += 1;
                stats.last_error = Some(format!("{}: {}", kind, message));
            }
        }
    }
}

#[async_trait]
impl DeliveryClient for DimseClient {
    async fn attempt(
        &self,
        path: &Path,
        destination: &DestinationConfig,
        deadline: Duration,
    ) -> Outcome {
        let outcome = if destination.use_tls {
            tls_unsupported()
        } else {
            let path = path.to_path_buf();
            let dest = destination.clone();
            let message_id = self.next_message_id();
            run_blocking(deadline, move || {
                store_blocking(&path, &dest, message_id, deadline)
            })
            .await
        };
        self.record(&outcome);
        outcome
    }

    async fn test_connection(&self, destination: &DestinationConfig) -> bool {
        if !destination.enabled {
            return false;
        }
        match self.echo(destination).await {
            Outcome::Success => true,
            Outcome::Failure { kind, message } => {
                warn!(destination = %destination, %kind, "echo failed: {}", message);
                false
            }
        }
    }
}

fn tls_unsupported() -> Outcome {
    Outcome::failure(
        ErrorKind::RejectedByDestination,
        "transport security is not supported",
    )
}

/// Run a blocking association on the blocking pool under `deadline`.
///
/// The association carries the same deadline on its socket, so a thread left
/// behind by the outer timeout ends on its next read or write.
async fn run_blocking<F>(deadline: Duration, job: F) -> Outcome
where
    F: FnOnce() -> Result<(), Failure> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(job)).await {
        Ok(Ok(Ok(()))) => Outcome::Success,
        Ok(Ok(Err(failure))) => Outcome::Failure {
            kind: failure.kind,
            message: failure.message,
        },
        Ok(Err(join)) => {
            Outcome::failure(ErrorKind::Unknown, format!("delivery task failed: {}", join))
        }
        Err(_) => Outcome::failure(
            ErrorKind::Timeout,
            format!("no completion within {} ms", deadline.as_millis()),
        ),
    }
}

#[derive(Debug)]
struct Failure {
    kind: ErrorKind,
    message: String,
}

impl Failure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<client::Error> for Failure {
    fn from(e: client::Error) -> Self {
        if timed_out(&e) {
            return Failure::new(ErrorKind::Timeout, e.to_string());
        }
        let kind = match &e {
            client::Error::Connect { source, .. } => io_kind(source),
            client::Error::Rejected { association_rj, .. } => {
                rejection_kind(&association_rj.source)
            }
            client::Error::NoAcceptedPresentationContexts { .. } => {
                ErrorKind::RejectedByDestination
            }
            client::Error::WireSend { source, .. } => io_kind(source),
            client::Error::SendRequest { .. }
            | client::Error::ReceiveResponse { .. }
            | client::Error::Receive { .. } => ErrorKind::NetworkError,
            _ => ErrorKind::Unknown,
        };
        Failure::new(kind, e.to_string())
    }
}

impl From<io::Error> for Failure {
    fn from(e: io::Error) -> Self {
        Failure::new(io_kind(&e), e.to_string())
    }
}

/// Socket timeouts surface as an io error somewhere down the source chain.
fn timed_out(e: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(e);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            if io_kind(io) == ErrorKind::Timeout {
                return true;
            }
        }
        current = err.source();
    }
    false
}

fn io_kind(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
        _ => ErrorKind::NetworkError,
    }
}

/// Classify an A-ASSOCIATE-RJ by its source and reason.
pub fn rejection_kind(source: &AssociationRJSource) -> ErrorKind {
    match source {
        AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CallingAETitleNotRecognized
            | AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        ) => ErrorKind::AuthenticationFailed,
        AssociationRJSource::ServiceProviderPresentation(
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion
            | AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
        ) => ErrorKind::ResourceExhausted,
        _ => ErrorKind::RejectedByDestination,
    }
}

/// Classify a DIMSE response status; `None` means the operation succeeded.
pub fn status_kind(status: u16) -> Option<ErrorKind> {
    match status {
        // success and warnings
        0x0000 | 0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => None,
        0x0124 => Some(ErrorKind::AuthenticationFailed),
        0xA700..=0xA7FF => Some(ErrorKind::ResourceExhausted),
        0x0122 | 0xA900..=0xA9FF | 0xC000..=0xCFFF => Some(ErrorKind::RejectedByDestination),
        _ => Some(ErrorKind::Unknown),
    }
}

/// Encode a command set in implicit VR little endian, led by its group length.
pub fn command_set(elements: &[TagValue]) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::with_capacity(128);
    for element in elements {
        codec::write_element(&mut body, VrMode::Implicit, element.tag, element.vr, &element.bytes)?;
    }
    let mut out = Vec::with_capacity(body.len() + 12);
    codec::write_element(
        &mut out,
        VrMode::Implicit,
        tags::COMMAND_GROUP_LENGTH,
        VR::UL,
        &(body.len() as u32).to_le_bytes(),
    )?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Find the Status element of a response command set.
pub fn response_status(command: &[u8]) -> Result<Option<u16>, CodecError> {
    let mut pos = 0;
    while pos < command.len() {
        let (element, used) = codec::decode_implicit(&command[pos..])?;
        pos += used;
        if element.tag == tags::STATUS {
            return Ok(element.as_u16());
        }
    }
    Ok(None)
}

/// Open an association proposing exactly one presentation context.
///
/// `deadline` bounds the connect and every later socket read and write.
fn establish(
    destination: &DestinationConfig,
    abstract_syntax: &str,
    transfer_syntax: &str,
    deadline: Duration,
) -> Result<(ClientAssociation<std::net::TcpStream>, u8), Failure> {
    let addr = format!("{}:{}", destination.host, destination.port);
    let association = ClientAssociationOptions::new()
        .calling_ae_title(destination.calling_ae_title.as_str())
        .called_ae_title(destination.called_ae_title.as_str())
        .with_presentation_context(abstract_syntax, vec![transfer_syntax])
        .connection_timeout(deadline)
        .read_timeout(deadline)
        .write_timeout(deadline)
        .establish(addr.as_str())?;

    let accepted = association
        .presentation_contexts()
        .iter()
        .find(|pc| {
            pc.reason == PresentationContextResultReason::Acceptance
                && pc.transfer_syntax.trim_end_matches(['\0', ' ']) == transfer_syntax
        })
        .map(|pc| pc.id);
    match accepted {
        Some(id) => Ok((association, id)),
        None => {
            let _ = association.abort();
            Err(Failure::new(
                ErrorKind::RejectedByDestination,
                format!("{} was not accepted with {}", abstract_syntax, transfer_syntax),
            ))
        }
    }
}

fn store_blocking(
    path: &Path,
    destination: &DestinationConfig,
    message_id: u16,
    deadline: Duration,
) -> Result<(), Failure> {
    // anything that cannot be read or re-encoded will never deliver, retrying is pointless
    let unreadable = |reason: String| {
        Failure::new(
            ErrorKind::SourceNotFound,
            format!("{} is not a readable DICOM file: {}", path.display(), reason),
        )
    };
    let object = open_file(path).map_err(|e| unreadable(e.to_string()))?;
    let meta = object.meta();
    let ts_uid = trim_uid(meta.transfer_syntax()).to_string();
    let ts = TransferSyntaxRegistry
        .get(&ts_uid)
        .ok_or_else(|| unreadable(format!("unknown transfer syntax {}", ts_uid)))?;
    let sop_class = trim_uid(meta.media_storage_sop_class_uid()).to_string();
    let sop_instance = trim_uid(meta.media_storage_sop_instance_uid()).to_string();

    // the data set goes out in the file's own transfer syntax, without the meta group
    let mut object_data = Vec::new();
    object
        .write_dataset_with_ts(&mut object_data, ts)
        .map_err(|e| unreadable(e.to_string()))?;

    let command = command_set(&[
        TagValue::uid(tags::AFFECTED_SOP_CLASS_UID, &sop_class),
        TagValue::u16(tags::COMMAND_FIELD, C_STORE_RQ),
        TagValue::u16(tags::MESSAGE_ID, message_id),
        TagValue::u16(tags::PRIORITY, 0),
        TagValue::u16(tags::COMMAND_DATA_SET_TYPE, DATASET_PRESENT),
        TagValue::uid(tags::AFFECTED_SOP_INSTANCE_UID, &sop_instance),
    ])
    .map_err(|e| Failure::new(ErrorKind::Unknown, e.to_string()))?;

    let (mut association, pc_id) = establish(destination, &sop_class, &ts_uid, deadline)?;
    info!(
        destination = %destination,
        sop_instance = %sop_instance,
        size = object_data.len(),
        "sending C-STORE"
    );

    // small objects fit in one PDU next to the command, larger ones are streamed
    let nbytes = command.len() + object_data.len();
    if nbytes < association.acceptor_max_pdu_length().saturating_sub(100) as usize {
        association.send(&Pdu::PData {
            data: vec![
                PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: command,
                },
                PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data: object_data,
                },
            ],
        })?;
    } else {
        association.send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: pc_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: command,
            }],
        })?;
        let mut pdata = association.send_pdata(pc_id);
        pdata.write_all(&object_data)?;
        pdata.finish()?;
    }

    let status = receive_status(&mut association)?;
    let _ = association.release();
    debug!(status = format_args!("{:04X}H", status), "C-STORE response");

    match status_kind(status) {
        None => {
            if status != 0 {
                warn!(sop_instance = %sop_instance, "stored with warning status {:04X}H", status);
            }
            Ok(())
        }
        Some(kind) => Err(Failure::new(
            kind,
            format!("destination answered status {:04X}H", status),
        )),
    }
}

fn echo_blocking(
    destination: &DestinationConfig,
    message_id: u16,
    deadline: Duration,
) -> Result<(), Failure> {
    let (mut association, pc_id) = establish(
        destination,
        VERIFICATION_SOP_CLASS,
        IMPLICIT_VR_LITTLE_ENDIAN,
        deadline,
    )?;
    let command = command_set(&[
        TagValue::uid(tags::AFFECTED_SOP_CLASS_UID, VERIFICATION_SOP_CLASS),
        TagValue::u16(tags::COMMAND_FIELD, C_ECHO_RQ),
        TagValue::u16(tags::MESSAGE_ID, message_id),
        TagValue::u16(tags::COMMAND_DATA_SET_TYPE, NO_DATASET),
    ])
    .map_err(|e| Failure::new(ErrorKind::Unknown, e.to_string()))?;

    association.send(&Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: pc_id,
            value_type: PDataValueType::Command,
            is_last: true,
            data: command,
        }],
    })?;
    let status = receive_status(&mut association)?;
    let _ = association.release();
    match status_kind(status) {
        None => Ok(()),
        Some(kind) => Err(Failure::new(kind, format!("echo answered status {:04X}H", status))),
    }
}

fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches(['\0', ' '])
}

/// Collect command fragments until the last one and read its status.
fn receive_status(association: &mut ClientAssociation<std::net::TcpStream>) -> Result<u16, Failure> {
    let mut command = Vec::new();
    loop {
        match association.receive()? {
            Pdu::PData { data } => {
                // data fragments are not expected on a response and are dropped
                let mut complete = false;
                for pdv in data {
                    if pdv.value_type == PDataValueType::Command {
                        command.extend_from_slice(&pdv.data);
                        complete |= pdv.is_last;
                    }
                }
                if complete {
                    break;
                }
            }
            Pdu::ReleaseRQ => {
                return Err(Failure::new(
                    ErrorKind::NetworkError,
                    "destination released the association before answering",
                ))
            }
            other => {
                return Err(Failure::new(
                    ErrorKind::NetworkError,
                    format!("unexpected response from destination: {:?}", other),
                ))
            }
        }
    }
    match response_status(&command) {
        Ok(Some(status)) => Ok(status),
        Ok(None) => Err(Failure::new(ErrorKind::Unknown, "response carries no status")),
        Err(e) => Err(Failure::new(ErrorKind::Unknown, format!("malformed response: {}", e))),
    }
}
