//
// dimse_exchange.rs
// Dicom-Courier-rs
//
// Delivery against an in-process storage provider built on dicom-ul: stores sent in
// one PDU and streamed, status mapping, rejected associations and a stalled peer.
//
// Dicom-Courier-rs contributors - October 2026

use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dicom::core::value::Value;
use dicom::core::{DataElement, Length, PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::encoding::transfer_syntax::TransferSyntaxIndex;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom_courier::batch;
use dicom_courier::builder::{DatasetBuilder, ImageSpec, PixelPayload, SECONDARY_CAPTURE};
use dicom_courier::client::{
    command_set, DeliveryClient, DimseClient, Outcome, VERIFICATION_SOP_CLASS,
};
use dicom_courier::codec::TagValue;
use dicom_courier::dataset::TransferSyntax;
use dicom_courier::error::ErrorKind;
use dicom_courier::models::{DestinationConfig, PatientRecord, StudyRecord};
use dicom_courier::uid::UidGenerator;
use dicom_ul::association::server::ServerAssociationOptions;
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu};
use tempfile::{tempdir, TempDir};

const ARCHIVE_AE: &str = "ARCHIVE";
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// One DIMSE request as the archive saw it.
struct Received {
    command_field: u16,
    message_id: u16,
    affected_sop_class: String,
    affected_sop_instance: String,
    dataset: Option<InMemDicomObject>,
    /// P-DATA-TF PDUs that carried the request.
    pdus: usize,
}

/// Accept one association and answer every request with `status`.
fn spawn_archive(status: u16) -> (u16, JoinHandle<Vec<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve(stream, status)
    });
    (port, handle)
}

fn serve(stream: TcpStream, status: u16) -> Vec<Received> {
    let options = ServerAssociationOptions::new()
        .accept_called_ae_title()
        .ae_title(ARCHIVE_AE)
        .with_abstract_syntax(SECONDARY_CAPTURE)
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .with_transfer_syntax(IMPLICIT_VR_LE)
        .with_transfer_syntax(EXPLICIT_VR_LE);
    // a rejected association ends here, after the A-ASSOCIATE-RJ went out
    let Ok(mut association) = options.establish(stream) else {
        return Vec::new();
    };

    let mut received = Vec::new();
    let mut command: Option<InMemDicomObject> = None;
    let mut data = Vec::new();
    let mut pdus = 0;
    loop {
        let values = match association.receive() {
            Ok(Pdu::PData { data }) => data,
            Ok(Pdu::ReleaseRQ) => {
                let _ = association.send(&Pdu::ReleaseRP);
                break;
            }
            Ok(_) => continue,
            Err(_) => break,
        };
        pdus += 1;
        for value in values {
            let pc_id = value.presentation_context_id;
            let complete = match value.value_type {
                PDataValueType::Command => {
                    let parsed = read_with(&value.data, IMPLICIT_VR_LE);
                    let has_dataset = number(&parsed, tags::COMMAND_DATA_SET_TYPE) != 0x0101;
                    command = Some(parsed);
                    value.is_last && !has_dataset
                }
                PDataValueType::Data => {
                    data.extend_from_slice(&value.data);
                    value.is_last
                }
            };
            if !complete {
                continue;
            }
            let Some(request) = command.take() else {
                continue;
            };
            let dataset = (!data.is_empty()).then(|| read_with(&data, EXPLICIT_VR_LE));
            data.clear();
            let request = Received {
                command_field: number(&request, tags::COMMAND_FIELD),
                message_id: number(&request, tags::MESSAGE_ID),
                affected_sop_class: text(&request, tags::AFFECTED_SOP_CLASS_UID),
                affected_sop_instance: text(&request, tags::AFFECTED_SOP_INSTANCE_UID),
                dataset,
                pdus,
            };
            pdus = 0;

            let response = command_set(&[
                TagValue::uid(tags::AFFECTED_SOP_CLASS_UID, &request.affected_sop_class),
                TagValue::u16(tags::COMMAND_FIELD, request.command_field | 0x8000),
                TagValue::u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, request.message_id),
                TagValue::u16(tags::COMMAND_DATA_SET_TYPE, 0x0101),
                TagValue::u16(tags::STATUS, status),
            ])
            .unwrap();
            association
                .send(&Pdu::PData {
                    data: vec![PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Command,
                        is_last: true,
                        data: response,
                    }],
                })
                .unwrap();
            received.push(request);
        }
    }
    received
}

fn read_with(bytes: &[u8], ts_uid: &str) -> InMemDicomObject {
    let ts = TransferSyntaxRegistry.get(ts_uid).unwrap();
    InMemDicomObject::read_dataset_with_ts(bytes, ts).unwrap()
}

fn number(obj: &InMemDicomObject, tag: dicom::core::Tag) -> u16 {
    obj.element(tag).unwrap().to_int::<u16>().unwrap()
}

fn text(obj: &InMemDicomObject, tag: dicom::core::Tag) -> String {
    obj.element(tag)
        .map(|e| e.to_str().unwrap().trim_end_matches(['\0', ' ']).to_string())
        .unwrap_or_default()
}

fn destination(port: u16) -> DestinationConfig {
    DestinationConfig {
        enabled: true,
        host: "127.0.0.1".into(),
        port,
        called_ae_title: ARCHIVE_AE.into(),
        calling_ae_title: "COURIER".into(),
        timeout_seconds: 10,
        ..DestinationConfig::default()
    }
}

fn capture_file(dir: &TempDir, width: u32, height: u32) -> (PathBuf, String) {
    let path = dir.path().join(format!("capture-{}x{}.dcm", width, height));
    let patient = PatientRecord {
        name: "Doe^John".into(),
        id: "PAT-7".into(),
        ..PatientRecord::default()
    };
    let built = DatasetBuilder::new(Arc::new(UidGenerator::default()))
        .write_file(
            &path,
            &PixelPayload::Native(vec![0x40; (width * height * 3) as usize]),
            &ImageSpec::rgb8(width, height),
            &patient,
            &StudyRecord::default(),
            TransferSyntax::ExplicitVrLittleEndian,
        )
        .unwrap();
    (path, built.sop_instance_uid)
}

async fn deliver(client: &DimseClient, path: &Path, port: u16) -> Outcome {
    client
        .attempt(path, &destination(port), Duration::from_secs(10))
        .await
}

#[tokio::test]
async fn small_capture_travels_with_its_command_in_one_pdu() {
    let dir = tempdir().unwrap();
    let (path, sop_instance) = capture_file(&dir, 2, 2);
    let (port, archive) = spawn_archive(0x0000);

    let client = DimseClient::new();
    assert_eq!(deliver(&client, &path, port).await, Outcome::Success);

    let received = archive.join().unwrap();
    assert_eq!(received.len(), 1);
    let store = &received[0];
    assert_eq!(store.command_field, 0x0001);
    assert_eq!(store.affected_sop_class, SECONDARY_CAPTURE);
    assert_eq!(store.affected_sop_instance, sop_instance);
    assert_eq!(store.pdus, 1);
    let dataset = store.dataset.as_ref().unwrap();
    assert_eq!(text(dataset, tags::PATIENT_NAME), "Doe^John");
    assert_eq!(text(dataset, tags::SOP_INSTANCE_UID), sop_instance);
    // the meta group stays behind
    assert!(dataset.element(tags::TRANSFER_SYNTAX_UID).is_err());

    let stats = client.stats();
    assert_eq!(stats.successes, 1);
    assert!(stats.last_success.is_some());
}

#[tokio::test]
async fn large_capture_is_streamed_across_pdus() {
    let dir = tempdir().unwrap();
    let (path, _) = capture_file(&dir, 128, 128);
    let (port, archive) = spawn_archive(0x0000);

    assert_eq!(deliver(&DimseClient::new(), &path, port).await, Outcome::Success);

    let received = archive.join().unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].pdus >= 3, "{} PDUs", received[0].pdus);
    let dataset = received[0].dataset.as_ref().unwrap();
    let pixels = dataset.element(tags::PIXEL_DATA).unwrap().to_bytes().unwrap();
    assert_eq!(pixels.len(), 128 * 128 * 3);
}

#[tokio::test]
async fn out_of_resources_answer_is_resource_exhausted() {
    let dir = tempdir().unwrap();
    let (path, _) = capture_file(&dir, 2, 2);
    let (port, archive) = spawn_archive(0xA700);

    match deliver(&DimseClient::new(), &path, port).await {
        Outcome::Failure { kind, message } => {
            assert_eq!(kind, ErrorKind::ResourceExhausted);
            assert!(message.contains("A700"), "{}", message);
        }
        Outcome::Success => panic!("an A700H answer is not a delivery"),
    }
    assert_eq!(archive.join().unwrap().len(), 1);
}

#[tokio::test]
async fn warning_answer_counts_as_delivered() {
    let dir = tempdir().unwrap();
    let (path, _) = capture_file(&dir, 2, 2);
    let (port, archive) = spawn_archive(0xB000);

    assert_eq!(deliver(&DimseClient::new(), &path, port).await, Outcome::Success);
    archive.join().unwrap();
}

#[tokio::test]
async fn unknown_called_title_is_an_authentication_failure() {
    let dir = tempdir().unwrap();
    let (path, _) = capture_file(&dir, 2, 2);
    let (port, archive) = spawn_archive(0x0000);

    let destination = DestinationConfig {
        called_ae_title: "ELSEWHERE".into(),
        ..destination(port)
    };
    let outcome = DimseClient::new()
        .attempt(&path, &destination, Duration::from_secs(10))
        .await;
    assert!(matches!(
        outcome,
        Outcome::Failure {
            kind: ErrorKind::AuthenticationFailed,
            ..
        }
    ));
    assert!(archive.join().unwrap().is_empty());
}

#[tokio::test]
async fn echo_is_answered() {
    let (port, archive) = spawn_archive(0x0000);

    assert!(DimseClient::new().test_connection(&destination(port)).await);

    let received = archive.join().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].command_field, 0x0030);
    assert_eq!(received[0].affected_sop_class, VERIFICATION_SOP_CLASS);
    assert!(received[0].dataset.is_none());
}

#[tokio::test]
async fn foreign_file_with_a_sequence_is_summarized_and_delivered() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("foreign.dcm");
    let region = InMemDicomObject::from_element_iter([
        DataElement::new(tags::CODE_VALUE, VR::SH, PrimitiveValue::from("T-D1100")),
        DataElement::new(tags::CODING_SCHEME_DESIGNATOR, VR::SH, PrimitiveValue::from("SRT")),
    ]);
    let sop_instance = "1.2.826.0.1.3680043.2.1125.99.1";
    InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(SECONDARY_CAPTURE)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance)),
        DataElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20240102")),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Seq^Patient")),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("SEQ-1")),
        DataElement::new(
            tags::ANATOMIC_REGION_SEQUENCE,
            VR::SQ,
            Value::new_sequence(vec![region], Length::UNDEFINED),
        ),
    ])
    .with_meta(
        FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LE)
            .media_storage_sop_class_uid(SECONDARY_CAPTURE)
            .media_storage_sop_instance_uid(sop_instance),
    )
    .unwrap()
    .write_to_file(&path)
    .unwrap();

    let summary = batch::summary_of(&path).unwrap();
    assert_eq!(summary.patient_name, "Seq^Patient");
    assert_eq!(summary.patient_id, "SEQ-1");
    assert_eq!(summary.study_date, "20240102");

    let (port, archive) = spawn_archive(0x0000);
    assert_eq!(deliver(&DimseClient::new(), &path, port).await, Outcome::Success);
    let received = archive.join().unwrap();
    let dataset = received[0].dataset.as_ref().unwrap();
    assert!(dataset.element(tags::ANATOMIC_REGION_SEQUENCE).is_ok());
    assert_eq!(received[0].affected_sop_instance, sop_instance);
}

#[tokio::test]
async fn stalled_peer_times_out_and_the_socket_is_closed() {
    let dir = tempdir().unwrap();
    let (path, _) = capture_file(&dir, 2, 2);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    // reads the association request, never answers, then waits for the client to hang up
    let peer = thread::spawn(move || -> io::Result<usize> {
        let (mut stream, _) = listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut buffer = [0u8; 4096];
        let request = stream.read(&mut buffer)?;
        assert!(request > 0);
        loop {
            match stream.read(&mut buffer)? {
                0 => return Ok(0),
                _ => continue,
            }
        }
    });

    let outcome = DimseClient::new()
        .attempt(&path, &destination(port), Duration::from_secs(1))
        .await;
    assert!(matches!(
        outcome,
        Outcome::Failure {
            kind: ErrorKind::Timeout,
            ..
        }
    ));

    // a read timeout instead of end-of-stream would mean the socket leaked
    match peer.join().unwrap() {
        Ok(0) => {}
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
        other => panic!("client socket still open: {:?}", other),
    }
}
