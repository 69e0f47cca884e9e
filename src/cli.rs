//
// cli.rs
// Dicom-Courier-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the
// builder, the delivery queue, the client and the HTTP server.
//
// Dicom-Courier-rs contributors - October 2026

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    batch,
    builder::{BuiltFile, DatasetBuilder},
    capture::{self, Capture, StillEncoding},
    client::{DeliveryClient, DimseClient, Outcome},
    config::{resolve_date, AppConfig, DEFAULT_CONFIG_PATH},
    dataset::TransferSyntax,
    error::QueueError,
    inspect,
    models::{self, DestinationConfig, PatientRecord, PatientSummary, StudyRecord},
    queue::DeliveryQueue,
    storage::OutputStore,
    uid::UidGenerator,
    web,
};

#[derive(Parser)]
#[command(name = "dicom-courier")]
#[command(
    about = "Wraps captures into DICOM files and delivers them to a storage archive",
    long_about = None
)]
pub struct Cli {
    /// Application configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a DICOM file from an image or a video stream
    Create {
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = Encoding::Explicit)]
        encoding: Encoding,
        /// Treat the input as an already-encoded video stream
        #[arg(long, value_enum)]
        video: Option<VideoCodec>,
        #[arg(long, requires = "video")]
        width: Option<u32>,
        #[arg(long, requires = "video")]
        height: Option<u32>,
        #[arg(long, default_value_t = 1)]
        frames: u32,
        #[command(flatten)]
        patient: PatientArgs,
        /// Directory to write into instead of the configured one
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Register the file for delivery even if auto-enqueue is off
        #[arg(long, conflicts_with = "no_enqueue")]
        enqueue: bool,
        #[arg(long)]
        no_enqueue: bool,
        #[arg(long, value_enum, default_value_t = Priority::Normal)]
        priority: Priority,
    },
    /// List the elements of a created file
    Inspect {
        file: PathBuf,
        #[arg(long, default_value_t = 64)]
        max_value_len: usize,
    },
    /// Register a file for delivery
    Enqueue {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Priority::Normal)]
        priority: Priority,
    },
    /// Register every .dcm file under a directory
    EnqueueDir {
        directory: PathBuf,
        #[arg(long, value_enum, default_value_t = Priority::Normal)]
        priority: Priority,
    },
    /// Print queue counts
    Status,
    /// List queue items
    List {
        #[arg(long, value_enum)]
        status: Option<Status>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Return a failed item to pending
    Retry { id: String },
    /// Cancel a pending item
    Cancel { id: String },
    /// Process the queue until interrupted
    Run,
    /// Perform a DICOM C-ECHO against the configured destination
    Echo,
    /// Perform a single C-STORE of a file, bypassing the queue
    Push { file: PathBuf },
    /// Start the control API together with the queue worker
    Web {
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
}

#[derive(Args, Debug, Default)]
pub struct PatientArgs {
    /// Use a configured emergency template instead of explicit patient fields
    #[arg(long, conflicts_with_all = ["patient_name", "patient_id"])]
    pub template: Option<String>,
    #[arg(long)]
    pub patient_name: Option<String>,
    #[arg(long)]
    pub patient_id: Option<String>,
    #[arg(long)]
    pub birth_date: Option<String>,
    #[arg(long)]
    pub sex: Option<String>,
    #[arg(long)]
    pub accession: Option<String>,
    #[arg(long)]
    pub study_description: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Encoding {
    Explicit,
    Implicit,
    Jpeg,
}

impl From<Encoding> for StillEncoding {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Explicit => StillEncoding::Explicit,
            Encoding::Implicit => StillEncoding::Implicit,
            Encoding::Jpeg => StillEncoding::Jpeg,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum VideoCodec {
    Mpeg2,
    Mpeg4,
}

impl From<VideoCodec> for TransferSyntax {
    fn from(value: VideoCodec) -> Self {
        match value {
            VideoCodec::Mpeg2 => TransferSyntax::Mpeg2MainProfile,
            VideoCodec::Mpeg4 => TransferSyntax::Mpeg4HighProfile,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Priority {
    Normal,
    High,
    Emergency,
}

impl From<Priority> for models::Priority {
    fn from(value: Priority) -> Self {
        match value {
            Priority::Normal => models::Priority::Normal,
            Priority::High => models::Priority::High,
            Priority::Emergency => models::Priority::Emergency,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Status {
    Pending,
    Uploading,
    Success,
    Failed,
    Cancelled,
}

impl From<Status> for models::Status {
    fn from(value: Status) -> Self {
        match value {
            Status::Pending => models::Status::Pending,
            Status::Uploading => models::Status::Uploading,
            Status::Success => models::Status::Success,
            Status::Failed => models::Status::Failed,
            Status::Cancelled => models::Status::Cancelled,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config;
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Create {
            input,
            encoding,
            video,
            width,
            height,
            frames,
            patient,
            output,
            enqueue,
            no_enqueue,
            priority,
        } => {
            let capture = match video {
                Some(codec) => {
                    let (Some(width), Some(height)) = (width, height) else {
                        bail!("Video input needs --width and --height");
                    };
                    capture::video_from_file(&input, codec.into(), width, height, frames)?
                }
                None => capture::still_from_file(&input, encoding.into())?,
            };
            let (patient, study) = patient_and_study(&config, patient)?;
            let output_dir = output.unwrap_or_else(|| config.output_dir.clone());
            let (path, built) = create_file(&config, &output_dir, &capture, &patient, &study)?;

            println!("Created {}", path.display());
            println!("  SOP Class UID:       {}", built.sop_class_uid);
            println!("  SOP Instance UID:    {}", built.sop_instance_uid);
            println!("  Study Instance UID:  {}", built.study_instance_uid);
            println!("  Series Instance UID: {}", built.series_instance_uid);

            let auto = config.auto_enqueue && config.destination.enabled;
            if enqueue || (auto && !no_enqueue) {
                let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
                let summary = PatientSummary {
                    patient_name: patient.name.clone(),
                    patient_id: patient.id.clone(),
                    study_date: Local::now().format("%Y%m%d").to_string(),
                };
                let id = queue.enqueue(&path, summary, priority.into()).await?;
                println!("Queued as {}", id);
            }
        }
        Commands::Inspect {
            file,
            max_value_len,
        } => inspect::inspect_file(&file, max_value_len)?,
        Commands::Enqueue { file, priority } => {
            let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
            let summary = batch::summary_of(&file).unwrap_or_else(|e| {
                warn!(path = %file.display(), "no patient summary: {:#}", e);
                PatientSummary::default()
            });
            let id = queue.enqueue(&file, summary, priority.into()).await?;
            println!("Queued {} as {}", file.display(), id);
        }
        Commands::EnqueueDir {
            directory,
            priority,
        } => {
            let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
            let report = batch::enqueue_directory(&queue, &directory, priority.into()).await?;
            println!(
                "Queued {} file(s), skipped {}",
                report.enqueued.len(),
                report.skipped.len()
            );
            for skipped in &report.skipped {
                println!("  {}: {}", skipped.path.display(), skipped.reason);
            }
        }
        Commands::Status => {
            let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
            let summary = queue.status().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::List { status, limit } => {
            let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
            for item in queue.list(status.map(Into::into), limit).await {
                println!(
                    "{:<24} {:<10} {:<9} {:>2} {} {}",
                    item.id,
                    item.status,
                    format!("{:?}", item.priority).to_lowercase(),
                    item.attempt_count,
                    item.file_path.display(),
                    item.error_message.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Retry { id } => {
            let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
            queue.retry(&id).await?;
            println!("{} returned to pending", id);
        }
        Commands::Cancel { id } => {
            let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
            queue.cancel(&id).await?;
            println!("{} cancelled", id);
        }
        Commands::Run => {
            let (queue, _) = open_queue(&config, Arc::new(DimseClient::new()))?;
            if !config.destination.enabled {
                warn!("destination is disabled; items will stay pending");
            }
            let worker = queue.spawn_worker();
            info!(destination = %config.destination, "processing queue, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            worker.shutdown().await;
        }
        Commands::Echo => {
            let client = DimseClient::new();
            match client.echo(&config.destination).await {
                Outcome::Success => println!("✅ C-ECHO to {} succeeded", config.destination),
                Outcome::Failure { kind, message } => {
                    bail!("C-ECHO to {} failed ({}): {}", config.destination, kind, message)
                }
            }
        }
        Commands::Push { file } => {
            let client = DimseClient::new();
            let destination = &config.destination;
            // same deadline a queued attempt would get
            let deadline = destination.attempt_deadline(config.queue.attempt_timeout_cap());
            match client.attempt(&file, destination, deadline).await {
                Outcome::Success => println!("✅ Stored {} at {}", file.display(), destination),
                Outcome::Failure { kind, message } => {
                    bail!("C-STORE to {} failed ({}): {}", destination, kind, message)
                }
            }
        }
        Commands::Web { host, port } => {
            let client = Arc::new(DimseClient::new());
            let (queue, destination) = open_queue(&config, client.clone())?;
            let state = web::AppState {
                queue: queue.clone(),
                client,
                destination: Arc::new(destination),
                store: OutputStore::new(&config.output_dir)?,
                config: Arc::new(Mutex::new(config.clone())),
                config_path,
            };
            let worker = queue.spawn_worker();
            let served = web::start_server(state, &host, port).await;
            worker.shutdown().await;
            served?;
        }
    }

    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // a subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Open the shared queue. The returned sender feeds destination changes to it.
///
/// Only one process may hold the snapshot; while `run` or `web` is active the
/// other verbs fail here instead of overwriting its state.
fn open_queue(
    config: &AppConfig,
    client: Arc<dyn DeliveryClient>,
) -> Result<(Arc<DeliveryQueue>, watch::Sender<DestinationConfig>)> {
    let (sender, destination) = watch::channel(config.destination.clone());
    let queue = match DeliveryQueue::open(config.queue.clone(), destination, client) {
        Ok(queue) => queue,
        Err(e @ QueueError::Locked(_)) => {
            return Err(e).context(
                "Another dicom-courier process owns the queue; stop it or use its HTTP API",
            )
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "Failed to open queue snapshot {}",
                    config.queue.snapshot_path.display()
                )
            })
        }
    };
    Ok((Arc::new(queue), sender))
}

fn patient_and_study(
    config: &AppConfig,
    args: PatientArgs,
) -> Result<(PatientRecord, StudyRecord)> {
    let (mut patient, mut study) = match &args.template {
        Some(id) => config.template(id)?.instantiate(Local::now())?,
        None => {
            let (Some(name), Some(id)) = (args.patient_name, args.patient_id) else {
                bail!("Provide --patient-name and --patient-id, or --template");
            };
            let patient = PatientRecord {
                name,
                id,
                ..PatientRecord::default()
            };
            (patient, StudyRecord::default())
        }
    };
    if let Some(birth_date) = args.birth_date {
        patient.birth_date = resolve_date(&birth_date, Local::now().date_naive())?;
    }
    if let Some(sex) = args.sex {
        patient.sex = sex;
    }
    if let Some(accession) = args.accession {
        study.accession_number = accession;
    }
    if let Some(description) = args.study_description {
        study.study_description = description;
    }
    Ok((patient, study))
}

fn create_file(
    config: &AppConfig,
    output_dir: &Path,
    capture: &Capture,
    patient: &PatientRecord,
    study: &StudyRecord,
) -> Result<(PathBuf, BuiltFile)> {
    let uids = UidGenerator::new(config.uid_root.clone()).context("Invalid uid_root")?;
    let builder = DatasetBuilder::new(Arc::new(uids));
    let built = builder.build_file(
        &capture.payload,
        &capture.image,
        patient,
        study,
        capture.transfer_syntax,
    )?;
    let store = OutputStore::new(output_dir)?;
    let stem = format!("{}_{}", patient.id, Local::now().format("%Y%m%d_%H%M%S"));
    let path = store.save(Some(&stem), &built.bytes)?;
    Ok((path, built))
}
