mod config;
mod session;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use clap::{Parser, Subcommand};
use config::Config;
use rollcall_core::{OnnxExtractor, RegistrationRequest};
use rollcall_hw::{Camera, CaptureError, CaptureSettings, Snapshot};
use rollcall_store::{
    write_attendance, write_students, Database, DateRange, ExportFormat, Ledger, Registry,
};
use session::{acquire_frame, PassReport, Session, SessionError, SharedSource, Verdict};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long exit waits on blocking tasks still parked in a device read or
/// on stdin.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register one student from a photo
    Register {
        #[arg(short, long)]
        roll: String,
        #[arg(short, long)]
        name: String,
        /// JPEG or PNG photo showing the student's face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Register every `<roll>_<name>.<ext>` image in the given files or directories
    Bulk {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List registered students
    List {
        /// csv or json (default: table)
        #[arg(short, long)]
        format: Option<ExportFormat>,
    },
    /// Take attendance from the camera or a snapshot
    Attend {
        /// Use a still image instead of the camera
        #[arg(long, conflicts_with = "interactive")]
        image: Option<PathBuf>,
        /// Capture on every Enter until `q`
        #[arg(short, long)]
        interactive: bool,
        /// Camera device (overrides config)
        #[arg(short, long)]
        device: Option<String>,
        /// Match threshold (overrides config)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Export the attendance log
    Log {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only today's entries
        #[arg(long, conflicts_with_all = ["from", "to"])]
        today: bool,
        /// csv or json
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    block_on_command(run(cli))?
}

/// Drive `command` on a fresh runtime, then shut down without waiting for
/// abandoned blocking tasks beyond [`SHUTDOWN_GRACE`].
fn block_on_command<F: Future>(command: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let output = runtime.block_on(command);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(output)
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Register { roll, name, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("cannot read {}", image.display()))?;
            let request = RegistrationRequest::new(&roll, &name, bytes)?;

            let db = open_db(&config)?;
            let registry = Registry::new(&db, config.images_dir.clone());
            let mut extractor = load_extractor(&config)?;

            let record = registry.register(request, &mut extractor)?;
            println!(
                "registered {} -> {}",
                record.identity,
                record.image_path.display()
            );
        }
        Commands::Bulk { paths } => {
            let db = open_db(&config)?;
            let registry = Registry::new(&db, config.images_dir.clone());
            let mut extractor = load_extractor(&config)?;

            let mut blobs = Vec::new();
            let mut unreadable = 0usize;
            for file in collect_files(&paths)? {
                let Some(name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                    continue;
                };
                match std::fs::read(&file) {
                    Ok(bytes) => blobs.push((name, bytes)),
                    Err(e) => {
                        unreadable += 1;
                        eprintln!("  {}: cannot read: {e}", file.display());
                    }
                }
            }

            let report = registry.register_named_blobs(blobs, &mut extractor);
            for record in &report.registered {
                println!("  registered {}", record.identity);
            }
            for failure in &report.failed {
                eprintln!("  {}: {}", failure.source, failure.error);
            }
            println!(
                "{} registered, {} failed",
                report.succeeded(),
                report.failure_count() + unreadable
            );
        }
        Commands::List { format } => {
            let db = open_db(&config)?;
            let students = Registry::new(&db, config.images_dir.clone()).list()?;
            match format {
                Some(format) => write_students(&students, format, std::io::stdout().lock())?,
                None if students.is_empty() => println!("No students registered"),
                None => {
                    println!("{:<12} {:<28} IMAGE", "ROLL", "NAME");
                    for s in &students {
                        println!(
                            "{:<12} {:<28} {}",
                            s.identity.roll,
                            s.identity.name,
                            s.image_path.display()
                        );
                    }
                }
            }
        }
        Commands::Attend {
            image,
            interactive,
            device,
            threshold,
        } => {
            let db = open_db(&config)?;
            let gallery = Registry::new(&db, config.images_dir.clone()).list()?;
            if gallery.is_empty() {
                tracing::warn!("no students registered, every face will be unrecognized");
            }
            let ledger = Ledger::new(&db, config.dedup);
            let matcher = config.metric.matcher();
            let mut extractor = load_extractor(&config)?;

            let source = match image {
                Some(path) => session::shared(Snapshot::new(path)),
                None => {
                    let device = device.unwrap_or_else(|| config.camera_device.clone());
                    let settings = CaptureSettings {
                        warmup_frames: config.warmup_frames,
                        frame_timeout: Duration::from_secs(config.capture_timeout_secs),
                        ..CaptureSettings::default()
                    };
                    let camera = Camera::open(&device, settings)
                        .map_err(|e| SessionError::from(CaptureError::from(e)))?;
                    session::shared(camera)
                }
            };

            let mut session = Session {
                extractor: &mut extractor,
                matcher: matcher.as_ref(),
                gallery: &gallery,
                threshold: threshold.unwrap_or(config.threshold),
                ledger: &ledger,
            };
            let timeout = Duration::from_secs(config.capture_timeout_secs);
            tracing::info!(
                students = gallery.len(),
                metric = ?config.metric,
                threshold = session.threshold,
                dedup = ?config.dedup,
                "attendance session ready"
            );

            if interactive {
                run_interactive(&source, timeout, &mut session).await?;
            } else {
                let report = run_pass(&source, timeout, &mut session).await?;
                print_report(&report);
            }
        }
        Commands::Log {
            from,
            to,
            today,
            format,
            output,
        } => {
            let range = if today {
                DateRange::day(Local::now().date_naive())
            } else {
                DateRange { from, to }
            };

            let db = open_db(&config)?;
            let entries = Ledger::new(&db, config.dedup).query(range)?;
            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    write_attendance(&entries, format, std::io::BufWriter::new(file))?;
                    println!("{} entries written to {}", entries.len(), path.display());
                }
                None => write_attendance(&entries, format, std::io::stdout().lock())?,
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn open_db(config: &Config) -> Result<Database> {
    Database::open(&config.db_path)
        .with_context(|| format!("cannot open database {}", config.db_path.display()))
}

fn load_extractor(config: &Config) -> Result<OnnxExtractor> {
    OnnxExtractor::load(&config.model_dir).with_context(|| {
        format!(
            "cannot load face models from {} (set ROLLCALL_MODEL_DIR)",
            config.model_dir.display()
        )
    })
}

/// Expand directories (one level, sorted) into the files they contain.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("cannot list {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

async fn run_pass(
    source: &SharedSource,
    timeout: Duration,
    session: &mut Session<'_>,
) -> Result<PassReport, SessionError> {
    let frame = acquire_frame(source, timeout).await?;
    let now: DateTime<FixedOffset> = Local::now().into();
    Ok(tokio::task::block_in_place(|| session.evaluate(&frame, now)))
}

/// One pass per Enter; `q`, end of input or Ctrl-C at the prompt quits.
/// Pass errors are reported and the loop continues.
async fn run_interactive(
    source: &SharedSource,
    timeout: Duration,
    session: &mut Session<'_>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("Press Enter to capture, q to quit");
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }

        match run_pass(source, timeout, session).await {
            Ok(report) => print_report(&report),
            Err(e) => {
                tracing::warn!(error = %e, "attendance pass failed");
                println!("{e}, try again");
            }
        }
    }

    Ok(())
}

fn print_report(report: &PassReport) {
    if report.is_empty() {
        println!("No face found, re-capture");
        return;
    }
    for face in &report.faces {
        match &face.verdict {
            Verdict::Recorded { identity, score } => {
                println!("present: {identity} (score {score:.3})")
            }
            Verdict::AlreadyRecordedToday { identity, score } => {
                println!("already recorded: {identity} (score {score:.3})")
            }
            Verdict::NotRecorded { identity, reason, .. } => {
                println!("matched {identity} but not recorded: {reason}")
            }
            Verdict::Unrecognized { score: Some(score) } => {
                println!("unrecognized face (best score {score:.3})")
            }
            Verdict::Unrecognized { score: None } => println!("unrecognized face"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use rollcall_hw::{Frame, FrameSource};
    use std::time::Instant;

    /// Holds the blocking pool far longer than any capture timeout.
    struct StuckDevice;

    impl FrameSource for StuckDevice {
        fn describe(&self) -> String {
            "stuck".into()
        }

        fn acquire(&mut self) -> Result<Frame, CaptureError> {
            std::thread::sleep(Duration::from_secs(5));
            Ok(Frame::new(GrayImage::from_pixel(4, 4, Luma([128])), 0))
        }
    }

    #[test]
    fn test_timed_out_capture_does_not_delay_exit() {
        let started = Instant::now();
        let result = block_on_command(async {
            let source = session::shared(StuckDevice);
            acquire_frame(&source, Duration::from_millis(20)).await
        })
        .unwrap();

        assert!(matches!(result, Err(SessionError::CaptureTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cli_parses_attend_flags() {
        let args = ["rollcall", "attend", "--interactive", "-t", "0.5"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Attend {
                interactive: true,
                threshold: Some(t),
                ..
            } if t == 0.5
        ));
    }
}
