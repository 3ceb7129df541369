//! CLI entry point for `mmsfit`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use mmsfit::config::Config;
use mmsfit::model::{Message, MessageData, MessageFlags, MessagePart, MmsAddress};
use mmsfit::resize::{self, AttachmentResizer, ResizeSettings};

#[derive(Parser)]
#[command(
    name = "mmsfit",
    version,
    about = "Shrink MMS attachments until the message fits a size limit"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble files into a message and shrink its images to fit
    Shrink {
        /// Files to attach, in transmission order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Size limit in bytes (defaults to `message.size_limit`)
        #[arg(short, long)]
        limit: Option<u64>,
        /// Directory to copy the resulting parts into
        #[arg(short, long)]
        output: PathBuf,
        /// Recipient addresses
        #[arg(long)]
        to: Vec<String>,
        /// Message subject
        #[arg(long)]
        subject: Option<String>,
        /// Leave the staging directory on disk for inspection
        #[arg(long)]
        keep_files: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run a single resize attempt on an image
    Resize {
        file: PathBuf,
        /// Step already applied to this image
        #[arg(long, default_value_t = 0)]
        step: u32,
        #[arg(long)]
        json: bool,
    },
    /// Show the sequence of sizes repeated resizes would produce
    Plan {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = mmsfit::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Shrink {
            files,
            limit,
            output,
            to,
            subject,
            keep_files,
            json,
        } => {
            let limit = limit.unwrap_or(config.message.size_limit);
            let keep_files = keep_files || config.message.keep_files;
            let envelope = Envelope { to, subject };
            cmd_shrink(&config, &files, limit, &output, &envelope, keep_files, json)
        }
        Commands::Resize { file, step, json } => cmd_resize(&config, &file, step, json),
        Commands::Plan { file, json } => cmd_plan(&config, &file, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mmsfit::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mmsfit.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Addressing for the staged message.
struct Envelope {
    to: Vec<String>,
    subject: Option<String>,
}

/// Stage `files` as a message, shrink it, and copy the parts to `output`.
fn cmd_shrink(
    config: &Config,
    files: &[PathBuf],
    limit: u64,
    output: &Path,
    envelope: &Envelope,
    keep_files: bool,
    json: bool,
) -> anyhow::Result<()> {
    let resizer = AttachmentResizer::from_config(config)?;

    let staging = tempfile::Builder::new()
        .prefix("mmsfit-")
        .keep(keep_files)
        .tempdir()?;
    let msg_dir = staging.path().to_path_buf();
    let parts_dir = msg_dir.join("parts");
    std::fs::create_dir(&parts_dir)?;

    let mut data = MessageData::default();
    data.id = msg_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    data.date = Some(chrono::Utc::now());
    data.subject = envelope.subject.clone();
    data.to = envelope
        .to
        .iter()
        .flat_map(|t| MmsAddress::parse_list(t))
        .collect();
    data.msg_dir = Some(msg_dir.clone());
    data.parts_dir = Some(parts_dir.clone());
    if keep_files {
        data.flags.insert(MessageFlags::KEEP_FILES);
    }

    for (i, file) in files.iter().enumerate() {
        let staged = parts_dir.join(staged_file_name(i, file)?);
        std::fs::copy(file, &staged)
            .with_context(|| format!("cannot read {}", file.display()))?;
        data.add_part(
            MessagePart::new(content_type_for(file), staged).with_content_id(format!("<part{i}>")),
        );
    }
    let msg = Message::from_data(data);

    let report = resize::shrink_to_fit(&msg, &resizer, limit)?;

    std::fs::create_dir_all(output)?;
    let mut written = Vec::new();
    for part in msg.lock().parts() {
        if let Some(file) = &part.file {
            let name = file.file_name().unwrap_or_default();
            let dest = output.join(name);
            std::fs::copy(file, &dest)?;
            written.push(dest);
        }
    }

    if json {
        let out = serde_json::json!({
            "report": report,
            "files": written,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_fit_report(&report, &written);
    }

    if keep_files {
        eprintln!("  Staging directory kept at {}", msg_dir.display());
    }

    // Finalize the message before the staging directory goes away.
    msg.release();
    drop(staging);
    Ok(())
}

/// Name of the staged copy of the `index`-th input. The index keeps inputs
/// that share a base name apart.
fn staged_file_name(index: usize, file: &Path) -> anyhow::Result<String> {
    let name = file
        .file_name()
        .with_context(|| format!("not a file: {}", file.display()))?;
    Ok(format!("{index}-{}", name.to_string_lossy()))
}

/// Single resize attempt; the new file lands next to `file`.
fn cmd_resize(config: &Config, file: &Path, step: u32, json: bool) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let resizer = AttachmentResizer::from_config(config)?;

    // The user's file is not ours to delete.
    let msg = Message::create();
    let outcome = {
        let mut data = msg.lock();
        data.flags.insert(MessageFlags::KEEP_FILES);
        let index = data.add_part(MessagePart::new(content_type_for(file), file));
        let part = data
            .part_mut(index)
            .context("part vanished from message")?;
        part.resize_step = step;
        resizer.resize(part)
    };
    msg.release();

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => anyhow::bail!("resize failed ({}): {e}", e.reason_code()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!();
        println!("  {:<12} {}", "Step", outcome.step);
        println!("  {:<12} {}", "Backend", outcome.backend);
        println!(
            "  {:<12} {}x{}",
            "Before", outcome.before.0, outcome.before.1
        );
        println!("  {:<12} {}x{}", "After", outcome.after.0, outcome.after.1);
        println!("  {:<12} {}", "Output", outcome.file.display());
        println!();
    }
    Ok(())
}

/// Print the step sequence for an image under the configured policy.
fn cmd_plan(config: &Config, file: &Path, json: bool) -> anyhow::Result<()> {
    config.resize.validate()?;
    let (width, height) = resize::read_dimensions(file)
        .with_context(|| format!("cannot read image {}", file.display()))?;
    let settings = ResizeSettings::from(&config.resize);
    let plan = resize::resize_plan(width, height, &settings);

    if json {
        let out = serde_json::json!({
            "file": file.to_string_lossy(),
            "width": width,
            "height": height,
            "steps": plan,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} ({width}x{height})", file.display());
    println!();
    println!("  {:>5} {:>7} {:>7}", "Step", "Width", "Height");
    println!("  {}", "-".repeat(21));
    for p in &plan {
        println!("  {:>5} {:>7} {:>7}", p.step, p.width, p.height);
    }
    println!();
    Ok(())
}

/// Print the outcome of a shrink in a human-readable table.
fn print_fit_report(report: &resize::FitReport, written: &[PathBuf]) {
    use humansize::{format_size, BINARY};

    println!();
    println!(
        "  {:<14} {}",
        "Initial size",
        format_size(report.initial_size, BINARY)
    );
    println!(
        "  {:<14} {}",
        "Final size",
        format_size(report.final_size, BINARY)
    );
    println!("  {:<14} {}", "Limit", format_size(report.limit, BINARY));
    println!("  {:<14} {}", "Resizes", report.resizes.len());

    for (index, outcome) in &report.resizes {
        println!(
            "    part {index:<3} step {:<3} {}x{} -> {}x{} ({})",
            outcome.step,
            outcome.before.0,
            outcome.before.1,
            outcome.after.0,
            outcome.after.1,
            outcome.backend
        );
    }

    println!();
    for path in written {
        println!("  {}", path.display());
    }
    println!();
}

/// MIME type from the file extension.
fn content_type_for(path: &Path) -> String {
    if let Ok(format) = image::ImageFormat::from_path(path) {
        return format.to_mime_type().to_string();
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" => "text/plain",
        "smil" => "application/smil",
        "vcf" => "text/x-vcard",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mmsfit", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
