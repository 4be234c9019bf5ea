use std::path::Path;

use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::time::{sleep, Duration};

use fieldlogger::{
    args::{Command, HeaderCommand, LoggerArgs, RunCommand, SessionCommand},
    engine::external::{link::available_ports, SerialConnector},
    service::{MarkDraft, StatusCode},
    session::MarkOutcome,
    settings::{ExternalDevice, IntervalChange},
    AppContext, Hardware,
};

#[tokio::main]
async fn main() -> Result<()> {
    fieldlogger::init_logging();
    let args = LoggerArgs::parse();

    let connector = match &args.command {
        Command::Run(run) => SerialConnector::new(run.baud),
        _ => SerialConnector::default(),
    };
    let ctx = AppContext::open(&args.data_dir, Hardware::headless(connector)).await?;

    match args.command {
        Command::Session(SessionCommand::Open { name }) => {
            let session = ctx.sessions.open_session(&name).await?;
            println!("opened {} ({})", session.name, session.id);
        }
        Command::Session(SessionCommand::Close) => {
            let session = ctx.sessions.close_session().await?;
            println!(
                "closed {}: {} marks, {} records",
                session.name, session.marks_count, session.records_count
            );
        }
        Command::Session(SessionCommand::Show) => match ctx.sessions.current_session().await? {
            Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
            None => println!("no open session"),
        },
        Command::Mark(mark) => {
            let draft = MarkDraft {
                category: mark.category(),
                label: mark.label,
                automatic: false,
            };
            match ctx.marks.mark(draft).await? {
                MarkOutcome::Recorded(recorded) => println!(
                    "mark {} ({} records, {} marks total)",
                    recorded.mark.id, recorded.records, recorded.marks_total
                ),
                MarkOutcome::Duplicate(previous) => {
                    println!("repeat of mark {} ignored", previous.id)
                }
            }
        }
        Command::Undo => {
            let mark = ctx.marks.undo_last().await?;
            println!("removed mark {}", mark.id);
        }
        Command::Interval { secs } => match ctx.settings.set_interval_secs(secs)? {
            IntervalChange::Accepted(applied) => println!("interval {applied}s"),
            IntervalChange::Clamped { requested, applied } => {
                println!("interval {requested}s out of range, using {applied}s")
            }
        },
        Command::Run(run) => run_logging(&ctx, run).await?,
        Command::Header(HeaderCommand::Refresh) => {
            ctx.engines.external.refresh_header()?;
            println!("device header will be fetched on next connection");
        }
        Command::Ports => {
            for port in available_ports()? {
                println!("{port}");
            }
        }
    }

    Ok(())
}

async fn run_logging(ctx: &AppContext, run: RunCommand) -> Result<()> {
    let Some(session_id) = ctx.settings.current_session_id() else {
        bail!("open a session first");
    };

    if let Some(device) = run.device {
        let name = Path::new(&device)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| device.clone());
        ctx.settings.update(|prefs| {
            prefs.external_enabled = true;
            prefs.external_device = Some(ExternalDevice {
                address: device,
                name,
            });
        })?;
    }

    let mut service = ctx.service.lock().await;
    let mut updates = service.status().subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(status) = updates.recv().await {
            match status.code {
                StatusCode::Error => warn!(
                    "status {}: {}",
                    status.code.code(),
                    status.message.unwrap_or_default()
                ),
                _ => info!("status {} records={}", status.code.code(), status.records),
            }
            if status.code == StatusCode::Finished {
                break;
            }
        }
    });

    service.start(session_id).await?;
    match run.duration_secs {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for Ctrl-C: {err}");
            }
        }
    }
    service.stop().await?;
    let _ = reporter.await;
    Ok(())
}
