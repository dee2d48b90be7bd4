use anyhow::Context;
use clap::Parser;
use motionkit::demo;
use motionkit::{
    controller_options, init_logging, CommandManager, Config, ControllerRegistry, PreviewReport,
    PreviewRunner, TracingLogSink,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Preview and run the demo raster on the simulated instrument
#[derive(Debug, Parser)]
#[command(name = "motionkit", version, about)]
struct Args {
    /// Settings file (.toml or .json); defaults to the platform config path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only preview the program on a digital twin
    #[arg(long)]
    preview_only: bool,

    /// Print the preview report as JSON
    #[arg(long)]
    json: bool,

    /// Side length of the exposed square in mm
    #[arg(long, default_value_t = 40.0)]
    size: f64,

    /// Number of raster rows
    #[arg(long, default_value_t = 5)]
    rows: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    init_logging(&config.logging)?;
    tracing::info!(
        "MotionKit {} (built {})",
        motionkit::VERSION,
        motionkit::BUILD_DATE
    );

    let registry = ControllerRegistry::builtin(controller_options(&config));
    let graph = Arc::new(demo::instrument(&registry)?);
    if config.hardware.connect_on_start {
        graph.connect_all().await?;
    }

    let program = demo::raster_program(args.size, args.rows);
    let report = PreviewRunner::new(registry).run(&graph, &program).await?;
    print_report(&report, args.json)?;

    if args.preview_only {
        return Ok(());
    }
    if !report.is_clean() {
        anyhow::bail!("preview found problems; not executing the program");
    }

    let scheduler = CommandManager::new(graph.clone(), Arc::new(TracingLogSink));
    let updater = scheduler.spawn_state_updates(config.scheduler.refresh_interval());
    for line in program {
        scheduler.enqueue_command_line(line)?;
    }

    let outcome = tokio::select! {
        result = scheduler.start() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            let stopped = scheduler.stop().await?;
            tracing::warn!("Interrupted, cancelled {} motion(s)", stopped);
            Ok(())
        }
    };
    updater.shutdown().await;
    outcome?;

    if let Some(tool) = graph.tool_information() {
        let state = tool.recalculate();
        println!("Final tool position {} ({})", state.position, scheduler.state());
    }
    Ok(())
}

fn print_report(report: &PreviewReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "Preview: {}/{} line(s), estimated {:.2}s",
        report.completed_lines, report.lines, report.estimated_duration_s
    );
    for sample in &report.samples {
        println!(
            "  line {:>3}  t={:>7.3}s  tool {}{}{}",
            sample.line,
            sample.elapsed_s,
            sample.position,
            if sample.is_on { "  [on]" } else { "" },
            if sample.is_out_of_bounds {
                "  OUT OF BOUNDS"
            } else {
                ""
            }
        );
    }
    if let Some(failure) = &report.failure {
        println!("  failed: {}", failure);
    }
    Ok(())
}
