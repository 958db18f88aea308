use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use replay_pipeline::replay::{
    CapturedEvent, InMemorySessionStore, JsonLinesSink, LoopbackCapture, MemorySink,
    NavigationOutcome, PipelineDeps, ReplaySink, RouteObserver, SourceCategory, TelemetryPipeline,
};
use replay_pipeline::{init_logging, PipelineConfig};

#[path = "replay_sim/report.rs"]
mod report;
use report::{drain_metrics, MetricAggregator};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("replay-sim error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "replay-sim", about = "Session replay pipeline simulation harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        match self.command {
            Command::Run(args) => run_command(args),
            Command::Serve(args) => serve_command(args),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive a scripted tab session through the pipeline and print a summary.
    Run(RunArgs),
    /// Keep a synthetic session running behind the debug HTTP server (requires debug_http feature).
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
struct SessionArgs {
    /// JSON pipeline configuration; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Subject the chunks are attributed to.
    #[arg(long, default_value = "sim-subject")]
    subject: String,
    /// Seed for the synthetic interaction generator.
    #[arg(long)]
    seed: Option<u64>,
    /// Simulated milliseconds between raw recorder events.
    #[arg(long, default_value_t = 16)]
    step_ms: u64,
}

impl SessionArgs {
    fn validate(&self) -> Result<()> {
        if self.step_ms == 0 {
            bail!("Step must be at least 1 ms");
        }
        if self.subject.trim().is_empty() {
            bail!("Subject cannot be empty");
        }
        Ok(())
    }

    fn load_config(&self) -> PipelineConfig {
        match &self.config {
            Some(path) => PipelineConfig::load(path),
            None => PipelineConfig::default().with_env_overrides(|key| std::env::var(key).ok()),
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Pages visited in order; excluded pages are navigated but not recorded.
    #[arg(
        long = "page",
        value_name = "PATH",
        default_values = ["/", "/pre-survey", "/practice", "/debrief"]
    )]
    pages: Vec<String>,
    /// Raw recorder events generated on each page.
    #[arg(long, default_value_t = 600)]
    events_per_page: usize,
    /// Toggle an active call halfway through every call page.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    simulate_calls: bool,
    /// Output format for the summary.
    #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
    format: ReportFormat,
    /// Append shipped rows to this JSON Lines file instead of keeping them in memory.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Host interface for the HTTP diagnostics server.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port to expose HTTP metrics on.
    #[arg(long, default_value_t = 8_787)]
    port: u16,
    /// Token required by HTTP consumers.
    #[arg(long, default_value = "replay-debug")]
    token: String,
    /// Page the synthetic session stays on.
    #[arg(long, default_value = "/practice")]
    page: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Table,
}

fn run_command(args: RunArgs) -> Result<()> {
    args.session.validate()?;
    if args.pages.is_empty() {
        bail!("Provide at least one --page");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run_impl(args))
}

async fn run_impl(args: RunArgs) -> Result<()> {
    let config = args.session.load_config();
    if !config.enabled {
        bail!("replay pipeline is disabled by configuration");
    }

    let sink: Arc<dyn ReplaySink> = match &args.output {
        Some(path) => Arc::new(JsonLinesSink::new(path.clone())),
        None => Arc::new(MemorySink::new()),
    };
    let capture = LoopbackCapture::new();
    let (pipeline, observer) = build_session(config, capture.clone(), sink, &args.session);

    let mut metrics_rx = pipeline.hub().collector().subscribe();
    let mut aggregator = MetricAggregator::default();
    let mut generator = InteractionGenerator::new(args.session.rng(), args.session.step_ms);

    for page in &args.pages {
        let outcome = observer.on_navigate(page).await;
        tracing::info!("[ReplaySim] Navigated to {}: {:?}", page, outcome);
        if outcome == NavigationOutcome::CaptureUnavailable {
            bail!("recorder failed to start on {page}");
        }

        let call_page = args.simulate_calls
            && pipeline
                .config()
                .sampling
                .call_pages
                .iter()
                .any(|call_page| call_page == page);

        for index in 0..args.events_per_page {
            if call_page && index == args.events_per_page / 2 {
                observer.on_call_state_signal(true, "simulated-call");
            }
            capture.emit(generator.next_event());
            if index % 64 == 0 {
                drain_metrics(&mut metrics_rx, &mut aggregator);
                tokio::task::yield_now().await;
            }
        }

        if call_page {
            observer.on_call_state_signal(false, "simulated-call");
        }
    }

    let final_flush = pipeline.teardown_and_wait().await;
    drain_metrics(&mut metrics_rx, &mut aggregator);

    let drops = pipeline
        .hub()
        .snapshot()
        .drops
        .into_iter()
        .map(|(reason, count)| (format!("{reason:?}"), count))
        .collect::<BTreeMap<_, _>>();
    let report = aggregator.into_report(
        pipeline.session_id().to_string(),
        pipeline.stats(),
        final_flush,
        drops,
    );

    match args.format {
        ReportFormat::Json => report.print_json()?,
        ReportFormat::Table => report.print_table(),
    }

    if let Some(path) = &args.output {
        println!("Rows appended to {}", path.display());
    }
    Ok(())
}

fn serve_command(args: ServeArgs) -> Result<()> {
    #[cfg(all(feature = "debug_http", debug_assertions))]
    {
        args.session.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("building tokio runtime")?;
        return runtime.block_on(serve_impl(args));
    }

    #[cfg(not(all(feature = "debug_http", debug_assertions)))]
    {
        let _ = args;
        bail!("replay-sim serve requires debug_http feature and debug build");
    }
}

#[cfg(all(feature = "debug_http", debug_assertions))]
async fn serve_impl(args: ServeArgs) -> Result<()> {
    use replay_pipeline::http;
    use std::time::Duration;

    let config = args.session.load_config();
    let capture = LoopbackCapture::new();
    let sink: Arc<dyn ReplaySink> = Arc::new(MemorySink::new());
    let (pipeline, observer) = build_session(config, capture.clone(), sink, &args.session);

    let addr = format!("{}:{}", args.host, args.port);
    std::env::set_var("REPLAY_DEBUG_HTTP_ADDR", &addr);
    std::env::set_var("REPLAY_DEBUG_TOKEN", &args.token);
    if !http::spawn_if_enabled(Arc::clone(&pipeline)) {
        bail!("debug HTTP server did not start");
    }
    println!(
        "Debug HTTP server running on {} (token prefix {}***)",
        addr,
        args.token.chars().take(4).collect::<String>()
    );
    println!("Press Ctrl+C to stop.");

    let outcome = observer.on_navigate(&args.page).await;
    tracing::info!("[ReplaySim] Navigated to {}: {:?}", args.page, outcome);

    let mut generator = InteractionGenerator::new(args.session.rng(), args.session.step_ms);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.session.step_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                capture.emit(generator.next_event());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let final_flush = pipeline.teardown_and_wait().await;
    println!(
        "Stopped: final flush {:?} ({} chunks sent)",
        final_flush.stop, final_flush.chunks_sent
    );
    Ok(())
}

fn build_session(
    config: PipelineConfig,
    capture: LoopbackCapture,
    sink: Arc<dyn ReplaySink>,
    session: &SessionArgs,
) -> (Arc<TelemetryPipeline>, RouteObserver) {
    let pipeline = TelemetryPipeline::new(
        config,
        PipelineDeps {
            capture: Arc::new(capture),
            sink,
            session_store: Arc::new(InMemorySessionStore::new()),
        },
    );
    pipeline.set_subject_id(Some(session.subject.clone()));
    let observer = RouteObserver::new(Arc::clone(&pipeline));
    (pipeline, observer)
}

/// Synthetic recorder stream dominated by pointer and scroll traffic.
struct InteractionGenerator {
    rng: StdRng,
    clock_ms: u64,
    step_ms: u64,
    cursor: (i64, i64),
    scroll_y: i64,
}

impl InteractionGenerator {
    fn new(rng: StdRng, step_ms: u64) -> Self {
        let clock_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self {
            rng,
            clock_ms,
            step_ms,
            cursor: (400, 300),
            scroll_y: 0,
        }
    }

    fn next_event(&mut self) -> CapturedEvent {
        self.clock_ms += self.step_ms;
        let roll: u8 = self.rng.gen_range(0..100);

        match roll {
            0..=59 => {
                self.cursor.0 = (self.cursor.0 + self.rng.gen_range(-25..=25)).clamp(0, 1280);
                self.cursor.1 = (self.cursor.1 + self.rng.gen_range(-25..=25)).clamp(0, 800);
                CapturedEvent::incremental(
                    SourceCategory::PointerMove,
                    self.clock_ms,
                    json!({ "positions": [{ "x": self.cursor.0, "y": self.cursor.1 }] }),
                )
            }
            60..=79 => {
                self.scroll_y = (self.scroll_y + self.rng.gen_range(-120..=240)).max(0);
                CapturedEvent::incremental(
                    SourceCategory::Scroll,
                    self.clock_ms,
                    json!({ "x": 0, "y": self.scroll_y }),
                )
            }
            80..=94 => CapturedEvent::incremental(
                SourceCategory::MouseInteraction,
                self.clock_ms,
                json!({ "type": "click", "x": self.cursor.0, "y": self.cursor.1 }),
            ),
            _ => CapturedEvent::incremental(
                SourceCategory::Input,
                self.clock_ms,
                json!({ "text": "*".repeat(self.rng.gen_range(1..12)), "isChecked": false }),
            ),
        }
    }
}
