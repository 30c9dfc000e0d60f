//! Scripted page-event replay for the PageWatch visibility engine.
//!
//! Feeds a sequence of raw host events to a simulated page, records every
//! lifecycle event the engine emits, and prints a JSON report.
//!
//! ## Usage
//!
//! ```bash
//! # Tab switch away and back on a loaded page
//! pagewatch-sim --ready --script "blur,hide,show,focus"
//!
//! # Late hybrid bridge, with debug logging
//! pagewatch-sim --debug --script "load bridge wait hybrid-hide hybrid-show"
//!
//! # Custom configuration file
//! pagewatch-sim --config visibility.json --script "load,beforeunload,unload"
//! ```

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;

use clap::Parser;
use pagewatch_common::{init_logging, LogConfig, LogFormat, PageWatchError, Result};
use pagewatch_core::{
    handler, CallbackOptions, DocumentReadyState, LifecycleEventType, SimulatedHost,
    TransitionEvent, VisibilityConfig, VisibilityContext,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "pagewatch-sim")]
#[command(about = "Replay scripted page events against the visibility engine")]
struct Cli {
    /// Event script: tokens separated by commas or whitespace
    #[arg(short, long, default_value = "load,blur,hide,show,focus,beforeunload,unload")]
    script: String,

    /// Start with the document already complete
    #[arg(long)]
    ready: bool,

    /// Enable engine diagnostics and debug logging
    #[arg(long)]
    debug: bool,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Override the handler timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// One scripted host action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Focus,
    Blur,
    Show,
    Hide,
    Load,
    BeforeUnload,
    Unload,
    HybridShow,
    HybridHide,
    Bridge,
    /// Give the hybrid probe time to run.
    Wait,
}

impl FromStr for Step {
    type Err = PageWatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "focus" => Ok(Step::Focus),
            "blur" => Ok(Step::Blur),
            "show" => Ok(Step::Show),
            "hide" => Ok(Step::Hide),
            "load" => Ok(Step::Load),
            "beforeunload" => Ok(Step::BeforeUnload),
            "unload" => Ok(Step::Unload),
            "hybrid-show" => Ok(Step::HybridShow),
            "hybrid-hide" => Ok(Step::HybridHide),
            "bridge" => Ok(Step::Bridge),
            "wait" => Ok(Step::Wait),
            other => Err(PageWatchError::InvalidArgument(format!(
                "unknown script step: {other}"
            ))),
        }
    }
}

fn parse_script(script: &str) -> Result<Vec<Step>> {
    script
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase().parse())
        .collect()
}

fn load_config(cli: &Cli) -> Result<VisibilityConfig> {
    let mut config = match cli.config {
        Some(ref path) => VisibilityConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => VisibilityConfig::default(),
    };
    if cli.debug {
        config = config.with_debug(true);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_max_callback_execution_time(std::time::Duration::from_millis(ms));
        config.validate()?;
    }
    Ok(config)
}

fn apply(host: &SimulatedHost, step: Step) {
    match step {
        Step::Focus => host.focus(),
        Step::Blur => host.blur(),
        Step::Show => host.change_visibility(false),
        Step::Hide => host.change_visibility(true),
        Step::Load => host.load(),
        Step::BeforeUnload => host.before_unload(),
        Step::Unload => host.unload(),
        Step::HybridShow => host.report_hybrid(true),
        Step::HybridHide => host.report_hybrid(false),
        Step::Bridge => host.install_bridge(),
        Step::Wait => {}
    }
}

async fn run(steps: Vec<Step>, config: VisibilityConfig, ready: bool) -> Result<serde_json::Value> {
    let probe_interval = config.hybrid_check_interval();

    let mut host = SimulatedHost::new();
    if ready {
        host = host.with_ready_state(DocumentReadyState::Complete);
    }
    let host = Rc::new(host);
    let context = VisibilityContext::new();
    let engine = context.get_instance(host.clone(), Some(config));

    let seen: Rc<RefCell<Vec<TransitionEvent>>> = Rc::new(RefCell::new(Vec::new()));
    for event_type in LifecycleEventType::ALL {
        let seen = seen.clone();
        engine.on(
            event_type,
            handler(move |event| seen.borrow_mut().push(*event)),
            CallbackOptions::new().namespace("sim"),
        );
    }
    engine.flush().await;

    for step in steps {
        apply(&host, step);
        if step == Step::Wait {
            tokio::time::sleep(probe_interval * 2).await;
        }
        engine.flush().await;
        info!(?step, state = %engine.current_state(), "Step applied");
    }

    let report = serde_json::json!({
        "transitions": serde_json::to_value(&*seen.borrow())?,
        "finalState": engine.current_state(),
        "previousState": engine.previous_state(),
        "status": engine.status(),
    });

    context.destroy();
    Ok(report)
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_config = if cli.debug {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format));

    let config = load_config(&cli)?;
    let steps = parse_script(&cli.script)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    let report = local.block_on(&runtime, run(steps, config, cli.ready))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
