//! Campaign orchestrator entry point (spec §4.F, §5, §6). Connects to the
//! debugger agent, measures a baseline workload pass, then drives the
//! state machine in `state_machine.rs` until the campaign finishes.

use rand::rngs::StdRng;
use rand::SeedableRng;
use seu_core::timing::{cycles_elapsed, Timestamp};
use seu_orchestrator::agent_client::{AgentClient, AgentEvent};
use seu_orchestrator::cli;
use seu_orchestrator::config::CampaignConfig;
use seu_orchestrator::emulator::{EmulatorConfig, EmulatorProcess};
use seu_orchestrator::queue::{self, JsonSink, LogConsumer, QueueEvent};
use seu_orchestrator::state_machine::CampaignMachine;
use seu_transport::FramedStream;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = cli::Args::from_args();

    let level = args.verbosity.tracing_level().to_string();
    // Holding the guard keeps the non-blocking file appender's background
    // flush thread alive for the process lifetime; dropping it early would
    // silently stop writes.
    let _trace_file_guard = if args.no_logging {
        tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&level)).init();
        None
    } else {
        let file_appender = tracing_appender::rolling::never(&args.log_dir, "orchestrator.trace.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&level))
            .with_writer(writer)
            .init();
        Some(guard)
    };

    let config = match CampaignConfig::from_args(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to build campaign configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        board = config.board_name,
        injections = args.injections,
        section = args.section.label(),
        "starting campaign"
    );

    let qemu_binary = std::env::var("SEU_QEMU_BINARY").unwrap_or_else(|_| "qemu-system-arm".to_string());
    let mut emulator = EmulatorProcess::new(EmulatorConfig {
        qemu_binary,
        machine: config.board.machine.clone(),
        cpu: config.board.cpu.clone(),
        kernel_path: args.filename.clone(),
        mem_mb: 256,
        gdb_port: config.ports.gdb_port,
        monitor_port: config.ports.monitor_port,
        plugin_lib: None,
        plugin_log_path: None,
    });
    if let Err(e) = emulator.start(None) {
        tracing::error!("failed to start emulator: {}", e);
        std::process::exit(1);
    }

    let agent_addr = ("127.0.0.1".to_string(), config.ports.agent_port);
    let agent_stream = match TcpStream::connect(agent_addr.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to connect to debugger agent: {}", e);
            std::process::exit(1);
        }
    };
    let mut agent = AgentClient::new(FramedStream::from_stream(agent_stream));

    if let Err(e) = agent.configure_gdb() {
        tracing::error!("configure_gdb failed: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = agent.setup_handlers() {
        tracing::error!("setup_handlers failed: {}", e);
        std::process::exit(1);
    }

    let baseline_runtime = match measure_baseline(&mut agent) {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("baseline measurement failed: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(runtime_sec = baseline_runtime, "baseline measured");

    if let Err(e) = agent.set_timeout(baseline_runtime) {
        tracing::error!("set_timeout failed: {}", e);
        std::process::exit(1);
    }

    let mut config = config;
    config.bounds = seu_core::bounds::Bounds::new((2.0 * baseline_runtime).max(0.002), 0.001);
    let max_uart_wait = Duration::from_secs_f64((3.0 * baseline_runtime).max(1.0));
    let max_output_time = Duration::from_secs_f64(20.0 * baseline_runtime);

    let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<QueueEvent>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<()>();

    let json_sink = if args.no_logging {
        None
    } else {
        let path = Path::new(&args.log_dir).join(format!(
            "{}_{}.json",
            config.board_name,
            Timestamp::now().campaign_file_suffix()
        ));
        JsonSink::open(&path, &args.filename).ok()
    };
    let text_log = if args.no_logging {
        None
    } else {
        let path = Path::new(&args.log_dir).join(format!(
            "{}_{}.log",
            config.board_name,
            Timestamp::now().campaign_file_suffix()
        ));
        std::fs::File::create(path).ok()
    };

    let consumer = LogConsumer::new(queue_rx, result_tx, json_sink, text_log);
    let consumer_handle = std::thread::spawn(move || consumer.run());

    let rng = StdRng::from_entropy();
    let mut machine = CampaignMachine::new(
        agent,
        None,
        &config.board,
        args.section,
        config.forced,
        config.bounds,
        config.counters,
        rng,
        vec!["pre_workload".to_string(), "post_workload".to_string()],
        "nErrors".to_string(),
        queue_tx.clone(),
        result_rx,
        max_uart_wait,
        max_output_time,
        false,
        (baseline_runtime * 1_000_000.0) as u64,
        config.debug_commands,
        &mut emulator,
        agent_addr,
        None,
    );

    match machine.run() {
        Ok(done) => tracing::info!(injections = done, "campaign finished"),
        Err(e) => tracing::error!("campaign aborted: {}", e),
    }
    drop(machine);

    let _ = queue_tx.send(QueueEvent::Control(queue::ControlMarker::QueueStop));
    let _ = consumer_handle.join();
    let _ = emulator.stop(true);
}

/// Measures cycles-per-workload-pass by bracketing two hits of the
/// pre-workload breakpoint with global-timer reads (spec §4.F
/// initialization step 2).
fn measure_baseline(agent: &mut AgentClient) -> Result<f64, seu_core::error::Error> {
    agent.continue_target(None)?;
    wait_for_breakpoint(agent)?;
    let begin = agent.read_global_timer()?;
    agent.continue_target(None)?;
    wait_for_breakpoint(agent)?;
    let end = agent.read_global_timer()?;
    let cycles = cycles_elapsed(begin, end);
    // Timer ticks are treated as microseconds for the sleep-bound math;
    // the real tick rate is board-specific and configured elsewhere.
    Ok(cycles as f64 / 1_000_000.0)
}

fn wait_for_breakpoint(agent: &mut AgentClient) -> Result<(), seu_core::error::Error> {
    match agent.recv_event()? {
        AgentEvent::BreakpointHit(_) => Ok(()),
        other => Err(seu_core::error::Error::ConnectionLost {
            reason: format!("expected breakpoint during baseline measurement, got {:?}", other),
        }),
    }
}
