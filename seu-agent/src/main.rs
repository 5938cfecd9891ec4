//! Debugger-side agent process (spec §4.C). Launched as a child of the
//! emulator process wrapper; owns one TCP server socket for the
//! orchestrator and drives GDB's machine interface underneath it.

mod backend;
mod benchmark;
mod cli;
mod mi;
mod server;
mod watchdog;

use benchmark::BenchmarkTable;
use mi::MiGdbBackend;
use server::Dispatcher;
use seu_transport::FramedStream;
use std::net::TcpListener;
use std::path::Path;
use structopt::StructOpt;

fn main() {
    tracing_subscriber::fmt::init();
    let args = cli::Args::from_args();

    let table = match BenchmarkTable::load(Path::new(&args.source_dir)) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("failed to load benchmark table: {}", e);
            std::process::exit(1);
        }
    };

    let gdb_binary = std::env::var("SEU_GDB_BINARY").unwrap_or_else(|_| "gdb-multiarch".to_string());
    let kernel_elf = std::env::var("SEU_KERNEL_ELF").unwrap_or_default();

    let listener = match TcpListener::bind(("127.0.0.1", args.python_port)) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("failed to bind agent port {}: {}", args.python_port, e);
            std::process::exit(1);
        }
    };
    tracing::info!(port = args.python_port, board = %args.board, "seu-agent listening");

    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                continue;
            }
        };
        tracing::info!(%peer, "orchestrator connected");
        let mut framed = FramedStream::from_stream(stream);

        let backend = match MiGdbBackend::spawn(&gdb_binary, &kernel_elf) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("failed to spawn gdb: {}", e);
                continue;
            }
        };
        let mut dispatcher = Dispatcher::new(backend, table.breakpoints());

        match dispatcher.run(&mut framed, args.gdb_port) {
            Ok(true) => {
                tracing::info!("agent told to quit");
                return;
            }
            Ok(false) => unreachable!("run only returns Ok(true) or Err"),
            Err(e) => {
                tracing::warn!("session ended: {}", e);
            }
        }
    }
}
