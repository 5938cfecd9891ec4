//! End-to-end campaign fixtures driven against a scripted stub speaking the
//! agent's textual protocol directly over a real socket, exercising
//! `CampaignMachine` without a live GDB/QEMU pair.

use rand::rngs::StdRng;
use rand::SeedableRng;
use seu_core::board::Board;
use seu_core::bounds::Bounds;
use seu_core::counters::CampaignCounters;
use seu_orchestrator::agent_client::AgentClient;
use seu_orchestrator::cli::Section;
use seu_orchestrator::emulator::{EmulatorConfig, EmulatorProcess};
use seu_orchestrator::queue::QueueEvent;
use seu_orchestrator::state_machine::CampaignMachine;
use seu_transport::FramedStream;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

const BOARD_TOML: &str = r#"
    name = "pynq"
    isa = "arm_cortex_a9"
    machine = "xilinx-zynq-a9"
    cpu = "cortex-a9"

    [[sections]]
    name = "text"
    base_address = 0x10000
    size_bytes = 0x1000
"#;

/// Runs a minimal scripted agent that answers exactly the sequence of
/// commands one non-plugin `InjectFault` + `GetOutput` pass issues against
/// a register target, reporting `n_errors` for the guest's `nErrors`
/// variable. A nonzero `n_errors` models a "clean success with a recorded
/// error" / silent-data-corruption outcome; `"0"` models the post-workload
/// breakpoint-without-error retry path.
fn serve_one_iteration(listener: TcpListener, n_errors: &'static str) {
    let (stream, _) = listener.accept().unwrap();
    let mut s = FramedStream::from_stream(stream);
    let mut continues = 0u32;
    let mut timer_reads = 0u32;

    loop {
        let cmd = match s.recv_str() {
            Ok(c) => c,
            Err(_) => return,
        };
        match cmd.as_str() {
            "interrupt" => {
                s.send_str("interrupted").unwrap();
            }
            "reload" => {}
            "continue" => {
                continues += 1;
                match continues {
                    1 => {
                        s.send_str("hit breakpoint").unwrap();
                        s.send_str("pre_workload").unwrap();
                    }
                    // The second `continue` starts the sleep window; its
                    // stop event is delivered as the reply to the
                    // `interrupt` that follows it, not here.
                    2 => {}
                    3 => {
                        s.send_str("hit stop handler").unwrap();
                    }
                    _ => {}
                }
            }
            "read_global_timer" => {
                timer_reads += 1;
                let value = if timer_reads == 1 { "1000" } else { "3000" };
                s.send_str(value).unwrap();
            }
            "read_reg" => {
                let _name = s.recv_str().unwrap();
                s.send_str("a0").unwrap();
            }
            "write_reg" => {
                let _name = s.recv_str().unwrap();
                let _value = s.recv_str().unwrap();
            }
            "get_var" => {
                let _name = s.recv_str().unwrap();
                s.send_str(n_errors).unwrap();
                // Delivered right after, same reasoning as above: the
                // next client read is `recv_event`, with no intervening
                // command.
                s.send_str("hit breakpoint").unwrap();
                s.send_str("post_workload").unwrap();
            }
            other => panic!("stub received unexpected command: {}", other),
        }
    }
}

fn run_single_iteration_campaign(n_errors: &'static str) -> (u64, Vec<QueueEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || serve_one_iteration(listener, n_errors));

    let client_stream = TcpStream::connect(addr).unwrap();
    let agent = AgentClient::new(FramedStream::from_stream(client_stream));

    let board = Board::from_toml_str(BOARD_TOML).unwrap();
    let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<QueueEvent>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded();

    let events: std::sync::Arc<std::sync::Mutex<Vec<QueueEvent>>> = Default::default();
    let events_for_drain = events.clone();
    let drain = thread::spawn(move || {
        while let Ok(event) = queue_rx.recv() {
            events_for_drain.lock().unwrap().push(event.clone());
            let _ = result_tx.send(());
        }
    });

    let rng = StdRng::seed_from_u64(7);
    let bounds = Bounds::new(0.01, 0.001);
    let counters = CampaignCounters::new(1, None);

    // Never reached: this scripted campaign finishes after one clean
    // iteration and never transitions through `Dead`, so the emulator
    // handle only needs to satisfy `CampaignMachine`'s type.
    let mut emulator = EmulatorProcess::new(EmulatorConfig {
        qemu_binary: "qemu-system-arm".to_string(),
        machine: "xilinx-zynq-a9".to_string(),
        cpu: "cortex-a9".to_string(),
        kernel_path: "/dev/null".to_string(),
        mem_mb: 256,
        gdb_port: 0,
        monitor_port: 0,
        plugin_lib: None,
        plugin_log_path: None,
    });

    let mut machine = CampaignMachine::new(
        agent,
        None,
        &board,
        Section::Registers,
        Vec::new(),
        bounds,
        counters,
        rng,
        vec!["pre_workload".to_string(), "post_workload".to_string()],
        "nErrors".to_string(),
        queue_tx.clone(),
        result_rx,
        Duration::from_secs(2),
        Duration::from_secs(2),
        false,
        1_000,
        Vec::new(),
        &mut emulator,
        (addr.ip().to_string(), addr.port()),
        None,
    );

    let done = machine.run().unwrap();

    server.join().unwrap();
    drop(queue_tx);
    drain.join().unwrap();

    let events = events.lock().unwrap().clone();
    (done, events)
}

#[test]
fn clean_iteration_reaches_finished_with_one_injection() {
    let (done, events) = run_single_iteration_campaign("0x2");
    assert_eq!(done, 1);
    assert!(events.iter().any(|e| matches!(e, QueueEvent::Outcome(_))));
    assert!(events.iter().any(|e| matches!(e, QueueEvent::Log(_))));
}

#[test]
fn forbidden_memory_range_is_never_perturbed() {
    use seu_core::target::InjectionTarget;
    use seu_orchestrator::injector::{Injector, Selection};

    let board = Board::from_toml_str(
        r#"
            name = "pynq"
            isa = "arm_cortex_a9"
            machine = "xilinx-zynq-a9"
            cpu = "cortex-a9"

            [[forbidden_ranges]]
            start = 0xF8F00200
            end = 0xF8F0021F
        "#,
    )
    .unwrap();
    let injector = Injector::new(&board);
    let selection = Selection {
        target: InjectionTarget::MemoryWord(0xF8F00210),
        cache_info: None,
    };

    // `perturb` must reject the forbidden range before ever touching the
    // socket, so the agent's connection never needs a live peer.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || listener.accept());
    let client = TcpStream::connect(addr).unwrap();
    let mut agent = AgentClient::new(FramedStream::from_stream(client));
    let mut rng = StdRng::seed_from_u64(1);

    let err = injector.perturb(&mut agent, &selection, None, &mut rng).unwrap_err();
    assert!(matches!(err, seu_core::error::Error::InvalidRange { .. }));
    let _ = server.join();
}
