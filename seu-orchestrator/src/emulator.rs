//! Emulator process wrapper (spec §4.B, §6 "Emulator start command shape").

use seu_core::error::Error;
use seu_transport::{accept_one, FramedStream};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PluginArgs {
    pub text_start: u32,
    pub text_end: u32,
    pub plugin_port: u16,
    pub host: String,
    pub do_inject: bool,
}

#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub qemu_binary: String,
    pub machine: String,
    pub cpu: String,
    pub kernel_path: String,
    pub mem_mb: u32,
    pub gdb_port: u16,
    pub monitor_port: u16,
    pub plugin_lib: Option<String>,
    pub plugin_log_path: Option<String>,
}

impl EmulatorConfig {
    /// Builds the argv described in spec §6 exactly, appending the plugin
    /// clause only when `plugin` is `Some`.
    pub fn build_args(&self, plugin: Option<&PluginArgs>) -> Vec<String> {
        let mut args = vec![
            "-semihosting".to_string(),
            "--semihosting-config".to_string(),
            "enable=on,target=native".to_string(),
            "-M".to_string(),
            self.machine.clone(),
            "-cpu".to_string(),
            self.cpu.clone(),
            "-nographic".to_string(),
            "-kernel".to_string(),
            self.kernel_path.clone(),
            "-m".to_string(),
            format!("{}M", self.mem_mb),
            "-gdb".to_string(),
            format!("tcp::{}", self.gdb_port),
            "-S".to_string(),
            "-monitor".to_string(),
            format!("telnet::{},server,nowait", self.monitor_port),
        ];
        if let (Some(lib), Some(plugin)) = (&self.plugin_lib, plugin) {
            let mut plugin_arg = format!(
                "{},arg={:#x},arg={:#x}",
                lib, plugin.text_start, plugin.text_end
            );
            plugin_arg.push_str(&format!(",arg={},arg={},arg={}", plugin.plugin_port, plugin.host, plugin.do_inject));
            args.push("-plugin".to_string());
            args.push(plugin_arg);
            args.push("-d".to_string());
            args.push("plugin".to_string());
            if let Some(log_path) = &self.plugin_log_path {
                args.push("-D".to_string());
                args.push(log_path.clone());
            }
        }
        args
    }
}

pub struct EmulatorProcess {
    config: EmulatorConfig,
    child: Option<Child>,
    monitor: Option<TcpStream>,
}

const MONITOR_CONNECT_RETRIES: u32 = 5;
const PLUGIN_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

impl EmulatorProcess {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            child: None,
            monitor: None,
        }
    }

    /// Spawns the emulator; if `plugin` is set, binds a listener first and
    /// blocks until the plugin connects (spec §4.B: "the orchestrator's
    /// side accepts a TCP connection from the plugin before the process
    /// begins executing guest code" — `-S` holds the vCPU until `continue`).
    pub fn start(&mut self, plugin: Option<&PluginArgs>) -> Result<Option<FramedStream>, Error> {
        let args = self.config.build_args(plugin);

        let plugin_listener = match plugin {
            Some(p) => Some(TcpListener::bind(("0.0.0.0", p.plugin_port)).map_err(|source| Error::Io { source })?),
            None => None,
        };

        let child = spawn_in_new_group(&self.config.qemu_binary, &args)?;
        self.child = Some(child);

        self.monitor = Some(connect_monitor_with_retries(self.config.monitor_port)?);

        let plugin_stream = match plugin_listener {
            Some(listener) => Some(accept_one(&listener, PLUGIN_ACCEPT_TIMEOUT)?),
            None => None,
        };

        Ok(plugin_stream)
    }

    /// `stop(hard)` (spec §4.B): polite monitor `stop`, then SIGINT to the
    /// process group if unresponsive within ~10ms, then force-kill.
    pub fn stop(&mut self, hard: bool) -> Result<(), Error> {
        if !hard {
            if let Some(monitor) = &mut self.monitor {
                let _ = send_monitor_line(monitor, "quit");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        if let Some(child) = &mut self.child {
            if child.try_wait().ok().flatten().is_none() {
                sigint_process_group(child.id());
                std::thread::sleep(Duration::from_millis(50));
            }
            if child.try_wait().ok().flatten().is_none() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.child = None;
        self.monitor = None;
        Ok(())
    }

    pub fn restart(&mut self, hard: bool, plugin: Option<&PluginArgs>) -> Result<Option<FramedStream>, Error> {
        self.stop(hard)?;
        self.start(plugin)
    }

    pub fn send_monitor(&mut self, line: &str) -> Result<String, Error> {
        let monitor = self.monitor.as_mut().ok_or_else(|| Error::ConnectionLost {
            reason: "monitor channel not connected".to_string(),
        })?;
        send_monitor_line(monitor, line)
    }
}

fn send_monitor_line(monitor: &mut TcpStream, line: &str) -> Result<String, Error> {
    writeln!(monitor, "{}", line).map_err(|source| Error::Io { source })?;
    let mut reader = BufReader::new(monitor.try_clone().map_err(|source| Error::Io { source })?);
    let mut reply = String::new();
    reader.read_line(&mut reply).map_err(|source| Error::Io { source })?;
    Ok(reply.trim_end().to_string())
}

fn connect_monitor_with_retries(port: u16) -> Result<TcpStream, Error> {
    let mut last_err = None;
    for attempt in 0..MONITOR_CONNECT_RETRIES {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_err = Some(e);
                std::thread::sleep(Duration::from_millis(20 * 2u64.pow(attempt)));
            }
        }
    }
    Err(Error::RestartFailed {
        reason: format!(
            "could not connect to monitor port {} after {} attempts: {}",
            port,
            MONITOR_CONNECT_RETRIES,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ),
    })
}

#[cfg(unix)]
fn spawn_in_new_group(binary: &str, args: &[String]) -> Result<Child, Error> {
    use std::os::unix::process::CommandExt;
    let mut command = Command::new(binary);
    command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }
    command.spawn().map_err(|source| Error::Io { source })
}

#[cfg(not(unix))]
fn spawn_in_new_group(binary: &str, args: &[String]) -> Result<Child, Error> {
    Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Io { source })
}

#[cfg(unix)]
fn sigint_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGINT);
}

#[cfg(not(unix))]
fn sigint_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> EmulatorConfig {
        EmulatorConfig {
            qemu_binary: "qemu-system-arm".to_string(),
            machine: "xilinx-zynq-a9".to_string(),
            cpu: "cortex-a9".to_string(),
            kernel_path: "/tmp/kernel.elf".to_string(),
            mem_mb: 256,
            gdb_port: 9000,
            monitor_port: 9001,
            plugin_lib: None,
            plugin_log_path: None,
        }
    }

    #[test]
    fn build_args_matches_spec_shape_without_plugin() {
        let config = sample_config();
        let args = config.build_args(None);
        assert_eq!(
            args,
            vec![
                "-semihosting",
                "--semihosting-config",
                "enable=on,target=native",
                "-M",
                "xilinx-zynq-a9",
                "-cpu",
                "cortex-a9",
                "-nographic",
                "-kernel",
                "/tmp/kernel.elf",
                "-m",
                "256M",
                "-gdb",
                "tcp::9000",
                "-S",
                "-monitor",
                "telnet::9001,server,nowait",
            ]
        );
    }

    #[test]
    fn build_args_appends_plugin_clause() {
        let mut config = sample_config();
        config.plugin_lib = Some("/usr/lib/cacheplugin.so".to_string());
        let plugin = PluginArgs {
            text_start: 0x1000,
            text_end: 0x2000,
            plugin_port: 9005,
            host: "127.0.0.1".to_string(),
            do_inject: true,
        };
        let args = config.build_args(Some(&plugin));
        assert!(args.contains(&"-plugin".to_string()));
        assert!(args.iter().any(|a| a.contains("arg=0x1000")));
        assert!(args.iter().any(|a| a.contains("arg=true")));
    }
}
