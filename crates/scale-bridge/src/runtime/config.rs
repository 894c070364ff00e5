use scale_io::serial::{DEFAULT_BAUD_RATE, DEFAULT_PORT};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0:1133";
pub const DEFAULT_STALENESS_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Run,
    Install,
    Uninstall,
    Start,
    Stop,
}

impl Command {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "run" => Some(Self::Run),
            "install" => Some(Self::Install),
            "uninstall" => Some(Self::Uninstall),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{flag} expects a value")]
    MissingValue { flag: &'static str },
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: &'static str, value: String },
    #[error("unknown argument {0:?}")]
    UnknownArgument(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub command: Command,
    pub show_help: bool,
    pub host: String,
    pub serial_port: String,
    pub baud_rate: u32,
    pub staleness_ms: u64,
    /// Serve a simulated scale holding this weight instead of opening a port.
    pub simulate: Option<f64>,
    pub metrics_addr: Option<String>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub run_seconds: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: Command::Run,
            show_help: false,
            host: DEFAULT_HOST.to_string(),
            serial_port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            staleness_ms: DEFAULT_STALENESS_MS,
            simulate: None,
            metrics_addr: None,
            json_logs: false,
            log_dir: None,
            run_seconds: None,
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &'static str) -> Result<&'a str, ConfigError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or(ConfigError::MissingValue { flag })
}

fn number<T: std::str::FromStr>(raw: &str, flag: &'static str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}

/// A bare `:PORT` listens on every interface.
pub fn normalize_host(host: &str) -> String {
    if host.starts_with(':') {
        format!("0.0.0.0{host}")
    } else {
        host.to_string()
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" => {
                    cfg.host = normalize_host(value(args, i, "--host")?);
                    i += 1;
                }
                "--serial" => {
                    cfg.serial_port = value(args, i, "--serial")?.to_string();
                    i += 1;
                }
                "--baud" => {
                    cfg.baud_rate = number(value(args, i, "--baud")?, "--baud")?;
                    i += 1;
                }
                "--staleness-ms" => {
                    cfg.staleness_ms =
                        number(value(args, i, "--staleness-ms")?, "--staleness-ms")?;
                    i += 1;
                }
                "--simulate" => {
                    // The weight is optional; a following flag or command is not one.
                    match args.get(i + 1) {
                        Some(next) if !next.starts_with("--") && Command::parse(next).is_none() => {
                            cfg.simulate = Some(number(next, "--simulate")?);
                            i += 1;
                        }
                        _ => cfg.simulate = Some(0.0),
                    }
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(value(args, i, "--metrics-addr")?.to_string());
                    i += 1;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(value(args, i, "--log-dir")?));
                    i += 1;
                }
                "--run-seconds" => {
                    cfg.run_seconds = Some(number(value(args, i, "--run-seconds")?, "--run-seconds")?);
                    i += 1;
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => match Command::parse(other) {
                    Some(command) => cfg.command = command,
                    None => return Err(ConfigError::UnknownArgument(other.to_string())),
                },
            }
            i += 1;
        }
        Ok(cfg)
    }

    /// Flags that reproduce this configuration for the `run` command.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--serial".to_string(),
            self.serial_port.clone(),
            "--baud".to_string(),
            self.baud_rate.to_string(),
        ];
        if self.staleness_ms != DEFAULT_STALENESS_MS {
            args.push("--staleness-ms".to_string());
            args.push(self.staleness_ms.to_string());
        }
        if let Some(addr) = &self.metrics_addr {
            args.push("--metrics-addr".to_string());
            args.push(addr.clone());
        }
        if self.json_logs {
            args.push("--json-logs".to_string());
        }
        if let Some(dir) = &self.log_dir {
            args.push("--log-dir".to_string());
            args.push(dir.display().to_string());
        }
        args
    }

    pub fn print_help() {
        println!(
            r#"scale-bridge - HTTP bridge for serial weighing scales

USAGE:
    scale-bridge [COMMAND] [OPTIONS]

COMMANDS:
    run                     Serve readings in the foreground [default]
    install                 Install the systemd service with the given options
    uninstall               Remove the systemd service
    start                   Start the installed service
    stop                    Stop the installed service

OPTIONS:
    --host <ADDR>           HTTP listen address; ":PORT" means all interfaces [default: 0.0.0.0:1133]
    --serial <NAME>         Serial port the scale is attached to [default: {port}]
    --baud <RATE>           Serial baud rate [default: {baud}]
    --staleness-ms <MS>     How long a reading is reused before the scale is asked again [default: 1000]
    --simulate [WEIGHT]     Serve a simulated scale instead of opening the serial port
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --json-logs             Output logs in JSON format (for log aggregation)
    --log-dir <DIR>         Also write daily rotated log files into DIR
    --run-seconds <SECS>    Run for a fixed duration then exit
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,scale_core=trace)

EXAMPLES:
    # Serve the scale on /dev/ttyS0 at port 8080
    scale-bridge --serial /dev/ttyS0 --host :8080

    # Register as a service with metrics
    sudo scale-bridge install --serial /dev/ttyUSB1 --metrics-addr 0.0.0.0:9090

    # Short test run without hardware
    scale-bridge --simulate 12.5 --run-seconds 10
"#,
            port = DEFAULT_PORT,
            baud = DEFAULT_BAUD_RATE,
        );
    }
}
