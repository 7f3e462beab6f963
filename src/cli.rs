//! Command-line argument parsing and one-shot commands for voipdiag

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::diagnostics::{Diagnostics, Timestamped};

/// Default probe packet count for `qos`
pub const DEFAULT_QOS_COUNT: u32 = 10;
/// Default observation window for `capture`
pub const DEFAULT_CAPTURE_SECS: u64 = 5;

/// One-shot diagnostic commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Qos { target: String, count: u32 },
    Scan { target: String, range: String },
    Ping { target: String },
    AmiStatus,
    Extensions,
    Calls,
    CallHistory,
    Stats,
    Capture { secs: u64 },
}

/// Parse command line arguments
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub once: bool,
    pub validate: bool,
    pub help: bool,
    pub command: Option<Command>,
}

pub fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse an argv-style list; the first element is the program name
pub fn parse_args_from(args: &[String]) -> Result<Args> {
    let mut result = Args::default();
    let mut positional: Vec<&str> = Vec::new();

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            other if other.starts_with("--") => bail!("Unknown option: {}", other),
            other => positional.push(other),
        }
    }

    if let Some((name, rest)) = positional.split_first() {
        result.command = Some(parse_command(name, rest)?);
    }

    Ok(result)
}

fn parse_command(name: &str, rest: &[&str]) -> Result<Command> {
    let arg = |i: usize, what: &str| -> Result<String> {
        rest.get(i)
            .map(|s| s.to_string())
            .with_context(|| format!("'{}' requires a {}", name, what))
    };

    let command = match name {
        "qos" => Command::Qos {
            target: arg(0, "target")?,
            count: match rest.get(1) {
                Some(c) => c.parse().context("packet count must be a number")?,
                None => DEFAULT_QOS_COUNT,
            },
        },
        "scan" => Command::Scan {
            target: arg(0, "target")?,
            range: arg(1, "port range (e.g. 1-1024)")?,
        },
        "ping" => Command::Ping {
            target: arg(0, "target")?,
        },
        "ami-status" => Command::AmiStatus,
        "extensions" => Command::Extensions,
        "calls" => Command::Calls,
        "calls-history" => Command::CallHistory,
        "stats" => Command::Stats,
        "capture" => Command::Capture {
            secs: match rest.first() {
                Some(s) => s.parse().context("capture duration must be a number of seconds")?,
                None => DEFAULT_CAPTURE_SECS,
            },
        },
        other => bail!("Unknown command: {}", other),
    };
    Ok(command)
}

/// Who is acting, for the network event log
pub fn current_principal() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "cli".to_string())
}

/// Run a one-shot command and return its JSON rendering
pub async fn run_command(diag: &Diagnostics, command: &Command, principal: &str) -> Result<Value> {
    let value = match command {
        Command::Qos { target, count } => {
            serde_json::to_value(Timestamped::now(diag.probe_qos(target, *count).await?))?
        }
        Command::Scan { target, range } => {
            serde_json::to_value(diag.scan_ports(target, range, principal).await?)?
        }
        Command::Ping { target } => {
            serde_json::to_value(Timestamped::now(diag.ping(target, principal).await?))?
        }
        Command::AmiStatus => serde_json::to_value(Timestamped::now(diag.ami_status().await))?,
        Command::Extensions => serde_json::to_value(diag.ami_extensions().await)?,
        Command::Calls => serde_json::to_value(Timestamped::now(diag.ami_active_calls().await))?,
        Command::CallHistory => serde_json::to_value(diag.call_history().await)?,
        Command::Stats => serde_json::to_value(Timestamped::now(diag.ami_statistics().await))?,
        Command::Capture { secs } => {
            if !diag.start_capture(None) {
                bail!("traffic capture is already running");
            }
            info!("Capturing traffic for {}s", secs);
            tokio::time::sleep(Duration::from_secs(*secs)).await;
            let snapshot = diag.current_traffic();
            let totals = diag.traffic_totals();
            diag.stop_capture();
            json!({
                "snapshot": snapshot.as_ref(),
                "totals": totals,
            })
        }
    };
    Ok(value)
}

pub fn print_help() {
    println!("voipdiag - VoIP network diagnostics\n");
    println!("USAGE:");
    println!("    voipdiag [OPTIONS]");
    println!("    voipdiag <COMMAND> [ARGS]\n");
    println!("OPTIONS:");
    println!("    --once              Run a single monitor cycle and exit");
    println!("    --validate          Validate configuration and exit");
    println!("    --help, -h          Show this help message\n");
    println!("COMMANDS:");
    println!("    qos <target> [count]     Measure latency, jitter, loss and MOS");
    println!("    scan <target> <low-high> Scan a TCP port range and assess risk");
    println!("    ping <target>            Plain ping");
    println!("    ami-status               Switch reachability and version");
    println!("    extensions               SIP peers as extensions");
    println!("    calls                    Active channels");
    println!("    calls-history            Last finished calls from the CDR file");
    println!("    stats                    Extension and call counts");
    println!("    capture [secs]           Classify live traffic (needs the 'capture' feature)\n");
    println!("ENVIRONMENT:");
    println!("    See .env.example for required configuration variables");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("voipdiag")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args_default() {
        let result = parse_args_from(&argv(&[])).unwrap();
        assert_eq!(result, Args::default());
    }

    #[test]
    fn test_parse_args_flags() {
        let result = parse_args_from(&argv(&["--once", "--validate"])).unwrap();
        assert!(result.once);
        assert!(result.validate);
        assert!(!result.help);

        assert!(parse_args_from(&argv(&["-h"])).unwrap().help);
        assert!(parse_args_from(&argv(&["--help"])).unwrap().help);
    }

    #[test]
    fn test_parse_unknown_option() {
        assert!(parse_args_from(&argv(&["--save-audio"])).is_err());
    }

    #[test]
    fn test_parse_qos() {
        let result = parse_args_from(&argv(&["qos", "8.8.8.8"])).unwrap();
        assert_eq!(
            result.command,
            Some(Command::Qos {
                target: "8.8.8.8".to_string(),
                count: DEFAULT_QOS_COUNT
            })
        );

        let result = parse_args_from(&argv(&["qos", "8.8.8.8", "25"])).unwrap();
        assert_eq!(
            result.command,
            Some(Command::Qos {
                target: "8.8.8.8".to_string(),
                count: 25
            })
        );

        assert!(parse_args_from(&argv(&["qos", "8.8.8.8", "many"])).is_err());
        assert!(parse_args_from(&argv(&["qos"])).is_err());
    }

    #[test]
    fn test_parse_scan() {
        let result = parse_args_from(&argv(&["scan", "10.0.0.1", "1-1024"])).unwrap();
        assert_eq!(
            result.command,
            Some(Command::Scan {
                target: "10.0.0.1".to_string(),
                range: "1-1024".to_string()
            })
        );
        assert!(parse_args_from(&argv(&["scan", "10.0.0.1"])).is_err());
    }

    #[test]
    fn test_parse_switch_commands() {
        for (name, expected) in [
            ("ami-status", Command::AmiStatus),
            ("extensions", Command::Extensions),
            ("calls", Command::Calls),
            ("calls-history", Command::CallHistory),
            ("stats", Command::Stats),
        ] {
            assert_eq!(parse_args_from(&argv(&[name])).unwrap().command, Some(expected));
        }
    }

    #[test]
    fn test_parse_capture() {
        assert_eq!(
            parse_args_from(&argv(&["capture"])).unwrap().command,
            Some(Command::Capture {
                secs: DEFAULT_CAPTURE_SECS
            })
        );
        assert_eq!(
            parse_args_from(&argv(&["capture", "2"])).unwrap().command,
            Some(Command::Capture { secs: 2 })
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(parse_args_from(&argv(&["traceroute", "x"])).is_err());
    }

    #[test]
    fn test_flags_mix_with_command() {
        let result = parse_args_from(&argv(&["ping", "--once", "1.1.1.1"])).unwrap();
        assert!(result.once);
        assert_eq!(
            result.command,
            Some(Command::Ping {
                target: "1.1.1.1".to_string()
            })
        );
    }
}
