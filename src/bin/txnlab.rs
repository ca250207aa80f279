use std::fs;

use tracing_subscriber::EnvFilter;
use txnlab::{scenarios, BlockPolicy, Protocol, Schedule, Simulation, SimulationConfig, TxnLabError, Workload};

fn print_usage_and_exit(exit_code: i32) -> ! {
    eprintln!(
        "Usage: txnlab [--scenario <NAME>] [--workload <PATH>] [--config <PATH>] [--protocol <P>]\n\
         \n\
         Options:\n\
           --scenario, -s   Built-in scenario: items, accounts, deadlock (default: items)\n\
           --workload, -w   JSON workload file (overrides --scenario)\n\
           --config, -c     JSON simulation config file\n\
           --protocol, -p   2pl, mvcc or both (default: both)\n\
           --schedule       serial, interleaved or threaded\n\
           --wait           Queue on lock conflicts instead of aborting\n\
           --describe       Print the timeline as text instead of JSON\n\
           --help, -h       Show this help message\n\
         \n\
         Notes:\n\
           * The config path can also be set via TXNLAB_CONFIG.\n\
           * Log verbosity follows RUST_LOG (default: warn)."
    );
    std::process::exit(exit_code);
}

#[derive(Default)]
struct ParsedArgs {
    scenario: Option<String>,
    workload: Option<String>,
    config: Option<String>,
    protocol: Option<String>,
    schedule: Option<String>,
    wait: bool,
    describe: bool,
}

fn flag_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> String {
    iter.next().unwrap_or_else(|| {
        eprintln!("error: {flag} requires a value");
        print_usage_and_exit(2);
    })
}

fn parse_args(args: impl IntoIterator<Item = String>) -> ParsedArgs {
    let mut parsed = ParsedArgs::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => print_usage_and_exit(0),
            "--scenario" | "-s" => parsed.scenario = Some(flag_value(&mut iter, "--scenario")),
            "--workload" | "-w" => parsed.workload = Some(flag_value(&mut iter, "--workload")),
            "--config" | "-c" => parsed.config = Some(flag_value(&mut iter, "--config")),
            "--protocol" | "-p" => parsed.protocol = Some(flag_value(&mut iter, "--protocol")),
            "--schedule" => parsed.schedule = Some(flag_value(&mut iter, "--schedule")),
            "--wait" => parsed.wait = true,
            "--describe" => parsed.describe = true,
            _ if arg.starts_with("--scenario=") => {
                parsed.scenario = Some(arg["--scenario=".len()..].to_string());
            }
            _ if arg.starts_with("--workload=") => {
                parsed.workload = Some(arg["--workload=".len()..].to_string());
            }
            _ if arg.starts_with("--config=") => {
                parsed.config = Some(arg["--config=".len()..].to_string());
            }
            _ if arg.starts_with("--protocol=") => {
                parsed.protocol = Some(arg["--protocol=".len()..].to_string());
            }
            _ if arg.starts_with("--schedule=") => {
                parsed.schedule = Some(arg["--schedule=".len()..].to_string());
            }
            _ => {
                eprintln!("error: unknown option '{arg}'");
                print_usage_and_exit(2);
            }
        }
    }
    parsed
}

fn load_config(parsed: &ParsedArgs) -> Result<SimulationConfig, TxnLabError> {
    let path = parsed
        .config
        .clone()
        .or_else(|| std::env::var("TXNLAB_CONFIG").ok().filter(|p| !p.is_empty()));
    let mut config = match path {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => SimulationConfig::default(),
    };
    if let Some(schedule) = &parsed.schedule {
        config.schedule = match schedule.as_str() {
            "serial" => Schedule::Serial,
            "interleaved" => Schedule::Interleaved,
            "threaded" => Schedule::Threaded,
            other => {
                eprintln!("error: unknown schedule '{other}'");
                print_usage_and_exit(2);
            }
        };
    }
    if parsed.wait {
        config.block_policy = BlockPolicy::Wait;
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), TxnLabError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let parsed = parse_args(std::env::args().skip(1));
    let config = load_config(&parsed)?;

    if parsed.workload.is_none() && parsed.scenario.as_deref() == Some("deadlock") {
        let script = scenarios::deadlock_ring();
        let sim = Simulation::new(&script.resources, config)?;
        let report = sim.run_lock_script(&script)?;
        if parsed.describe {
            for step in &report.steps {
                println!("{}. {}", step.step, step.action);
            }
        } else {
            print_json(&report)?;
        }
        return Ok(());
    }

    let workload = match &parsed.workload {
        Some(path) => Workload::from_json(&fs::read_to_string(path)?)?,
        None => scenarios::workload(parsed.scenario.as_deref().unwrap_or("items"))?,
    };
    let sim = Simulation::from_workload(&workload, config)?;

    let protocol = parsed.protocol.as_deref().unwrap_or("both");
    if protocol == "both" {
        let comparison = sim.compare(&workload.transactions)?;
        if parsed.describe {
            for report in &comparison.reports {
                println!("== {} ==", report.protocol);
                for line in report.describe() {
                    println!("{line}");
                }
            }
            println!(
                "{} faster by {:.1}% ({} vs {} conflicts, {} vs {} aborts)",
                comparison.faster,
                comparison.difference_pct,
                comparison.two_phase_locking.conflicts,
                comparison.mvcc.conflicts,
                comparison.two_phase_locking.aborts,
                comparison.mvcc.aborts
            );
        } else {
            print_json(&comparison)?;
        }
        return Ok(());
    }

    let protocol: Protocol = protocol.parse()?;
    let report = sim.run_workload(protocol, &workload.transactions)?;
    if parsed.describe {
        for line in report.describe() {
            println!("{line}");
        }
    } else {
        print_json(&report)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ParsedArgs {
        parse_args(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn inline_and_separate_values_are_equivalent() {
        let inline = parse(&[
            "--scenario=accounts",
            "--workload=w.json",
            "--config=c.json",
            "--protocol=mvcc",
            "--schedule=threaded",
        ]);
        let separate = parse(&[
            "-s", "accounts", "-w", "w.json", "-c", "c.json", "-p", "mvcc", "--schedule", "threaded",
        ]);
        for parsed in [inline, separate] {
            assert_eq!(parsed.scenario.as_deref(), Some("accounts"));
            assert_eq!(parsed.workload.as_deref(), Some("w.json"));
            assert_eq!(parsed.config.as_deref(), Some("c.json"));
            assert_eq!(parsed.protocol.as_deref(), Some("mvcc"));
            assert_eq!(parsed.schedule.as_deref(), Some("threaded"));
        }
    }

    #[test]
    fn switches_default_off() {
        let parsed = parse(&["--wait"]);
        assert!(parsed.wait);
        assert!(!parsed.describe);
        assert_eq!(parsed.scenario, None);
    }
}
