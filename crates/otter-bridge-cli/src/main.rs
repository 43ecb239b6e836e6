use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use otter_bridge::vm::{ON_ENTER, ON_LEAVE, ON_MESSAGE};
use otter_bridge::{Engine, HostMap, HostValue, SessionId, Status, Vm};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::filter::EnvFilter;

mod config;

use config::{Config, load_config};

#[derive(Parser)]
#[command(name = "otter-bridge", version, about = "Drive a script VM through the dispatch protocol")]
struct Cli {
    /// Path to otter-bridge.toml (default: search upward from the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an entry script, then dispatch enter, each message, and leave
    Run(RunArgs),
    /// Print the bridge and engine version
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// Script to load
    entry: PathBuf,

    /// Load the entry as an ES module; imports resolve relative to the importing file
    #[arg(long)]
    module: bool,

    /// Session id passed to every handler
    #[arg(long, default_value_t = 1)]
    session: SessionId,

    /// Peer address passed to onEnter and onLeave
    #[arg(long, default_value = "127.0.0.1:0")]
    addr: String,

    /// JSON object dispatched to onMessage (repeatable)
    #[arg(long = "message", value_name = "JSON")]
    messages: Vec<String>,

    /// Terminate the script after this many milliseconds (0 = no timeout)
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,

    /// Print VM memory statistics before disposing
    #[arg(long)]
    mem_stat: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let config = load_config(cli.config.as_deref())?;
            run(args, config)
        }
        Commands::Version => {
            println!("{}", otter_bridge::version());
            Ok(())
        }
    }
}

fn run(args: RunArgs, config: Config) -> Result<()> {
    let messages = args
        .messages
        .iter()
        .map(String::as_str)
        .map(parse_message)
        .collect::<Result<Vec<_>>>()?;

    let engine = Engine::builder()
        .config(config.engine)
        .on_send(|addr, id, value| {
            println!("{}", json!({ "send": { "addr": addr, "id": id, "value": value.to_json() } }));
            0
        })
        .on_send_to(|value| {
            println!("{}", json!({ "sendTo": value.to_json() }));
            0
        })
        .on_output(|text| println!("{text}"))
        .build()?;

    let mut vm = engine.create_vm()?;
    vm.set_associated_source_addr(config.source.addr);
    vm.set_associated_source_id(config.source.id);

    let (done, finished) = crossbeam_channel::bounded::<()>(0);
    let watchdog = (args.timeout_ms > 0).then(|| {
        let handle = vm.terminate_handle();
        let timeout = Duration::from_millis(args.timeout_ms);
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = finished.recv_timeout(timeout) {
                warn!(timeout_ms = timeout.as_millis() as u64, "Script timed out; terminating");
                handle.terminate();
            }
        })
    });

    let result = drive(&mut vm, &args, &messages);

    drop(done);
    if let Some(watchdog) = watchdog {
        let _ = watchdog.join();
    }
    vm.dispose();
    debug!(stats = ?engine.stats(), "Run finished");

    result
}

fn drive(vm: &mut Vm, args: &RunArgs, messages: &[HostMap]) -> Result<()> {
    load_entry(vm, args)?;

    let status = vm.dispatch_enter(args.session, &args.addr);
    check(vm, status, ON_ENTER)?;

    for payload in messages {
        let status = vm.dispatch_message(args.session, payload);
        check(vm, status, ON_MESSAGE)?;
    }

    let status = vm.dispatch_leave(args.session, &args.addr);
    check(vm, status, ON_LEAVE)?;

    if args.mem_stat {
        vm.print_mem_stat();
    }
    Ok(())
}

fn load_entry(vm: &mut Vm, args: &RunArgs) -> Result<()> {
    if !args.module {
        return match vm.load_file(&args.entry) {
            Status::Success => Ok(()),
            Status::EntryMissing => bail!("Cannot read {}: {}", args.entry.display(), vm.last_exception()),
            status => bail!("Loading {} failed ({status}): {}", args.entry.display(), vm.last_exception()),
        };
    }

    // Module names are canonical paths so referrers locate their imports
    let entry = args.entry.canonicalize().unwrap_or_else(|_| args.entry.clone());
    let store = vm.module_store();
    let resolve = move |specifier: &str, referrer: &str| {
        let path = match import_path(referrer, specifier).canonicalize() {
            Ok(path) => path,
            Err(err) => {
                warn!(specifier, referrer, error = %err, "Import not found on disk");
                return 1;
            }
        };
        let name = path.to_string_lossy().into_owned();
        if !store.contains(&name) {
            match std::fs::read_to_string(&path) {
                Ok(source) => store.provide(name.as_str(), source),
                Err(err) => {
                    warn!(specifier, referrer, error = %err, "Import not readable");
                    return 1;
                }
            }
        }
        store.link(referrer, specifier, name);
        0
    };

    if let Err(err) = vm.load_module_file(&entry, resolve) {
        bail!("Loading module {} failed: {err}: {}", args.entry.display(), vm.last_exception());
    }
    Ok(())
}

/// Path of `specifier` imported from the module file `referrer`.
fn import_path(referrer: &str, specifier: &str) -> PathBuf {
    Path::new(referrer)
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(specifier)
}

fn check(vm: &Vm, status: Status, handler: &str) -> Result<()> {
    match status {
        Status::Success => Ok(()),
        Status::HandlerMissing => {
            debug!(handler, "Handler not defined; skipped");
            Ok(())
        }
        Status::ScriptException => bail!("{handler} threw: {}", vm.last_exception()),
        other => bail!("{handler} failed: {other}"),
    }
}

fn parse_message(text: &str) -> Result<HostMap> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("Invalid --message {text:?}: {e}"))?;
    match HostValue::from(json) {
        HostValue::Map(map) => Ok(map),
        other => bail!("--message must be a JSON object, got {}", other.to_json()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_object() {
        let map = parse_message(r#"{"cmd": "ping", "n": 42}"#).unwrap();
        assert_eq!(map.get_str("cmd"), Some(&HostValue::from("ping")));
        assert_eq!(map.get_str("n"), Some(&HostValue::from(42u64)));
    }

    #[test]
    fn test_parse_message_rejects_non_objects() {
        assert!(parse_message("[1, 2]").is_err());
        assert!(parse_message("not json").is_err());
    }

    #[test]
    fn test_import_path_uses_referrer_directory() {
        assert_eq!(import_path("/app/lib/a.js", "./b.js"), Path::new("/app/lib/./b.js"));
        assert_eq!(import_path("/app/main.js", "../x.js"), Path::new("/app/../x.js"));
        assert_eq!(import_path("main.js", "util.js"), Path::new("util.js"));
    }

    #[test]
    fn test_module_imports_resolve_against_importer() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(
            dir.path().join("main.js"),
            "import { b } from './b.js'; import { a } from './lib/a.js'; host.send([b, a]);",
        )
        .unwrap();
        std::fs::write(dir.path().join("b.js"), "export const b = 'top';").unwrap();
        std::fs::write(lib.join("a.js"), "import { b } from './b.js'; export const a = b;").unwrap();
        std::fs::write(lib.join("b.js"), "export const b = 'nested';").unwrap();

        let sent = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = sent.clone();
        let engine = Engine::builder()
            .on_send(move |_, _, value| {
                sink.lock().unwrap().push(value);
                0
            })
            .build()
            .unwrap();
        let mut vm = engine.create_vm().unwrap();

        let entry = dir.path().join("main.js");
        let cli = Cli::try_parse_from(["otter-bridge", "run", "--module", entry.to_str().unwrap()]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        load_entry(&mut vm, &args).unwrap();

        assert_eq!(
            *sent.lock().unwrap(),
            vec![HostValue::Sequence(vec!["top".into(), "nested".into()])]
        );
        let store = vm.module_store();
        let top = dir.path().join("b.js").canonicalize().unwrap();
        let nested = lib.join("b.js").canonicalize().unwrap();
        assert!(store.contains(&top.to_string_lossy()));
        assert!(store.contains(&nested.to_string_lossy()));
        assert!(!store.contains("./b.js"));
        vm.dispose();
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "otter-bridge",
            "run",
            "app.js",
            "--module",
            "--message",
            "{}",
            "--message",
            "{\"a\":1}",
            "--timeout-ms",
            "250",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.module);
        assert_eq!(args.messages.len(), 2);
        assert_eq!(args.timeout_ms, 250);
        assert_eq!(args.session, 1);
    }
}
