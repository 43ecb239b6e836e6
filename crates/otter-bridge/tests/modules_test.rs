//! Integration tests for module loading through host resolvers.

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use otter_bridge::resolver::NOT_PROVIDED;
use otter_bridge::{BridgeError, Engine, HostValue, Status};
use parking_lot::Mutex;

fn recording_engine() -> (Engine, Arc<Mutex<Vec<HostValue>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    let engine = Engine::builder()
        .on_send(move |_, _, value| {
            sink.lock().push(value);
            0
        })
        .build()
        .unwrap();
    (engine, sent)
}

#[test]
fn test_resolver_provides_imports() {
    let (engine, sent) = recording_engine();
    let mut vm = engine.create_vm().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = vm.module_store();
    let log = seen.clone();
    let result = vm.load_module(
        "main",
        "import { greet } from 'dep'; host.send([greet('bob')]);",
        move |specifier, referrer| {
            log.lock().push((specifier.to_string(), referrer.to_string()));
            match specifier {
                "dep" => {
                    store.provide("dep", "import { mark } from 'leaf'; export function greet(n) { return mark + n }");
                    0
                }
                "leaf" => {
                    store.provide("leaf", "export const mark = 'hi ';");
                    0
                }
                _ => 1,
            }
        },
    );

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(*sent.lock(), vec![HostValue::Sequence(vec!["hi bob".into()])]);
    assert_eq!(
        *seen.lock(),
        vec![
            ("dep".to_string(), "main".to_string()),
            ("leaf".to_string(), "dep".to_string()),
        ]
    );
    assert!(vm.module_store().contains("leaf"));
    assert_eq!(engine.stats().modules_loaded, 1);
    vm.dispose();
}

#[test]
fn test_known_modules_skip_the_resolver() {
    let engine = Engine::new().unwrap();
    let mut vm = engine.create_vm().unwrap();
    vm.module_store().provide("util", "export const two = 2;");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let result = vm.load_module(
        "main",
        "import { two } from 'util'; if (two !== 2) throw new Error('wrong');",
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            1
        },
    );

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    vm.dispose();
}

#[test]
fn test_linked_imports_resolve_per_referrer() {
    let (engine, sent) = recording_engine();
    let mut vm = engine.create_vm().unwrap();
    let store = vm.module_store();

    let result = vm.load_module(
        "/app/main.js",
        "import { name } from './util.js'; import { inner } from './lib/a.js'; host.send([name, inner]);",
        move |specifier, referrer| {
            let (name, source) = match (referrer, specifier) {
                ("/app/main.js", "./util.js") => ("/app/util.js", "export const name = 'top';"),
                ("/app/main.js", "./lib/a.js") => {
                    ("/app/lib/a.js", "import { name } from './util.js'; export const inner = name;")
                }
                ("/app/lib/a.js", "./util.js") => ("/app/lib/util.js", "export const name = 'nested';"),
                _ => return 1,
            };
            store.provide(name, source);
            store.link(referrer, specifier, name);
            0
        },
    );

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(
        *sent.lock(),
        vec![HostValue::Sequence(vec!["top".into(), "nested".into()])]
    );
    assert!(!vm.module_store().contains("./util.js"));
    vm.dispose();
}

#[test]
fn test_rejected_import_fails_the_load() {
    let engine = Engine::new().unwrap();
    let mut vm = engine.create_vm().unwrap();

    let result = vm.load_module("main", "import 'missing';", |_, _| 7);

    match result {
        Err(BridgeError::Resolution {
            specifier,
            referrer,
            code,
        }) => {
            assert_eq!(specifier, "missing");
            assert_eq!(referrer, "main");
            assert_eq!(code, 7);
        }
        other => panic!("expected resolution error, got {other:?}"),
    }
    assert_eq!(vm.last_exception(), "Module (missing) has not been loaded");
    assert_eq!(engine.stats().modules_loaded, 0);
    vm.dispose();
}

#[test]
fn test_resolver_claiming_success_without_source() {
    let engine = Engine::new().unwrap();
    let mut vm = engine.create_vm().unwrap();

    let result = vm.load_module("main", "import 'ghost';", |_, _| 0);

    match result {
        Err(BridgeError::Resolution { specifier, code, .. }) => {
            assert_eq!(specifier, "ghost");
            assert_eq!(code, NOT_PROVIDED);
        }
        other => panic!("expected resolution error, got {other:?}"),
    }
    assert_eq!(vm.last_exception(), "Module (ghost) has not been loaded");
    vm.dispose();
}

#[test]
fn test_resolver_lives_only_for_the_load() {
    let engine = Arc::new(Engine::new().unwrap());
    let mut vm = engine.create_vm().unwrap();
    assert_eq!(engine.pending_resolvers(), 0);

    let observed = Arc::new(AtomicUsize::new(usize::MAX));
    let (watcher, seen) = (engine.clone(), observed.clone());
    let _ = vm.load_module("main", "import 'anything';", move |_, _| {
        seen.store(watcher.pending_resolvers(), Ordering::SeqCst);
        1
    });

    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert_eq!(engine.pending_resolvers(), 0);

    // Also released after a successful load
    vm.load_module("plain", "globalThis.x = 1;", |_, _| 1).unwrap();
    assert_eq!(engine.pending_resolvers(), 0);
    vm.dispose();
}

#[test]
fn test_module_exception_is_script_error() {
    let engine = Engine::new().unwrap();
    let mut vm = engine.create_vm().unwrap();

    let result = vm.load_module("main", "throw new TypeError('nope');", |_, _| 1);

    assert!(matches!(result, Err(BridgeError::Script { .. })));
    assert_eq!(result.unwrap_err().status(), Status::ScriptException);
    assert!(vm.last_exception().starts_with("TypeError: nope"));
    vm.dispose();
}

#[test]
fn test_module_file_missing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new().unwrap();
    let mut vm = engine.create_vm().unwrap();

    let result = vm.load_module_file(dir.path().join("absent.mjs"), |_, _| 1);
    let err = result.unwrap_err();
    assert!(matches!(err, BridgeError::EntryMissing { .. }));
    assert_eq!(err.status(), Status::EntryMissing);
    vm.dispose();
}

#[test]
fn test_module_file_loads() {
    let dir = tempfile::tempdir().unwrap();
    let entry = dir.path().join("main.mjs");
    fs::write(&entry, "export const ok = true; host.send(['file']);").unwrap();

    let (engine, sent) = recording_engine();
    let mut vm = engine.create_vm().unwrap();
    vm.load_module_file(&entry, |_, _| 1).unwrap();
    assert_eq!(*sent.lock(), vec![HostValue::Sequence(vec!["file".into()])]);
    vm.dispose();
}

#[test]
fn test_disposed_vm_rejects_module_load() {
    let engine = Engine::new().unwrap();
    let mut vm = engine.create_vm().unwrap();
    vm.dispose();

    let result = vm.load_module("main", "export {}", |_, _| 0);
    assert!(matches!(result, Err(BridgeError::Disposed)));
    assert_eq!(engine.pending_resolvers(), 0);
}

#[test]
fn test_concurrent_loads_use_their_own_resolvers() {
    let engine = Arc::new(Engine::new().unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|side| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut vm = engine.create_vm().unwrap();
                let store = vm.module_store();
                let seen = Arc::new(Mutex::new(Vec::new()));
                let first_call = Arc::new(AtomicBool::new(true));

                let log = seen.clone();
                let entry = format!(
                    "import '{side}-a'; import '{side}-b';"
                );
                let result = vm.load_module("main", &entry, move |specifier, _| {
                    // Make both loads overlap inside their resolvers
                    if first_call.swap(false, Ordering::SeqCst) {
                        barrier.wait();
                    }
                    log.lock().push(specifier.to_string());
                    store.provide(specifier, "export {};");
                    0
                });
                assert!(result.is_ok(), "{side}: {result:?}");
                vm.dispose();

                let seen = seen.lock().clone();
                (side, seen)
            })
        })
        .collect();

    for handle in handles {
        let (side, seen) = handle.join().unwrap();
        assert_eq!(seen.len(), 2, "{side}: {seen:?}");
        assert!(
            seen.iter().all(|specifier| specifier.starts_with(side)),
            "{side} saw {seen:?}"
        );
    }
    assert_eq!(engine.pending_resolvers(), 0);
}
