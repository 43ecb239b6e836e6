//! otter-bridge - embed JavaScript VMs in a host process.
//!
//! This crate lets a host run many isolated script VMs and talk to them
//! through a small, fixed protocol:
//!
//! - **Value codec**: [`HostValue`] trees cross into the engine and back
//!   ([`codec`]).
//! - **Handle registry**: native callbacks reach host state only through
//!   integer keys ([`holt`]), never through raw references.
//! - **Module resolver broker**: host resolvers scoped to a single module load
//!   ([`resolver`], [`modules`]).
//! - **VM sessions**: load scripts, dispatch `enter` / `leave` / `message`
//!   events, get a [`Status`] back ([`vm`]).
//!
//! Scripts talk back through `host.send`, `host.sendTo`, `print` and
//! `console.*`, which land in the engine's [`Hooks`].
//!
//! # Example
//!
//! ```no_run
//! use otter_bridge::{Engine, Status};
//!
//! let engine = Engine::builder()
//!     .on_output(|text| println!("[script] {text}"))
//!     .build()
//!     .unwrap();
//!
//! let mut vm = engine.create_vm().unwrap();
//! assert!(vm.load("app.js"));
//! assert_eq!(vm.dispatch_enter(1, "10.0.0.1:7000"), Status::Success);
//! vm.dispose();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────── Engine (Send + Sync) ──────────────────────────┐
//! │  BridgeConfig   Hooks   Holt<VmShared>   ResolverBroker   EngineStats    │
//! └──────────────────────────────────┬───────────────────────────────────────┘
//!                                    │ create_vm()
//!                  ┌─────────────────┼─────────────────┐
//!                  ↓                 ↓                 ↓
//!              ┌──────┐          ┌──────┐          ┌──────┐
//!              │  Vm  │          │  Vm  │          │  Vm  │   one per thread
//!              └──────┘          └──────┘          └──────┘
//!                  │ isolate: Runtime + Context
//!                  │ host.send → Holt lookup by key → Hooks
//!                  │ import    → ModuleStore / ResolverBroker by token
//! ```

mod apis;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
mod exception;
pub mod holt;
pub mod hooks;
pub mod memory;
pub mod modules;
mod rejection;
pub mod resolver;
pub mod status;
pub mod value;
pub mod vm;

pub use codec::NativeKind;
pub use config::BridgeConfig;
pub use engine::{
    Engine, EngineBuilder, EngineStats, EngineStatsSnapshot, dispose, init, is_initialized,
    version,
};
pub use error::{BridgeError, BridgeResult, CodecError, CodecResult};
pub use holt::{Holt, HoltError, HoltResult, Paw};
pub use hooks::Hooks;
pub use memory::MemoryStats;
pub use modules::{ModuleStore, ResolutionFailure};
pub use resolver::{ModuleResolverFn, ResolverBroker, ResolverToken};
pub use status::Status;
pub use value::{HostMap, HostValue, Integer};
pub use vm::{SessionId, SourceInfo, TerminateHandle, Vm, VmState};

/// Re-exported so hosts can name engine types in their own helpers.
pub use rquickjs;

pub mod prelude {
    pub use crate::config::BridgeConfig;
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::hooks::Hooks;
    pub use crate::status::Status;
    pub use crate::value::{HostMap, HostValue, Integer};
    pub use crate::vm::{SessionId, TerminateHandle, Vm};
}
