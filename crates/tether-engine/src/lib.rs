//! Tether Engine - in-process host runtime
//!
//! A small garbage-collected, prototype-based host implementing
//! [`tether_sdk::HostEnv`]. It provides what the bridge needs from a real
//! scripting host:
//!
//! - heap values (strings, big-integers, objects, arrays, functions, errors,
//!   promises) addressed by [`tether_sdk::HeapRef`]
//! - handle scopes, strong and weak references
//! - classes with prototype methods, static methods and accessors
//! - mark-sweep collection with finalization of wrapped objects
//! - a microtask queue and dispatch of calls queued by worker threads
//!
//! # Example
//!
//! ```ignore
//! use tether_engine::Runtime;
//! use tether_sdk::{Bridge, HostValue};
//!
//! let runtime = Runtime::new();
//! let exports = runtime.load_module(&my_module::init(), &Bridge::new())?;
//! let add = runtime.get(exports, "add")?;
//! let sum = runtime.call(add, exports, &[HostValue::Number(1.0), HostValue::Number(2.0)])?;
//! runtime.run_until_idle()?;
//! ```

pub mod config;
pub mod defaults;
pub mod error;
pub mod gc;
mod heap;
mod json;
pub mod runtime;

pub use config::RuntimeConfig;
pub use error::{EngineError, EngineResult};
pub use gc::GcStats;
pub use heap::PromiseState;
pub use runtime::Runtime;
