//! Built-in action handlers and wait probes
//!
//! These register through the same open capability registry as any
//! external handler; nothing in the engine is special-cased for them.

pub mod http;
pub mod kv;

pub use http::HttpCallHandler;
pub use kv::{KvInteractHandler, KvItemProbe, KvStore};

use std::sync::Arc;

use crate::common::Result;
use crate::engine::Engine;

/// Register the built-in capabilities: `http_call`, `kv_interact`, and
/// the `kv_item` wait probe (both kv capabilities share one store).
pub fn register_builtins(engine: &mut Engine) -> Result<()> {
    let timeout = engine.config().defaults.http_timeout_secs;
    engine.register_handler("http_call", Arc::new(HttpCallHandler::new(timeout)?));

    let store = KvStore::default();
    engine.register_handler("kv_interact", Arc::new(KvInteractHandler::new(store.clone())));
    engine.register_probe("kv_item", Arc::new(KvItemProbe::new(store)));
    Ok(())
}
