//! Process-wide handler table shared by every `Machine`.
//!
//! A `lazy_static` `Mutex<...>` behind free functions, rather than a value
//! threaded through every call site. Handler indices must be stable and
//! assigned at most once per unique function pointer, which a single mutex
//! around allocation gives us for free even under concurrent `Machine`
//! construction.

use super::HandlerFn;
use std::collections::HashMap;
use std::sync::Mutex;

/// Index 0 is reserved for [`super::invalid_handler`].
const MAX_HANDLERS: usize = 256;

pub struct HandlerRegistry {
    handlers: Vec<HandlerFn>,
    by_ptr: HashMap<usize, u8>,
    representative_encoding: HashMap<u8, u32>,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            handlers: vec![super::invalid_handler as HandlerFn],
            by_ptr: HashMap::new(),
            representative_encoding: HashMap::new(),
        }
    }

    /// Look up or assign an index for `handler`, recording `encoding` as its
    /// representative encoding the first time. Returns the same index for
    /// the same function pointer every time it is asked.
    pub fn assign(&mut self, handler: HandlerFn, encoding: u32) -> u8 {
        let key = handler as usize;
        if let Some(&idx) = self.by_ptr.get(&key) {
            return idx;
        }
        let idx = self.handlers.len();
        assert!(idx < MAX_HANDLERS, "handler table exhausted (max {MAX_HANDLERS})");
        self.handlers.push(handler);
        let idx = idx as u8;
        self.by_ptr.insert(key, idx);
        self.representative_encoding.insert(idx, encoding);
        log::debug!("assigned handler index {idx} for encoding {encoding:#010x}");
        idx
    }

    pub fn get(&self, idx: u8) -> HandlerFn {
        self.handlers.get(idx as usize).copied().unwrap_or(super::invalid_handler)
    }

    pub fn representative_encoding(&self, idx: u8) -> Option<u32> {
        self.representative_encoding.get(&idx).copied()
    }

    /// Force-install `handler` at `idx` (used when rebinding after
    /// deserializing a cache built in a different process).
    pub fn install_at(&mut self, idx: u8, handler: HandlerFn, encoding: u32) {
        while self.handlers.len() <= idx as usize {
            self.handlers.push(super::invalid_handler);
        }
        self.handlers[idx as usize] = handler;
        self.by_ptr.insert(handler as usize, idx);
        self.representative_encoding.insert(idx, encoding);
    }

    pub fn bindings(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.representative_encoding.iter().map(|(&idx, &enc)| (idx, enc))
    }
}

lazy_static::lazy_static! {
    static ref REGISTRY: Mutex<HandlerRegistry> = Mutex::new(HandlerRegistry::new());
}

/// Access the process-wide registry. Callers hold the lock only for the
/// duration of one lookup/assign/install call.
pub fn registry() -> std::sync::MutexGuard<'static, HandlerRegistry> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Cpu;

    fn h_a(_cpu: &mut Cpu, _i: u32) {}
    fn h_b(_cpu: &mut Cpu, _i: u32) {}

    #[test]
    fn assigning_the_same_handler_twice_returns_the_same_index() {
        let mut reg = HandlerRegistry::new();
        let first = reg.assign(h_a, 0x1234);
        let second = reg.assign(h_a, 0x9999);
        assert_eq!(first, second);
        // the representative encoding recorded on first assignment sticks.
        assert_eq!(reg.representative_encoding(first), Some(0x1234));
    }

    #[test]
    fn distinct_handlers_get_distinct_indices_and_index_zero_is_reserved() {
        let mut reg = HandlerRegistry::new();
        let a = reg.assign(h_a, 1);
        let b = reg.assign(h_b, 2);
        assert_ne!(a, b);
        assert_ne!(a, 0);
        assert_ne!(b, 0);
    }
}
