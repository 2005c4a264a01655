//! Process-wide hook for rendering the current thread's stack trace.
//!
//! Diagnostics read the hook through [`current`]; nothing is rendered until a
//! program installs a getter, normally by calling [`install`] first thing in
//! `main`.

use crate::atomic::{AtomicFn, Ordering};
use crate::lock::{LazyLock, RmMutex};
use core::ffi::c_void;
use core::fmt::Write;
use std::collections::{HashMap, VecDeque};
use std::sync::Once;

/// Frames captured per trace.
pub const MAX_STACK_TRACE_DEPTH: usize = 100;

/// Resolved symbols kept across traces.
pub const SYMBOL_CACHE_CAPACITY: usize = 500;

pub type StackTraceGetter = fn() -> String;

static GETTER: AtomicFn<Option<StackTraceGetter>> = AtomicFn::none();

static SYMBOLS: LazyLock<RmMutex<SymbolCache>> =
    LazyLock::new(|| RmMutex::new(SymbolCache::with_capacity(SYMBOL_CACHE_CAPACITY)));

/// Register the default getter. Only the first call has an effect.
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| set_getter(Some(symbolized_trace)));
}

pub fn set_getter(getter: Option<StackTraceGetter>) {
    GETTER.store(getter, Ordering::Release);
}

pub fn getter() -> Option<StackTraceGetter> {
    GETTER.load(Ordering::Acquire)
}

/// The current thread's stack trace, or an empty string if no getter is
/// installed or the capture failed.
pub fn current() -> String {
    getter().map_or_else(String::new, |getter| getter())
}

#[derive(Clone)]
struct Symbol {
    name: String,
    location: Option<(String, u32)>,
}

/// Symbol names keyed by instruction address, oldest evicted first.
struct SymbolCache {
    capacity: usize,
    entries: HashMap<usize, Symbol>,
    order: VecDeque<usize>,
}

impl SymbolCache {
    fn with_capacity(capacity: usize) -> Self {
        SymbolCache {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn get_or_resolve(&mut self, ip: usize) -> Symbol {
        if let Some(symbol) = self.entries.get(&ip) {
            return symbol.clone();
        }
        let symbol = resolve(ip);
        if self.entries.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(ip, symbol.clone());
        self.order.push_back(ip);
        symbol
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn resolve(ip: usize) -> Symbol {
    let mut symbol = Symbol {
        name: String::from("(unknown)"),
        location: None,
    };
    let mut found = false;
    backtrace::resolve(ip as *mut c_void, |resolved| {
        if found {
            // inlined frames; the outermost one is enough
            return;
        }
        found = true;
        if let Some(name) = resolved.name() {
            symbol.name = name.to_string();
        }
        if let (Some(file), Some(line)) = (resolved.filename(), resolved.lineno()) {
            symbol.location = Some((file.display().to_string(), line));
        }
    });
    symbol
}

fn capture() -> Vec<usize> {
    let mut ips = Vec::with_capacity(MAX_STACK_TRACE_DEPTH);
    backtrace::trace(|frame| {
        ips.push(frame.ip() as usize);
        ips.len() < MAX_STACK_TRACE_DEPTH
    });
    ips
}

fn render(ips: &[usize], cache: &mut SymbolCache) -> String {
    let mut out = String::new();
    for ip in ips {
        let symbol = cache.get_or_resolve(*ip);
        let _ = writeln!(out, "    @ {ip:016x} {}", symbol.name);
        if let Some((file, line)) = symbol.location {
            let _ = writeln!(out, "                       {file}:{line}");
        }
    }
    out
}

/// The default getter: capture, symbolize and print one frame per line.
pub fn symbolized_trace() -> String {
    let ips = capture();
    if ips.is_empty() {
        return String::new();
    }
    render(&ips, &mut SYMBOLS.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> String {
        "trace".to_owned()
    }

    #[test]
    fn test_getter_slot() {
        // the slot is process-wide, so exercise it from a single test
        set_getter(None);
        assert_eq!(current(), "");
        set_getter(Some(fixed));
        assert_eq!(current(), "trace");
        set_getter(None);
        install();
        assert!(getter().is_some());
        // installing again keeps the first registration
        set_getter(Some(fixed));
        install();
        assert_eq!(current(), "trace");
        set_getter(None);
    }

    #[test]
    fn test_symbolized_trace_is_bounded() {
        let trace = symbolized_trace();
        let frames = trace.lines().filter(|l| l.trim_start().starts_with('@')).count();
        assert!(frames <= MAX_STACK_TRACE_DEPTH);
    }

    #[test]
    fn test_symbol_cache_evicts_oldest() {
        let mut cache = SymbolCache::with_capacity(2);
        let ips = capture();
        for ip in ips.iter().take(3) {
            cache.get_or_resolve(*ip);
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_render_empty() {
        let mut cache = SymbolCache::with_capacity(4);
        assert_eq!(render(&[], &mut cache), "");
    }
}
