//! Best-effort lookup of the kernel function that fires a tracepoint
//!
//! The function's exact name is not fixed across kernels (it may be renamed
//! or cloned by the compiler), so it is looked up in the kernel symbol table
//! instead of being hardcoded.

use crate::error::ResolutionError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Symbols generated by the tracing infrastructure for every event
const TRACING_STUB_PREFIXES: &[&str] = &[
    "__traceiter_",
    "__bpf_trace_",
    "__probestub_",
    "__tracepoint_",
    "__SCT__tp_func_",
    "__SCK__tp_func_",
    "perf_trace_",
    "trace_event_raw_event_",
    "trace_raw_output_",
];

/// Resolve the function behind `event` from the running kernel's symbol table.
pub fn resolve_tracepoint_function(event: &str) -> Result<String, ResolutionError> {
    resolve_from_path(KALLSYMS_PATH, event)
}

pub fn resolve_from_path(
    path: impl AsRef<Path>,
    event: &str,
) -> Result<String, ResolutionError> {
    let file = File::open(path)?;
    resolve_from_reader(BufReader::new(file), event)
}

/// Scan `nm`-style lines (`<addr> <type> <name> [module]`) for a text symbol
/// whose name ends in `trace_<event>`.
///
/// Compiler clone suffixes (`.isra.0`, `.part.0`, ...) are stripped, since
/// BTF knows the function by its source name.
pub fn resolve_from_reader<R: BufRead>(reader: R, event: &str) -> Result<String, ResolutionError> {
    let wanted = format!("trace_{}", event);

    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let (Some(_addr), Some(kind), Some(symbol)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        if !matches!(kind, "t" | "T") {
            continue;
        }

        let name = symbol.split('.').next().unwrap_or(symbol);
        if name.len() > wanted.len()
            && name.ends_with(&wanted)
            && !TRACING_STUB_PREFIXES.iter().any(|p| name.starts_with(p))
        {
            return Ok(name.to_string());
        }
    }

    Err(ResolutionError::NotFound(event.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const KALLSYMS: &str = "\
ffffffff81a0d2e0 T __traceiter_netlink_extack
ffffffff81a0d330 T __probestub_netlink_extack
ffffffff81a0d340 t perf_trace_netlink_extack
ffffffff81a0d4b0 t trace_event_raw_event_netlink_extack
ffffffff81a0d5f0 t trace_raw_output_netlink_extack
ffffffff81a0d660 t __bpf_trace_netlink_extack
ffffffff83c1a020 d __tracepoint_netlink_extack
ffffffff81a0f8c0 T do_trace_netlink_extack
ffffffff81a0f900 T netlink_ack
";

    #[test]
    fn test_resolves_emitting_function() {
        let name = resolve_from_reader(Cursor::new(KALLSYMS), "netlink_extack").unwrap();
        assert_eq!(name, "do_trace_netlink_extack");
    }

    #[test]
    fn test_strips_clone_suffix() {
        let syms = "0000000000000000 t do_trace_netlink_extack.isra.0\n";
        let name = resolve_from_reader(Cursor::new(syms), "netlink_extack").unwrap();
        assert_eq!(name, "do_trace_netlink_extack");
    }

    #[test]
    fn test_ignores_data_symbols_and_stubs() {
        let syms = "\
ffffffff83c1a020 d __tracepoint_netlink_extack
ffffffff81a0d2e0 T __traceiter_netlink_extack
ffffffff81a0d340 t perf_trace_netlink_extack
garbage
";
        let err = resolve_from_reader(Cursor::new(syms), "netlink_extack").unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound(ref e) if e == "netlink_extack"));
    }

    #[test]
    fn test_resolve_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KALLSYMS.as_bytes()).unwrap();

        let name = resolve_from_path(file.path(), "netlink_extack").unwrap();
        assert_eq!(name, "do_trace_netlink_extack");
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = resolve_from_path("/nonexistent/kallsyms", "netlink_extack").unwrap_err();
        assert!(matches!(err, ResolutionError::Unreadable(_)));
    }
}
