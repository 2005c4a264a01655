use lexopt::prelude::*;
use std::env;
use std::ffi::OsString;
use std::time::Duration;

pub const USAGE: &str = "\
Usage: readmostly [OPTIONS]

Compare weak pointer locking over thread-local and atomic reference counts.
Timing and statistics are done by criterion.

Options:
  --bm-min-usec <N>   warm-up and measurement time per benchmark, in
                      microseconds, at least 1
                      (default 100000, or READMOSTLY_BM_MIN_USEC)
  -t, --threads <N>   thread count to run with; repeat for several
                      (default: 1 and 4)
  --filter <TEXT>     only run benchmarks whose name/threads label
                      contains TEXT
  -h, --help          print this help
";

const DEFAULT_MIN_USEC: u64 = 100_000;
const DEFAULT_THREADS: &[usize] = &[1, 4];

pub enum RunMode {
    Benchmark,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub min_duration: Duration,
    pub threads: Vec<usize>,
    pub filter: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            min_duration: Duration::from_micros(DEFAULT_MIN_USEC),
            threads: DEFAULT_THREADS.to_vec(),
            filter: None,
        }
    }
}

/// Build settings from the process's command line and environment.
pub fn opts_with_lexopt() -> Result<(Settings, RunMode), lexopt::Error> {
    parse_args(env::args_os().skip(1), env::var("READMOSTLY_BM_MIN_USEC").ok())
}

/// Build settings from `args` (without the program name). `min_usec_env` is
/// the fallback for `--bm-min-usec`.
pub fn parse_args<I>(
    args: I,
    min_usec_env: Option<String>,
) -> Result<(Settings, RunMode), lexopt::Error>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    let mut settings = Settings::default();
    if let Some(value) = min_usec_env {
        let usec = value.parse::<u64>().map_err(|e| lexopt::Error::ParsingFailed {
            value: value.clone(),
            error: Box::new(e),
        })?;
        settings.min_duration = min_duration(usec)?;
    }

    let mut threads = Vec::new();
    let mut parser = lexopt::Parser::from_args(args);
    while let Some(arg) = parser.next()? {
        match arg {
            Long("bm-min-usec" | "bm_min_usec") => {
                let usec: u64 = parser.value()?.parse()?;
                settings.min_duration = min_duration(usec)?;
            }
            Short('t') | Long("threads") => {
                let count: usize = parser.value()?.parse()?;
                if count == 0 {
                    return Err("thread count must be at least 1".into());
                }
                threads.push(count);
            }
            Long("filter") => {
                settings.filter = Some(parser.value()?.string()?);
            }
            Short('h') | Long("help") => return Ok((settings, RunMode::Help)),
            _ => return Err(arg.unexpected()),
        }
    }

    if !threads.is_empty() {
        settings.threads = threads;
    }
    Ok((settings, RunMode::Benchmark))
}

fn min_duration(usec: u64) -> Result<Duration, lexopt::Error> {
    if usec == 0 {
        return Err("measurement time must be at least 1 microsecond".into());
    }
    Ok(Duration::from_micros(usec))
}
