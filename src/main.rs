use readmostly::settings::{self, RunMode, USAGE};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    readmostly_common::stack_trace::install();

    let settings = match settings::opts_with_lexopt() {
        Ok((_, RunMode::Help)) => {
            print!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Ok((settings, RunMode::Benchmark)) => settings,
        Err(e) => {
            eprintln!("readmostly: {e}");
            eprint!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    readmostly::run(&settings);
    ExitCode::SUCCESS
}
