use conductor::cli;
use conductor::controller::engine::{run_child, CHILD_MARKER};
use std::ffi::OsString;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<OsString> = std::env::args_os().collect();

    // The detached controller child execs the engine before any runtime starts
    if args.get(1).is_some_and(|arg| arg == CHILD_MARKER) {
        let err = run_child(args[2..].to_vec());
        eprintln!("conductor: {}", err);
        return ExitCode::FAILURE;
    }

    let code = run_cli(args);
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[tokio::main]
async fn run_cli(args: Vec<OsString>) -> i32 {
    cli::run(args).await
}
