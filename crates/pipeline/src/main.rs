use std::process::ExitCode;

fn main() -> ExitCode {
    ohlcv_pipeline::launcher::main_with_args(std::env::args_os())
}
