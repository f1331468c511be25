use std::process::ExitCode;

fn main() -> ExitCode {
    synapse_cli::run()
}
