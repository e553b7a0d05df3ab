use std::process::ExitCode;

fn main() -> ExitCode {
    mentionbot_cli::run()
}
