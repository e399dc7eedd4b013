fn main() -> std::process::ExitCode {
    match daytodo_lib::run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("daytodo: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}
