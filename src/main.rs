use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    wgfleet::telemetry::init_tracing();

    match wgfleet::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(wgfleet::errors::get_exit_code(&e))
        }
    }
}
