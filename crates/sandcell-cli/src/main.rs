use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = sandcell_cli::command().get_matches();
    sandcell_cli::init_tracing(sandcell_cli::log_format(&matches));

    match sandcell_cli::dispatch(&matches).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "sandcell failed");
            eprintln!("error: {e:#}");
            ExitCode::from(sandcell_cli::EXIT_FAILED)
        }
    }
}
