use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    foxvox_lib::init_logging();
    match foxvox_lib::run(std::env::args().skip(1).collect()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(code = err.code(), error = %err, "foxvox exited with an error");
            ExitCode::FAILURE
        }
    }
}
