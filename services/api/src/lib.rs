mod cli;
mod infra;
mod rooms;
mod routes;
mod server;

use grade_intake::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
