use clap::Parser;
use mixboard_client::{Cli, run};

#[tokio::main]
async fn main() -> Result<(), mixboard_client::AppError> {
    run(Cli::parse()).await
}
