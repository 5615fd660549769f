//! Binary entrypoint for the reasongrid tool

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    reasongrid::cli::run().await
}
