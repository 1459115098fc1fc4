#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orionai_mcp::cli::run().await
}
