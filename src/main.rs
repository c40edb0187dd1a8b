#[tokio::main]
async fn main() -> anyhow::Result<()> {
    geo_backfill::run().await?;
    Ok(())
}
