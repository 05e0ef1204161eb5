#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    realchat_client::run().await?;
    Ok(())
}
