mod app;
mod instance;
mod statestream;
mod store;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::run().await
}
