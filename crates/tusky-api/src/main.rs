use tusky_api::setup;
use tusky_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (state, router) = setup::initialize_app(config.clone()).await?;

    let served = setup::server::start_server(&config, router).await;
    state.shutdown();
    served?;

    Ok(())
}
