use flags_eval::config::Config;
use flags_eval::Client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // FLAG_SERVICE_URL, TARGETING_SERVICE_URL and SERVICE_API_KEY must be set.
    let client = Client::builder()
        .with_config(Config::from_env()?)
        .with_memory_cache()
        .build()?;

    let user_id = std::env::args().nth(1).unwrap_or_else(|| "user-42".to_string());

    // Propagates an error if the flag service cannot be reached.
    let decision = client.explain(&user_id, "my-feature").await?;
    println!("Feature 'my-feature' for {}: {} ({})", user_id, decision.enabled(), decision);

    // Fails closed instead.
    let is_enabled = client.is("other-feature").enabled_for(&user_id).await;
    println!("Feature 'other-feature' for {}: {}", user_id, is_enabled);

    Ok(())
}
