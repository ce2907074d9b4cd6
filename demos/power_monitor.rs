use std::time::Duration;
use torc_client::{ConnectionManager, ConnectionOptions, SocketStatus, SubscriptionEvent};
use tracing_subscriber::EnvFilter;

/// Watch the power service of a live Torc server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::var("TORC_URL").unwrap_or_else(|_| "http://localhost:4840".to_string());
    let options = ConnectionOptions {
        access_token: std::env::var("TORC_TOKEN").ok(),
        ..Default::default()
    };

    println!("📡 Connecting to: {}\n", url);
    let manager = ConnectionManager::new(&url, options)?;

    let mut status = manager.status_changes();
    tokio::time::timeout(
        Duration::from_secs(30),
        status.wait_for(|status| *status == SocketStatus::Ready),
    )
    .await??;
    println!("✅ Service list received: {:?}\n", manager.service_list().await.keys());

    let mut power = manager
        .subscribe("power", &["batteryLevel", "onBattery", "canSuspend"])
        .await?;
    println!("🔋 Power service version {}", power.version());
    for (name, property) in &power.info().properties {
        println!("   {} = {}", name, property.value);
    }

    if let Ok(level) = manager.call("power", "GetBatteryLevel", None).await?.await {
        println!("   GetBatteryLevel -> {}", level);
    }

    println!("\n⏳ Waiting for changes (Ctrl+C to quit)...");
    loop {
        tokio::select! {
            event = power.next_event() => match event {
                Some(SubscriptionEvent::PropertyChanged(change)) => {
                    println!("📨 {} = {}", change.name, change.value);
                }
                Some(SubscriptionEvent::Ended) | None => {
                    println!("⚠️  Subscription ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.unsubscribe("power").await;
    manager.shutdown().await;
    println!("Disconnected!");

    Ok(())
}
