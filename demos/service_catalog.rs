use std::time::Duration;
use torc_client::{ConnectionManager, ConnectionOptions, ServiceCall, SocketStatus};
use tracing_subscriber::EnvFilter;

/// Print every service a Torc server offers
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let url = std::env::var("TORC_URL").unwrap_or_else(|_| "http://localhost:4840".to_string());
    let manager = ConnectionManager::new(&url, ConnectionOptions::default())?;

    let mut status = manager.status_changes();
    tokio::time::timeout(
        Duration::from_secs(30),
        status.wait_for(|status| *status == SocketStatus::Ready),
    )
    .await??;

    if let Some(formats) = manager.return_formats().await {
        println!("Return formats:");
        for format in formats {
            println!("   {} ({})", format.name, format.content_type);
        }
    }
    if let Some(protocols) = manager.websocket_protocols().await {
        println!("WebSocket protocols:");
        for protocol in protocols {
            println!("   {} - {}", protocol.name, protocol.description);
        }
    }

    let services = manager.service_list().await;
    println!("\n{} service(s):", services.len());
    for (id, service) in &services {
        let schema = manager.describe_service(id).await?;
        println!("\n🔧 {} at {}", service.name, service.path);
        for (method, signature) in &schema.methods {
            println!("   {}({})", method, signature.params.join(", "));
        }
        for (property, descriptor) in &schema.properties {
            println!("   .{} = {}", property, descriptor.value);
        }
    }

    // Read every service's version in one round trip
    let calls = services
        .keys()
        .map(|id| ServiceCall::new(id.as_str(), "GetServiceVersion", None))
        .collect();
    let responses = manager.call_batch(calls).await?;
    println!();
    for (id, response) in services.keys().zip(responses) {
        if let Some(response) = response {
            match response.await {
                Ok(version) => println!("{} version {}", id, version),
                Err(e) => println!("{} version unavailable: {}", id, e),
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
