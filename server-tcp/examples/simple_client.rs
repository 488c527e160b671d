use cachet::{CacheStore, CheckResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PageViews {
    path: String,
    views: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Note: start the server first with `cargo run -p server-tcp`");

    // Connects lazily to 127.0.0.1:5500 on the first operation
    let store = CacheStore::new();

    println!("\n=== Testing SET / GET ===");
    let page = PageViews {
        path: "/home".to_string(),
        views: 1,
    };
    store.set("views:/home", &page, Duration::from_secs(300)).await?;
    let loaded: Option<PageViews> = store.get("views:/home").await?;
    println!("Loaded: {:?}", loaded);

    println!("\n=== Testing check-and-set increment ===");
    loop {
        let current: CheckResult<PageViews> = store.get_with_check("views:/home").await?;
        let Some(mut views) = current.value.clone() else {
            println!("Entry vanished, nothing to increment");
            break;
        };
        views.views += 1;

        if store
            .set_checked("views:/home", &current, &views, Duration::from_secs(300))
            .await?
        {
            println!("Incremented to {}", views.views);
            break;
        }
        println!("Lost the race, retrying");
    }

    println!("\n=== Testing multi-key GET ===");
    store.set("greeting", "hello", Duration::ZERO).await?;
    let values: HashMap<String, Option<String>> =
        store.get_many(["greeting", "nonexistent"]).await?;
    println!("Values: {:?}", values);

    println!("\n=== Testing REMOVE ===");
    println!("Removed: {}", store.remove("greeting").await?);
    println!("Removed again: {}", store.remove("greeting").await?);

    store.dispose().await;
    println!("\n✅ All tests completed!");
    Ok(())
}
