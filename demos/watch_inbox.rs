//! Watch a fresh Mailbucket inbox until the first message arrives.
//!
//! Run with `MAILBUCKET_API_URL=http://localhost:8000 cargo run --example watch_inbox`.

use mailbucket_client::{Config, Inbox, MemoryStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Watching a Mailbucket inbox...");
    println!("{}", "-".repeat(50));

    let mut config = Config::default();
    config.apply_env(|key| std::env::var(key).ok());
    config.refresh_interval_secs = 5;

    // Keep the demo address out of the saved state.
    let (inbox, mut notices) = Inbox::new(
        config.client()?,
        Arc::new(MemoryStore::new()),
        config.inbox_options(),
    );
    inbox.mount().await?;

    let state = inbox.state();
    let Some(address) = &state.address else {
        return Err("no address was created".into());
    };
    println!("✅ Send an email to: {}", address.email);
    println!("   Domains: {:?}", state.domains);

    let _timer = inbox.spawn_auto_refresh();
    let start = Instant::now();
    let timeout = Duration::from_secs(120);

    loop {
        while let Ok(notice) = notices.try_recv() {
            println!("\n⚠️  {notice}");
        }

        let state = inbox.state();
        if let Some(first) = state.emails.first() {
            println!("\n✅ {} message(s) received", state.emails.len());
            inbox.select_email(&first.id).await?;
            if let Some(detail) = inbox.state().selected {
                println!("   From: {}", detail.from_address);
                println!("   Subject: {}", detail.subject.as_deref().unwrap_or("(no subject)"));
            }
            break;
        }

        if start.elapsed() >= timeout {
            println!("\n⚠️  Timeout: no messages after 2 minutes");
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("{}", "-".repeat(50));
    Ok(())
}
