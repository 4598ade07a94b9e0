use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use broadcast_dispatcher::{
    BroadcastConfig, BroadcastJob, Broadcaster, InMemoryRegistry, LogProgress, MessagePayload,
    RecipientId, SendOutcome, Sender,
};

/// Sender that pretends every delivery succeeds after a short pause.
struct FakeSender;

#[async_trait]
impl Sender for FakeSender {
    async fn deliver(&self, recipient: RecipientId, _job: &BroadcastJob) -> SendOutcome {
        tokio::time::sleep(Duration::from_millis(10)).await;
        println!("delivered to {}", recipient.0);
        SendOutcome::Delivered
    }
}

#[tokio::main]
async fn main() {
    let registry = Arc::new(InMemoryRegistry::new());
    for id in 1..=40 {
        registry.upsert(RecipientId(id), None, None).await;
    }

    let broadcaster = Broadcaster::new(
        BroadcastConfig {
            messages_per_second: 10,
            ..Default::default()
        },
        Arc::new(FakeSender),
        registry.clone(),
        registry,
        Arc::new(LogProgress),
    );

    let job = BroadcastJob::fresh(MessagePayload::Text {
        text: "hello, world".to_string(),
    });
    let handle = broadcaster.start_broadcast(job).await.expect("start");
    let summary = handle.wait().await;
    println!(
        "sent={} failed={} elapsed={:?}",
        summary.sent, summary.failed, summary.elapsed
    );
}
