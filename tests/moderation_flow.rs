//! End-to-end moderation pipeline tests over a mock transport.

use async_trait::async_trait;
use resale_guard::bot::messages::{moderate_submission, ModerationContext};
use resale_guard::bot::WarningService;
use resale_guard::moderation::{
    CooldownLedger, MediaGroupAggregator, ModerationPolicy, Submission,
};
use resale_guard::storage::JsonStore;
use resale_guard::transport::{ChatTransport, MessageRef};
use resale_guard::xp::XpLedger;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct MockTransport {
    deleted: Mutex<Vec<MessageRef>>,
    sent: Mutex<Vec<String>>,
}

impl MockTransport {
    fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().expect("lock").clone()
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn delete_message(&self, message: MessageRef) -> bool {
        self.deleted.lock().expect("lock").push(message);
        true
    }

    async fn send_to_thread(
        &self,
        chat_id: i64,
        _thread_id: Option<i32>,
        text: &str,
    ) -> anyhow::Result<MessageRef> {
        let mut sent = self.sent.lock().expect("lock");
        sent.push(text.to_string());
        Ok(MessageRef {
            chat_id,
            message_id: 10_000 + i32::try_from(sent.len()).unwrap_or(0),
        })
    }

    async fn send_html(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        text: &str,
    ) -> anyhow::Result<MessageRef> {
        self.send_to_thread(chat_id, thread_id, text).await
    }

    async fn administrators(&self, _chat_id: i64) -> anyhow::Result<HashSet<i64>> {
        Ok(HashSet::new())
    }
}

fn context(tag: &str) -> (Arc<ModerationContext>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let store = Arc::new(JsonStore::new(std::env::temp_dir().join(format!(
        "resale-guard-flow-{tag}-{}",
        std::process::id()
    ))));
    let cooldowns = Arc::new(CooldownLedger::new(43_200, 2));
    let ctx = Arc::new(ModerationContext {
        transport: Arc::<MockTransport>::clone(&transport) as Arc<dyn ChatTransport>,
        policy: Arc::new(ModerationPolicy::new(Arc::clone(&cooldowns), 3000, 1000)),
        warnings: Arc::new(WarningService::new(
            Duration::from_secs(30),
            Duration::from_secs(5),
        )),
        xp: Arc::new(XpLedger::new(Arc::clone(&store), HashMap::new())),
        cooldowns,
        store,
    });
    (ctx, transport)
}

fn submission(user_id: i64, message_id: i32, text: &str) -> Submission {
    Submission {
        chat_id: -100,
        thread_id: Some(42),
        user_id,
        username: Some(format!("user{user_id}")),
        first_name: "Тест".to_string(),
        text: text.to_string(),
        has_sticker: false,
        messages: vec![MessageRef {
            chat_id: -100,
            message_id,
        }],
    }
}

#[tokio::test]
async fn accepted_post_leaves_chat_untouched_and_arms_cooldown() {
    let (ctx, transport) = context("accepted");
    ctx.store.ensure_dir().await.expect("data dir");

    moderate_submission(&ctx, submission(7, 1, "#продам кросівки, ціна: 3500 грн")).await;
    assert!(transport.deleted().is_empty());
    assert!(transport.sent().is_empty());

    // The same user selling again is now rejected and warned.
    moderate_submission(&ctx, submission(7, 2, "#продам куртка 4000 грн")).await;
    assert_eq!(transport.deleted().len(), 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Зачекайте"), "unexpected warning: {}", sent[0]);
}

#[tokio::test]
async fn cheap_sale_is_deleted_with_price_warning() {
    let (ctx, transport) = context("cheap");

    moderate_submission(&ctx, submission(8, 5, "#продам шапка 1200 грн")).await;
    assert_eq!(transport.deleted().len(), 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("3000 грн"), "unexpected warning: {}", sent[0]);
}

#[tokio::test]
async fn repeat_violations_are_deleted_but_warned_once() {
    let (ctx, transport) = context("suppress");

    moderate_submission(&ctx, submission(9, 1, "#продам шапка 100 грн")).await;
    moderate_submission(&ctx, submission(9, 2, "#продам рукавиці 200 грн")).await;

    assert_eq!(transport.deleted().len(), 2);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn violating_album_settles_once_and_is_fully_deleted() {
    let (ctx, transport) = context("album");
    let (tx, mut rx) = mpsc::channel(8);
    let aggregator = Arc::new(MediaGroupAggregator::new(Duration::from_millis(1500), tx));

    aggregator.add("g1", submission(11, 1, "#продам шкарпетки 150 грн")).await;
    aggregator.add("g1", submission(11, 2, "")).await;
    aggregator.add("g1", submission(11, 3, "")).await;

    tokio::time::sleep(Duration::from_millis(1600)).await;
    let settled = rx.recv().await.expect("album should settle");
    assert_eq!(settled.messages.len(), 3);
    moderate_submission(&ctx, settled).await;

    // Every album part is gone; the author got exactly one warning.
    let deleted: HashSet<i32> = transport.deleted().iter().map(|m| m.message_id).collect();
    assert_eq!(deleted, [1, 2, 3].into_iter().collect());
    assert_eq!(transport.sent().len(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn buy_and_sell_windows_do_not_interfere() {
    let (ctx, transport) = context("categories");
    ctx.store.ensure_dir().await.expect("data dir");

    moderate_submission(&ctx, submission(12, 1, "#продам кросівки 3500 грн")).await;
    moderate_submission(&ctx, submission(12, 2, "#куплю навушники")).await;

    assert!(transport.deleted().is_empty());
    assert!(transport.sent().is_empty());
}
