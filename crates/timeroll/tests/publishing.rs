//! Publish scheduling as driven by edits and background maintenance.

use std::time::Duration;
use timeroll::PublishOutcome;
use timeroll_testing::{bodies, RegistryFixture, TestBot, HOWARD, HUGO};

const TWO_DEVICES: &[(&str, &str)] = &[("Laptop", "08:00:00.000000"), ("Desktop", "07:30:00.000000")];

#[tokio::test]
async fn edit_inside_first_window_is_deferred() {
    let bot = TestBot::new(TWO_DEVICES).unwrap();

    bot.edit(HOWARD, "Laptop", "09:00:00.000000").await;

    assert_eq!(bot.publisher.calls(), 0);
    assert!(bot.engine.publisher().is_dirty().await);
}

#[tokio::test]
async fn deferred_edit_is_published_once_window_opens() {
    let bot = TestBot::new(TWO_DEVICES).unwrap();
    bot.edit(HOWARD, "Laptop", "09:00:00.000000").await;

    bot.clock.advance_secs(3599);
    assert_eq!(bot.engine.run_maintenance().await.1, PublishOutcome::Deferred);

    bot.clock.advance_secs(1);
    assert_eq!(bot.engine.run_maintenance().await.1, PublishOutcome::Published);
    assert_eq!(bot.engine.run_maintenance().await.1, PublishOutcome::Clean);
    assert_eq!(bot.publisher.calls(), 1);
}

#[tokio::test]
async fn many_edits_in_one_window_publish_once() {
    let bot = TestBot::new(TWO_DEVICES).unwrap();
    bot.clock.advance_secs(3600);

    bot.edit(HOWARD, "Laptop", "09:00:00.000000").await;
    bot.edit(HUGO, "Desktop", "10:00:00.000000").await;
    bot.edit(HOWARD, "Laptop", "11:00:00.000000").await;
    bot.engine.run_maintenance().await;

    assert_eq!(bot.publisher.calls(), 1);
    assert_eq!(bot.fixture.backups().unwrap().len(), 3);
    // The last two edits wait for the next window.
    assert!(bot.engine.publisher().is_dirty().await);
}

#[tokio::test]
async fn publish_failure_keeps_the_write_and_is_not_shown() {
    let bot = TestBot::new(TWO_DEVICES).unwrap();
    bot.publisher.set_failing(true);
    bot.clock.advance_secs(3600);

    let replies = bot.edit(HOWARD, "Laptop", "09:00:00.000000").await;

    assert_eq!(bot.publisher.calls(), 1);
    assert_eq!(replies[0].body(), "Configuration updated for \"Laptop\": 09:00:00.000000");
    assert!(bodies(&replies).iter().all(|b| !b.contains("fail")));
    assert_eq!(bot.fixture.records().unwrap()[0].time, "09:00:00.000000");

    // Not retried before the next window.
    assert_eq!(bot.engine.run_maintenance().await.1, PublishOutcome::Deferred);
    assert_eq!(bot.publisher.calls(), 1);

    bot.publisher.set_failing(false);
    bot.clock.advance_secs(3600);
    assert_eq!(bot.engine.run_maintenance().await.1, PublishOutcome::Published);
}

#[tokio::test]
async fn reminder_mentions_interval_and_public_url() {
    let fixture = RegistryFixture::new(TWO_DEVICES).unwrap();
    let bot = TestBot::with_config(fixture, |config| {
        config.publish.interval_secs = 1800;
        config.publish.public_url = Some("https://example.org/devices.json".into());
    })
    .unwrap();

    let replies = bot.edit(HOWARD, "Desktop", "09:00:00.000000").await;

    assert_eq!(
        replies[1].body(),
        "Changes are published at most once every 30 minutes. \
         You should see your changes at https://example.org/devices.json by then."
    );
}

#[tokio::test]
async fn ticker_publishes_without_further_edits() {
    let bot = TestBot::new(TWO_DEVICES).unwrap();
    bot.edit(HOWARD, "Laptop", "09:00:00.000000").await;
    bot.clock.advance_secs(3600);

    tokio::time::pause();
    let handle = bot.engine.clone().start();
    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.shutdown().await;

    assert_eq!(bot.publisher.calls(), 1);
    assert!(!bot.engine.publisher().is_dirty().await);
}
