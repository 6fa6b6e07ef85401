//! Log output of routing decisions.

use rstest::rstest;
use tokio::io::AsyncWriteExt;

use crate::common::{
    TestRouter,
    frame,
    logging::{LoggerHandle, logger},
    read_frame,
};

mod common;

fn logged(messages: &[String], parts: &[&str]) -> bool {
    messages
        .iter()
        .any(|message| parts.iter().all(|part| message.contains(part)))
}

#[rstest]
#[tokio::test]
async fn binds_and_drops_are_logged(mut logger: LoggerHandle) {
    let router = TestRouter::start(2).await;
    let mut sender = router.node(3).await;

    sender.write_all(&frame(3, 7)).await.expect("send unroutable");
    sender.write_all(b"0032200").await.expect("send fragment");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let probe = frame(3, 3);
    sender.write_all(&probe).await.expect("send probe");
    assert_eq!(read_frame(&mut sender).await, probe);
    router.stop().await;

    let messages = logger.messages();
    assert!(logged(&messages, &["node bound:", "node_id=003"]), "{messages:#?}");
    assert!(logged(&messages, &["destination not found:", "destination=007"]), "{messages:#?}");
    assert!(logged(&messages, &["short frame dropped:", "received=7"]), "{messages:#?}");
}

#[rstest]
#[tokio::test]
async fn peer_close_is_logged(mut logger: LoggerHandle) {
    let router = TestRouter::start(2).await;
    drop(router.node(4).await);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    router.stop().await;

    let messages = logger.messages();
    assert!(logged(&messages, &["accepted connection:"]), "{messages:#?}");
    assert!(logged(&messages, &["connection closed by peer:"]), "{messages:#?}");
    assert!(logged(&messages, &["connection removed:"]), "{messages:#?}");
}
