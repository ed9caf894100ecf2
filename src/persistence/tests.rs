use chrono::{Duration, Utc};
use tempfile::TempDir;

use super::{Archive, RetiredMessage};
use crate::lifecycle::MessageState;
use crate::message::CbcMessage;

fn retired(id: u16, state: MessageState, age_secs: i64) -> RetiredMessage {
    let retired_at = Utc::now() - Duration::seconds(age_secs);
    RetiredMessage {
        message_id: id,
        cbe_name: "cbe".to_string(),
        final_state: state,
        message: CbcMessage::new("cbe", id).with_pages(vec!["alert".into()]),
        created_at: retired_at - Duration::seconds(30),
        retired_at,
    }
}

fn open(dir: &TempDir, ttl: Option<i64>) -> Archive {
    let path = dir.path().join("archive");
    Archive::open(path.to_str().unwrap(), ttl).unwrap()
}

#[test]
fn test_record_and_load_in_retirement_order() {
    let dir = TempDir::new().unwrap();
    let archive = open(&dir, None);

    let newer = retired(2, MessageState::Expired, 10);
    let older = retired(1, MessageState::Deleted, 60);
    archive.record(&newer).unwrap();
    archive.record(&older).unwrap();

    let loaded = archive.load().unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].message_id, 1);
    assert_eq!(loaded[0].final_state, MessageState::Deleted);
    assert_eq!(loaded[1], newer);
}

#[test]
fn test_load_for_filters_by_id() {
    let dir = TempDir::new().unwrap();
    let archive = open(&dir, None);

    archive.record(&retired(42, MessageState::Deleted, 120)).unwrap();
    archive.record(&retired(7, MessageState::Expired, 90)).unwrap();
    archive.record(&retired(42, MessageState::Expired, 30)).unwrap();

    let history = archive.load_for(42).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].final_state, MessageState::Deleted);
    assert_eq!(history[1].final_state, MessageState::Expired);
    assert!(archive.load_for(99).unwrap().is_empty());
}

#[test]
fn test_ttl_cleanup_drops_old_records() {
    let dir = TempDir::new().unwrap();
    let archive = open(&dir, Some(3600));

    archive.record(&retired(1, MessageState::Expired, 7200)).unwrap();
    archive.record(&retired(2, MessageState::Expired, 60)).unwrap();

    let loaded = archive.load().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].message_id, 2);
}

#[test]
fn test_record_round_trips_payload() {
    let dir = TempDir::new().unwrap();
    let archive = open(&dir, None);
    archive.record(&retired(5, MessageState::Deleted, 5)).unwrap();
    archive.flush().unwrap();

    let loaded = archive.load().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].message.content.pages, vec!["alert".to_string()]);
    assert_eq!(loaded[0].cbe_name, "cbe");
}
