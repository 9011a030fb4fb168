use super::*;

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__TEST_SYNC_NONEXISTENT_KEY__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__TEST_SYNC_EP_VALID__", "99") };
    let val: u64 = env_parse("__TEST_SYNC_EP_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__TEST_SYNC_EP_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__TEST_SYNC_EP_INVALID__", "soon") };
    let val: u64 = env_parse("__TEST_SYNC_EP_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__TEST_SYNC_EP_INVALID__") };
}

#[test]
fn env_parse_bool() {
    unsafe { std::env::set_var("__TEST_SYNC_EP_BOOL__", "false") };
    let val: bool = env_parse("__TEST_SYNC_EP_BOOL__", true);
    assert!(!val);
    unsafe { std::env::remove_var("__TEST_SYNC_EP_BOOL__") };
}

#[test]
fn defaults_match_documented_timings() {
    let config = SyncConfig::default();
    assert_eq!(config.save_debounce(), Duration::from_millis(700));
    assert_eq!(config.poll_interval(), Duration::from_millis(2500));
    assert_eq!(config.persist_retries, 2);
    assert_eq!(config.snapshot_every, 25);
    assert_eq!(config.presence_stale_ms, 15_000);
    assert!(config.role_recheck);
}
