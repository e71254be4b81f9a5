//! # 缓存键派生测试
//!
//! 相同参数（关键字参数顺序任意）必须得到相同的键，不同参数得到不同的键

use electric_bot_cache::cache::{CacheKey, CacheKeyDeriver, KeyFamily};
use proptest::prelude::*;

const FUNCTION: &str = "electric_bot::services::reminders::due_for_user";

proptest! {
    #[test]
    fn keyword_order_does_not_change_key(
        user_id in any::<i64>(),
        region in "[a-zA-Zа-яА-Я0-9 ]{0,16}",
        limit in 0u32..1000,
    ) {
        let forward = CacheKeyDeriver::new(FUNCTION)
            .arg(user_id)
            .kwarg("region", &region)
            .kwarg("limit", limit)
            .derive();
        let reversed = CacheKeyDeriver::new(FUNCTION)
            .arg(user_id)
            .kwarg("limit", limit)
            .kwarg("region", &region)
            .derive();
        prop_assert_eq!(forward, reversed);
    }

    #[test]
    fn different_arguments_give_different_keys(a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a != b);
        let left = CacheKeyDeriver::new(FUNCTION).arg(a).derive();
        let right = CacheKeyDeriver::new(FUNCTION).arg(b).derive();
        prop_assert_ne!(left, right);
    }

    #[test]
    fn derived_keys_stay_in_cache_family(args in proptest::collection::vec(any::<u16>(), 0..32)) {
        let mut deriver = CacheKeyDeriver::new(FUNCTION);
        for arg in &args {
            deriver = deriver.arg(arg);
        }
        let key = deriver.derive();
        prop_assert_eq!(KeyFamily::of(&key), Some(KeyFamily::Cache));
        // 哈希保证长度有上界
        prop_assert!(key.len() < 128);
    }
}

#[test]
fn test_prefix_is_not_hashed() {
    let key = CacheKeyDeriver::new(FUNCTION)
        .arg(7)
        .prefix("reminders")
        .derive();
    assert!(key.starts_with("reminders:cache:electric_bot.services.reminders:due_for_user:"));
}

#[test]
fn test_fsm_key_matches_bot_convention() {
    let key = CacheKey::Fsm {
        chat_id: 100,
        user_id: 200,
    };
    assert_eq!(key.family(), KeyFamily::Fsm);
    assert!(key.build().starts_with("fsm:"));
}
