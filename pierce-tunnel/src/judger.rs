//! Add-tunnel race resolution.
//!
//! A key (here `self_id ^ peer_id`) maps to the attempt time that currently
//! holds the slot. A fresh attempt (`overwrite=false`) only succeeds if no
//! entry exists yet; an incoming peer's `AddTunnelRequest`
//! (`overwrite=true`) replaces the held entry only if its timestamp is
//! strictly earlier, which is the rule that makes two simultaneous attempts
//! converge on the side with the earlier attempt-time.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct AddJudger {
    cache: Mutex<HashMap<u64, i64>>,
}

impl AddJudger {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn check_and_add(&self, key: u64, value: i64, overwrite: bool) -> bool {
        let mut cache = self.cache.lock().expect("judger mutex poisoned");
        match cache.get(&key) {
            None => {
                cache.insert(key, value);
                true
            }
            Some(&existing) if overwrite && value < existing => {
                cache.insert(key, value);
                true
            }
            _ => false,
        }
    }

    pub fn delete(&self, key: u64) {
        self.cache.lock().expect("judger mutex poisoned").remove(&key);
    }
}

/// The add-judger key for an unordered pair of peer ids.
pub fn judger_key(self_id: u64, peer_id: u64) -> u64 {
    self_id ^ peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_without_overwrite_succeeds() {
        let j = AddJudger::new();
        assert!(j.check_and_add(1, 100, false));
    }

    #[test]
    fn second_attempt_without_overwrite_fails() {
        let j = AddJudger::new();
        assert!(j.check_and_add(1, 100, false));
        assert!(!j.check_and_add(1, 200, false));
    }

    #[test]
    fn overwrite_succeeds_only_when_strictly_earlier() {
        let j = AddJudger::new();
        assert!(j.check_and_add(1, 100, false));
        assert!(!j.check_and_add(1, 150, true));
        assert!(j.check_and_add(1, 50, true));
    }

    #[test]
    fn delete_clears_the_slot() {
        let j = AddJudger::new();
        assert!(j.check_and_add(1, 100, false));
        j.delete(1);
        assert!(j.check_and_add(1, 200, false));
    }

    #[test]
    fn judger_key_is_symmetric() {
        assert_eq!(judger_key(5, 9), judger_key(9, 5));
    }
}
