//! `proptest` strategies.

use crate::fixtures::Person;
use proptest::prelude::*;

/// Non-empty keys with a short collection prefix, e.g. `user:0042`.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    "[a-z]{1,6}:[0-9]{1,4}".prop_map(String::into_bytes)
}

/// Arbitrary non-empty raw keys.
pub fn raw_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..32)
}

/// Lowercase words that survive the standard analyzer unchanged.
pub fn word_strategy() -> impl Strategy<Value = String> {
    "[a-z]{2,10}"
}

/// Space-separated words.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(word_strategy(), 1..8).prop_map(|words| words.join(" "))
}

/// Plausible email addresses.
pub fn email_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{1,8}", "[a-z]{1,8}").prop_map(|(user, host)| format!("{user}@{host}.org"))
}

/// People with random names, emails and ages.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (text_strategy(), email_strategy(), 0u32..120, any::<bool>()).prop_map(
        |(name, email, age, active)| Person {
            active,
            ..Person::new(&name, &email, age)
        },
    )
}
