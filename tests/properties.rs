use std::collections::{BTreeMap, BTreeSet};

use mpw::algorithm::SeedRule;
use mpw::template::{alphabet, select_template};
use mpw::{
    derive_site_key, render_password, Algorithm, KeyPurpose, MasterKey, ResultClass, ResultType,
    SiteKey,
};
use proptest::prelude::*;

fn algorithm() -> impl Strategy<Value = Algorithm> {
    prop::sample::select(Algorithm::ALL.to_vec())
}

fn template_type() -> impl Strategy<Value = ResultType> {
    let types: Vec<_> = ResultType::ALL
        .into_iter()
        .filter(|result_type| result_type.class() == ResultClass::Template)
        .collect();
    prop::sample::select(types)
}

fn purpose() -> impl Strategy<Value = KeyPurpose> {
    prop::sample::select(vec![
        KeyPurpose::Authentication,
        KeyPurpose::Identification,
        KeyPurpose::Recovery,
    ])
}

fn master(bytes: &[u8]) -> MasterKey {
    MasterKey::from_bytes(Algorithm::V3, bytes).unwrap()
}

/// Every character is drawn from the class its template position names.
fn assert_matches_template(password: &str, template: &str) {
    assert_eq!(password.len(), template.len());
    for (c, code) in password.bytes().zip(template.bytes()) {
        assert!(alphabet(code).unwrap().contains(&c), "{:?} not in class {:?}", c as char, code as char);
    }
}

#[test]
fn test_every_template_and_character_is_reachable() {
    for algorithm in Algorithm::ALL {
        let table = algorithm.params().templates;
        for result_type in ResultType::ALL {
            let Some(templates) = table.for_type(result_type) else {
                continue;
            };

            // The first key byte picks the template; find one byte per template.
            let mut selectors = BTreeMap::new();
            for first in 0..=u8::MAX {
                let mut bytes = [0; 32];
                bytes[0] = first;
                let template = select_template(&SiteKey::from_bytes(bytes), result_type, algorithm).unwrap();
                selectors.entry(template).or_insert(first);
            }
            assert_eq!(selectors.len(), templates.len(), "{} {}", algorithm, result_type);

            // Every later byte picks a character. V0's byte-swapped seeds only
            // reach a subset of the larger alphabets.
            let exhaustive = algorithm.params().seed == SeedRule::Unsigned;
            for (template, first) in selectors {
                let mut reached = vec![BTreeSet::new(); template.len()];
                for fill in 0..=u8::MAX {
                    let mut bytes = [fill; 32];
                    bytes[0] = first;
                    let password = render_password(&SiteKey::from_bytes(bytes), result_type, algorithm).unwrap();
                    assert_matches_template(&password, template);
                    for (position, c) in password.bytes().enumerate() {
                        reached[position].insert(c);
                    }
                }
                if !exhaustive {
                    continue;
                }
                for (position, code) in template.bytes().enumerate() {
                    let expected: BTreeSet<u8> = alphabet(code).unwrap().iter().copied().collect();
                    assert_eq!(reached[position], expected, "{} {} {:?}", algorithm, result_type, template);
                }
            }
        }
    }
}

#[test]
fn test_stateful_types_do_not_render() {
    let key = SiteKey::from_bytes([1; 32]);
    for result_type in [ResultType::Personal, ResultType::Device] {
        assert!(render_password(&key, result_type, Algorithm::V3).is_err());
    }
}

proptest! {
    #[test]
    fn prop_site_key_is_deterministic(
        bytes in prop::collection::vec(any::<u8>(), 64),
        name in "[a-z0-9.]{1,24}",
        counter in 1u32..,
        purpose in purpose(),
        algorithm in algorithm(),
    ) {
        let key = master(&bytes);
        let a = derive_site_key(&key, &name, counter, purpose, None, algorithm).unwrap();
        let b = derive_site_key(&key, &name, counter, purpose, None, algorithm).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_counter_changes_key(
        bytes in prop::collection::vec(any::<u8>(), 64),
        name in "[a-z0-9.]{1,24}",
        counter in 1u32..u32::MAX,
    ) {
        let key = master(&bytes);
        let a = derive_site_key(&key, &name, counter, KeyPurpose::Authentication, None, Algorithm::V3).unwrap();
        let b = derive_site_key(&key, &name, counter + 1, KeyPurpose::Authentication, None, Algorithm::V3).unwrap();
        prop_assert_ne!(a, b);
    }

    #[test]
    fn prop_site_names_are_separated(
        bytes in prop::collection::vec(any::<u8>(), 64),
        first in "[a-z0-9.]{1,24}",
        second in "[a-z0-9.]{1,24}",
    ) {
        prop_assume!(first != second);
        let key = master(&bytes);
        let a = derive_site_key(&key, &first, 1, KeyPurpose::Authentication, None, Algorithm::V3).unwrap();
        let b = derive_site_key(&key, &second, 1, KeyPurpose::Authentication, None, Algorithm::V3).unwrap();
        prop_assert_ne!(a, b);
    }

    #[test]
    fn prop_rendered_password_follows_template(
        bytes in prop::array::uniform32(any::<u8>()),
        result_type in template_type(),
        algorithm in algorithm(),
    ) {
        let key = SiteKey::from_bytes(bytes);
        let template = select_template(&key, result_type, algorithm).unwrap();
        let password = render_password(&key, result_type, algorithm).unwrap();
        assert_matches_template(&password, template);
        if result_type != ResultType::Phrase {
            prop_assert!(!password.contains(char::is_whitespace));
        }
    }

    #[test]
    fn prop_later_versions_render_alike(
        bytes in prop::array::uniform32(any::<u8>()),
        result_type in template_type(),
    ) {
        // V1 to V3 differ only in how lengths are counted, never in rendering.
        let key = SiteKey::from_bytes(bytes);
        let v1 = render_password(&key, result_type, Algorithm::V1).unwrap();
        prop_assert_eq!(&v1, &render_password(&key, result_type, Algorithm::V2).unwrap());
        prop_assert_eq!(&v1, &render_password(&key, result_type, Algorithm::V3).unwrap());
    }
}
