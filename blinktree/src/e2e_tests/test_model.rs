//! Property test: the tree behaves like an ordered multimap.

use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::e2e_tests::helpers::*;

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, u8),
    Erase(u16, u8),
    Find(u16),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..64u16, 0..4u8).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => (0..64u16, 0..4u8).prop_map(|(k, v)| Op::Erase(k, v)),
        1 => (0..64u16).prop_map(Op::Find),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_tree_matches_model(ops in prop::collection::vec(op(), 1..400)) {
        let tree = memory_tree::<u16, u8, 6>(5);
        let mut model: BTreeMap<u16, Vec<u8>> = BTreeMap::new();

        for op in &ops {
            match *op {
                Op::Insert(k, v) => {
                    tree.insert(k, v).expect("insert");
                    let values = model.entry(k).or_default();
                    values.push(v);
                    values.sort_unstable();
                }
                Op::Erase(k, v) => {
                    tree.erase(&k, &v).expect("erase");
                    if let Some(values) = model.get_mut(&k) {
                        if let Some(at) = values.iter().position(|&x| x == v) {
                            values.remove(at);
                        }
                        if values.is_empty() {
                            model.remove(&k);
                        }
                    }
                }
                Op::Find(k) => {
                    let expected = model.get(&k).cloned().unwrap_or_default();
                    prop_assert_eq!(tree.find(&k).expect("find"), expected);
                }
            }
        }

        let stats = tree.verify().expect("verify");
        prop_assert_eq!(stats.keys, model.len() as u64);
        let expected: Vec<(u16, u8)> = model
            .iter()
            .flat_map(|(&k, values)| values.iter().map(move |&v| (k, v)))
            .collect();
        prop_assert_eq!(tree.find_range(&0, &u16::MAX).expect("range"), expected);
    }
}
