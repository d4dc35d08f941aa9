//! Property tests checking invariants 2, 3, 6 and 7 against a reference
//! `BTreeMap` model, over random sequences of insert/delete/commit/abort.

use std::collections::BTreeMap;

use memdb::{Arg, IndexSchema, IntFieldIndex, MemDb, Schema, StringFieldIndex, TableSchema};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Person {
    email: String,
    age: i32,
}

fn schema() -> Schema<Person> {
    Schema::new(vec![TableSchema::new(
        "person",
        vec![
            IndexSchema::single("id", true, StringFieldIndex::required(|p: &Person| p.email.clone())),
            IndexSchema::single("age", false, IntFieldIndex::required(|p: &Person| p.age)),
        ],
    )])
    .unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    Insert(String, i32),
    Delete(String),
    Abort(String, i32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let email = "[a-e]@x";
    prop_oneof![
        (email, 0i32..100).prop_map(|(e, a)| Op::Insert(e, a)),
        email.prop_map(Op::Delete),
        (email, 0i32..100).prop_map(|(e, a)| Op::Abort(e, a)),
    ]
}

proptest! {
    /// Invariant 2 (index consistency), 6 (ordering on scans) and 7 (abort
    /// purity), checked after every op against a `BTreeMap<email, age>`
    /// reference model.
    #[test]
    fn model_matches_after_random_ops(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let db = MemDb::new(schema());
        let mut model: BTreeMap<String, i32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(email, age) => {
                    let mut txn = db.txn(true);
                    txn.insert("person", Person { email: email.clone(), age }).unwrap();
                    txn.commit().unwrap();
                    model.insert(email, age);
                }
                Op::Delete(email) => {
                    let mut txn = db.txn(true);
                    if let Some(&age) = model.get(&email) {
                        txn.delete("person", &Person { email: email.clone(), age }).unwrap();
                        txn.commit().unwrap();
                        model.remove(&email);
                    } else {
                        let err = txn.delete("person", &Person { email, age: 0 });
                        prop_assert!(err.is_err());
                        txn.abort().unwrap();
                    }
                }
                Op::Abort(email, age) => {
                    let mut txn = db.txn(true);
                    txn.insert("person", Person { email, age }).unwrap();
                    txn.abort().unwrap();
                    // model intentionally left untouched: this op must be invisible.
                }
            }

            let txn = db.txn(false);

            // Invariant 6: primary scan is in strict ascending byte order,
            // which for these emails coincides with ascending string order.
            let emails: Vec<String> = txn.get("person", "id", &[]).unwrap().map(|r| r.email.clone()).collect();
            let mut sorted = emails.clone();
            sorted.sort();
            prop_assert_eq!(&emails, &sorted);
            prop_assert_eq!(emails.len(), model.len());

            // Invariant 2: the age index resolves to exactly the same
            // records the primary tree holds for every age value in the model.
            for (email, age) in &model {
                let by_id = txn.first("person", "id", &[Arg::Str(email)]).unwrap().unwrap();
                prop_assert_eq!(by_id.age, *age);
                let mut by_age = txn.get("person", "age", &[Arg::I64(*age as i64)]).unwrap();
                prop_assert!(by_age.any(|r| &r.email == email));
            }
        }
    }

    /// Invariant 3 (unique respect): a `name` field with a small alphabet
    /// forces frequent collisions; any insert that would create two
    /// distinct primary keys sharing a unique secondary key must fail, and
    /// the table must never end up violating uniqueness.
    #[test]
    fn unique_index_never_admits_two_owners(
        emails in prop::collection::vec("[a-c]@x", 0..20),
        names in prop::collection::vec("[x-z]", 0..20),
    ) {
        #[derive(Debug, Clone)]
        struct Tagged {
            email: String,
            name: String,
        }

        let schema = Schema::new(vec![TableSchema::new(
            "tagged",
            vec![
                IndexSchema::single("id", true, StringFieldIndex::required(|t: &Tagged| t.email.clone())),
                IndexSchema::single("name", true, StringFieldIndex::required(|t: &Tagged| t.name.clone())),
            ],
        )])
        .unwrap();
        let db = MemDb::new(schema);

        let mut owner: BTreeMap<String, String> = BTreeMap::new();
        for (email, name) in emails.into_iter().zip(names) {
            let mut txn = db.txn(true);
            let result = txn.insert("tagged", Tagged { email: email.clone(), name: name.clone() });
            match owner.get(&name) {
                Some(existing) if existing != &email => {
                    prop_assert!(result.is_err());
                    txn.abort().unwrap();
                }
                _ => {
                    prop_assert!(result.is_ok());
                    txn.commit().unwrap();
                    owner.insert(name, email);
                }
            }
        }

        // No two distinct emails ever share a name in the committed state.
        let txn = db.txn(false);
        let rows: Vec<_> = txn.get("tagged", "id", &[]).unwrap().collect();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for row in &rows {
            if let Some(other) = seen.insert(row.name.clone(), row.email.clone()) {
                prop_assert_eq!(other, row.email.clone());
            }
        }
    }
}
