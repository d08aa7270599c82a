#![allow(missing_docs)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use common::{open_table, Person, Product};
use rowfile::{ForeignKeyRegistry, IndexKey, Result, TableOptions, TableRow};
use tempfile::tempdir;

#[test]
fn parallel_writers_get_distinct_identities() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let people = Arc::new(open_table::<Person>(
        dir.path(),
        &registry,
        TableOptions::default().sync_writes(false),
    )?);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let people = Arc::clone(&people);
            thread::spawn(move || -> Result<Vec<i64>> {
                let mut ids = Vec::new();
                for i in 0..50 {
                    let mut person = Person::new(&format!("worker-{worker}"), i);
                    people.insert(&mut person)?;
                    ids.push(person.id());
                    assert!(people.select_by_id(person.id())?.is_some());
                }
                Ok(ids)
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for handle in handles {
        for id in handle.join().expect("writer panicked")? {
            assert!(all.insert(id), "identity {id} issued twice");
        }
    }
    assert_eq!(all.len(), 200);
    assert_eq!(all.iter().copied().collect::<Vec<_>>(), (0..200).collect::<Vec<_>>());
    assert_eq!(people.record_count()?, 200);
    Ok(())
}

#[test]
fn readers_never_observe_partial_batches() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let people = Arc::new(open_table::<Person>(
        dir.path(),
        &registry,
        TableOptions::default().sync_writes(false),
    )?);

    let writer = {
        let people = Arc::clone(&people);
        thread::spawn(move || -> Result<()> {
            for round in 0..40 {
                let mut batch: Vec<Person> =
                    (0..5).map(|i| Person::new(&format!("round-{round}"), i)).collect();
                people.insert_many(&mut batch)?;
            }
            Ok(())
        })
    };
    let reader = {
        let people = Arc::clone(&people);
        thread::spawn(move || -> Result<()> {
            for _ in 0..200 {
                let count = people.select()?.len();
                assert_eq!(count % 5, 0, "observed a partial batch of {count} rows");
            }
            Ok(())
        })
    };
    writer.join().expect("writer panicked")?;
    reader.join().expect("reader panicked")?;
    assert_eq!(people.record_count()?, 200);
    Ok(())
}

#[test]
fn concurrent_unique_inserts_admit_one_winner() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let products = Arc::new(open_table::<Product>(dir.path(), &registry, TableOptions::default())?);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let products = Arc::clone(&products);
            thread::spawn(move || {
                products
                    .insert(&mut Product::new(&format!("Copy {i}"), "Contested", "SKU-X"))
                    .is_ok()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("inserter panicked"))
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    let rows = products.select_by_index("sku", &IndexKey::of("SKU-X"))?;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].id() >= 0);
    Ok(())
}
