#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{open_table, Person, Product};
use rowfile::{ForeignKeyRegistry, IndexKey, Result, TableError, TableOptions, TableRow};
use tempfile::tempdir;

#[test]
fn composite_duplicate_is_rejected_without_changes() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let people = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
    for i in 0..5 {
        people.insert(&mut Person::new(&format!("Name {i}"), i))?;
    }
    let length = people.data_length()?;
    let file_len = std::fs::metadata(dir.path().join("People.dat"))?.len();

    let mut duplicate = Person::new("Name 4", 4);
    let err = people.insert(&mut duplicate).unwrap_err();
    match err {
        TableError::UniqueIndexViolation { index, key, .. } => {
            assert_eq!(index, "name_age");
            assert_eq!(key, "(\"Name 4\", 4)");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(people.record_count()?, 5);
    assert_eq!(people.data_length()?, length);
    assert_eq!(std::fs::metadata(dir.path().join("People.dat"))?.len(), file_len);
    assert!(!duplicate.state.has_identity());

    people.insert(&mut Person::new("Name 4", 5))?;
    assert_eq!(people.record_count()?, 6);
    Ok(())
}

#[test]
fn failed_batch_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let products = open_table::<Product>(dir.path(), &registry, TableOptions::default())?;
    products.insert(&mut Product::new("Desk", "Oak desk", "SKU-1"))?;

    let mut batch = vec![
        Product::new("Chair", "Office chair", "SKU-2"),
        Product::new("Lamp", "Desk lamp", "SKU-1"),
    ];
    assert!(products.insert_many(&mut batch).is_err());
    assert_eq!(products.record_count()?, 1);
    assert!(batch.iter().all(|p| !p.state.is_persisted()));
    assert!(products
        .select_by_index("sku", &IndexKey::of("SKU-2"))?
        .is_empty());
    Ok(())
}

#[test]
fn index_follows_updates_and_deletes() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let products = open_table::<Product>(dir.path(), &registry, TableOptions::default())?;
    let mut desk = Product::new("Desk", "Oak desk", "SKU-1");
    let mut chair = Product::new("Chair", "Office chair", "SKU-2");
    products.insert(&mut desk)?;
    products.insert(&mut chair)?;

    let mut renamed = desk.clone();
    renamed.sku = "SKU-2".into();
    assert!(matches!(
        products.update(&mut renamed),
        Err(TableError::UniqueIndexViolation { .. })
    ));

    renamed.sku = "SKU-9".into();
    products.update(&mut renamed)?;
    assert!(products.select_by_index("sku", &IndexKey::of("SKU-1"))?.is_empty());
    let found = products.select_by_index("sku", &IndexKey::of("SKU-9"))?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), desk.id());

    products.delete(&chair)?;
    products.insert(&mut Product::new("Stool", "Bar stool", "SKU-2"))?;

    assert!(matches!(
        products.select_by_index("name", &IndexKey::of("Desk")),
        Err(TableError::UnknownIndex { .. })
    ));
    Ok(())
}

#[test]
fn swapping_keys_within_one_batch_is_allowed() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let products = open_table::<Product>(dir.path(), &registry, TableOptions::default())?;
    let mut rows = vec![
        Product::new("A", "first", "SKU-A"),
        Product::new("B", "second", "SKU-B"),
    ];
    products.insert_many(&mut rows)?;
    rows[0].sku = "SKU-B".into();
    rows[1].sku = "SKU-A".into();
    products.update_many(&mut rows)?;

    let a = products.select_by_index("sku", &IndexKey::of("SKU-A"))?;
    assert_eq!(a[0].name, "B");
    Ok(())
}

#[test]
fn indexes_are_rebuilt_on_open() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    {
        let people = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
        people.insert(&mut Person::new("Kept", 1))?;
    }
    let people = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
    assert!(people.insert(&mut Person::new("Kept", 1)).is_err());
    let found = people.select_by_index("name_age", &IndexKey::from(("Kept", 1)))?;
    assert_eq!(found.len(), 1);
    Ok(())
}
