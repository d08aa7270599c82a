#![allow(missing_docs)]

mod common;

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use common::{open_seeded, open_table, Event, Person};
use rowfile::{
    ForeignKeyRegistry, Result, TableDefaults, TableError, TableInitializer, TableOptions,
    TableRow,
};
use tempfile::tempdir;

struct PeopleDefaults {
    version: u16,
}

impl TableDefaults<Person> for PeopleDefaults {
    fn primary_sequence(&self) -> i64 {
        99
    }

    fn secondary_sequence(&self) -> i64 {
        500
    }

    fn version(&self) -> u16 {
        self.version
    }

    fn initial_data(&self, version: u16) -> Vec<Person> {
        match version {
            1 => vec![Person::new("Admin", 40), Person::new("Guest", 0)],
            2 => vec![Person::new("Auditor", 35)],
            _ => Vec::new(),
        }
    }
}

/// Version 2 seed carries an identity the table has already issued.
struct BrokenUpgrade;

impl TableDefaults<Person> for BrokenUpgrade {
    fn primary_sequence(&self) -> i64 {
        99
    }

    fn secondary_sequence(&self) -> i64 {
        500
    }

    fn version(&self) -> u16 {
        2
    }

    fn initial_data(&self, version: u16) -> Vec<Person> {
        let mut rows = PeopleDefaults { version: 2 }.initial_data(version);
        if version == 2 {
            for row in &mut rows {
                row.set_id(0).expect("fresh row");
            }
        }
        rows
    }
}

#[test]
fn failed_upgrade_resumes_at_the_failed_version() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    match open_seeded::<Person>(dir.path(), &registry, &BrokenUpgrade, TableOptions::default()) {
        Err(TableError::UniqueIndexViolation { ref index, .. }) if index == "id" => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("broken seed should fail the open"),
    }

    let people = open_seeded::<Person>(
        dir.path(),
        &registry,
        &PeopleDefaults { version: 2 },
        TableOptions::default(),
    )?;
    let names: Vec<String> = people.select()?.into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Admin", "Guest", "Auditor"]);
    assert_eq!(people.schema_version()?, 2);
    assert_eq!(people.primary_sequence()?, 102);
    Ok(())
}

#[test]
fn unwritten_table_still_takes_default_sequences() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    drop(open_table::<Person>(dir.path(), &registry, TableOptions::default())?);

    let people = open_seeded::<Person>(
        dir.path(),
        &registry,
        &PeopleDefaults { version: 1 },
        TableOptions::default(),
    )?;
    let ids: Vec<i64> = people.select()?.iter().map(|p| p.id()).collect();
    assert_eq!(ids, vec![100, 101]);
    assert_eq!(people.secondary_sequence()?, 500);
    Ok(())
}

#[test]
fn new_table_is_seeded_and_upgraded_once_per_version() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    {
        let people = open_seeded::<Person>(
            dir.path(),
            &registry,
            &PeopleDefaults { version: 1 },
            TableOptions::default(),
        )?;
        let ids: Vec<i64> = people.select()?.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![100, 101]);
        assert_eq!(people.primary_sequence()?, 101);
        assert_eq!(people.secondary_sequence()?, 500);
        assert_eq!(people.schema_version()?, 1);
    }
    {
        let people = open_seeded::<Person>(
            dir.path(),
            &registry,
            &PeopleDefaults { version: 2 },
            TableOptions::default(),
        )?;
        assert_eq!(people.record_count()?, 3);
        assert_eq!(people.schema_version()?, 2);
        let auditor = people.select_where(|p| p.name == "Auditor")?;
        assert_eq!(auditor[0].id(), 102);
    }
    let people = open_seeded::<Person>(
        dir.path(),
        &registry,
        &PeopleDefaults { version: 2 },
        TableOptions::default(),
    )?;
    assert_eq!(people.record_count()?, 3);
    Ok(())
}

#[test]
fn second_owner_is_rejected_until_dispose() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let first = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
    match open_table::<Person>(dir.path(), &registry, TableOptions::default()) {
        Err(TableError::TableLocked(path)) => assert!(path.ends_with("People.dat")),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("table opened twice"),
    }
    assert!(dir.path().join("People.dat.lock").exists());
    first.dispose()?;
    let second = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
    assert_eq!(second.record_count()?, 0);
    Ok(())
}

#[test]
fn lazy_rows_reach_disk_on_dispose() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let path = dir.path().join("Events.dat");
    {
        let events = open_table::<Event>(dir.path(), &registry, TableOptions::default())?;
        let mut batch: Vec<Event> = ["open", "read", "close"]
            .iter()
            .map(|kind| Event::new(kind))
            .collect();
        events.insert_many(&mut batch)?;
        assert_eq!(events.record_count()?, 3);
        assert_eq!(std::fs::metadata(&path)?.len(), 64);
        events.dispose()?;
    }
    {
        let events = open_table::<Event>(dir.path(), &registry, TableOptions::default())?;
        assert_eq!(events.record_count()?, 3);
        events.insert(&mut Event::new("dropped"))?;
    }
    let events = open_table::<Event>(dir.path(), &registry, TableOptions::default())?;
    let kinds: Vec<String> = events.select()?.into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec!["open", "read", "close", "dropped"]);
    Ok(())
}

#[test]
fn reset_sequence_is_persisted() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    {
        let people = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
        assert_eq!(people.next_sequence()?, 0);
        people.reset_sequence(368_745, -3_287)?;
        assert_eq!(people.next_sequence()?, 368_746);
        assert_eq!(people.next_secondary_sequence(1)?, -3_286);
        assert_eq!(people.next_secondary_sequence(2)?, -3_285);
    }
    let people = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
    assert_eq!(people.primary_sequence()?, 368_746);
    assert_eq!(people.secondary_sequence()?, -3_285);
    let mut person = Person::new("Next", 1);
    people.insert(&mut person)?;
    assert_eq!(person.id(), 368_747);
    Ok(())
}

#[test]
fn torn_trailing_block_is_discarded_on_open() -> Result<()> {
    let dir = tempdir()?;
    let registry = Arc::new(ForeignKeyRegistry::new());
    let path = dir.path().join("People.dat");
    let intact_len;
    {
        let people = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
        people.insert_many(&mut [Person::new("A", 1), Person::new("B", 2)])?;
        intact_len = std::fs::metadata(&path)?.len();
    }
    let mut file = OpenOptions::new().append(true).open(&path)?;
    file.write_all(&[1, 0, 0, 0, 200, 0, 0, 0, 9, 0])?;
    drop(file);

    let people = open_table::<Person>(dir.path(), &registry, TableOptions::default())?;
    assert_eq!(people.record_count()?, 2);
    assert_eq!(std::fs::metadata(&path)?.len(), intact_len);
    people.insert(&mut Person::new("C", 3))?;
    assert_eq!(people.record_count()?, 3);
    Ok(())
}

#[test]
fn options_load_from_toml_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("table.toml");
    std::fs::write(
        &path,
        "compact_threshold_percent = 35\ncompact_min_bytes = 0\nlazy_flush_threshold = 2\n",
    )?;
    let options = TableOptions::load(&path)?;
    assert_eq!(options.compact_threshold_percent, Some(35));
    assert_eq!(options.lazy_flush_threshold, 2);

    let registry = Arc::new(ForeignKeyRegistry::new());
    let events = open_table::<Event>(dir.path(), &registry, options)?;
    events.insert_many(&mut [Event::new("a"), Event::new("b")])?;
    assert!(std::fs::metadata(dir.path().join("Events.dat"))?.len() > 64);
    Ok(())
}

#[test]
fn invalid_locations_are_reported() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        TableInitializer::new(dir.path().join("absent")),
        Err(TableError::PathInvalid { .. })
    ));
    let file = dir.path().join("plain.txt");
    std::fs::write(&file, b"not a directory").unwrap();
    assert!(matches!(
        TableInitializer::new(&file),
        Err(TableError::PathInvalid { .. })
    ));
    assert!(matches!(
        TableInitializer::new(""),
        Err(TableError::ArgumentRequired(_))
    ));
    assert_eq!(Person::TABLE.name, "People");
}
