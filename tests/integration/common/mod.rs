#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use rowfile::{
    ForeignKeyDef, ForeignKeyRegistry, IndexDef, IndexKey, NoDefaults, Result, RowState,
    TableDefaults, TableInitializer, TableOperations, TableOptions, TableRow, TableSpec,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn open_table<R: TableRow>(
    dir: &Path,
    registry: &Arc<ForeignKeyRegistry>,
    options: TableOptions,
) -> Result<TableOperations<R>> {
    open_seeded(dir, registry, &NoDefaults, options)
}

pub fn open_seeded<R: TableRow>(
    dir: &Path,
    registry: &Arc<ForeignKeyRegistry>,
    defaults: &dyn TableDefaults<R>,
    options: TableOptions,
) -> Result<TableOperations<R>> {
    init_tracing();
    let init = TableInitializer::new(dir)?;
    TableOperations::open(&init, Arc::clone(registry), defaults, options)
}

/// Simple row with a unique composite index over (name, age).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(skip)]
    pub state: RowState,
    pub name: String,
    pub age: i64,
}

impl Person {
    pub fn new(name: &str, age: i64) -> Self {
        Self {
            name: name.into(),
            age,
            ..Default::default()
        }
    }

    pub fn set_name(&mut self, name: &str) -> bool {
        self.state.update(&mut self.name, name.to_string())
    }

    pub fn set_age(&mut self, age: i64) -> bool {
        self.state.update(&mut self.age, age)
    }
}

impl TableRow for Person {
    const TABLE: TableSpec = TableSpec::new("People");

    fn state(&self) -> &RowState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RowState {
        &mut self.state
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::unique("name_age", |p: &Person| {
            IndexKey::from((p.name.as_str(), p.age))
        })]
    }
}

/// Delimited, compressed row type used for volume round-trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(skip)]
    pub state: RowState,
    pub sensor: String,
    pub value: i64,
    pub note: Option<String>,
    pub valid: bool,
}

impl TableRow for Reading {
    const TABLE: TableSpec = TableSpec::new("Readings").delimited().compressed();

    fn state(&self) -> &RowState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RowState {
        &mut self.state
    }
}

/// Buffered row type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip)]
    pub state: RowState,
    pub kind: String,
}

impl Event {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }
}

impl TableRow for Event {
    const TABLE: TableSpec = TableSpec::new("Events").lazy();

    fn state(&self) -> &RowState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RowState {
        &mut self.state
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(skip)]
    pub state: RowState,
    pub name: String,
    pub description: String,
    pub sku: String,
}

impl Product {
    pub fn new(name: &str, description: &str, sku: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            sku: sku.into(),
            ..Default::default()
        }
    }
}

impl TableRow for Product {
    const TABLE: TableSpec = TableSpec::new("Products");

    fn state(&self) -> &RowState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RowState {
        &mut self.state
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::unique("sku", |p: &Product| IndexKey::of(p.sku.as_str()))]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    #[serde(skip)]
    pub state: RowState,
    pub product_id: i64,
    pub quantity: i64,
}

impl TableRow for Stock {
    const TABLE: TableSpec = TableSpec::new("Stock");

    fn state(&self) -> &RowState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RowState {
        &mut self.state
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::non_unique("product_id", |s: &Stock| {
            IndexKey::of(s.product_id)
        })]
    }

    fn foreign_keys() -> Vec<ForeignKeyDef> {
        vec![ForeignKeyDef::new("product_id", "Products")]
    }
}
