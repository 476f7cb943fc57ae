// common/mod.rs
// Shared fixtures for the integration suites

#![allow(dead_code)]

use irondoc_core::{
    Collection, Database, Document, DocumentId, FieldKind, IsolationLevel, Schema, StoreConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: Option<DocumentId>,
    pub name: String,
    pub age: i64,
    pub score: f64,
    pub city: Option<String>,
    pub active: bool,
}

impl Document for Person {
    fn id(&self) -> Option<DocumentId> {
        self.id
    }

    fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }

    fn schema() -> Schema<Self> {
        Schema::builder()
            .field("name", FieldKind::String, |p: &Person| p.name.clone().into())
            .field("age", FieldKind::Int, |p: &Person| p.age.into())
            .field("score", FieldKind::Float, |p: &Person| p.score.into())
            .field("city", FieldKind::String, |p: &Person| p.city.clone().into())
            .field("active", FieldKind::Bool, |p: &Person| p.active.into())
            .build()
    }
}

pub fn person(name: &str, age: i64) -> Person {
    Person {
        id: None,
        name: name.to_string(),
        age,
        score: age as f64 / 10.0,
        city: None,
        active: age % 2 == 0,
    }
}

pub fn person_in(name: &str, age: i64, city: &str) -> Person {
    Person {
        city: Some(city.to_string()),
        ..person(name, age)
    }
}

/// Small pages so a handful of documents already spans several heap pages and index leaves
pub fn small_pages(isolation: IsolationLevel) -> StoreConfig {
    StoreConfig::new()
        .with_isolation(isolation)
        .with_heap_page_capacity(256)
        .with_index_leaf_capacity(4)
        .with_base_delay_ms(1)
}

pub fn open(isolation: IsolationLevel) -> (Database, Collection<Person>) {
    let db = Database::open(small_pages(isolation)).expect("open database");
    let people = db.collection::<Person>("people").expect("open collection");
    (db, people)
}

/// Sorted ids of `docs`, for order-insensitive comparisons
pub fn ids(docs: &[Person]) -> Vec<DocumentId> {
    let mut ids: Vec<DocumentId> = docs.iter().filter_map(|p| p.id).collect();
    ids.sort();
    ids
}

pub fn names(docs: &[Person]) -> Vec<String> {
    docs.iter().map(|p| p.name.clone()).collect()
}
