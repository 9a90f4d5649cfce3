//! Shared fixtures: the demo schema seeded into a `MemoryStore`
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use elif_pooling::{
    EntitySchema, Instance, KeyValue, Manager, MemoryStore, PoolingConfig, RelationPath, Schema,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn schema() -> Schema {
    Schema::new()
        .with_entity(
            EntitySchema::new("Address")
                .has_many("users", "User", "address_id")
                .has_many("parked_vehicles", "Vehicle", "parking_address_id")
                .has_many("rides_starting_here", "Ride", "start_point_id")
                .has_many("rides_ending_here", "Ride", "end_point_id"),
        )
        .with_entity(
            EntitySchema::new("User")
                .belongs_to("address", "Address", "address_id")
                .has_many("vehicles", "Vehicle", "owner_id")
                .has_many("driver_rides", "Ride", "driver_id")
                .has_many("passenger_rides", "Ride", "passenger_id"),
        )
        .with_entity(
            EntitySchema::new("Vehicle")
                .belongs_to("owner", "User", "owner_id")
                .belongs_to("parking_address", "Address", "parking_address_id")
                .has_many("rides", "Ride", "vehicle_id"),
        )
        .with_entity(
            EntitySchema::new("Ride")
                .belongs_to("driver", "User", "driver_id")
                .belongs_to("passenger", "User", "passenger_id")
                .belongs_to("start_point", "Address", "start_point_id")
                .belongs_to("end_point", "Address", "end_point_id")
                .belongs_to("vehicle", "Vehicle", "vehicle_id")
                .has_many("transactions", "Transaction", "ride_id"),
        )
        .with_entity(
            // user_id is deliberately not declared as a relationship
            EntitySchema::new("Transaction")
                .belongs_to("ride", "Ride", "ride_id")
                .belongs_to("parent", "Transaction", "parent_id")
                .has_many("children", "Transaction", "parent_id"),
        )
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub manager: Manager,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        init_tracing();
        let schema = schema();
        let store = Arc::new(store.with_schema(&schema));
        let manager = Manager::new(store.clone(), schema).expect("valid demo schema");
        Self { store, manager }
    }

    pub fn with_config(mut self, config: PoolingConfig) -> Self {
        self.manager = self.manager.with_config(config);
        self
    }

    pub fn insert(&self, entity: &str, columns: Value) -> i64 {
        match self.store.insert(entity, columns).expect("insert") {
            KeyValue::Int(id) => id,
            other => panic!("unexpected key {:?}", other),
        }
    }

    pub fn address(&self) -> i64 {
        self.insert("Address", json!({}))
    }

    pub fn user(&self, address_id: i64) -> i64 {
        self.insert("User", json!({ "address_id": address_id }))
    }

    pub fn vehicle(&self, owner_id: i64, parking_address_id: i64, make: &str) -> i64 {
        self.insert(
            "Vehicle",
            json!({ "owner_id": owner_id, "parking_address_id": parking_address_id, "make": make }),
        )
    }

    pub fn ride(&self, driver_id: i64, passenger_id: i64, vehicle_id: i64, start: i64, end: i64) -> i64 {
        self.insert(
            "Ride",
            json!({
                "driver_id": driver_id,
                "passenger_id": passenger_id,
                "vehicle_id": vehicle_id,
                "start_point_id": start,
                "end_point_id": end,
            }),
        )
    }

    pub fn queries(&self) -> usize {
        self.store.query_count()
    }

    pub fn reset_queries(&self) {
        self.store.reset_queries();
    }

    pub fn path(&self, root: &str, path: &str) -> RelationPath {
        self.manager.schema().compile_path(root, path).expect("known path")
    }
}

/// Randomized graph: 5 addresses, 10 users, 3 vehicles parked at fresh addresses, 20 rides
pub fn seed_ride_graph(fixture: &Fixture, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);

    let addresses: Vec<i64> = (0..5).map(|_| fixture.address()).collect();
    let users: Vec<i64> = (0..10)
        .map(|_| fixture.user(*addresses.choose(&mut rng).expect("addresses")))
        .collect();
    let vehicles: Vec<i64> = (0..3)
        .map(|_| {
            let parking = fixture.address();
            fixture.vehicle(*users.choose(&mut rng).expect("users"), parking, "bmw")
        })
        .collect();

    for _ in 0..20 {
        let driver = *users.choose(&mut rng).expect("users");
        let passengers: Vec<i64> = users.iter().copied().filter(|u| *u != driver).collect();
        let start = *addresses.choose(&mut rng).expect("addresses");
        let ends: Vec<i64> = addresses.iter().copied().filter(|a| *a != start).collect();
        fixture.ride(
            driver,
            *passengers.choose(&mut rng).expect("passengers"),
            *vehicles.choose(&mut rng).expect("vehicles"),
            start,
            *ends.choose(&mut rng).expect("ends"),
        );
    }
}

/// Instances reached through `paths`, grouped by key
pub fn collect_by_key(
    fixture: &Fixture,
    root: &str,
    results: &[Instance],
    paths: &[&str],
) -> HashMap<KeyValue, Vec<Instance>> {
    let mut by_key: HashMap<KeyValue, Vec<Instance>> = HashMap::new();
    for path in paths {
        let path = fixture.path(root, path);
        for result in results {
            for related in path.relation(result).expect("walkable").instances() {
                by_key.entry(related.key()).or_default().push(related);
            }
        }
    }
    by_key
}

/// Every group holds the very same object
pub fn assert_shared(by_key: &HashMap<KeyValue, Vec<Instance>>) {
    for (key, group) in by_key {
        for other in &group[1..] {
            assert!(
                Instance::ptr_eq(&group[0], other),
                "instances for key {} are not the same object",
                key
            );
        }
    }
}

/// At least one group holds two distinct objects
pub fn has_duplicates(by_key: &HashMap<KeyValue, Vec<Instance>>) -> bool {
    by_key
        .values()
        .any(|group| group.iter().any(|other| !Instance::ptr_eq(&group[0], other)))
}

pub fn ids(instances: &[Instance]) -> Vec<i64> {
    instances
        .iter()
        .map(|i| match i.key() {
            KeyValue::Int(id) => id,
            other => panic!("unexpected key {:?}", other),
        })
        .collect()
}
