//! Shared fixtures for unit tests

use serde_json::Value;

use crate::entity::{Entity, Instance};
use crate::schema::{EntitySchema, Schema};

/// Addresses, users, vehicles, rides and loosely linked transactions
pub(crate) fn demo_schema() -> Schema {
    Schema::new()
        .with_entity(
            EntitySchema::new("Address")
                .has_many("users", "User", "address_id")
                .has_many("parked_vehicles", "Vehicle", "parking_address_id")
                .has_many("rides_starting_here", "Ride", "start_point_id"),
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
                .belongs_to("vehicle", "Vehicle", "vehicle_id")
                .has_many("transactions", "Transaction", "ride_id"),
        )
        .with_entity(
            EntitySchema::new("Transaction")
                .belongs_to("ride", "Ride", "ride_id")
                .belongs_to("parent", "Transaction", "parent_id")
                .has_many("children", "Transaction", "parent_id"),
        )
}

/// Materialize a detached instance of a demo entity from a JSON object
pub(crate) fn instance(entity: &str, columns: Value) -> Instance {
    let schema = demo_schema();
    let entity_schema = schema.entity(entity).expect("demo entity");
    let columns = columns.as_object().cloned().expect("object columns");
    Instance::new(Entity::from_columns(entity_schema, columns).expect("primary key"))
}
