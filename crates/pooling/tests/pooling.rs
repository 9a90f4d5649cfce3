//! Instance pooling and pooled select_related against the demo ride graph

mod common;

use common::{assert_shared, collect_by_key, has_duplicates, seed_ride_graph, Fixture};
use elif_pooling::{
    Condition, Instance, KeyValue, PoolRelatedCall, PoolingConfig, PoolingError, Query,
};
use serde_json::json;

const USER_PATHS: [&str; 3] = ["driver", "passenger", "vehicle.owner"];
const ADDRESS_PATHS: [&str; 5] = [
    "driver.address",
    "passenger.address",
    "start_point",
    "end_point",
    "vehicle.owner.address",
];

#[tokio::test]
async fn test_simple_pooling_shares_drivers() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 7);

    let rides = fixture.manager.query("Ride").unwrap().pool_related(["driver"]).unwrap();
    let results = rides.all().await.unwrap();
    assert_eq!(results.len(), 20);
    assert_eq!(fixture.queries(), 2);

    for ride in results {
        let driver = ride.related("driver").expect("driver pooled");
        assert_eq!(Some(driver.key()), ride.get_key("driver_id"));
    }
    let drivers = collect_by_key(&fixture, "Ride", results, &["driver"]);
    assert!(drivers.values().any(|group| group.len() > 1));
    assert_shared(&drivers);
    assert_eq!(fixture.queries(), 2);
}

#[tokio::test]
async fn test_plain_select_related_duplicates_instances() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 7);

    let rides = fixture.manager.query("Ride").unwrap().select_related("driver").unwrap();
    let results = rides.all().await.unwrap();
    assert_eq!(fixture.queries(), 1);

    let drivers = collect_by_key(&fixture, "Ride", results, &["driver"]);
    assert!(has_duplicates(&drivers));
}

#[tokio::test]
async fn test_complex_pooling_one_query_per_type() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 11);

    let rides = fixture
        .manager
        .query("Ride")
        .unwrap()
        .select_related("vehicle")
        .unwrap()
        .pool_related(USER_PATHS)
        .unwrap()
        .pool_related(ADDRESS_PATHS)
        .unwrap();
    assert_eq!(rides.pool_requests().len(), 2);

    let results = rides.all().await.unwrap();
    // base, User, Address
    assert_eq!(fixture.queries(), 3);

    let users = collect_by_key(&fixture, "Ride", results, &USER_PATHS);
    let addresses = collect_by_key(&fixture, "Ride", results, &ADDRESS_PATHS);
    assert_shared(&users);
    assert_shared(&addresses);

    // the same user reached as driver of one ride and passenger of another
    let first = &results[0];
    let driver_key = first.get_key("driver_id").unwrap();
    for ride in results {
        if ride.get_key("passenger_id") == Some(driver_key.clone()) {
            assert!(Instance::ptr_eq(
                &ride.related("passenger").unwrap(),
                &first.related("driver").unwrap()
            ));
        }
    }
    assert_eq!(fixture.queries(), 3);
}

#[tokio::test]
async fn test_explicit_pool_query_applies_to_every_path_of_its_type() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 3);

    let rides = fixture
        .manager
        .query("Ride")
        .unwrap()
        .select_related("vehicle")
        .unwrap()
        .pool_related(["driver", "passenger"])
        .unwrap()
        .pool_related([PoolRelatedCall::new(
            Query::new("User").select_related("address"),
            ["vehicle.owner"],
        )])
        .unwrap();
    assert_eq!(rides.pool_requests().len(), 1);

    let results = rides.all().await.unwrap();
    assert_eq!(fixture.queries(), 2);

    let users = collect_by_key(&fixture, "Ride", results, &USER_PATHS);
    assert_shared(&users);
    for user in users.values().flatten() {
        let address = user.related("address").expect("joined by the pool query");
        assert_eq!(Some(address.key()), user.get_key("address_id"));
    }
}

#[tokio::test]
async fn test_pooling_does_not_depend_on_registration_order() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 47);

    let orders: [&[&str]; 3] = [
        &["driver", "driver.address"],
        &["driver.address", "driver"],
        &[
            "start_point",
            "vehicle.owner.address",
            "driver.address",
            "vehicle.owner",
            "vehicle",
            "driver",
        ],
    ];
    for paths in orders {
        fixture.reset_queries();
        let rides = fixture
            .manager
            .query("Ride")
            .unwrap()
            .pool_related(paths.iter().copied())
            .unwrap();
        let results = rides.all().await.unwrap();
        assert_eq!(results.len(), 20);
        assert_eq!(fixture.queries(), 1 + rides.pool_requests().len());

        for ride in results {
            let driver = ride.related("driver").expect("driver pooled");
            let address = driver.related("address").expect("driver address pooled");
            assert_eq!(Some(address.key()), driver.get_key("address_id"));
        }
        assert_shared(&collect_by_key(&fixture, "Ride", results, &["driver.address"]));
    }
}

#[tokio::test]
async fn test_pool_call_must_select_the_path_target() {
    let fixture = Fixture::new();
    let rides = fixture.manager.query("Ride").unwrap();

    let wrong = PoolRelatedCall::new(Query::new("Address"), ["driver"]);
    assert!(matches!(
        rides.pool_related([wrong]),
        Err(PoolingError::InvalidRelation { .. })
    ));
    let empty = PoolRelatedCall::new(Query::new("User"), Vec::<&str>::new());
    assert!(matches!(rides.pool_related([empty]), Err(PoolingError::Configuration(_))));
}

#[tokio::test]
async fn test_pooling_reverse_relation_is_rejected() {
    let fixture = Fixture::new();
    let vehicles = fixture.manager.query("Vehicle").unwrap();
    assert!(matches!(
        vehicles.pool_related(["rides"]),
        Err(PoolingError::InvalidRelation { .. })
    ));
    assert!(matches!(
        vehicles.pool_related(["garage"]),
        Err(PoolingError::UnknownPath { .. })
    ));
    assert_eq!(fixture.queries(), 0);
}

#[tokio::test]
async fn test_intermediate_relation_must_be_loaded() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 5);

    let rides = fixture.manager.query("Ride").unwrap().pool_related(["driver.address"]).unwrap();
    let err = rides.all().await.unwrap_err();
    assert!(matches!(err, PoolingError::RelationNotLoaded { ref relation, .. } if relation == "driver"));
    assert!(!rides.is_evaluated());
}

#[tokio::test]
async fn test_null_foreign_keys_skip_the_pool_query() {
    let fixture = Fixture::new();
    for _ in 0..3 {
        fixture.insert("Transaction", json!({ "ride_id": null, "amount": 10 }));
    }

    let transactions = fixture.manager.query("Transaction").unwrap().pool_related(["ride"]).unwrap();
    let results = transactions.all().await.unwrap();
    assert_eq!(fixture.queries(), 1);
    for transaction in results {
        assert!(transaction.is_loaded("ride"));
        assert_eq!(transaction.related("ride"), None);
    }

    let eager = Fixture::new().with_config(PoolingConfig::default().with_skip_empty_lookups(false));
    eager.insert("Transaction", json!({ "ride_id": null }));
    let transactions = eager.manager.query("Transaction").unwrap().pool_related(["ride"]).unwrap();
    transactions.all().await.unwrap();
    assert_eq!(eager.queries(), 2);
}

#[tokio::test]
async fn test_dangling_foreign_key_is_a_pool_miss() {
    let fixture = Fixture::new();
    let address = fixture.address();
    let user = fixture.user(address);
    let vehicle = fixture.vehicle(user, address, "ford");
    fixture.ride(user, 999, vehicle, address, address);

    let rides = fixture
        .manager
        .query("Ride")
        .unwrap()
        .pool_related(["driver", "passenger"])
        .unwrap();
    match rides.all().await {
        Err(PoolingError::PoolMiss { entity, key, path }) => {
            assert_eq!(entity, "User");
            assert_eq!(key, KeyValue::Int(999));
            assert_eq!(path, "passenger");
        }
        other => panic!("expected a pool miss, got {:?}", other),
    }
}

#[tokio::test]
async fn test_select_related_pooled_single_query() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 13);

    let rides = fixture
        .manager
        .query("Ride")
        .unwrap()
        .select_related_pooled(["driver.address", "passenger.address", "start_point"])
        .unwrap();
    let results = rides.all().await.unwrap();
    assert_eq!(fixture.queries(), 1);

    let users = collect_by_key(&fixture, "Ride", results, &["driver", "passenger"]);
    let addresses = collect_by_key(
        &fixture,
        "Ride",
        results,
        &["driver.address", "passenger.address", "start_point"],
    );
    assert_shared(&users);
    assert_shared(&addresses);
}

#[tokio::test]
async fn test_pooled_joins_from_configuration() {
    let fixture = Fixture::new().with_config(PoolingConfig::default().with_pool_select_related(true));
    seed_ride_graph(&fixture, 17);

    let rides = fixture.manager.query("Ride").unwrap().select_related("driver").unwrap();
    assert!(!rides.pools_select_related());
    let results = rides.all().await.unwrap();

    let drivers = collect_by_key(&fixture, "Ride", results, &["driver"]);
    assert_shared(&drivers);
    assert_eq!(fixture.queries(), 1);
}

#[tokio::test]
async fn test_pooling_on_filtered_and_empty_batches() {
    let fixture = Fixture::new();
    seed_ride_graph(&fixture, 19);

    let none = fixture
        .manager
        .query("Ride")
        .unwrap()
        .filter(Condition::eq("driver_id", -1))
        .pool_related(["driver"])
        .unwrap();
    assert!(none.all().await.unwrap().is_empty());
    assert_eq!(fixture.queries(), 1);

    let one = fixture
        .manager
        .query("Ride")
        .unwrap()
        .filter(Condition::eq("id", 1))
        .pool_related(["driver"])
        .unwrap();
    let ride = one.first().await.unwrap().unwrap();
    assert!(ride.related("driver").is_some());
    assert_eq!(fixture.queries(), 3);
}
