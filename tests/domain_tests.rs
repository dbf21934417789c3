use chrono::{TimeZone, Utc};
use tracksure::common::{replay, AggregateRoot};
use tracksure::domains::delivery::*;
use tracksure::domains::geo::*;
use tracksure::domains::tracking::Position;

fn nyc_pickup() -> Coordinate {
    Coordinate::new(40.7128, -74.0060).unwrap()
}

fn nyc_drop() -> Coordinate {
    Coordinate::new(40.7580, -73.9855).unwrap()
}

fn new_order() -> Order {
    Order::create("order-1", Stop::new(nyc_pickup()), Stop::new(nyc_drop()), Some(6_900.0))
}

fn position_near_drop(agent: &str) -> Position {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    Position::new(agent, 40.75805, -73.98552, at).unwrap()
}

#[test]
fn test_distance_properties() {
    let points = [nyc_pickup(), nyc_drop(), Coordinate::new(-33.8688, 151.2093).unwrap()];
    for a in &points {
        assert_eq!(distance(a, a).unwrap(), 0.0);
        for b in &points {
            assert!((distance(a, b).unwrap() - distance(b, a).unwrap()).abs() < 1e-6);
        }
    }

    let km = distance(&nyc_pickup(), &nyc_drop()).unwrap() / 1000.0;
    assert!((km - 5.3).abs() <= 0.1, "got {} km", km);
}

#[test]
fn test_distance_rejects_invalid_coordinates() {
    let bad = Coordinate { latitude: 0.0, longitude: 181.0 };
    assert_eq!(
        distance(&bad, &nyc_drop()),
        Err(GeoError::InvalidCoordinate { latitude: 0.0, longitude: 181.0 })
    );
}

#[test]
fn test_order_creation() {
    let order = new_order();

    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.version(), 1);
    assert_eq!(order.uncommitted_events().len(), 1);

    match &order.uncommitted_events()[0] {
        OrderEvent::OrderCreated { order_id, planned_distance_m, .. } => {
            assert_eq!(order_id, "order-1");
            assert_eq!(*planned_distance_m, Some(6_900.0));
        }
        _ => panic!("Expected OrderCreated event"),
    }
}

#[test]
fn test_order_lifecycle_moves_forward_only() {
    let mut order = new_order();

    let early = DeliveryProof::new("order-1", position_near_drop("driver-1"), "memory://x");
    assert!(order.mark_delivered(&early, DEFAULT_GEOFENCE_RADIUS_METERS).is_err());

    order.assign("driver-1").unwrap();
    assert_eq!(order.status, OrderStatus::Assigned);
    assert!(order.assign("driver-2").is_err());

    let proof = DeliveryProof::new("order-1", position_near_drop("driver-1"), "memory://proof");
    order.mark_delivered(&proof, DEFAULT_GEOFENCE_RADIUS_METERS).unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.version(), 3);

    assert!(order.mark_delivered(&proof, DEFAULT_GEOFENCE_RADIUS_METERS).is_err());
    assert!(!OrderStatus::Delivered.can_advance_to(OrderStatus::Assigned));
    assert!(!OrderStatus::Created.can_advance_to(OrderStatus::Delivered));
}

#[test]
fn test_delivery_rejects_foreign_or_distant_proof() {
    let mut order = new_order();
    order.assign("driver-1").unwrap();

    let foreign = DeliveryProof::new("order-1", position_near_drop("driver-2"), "memory://a");
    assert!(order.mark_delivered(&foreign, DEFAULT_GEOFENCE_RADIUS_METERS).is_err());

    let wrong_order = DeliveryProof::new("order-2", position_near_drop("driver-1"), "memory://b");
    assert!(order.mark_delivered(&wrong_order, DEFAULT_GEOFENCE_RADIUS_METERS).is_err());

    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let far = Position::new("driver-1", 40.7128, -74.0060, at).unwrap();
    let distant = DeliveryProof::new("order-1", far, "memory://c");
    assert!(order.mark_delivered(&distant, DEFAULT_GEOFENCE_RADIUS_METERS).is_err());

    assert_eq!(order.status, OrderStatus::Assigned);
}

#[test]
fn test_order_replays_from_events() {
    let mut order = new_order();
    order.assign("driver-1").unwrap();
    let proof = DeliveryProof::new("order-1", position_near_drop("driver-1"), "memory://proof");
    order.mark_delivered(&proof, DEFAULT_GEOFENCE_RADIUS_METERS).unwrap();
    let events = order.take_uncommitted_events();
    assert_eq!(events.len(), 3);

    let rebuilt = replay(Order::empty("order-1"), &events).unwrap();
    assert_eq!(rebuilt.status, OrderStatus::Delivered);
    assert_eq!(rebuilt.assigned_agent_id.as_deref(), Some("driver-1"));
    assert_eq!(rebuilt.drop.coordinate, nyc_drop());
    assert_eq!(rebuilt.version(), 3);
}

#[test]
fn test_status_round_trips_through_strings() {
    for status in [OrderStatus::Created, OrderStatus::Assigned, OrderStatus::Delivered] {
        assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
    }
    assert!("cancelled".parse::<OrderStatus>().is_err());
}

#[test]
fn test_gate_follows_live_positions() {
    let registry = GeofenceRegistry::new();
    registry.register(GeofenceGate::new("order-1", "driver-1", nyc_drop()).with_radius(50.0));

    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let far = Position::new("driver-1", 40.7500, -73.9855, at).unwrap();
    let near = position_near_drop("driver-1");

    assert_eq!(registry.on_position(&far), vec![("order-1".to_string(), GeofenceState::OutOfRange)]);
    assert_eq!(registry.on_position(&near), vec![("order-1".to_string(), GeofenceState::InRange)]);

    let confirmed = registry
        .with_gate("order-1", |gate| gate.attempt_confirm(true))
        .unwrap();
    assert!(confirmed.is_ok());

    assert_eq!(registry.on_position(&far), vec![("order-1".to_string(), GeofenceState::Confirmed)]);
    let status = registry.status("order-1").unwrap();
    assert_eq!(status.state, GeofenceState::Confirmed);
    assert!(status.distance_meters.unwrap() > 50.0);

    assert!(registry.remove("order-1").is_some());
    assert!(registry.on_position(&near).is_empty());
}
