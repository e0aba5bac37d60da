// Piloting verbs and action queue against the simulated vehicle

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{connect, fast_config, SimVehicle};
use dji_pilot::subsystems::link::EP_STICK;
use dji_pilot::subsystems::piloting::Action;
use dji_pilot::Error;

fn recording_action(log: &Arc<Mutex<Vec<u32>>>, id: u32) -> Action {
    let log = log.clone();
    Action::custom(move || async move {
        log.lock().unwrap().push(id);
        Ok(())
    })
}

#[tokio::test]
async fn queue_runs_in_order_and_by_batches() {
    let vehicle = SimVehicle::new(0.0, 0.0, 0.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;
    let log = Arc::new(Mutex::new(Vec::new()));

    for id in 1..=5 {
        drone.piloting.add_action(recording_action(&log, id)).await;
    }
    assert_eq!(drone.piloting.pending_actions().await, 5);

    assert_eq!(drone.piloting.execute_actions(Some(2)).await.unwrap(), 2);
    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    assert_eq!(drone.piloting.pending_actions().await, 3);

    assert_eq!(drone.piloting.execute_actions(None).await.unwrap(), 3);
    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 5]);

    // Nothing left
    assert_eq!(drone.piloting.execute_actions(Some(4)).await.unwrap(), 0);
}

#[tokio::test]
async fn remove_and_clear_actions() {
    let vehicle = SimVehicle::new(0.0, 0.0, 0.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;

    drone.piloting.takeoff(true).await.unwrap();
    drone.piloting.move_by(1.0, 2.0, 3.0, 4.0, false, true).await.unwrap();
    drone.piloting.land(true).await.unwrap();

    // Queuing does not fly
    assert!(vehicle.requests().is_empty());

    let removed = drone.piloting.remove_action(1).await.unwrap();
    assert_eq!(format!("{:?}", removed), "MoveBy(1, 2, 3, 4)");
    assert!(matches!(
        drone.piloting.remove_action(2).await,
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(drone.piloting.pending_actions().await, 2);

    drone.piloting.clear_actions().await;
    assert_eq!(drone.piloting.pending_actions().await, 0);
}

#[tokio::test]
async fn failing_action_stops_the_queue() {
    let vehicle = SimVehicle::new(0.0, 0.0, 0.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;
    let log = Arc::new(Mutex::new(Vec::new()));

    drone.piloting.add_action(recording_action(&log, 1)).await;
    drone
        .piloting
        .add_action(Action::custom(|| async { Err(Error::InvalidArgument("boom".to_owned())) }))
        .await;
    drone.piloting.add_action(recording_action(&log, 3)).await;

    assert!(matches!(
        drone.piloting.execute_actions(None).await,
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(*log.lock().unwrap(), vec![1]);
    assert_eq!(drone.piloting.pending_actions().await, 1);
}

#[tokio::test]
async fn queued_flight_takes_off_and_lands() {
    let vehicle = SimVehicle::new(0.0, 0.0, 0.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;

    drone.piloting.takeoff(true).await.unwrap();
    drone.piloting.move_by(0.0, 0.0, 2.0, 0.0, false, true).await.unwrap();
    drone.piloting.land(true).await.unwrap();
    assert_eq!(drone.piloting.execute_actions(None).await.unwrap(), 3);

    let state = vehicle.telemetry();
    assert!(state.location.altitude.abs() < 0.1, "{:?}", state.location);

    // Climbed to 5 m, then 2 m more, the queued move was resolved after the takeoff
    let max_altitude = vehicle
        .sticks()
        .iter()
        .map(|s| s.altitude_before)
        .fold(f64::MIN, f64::max);
    assert!(max_altitude > 6.8 && max_altitude < 7.2, "{}", max_altitude);

    // Landing releases the sticks
    let (end_point, body) = vehicle.requests().pop().unwrap();
    assert_eq!((end_point.as_str(), body.as_str()), (EP_STICK, "0.0000,0.0000,0.0000,0.0000"));
}

#[tokio::test]
async fn move_by_is_relative_to_the_heading() {
    // Facing east
    let vehicle = SimVehicle::new(0.0256, 36.9037, 10.0, 90.0);
    let origin = vehicle.position();
    let drone = connect(&vehicle, fast_config()).await;

    // 10 m forward, 4 m to the right, then turn back north
    drone.piloting.move_by(4.0, 10.0, 1.0, -90.0, true, false).await.unwrap();

    let offset = vehicle.offset_from(&origin);
    assert!((offset.east - 10.0).abs() < 0.2, "{:?}", offset);
    assert!((offset.north + 4.0).abs() < 0.2, "{:?}", offset);
    assert!((offset.up - 1.0).abs() < 0.2, "{:?}", offset);
    assert!(vehicle.telemetry().heading.abs() < 0.1);
}

#[tokio::test]
async fn move_to_keeps_the_camera() {
    let vehicle = SimVehicle::new(0.0, 0.0, 5.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;

    drone.piloting.move_to(0.0001, 0.0001, 6.0, 200.0, true, false).await.unwrap();

    let state = vehicle.telemetry();
    assert!((state.location.altitude - 6.0).abs() < 0.1);
    assert!((state.heading + 160.0).abs() < 0.1, "{}", state.heading);
    assert_eq!(state.gimbal_attitude.pitch, 0.0);
    assert_eq!(state.zoom_ratio, 1.0);
}

#[tokio::test]
async fn cancelled_move_leaves_the_vehicle_where_it_is() {
    let vehicle = SimVehicle::new(0.0, 0.0, 5.0, 0.0);
    let origin = vehicle.position();
    let drone = connect(&vehicle, fast_config()).await;

    drone.piloting.move_by(0.0, 50.0, 0.0, 0.0, false, false).await.unwrap();
    drone.piloting.cancel_move_by().await;
    drone.piloting.wait_idle().await.unwrap();

    assert!(vehicle.offset_from(&origin).north < 45.0);
    assert!(drone.piloting.faults().try_recv().is_err());

    drone.piloting.stop().await.unwrap();
    let (end_point, body) = vehicle.requests().pop().unwrap();
    assert_eq!((end_point.as_str(), body.as_str()), (EP_STICK, "0.0000,0.0000,0.0000,0.0000"));
}

#[tokio::test]
async fn background_failures_are_reported() {
    let vehicle = SimVehicle::new(0.0, 0.0, 5.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;
    let faults = drone.piloting.faults();

    // The move reads its base position, then the pass loses telemetry
    vehicle.fail_telemetry_after(3);
    drone.piloting.move_to(0.001, 0.0, 5.0, 0.0, false, false).await.unwrap();
    drone.piloting.wait_idle().await.unwrap();

    assert!(matches!(faults.recv_async().await, Ok(Error::NavigationError(_))));
}

#[tokio::test]
async fn waiting_move_returns_the_failure() {
    let vehicle = SimVehicle::new(0.0, 0.0, 5.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;

    vehicle.fail_telemetry_after(2);
    let result = drone.piloting.move_by(0.0, 30.0, 0.0, 0.0, true, false).await;
    assert!(matches!(result, Err(Error::NavigationError(_))));
    assert!(drone.piloting.faults().try_recv().is_err());
}

#[tokio::test]
async fn cancellation_only_stops_its_own_kind_of_move() {
    let vehicle = SimVehicle::new(0.0, 0.0, 5.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;
    let faults = drone.piloting.faults();

    // The passes below only start running at wait_idle, after the cancel
    drone.piloting.move_to(0.0001, 0.0, 6.0, 0.0, false, false).await.unwrap();
    drone.piloting.cancel_move_by().await;
    drone.piloting.wait_idle().await.unwrap();

    let state = vehicle.telemetry();
    assert!((state.location.latitude - 0.0001).abs() < 1e-5, "{:?}", state.location);
    assert!((state.location.altitude - 6.0).abs() < 0.1);

    let before = vehicle.position();
    drone.piloting.move_by(0.0, 10.0, 0.0, 0.0, false, false).await.unwrap();
    drone.piloting.cancel_move_to().await;
    drone.piloting.wait_idle().await.unwrap();
    assert!((vehicle.offset_from(&before).north - 10.0).abs() < 0.2);

    // Now the cancel matches the move
    let before = vehicle.position();
    let sticks = vehicle.sticks().len();
    drone.piloting.move_to(0.01, 0.0, 6.0, 0.0, false, false).await.unwrap();
    drone.piloting.cancel_move_to().await;
    drone.piloting.wait_idle().await.unwrap();

    assert_eq!(vehicle.sticks().len(), sticks);
    assert!(vehicle.offset_from(&before).north.abs() < 0.01);
    assert!(faults.try_recv().is_err());
}

#[tokio::test]
async fn cancel_while_reading_the_base_position_is_kept() {
    let vehicle = SimVehicle::new(0.0, 0.0, 5.0, 0.0);
    let origin = vehicle.position();
    let drone = connect(&vehicle, fast_config()).await;

    // Cancel from inside the first telemetry read, the one giving the base position
    let piloting = drone.piloting.clone();
    let cancelled = AtomicBool::new(false);
    vehicle.on_telemetry(move || {
        if !cancelled.swap(true, Relaxed) {
            futures::executor::block_on(piloting.cancel_move_by());
        }
    });

    drone.piloting.move_by(0.0, 30.0, 0.0, 0.0, true, false).await.unwrap();

    assert!(vehicle.sticks().is_empty());
    assert!(vehicle.offset_from(&origin).north.abs() < 0.01);
}

#[tokio::test]
async fn disconnect_cancels_moves_in_flight() {
    let vehicle = SimVehicle::new(0.0, 0.0, 5.0, 0.0);
    let drone = connect(&vehicle, fast_config()).await;

    drone.piloting.move_by(0.0, 100.0, 0.0, 0.0, false, false).await.unwrap();
    drone.piloting.move_to(0.01, 0.01, 8.0, 0.0, false, false).await.unwrap();
    drone.disconnect().await;

    let requests = vehicle.requests();
    let (end_point, body) = requests.last().unwrap();
    assert_eq!((end_point.as_str(), body.as_str()), (EP_STICK, "0.0000,0.0000,0.0000,0.0000"));

    // Nothing is sent after the sticks are released
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(vehicle.requests().len(), requests.len());
}
