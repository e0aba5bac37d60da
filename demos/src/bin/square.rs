// Fly a 10 m square with the action queue
//
//   square [bridge_address]
//
// The drone takes off, flies the 4 sides turning right at each corner, and
// lands where it started. Every action is queued first, then executed in order.

use dji_pilot::subsystems::piloting::Action;
use dji_pilot::{Config, Drone};

const SIDE: f64 = 10.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::default();
    if let Some(address) = std::env::args().nth(1) {
        config.link.address = address;
    }

    let drone = Drone::connect(config).await?;

    let state = drone.link.get_all_states().await?;
    println!(
        "Starting from {}, {} at {} m, heading {}",
        state.location.latitude, state.location.longitude, state.location.altitude, state.heading
    );

    drone.piloting.takeoff(true).await?;
    for _ in 0..4 {
        drone.piloting.move_by(0.0, SIDE, 0.0, 90.0, true, true).await?;
    }
    drone.piloting.add_action(Action::Land).await;
    println!("{} actions queued", drone.piloting.pending_actions().await);

    let result = drone.piloting.execute_actions(None).await;
    if let Err(e) = &result {
        println!("Flight interrupted: {}, landing", e);
        drone.piloting.land(false).await?;
    }

    drone.disconnect().await;
    result?;
    Ok(())
}
