//! # Piloting
//!
//! Operator verbs on top of the [Navigator]: takeoff, land, relative and absolute
//! moves. Every verb can either run immediately or be appended to an action queue
//! executed later with [Piloting::execute_actions()].
//!
//! Immediate moves run on a background task. With `wait = false` the call returns
//! as soon as the task is started, the pass then reports its terminal error on the
//! [fault channel](Piloting::faults). With `wait = true` the caller is blocked until
//! the pass completes and gets its result directly.
//!
//! Queued actions are executed one at a time, in order. Immediate moves have no
//! such guarantee: two of them started concurrently will fight over the sticks, it
//! is up to the caller to cancel the previous one first.
//!
//! ```no_run
//! # async fn mission(drone: dji_pilot::Drone) -> dji_pilot::Result<()> {
//! use dji_pilot::subsystems::piloting::Action;
//!
//! drone.piloting.takeoff(false).await?;
//!
//! // Square of 10 m, executed later and in order
//! for _ in 0..4 {
//!     drone.piloting.move_by(0.0, 10.0, 0.0, 90.0, false, true).await?;
//! }
//! drone.piloting.add_action(Action::Land).await;
//! drone.piloting.execute_actions(None).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::lock::Mutex;
use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::geo::{enu_to_geodetic, wrap_180, wrap_360, Enu};
use crate::state::{StickCommand, Waypoint};
use crate::subsystems::navigation::{Navigator, PassOutcome};
use crate::{Error, Result};

/// A pending high-level action
pub enum Action {
    Takeoff,
    Land,
    /// Relative move, resolved against the telemetry at execution time
    MoveBy { x: f64, y: f64, z: f64, angle: f64 },
    MoveTo { lat: f64, lon: f64, alt: f64, heading: f64 },
    /// Arbitrary asynchronous action
    Custom(Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>),
}

impl Action {
    /// Wrap a closure returning a future as an action
    pub fn custom<F, Fut>(action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Action::Custom(Box::new(move || Box::pin(action())))
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Takeoff => write!(f, "Takeoff"),
            Action::Land => write!(f, "Land"),
            Action::MoveBy { x, y, z, angle } => write!(f, "MoveBy({}, {}, {}, {})", x, y, z, angle),
            Action::MoveTo { lat, lon, alt, heading } => {
                write!(f, "MoveTo({}, {}, {}, {})", lat, lon, alt, heading)
            }
            Action::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveKind {
    MoveBy,
    MoveTo,
}

/// Target of a relative move
///
/// `x` is to the right and `y` forward with respect to the heading of `base`, both
/// in meters. `z` is added to the altitude and `angle` (degrees) to the heading.
pub fn offset_waypoint(base: &Waypoint, x: f64, y: f64, z: f64, angle: f64) -> Waypoint {
    let theta_right = wrap_360(-base.head).to_radians();
    let theta_forward = wrap_360(90.0 - base.head).to_radians();

    let offset = Enu {
        east: x * theta_right.cos() + y * theta_forward.cos(),
        north: x * theta_right.sin() + y * theta_forward.sin(),
        up: 0.0,
    };
    let target = enu_to_geodetic(&offset, &base.position());

    Waypoint {
        lat: target.lat,
        lon: target.lon,
        alt: base.alt + z,
        head: wrap_180(base.head + angle),
        ..*base
    }
}

/// # Access to the piloting verbs
///
/// See the [piloting module documentation](crate::subsystems::piloting) for more
/// context and information.
pub struct Piloting {
    navigator: Navigator,
    actions: Mutex<VecDeque<Action>>,
    move_by_cancel: Mutex<Arc<AtomicBool>>,
    move_to_cancel: Mutex<Arc<AtomicBool>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    fault_tx: flume::Sender<Error>,
    fault_rx: flume::Receiver<Error>,
}

impl Piloting {
    /// Piloting on top of `navigator`, with an empty queue
    pub fn new(navigator: Navigator) -> Self {
        let (fault_tx, fault_rx) = flume::unbounded();

        Self {
            navigator,
            actions: Mutex::new(VecDeque::new()),
            move_by_cancel: Default::default(),
            move_to_cancel: Default::default(),
            in_flight: Mutex::new(Vec::new()),
            fault_tx,
            fault_rx,
        }
    }

    /// Controller running the passes
    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Errors of passes started with `wait = false`
    pub fn faults(&self) -> flume::Receiver<Error> {
        self.fault_rx.clone()
    }

    /// Climb by the configured height above the current position
    ///
    /// Runs the pass to completion unless `queue` is set.
    pub async fn takeoff(&self, queue: bool) -> Result<()> {
        if queue {
            self.add_action(Action::Takeoff).await;
            return Ok(());
        }

        info!("------ TAKEOFF ------");
        let target = self.navigator.takeoff_waypoint().await?;
        self.navigator.go_to(&target, &AtomicBool::new(false)).await?;
        Ok(())
    }

    /// Descend to the ground height over the configured descent time
    ///
    /// Runs the descent to completion unless `queue` is set, then releases the sticks.
    pub async fn land(&self, queue: bool) -> Result<()> {
        if queue {
            self.add_action(Action::Land).await;
            return Ok(());
        }

        info!("------ LAND ------");
        let descent_time = self.navigator.config().descent_time;
        self.navigator.descend(descent_time, &AtomicBool::new(false)).await?;
        self.stop().await
    }

    /// Move relative to the current position and heading
    ///
    /// `x` is to the right, `y` forward, `z` up, in meters. `angle` is added to the
    /// heading, in degrees.
    pub async fn move_by(&self, x: f64, y: f64, z: f64, angle: f64, wait: bool, queue: bool) -> Result<()> {
        if queue {
            self.add_action(Action::MoveBy { x, y, z, angle }).await;
            return Ok(());
        }

        // Armed before reading telemetry so that an early cancel is not lost
        let cancel = self.fresh_cancel(MoveKind::MoveBy).await;
        let base = self.navigator.current_waypoint().await?;
        let target = offset_waypoint(&base, x, y, z, angle);
        self.launch(MoveKind::MoveBy, target, cancel, wait).await
    }

    /// Move to an absolute position and heading
    ///
    /// Gimbal and zoom are kept as they are when the move starts.
    pub async fn move_to(&self, lat: f64, lon: f64, alt: f64, heading: f64, wait: bool, queue: bool) -> Result<()> {
        if queue {
            self.add_action(Action::MoveTo { lat, lon, alt, heading }).await;
            return Ok(());
        }

        let cancel = self.fresh_cancel(MoveKind::MoveTo).await;
        let current = self.navigator.current_waypoint().await?;
        let target = Waypoint {
            lat,
            lon,
            alt,
            head: wrap_180(heading),
            ..current
        };
        self.launch(MoveKind::MoveTo, target, cancel, wait).await
    }

    /// Cancel the relative move in progress, if any
    pub async fn cancel_move_by(&self) {
        self.move_by_cancel.lock().await.store(true, Relaxed);
    }

    /// Cancel the absolute move in progress, if any
    pub async fn cancel_move_to(&self) {
        self.move_to_cancel.lock().await.store(true, Relaxed);
    }

    /// Send the sticks back to neutral
    pub async fn stop(&self) -> Result<()> {
        self.navigator.link().send_stick(StickCommand::neutral()).await
    }

    /// Wait for all the moves started with `wait = false` to finish
    pub async fn wait_idle(&self) -> Result<()> {
        let handles: Vec<_> = self.in_flight.lock().await.drain(..).collect();
        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    /// Append an action at the end of the queue
    pub async fn add_action(&self, action: Action) {
        self.actions.lock().await.push_back(action);
    }

    /// Remove the action at `index` from the queue
    pub async fn remove_action(&self, index: usize) -> Result<Action> {
        let mut actions = self.actions.lock().await;
        let len = actions.len();
        actions.remove(index).ok_or_else(|| {
            Error::InvalidArgument(format!("no action at index {}, queue holds {}", index, len))
        })
    }

    /// Drop every queued action
    pub async fn clear_actions(&self) {
        self.actions.lock().await.clear();
    }

    /// Number of queued actions
    pub async fn pending_actions(&self) -> usize {
        self.actions.lock().await.len()
    }

    /// Execute up to `count` actions from the head of the queue, all of them if `None`
    ///
    /// Actions run one after the other. The first failing action stops the execution
    /// and its error is returned, the following actions stay in the queue. Returns the
    /// number of actions executed.
    pub async fn execute_actions(&self, count: Option<usize>) -> Result<usize> {
        let count = match count {
            Some(count) => count,
            None => self.pending_actions().await,
        };

        let mut executed = 0;
        while executed < count {
            // The lock is not held while an action runs, actions may queue new ones
            let action = match self.actions.lock().await.pop_front() {
                Some(action) => action,
                None => break,
            };
            info!("Executing queued action {:?}", action);
            self.execute(action).await?;
            executed += 1;
        }

        Ok(executed)
    }

    async fn execute(&self, action: Action) -> Result<()> {
        match action {
            Action::Takeoff => self.takeoff(false).await,
            Action::Land => self.land(false).await,
            Action::MoveBy { x, y, z, angle } => self.move_by(x, y, z, angle, true, false).await,
            Action::MoveTo { lat, lon, alt, heading } => self.move_to(lat, lon, alt, heading, true, false).await,
            Action::Custom(action) => action().await,
        }
    }

    async fn fresh_cancel(&self, kind: MoveKind) -> Arc<AtomicBool> {
        let slot = match kind {
            MoveKind::MoveBy => &self.move_by_cancel,
            MoveKind::MoveTo => &self.move_to_cancel,
        };
        let cancel = Arc::new(AtomicBool::new(false));
        *slot.lock().await = cancel.clone();
        cancel
    }

    async fn launch(&self, kind: MoveKind, target: Waypoint, cancel: Arc<AtomicBool>, wait: bool) -> Result<()> {
        let navigator = self.navigator.clone();

        if wait {
            let report = tokio::spawn(async move { navigator.go_to(&target, &cancel).await }).await??;
            if report.outcome == PassOutcome::Canceled {
                info!("{:?} cancelled", kind);
            }
            return Ok(());
        }

        let faults = self.fault_tx.clone();
        let handle = tokio::spawn(async move {
            match navigator.go_to(&target, &cancel).await {
                Ok(report) if report.outcome == PassOutcome::Canceled => info!("{:?} cancelled", kind),
                Ok(_) => (),
                Err(e) => {
                    error!("{:?} failed: {}", kind, e);
                    if faults.send(e).is_err() {
                        warn!("No one is listening to piloting faults");
                    }
                }
            }
        });

        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
        Ok(())
    }
}
