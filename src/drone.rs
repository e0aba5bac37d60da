use std::sync::Arc;

use log::{info, warn};

use crate::config::Config;
use crate::subsystems::link::{Transport, VehicleLink};
use crate::subsystems::media::MediaPipeline;
use crate::subsystems::navigation::Navigator;
use crate::subsystems::piloting::Piloting;
use crate::Result;

/// # The Drone
///
/// Connection to one vehicle through its bridge, with every subsystem exposed as a
/// public field. All subsystems share the same [VehicleLink].
///
/// See the [dji-pilot crate root documentation](crate) for more context and information.
pub struct Drone {
    /// Raw access to the vehicle bridge
    pub link: VehicleLink,
    /// Waypoint navigation controller
    pub navigation: Navigator,
    /// Takeoff, landing, moves and action queue
    pub piloting: Arc<Piloting>,
    /// Video to movement pipeline
    pub media: MediaPipeline,
    config: Config,
}

impl Drone {
    /// Connect to the bridge described by `config`
    ///
    /// Builds an HTTP link and calls [Drone::connect_from_link()]. An error is
    /// returned if the configuration is invalid or if the vehicle does not answer.
    pub async fn connect(config: Config) -> Result<Self> {
        let link = VehicleLink::http(&config.link, config.control.max_authority)?;
        info!("Connecting to {}", config.link.base_url());

        Self::connect_from_link(link, config).await
    }

    /// Connect using an existing link
    ///
    /// The link is probed once, there is no retry.
    pub async fn connect_from_link(link: VehicleLink, config: Config) -> Result<Self> {
        config.control.validate()?;
        config.media.validate()?;
        link.connect().await?;

        let navigation = Navigator::new(link.clone(), config.control.clone());
        let piloting = Arc::new(Piloting::new(navigation.clone()));
        let media = MediaPipeline::new(link.clone(), piloting.clone(), config.media.clone())?;

        info!("Connected");
        Ok(Self {
            link,
            navigation,
            piloting,
            media,
            config,
        })
    }

    /// Connect through a custom [Transport]
    pub async fn connect_from_transport(transport: Arc<dyn Transport>, config: Config) -> Result<Self> {
        let link = VehicleLink::new(transport, config.control.max_authority)?;
        Self::connect_from_link(link, config).await
    }

    /// Configuration the drone was connected with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Disconnect the drone
    ///
    /// Stops the media pipeline if it was started and cancels the moves still in
    /// flight, then releases the sticks. Never fails, problems are only logged.
    pub async fn disconnect(&self) {
        if let Err(e) = self.media.stop().await {
            warn!("Media pipeline did not stop cleanly: {}", e);
        }
        self.piloting.cancel_move_by().await;
        self.piloting.cancel_move_to().await;
        if let Err(e) = self.piloting.wait_idle().await {
            warn!("Move failed before disconnecting: {}", e);
        }
        self.link.disconnect().await;
        info!("Disconnected");
    }
}
