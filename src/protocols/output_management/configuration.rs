//! Configuration transactions.
//!
//! A client addresses every head exactly once, either enabling it (which yields a
//! [`ConfigurationHead`] to fill in) or disabling it, then asks to apply or test. The layout owner
//! answers with exactly one of succeeded, failed or cancelled.

use std::fmt;

use smithay::utils::{Logical, Physical, Point, Size, Transform};
use tracing::{debug, warn};

use super::error::{Field, ProtocolError};
use super::head::{Head, HeadId, ModeId};
use super::transport::{ConfigurationEvent, Transport};
use super::{Notification, OutputManagementState};
use crate::utils::transform_from_raw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigurationId(pub(super) u64);

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one enabled head within one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigurationHeadKey {
    pub configuration: ConfigurationId,
    pub head: HeadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Apply,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl From<Outcome> for ConfigurationEvent {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Succeeded => ConfigurationEvent::Succeeded,
            Outcome::Failed => ConfigurationEvent::Failed,
            Outcome::Cancelled => ConfigurationEvent::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationState {
    /// Still accepting head requests.
    Open,
    /// Validated and handed to the layout owner.
    Pending(Action),
    Resolved(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfiguredMode {
    Existing(ModeId),
    /// Head without modes, the compositor picks.
    Implicit,
    Custom {
        size: Size<i32, Physical>,
        /// Refresh rate in mHz.
        refresh: i32,
    },
}

/// Requested state of one enabled head. Every field is written at most once.
#[derive(Debug)]
pub struct ConfigurationHead<T: Transport> {
    head: HeadId,
    resource: T::ConfigurationHead,
    mode: Option<ConfiguredMode>,
    position: Option<Point<i32, Logical>>,
    transform: Option<Transform>,
    scale: Option<f64>,
}

impl<T: Transport> ConfigurationHead<T> {
    pub fn head(&self) -> HeadId {
        self.head
    }

    pub fn resource(&self) -> &T::ConfigurationHead {
        &self.resource
    }

    pub fn mode(&self) -> Option<ConfiguredMode> {
        self.mode
    }

    pub fn position(&self) -> Option<Point<i32, Logical>> {
        self.position
    }

    pub fn transform(&self) -> Option<Transform> {
        self.transform
    }

    pub fn scale(&self) -> Option<f64> {
        self.scale
    }
}

#[derive(Debug)]
pub struct Configuration<T: Transport> {
    pub(super) client: T::Client,
    pub(super) resource: T::Configuration,
    pub(super) serial: u32,
    pub(super) state: ConfigurationState,
    /// Whether the client already asked to apply or test.
    submitted: bool,
    /// Enabled and disabled heads in request order.
    addressed: Vec<HeadId>,
    enabled: Vec<ConfigurationHead<T>>,
    disabled: Vec<HeadId>,
}

impl<T: Transport> Configuration<T> {
    pub(super) fn new(client: T::Client, resource: T::Configuration, serial: u32) -> Self {
        Self {
            client,
            resource,
            serial,
            state: ConfigurationState::Open,
            submitted: false,
            addressed: Vec::new(),
            enabled: Vec::new(),
            disabled: Vec::new(),
        }
    }

    pub fn client(&self) -> &T::Client {
        &self.client
    }

    pub fn resource(&self) -> &T::Configuration {
        &self.resource
    }

    /// Serial the client created this configuration against.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn state(&self) -> ConfigurationState {
        self.state
    }

    pub fn addressed_heads(&self) -> &[HeadId] {
        &self.addressed
    }

    pub fn enabled_heads(&self) -> &[ConfigurationHead<T>] {
        &self.enabled
    }

    pub fn enabled_head(&self, head: HeadId) -> Option<&ConfigurationHead<T>> {
        self.enabled.iter().find(|entry| entry.head == head)
    }

    pub fn disabled_heads(&self) -> &[HeadId] {
        &self.disabled
    }

    pub fn is_addressed(&self, head: HeadId) -> bool {
        self.addressed.contains(&head)
    }

    /// Whether client requests are still accepted.
    ///
    /// A configuration the compositor cancelled before the client used it silently drops further
    /// requests, since the client may not have seen `cancelled` yet.
    fn accepts_requests(&self) -> Result<bool, ProtocolError> {
        match self.state {
            ConfigurationState::Open => Ok(true),
            _ if self.submitted => Err(ProtocolError::AlreadyUsed),
            _ => Ok(false),
        }
    }
}

impl<T: Transport> OutputManagementState<T> {
    /// Handles `enable_head`.
    ///
    /// `init` is called exactly once and returns the transport handle of the new configuration
    /// head. It gets `None` when the request is rejected or ignored, so the object stays inert.
    pub fn enable_head(
        &mut self,
        configuration: ConfigurationId,
        head: HeadId,
        init: impl FnOnce(Option<ConfigurationHeadKey>) -> T::ConfigurationHead,
    ) -> Result<(), ProtocolError> {
        let key = ConfigurationHeadKey {
            configuration,
            head,
        };

        if let Err(err) = self.address_head(configuration, head) {
            init(None);
            return err.map_or(Ok(()), Err);
        }

        let resource = init(Some(key));
        let Some(conf) = self.configurations.get_mut(&configuration) else {
            return Ok(());
        };
        conf.addressed.push(head);
        conf.enabled.push(ConfigurationHead {
            head,
            resource,
            mode: None,
            position: None,
            transform: None,
            scale: None,
        });

        self.notifications.push(Notification::HeadEnabled {
            configuration,
            head,
        });
        Ok(())
    }

    /// Handles `disable_head`.
    pub fn disable_head(
        &mut self,
        configuration: ConfigurationId,
        head: HeadId,
    ) -> Result<(), ProtocolError> {
        if let Err(err) = self.address_head(configuration, head) {
            return err.map_or(Ok(()), Err);
        }

        let Some(conf) = self.configurations.get_mut(&configuration) else {
            return Ok(());
        };
        conf.addressed.push(head);
        conf.disabled.push(head);

        self.notifications.push(Notification::HeadDisabled {
            configuration,
            head,
        });
        Ok(())
    }

    /// Checks whether `head` may be addressed by `configuration`.
    ///
    /// `Err(None)` means the request should be dropped silently.
    fn address_head(
        &mut self,
        configuration: ConfigurationId,
        head: HeadId,
    ) -> Result<(), Option<ProtocolError>> {
        let Some(conf) = self.configurations.get(&configuration) else {
            debug!("ignoring head request on destroyed configuration {configuration}");
            return Err(None);
        };

        match conf.accepts_requests() {
            Ok(true) => (),
            Ok(false) => {
                debug!("ignoring head request on cancelled configuration {configuration}");
                return Err(None);
            }
            Err(err) => {
                self.transport.post_configuration_error(&conf.resource, &err);
                return Err(Some(err));
            }
        }

        let Some(target) = self.heads.iter().find(|entry| entry.head.id() == head) else {
            debug!("ignoring request for removed head {head} in configuration {configuration}");
            return Err(None);
        };

        if conf.is_addressed(head) {
            let err = ProtocolError::AlreadyConfiguredHead(target.head.name().to_owned());
            debug!("configuration {configuration}: {err}");
            self.transport.post_configuration_error(&conf.resource, &err);
            return Err(Some(err));
        }

        Ok(())
    }

    /// Handles `set_mode`. `None` selects the implicit mode of a head that has none.
    pub fn set_mode(
        &mut self,
        key: ConfigurationHeadKey,
        mode: Option<ModeId>,
    ) -> Result<(), ProtocolError> {
        self.update_configuration_head(key, |head, entry| {
            if entry.mode.is_some() {
                return Err(ProtocolError::AlreadySet(Field::Mode));
            }

            let mode = match mode {
                Some(id) if head.mode(id).is_some() => ConfiguredMode::Existing(id),
                None if head.modes().is_empty() => ConfiguredMode::Implicit,
                _ => return Err(ProtocolError::InvalidMode),
            };

            entry.mode = Some(mode);
            Ok(())
        })
    }

    pub fn set_custom_mode(
        &mut self,
        key: ConfigurationHeadKey,
        width: i32,
        height: i32,
        refresh: i32,
    ) -> Result<(), ProtocolError> {
        self.update_configuration_head(key, |_, entry| {
            if width <= 0 || height <= 0 || refresh <= 0 {
                return Err(ProtocolError::InvalidCustomMode {
                    width,
                    height,
                    refresh,
                });
            }
            if entry.mode.is_some() {
                return Err(ProtocolError::AlreadySet(Field::Mode));
            }

            entry.mode = Some(ConfiguredMode::Custom {
                size: Size::from((width, height)),
                refresh,
            });
            Ok(())
        })
    }

    pub fn set_position(
        &mut self,
        key: ConfigurationHeadKey,
        position: Point<i32, Logical>,
    ) -> Result<(), ProtocolError> {
        self.update_configuration_head(key, |_, entry| {
            if entry.position.is_some() {
                return Err(ProtocolError::AlreadySet(Field::Position));
            }

            entry.position = Some(position);
            Ok(())
        })
    }

    /// Handles `set_transform` with the raw `wl_output.transform` value.
    pub fn set_transform(
        &mut self,
        key: ConfigurationHeadKey,
        transform: i32,
    ) -> Result<(), ProtocolError> {
        self.update_configuration_head(key, |_, entry| {
            let Some(value) = transform_from_raw(transform) else {
                return Err(ProtocolError::InvalidTransform(transform));
            };
            if entry.transform.is_some() {
                return Err(ProtocolError::AlreadySet(Field::Transform));
            }

            entry.transform = Some(value);
            Ok(())
        })
    }

    pub fn set_scale(&mut self, key: ConfigurationHeadKey, scale: f64) -> Result<(), ProtocolError> {
        self.update_configuration_head(key, |_, entry| {
            if !(scale.is_finite() && scale > 0.) {
                return Err(ProtocolError::InvalidScale(scale));
            }
            if entry.scale.is_some() {
                return Err(ProtocolError::AlreadySet(Field::Scale));
            }

            entry.scale = Some(scale);
            Ok(())
        })
    }

    fn update_configuration_head(
        &mut self,
        key: ConfigurationHeadKey,
        f: impl FnOnce(&Head, &mut ConfigurationHead<T>) -> Result<(), ProtocolError>,
    ) -> Result<(), ProtocolError> {
        let Some(conf) = self.configurations.get_mut(&key.configuration) else {
            debug!(
                "ignoring request on destroyed configuration {}",
                key.configuration
            );
            return Ok(());
        };

        match conf.accepts_requests() {
            Ok(true) => (),
            Ok(false) => {
                debug!(
                    "ignoring request on cancelled configuration {}",
                    key.configuration
                );
                return Ok(());
            }
            Err(err) => {
                self.transport.post_configuration_error(&conf.resource, &err);
                return Err(err);
            }
        }

        let Some(head) = self.heads.iter().find(|entry| entry.head.id() == key.head) else {
            debug!(
                "ignoring request for removed head {} in configuration {}",
                key.head, key.configuration
            );
            return Ok(());
        };

        let Some(entry) = conf.enabled.iter_mut().find(|entry| entry.head == key.head) else {
            return Ok(());
        };

        f(&head.head, &mut *entry).inspect_err(|err| {
            debug!("configuration {}: {err}", key.configuration);
            self.transport
                .post_configuration_head_error(&entry.resource, err);
        })
    }

    pub fn apply(&mut self, configuration: ConfigurationId) -> Result<(), ProtocolError> {
        self.submit(configuration, Action::Apply)
    }

    pub fn test(&mut self, configuration: ConfigurationId) -> Result<(), ProtocolError> {
        self.submit(configuration, Action::Test)
    }

    fn submit(&mut self, id: ConfigurationId, action: Action) -> Result<(), ProtocolError> {
        let _span = tracy_client::span!("OutputManagementState::submit");

        let Some(conf) = self.configurations.get_mut(&id) else {
            debug!("ignoring {action:?} on destroyed configuration {id}");
            return Ok(());
        };

        match conf.accepts_requests() {
            Ok(true) => (),
            Ok(false) => {
                debug!("ignoring {action:?} on cancelled configuration {id}");
                return Ok(());
            }
            Err(err) => {
                self.transport.post_configuration_error(&conf.resource, &err);
                return Err(err);
            }
        }

        if self.options.reject_stale_configurations && conf.serial != self.serial {
            debug!(
                "cancelling configuration {id}: serial {} is outdated, current is {}",
                conf.serial, self.serial
            );
            conf.submitted = true;
            conf.state = ConfigurationState::Resolved(Outcome::Cancelled);
            self.transport
                .send_configuration(&conf.resource, ConfigurationEvent::Cancelled);
            return Ok(());
        }

        // The registry may have changed since the client started, so check against what is
        // there now.
        let missing = self
            .heads
            .iter()
            .map(|entry| &entry.head)
            .find(|head| !conf.addressed.contains(&head.id()));
        if let Some(head) = missing {
            let err = ProtocolError::UnconfiguredHead(head.name().to_owned());
            debug!("configuration {id}: {err}");
            self.transport.post_configuration_error(&conf.resource, &err);
            return Err(err);
        }

        conf.submitted = true;
        conf.state = ConfigurationState::Pending(action);
        self.notifications.push(match action {
            Action::Apply => Notification::ReadyToApply(id),
            Action::Test => Notification::ReadyToTest(id),
        });
        Ok(())
    }

    pub fn send_succeeded(&mut self, configuration: ConfigurationId) -> anyhow::Result<()> {
        self.resolve(configuration, Outcome::Succeeded)
    }

    pub fn send_failed(&mut self, configuration: ConfigurationId) -> anyhow::Result<()> {
        self.resolve(configuration, Outcome::Failed)
    }

    pub fn send_cancelled(&mut self, configuration: ConfigurationId) -> anyhow::Result<()> {
        self.resolve(configuration, Outcome::Cancelled)
    }

    fn resolve(&mut self, id: ConfigurationId, outcome: Outcome) -> anyhow::Result<()> {
        let Some(conf) = self.configurations.get_mut(&id) else {
            debug!("configuration {id} is gone, dropping {outcome:?}");
            return Ok(());
        };

        let allowed = match conf.state {
            ConfigurationState::Pending(_) => true,
            ConfigurationState::Open => outcome == Outcome::Cancelled,
            ConfigurationState::Resolved(_) => false,
        };
        if !allowed {
            let err = anyhow::anyhow!(
                "cannot resolve configuration {id} as {outcome:?} while it is {:?}",
                conf.state
            );
            warn!("{err:#}");
            return Err(err);
        }

        conf.state = ConfigurationState::Resolved(outcome);
        self.transport
            .send_configuration(&conf.resource, outcome.into());
        Ok(())
    }

    /// Handles `destroy`. Allowed in any state.
    pub fn destroy_configuration(&mut self, configuration: ConfigurationId) -> Option<Configuration<T>> {
        self.configurations.remove(&configuration)
    }
}
