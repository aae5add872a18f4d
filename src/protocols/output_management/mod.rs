//! Server side of `wlr-output-management-unstable-v1`.
//!
//! [`OutputManagementState`] owns the registry of heads, the per-client instances of those
//! heads, the `done` serial and every configuration transaction in flight. It never talks to a
//! socket: outgoing events go through a [`Transport`], and whatever needs the layout owner's
//! attention is queued as a [`Notification`].

use std::collections::{BTreeMap, HashSet};
use std::mem;

use anyhow::bail;
use tracing::{debug, trace, warn};

mod configuration;
mod error;
mod head;
mod transport;
pub mod wayland;

#[cfg(test)]
pub(crate) mod testing;

pub use self::configuration::{
    Action, Configuration, ConfigurationHead, ConfigurationHeadKey, ConfigurationId,
    ConfigurationState, ConfiguredMode, Outcome,
};
pub use self::error::{ErrorInterface, Field, ProtocolError};
pub use self::head::{Head, HeadId, HeadMut, Mode, ModeId};
pub use self::transport::{ConfigurationEvent, HeadEvent, ManagerEvent, ModeEvent, Transport};
pub use self::wayland::{
    dispatch_notifications, OutputManagementGlobalData, OutputManagementHandler,
    WaylandOutputManagementState, WaylandTransport,
};

use self::head::HeadEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Answer apply and test on configurations created against an outdated serial with
    /// `cancelled`, and cancel still-open configurations whenever a new serial goes out.
    pub reject_stale_configurations: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reject_stale_configurations: true,
        }
    }
}

/// Something the layout owner should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<C> {
    HeadAdded(HeadId),
    ConfigurationCreated {
        client: C,
        configuration: ConfigurationId,
    },
    ClientStopped(C),
    HeadEnabled {
        configuration: ConfigurationId,
        head: HeadId,
    },
    HeadDisabled {
        configuration: ConfigurationId,
        head: HeadId,
    },
    /// The configuration passed validation; resolve it with succeeded, failed or cancelled.
    ReadyToApply(ConfigurationId),
    /// Same as [`Notification::ReadyToApply`], but nothing may actually change.
    ReadyToTest(ConfigurationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BindingId(u64);

/// One bound manager object.
#[derive(Debug)]
struct Binding<T: Transport> {
    id: BindingId,
    client: T::Client,
    manager: T::Manager,
}

pub struct OutputManagementState<T: Transport> {
    transport: T,
    options: Options,
    serial: u32,
    heads: Vec<HeadEntry<T>>,
    bindings: Vec<Binding<T>>,
    next_binding_id: u64,
    stopped: HashSet<T::Client>,
    configurations: BTreeMap<ConfigurationId, Configuration<T>>,
    next_configuration_id: u64,
    notifications: Vec<Notification<T::Client>>,
}

impl<T: Transport> OutputManagementState<T> {
    pub fn new(transport: T, options: Options) -> Self {
        Self {
            transport,
            options,
            serial: 0,
            heads: Vec::new(),
            bindings: Vec::new(),
            next_binding_id: 0,
            stopped: HashSet::new(),
            configurations: BTreeMap::new(),
            next_configuration_id: 0,
            notifications: Vec::new(),
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Serial of the last `done` sent to clients.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Registered heads in registry order.
    pub fn heads(&self) -> impl Iterator<Item = &Head> + '_ {
        self.heads.iter().map(|entry| &entry.head)
    }

    pub fn head(&self, id: HeadId) -> Option<&Head> {
        self.heads().find(|head| head.id() == id)
    }

    pub fn head_mut(&mut self, id: HeadId) -> Option<HeadMut<'_, T>> {
        let index = self.heads.iter().position(|entry| entry.head.id() == id)?;
        Some(HeadMut { state: self, index })
    }

    pub fn configuration(&self, id: ConfigurationId) -> Option<&Configuration<T>> {
        self.configurations.get(&id)
    }

    /// Configurations created against `serial`.
    pub fn configurations_with_serial(
        &self,
        serial: u32,
    ) -> impl Iterator<Item = ConfigurationId> + '_ {
        self.configurations
            .iter()
            .filter(move |(_, configuration)| configuration.serial() == serial)
            .map(|(id, _)| *id)
    }

    pub fn is_stopped(&self, client: &T::Client) -> bool {
        self.stopped.contains(client)
    }

    pub fn take_notifications(&mut self) -> Vec<Notification<T::Client>> {
        mem::take(&mut self.notifications)
    }

    /// Adds a head to the registry.
    ///
    /// Clients learn about it on their next bind or on [`Self::refresh`].
    pub fn register_head(&mut self, head: Head) -> HeadId {
        let id = head.id();
        if self.head(id).is_some() {
            debug!("head {:?} is already registered", head.name());
            return id;
        }

        debug!("registering head {:?}", head.name());
        self.heads.push(HeadEntry::new(head));
        self.notifications.push(Notification::HeadAdded(id));
        id
    }

    /// Advertises heads registered since the last refresh to every bound client.
    pub fn refresh(&mut self) {
        let _span = tracy_client::span!("OutputManagementState::refresh");

        let mut sent = false;
        for entry in &mut self.heads {
            if entry.announced {
                continue;
            }
            entry.announced = true;

            for binding in &self.bindings {
                sent |= entry.advertise(&mut self.transport, binding);
            }
        }

        if sent {
            self.broadcast_next_done();
        }
    }

    /// Removes a head from the registry and tells every client holding it.
    pub fn remove_head(&mut self, id: HeadId) -> anyhow::Result<Head> {
        let Some(index) = self.heads.iter().position(|entry| entry.head.id() == id) else {
            warn!("cannot remove head {id}: not registered");
            bail!("head {id} is not registered");
        };

        let mut entry = self.heads.remove(index);
        debug!("removing head {:?}", entry.head.name());
        entry.finish(&mut self.transport);

        if entry.published {
            self.broadcast_next_done();
        }

        Ok(entry.head)
    }

    /// Forgets a head instance after the client released it.
    pub fn release_head(&mut self, resource: &T::Head) {
        for entry in &mut self.heads {
            entry.proxies.retain(|proxy| proxy.resource != *resource);
        }
    }

    /// Forgets a mode instance after the client released it.
    pub fn release_mode(&mut self, resource: &T::Mode) {
        for proxy in self.heads.iter_mut().flat_map(|entry| &mut entry.proxies) {
            proxy.modes.retain(|(_, mode)| mode != resource);
        }
    }

    /// Records a new manager binding and sends it the current layout.
    pub fn bind(&mut self, client: T::Client, manager: T::Manager) {
        let _span = tracy_client::span!("OutputManagementState::bind");

        let binding = Binding {
            id: BindingId(self.next_binding_id),
            client,
            manager,
        };
        self.next_binding_id += 1;
        trace!("new binding for client {:?}", binding.client);

        for entry in &mut self.heads {
            entry.advertise(&mut self.transport, &binding);
        }
        self.transport
            .send_manager(&binding.manager, ManagerEvent::Done(self.serial));

        self.bindings.push(binding);
    }

    /// Drops a manager binding and the head instances created for it.
    pub fn unbind(&mut self, manager: &T::Manager) {
        let Some(index) = self
            .bindings
            .iter()
            .position(|binding| binding.manager == *manager)
        else {
            return;
        };

        let binding = self.bindings.remove(index);
        for entry in &mut self.heads {
            entry.forget_binding(binding.id);
        }

        // Stopping is tracked per client, so it lasts until the client's last manager is gone.
        if !self.bindings.iter().any(|b| b.client == binding.client) {
            self.stopped.remove(&binding.client);
        }
    }

    /// Sends `done` with the current serial to every binding.
    pub fn broadcast_done(&mut self) {
        for binding in &self.bindings {
            self.transport
                .send_manager(&binding.manager, ManagerEvent::Done(self.serial));
        }
    }

    /// Bumps the serial and sends `done` to every binding.
    pub fn broadcast_next_done(&mut self) {
        self.serial = self.serial.wrapping_add(1);
        self.broadcast_done();

        if self.options.reject_stale_configurations {
            self.cancel_stale_configurations();
        }
    }

    fn cancel_stale_configurations(&mut self) {
        for (id, configuration) in &mut self.configurations {
            if configuration.state != ConfigurationState::Open || configuration.serial == self.serial
            {
                continue;
            }

            debug!("cancelling outdated configuration {id}");
            configuration.state = ConfigurationState::Resolved(Outcome::Cancelled);
            self.transport
                .send_configuration(&configuration.resource, ConfigurationEvent::Cancelled);
        }
    }

    /// Starts a configuration transaction for `client`.
    ///
    /// `init` is called exactly once with the new id, or with `None` when the client has stopped,
    /// and returns the transport handle of the configuration object.
    pub fn create_configuration(
        &mut self,
        client: T::Client,
        serial: u32,
        init: impl FnOnce(Option<ConfigurationId>) -> T::Configuration,
    ) -> Option<ConfigurationId> {
        if self.stopped.contains(&client) {
            debug!("client {client:?} has stopped, not creating a configuration");
            init(None);
            return None;
        }

        let id = ConfigurationId(self.next_configuration_id);
        self.next_configuration_id += 1;

        let resource = init(Some(id));
        self.configurations.insert(
            id,
            Configuration::new(client.clone(), resource, serial),
        );
        self.notifications.push(Notification::ConfigurationCreated {
            client,
            configuration: id,
        });

        Some(id)
    }

    /// Marks `client` as no longer interested in configuring outputs.
    pub fn stop(&mut self, client: T::Client) {
        if self.stopped.insert(client.clone()) {
            debug!("client {client:?} stopped");
            self.notifications.push(Notification::ClientStopped(client));
        }
    }

    /// Forgets everything belonging to a client that went away.
    pub fn client_disconnected(&mut self, client: &T::Client) {
        let mut gone = Vec::new();
        self.bindings.retain(|binding| {
            let keep = binding.client != *client;
            if !keep {
                gone.push(binding.id);
            }
            keep
        });

        for entry in &mut self.heads {
            for binding in &gone {
                entry.forget_binding(*binding);
            }
        }

        self.configurations
            .retain(|_, configuration| configuration.client() != client);
        self.stopped.remove(client);
    }

    /// Tears down every client-side object, ending with `finished` on each manager.
    pub fn finished(&mut self) {
        for entry in &mut self.heads {
            entry.finish(&mut self.transport);
            entry.advertised.clear();
            entry.announced = false;
        }

        for binding in self.bindings.drain(..) {
            self.transport
                .send_manager(&binding.manager, ManagerEvent::Finished);
        }
    }
}
