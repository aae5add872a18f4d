use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use calloop::channel::{self, Sender};
use calloop::generic::Generic;
use calloop::signals::{Signal, Signals};
use calloop::{EventLoop, Interest, LoopSignal, Mode, PostAction};
use smithay::reexports::wayland_server::backend::{ClientData, ClientId, DisconnectReason};
use smithay::reexports::wayland_server::{Display, DisplayHandle};
use smithay::wayland::socket::ListeningSocketSource;
use tracing::{debug, info, warn};
use wlr_output_management_config::Config;

use crate::delegate_output_management;
use crate::protocols::output_management::{
    Action, ConfigurationId, OutputManagementHandler, Options, WaylandOutputManagementState,
};
use crate::virtual_outputs;

pub struct State {
    pub display_handle: DisplayHandle,
    pub loop_signal: LoopSignal,
    pub socket_name: OsString,
    pub output_management: WaylandOutputManagementState<State>,
}

pub struct ClientState {
    disconnected: Sender<ClientId>,
}

impl State {
    pub fn new(
        config: &Config,
        event_loop: &mut EventLoop<'static, State>,
        display: Display<State>,
        socket_name: Option<&str>,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("State::new");

        let display_handle = display.handle();
        let loop_handle = event_loop.handle();

        let options = Options {
            reject_stale_configurations: !config.output_management.accept_stale_configurations,
        };
        let mut output_management = WaylandOutputManagementState::<State>::new_global(
            &display_handle,
            options,
            config.output_management.version,
            |client| client.get_data::<ClientState>().is_some(),
        );
        let heads = virtual_outputs::build_heads(config).context("error creating virtual heads")?;
        virtual_outputs::register(&mut output_management, heads);

        let socket_source = match socket_name {
            Some(name) => ListeningSocketSource::with_name(name),
            None => ListeningSocketSource::new_auto(),
        }
        .context("error creating Wayland socket")?;
        let socket_name = socket_source.socket_name().to_os_string();

        let (disconnected, disconnected_rx) = channel::channel();
        loop_handle
            .insert_source(socket_source, move |client, _, state| {
                let data = Arc::new(ClientState {
                    disconnected: disconnected.clone(),
                });
                if let Err(err) = state.display_handle.insert_client(client, data) {
                    warn!("error inserting client: {err}");
                }
            })
            .map_err(|err| err.error)
            .context("error inserting socket source")?;

        loop_handle
            .insert_source(disconnected_rx, |event, _, state| {
                if let channel::Event::Msg(client) = event {
                    state.output_management.client_disconnected(&client);
                }
            })
            .map_err(|err| err.error)
            .context("error inserting client channel")?;

        let display_source = Generic::new(display, Interest::READ, Mode::Level);
        loop_handle
            .insert_source(display_source, |_, display, state| {
                // SAFETY: we don't drop the display.
                let res = unsafe { display.get_mut().dispatch_clients(state) };
                if let Err(err) = res {
                    warn!("error dispatching clients: {err}");
                }
                Ok(PostAction::Continue)
            })
            .map_err(|err| err.error)
            .context("error inserting display source")?;

        let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
            .context("error creating signal source")?;
        loop_handle
            .insert_source(signals, |event, _, state| {
                info!("received {:?}, exiting", event.signal());
                state.loop_signal.stop();
            })
            .map_err(|err| err.error)
            .context("error inserting signal source")?;

        Ok(Self {
            display_handle,
            loop_signal: event_loop.get_signal(),
            socket_name,
            output_management,
        })
    }

    pub fn refresh_and_flush_clients(&mut self) {
        let _span = tracy_client::span!("State::refresh_and_flush_clients");

        self.output_management.refresh();

        if let Err(err) = self.display_handle.flush_clients() {
            warn!("error flushing clients: {err}");
        }
    }

    /// Tells every client that the global is going away.
    pub fn shutdown(&mut self) {
        self.output_management.finished();

        if let Err(err) = self.display_handle.flush_clients() {
            warn!("error flushing clients: {err}");
        }
    }
}

impl OutputManagementHandler for State {
    fn output_management_state(&mut self) -> &mut WaylandOutputManagementState<Self> {
        &mut self.output_management
    }

    fn ready_to_apply(&mut self, configuration: ConfigurationId) {
        virtual_outputs::handle_ready(&mut self.output_management, configuration, Action::Apply);
    }

    fn ready_to_test(&mut self, configuration: ConfigurationId) {
        virtual_outputs::handle_ready(&mut self.output_management, configuration, Action::Test);
    }

    fn client_stopped(&mut self, client: ClientId) {
        debug!("client {client:?} no longer configures outputs");
    }
}
delegate_output_management!(State);

impl ClientData for ClientState {
    fn initialized(&self, _client_id: ClientId) {}

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        debug!("client {client_id:?} disconnected: {reason:?}");
        // Fails only once the event loop is gone.
        let _ = self.disconnected.send(client_id);
    }
}
