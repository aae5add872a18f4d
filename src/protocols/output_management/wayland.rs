//! Wayland frontend: `Transport` over `wayland-server` plus the request dispatchers.

use std::marker::PhantomData;

use smithay::reexports::wayland_protocols_wlr::output_management::v1::server::{
    zwlr_output_configuration_head_v1, zwlr_output_configuration_v1, zwlr_output_head_v1,
    zwlr_output_manager_v1, zwlr_output_mode_v1,
};
use smithay::reexports::wayland_server::backend::ClientId;
use smithay::reexports::wayland_server::protocol::wl_output::Transform as WlTransform;
use smithay::reexports::wayland_server::{
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource, WEnum,
};
use smithay::utils::{Point, Transform};
use tracing::trace;
use zwlr_output_configuration_head_v1::ZwlrOutputConfigurationHeadV1;
use zwlr_output_configuration_v1::ZwlrOutputConfigurationV1;
use zwlr_output_head_v1::ZwlrOutputHeadV1;
use zwlr_output_manager_v1::ZwlrOutputManagerV1;
use zwlr_output_mode_v1::ZwlrOutputModeV1;

use super::configuration::{ConfigurationHeadKey, ConfigurationId};
use super::error::ProtocolError;
use super::head::{HeadId, ModeId};
use super::transport::{ConfigurationEvent, HeadEvent, ManagerEvent, ModeEvent, Transport};
use super::{Notification, Options, OutputManagementState};
use crate::utils::transform_to_raw;

/// Highest supported version. Version 4 (adaptive sync) is not implemented.
pub const VERSION: u32 = 3;

pub type WaylandOutputManagementState<D> = OutputManagementState<WaylandTransport<D>>;

pub struct WaylandTransport<D> {
    display: DisplayHandle,
    _state: PhantomData<fn() -> D>,
}

impl<D> WaylandTransport<D> {
    pub fn new(display: DisplayHandle) -> Self {
        Self {
            display,
            _state: PhantomData,
        }
    }
}

impl<D> Transport for WaylandTransport<D>
where
    D: Dispatch<ZwlrOutputHeadV1, HeadId>,
    D: Dispatch<ZwlrOutputModeV1, ModeId>,
    D: 'static,
{
    type Client = ClientId;
    type Manager = ZwlrOutputManagerV1;
    type Head = ZwlrOutputHeadV1;
    type Mode = ZwlrOutputModeV1;
    type Configuration = ZwlrOutputConfigurationV1;
    type ConfigurationHead = ZwlrOutputConfigurationHeadV1;

    fn create_head(&mut self, manager: &ZwlrOutputManagerV1, head: HeadId) -> Option<ZwlrOutputHeadV1> {
        let client = manager.client()?;
        client
            .create_resource::<ZwlrOutputHeadV1, _, D>(&self.display, manager.version(), head)
            .ok()
    }

    fn create_mode(&mut self, head: &ZwlrOutputHeadV1, mode: ModeId) -> Option<ZwlrOutputModeV1> {
        let client = head.client()?;
        client
            .create_resource::<ZwlrOutputModeV1, _, D>(&self.display, head.version(), mode)
            .ok()
    }

    fn send_manager(
        &mut self,
        manager: &ZwlrOutputManagerV1,
        event: ManagerEvent<'_, ZwlrOutputHeadV1>,
    ) {
        match event {
            ManagerEvent::Head(head) => manager.head(head),
            ManagerEvent::Done(serial) => manager.done(serial),
            ManagerEvent::Finished => manager.finished(),
        }
    }

    fn send_head(&mut self, head: &ZwlrOutputHeadV1, event: HeadEvent<'_, ZwlrOutputModeV1>) {
        match event {
            HeadEvent::Name(name) => head.name(name.to_owned()),
            HeadEvent::Description(description) => head.description(description.to_owned()),
            HeadEvent::PhysicalSize(size) => head.physical_size(size.w, size.h),
            HeadEvent::Mode(mode) => head.mode(mode),
            HeadEvent::Enabled(enabled) => head.enabled(i32::from(enabled)),
            HeadEvent::CurrentMode(mode) => head.current_mode(mode),
            HeadEvent::Position(position) => head.position(position.x, position.y),
            HeadEvent::Transform(transform) => head.transform(transform.into()),
            HeadEvent::Scale(scale) => head.scale(scale),
            HeadEvent::Finished => head.finished(),
        }
    }

    fn send_mode(&mut self, mode: &ZwlrOutputModeV1, event: ModeEvent) {
        match event {
            ModeEvent::Size(size) => mode.size(size.w, size.h),
            ModeEvent::Refresh(refresh) => mode.refresh(refresh),
            ModeEvent::Preferred => mode.preferred(),
            ModeEvent::Finished => mode.finished(),
        }
    }

    fn send_configuration(
        &mut self,
        configuration: &ZwlrOutputConfigurationV1,
        event: ConfigurationEvent,
    ) {
        match event {
            ConfigurationEvent::Succeeded => configuration.succeeded(),
            ConfigurationEvent::Failed => configuration.failed(),
            ConfigurationEvent::Cancelled => configuration.cancelled(),
        }
    }

    fn post_configuration_error(
        &mut self,
        configuration: &ZwlrOutputConfigurationV1,
        error: &ProtocolError,
    ) {
        configuration.post_error(error.code(), error.to_string());
    }

    fn post_configuration_head_error(
        &mut self,
        head: &ZwlrOutputConfigurationHeadV1,
        error: &ProtocolError,
    ) {
        head.post_error(error.code(), error.to_string());
    }
}

pub struct OutputManagementGlobalData {
    filter: Box<dyn for<'c> Fn(&'c Client) -> bool + Send + Sync>,
}

/// Implemented by the layout owner.
pub trait OutputManagementHandler:
    Sized
    + Dispatch<ZwlrOutputManagerV1, ()>
    + Dispatch<ZwlrOutputHeadV1, HeadId>
    + Dispatch<ZwlrOutputModeV1, ModeId>
    + Dispatch<ZwlrOutputConfigurationV1, Option<ConfigurationId>>
    + Dispatch<ZwlrOutputConfigurationHeadV1, Option<ConfigurationHeadKey>>
    + 'static
{
    fn output_management_state(&mut self) -> &mut WaylandOutputManagementState<Self>;

    /// A configuration passed validation and should be applied, then resolved.
    fn ready_to_apply(&mut self, configuration: ConfigurationId);
    /// A configuration passed validation and should be checked without applying it.
    fn ready_to_test(&mut self, configuration: ConfigurationId);

    fn head_added(&mut self, _head: HeadId) {}
    fn configuration_created(&mut self, _client: ClientId, _configuration: ConfigurationId) {}
    fn client_stopped(&mut self, _client: ClientId) {}
    fn head_enabled(&mut self, _configuration: ConfigurationId, _head: HeadId) {}
    fn head_disabled(&mut self, _configuration: ConfigurationId, _head: HeadId) {}
}

/// Hands queued notifications to the handler until none are left.
pub fn dispatch_notifications<D: OutputManagementHandler>(state: &mut D) {
    loop {
        let notifications = state.output_management_state().take_notifications();
        if notifications.is_empty() {
            break;
        }

        for notification in notifications {
            trace!("{notification:?}");
            match notification {
                Notification::HeadAdded(head) => state.head_added(head),
                Notification::ConfigurationCreated {
                    client,
                    configuration,
                } => state.configuration_created(client, configuration),
                Notification::ClientStopped(client) => state.client_stopped(client),
                Notification::HeadEnabled {
                    configuration,
                    head,
                } => state.head_enabled(configuration, head),
                Notification::HeadDisabled {
                    configuration,
                    head,
                } => state.head_disabled(configuration, head),
                Notification::ReadyToApply(configuration) => state.ready_to_apply(configuration),
                Notification::ReadyToTest(configuration) => state.ready_to_test(configuration),
            }
        }
    }
}

impl<D: OutputManagementHandler> WaylandOutputManagementState<D> {
    /// Creates the `zwlr_output_manager_v1` global, visible to clients passing `filter`.
    pub fn new_global<F>(display: &DisplayHandle, options: Options, version: u32, filter: F) -> Self
    where
        D: GlobalDispatch<ZwlrOutputManagerV1, OutputManagementGlobalData>,
        F: for<'c> Fn(&'c Client) -> bool + Send + Sync + 'static,
    {
        let global_data = OutputManagementGlobalData {
            filter: Box::new(filter),
        };
        display.create_global::<D, ZwlrOutputManagerV1, _>(version.clamp(1, VERSION), global_data);

        Self::new(WaylandTransport::new(display.clone()), options)
    }
}

impl<D> GlobalDispatch<ZwlrOutputManagerV1, OutputManagementGlobalData, D>
    for WaylandOutputManagementState<D>
where
    D: GlobalDispatch<ZwlrOutputManagerV1, OutputManagementGlobalData>,
    D: OutputManagementHandler,
{
    fn bind(
        state: &mut D,
        _display: &DisplayHandle,
        client: &Client,
        manager: New<ZwlrOutputManagerV1>,
        _global_data: &OutputManagementGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        let manager = data_init.init(manager, ());
        state.output_management_state().bind(client.id(), manager);
    }

    fn can_view(client: Client, global_data: &OutputManagementGlobalData) -> bool {
        (global_data.filter)(&client)
    }
}

impl<D: OutputManagementHandler> Dispatch<ZwlrOutputManagerV1, (), D>
    for WaylandOutputManagementState<D>
{
    fn request(
        state: &mut D,
        client: &Client,
        _manager: &ZwlrOutputManagerV1,
        request: zwlr_output_manager_v1::Request,
        _data: &(),
        _display: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        let om = state.output_management_state();
        match request {
            zwlr_output_manager_v1::Request::CreateConfiguration { id, serial } => {
                om.create_configuration(client.id(), serial, |configuration| {
                    data_init.init(id, configuration)
                });
            }
            zwlr_output_manager_v1::Request::Stop => om.stop(client.id()),
            _ => unreachable!(),
        }

        dispatch_notifications(state);
    }

    fn destroyed(state: &mut D, _client: ClientId, manager: &ZwlrOutputManagerV1, _data: &()) {
        state.output_management_state().unbind(manager);
    }
}

impl<D: OutputManagementHandler> Dispatch<ZwlrOutputHeadV1, HeadId, D>
    for WaylandOutputManagementState<D>
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _head: &ZwlrOutputHeadV1,
        request: zwlr_output_head_v1::Request,
        _data: &HeadId,
        _display: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            zwlr_output_head_v1::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, head: &ZwlrOutputHeadV1, _data: &HeadId) {
        state.output_management_state().release_head(head);
    }
}

impl<D: OutputManagementHandler> Dispatch<ZwlrOutputModeV1, ModeId, D>
    for WaylandOutputManagementState<D>
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _mode: &ZwlrOutputModeV1,
        request: zwlr_output_mode_v1::Request,
        _data: &ModeId,
        _display: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            zwlr_output_mode_v1::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, mode: &ZwlrOutputModeV1, _data: &ModeId) {
        state.output_management_state().release_mode(mode);
    }
}

impl<D: OutputManagementHandler> Dispatch<ZwlrOutputConfigurationV1, Option<ConfigurationId>, D>
    for WaylandOutputManagementState<D>
{
    fn request(
        state: &mut D,
        _client: &Client,
        _configuration: &ZwlrOutputConfigurationV1,
        request: zwlr_output_configuration_v1::Request,
        data: &Option<ConfigurationId>,
        _display: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        // Configurations of stopped clients are inert.
        let Some(configuration) = *data else {
            if let zwlr_output_configuration_v1::Request::EnableHead { id, .. } = request {
                data_init.init(id, None);
            }
            return;
        };

        let om = state.output_management_state();
        // Errors were already posted to the client.
        let _ = match request {
            zwlr_output_configuration_v1::Request::EnableHead { id, head } => {
                match head.data::<HeadId>() {
                    Some(head) => om.enable_head(configuration, *head, |key| data_init.init(id, key)),
                    None => {
                        data_init.init(id, None);
                        Ok(())
                    }
                }
            }
            zwlr_output_configuration_v1::Request::DisableHead { head } => match head.data::<HeadId>() {
                Some(head) => om.disable_head(configuration, *head),
                None => Ok(()),
            },
            zwlr_output_configuration_v1::Request::Apply => om.apply(configuration),
            zwlr_output_configuration_v1::Request::Test => om.test(configuration),
            zwlr_output_configuration_v1::Request::Destroy => Ok(()),
            _ => unreachable!(),
        };

        dispatch_notifications(state);
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        _configuration: &ZwlrOutputConfigurationV1,
        data: &Option<ConfigurationId>,
    ) {
        if let Some(configuration) = *data {
            state
                .output_management_state()
                .destroy_configuration(configuration);
        }
    }
}

impl<D: OutputManagementHandler>
    Dispatch<ZwlrOutputConfigurationHeadV1, Option<ConfigurationHeadKey>, D>
    for WaylandOutputManagementState<D>
{
    fn request(
        state: &mut D,
        _client: &Client,
        _head: &ZwlrOutputConfigurationHeadV1,
        request: zwlr_output_configuration_head_v1::Request,
        data: &Option<ConfigurationHeadKey>,
        _display: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        let Some(key) = *data else {
            return;
        };

        let om = state.output_management_state();
        // Errors were already posted to the client.
        let _ = match request {
            zwlr_output_configuration_head_v1::Request::SetMode { mode } => {
                om.set_mode(key, mode.data::<ModeId>().copied())
            }
            zwlr_output_configuration_head_v1::Request::SetCustomMode {
                width,
                height,
                refresh,
            } => om.set_custom_mode(key, width, height, refresh),
            zwlr_output_configuration_head_v1::Request::SetPosition { x, y } => {
                om.set_position(key, Point::from((x, y)))
            }
            zwlr_output_configuration_head_v1::Request::SetTransform { transform } => {
                om.set_transform(key, raw_transform(transform))
            }
            zwlr_output_configuration_head_v1::Request::SetScale { scale } => om.set_scale(key, scale),
            _ => unreachable!(),
        };
    }
}

fn raw_transform(transform: WEnum<WlTransform>) -> i32 {
    let transform = match transform {
        WEnum::Value(WlTransform::Normal) => Transform::Normal,
        WEnum::Value(WlTransform::_90) => Transform::_90,
        WEnum::Value(WlTransform::_180) => Transform::_180,
        WEnum::Value(WlTransform::_270) => Transform::_270,
        WEnum::Value(WlTransform::Flipped) => Transform::Flipped,
        WEnum::Value(WlTransform::Flipped90) => Transform::Flipped90,
        WEnum::Value(WlTransform::Flipped180) => Transform::Flipped180,
        WEnum::Value(WlTransform::Flipped270) => Transform::Flipped270,
        WEnum::Unknown(raw) => return i32::try_from(raw).unwrap_or(-1),
        _ => return -1,
    };
    transform_to_raw(transform)
}

#[macro_export]
macro_rules! delegate_output_management {
    ($(@<$( $lt:tt $( : $clt:tt $(+ $dlt:tt )* )? ),+>)? $ty: ty) => {
        smithay::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_manager_v1::ZwlrOutputManagerV1: $crate::protocols::output_management::OutputManagementGlobalData
        ] => $crate::protocols::output_management::wayland::WaylandOutputManagementState<$ty>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_manager_v1::ZwlrOutputManagerV1: ()
        ] => $crate::protocols::output_management::wayland::WaylandOutputManagementState<$ty>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_head_v1::ZwlrOutputHeadV1: $crate::protocols::output_management::HeadId
        ] => $crate::protocols::output_management::wayland::WaylandOutputManagementState<$ty>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_mode_v1::ZwlrOutputModeV1: $crate::protocols::output_management::ModeId
        ] => $crate::protocols::output_management::wayland::WaylandOutputManagementState<$ty>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_configuration_v1::ZwlrOutputConfigurationV1: ::core::option::Option<$crate::protocols::output_management::ConfigurationId>
        ] => $crate::protocols::output_management::wayland::WaylandOutputManagementState<$ty>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_configuration_head_v1::ZwlrOutputConfigurationHeadV1: ::core::option::Option<$crate::protocols::output_management::ConfigurationHeadKey>
        ] => $crate::protocols::output_management::wayland::WaylandOutputManagementState<$ty>);
    };
}
