//! Recording [`Transport`] for tests.

use std::collections::HashSet;
use std::fmt;
use std::mem;

use super::{
    ConfigurationEvent, ErrorInterface, HeadEvent, HeadId, ManagerEvent, ModeEvent, ModeId,
    ProtocolError, Transport,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Handle {
    pub client: u32,
    pub name: String,
}

impl Handle {
    pub fn new(client: u32, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }
}

/// Records every event as `client: object.event`.
#[derive(Default)]
pub(crate) struct Recorder {
    next_object: u32,
    events: Vec<String>,
    pub errors: Vec<ProtocolError>,
    /// Clients whose objects can no longer be created.
    pub gone: HashSet<u32>,
}

impl Recorder {
    fn object(&mut self, client: u32, kind: &str) -> Option<Handle> {
        if self.gone.contains(&client) {
            return None;
        }

        let handle = Handle::new(client, format!("{kind}{}", self.next_object));
        self.next_object += 1;
        Some(handle)
    }

    fn log(&mut self, handle: &Handle, event: impl fmt::Display) {
        self.events
            .push(format!("{}: {}.{event}", handle.client, handle.name));
    }

    fn post(&mut self, handle: &Handle, error: &ProtocolError) {
        self.log(handle, format_args!("error {} {error}", error.code()));
        self.errors.push(error.clone());
    }

    pub fn take_events(&mut self) -> Vec<String> {
        mem::take(&mut self.events)
    }
}

impl Transport for Recorder {
    type Client = u32;
    type Manager = Handle;
    type Head = Handle;
    type Mode = Handle;
    type Configuration = Handle;
    type ConfigurationHead = Handle;

    fn create_head(&mut self, manager: &Handle, _head: HeadId) -> Option<Handle> {
        self.object(manager.client, "head")
    }

    fn create_mode(&mut self, head: &Handle, _mode: ModeId) -> Option<Handle> {
        self.object(head.client, "mode")
    }

    fn send_manager(&mut self, manager: &Handle, event: ManagerEvent<'_, Handle>) {
        match event {
            ManagerEvent::Head(head) => self.log(manager, format_args!("head {}", head.name)),
            ManagerEvent::Done(serial) => self.log(manager, format_args!("done {serial}")),
            ManagerEvent::Finished => self.log(manager, "finished"),
        }
    }

    fn send_head(&mut self, head: &Handle, event: HeadEvent<'_, Handle>) {
        match event {
            HeadEvent::Name(name) => self.log(head, format_args!("name {name:?}")),
            HeadEvent::Description(description) => {
                self.log(head, format_args!("description {description:?}"))
            }
            HeadEvent::PhysicalSize(size) => {
                self.log(head, format_args!("physical_size {}x{}", size.w, size.h))
            }
            HeadEvent::Mode(mode) => self.log(head, format_args!("mode {}", mode.name)),
            HeadEvent::Enabled(enabled) => self.log(head, format_args!("enabled {enabled}")),
            HeadEvent::CurrentMode(mode) => {
                self.log(head, format_args!("current_mode {}", mode.name))
            }
            HeadEvent::Position(position) => {
                self.log(head, format_args!("position {},{}", position.x, position.y))
            }
            HeadEvent::Transform(transform) => {
                self.log(head, format_args!("transform {transform:?}"))
            }
            HeadEvent::Scale(scale) => self.log(head, format_args!("scale {scale}")),
            HeadEvent::Finished => self.log(head, "finished"),
        }
    }

    fn send_mode(&mut self, mode: &Handle, event: ModeEvent) {
        match event {
            ModeEvent::Size(size) => self.log(mode, format_args!("size {}x{}", size.w, size.h)),
            ModeEvent::Refresh(refresh) => self.log(mode, format_args!("refresh {refresh}")),
            ModeEvent::Preferred => self.log(mode, "preferred"),
            ModeEvent::Finished => self.log(mode, "finished"),
        }
    }

    fn send_configuration(&mut self, configuration: &Handle, event: ConfigurationEvent) {
        let event = match event {
            ConfigurationEvent::Succeeded => "succeeded",
            ConfigurationEvent::Failed => "failed",
            ConfigurationEvent::Cancelled => "cancelled",
        };
        self.log(configuration, event);
    }

    fn post_configuration_error(&mut self, configuration: &Handle, error: &ProtocolError) {
        assert_eq!(error.interface(), ErrorInterface::Configuration);
        self.post(configuration, error);
    }

    fn post_configuration_head_error(&mut self, head: &Handle, error: &ProtocolError) {
        assert_eq!(error.interface(), ErrorInterface::ConfigurationHead);
        self.post(head, error);
    }
}
