//! Outgoing half of the protocol runtime.
//!
//! The state machine never touches sockets or object ids directly. Everything
//! it needs from the runtime goes through [`Transport`]: creating the
//! server-side head and mode objects for a client, and sending events on the
//! per-client objects it holds.

use std::fmt;
use std::hash::Hash;

use smithay::utils::{Logical, Physical, Point, Raw, Size, Transform};

use super::error::ProtocolError;
use super::head::{HeadId, ModeId};

/// Events of `zwlr_output_manager_v1`.
#[derive(Debug)]
pub enum ManagerEvent<'a, H> {
    Head(&'a H),
    Done(u32),
    Finished,
}

/// Events of `zwlr_output_head_v1`.
#[derive(Debug)]
pub enum HeadEvent<'a, M> {
    Name(&'a str),
    Description(&'a str),
    PhysicalSize(Size<i32, Raw>),
    Mode(&'a M),
    Enabled(bool),
    CurrentMode(&'a M),
    Position(Point<i32, Logical>),
    Transform(Transform),
    Scale(f64),
    Finished,
}

/// Events of `zwlr_output_mode_v1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeEvent {
    Size(Size<i32, Physical>),
    /// Refresh rate in mHz.
    Refresh(i32),
    Preferred,
    Finished,
}

/// Events of `zwlr_output_configuration_v1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationEvent {
    Succeeded,
    Failed,
    Cancelled,
}

pub trait Transport {
    /// Identity of a client connection.
    type Client: Clone + Eq + Hash + fmt::Debug;
    type Manager: Clone + PartialEq + fmt::Debug;
    type Head: Clone + PartialEq + fmt::Debug;
    type Mode: Clone + PartialEq + fmt::Debug;
    type Configuration: Clone + PartialEq + fmt::Debug;
    type ConfigurationHead: Clone + PartialEq + fmt::Debug;

    /// Creates a head object for the client owning `manager`.
    ///
    /// Returns `None` if the client is gone.
    fn create_head(&mut self, manager: &Self::Manager, head: HeadId) -> Option<Self::Head>;

    /// Creates a mode object for the client owning `head`.
    fn create_mode(&mut self, head: &Self::Head, mode: ModeId) -> Option<Self::Mode>;

    fn send_manager(&mut self, manager: &Self::Manager, event: ManagerEvent<'_, Self::Head>);
    fn send_head(&mut self, head: &Self::Head, event: HeadEvent<'_, Self::Mode>);
    fn send_mode(&mut self, mode: &Self::Mode, event: ModeEvent);
    fn send_configuration(
        &mut self,
        configuration: &Self::Configuration,
        event: ConfigurationEvent,
    );

    fn post_configuration_error(
        &mut self,
        configuration: &Self::Configuration,
        error: &ProtocolError,
    );
    fn post_configuration_head_error(
        &mut self,
        head: &Self::ConfigurationHead,
        error: &ProtocolError,
    );
}
