//! Heads, their modes, and the mutation path that fans changes out to clients.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, ensure};
use smithay::utils::{Logical, Physical, Point, Raw, Size, Transform};
use tracing::{trace, warn};

use super::transport::{HeadEvent, ManagerEvent, ModeEvent, Transport};
use super::{Binding, BindingId, OutputManagementState};

static NEXT_HEAD_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeadId(u64);

impl HeadId {
    fn next() -> Self {
        Self(NEXT_HEAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModeId(u64);

impl ModeId {
    fn next() -> Self {
        Self(NEXT_MODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One supported size and refresh rate of a head.
#[derive(Debug, Clone, PartialEq)]
pub struct Mode {
    id: ModeId,
    size: Size<i32, Physical>,
    /// Refresh rate in mHz.
    refresh: i32,
}

impl Mode {
    pub fn new((w, h): (i32, i32), refresh: i32) -> anyhow::Result<Self> {
        ensure!(w > 0 && h > 0, "mode size must be positive, got {w}x{h}");
        ensure!(refresh > 0, "mode refresh must be positive, got {refresh}");

        Ok(Self {
            id: ModeId::next(),
            size: Size::from((w, h)),
            refresh,
        })
    }

    pub fn id(&self) -> ModeId {
        self.id
    }

    pub fn size(&self) -> Size<i32, Physical> {
        self.size
    }

    pub fn refresh(&self) -> i32 {
        self.refresh
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}.{:03}",
            self.size.w,
            self.size.h,
            self.refresh / 1000,
            self.refresh % 1000
        )
    }
}

/// Advertised state of one output.
///
/// Built by the layout owner and handed to
/// [`OutputManagementState::register_head`]. The setters here only validate and
/// mutate; once registered, changes go through [`HeadMut`] so that clients hear
/// about them.
#[derive(Debug, Clone)]
pub struct Head {
    id: HeadId,
    name: Option<String>,
    description: Option<String>,
    /// Physical size in millimeters.
    physical_size: Size<i32, Raw>,
    enabled: bool,
    position: Point<i32, Logical>,
    transform: Transform,
    scale: f64,
    modes: Vec<Mode>,
    current_mode: Option<ModeId>,
    preferred_mode: Option<ModeId>,
}

impl Default for Head {
    fn default() -> Self {
        Self::new()
    }
}

impl Head {
    pub fn new() -> Self {
        Self {
            id: HeadId::next(),
            name: None,
            description: None,
            physical_size: Size::from((0, 0)),
            enabled: true,
            position: Point::from((0, 0)),
            transform: Transform::Normal,
            scale: 1.,
            modes: Vec::new(),
            current_mode: None,
            preferred_mode: None,
        }
    }

    pub fn id(&self) -> HeadId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    pub fn physical_size(&self) -> Size<i32, Raw> {
        self.physical_size
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn position(&self) -> Point<i32, Logical> {
        self.position
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.id == id)
    }

    pub fn current_mode(&self) -> Option<&Mode> {
        self.current_mode.and_then(|id| self.mode(id))
    }

    pub fn preferred_mode(&self) -> Option<&Mode> {
        self.preferred_mode.and_then(|id| self.mode(id))
    }

    /// The name does not change over the lifetime of the head, so only the first non-empty
    /// value is accepted.
    pub fn set_name(&mut self, name: impl Into<String>) -> anyhow::Result<bool> {
        let name = name.into();
        if let Some(current) = &self.name {
            bail!("head {current:?} already has a name, cannot rename to {name:?}");
        }
        if name.is_empty() {
            return Ok(false);
        }

        self.name = Some(name);
        Ok(true)
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> anyhow::Result<bool> {
        let description = description.into();
        ensure!(
            self.description.is_none(),
            "head {:?} already has a description",
            self.name()
        );
        if description.is_empty() {
            return Ok(false);
        }

        self.description = Some(description);
        Ok(true)
    }

    /// Size in millimeters. Zero means unknown.
    pub fn set_physical_size(&mut self, (w, h): (i32, i32)) -> anyhow::Result<bool> {
        ensure!(
            w >= 0 && h >= 0,
            "physical size of head {:?} must not be negative, got {w}x{h}",
            self.name()
        );

        let size = Size::from((w, h));
        if self.physical_size == size {
            return Ok(false);
        }

        self.physical_size = size;
        Ok(true)
    }

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }

        self.enabled = enabled;
        true
    }

    pub fn set_position(&mut self, position: impl Into<Point<i32, Logical>>) -> anyhow::Result<bool> {
        let position = position.into();
        ensure!(
            self.enabled,
            "cannot change position of disabled head {:?}",
            self.name()
        );
        if self.position == position {
            return Ok(false);
        }

        self.position = position;
        Ok(true)
    }

    pub fn set_transform(&mut self, transform: Transform) -> anyhow::Result<bool> {
        ensure!(
            self.enabled,
            "cannot change transform of disabled head {:?}",
            self.name()
        );
        if self.transform == transform {
            return Ok(false);
        }

        self.transform = transform;
        Ok(true)
    }

    pub fn set_scale(&mut self, scale: f64) -> anyhow::Result<bool> {
        ensure!(
            self.enabled,
            "cannot change scale of disabled head {:?}",
            self.name()
        );
        ensure!(
            scale.is_finite() && scale > 0.,
            "scale must be positive, got {scale}"
        );
        if self.scale == scale {
            return Ok(false);
        }

        self.scale = scale;
        Ok(true)
    }

    pub fn add_mode(&mut self, mode: Mode) -> anyhow::Result<ModeId> {
        ensure!(
            self.mode(mode.id).is_none(),
            "mode {mode} was already added to head {:?}",
            self.name()
        );

        let id = mode.id;
        self.modes.push(mode);
        Ok(id)
    }

    pub fn set_current_mode(&mut self, mode: ModeId) -> anyhow::Result<bool> {
        ensure!(
            self.mode(mode).is_some(),
            "cannot set current mode of head {:?}: add the mode first",
            self.name()
        );
        if self.current_mode == Some(mode) {
            return Ok(false);
        }

        self.current_mode = Some(mode);
        Ok(true)
    }

    pub fn set_preferred_mode(&mut self, mode: ModeId) -> anyhow::Result<bool> {
        ensure!(
            self.mode(mode).is_some(),
            "cannot set preferred mode of head {:?}: add the mode first",
            self.name()
        );
        if self.preferred_mode == Some(mode) {
            return Ok(false);
        }

        self.preferred_mode = Some(mode);
        Ok(true)
    }
}

/// Per-binding instance of a head and its modes.
#[derive(Debug)]
pub(super) struct HeadProxy<T: Transport> {
    pub binding: BindingId,
    pub resource: T::Head,
    pub modes: Vec<(ModeId, T::Mode)>,
}

impl<T: Transport> HeadProxy<T> {
    pub fn mode(&self, id: ModeId) -> Option<&T::Mode> {
        self.modes
            .iter()
            .find(|(mode, _)| *mode == id)
            .map(|(_, resource)| resource)
    }
}

/// A registered head together with its client-side instances.
#[derive(Debug)]
pub(super) struct HeadEntry<T: Transport> {
    pub head: Head,
    /// Whether the head was sent to at least one client. Modes are frozen from then on.
    pub published: bool,
    /// Whether existing bindings were told about this head, at bind time or by a refresh.
    pub announced: bool,
    /// Bindings this head was advertised to, including ones whose proxy got released.
    pub advertised: Vec<BindingId>,
    pub proxies: Vec<HeadProxy<T>>,
}

impl<T: Transport> HeadEntry<T> {
    pub fn new(head: Head) -> Self {
        Self {
            head,
            published: false,
            announced: false,
            advertised: Vec::new(),
            proxies: Vec::new(),
        }
    }

    /// Sends the full head state to one binding. Returns whether anything was sent.
    pub fn advertise(&mut self, transport: &mut T, binding: &Binding<T>) -> bool {
        if self.advertised.contains(&binding.id) {
            return false;
        }
        self.advertised.push(binding.id);

        let Some(resource) = transport.create_head(&binding.manager, self.head.id) else {
            trace!(
                "not advertising head {:?}, client is gone",
                self.head.name()
            );
            return false;
        };
        self.published = true;

        let head = &self.head;
        transport.send_manager(&binding.manager, ManagerEvent::Head(&resource));
        transport.send_head(&resource, HeadEvent::Name(head.name()));
        transport.send_head(&resource, HeadEvent::Description(head.description()));
        if head.physical_size.w > 0 && head.physical_size.h > 0 {
            transport.send_head(&resource, HeadEvent::PhysicalSize(head.physical_size));
        }
        transport.send_head(&resource, HeadEvent::Enabled(head.enabled));
        if head.enabled {
            transport.send_head(&resource, HeadEvent::Position(head.position));
            transport.send_head(&resource, HeadEvent::Transform(head.transform));
            transport.send_head(&resource, HeadEvent::Scale(head.scale));
        }

        let mut modes = Vec::with_capacity(head.modes.len());
        for mode in &head.modes {
            let Some(mode_resource) = transport.create_mode(&resource, mode.id) else {
                continue;
            };

            transport.send_head(&resource, HeadEvent::Mode(&mode_resource));
            transport.send_mode(&mode_resource, ModeEvent::Size(mode.size));
            transport.send_mode(&mode_resource, ModeEvent::Refresh(mode.refresh));
            if head.enabled && head.current_mode == Some(mode.id) {
                transport.send_head(&resource, HeadEvent::CurrentMode(&mode_resource));
            }
            if head.preferred_mode == Some(mode.id) {
                transport.send_mode(&mode_resource, ModeEvent::Preferred);
            }

            modes.push((mode.id, mode_resource));
        }

        self.proxies.push(HeadProxy {
            binding: binding.id,
            resource,
            modes,
        });
        true
    }

    /// Sends `finished` for every proxy and forgets them.
    pub fn finish(&mut self, transport: &mut T) {
        for proxy in self.proxies.drain(..) {
            for (_, mode) in &proxy.modes {
                transport.send_mode(mode, ModeEvent::Finished);
            }
            transport.send_head(&proxy.resource, HeadEvent::Finished);
        }
    }

    pub fn forget_binding(&mut self, binding: BindingId) {
        self.advertised.retain(|id| *id != binding);
        self.proxies.retain(|proxy| proxy.binding != binding);
    }
}

/// Mutable access to a registered head.
///
/// Every effective change is sent to all clients holding the head, followed by a `done` with a
/// fresh serial.
pub struct HeadMut<'a, T: Transport> {
    pub(super) state: &'a mut OutputManagementState<T>,
    pub(super) index: usize,
}

impl<T: Transport> HeadMut<'_, T> {
    pub fn head(&self) -> &Head {
        &self.state.heads[self.index].head
    }

    pub fn is_published(&self) -> bool {
        self.state.heads[self.index].published
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> anyhow::Result<()> {
        let name = name.into();
        self.update(|head| head.set_name(name))?;
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> anyhow::Result<()> {
        let description = description.into();
        self.update(|head| head.set_description(description))?;
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) -> anyhow::Result<()> {
        if self.update(|head| Ok(head.set_enabled(enabled)))? {
            self.broadcast(|transport, head, proxy| {
                transport.send_head(&proxy.resource, HeadEvent::Enabled(enabled));

                // Clients drop position, transform, scale and mode of disabled heads.
                if enabled {
                    transport.send_head(&proxy.resource, HeadEvent::Position(head.position));
                    transport.send_head(&proxy.resource, HeadEvent::Transform(head.transform));
                    transport.send_head(&proxy.resource, HeadEvent::Scale(head.scale));
                    if let Some(mode) = head.current_mode.and_then(|id| proxy.mode(id)) {
                        transport.send_head(&proxy.resource, HeadEvent::CurrentMode(mode));
                    }
                }
            });
        }
        Ok(())
    }

    pub fn set_physical_size(&mut self, size: (i32, i32)) -> anyhow::Result<()> {
        if self.update(|head| head.set_physical_size(size))? {
            self.broadcast(|transport, head, proxy| {
                transport.send_head(&proxy.resource, HeadEvent::PhysicalSize(head.physical_size));
            });
        }
        Ok(())
    }

    pub fn set_position(&mut self, position: impl Into<Point<i32, Logical>>) -> anyhow::Result<()> {
        let position = position.into();
        if self.update(|head| head.set_position(position))? {
            self.broadcast(|transport, _, proxy| {
                transport.send_head(&proxy.resource, HeadEvent::Position(position));
            });
        }
        Ok(())
    }

    pub fn set_transform(&mut self, transform: Transform) -> anyhow::Result<()> {
        if self.update(|head| head.set_transform(transform))? {
            self.broadcast(|transport, _, proxy| {
                transport.send_head(&proxy.resource, HeadEvent::Transform(transform));
            });
        }
        Ok(())
    }

    pub fn set_scale(&mut self, scale: f64) -> anyhow::Result<()> {
        if self.update(|head| head.set_scale(scale))? {
            self.broadcast(|transport, _, proxy| {
                transport.send_head(&proxy.resource, HeadEvent::Scale(scale));
            });
        }
        Ok(())
    }

    /// Adds a mode. Only possible until the head has been advertised to a client.
    pub fn add_mode(&mut self, mode: Mode) -> anyhow::Result<ModeId> {
        if self.is_published() {
            let err = anyhow::anyhow!(
                "cannot add mode {mode} to head {:?} after it has been advertised",
                self.head().name()
            );
            warn!("{err:#}");
            return Err(err);
        }

        let head = &mut self.state.heads[self.index].head;
        head.add_mode(mode).inspect_err(|err| warn!("{err:#}"))
    }

    pub fn set_current_mode(&mut self, mode: ModeId) -> anyhow::Result<()> {
        let changed = self.update(|head| head.set_current_mode(mode))?;
        // Disabled heads get their current mode when re-enabled.
        if changed && self.head().is_enabled() {
            self.broadcast(|transport, _, proxy| {
                if let Some(resource) = proxy.mode(mode) {
                    transport.send_head(&proxy.resource, HeadEvent::CurrentMode(resource));
                }
            });
        }
        Ok(())
    }

    pub fn set_preferred_mode(&mut self, mode: ModeId) -> anyhow::Result<()> {
        if self.update(|head| head.set_preferred_mode(mode))? {
            self.broadcast(|transport, _, proxy| {
                if let Some(resource) = proxy.mode(mode) {
                    transport.send_mode(resource, ModeEvent::Preferred);
                }
            });
        }
        Ok(())
    }

    fn update(&mut self, f: impl FnOnce(&mut Head) -> anyhow::Result<bool>) -> anyhow::Result<bool> {
        let head = &mut self.state.heads[self.index].head;
        f(head).inspect_err(|err| warn!("{err:#}"))
    }

    fn broadcast(&mut self, mut send: impl FnMut(&mut T, &Head, &HeadProxy<T>)) {
        let state = &mut *self.state;
        let entry = &state.heads[self.index];
        if !entry.published {
            return;
        }

        for proxy in &entry.proxies {
            send(&mut state.transport, &entry.head, proxy);
        }
        state.broadcast_next_done();
    }
}
