//! Layout owner for the headless server.
//!
//! Heads come from the config and never drive real hardware, so applying a configuration only
//! updates what clients see.

use std::collections::HashSet;

use anyhow::{bail, ensure, Context};
use smithay::utils::{Logical, Point, Transform};
use tracing::{debug, info, warn};
use wlr_output_management_config::{self as config, Config};

use crate::protocols::output_management::{
    Action, ConfigurationId, ConfiguredMode, Head, HeadId, Mode, ModeId, OutputManagementState,
    Transport,
};
use crate::utils::transform_from_config;

/// Name of the head created when the config has none.
pub const FALLBACK_HEAD_NAME: &str = "HEADLESS-1";

/// Builds the heads described by the config, in config order.
pub fn build_heads(config: &Config) -> anyhow::Result<Vec<Head>> {
    if config.heads.is_empty() {
        return Ok(vec![fallback_head()?]);
    }

    let mut seen = HashSet::new();
    config
        .heads
        .iter()
        .map(|head| {
            ensure!(
                seen.insert(head.name.as_str()),
                "head {:?} is configured more than once",
                head.name
            );
            build_head(head).with_context(|| format!("error creating head {:?}", head.name))
        })
        .collect()
}

fn fallback_head() -> anyhow::Result<Head> {
    let mut head = Head::new();
    head.set_name(FALLBACK_HEAD_NAME)?;
    head.set_description("Headless output")?;

    let mode = head.add_mode(Mode::new((1920, 1080), 60_000)?)?;
    head.set_current_mode(mode)?;
    head.set_preferred_mode(mode)?;
    Ok(head)
}

fn build_head(config: &config::Head) -> anyhow::Result<Head> {
    ensure!(!config.name.is_empty(), "head name must not be empty");

    let mut head = Head::new();
    head.set_name(config.name.as_str())?;
    if let Some(description) = &config.description {
        head.set_description(description.as_str())?;
    }
    if let Some(size) = config.physical_size {
        head.set_physical_size((size.width, size.height))?;
    }

    for mode in &config.modes {
        let spec = mode.mode;
        let id = head.add_mode(Mode::new((spec.width, spec.height), spec.refresh)?)?;
        if mode.current {
            head.set_current_mode(id)?;
        }
        if mode.preferred {
            head.set_preferred_mode(id)?;
        }
    }

    if let Some(position) = config.position {
        head.set_position((position.x, position.y))?;
    }
    head.set_transform(transform_from_config(config.transform))?;
    if let Some(scale) = config.scale {
        head.set_scale(scale.0)?;
    }

    // Last, since the other properties can only change on enabled heads.
    if config.off {
        head.set_enabled(false);
    }

    Ok(head)
}

pub fn register<T: Transport>(state: &mut OutputManagementState<T>, heads: Vec<Head>) {
    for head in heads {
        info!("adding virtual head {:?}", head.name());
        state.register_head(head);
    }
    state.refresh();
}

/// Target state of one head after a configuration.
#[derive(Debug)]
struct HeadTarget {
    head: HeadId,
    mode: Option<ModeId>,
    position: Option<Point<i32, Logical>>,
    transform: Option<Transform>,
    scale: Option<f64>,
}

/// Validates a pending configuration, returning what to change.
fn plan<T: Transport>(
    state: &OutputManagementState<T>,
    id: ConfigurationId,
) -> anyhow::Result<(Vec<HeadTarget>, Vec<HeadId>)> {
    let Some(configuration) = state.configuration(id) else {
        bail!("configuration {id} does not exist");
    };

    ensure!(
        !configuration.enabled_heads().is_empty(),
        "configuration would disable every head"
    );

    let mut targets = Vec::new();
    for requested in configuration.enabled_heads() {
        let head = state
            .head(requested.head())
            .with_context(|| format!("head {} is no longer registered", requested.head()))?;

        let mode = match requested.mode() {
            Some(mode) => resolve_mode(head, mode)?,
            None => None,
        };

        targets.push(HeadTarget {
            head: head.id(),
            mode,
            position: requested.position(),
            transform: requested.transform(),
            scale: requested.scale(),
        });
    }

    Ok((targets, configuration.disabled_heads().to_vec()))
}

/// Virtual heads can only switch between the modes they list.
fn resolve_mode(head: &Head, mode: ConfiguredMode) -> anyhow::Result<Option<ModeId>> {
    match mode {
        ConfiguredMode::Existing(id) => {
            ensure!(
                head.mode(id).is_some(),
                "mode {id} does not belong to head {:?}",
                head.name()
            );
            Ok(Some(id))
        }
        ConfiguredMode::Implicit => {
            ensure!(
                head.modes().is_empty(),
                "head {:?} has modes, an implicit mode is not allowed",
                head.name()
            );
            Ok(None)
        }
        ConfiguredMode::Custom { size, refresh } => {
            let listed = head
                .modes()
                .iter()
                .find(|mode| mode.size() == size && mode.refresh() == refresh)
                .with_context(|| {
                    format!(
                        "head {:?} does not support custom mode {}x{}@{refresh}",
                        head.name(),
                        size.w,
                        size.h
                    )
                })?;
            Ok(Some(listed.id()))
        }
    }
}

/// Checks a configuration without changing anything.
pub fn check<T: Transport>(
    state: &OutputManagementState<T>,
    id: ConfigurationId,
) -> anyhow::Result<()> {
    plan(state, id).map(|_| ())
}

/// Checks a configuration and updates the heads to match it.
pub fn apply<T: Transport>(
    state: &mut OutputManagementState<T>,
    id: ConfigurationId,
) -> anyhow::Result<()> {
    let (targets, disabled) = plan(state, id)?;

    for head in disabled {
        let mut head = state
            .head_mut(head)
            .with_context(|| format!("head {head} is no longer registered"))?;
        head.set_enabled(false)?;
    }

    for target in targets {
        let mut head = state
            .head_mut(target.head)
            .with_context(|| format!("head {} is no longer registered", target.head))?;

        head.set_enabled(true)?;
        if let Some(mode) = target.mode {
            head.set_current_mode(mode)?;
        }
        if let Some(position) = target.position {
            head.set_position(position)?;
        }
        if let Some(transform) = target.transform {
            head.set_transform(transform)?;
        }
        if let Some(scale) = target.scale {
            head.set_scale(scale)?;
        }
    }

    Ok(())
}

/// Resolves a configuration that passed protocol validation.
pub fn handle_ready<T: Transport>(
    state: &mut OutputManagementState<T>,
    id: ConfigurationId,
    action: Action,
) {
    let _span = tracy_client::span!("virtual_outputs::handle_ready");

    let res = match action {
        Action::Apply => apply(state, id),
        Action::Test => check(state, id),
    };

    let res = match res {
        Ok(()) => {
            debug!("configuration {id} succeeded ({action:?})");
            state.send_succeeded(id)
        }
        Err(err) => {
            info!("configuration {id} failed ({action:?}): {err:#}");
            state.send_failed(id)
        }
    };

    if let Err(err) = res {
        warn!("error resolving configuration {id}: {err:?}");
    }
}
