// on / off / toggle
use crate::config::Settings;
use crate::controller::{AssociationController, Direction, EndpointAssociationState, Outcome, TurnOnMode};
use crate::remote::ControlPlane;
use crate::retry::{Deadline, PollPolicy};
use anyhow::{Context, Result};
use std::time::Duration;

fn report(direction: Direction, outcome: Outcome, endpoint_id: &str) {
    let (target, verb) = match direction {
        Direction::On => ("on", "Association"),
        Direction::Off => ("off", "Disassociation"),
    };
    match outcome {
        Outcome::Requested => println!("✓ {} of {} requested", verb, endpoint_id),
        Outcome::AlreadyInState => println!("✓ {} is already {}", endpoint_id, target),
        Outcome::AlreadyInFlight => println!("✓ {} is already turning {}", endpoint_id, target),
    }
}

fn wait<C: ControlPlane + ?Sized>(
    controller: &AssociationController<'_, C>,
    endpoint_id: &str,
    target: EndpointAssociationState,
    timeout: u64,
) -> Result<()> {
    println!("Waiting up to {}s for {} to become {}...", timeout, endpoint_id, target);
    let deadline = Deadline::after(Duration::from_secs(timeout));
    controller
        .wait_for(endpoint_id, &target, &deadline, &PollPolicy::default())
        .with_context(|| format!("Endpoint {} did not settle", endpoint_id))?;
    println!("✓ {} is {}", endpoint_id, target);
    Ok(())
}

pub fn handle_on<C: ControlPlane + ?Sized>(
    remote: &C,
    settings: &Settings,
    wait_for: bool,
    timeout: u64,
    strict: bool,
) -> Result<()> {
    let mode = if strict {
        TurnOnMode::Strict
    } else {
        TurnOnMode::Idempotent
    };
    let controller = AssociationController::new(remote).with_mode(mode);
    let outcome = controller
        .turn_on(&settings.endpoint_id, &settings.subnet_id)
        .with_context(|| format!("Failed to turn on {}", settings.endpoint_id))?;
    report(Direction::On, outcome, &settings.endpoint_id);

    if wait_for && outcome != Outcome::AlreadyInState {
        wait(&controller, &settings.endpoint_id, EndpointAssociationState::Associated, timeout)?;
    }
    Ok(())
}

pub fn handle_off<C: ControlPlane + ?Sized>(
    remote: &C,
    settings: &Settings,
    wait_for: bool,
    timeout: u64,
) -> Result<()> {
    let controller = AssociationController::new(remote);
    let outcome = controller
        .turn_off(&settings.endpoint_id)
        .with_context(|| format!("Failed to turn off {}", settings.endpoint_id))?;
    report(Direction::Off, outcome, &settings.endpoint_id);

    if wait_for && outcome != Outcome::AlreadyInState {
        wait(&controller, &settings.endpoint_id, EndpointAssociationState::NotAssociated, timeout)?;
    }
    Ok(())
}

pub fn handle_toggle<C: ControlPlane + ?Sized>(remote: &C, settings: &Settings) -> Result<()> {
    let toggled = AssociationController::new(remote)
        .toggle(&settings.endpoint_id, &settings.subnet_id)
        .with_context(|| format!("Failed to toggle {}", settings.endpoint_id))?;
    report(toggled.direction, toggled.outcome, &settings.endpoint_id);
    Ok(())
}
