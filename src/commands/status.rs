use crate::config::Settings;
use crate::controller::{AssociationController, EndpointAssociationState};
use crate::remote::ControlPlane;
use anyhow::{Context, Result};

pub fn handle_status<C: ControlPlane + ?Sized>(remote: &C, settings: &Settings) -> Result<()> {
    let controller = AssociationController::new(remote);
    let state = controller
        .query_state(&settings.endpoint_id)
        .with_context(|| format!("Failed to query endpoint {}", settings.endpoint_id))?;

    println!("Endpoint {}: {}", settings.endpoint_id, state);
    if state == EndpointAssociationState::Associated {
        if let Some(record) = controller.association(&settings.endpoint_id)? {
            println!(
                "  association {} -> {} ({})",
                record.association_id, record.subnet_id, record.status_code
            );
        }
    }
    if state.is_transient() {
        println!("  a transition is in progress; check again in a minute");
    }
    Ok(())
}
