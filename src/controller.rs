//! Association state controller.
//!
//! Drives the endpoint's target-network association towards on or off. The
//! remote control plane is the only source of truth: every decision re-reads
//! the state right before acting, and transient states are never acted on.

use crate::error::{VpnError, VpnResult};
use crate::remote::{AssociationRecord, ControlPlane, RemoteError};
use crate::retry::{poll_until, retry_transient, Deadline, Poll, PollPolicy, RetryPolicy};
use std::fmt;
use tracing::{debug, info};

/// Rejection code the remote returns when the default route already exists
const DUPLICATE_ROUTE_CODE: &str = "InvalidClientVpnDuplicateRoute";

/// Remote-observed association state of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAssociationState {
    NotAssociated,
    Associating,
    Associated,
    Disassociating,
    /// A status code this controller doesn't understand, kept verbatim
    Unknown(String),
}

impl EndpointAssociationState {
    /// Total mapping from endpoint status codes
    pub fn from_endpoint_code(code: &str) -> Self {
        match code {
            "pending-associate" => Self::NotAssociated,
            "available" => Self::Associated,
            "associating" => Self::Associating,
            "disassociating" => Self::Disassociating,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Associating | Self::Disassociating)
    }

    /// Association progress is reported on the target network record, not on
    /// the endpoint, so a stable endpoint status is overridden by an
    /// in-flight record.
    fn refine(self, records: &[AssociationRecord]) -> Self {
        if !matches!(self, Self::NotAssociated | Self::Associated) {
            return self;
        }
        for record in records {
            match record.status_code.as_str() {
                "associating" => return Self::Associating,
                "disassociating" => return Self::Disassociating,
                _ => {}
            }
        }
        self
    }
}

impl fmt::Display for EndpointAssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAssociated => f.write_str("not associated (off)"),
            Self::Associating => f.write_str("associating"),
            Self::Associated => f.write_str("associated (on)"),
            Self::Disassociating => f.write_str("disassociating"),
            Self::Unknown(code) => write!(f, "unknown ({})", code),
        }
    }
}

/// How `turn_on` treats an endpoint that is already associated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnOnMode {
    /// Already associated counts as success
    #[default]
    Idempotent,
    /// Already associated is an error, as in the legacy tool
    Strict,
}

/// What a lifecycle call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Requests were issued and acknowledged; the transition is now in flight
    Requested,
    /// The endpoint was already in the desired state; nothing was issued
    AlreadyInState,
    /// The same transition was already in flight; nothing was issued
    AlreadyInFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub direction: Direction,
    pub outcome: Outcome,
}

pub struct AssociationController<'a, C: ControlPlane + ?Sized> {
    remote: &'a C,
    retry: RetryPolicy,
    mode: TurnOnMode,
}

impl<'a, C: ControlPlane + ?Sized> AssociationController<'a, C> {
    pub fn new(remote: &'a C) -> Self {
        Self {
            remote,
            retry: RetryPolicy::default(),
            mode: TurnOnMode::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_mode(mut self, mode: TurnOnMode) -> Self {
        self.mode = mode;
        self
    }

    /// Current state, fetched fresh from the remote
    pub fn query_state(&self, endpoint_id: &str) -> VpnResult<EndpointAssociationState> {
        let description = retry_transient(&self.retry, "describe-endpoint", || {
            self.remote
                .describe_endpoint(endpoint_id)
                .map_err(|e| VpnError::remote("describe-endpoint", e))
        })?
        .ok_or_else(|| VpnError::NoEndpointFound(endpoint_id.to_string()))?;

        let state = EndpointAssociationState::from_endpoint_code(&description.status_code);
        let state = match state {
            EndpointAssociationState::NotAssociated | EndpointAssociationState::Associated => {
                state.refine(&self.target_networks(endpoint_id)?)
            }
            other => other,
        };
        debug!(endpoint = %endpoint_id, code = %description.status_code, state = %state, "queried state");
        Ok(state)
    }

    /// The association that `turn_off` would tear down, if any
    pub fn association(&self, endpoint_id: &str) -> VpnResult<Option<AssociationRecord>> {
        Ok(self
            .target_networks(endpoint_id)?
            .into_iter()
            .find(|r| !matches!(r.status_code.as_str(), "disassociating" | "disassociated")))
    }

    fn target_networks(&self, endpoint_id: &str) -> VpnResult<Vec<AssociationRecord>> {
        retry_transient(&self.retry, "describe-target-networks", || {
            self.remote
                .describe_target_networks(endpoint_id)
                .map_err(|e| VpnError::remote("describe-target-networks", e))
        })
    }

    /// Associate `subnet_id` and add the default route.
    ///
    /// Returns once both requests are acknowledged; convergence to
    /// `Associated` is left to [`Self::wait_for`].
    pub fn turn_on(&self, endpoint_id: &str, subnet_id: &str) -> VpnResult<Outcome> {
        match self.query_state(endpoint_id)? {
            EndpointAssociationState::NotAssociated => {}
            EndpointAssociationState::Associated => {
                return match self.mode {
                    TurnOnMode::Idempotent => {
                        info!(endpoint = %endpoint_id, "already associated, nothing to do");
                        Ok(Outcome::AlreadyInState)
                    }
                    TurnOnMode::Strict => Err(VpnError::unexpected("turn-on", "available")),
                };
            }
            EndpointAssociationState::Associating => {
                info!(endpoint = %endpoint_id, "association already in flight");
                return Ok(Outcome::AlreadyInFlight);
            }
            state @ EndpointAssociationState::Disassociating => {
                return Err(VpnError::AmbiguousState {
                    endpoint: endpoint_id.to_string(),
                    state,
                })
            }
            EndpointAssociationState::Unknown(code) => {
                return Err(VpnError::unexpected("describe-endpoint", code))
            }
        }

        info!(endpoint = %endpoint_id, subnet = %subnet_id, "associating target network");
        let ack = self
            .remote
            .associate(endpoint_id, subnet_id)
            .map_err(|e| VpnError::remote("associate", e))?;
        if ack != "associating" {
            return Err(VpnError::unexpected("associate", ack));
        }

        info!(endpoint = %endpoint_id, subnet = %subnet_id, "creating default route");
        self.create_default_route(endpoint_id, subnet_id)
            .map_err(|e| VpnError::RouteMissing {
                endpoint: endpoint_id.to_string(),
                source: Box::new(e),
            })?;
        Ok(Outcome::Requested)
    }

    /// Route creation is the one retried mutation: a duplicate counts as done
    fn create_default_route(&self, endpoint_id: &str, subnet_id: &str) -> VpnResult<()> {
        let ack = retry_transient(&self.retry, "create-route", || {
            match self.remote.create_default_route(endpoint_id, subnet_id) {
                Ok(ack) => Ok(ack),
                Err(RemoteError::Rejected { code, .. }) if code == DUPLICATE_ROUTE_CODE => {
                    debug!(endpoint = %endpoint_id, "default route already exists");
                    Ok("creating".to_string())
                }
                Err(e) => Err(VpnError::remote("create-route", e)),
            }
        })?;
        if ack != "creating" {
            return Err(VpnError::unexpected("create-route", ack));
        }
        Ok(())
    }

    /// Disassociate the current target network
    pub fn turn_off(&self, endpoint_id: &str) -> VpnResult<Outcome> {
        match self.query_state(endpoint_id)? {
            EndpointAssociationState::Unknown(code) => {
                return Err(VpnError::unexpected("describe-endpoint", code))
            }
            state if state.is_transient() => {
                return Err(VpnError::AmbiguousState {
                    endpoint: endpoint_id.to_string(),
                    state,
                })
            }
            _ => {}
        }

        let record = self
            .association(endpoint_id)?
            .ok_or_else(|| VpnError::NoActiveAssociation(endpoint_id.to_string()))?;

        info!(
            endpoint = %endpoint_id,
            association = %record.association_id,
            subnet = %record.subnet_id,
            "disassociating target network"
        );
        let ack = self
            .remote
            .disassociate(endpoint_id, &record.association_id)
            .map_err(|e| VpnError::remote("disassociate", e))?;
        if ack != "disassociating" {
            return Err(VpnError::unexpected("disassociate", ack));
        }
        Ok(Outcome::Requested)
    }

    /// Flip between on and off; refuses while a transition is pending
    pub fn toggle(&self, endpoint_id: &str, subnet_id: &str) -> VpnResult<ToggleOutcome> {
        match self.query_state(endpoint_id)? {
            EndpointAssociationState::Associated => Ok(ToggleOutcome {
                direction: Direction::Off,
                outcome: self.turn_off(endpoint_id)?,
            }),
            EndpointAssociationState::NotAssociated => Ok(ToggleOutcome {
                direction: Direction::On,
                outcome: self.turn_on(endpoint_id, subnet_id)?,
            }),
            state => Err(VpnError::AmbiguousState {
                endpoint: endpoint_id.to_string(),
                state,
            }),
        }
    }

    /// Poll until the endpoint reaches `target` or the deadline passes
    pub fn wait_for(
        &self,
        endpoint_id: &str,
        target: &EndpointAssociationState,
        deadline: &Deadline,
        policy: &PollPolicy,
    ) -> VpnResult<()> {
        poll_until(deadline, policy, "wait-for-association", || {
            match self.query_state(endpoint_id)? {
                state if &state == target => Ok(Poll::Ready(())),
                EndpointAssociationState::Unknown(code) => {
                    Err(VpnError::unexpected("describe-endpoint", code))
                }
                state => Ok(Poll::Pending(state.to_string())),
            }
        })
    }
}
