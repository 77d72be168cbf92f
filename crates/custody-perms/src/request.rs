//! Permission request state machine.
//!
//! A request moves from `Requested` to exactly one of `Approved` or
//! `Denied`, and only by the granter's action. Terminal states absorb: a
//! repeated transition leaves the request as it is and reports it unchanged.
//! The ledger backends store requests; the transitions live here so every
//! backend applies them the same way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use custody_core::{ContentHash, Identifier, RecordRef, RequestRef, WrappedKey};

use crate::error::{PermsError, Result};

/// Key derivation context for request references.
const REQUEST_CONTEXT: &str = "custody 2024 request ref v1";

/// State of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Requested,
    Approved,
    Denied,
}

impl RequestState {
    /// Stable textual name, used by the SQLite ledger.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestState::Requested => "requested",
            RequestState::Approved => "approved",
            RequestState::Denied => "denied",
        }
    }

    /// Returns true for `Approved` and `Denied`.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Requested)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestState {
    type Err = PermsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "requested" => Ok(RequestState::Requested),
            "approved" => Ok(RequestState::Approved),
            "denied" => Ok(RequestState::Denied),
            other => Err(PermsError::Serialization(format!(
                "unknown request state: {}",
                other
            ))),
        }
    }
}

/// A request by `requester` for `granter` to share a record's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub request_ref: RequestRef,
    pub requester: Identifier,
    pub granter: Identifier,
    pub record_ref: RecordRef,
    pub state: RequestState,

    /// Key wrapped for the requester, present once approved.
    pub granted_key: Option<WrappedKey>,

    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl PermissionRequest {
    /// Create a new open request.
    pub fn new(
        request_ref: RequestRef,
        requester: Identifier,
        granter: Identifier,
        record_ref: RecordRef,
        created_at: i64,
    ) -> Self {
        Self {
            request_ref,
            requester,
            granter,
            record_ref,
            state: RequestState::Requested,
            granted_key: None,
            created_at,
        }
    }

    /// Returns true while the request awaits a decision.
    pub fn is_open(&self) -> bool {
        self.state == RequestState::Requested
    }

    /// Approve with a key wrapped for the requester.
    ///
    /// Returns false, leaving the request untouched, if it is already
    /// terminal. A key addressed to anyone but the requester is rejected.
    pub fn approve(&mut self, granted_key: WrappedKey) -> Result<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        if granted_key.recipient != self.requester {
            return Err(PermsError::Unwrap(format!(
                "granted key is addressed to {}, not requester {}",
                granted_key.recipient, self.requester
            )));
        }
        self.state = RequestState::Approved;
        self.granted_key = Some(granted_key);
        Ok(true)
    }

    /// Deny. Returns false if the request is already terminal.
    pub fn deny(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = RequestState::Denied;
        true
    }
}

/// Outcome of a ledger transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The request moved to a terminal state.
    Applied(PermissionRequest),
    /// The request was already terminal; this is its stored form.
    Unchanged(PermissionRequest),
}

impl Transition {
    /// The request after the transition.
    pub fn request(&self) -> &PermissionRequest {
        match self {
            Transition::Applied(r) | Transition::Unchanged(r) => r,
        }
    }

    /// Consume into the request.
    pub fn into_request(self) -> PermissionRequest {
        match self {
            Transition::Applied(r) | Transition::Unchanged(r) => r,
        }
    }

    /// Returns true if this call changed the request.
    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Outcome of asking for access to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequest {
    /// An open request now exists (new, or the one already pending).
    Requested(PermissionRequest),
    /// The requester already holds a key for the record's content.
    AlreadyGranted,
}

/// Derive a request reference.
///
/// `seq` disambiguates repeated requests for the same record by the same
/// requester after an earlier one was decided.
pub fn derive_request_ref(
    requester: &Identifier,
    granter: &Identifier,
    record_ref: &RecordRef,
    seq: u64,
) -> RequestRef {
    let mut data = Vec::with_capacity(32 * 3 + 8);
    data.extend_from_slice(requester.as_bytes());
    data.extend_from_slice(granter.as_bytes());
    data.extend_from_slice(record_ref.as_bytes());
    data.extend_from_slice(&seq.to_be_bytes());
    ContentHash::derive(REQUEST_CONTEXT, &data).into()
}
