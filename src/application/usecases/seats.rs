use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::{
    repositories::{
        organization_members::OrganizationMemberRepository,
        organizations::OrganizationRepository,
    },
    value_objects::{billing::SeatAvailability, enums::plan_keys::PlanKey},
};

const DEFAULT_SEATS_LIMIT: i32 = 1;

#[derive(Debug, Error)]
pub enum SeatError {
    #[error("organization not found")]
    OrgNotFound,
    #[error("organization has no seats available")]
    SeatLimitReached { seats_limit: i32, active_members: i64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SeatError {
    pub fn code(&self) -> &'static str {
        match self {
            SeatError::OrgNotFound => "ORG_NOT_FOUND",
            SeatError::SeatLimitReached { .. } => "SEAT_LIMIT_REACHED",
            SeatError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SeatError::OrgNotFound => StatusCode::NOT_FOUND,
            SeatError::SeatLimitReached { .. } => StatusCode::CONFLICT,
            SeatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub struct SeatUseCase<O, M>
where
    O: OrganizationRepository + 'static,
    M: OrganizationMemberRepository + 'static,
{
    org_repo: Arc<O>,
    member_repo: Arc<M>,
}

impl<O, M> SeatUseCase<O, M>
where
    O: OrganizationRepository + 'static,
    M: OrganizationMemberRepository + 'static,
{
    pub fn new(org_repo: Arc<O>, member_repo: Arc<M>) -> Self {
        Self {
            org_repo,
            member_repo,
        }
    }

    pub async fn seat_availability(&self, org_id: Uuid) -> Result<SeatAvailability, SeatError> {
        let org = self
            .org_repo
            .find_by_id(org_id)
            .await
            .map_err(|err| {
                error!(%org_id, db_error = ?err, "seats: failed to load organization");
                SeatError::Internal(err)
            })?
            .ok_or(SeatError::OrgNotFound)?;

        let active_members = self
            .member_repo
            .count_active_members(org_id)
            .await
            .map_err(|err| {
                error!(%org_id, db_error = ?err, "seats: failed to count members");
                SeatError::Internal(err)
            })?;

        let seats_limit = effective_seats_limit(org.seats_limit, org.plan_key.as_deref());
        let available = match seats_limit {
            Some(limit) => active_members < i64::from(limit),
            None => true,
        };

        Ok(SeatAvailability {
            org_id,
            seats_limit,
            active_members,
            available,
        })
    }

    /// Gate for membership growth (invite acceptance, member add).
    pub async fn ensure_seat_available(&self, org_id: Uuid) -> Result<(), SeatError> {
        let availability = self.seat_availability(org_id).await?;

        if availability.available {
            return Ok(());
        }

        // Unlimited plans never reach here, so the limit is present.
        let seats_limit = availability.seats_limit.unwrap_or(DEFAULT_SEATS_LIMIT);
        warn!(
            %org_id,
            seats_limit,
            active_members = availability.active_members,
            "seats: seat limit reached"
        );
        Err(SeatError::SeatLimitReached {
            seats_limit,
            active_members: availability.active_members,
        })
    }
}

/// The stored column wins; the plan's built-in limit is the fallback.
/// Organizations with neither get a single seat. `None` with an
/// enterprise plan means unlimited.
fn effective_seats_limit(stored: Option<i32>, plan_key: Option<&str>) -> Option<i32> {
    if let Some(limit) = stored {
        return Some(limit);
    }
    match plan_key.and_then(PlanKey::from_str) {
        Some(plan) => plan.seats_limit(),
        None => Some(DEFAULT_SEATS_LIMIT),
    }
}
