//! Advisory double-booking detection.

use chrono::{DateTime, Utc};
use opsledger_model::{Appointment, AppointmentStatus, Entity, APPOINTMENT};
use opsledger_types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Two live appointments for the same staff member whose intervals intersect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentOverlap {
    pub staff_id: String,
    /// Earlier-starting booking (ties broken by id).
    pub first: EntityId,
    pub second: EntityId,
    pub overlap_start: DateTime<Utc>,
    pub overlap_end: DateTime<Utc>,
}

/// Finds every overlapping pair among `entities`. Non-appointments,
/// payloads that do not parse and cancelled bookings are ignored.
/// Back-to-back bookings do not overlap.
pub fn find_overlaps(entities: &[Entity]) -> Vec<AppointmentOverlap> {
    let mut by_staff: BTreeMap<String, Vec<(EntityId, Appointment)>> = BTreeMap::new();
    for entity in entities {
        if entity.deleted || entity.entity_type != APPOINTMENT {
            continue;
        }
        let Ok(appt) = Appointment::from_entity(entity) else {
            continue;
        };
        if appt.status == AppointmentStatus::Cancelled {
            continue;
        }
        by_staff
            .entry(appt.staff_id.clone())
            .or_default()
            .push((entity.id, appt));
    }

    let mut out = Vec::new();
    for (staff_id, mut appts) in by_staff {
        appts.sort_by(|(ia, a), (ib, b)| a.start.cmp(&b.start).then_with(|| ia.cmp(ib)));
        for (i, (first_id, first)) in appts.iter().enumerate() {
            // Sorted by start: once a later booking starts at or after this
            // one ends, none after it can overlap either.
            for (second_id, second) in appts[i + 1..]
                .iter()
                .take_while(|(_, s)| s.start < first.end)
            {
                out.push(AppointmentOverlap {
                    staff_id: staff_id.clone(),
                    first: *first_id,
                    second: *second_id,
                    overlap_start: second.start,
                    overlap_end: first.end.min(second.end),
                });
            }
        }
    }
    out
}
