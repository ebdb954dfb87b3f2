//! Plain-text description of an encounter, used as the retrieval query.

use crate::store::encounters::Subject;

/// Used when an encounter carries no notes, persons or vehicles.
pub const FALLBACK_DESCRIPTION: &str = "Field encounter";

/// `"Notes: …. Person: <name>. Vehicle: <plate> (<model>)"`, in that order.
pub fn describe(subject: &Subject) -> String {
    let mut parts = Vec::new();

    if let Some(notes) = subject.encounter.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        parts.push(format!("Notes: {notes}"));
    }
    for person in &subject.persons {
        parts.push(format!("Person: {}", person.name));
    }
    for vehicle in &subject.vehicles {
        match vehicle.model.as_deref().filter(|m| !m.is_empty()) {
            Some(model) => parts.push(format!("Vehicle: {} ({model})", vehicle.plate)),
            None => parts.push(format!("Vehicle: {}", vehicle.plate)),
        }
    }

    if parts.is_empty() {
        FALLBACK_DESCRIPTION.to_string()
    } else {
        parts.join(". ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::encounters::{Encounter, Person, Vehicle};

    fn subject(notes: Option<&str>, persons: &[&str], vehicles: &[(&str, Option<&str>)]) -> Subject {
        Subject {
            encounter: Encounter {
                id: 1,
                tenant_id: 1,
                notes: notes.map(str::to_string),
                occurred_at: "2024-01-01T00:00:00Z".into(),
            },
            persons: persons
                .iter()
                .enumerate()
                .map(|(i, n)| Person { id: i as i64 + 1, tenant_id: 1, name: n.to_string() })
                .collect(),
            vehicles: vehicles
                .iter()
                .enumerate()
                .map(|(i, (p, m))| Vehicle {
                    id: i as i64 + 1,
                    tenant_id: 1,
                    plate: p.to_string(),
                    model: m.map(str::to_string),
                })
                .collect(),
        }
    }

    #[test]
    fn full_description_in_order() {
        let s = subject(Some("Suspeito em atitude suspeita"), &["João"], &[("ABC1D23", Some("Gol")), ("XYZ9876", None)]);
        assert_eq!(
            describe(&s),
            "Notes: Suspeito em atitude suspeita. Person: João. Vehicle: ABC1D23 (Gol). Vehicle: XYZ9876"
        );
    }

    #[test]
    fn empty_encounter_uses_fallback() {
        assert_eq!(describe(&subject(None, &[], &[])), FALLBACK_DESCRIPTION);
        assert_eq!(describe(&subject(Some("   "), &[], &[])), FALLBACK_DESCRIPTION);
    }
}
