//! Mapping of raw engine events to [`UnitEvent`]s.

use std::collections::HashMap;

use bollard::models::{EventMessage, EventMessageTypeEnum};

use crate::driver::{UnitEvent, UnitEventAction, MANAGED_BY_JOBS, MANAGED_BY_LABEL};

/// Engine-side filters for the event subscription: container events with
/// a terminal action on units labelled as job units.
pub fn subscription_filters() -> HashMap<String, Vec<String>> {
    HashMap::from([
        ("type".to_string(), vec!["container".to_string()]),
        (
            "event".to_string(),
            [
                UnitEventAction::Die,
                UnitEventAction::Stop,
                UnitEventAction::OutOfMemory,
            ]
            .iter()
            .map(|a| a.as_str().to_string())
            .collect(),
        ),
        (
            "label".to_string(),
            vec![format!("{MANAGED_BY_LABEL}={MANAGED_BY_JOBS}")],
        ),
    ])
}

/// Convert an engine event into a [`UnitEvent`].
///
/// Returns `None` for anything that is not a terminal container event on a
/// job unit. The filters above already restrict the subscription; this is
/// checked again so a misbehaving engine cannot feed foreign units through.
pub fn unit_event_from_message(message: EventMessage) -> Option<UnitEvent> {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }
    let action = UnitEventAction::parse(message.action.as_deref()?)?;

    let actor = message.actor?;
    let unit_id = actor.id?;
    let attributes = actor.attributes.unwrap_or_default();

    if attributes.get(MANAGED_BY_LABEL).map(String::as_str) != Some(MANAGED_BY_JOBS) {
        return None;
    }
    let name = attributes.get("name")?.clone();

    Some(UnitEvent {
        unit_id,
        name,
        action,
    })
}
