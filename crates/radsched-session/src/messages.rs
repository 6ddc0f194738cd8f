// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Patient-facing message bodies.
//!
//! The state machine decides the tag, this module decides the words.
//! Bodies stay inside one SMS segment where possible and never contain
//! PHI beyond the exam name the patient already knows about.

use chrono::{DateTime, Utc};
use radsched_catalog::Location;

use crate::slots::Slot;

/// Phrase used when no callback number is configured.
const FALLBACK_OFFICE: &str = "our office";

fn office(phone: Option<&str>) -> String {
    phone.map(|p| p.to_string()).unwrap_or_else(|| FALLBACK_OFFICE.into())
}

pub fn consent_prompt(exam: &str) -> String {
    format!(
        "Your provider ordered: {exam}. Reply YES to schedule by text. \
         Msg&data rates may apply. Reply STOP to opt out."
    )
}

pub fn order_list(exams: &[&str]) -> String {
    let mut body = String::from("You have more than one exam to schedule. Which first? Reply with a number:");
    for (i, exam) in exams.iter().enumerate() {
        body.push_str(&format!("\n{}. {exam}", i + 1));
    }
    body
}

pub fn location_list(exam: &str, locations: &[&Location], notice: Option<&str>) -> String {
    let mut body = String::new();
    if let Some(n) = notice {
        body.push_str(n);
        body.push(' ');
    }
    body.push_str(&format!("Where would you like your {exam}? Reply with a number:"));
    for (i, loc) in locations.iter().enumerate() {
        body.push_str(&format!("\n{}. {}", i + 1, loc.name));
    }
    body
}

pub fn slot_list(slots: &[Slot], location_name: &str) -> String {
    let mut body = format!("Available times at {location_name}. Reply with a number:");
    for (i, slot) in slots.iter().enumerate() {
        body.push_str(&format!("\n{}. {}", i + 1, format_slot_time(&slot.datetime)));
    }
    body
}

pub fn confirmation(exam: &str, location_name: &str, when: &DateTime<Utc>) -> String {
    format!(
        "You're booked: {exam} at {location_name}, {}. \
         Reply STOP to opt out of scheduling texts.",
        format_slot_time(when)
    )
}

pub fn goodbye(phone: Option<&str>) -> String {
    format!(
        "Okay, we won't schedule by text. Call {} to schedule your exam.",
        office(phone)
    )
}

pub fn stop_ack() -> String {
    "You are unsubscribed and will receive no more scheduling texts.".to_string()
}

pub fn safety_fallback(phone: Option<&str>) -> String {
    format!("Please call {} to schedule this exam.", office(phone))
}

pub fn slot_failure(phone: Option<&str>) -> String {
    format!(
        "We couldn't confirm available times. Please call {} to schedule.",
        office(phone)
    )
}

pub fn no_slots_notice() -> &'static str {
    "No times are open at that location right now."
}

pub fn help(phone: Option<&str>) -> String {
    format!(
        "Reply with the number of an option to choose it. Reply STOP to opt out. \
         Questions? Call {}.",
        office(phone)
    )
}

pub fn reprompt_prefix() -> &'static str {
    "Sorry, we didn't understand that."
}

/// "Tue Mar 17 at 2:30 PM" style, always UTC-naive wall time as the slot
/// source reports it.
fn format_slot_time(when: &DateTime<Utc>) -> String {
    when.format("%a %b %-d at %-I:%M %p").to_string()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn location_list_numbers_from_one() {
        let a = Location {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "Mercy West".into(),
            phone: "+15550001111".into(),
            active: true,
            units: vec![],
        };
        let b = Location {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "Downtown Imaging".into(),
            phone: "+15550002222".into(),
            active: true,
            units: vec![],
        };
        let body = location_list("CT Chest", &[&a, &b], None);
        assert!(body.contains("1. Mercy West"));
        assert!(body.contains("2. Downtown Imaging"));
        assert!(body.contains("CT Chest"));
    }

    #[test]
    fn notice_is_prefixed() {
        let a = Location {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "Mercy West".into(),
            phone: String::new(),
            active: true,
            units: vec![],
        };
        let body = location_list("MRI", &[&a], Some(no_slots_notice()));
        assert!(body.starts_with("No times are open"));
    }

    #[test]
    fn slot_time_formatting() {
        let when = Utc.with_ymd_and_hms(2026, 3, 17, 14, 30, 0).unwrap();
        assert_eq!(format_slot_time(&when), "Tue Mar 17 at 2:30 PM");
    }

    #[test]
    fn confirmation_mentions_all_parts() {
        let when = Utc.with_ymd_and_hms(2026, 3, 17, 14, 30, 0).unwrap();
        let body = confirmation("CT Chest", "Mercy West", &when);
        assert!(body.contains("CT Chest"));
        assert!(body.contains("Mercy West"));
        assert!(body.contains("Mar 17"));
    }

    #[test]
    fn office_fallback_when_no_phone() {
        assert!(goodbye(None).contains("our office"));
        assert!(slot_failure(Some("+15551112222")).contains("+15551112222"));
    }
}
