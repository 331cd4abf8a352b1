use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod fields;

/// Canonical call outcomes. Every free-form label an agent or the telephony
/// platform produces must land on exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Connected,
    Booked,
    NoAnswer,
    WrongNumber,
    NotInterested,
    Busy,
    VoicemailLeft,
    UnableToService,
    Transferred,
    CallbackRequested,
    DealWon,
    DealLost,
    DoNotContact,
    OtherDepartment,
}

impl Disposition {
    pub const ALL: [Disposition; 14] = [
        Disposition::Connected,
        Disposition::Booked,
        Disposition::NoAnswer,
        Disposition::WrongNumber,
        Disposition::NotInterested,
        Disposition::Busy,
        Disposition::VoicemailLeft,
        Disposition::UnableToService,
        Disposition::Transferred,
        Disposition::CallbackRequested,
        Disposition::DealWon,
        Disposition::DealLost,
        Disposition::DoNotContact,
        Disposition::OtherDepartment,
    ];

    /// Primary key of the category, also its wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Connected => "connected",
            Disposition::Booked => "booked",
            Disposition::NoAnswer => "no_answer",
            Disposition::WrongNumber => "wrong_number",
            Disposition::NotInterested => "not_interested",
            Disposition::Busy => "busy",
            Disposition::VoicemailLeft => "voicemail_left",
            Disposition::UnableToService => "unable_to_service",
            Disposition::Transferred => "transferred",
            Disposition::CallbackRequested => "callback_requested",
            Disposition::DealWon => "deal_won",
            Disposition::DealLost => "deal_lost",
            Disposition::DoNotContact => "do_not_contact",
            Disposition::OtherDepartment => "other_department",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Connected => "Connected",
            Disposition::Booked => "Appointment Booked",
            Disposition::NoAnswer => "No Answer",
            Disposition::WrongNumber => "Wrong Number",
            Disposition::NotInterested => "Not Interested",
            Disposition::Busy => "Busy",
            Disposition::VoicemailLeft => "Left Voicemail",
            Disposition::UnableToService => "Unable to Service",
            Disposition::Transferred => "Transferred",
            Disposition::CallbackRequested => "Callback Requested",
            Disposition::DealWon => "Deal Won",
            Disposition::DealLost => "Deal Lost",
            Disposition::DoNotContact => "Do Not Contact",
            Disposition::OtherDepartment => "Internal Sales Referral",
        }
    }

    /// Whether a live conversation took place.
    pub fn is_connected(&self) -> bool {
        !matches!(
            self,
            Disposition::NoAnswer
                | Disposition::Busy
                | Disposition::VoicemailLeft
                | Disposition::WrongNumber
        )
    }

    /// Default CRM call-outcome identifier. Outcomes without a dedicated
    /// CRM entry are recorded as connected calls.
    pub fn default_crm_id(&self) -> &'static str {
        match self {
            Disposition::NoAnswer => "73a0d17f-1163-4015-bdd5-ec830791da20",
            Disposition::Busy => "9d9162e7-6cf3-4944-bf63-4dff82258764",
            Disposition::WrongNumber => "17b47fee-58de-441e-a44c-c6300d46f273",
            Disposition::VoicemailLeft => "b2cf5968-551e-4856-9783-52b3da59a7d0",
            _ => "f240bbac-87c9-4f6e-bf70-924b57d47db7",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = UnknownDisposition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        map_disposition(s)
    }
}

/// Every accepted spelling after normalization, grouped by category.
static SYNONYMS: &[(&str, Disposition)] = &[
    ("connected", Disposition::Connected),
    ("answered", Disposition::Connected),
    ("spoke_to_customer", Disposition::Connected),
    ("contacted", Disposition::Connected),
    ("booked", Disposition::Booked),
    ("appointment_booked", Disposition::Booked),
    ("appointment_set", Disposition::Booked),
    ("booking", Disposition::Booked),
    ("book", Disposition::Booked),
    ("no_answer", Disposition::NoAnswer),
    ("noanswer", Disposition::NoAnswer),
    ("not_answered", Disposition::NoAnswer),
    ("no_anwser", Disposition::NoAnswer),
    ("na", Disposition::NoAnswer),
    ("wrong_number", Disposition::WrongNumber),
    ("wrong_no", Disposition::WrongNumber),
    ("invalid_number", Disposition::WrongNumber),
    ("not_interested", Disposition::NotInterested),
    ("not_intrested", Disposition::NotInterested),
    ("ni", Disposition::NotInterested),
    ("no_interest", Disposition::NotInterested),
    ("busy", Disposition::Busy),
    ("line_busy", Disposition::Busy),
    ("engaged", Disposition::Busy),
    ("voicemail_left", Disposition::VoicemailLeft),
    ("voicemail", Disposition::VoicemailLeft),
    ("left_voicemail", Disposition::VoicemailLeft),
    ("left_message", Disposition::VoicemailLeft),
    ("vm", Disposition::VoicemailLeft),
    ("unable_to_service", Disposition::UnableToService),
    ("cannot_service", Disposition::UnableToService),
    ("out_of_area", Disposition::UnableToService),
    ("transferred", Disposition::Transferred),
    ("transfer", Disposition::Transferred),
    ("warm_transfer", Disposition::Transferred),
    ("callback_requested", Disposition::CallbackRequested),
    ("callback", Disposition::CallbackRequested),
    ("call_back", Disposition::CallbackRequested),
    ("call_back_later", Disposition::CallbackRequested),
    ("deal_won", Disposition::DealWon),
    ("closed_won", Disposition::DealWon),
    ("sale", Disposition::DealWon),
    ("deal_lost", Disposition::DealLost),
    ("closed_lost", Disposition::DealLost),
    ("do_not_contact", Disposition::DoNotContact),
    ("do_not_call", Disposition::DoNotContact),
    ("dnc", Disposition::DoNotContact),
    ("other_department", Disposition::OtherDepartment),
    ("other_dept", Disposition::OtherDepartment),
    ("internal_sales", Disposition::OtherDepartment),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "unmapped disposition \"{}\" (normalized \"{}\"); recognised values: {}",
    .raw,
    .normalized,
    .known.join(", ")
)]
pub struct UnknownDisposition {
    pub raw: String,
    pub normalized: String,
    pub known: Vec<&'static str>,
}

/// Lowercase, trim, and collapse whitespace/hyphen runs to one underscore.
pub fn normalize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.extend(c.to_lowercase());
    }
    out
}

pub fn known_keys() -> Vec<&'static str> {
    SYNONYMS.iter().map(|(key, _)| *key).collect()
}

/// Maps a free-form label to its canonical disposition, or fails loudly.
pub fn map_disposition(raw: &str) -> Result<Disposition, UnknownDisposition> {
    let normalized = normalize_label(raw);
    SYNONYMS
        .iter()
        .find(|(key, _)| *key == normalized)
        .map(|(_, disposition)| *disposition)
        .ok_or_else(|| UnknownDisposition {
            raw: raw.to_string(),
            normalized,
            known: known_keys(),
        })
}

/// Canonical disposition to CRM call-outcome identifier, with per-deployment
/// overrides layered on top of the built-in table.
#[derive(Debug, Clone, Default)]
pub struct DispositionMap {
    overrides: HashMap<Disposition, String>,
}

impl DispositionMap {
    pub fn new(overrides: HashMap<Disposition, String>) -> Self {
        Self { overrides }
    }

    pub fn crm_id(&self, disposition: Disposition) -> &str {
        self.overrides
            .get(&disposition)
            .map(String::as_str)
            .unwrap_or_else(|| disposition.default_crm_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Not Interested "), "not_interested");
        assert_eq!(normalize_label("No-Answer"), "no_answer");
        assert_eq!(normalize_label("call -  back"), "call_back");
        assert_eq!(normalize_label("DNC"), "dnc");
        assert_eq!(normalize_label("__busy__"), "busy");
    }

    #[test]
    fn test_synonyms_form_equivalence_classes() {
        for (key, disposition) in SYNONYMS {
            let primary = map_disposition(disposition.as_str()).unwrap();
            assert_eq!(map_disposition(key).unwrap(), primary, "synonym {}", key);
            assert_eq!(primary, *disposition);
        }
    }

    #[test]
    fn test_every_category_has_primary_key() {
        for disposition in Disposition::ALL {
            assert_eq!(map_disposition(disposition.as_str()), Ok(disposition));
            let encoded = serde_json::to_value(disposition).unwrap();
            assert_eq!(encoded, serde_json::json!(disposition.as_str()));
        }
    }

    #[test]
    fn test_free_form_labels() {
        assert_eq!(map_disposition("No Anwser"), Ok(Disposition::NoAnswer));
        assert_eq!(map_disposition("Left Voicemail"), Ok(Disposition::VoicemailLeft));
        assert_eq!(map_disposition("appointment-booked"), Ok(Disposition::Booked));
        assert_eq!(
            "Do Not Call".parse::<Disposition>(),
            Ok(Disposition::DoNotContact)
        );
    }

    #[test]
    fn test_unmapped_label_is_an_error() {
        let err = map_disposition("Maybe Later?").unwrap_err();
        assert_eq!(err.raw, "Maybe Later?");
        let message = err.to_string();
        assert!(message.contains("\"Maybe Later?\""));
        for key in known_keys() {
            assert!(message.contains(key));
        }
        assert!(map_disposition("").is_err());
    }

    #[test]
    fn test_crm_id_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(Disposition::Booked, "custom-booked".to_string());
        let map = DispositionMap::new(overrides);
        assert_eq!(map.crm_id(Disposition::Booked), "custom-booked");
        assert_eq!(
            map.crm_id(Disposition::NoAnswer),
            Disposition::NoAnswer.default_crm_id()
        );
        assert_eq!(
            map.crm_id(Disposition::DealWon),
            Disposition::Connected.default_crm_id()
        );
    }
}
