use crate::crm::CallDirection;
use crate::disposition::Disposition;
use crate::normalize::{resolved, PhoneFormat};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// Telephony providers send the same field as a string on one account and a
/// number on another.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

/// Webhook body as posted by the telephony platform. Every field is
/// optional here; required ones are checked by the reconciler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelephonyWebhook {
    #[serde(default, deserialize_with = "string_or_number")]
    pub call_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub call_duration: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub call_start: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub agent_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub agent_username: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub extern_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub ani: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub dnis: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub agent_disposition: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub recording_url: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub direction: Option<String>,
}

impl TelephonyWebhook {
    pub fn call_id(&self) -> Option<&str> {
        resolved(self.call_id.as_deref())
    }

    pub fn extern_id(&self) -> Option<&str> {
        resolved(self.extern_id.as_deref())
    }

    /// Auto-fired events (call connected, call ended) carry no disposition
    /// or an unsubstituted placeholder.
    pub fn disposition(&self) -> Option<&str> {
        resolved(self.agent_disposition.as_deref())
    }

    pub fn recording_url(&self) -> Option<&str> {
        resolved(self.recording_url.as_deref())
    }

    pub fn explicit_direction(&self) -> Option<CallDirection> {
        let raw = resolved(self.direction.as_deref())?;
        match raw.parse() {
            Ok(direction) => Some(direction),
            Err(e) => {
                warn!(direction = raw, "ignoring webhook direction: {}", e);
                None
            }
        }
    }
}

/// A disposition-bearing webhook after every field has been normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub call_id: String,
    pub external_contact_id: String,
    pub direction: CallDirection,
    pub duration_seconds: u64,
    pub start_instant: DateTime<Utc>,
    pub disposition: Disposition,
    pub agent_display_name: String,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub recording_url: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
}

impl CallEvent {
    /// Call-log body: the provider summary followed by the agent's notes.
    pub fn body(&self) -> String {
        [self.summary.as_deref(), self.notes.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Picks the call direction and assigns from/to numbers.
///
/// An explicit direction wins. Otherwise the side that matches the contact's
/// phone is the customer: a customer on `dnis` means our line dialled out, a
/// customer on `ani` means they called in. With no match the call counts as
/// outbound, and the customer is taken to be the dialled side: `dnis` for
/// outbound, `ani` for inbound. Outbound calls go from our line to the
/// customer, inbound calls from the customer to our line.
pub fn assign_numbers(
    explicit: Option<CallDirection>,
    ani: Option<&str>,
    dnis: Option<&str>,
    contact_phone: Option<&str>,
    format: &PhoneFormat,
) -> (CallDirection, Option<String>, Option<String>) {
    let ani = resolved(ani).map(|n| format.format(n));
    let dnis = resolved(dnis).map(|n| format.format(n));
    let matches = |number: &Option<String>| match (number, resolved(contact_phone)) {
        (Some(number), Some(phone)) => format.same_number(number, phone),
        _ => false,
    };
    let (ani_is_customer, dnis_is_customer) = (matches(&ani), matches(&dnis));

    let direction = explicit.unwrap_or(if dnis_is_customer && !ani_is_customer {
        CallDirection::Outbound
    } else if ani_is_customer && !dnis_is_customer {
        CallDirection::Inbound
    } else {
        CallDirection::Outbound
    });

    let customer_is_dnis = match (ani_is_customer, dnis_is_customer) {
        (false, true) => true,
        (true, false) => false,
        _ => direction == CallDirection::Outbound,
    };
    let (customer, ours) = if customer_is_dnis {
        (dnis, ani)
    } else {
        (ani, dnis)
    };
    match direction {
        CallDirection::Outbound => (direction, ours, customer),
        CallDirection::Inbound => (direction, customer, ours),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_and_strings_are_both_accepted() {
        let webhook: TelephonyWebhook = serde_json::from_value(json!({
            "call_id": 123456789,
            "call_duration": 95,
            "agent_id": "42",
            "extern_id": "hubspot_1001",
            "agent_disposition": "Booked",
            "recording_url": "#recording_url#",
            "notes": null,
        }))
        .unwrap();
        assert_eq!(webhook.call_id(), Some("123456789"));
        assert_eq!(webhook.call_duration.as_deref(), Some("95"));
        assert_eq!(webhook.recording_url(), None);
        assert_eq!(webhook.notes, None);
        assert!(serde_json::from_value::<TelephonyWebhook>(json!({ "call_id": [1] })).is_err());
    }

    #[test]
    fn test_placeholder_disposition_is_auto_fire() {
        let webhook: TelephonyWebhook = serde_json::from_value(json!({
            "call_id": "c1",
            "agent_disposition": "#agent_disposition#",
        }))
        .unwrap();
        assert_eq!(webhook.disposition(), None);
        let webhook: TelephonyWebhook = serde_json::from_value(json!({ "call_id": "c1" })).unwrap();
        assert_eq!(webhook.disposition(), None);
    }

    #[test]
    fn test_explicit_direction() {
        let webhook: TelephonyWebhook =
            serde_json::from_value(json!({ "direction": "IN" })).unwrap();
        assert_eq!(webhook.explicit_direction(), Some(CallDirection::Inbound));
        let webhook: TelephonyWebhook =
            serde_json::from_value(json!({ "direction": "#direction#" })).unwrap();
        assert_eq!(webhook.explicit_direction(), None);
    }

    #[test]
    fn test_assign_numbers() {
        let format = PhoneFormat::default();
        let customer = Some("0412 345 678");

        let (direction, from, to) =
            assign_numbers(None, Some("0299990000"), Some("0412345678"), customer, &format);
        assert_eq!(direction, CallDirection::Outbound);
        assert_eq!(from.as_deref(), Some("+61299990000"));
        assert_eq!(to.as_deref(), Some("+61412345678"));

        let (direction, from, to) =
            assign_numbers(None, Some("0412345678"), Some("0299990000"), customer, &format);
        assert_eq!(direction, CallDirection::Inbound);
        assert_eq!(from.as_deref(), Some("+61412345678"));
        assert_eq!(to.as_deref(), Some("+61299990000"));

        let (direction, from, to) = assign_numbers(
            Some(CallDirection::Outbound),
            Some("0412345678"),
            Some("0299990000"),
            customer,
            &format,
        );
        assert_eq!(direction, CallDirection::Outbound);
        assert_eq!(from.as_deref(), Some("+61299990000"));
        assert_eq!(to.as_deref(), Some("+61412345678"));

        let (direction, from, to) =
            assign_numbers(None, Some("0411111111"), Some("#dnis#"), None, &format);
        assert_eq!(direction, CallDirection::Outbound);
        assert_eq!(from.as_deref(), Some("+61411111111"));
        assert_eq!(to, None);

        let (direction, from, to) = assign_numbers(
            Some(CallDirection::Inbound),
            Some("0411111111"),
            Some("0299990000"),
            None,
            &format,
        );
        assert_eq!(direction, CallDirection::Inbound);
        assert_eq!(from.as_deref(), Some("+61411111111"));
        assert_eq!(to.as_deref(), Some("+61299990000"));
    }
}
