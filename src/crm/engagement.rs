use super::CrmClient;
use crate::disposition::{fields::CrmProperties, Disposition};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    #[default]
    Outbound,
}

impl CallDirection {
    pub fn as_crm(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "INBOUND",
            CallDirection::Outbound => "OUTBOUND",
        }
    }
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Inbound => f.write_str("inbound"),
            CallDirection::Outbound => f.write_str("outbound"),
        }
    }
}

impl FromStr for CallDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound" | "in" | "incoming" => Ok(CallDirection::Inbound),
            "outbound" | "out" | "outgoing" => Ok(CallDirection::Outbound),
            other => Err(anyhow::anyhow!("unknown call direction: {}", other)),
        }
    }
}

/// A call-log activity ready to be written to the CRM.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEngagement {
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub direction: CallDirection,
    pub duration_secs: u64,
    pub disposition_id: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub recording_url: Option<String>,
}

impl CallEngagement {
    pub fn to_properties(&self) -> CrmProperties {
        let mut props = CrmProperties::new();
        props.set("hs_timestamp", self.timestamp.timestamp_millis().to_string());
        props.set("hs_call_title", self.title.as_str());
        props.set_if_present("hs_call_body", Some(self.body.as_str()));
        props.set("hs_call_direction", self.direction.as_crm());
        props.set(
            "hs_call_duration",
            self.duration_secs.saturating_mul(1000).to_string(),
        );
        props.set("hs_call_disposition", self.disposition_id.as_str());
        props.set("hs_call_status", "COMPLETED");
        props.set_if_present("hs_call_from_number", self.from_number.as_deref());
        props.set_if_present("hs_call_to_number", self.to_number.as_deref());
        props.set_if_present("hs_call_recording_url", self.recording_url.as_deref());
        props
    }
}

pub fn call_title(direction: CallDirection, disposition: Disposition, agent: &str) -> String {
    let way = match direction {
        CallDirection::Inbound => "Inbound",
        CallDirection::Outbound => "Outbound",
    };
    format!("{} call - {} ({})", way, disposition.label(), agent)
}

/// Inputs for the free-text note written next to a call.
#[derive(Debug, Clone, Default)]
pub struct NoteContent<'a> {
    pub agent_name: &'a str,
    pub sub_reason: Option<&'a str>,
    pub summary: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub duration_secs: Option<u64>,
    pub recording_url: Option<&'a str>,
}

fn headline(disposition: Disposition, agent: &str) -> String {
    match disposition {
        Disposition::Booked => format!("Appointment booked by {}", agent),
        Disposition::NoAnswer => format!("No answer. Call attempted by {}", agent),
        Disposition::Busy => format!("Line busy. Call attempted by {}", agent),
        Disposition::VoicemailLeft => format!("Voicemail left by {}", agent),
        Disposition::WrongNumber => format!("Wrong number reported by {}", agent),
        Disposition::NotInterested => format!("Customer not interested ({})", agent),
        Disposition::UnableToService => format!("Unable to service customer ({})", agent),
        Disposition::CallbackRequested => format!("Callback requested, taken by {}", agent),
        Disposition::DealWon => format!("Deal won by {}", agent),
        Disposition::DealLost => format!("Deal lost ({})", agent),
        Disposition::DoNotContact => format!("Customer asked not to be contacted ({})", agent),
        Disposition::OtherDepartment => format!("Referred to internal sales by {}", agent),
        Disposition::Transferred => format!("Call transferred by {}", agent),
        Disposition::Connected => format!("Spoke with customer ({})", agent),
    }
}

/// Renders the note body for a disposition. Lines without content are left out.
pub fn render_note(disposition: Disposition, content: &NoteContent<'_>) -> String {
    let mut lines = vec![headline(disposition, content.agent_name)];
    lines.push(format!("Outcome: {}", disposition.label()));
    if let Some(reason) = content.sub_reason {
        lines.push(format!("Detail: {}", reason));
    }
    if let Some(secs) = content.duration_secs.filter(|s| *s > 0) {
        lines.push(format!("Duration: {}m {:02}s", secs / 60, secs % 60));
    }
    if let Some(summary) = content.summary {
        lines.push(format!("Summary: {}", summary));
    }
    if let Some(notes) = content.notes {
        lines.push(format!("Notes: {}", notes));
    }
    if let Some(url) = content.recording_url {
        lines.push(format!("Recording: {}", url));
    }
    lines.join("\n")
}

/// Points an existing call activity at the archived recording.
pub async fn patch_call_recording_url(
    crm: &dyn CrmClient,
    engagement_id: &str,
    url: &str,
) -> Result<()> {
    let mut props = CrmProperties::new();
    props.set("hs_call_recording_url", url);
    crm.update_call(engagement_id, &props).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("in".parse::<CallDirection>().unwrap(), CallDirection::Inbound);
        assert_eq!(" OUTBOUND ".parse::<CallDirection>().unwrap(), CallDirection::Outbound);
        assert!("sideways".parse::<CallDirection>().is_err());
    }

    #[test]
    fn test_call_properties() {
        let call = CallEngagement {
            timestamp: DateTime::from_timestamp(1_769_693_940, 0).unwrap(),
            title: call_title(CallDirection::Inbound, Disposition::Booked, "Ada Lovelace"),
            body: String::new(),
            direction: CallDirection::Inbound,
            duration_secs: 3723,
            disposition_id: "guid".to_string(),
            from_number: Some("+61412345678".to_string()),
            to_number: None,
            recording_url: Some("https://rec/1.mp3".to_string()),
        };
        let props = call.to_properties();
        assert_eq!(props.get("hs_timestamp"), Some("1769693940000"));
        assert_eq!(props.get("hs_call_duration"), Some("3723000"));
        assert_eq!(props.get("hs_call_direction"), Some("INBOUND"));
        assert_eq!(
            props.get("hs_call_title"),
            Some("Inbound call - Appointment Booked (Ada Lovelace)")
        );
        assert_eq!(props.get("hs_call_recording_url"), Some("https://rec/1.mp3"));
        assert!(!props.contains("hs_call_body"));
        assert!(!props.contains("hs_call_to_number"));
    }

    #[test]
    fn test_render_note() {
        let note = render_note(
            Disposition::NotInterested,
            &NoteContent {
                agent_name: "Ada",
                sub_reason: Some("price"),
                duration_secs: Some(125),
                ..Default::default()
            },
        );
        assert_eq!(
            note,
            "Customer not interested (Ada)\nOutcome: Not Interested\nDetail: price\nDuration: 2m 05s"
        );
        let note = render_note(
            Disposition::NoAnswer,
            &NoteContent {
                agent_name: "Ada",
                duration_secs: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(note, "No answer. Call attempted by Ada\nOutcome: No Answer");
    }
}
