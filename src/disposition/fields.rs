use super::{map_disposition, Disposition};
use crate::error::{SyncError, SyncResult};
use crate::normalize::PhoneFormat;
use chrono::{NaiveDate, NaiveTime};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const MULTI_SELECT_DELIMITER: char = ';';

/// Property writes for one CRM object. Keys are CRM internal names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CrmProperties(BTreeMap<String, String>);

impl CrmProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Skips absent and blank values so an existing CRM value is never
    /// overwritten with an empty one.
    pub fn set_if_present(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// A yes/no radio group that may be left unanswered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriState {
    Yes,
    No,
    #[default]
    Blank,
}

impl TriState {
    /// `None` means the property must be omitted, not written as false.
    pub fn to_crm(self) -> Option<&'static str> {
        match self {
            TriState::Yes => Some("true"),
            TriState::No => Some("false"),
            TriState::Blank => None,
        }
    }
}

impl<'de> Deserialize<'de> for TriState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(TriState::Blank),
            Value::Bool(true) => Ok(TriState::Yes),
            Value::Bool(false) => Ok(TriState::No),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(TriState::Blank),
                "yes" | "y" | "true" | "1" => Ok(TriState::Yes),
                "no" | "n" | "false" | "0" => Ok(TriState::No),
                other => Err(de::Error::custom(format!(
                    "expected yes, no or blank, got \"{}\"",
                    other
                ))),
            },
            other => Err(de::Error::custom(format!(
                "expected yes, no or blank, got {}",
                other
            ))),
        }
    }
}

/// Contact list classification. At most one may be applied to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFlag {
    Amber,
    #[serde(alias = "gray")]
    Grey,
    Black,
}

impl ListFlag {
    pub fn property(&self) -> &'static str {
        match self {
            ListFlag::Amber => "amber_list",
            ListFlag::Grey => "grey_list",
            ListFlag::Black => "black_list",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContactDetails {
    pub contact_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallContext {
    pub call_id: Option<String>,
    pub agent_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BasicForm {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(flatten)]
    pub context: CallContext,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookedForm {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(flatten)]
    pub context: CallContext,
    #[serde(default)]
    pub appointment_date: Option<String>,
    #[serde(default)]
    pub appointment_time: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "deserialize_multi_select")]
    pub water_concerns: Vec<String>,
    #[serde(default)]
    pub has_water_filter: TriState,
    #[serde(default)]
    pub homeowner: TriState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifiedForm {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(flatten)]
    pub context: CallContext,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub list_flag: Option<ListFlag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackForm {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(flatten)]
    pub context: CallContext,
    #[serde(default)]
    pub callback_date: Option<String>,
    #[serde(default)]
    pub callback_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealForm {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(flatten)]
    pub context: CallContext,
    #[serde(default)]
    pub deal_amount: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoNotContactForm {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(flatten)]
    pub context: CallContext,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferralForm {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(flatten)]
    pub context: CallContext,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub create_deal: bool,
    #[serde(default)]
    pub deal_name: Option<String>,
    #[serde(default)]
    pub deal_amount: Option<f64>,
}

/// An agent's call outcome form, one variant per canonical disposition.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum DispositionForm {
    Connected(BasicForm),
    Booked(BookedForm),
    NoAnswer(BasicForm),
    WrongNumber(BasicForm),
    NotInterested(ClassifiedForm),
    Busy(BasicForm),
    VoicemailLeft(BasicForm),
    UnableToService(ClassifiedForm),
    Transferred(BasicForm),
    CallbackRequested(CallbackForm),
    DealWon(DealForm),
    DealLost(DealForm),
    DoNotContact(DoNotContactForm),
    OtherDepartment(ReferralForm),
}

/// Deal creation requested alongside an internal sales referral.
#[derive(Debug, Clone, PartialEq)]
pub struct DealRequest {
    pub name: String,
    pub amount: Option<f64>,
}

impl DispositionForm {
    /// Parses a raw submission, mapping its free-form `disposition` label to
    /// the canonical category before selecting the payload shape.
    pub fn from_value(mut value: Value) -> SyncResult<Self> {
        let object = value
            .as_object_mut()
            .ok_or_else(|| SyncError::InvalidPayload("expected a JSON object".to_string()))?;
        let raw = match object.get("disposition") {
            Some(Value::String(raw)) if !raw.trim().is_empty() => raw.clone(),
            _ => return Err(SyncError::MissingField("disposition")),
        };
        let disposition = map_disposition(&raw)?;
        object.insert(
            "disposition".to_string(),
            Value::String(disposition.as_str().to_string()),
        );
        serde_json::from_value(value).map_err(|e| SyncError::InvalidPayload(e.to_string()))
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            DispositionForm::Connected(_) => Disposition::Connected,
            DispositionForm::Booked(_) => Disposition::Booked,
            DispositionForm::NoAnswer(_) => Disposition::NoAnswer,
            DispositionForm::WrongNumber(_) => Disposition::WrongNumber,
            DispositionForm::NotInterested(_) => Disposition::NotInterested,
            DispositionForm::Busy(_) => Disposition::Busy,
            DispositionForm::VoicemailLeft(_) => Disposition::VoicemailLeft,
            DispositionForm::UnableToService(_) => Disposition::UnableToService,
            DispositionForm::Transferred(_) => Disposition::Transferred,
            DispositionForm::CallbackRequested(_) => Disposition::CallbackRequested,
            DispositionForm::DealWon(_) => Disposition::DealWon,
            DispositionForm::DealLost(_) => Disposition::DealLost,
            DispositionForm::DoNotContact(_) => Disposition::DoNotContact,
            DispositionForm::OtherDepartment(_) => Disposition::OtherDepartment,
        }
    }

    pub fn contact(&self) -> &ContactDetails {
        match self {
            DispositionForm::Connected(f)
            | DispositionForm::NoAnswer(f)
            | DispositionForm::WrongNumber(f)
            | DispositionForm::Busy(f)
            | DispositionForm::VoicemailLeft(f)
            | DispositionForm::Transferred(f) => &f.contact,
            DispositionForm::Booked(f) => &f.contact,
            DispositionForm::NotInterested(f) | DispositionForm::UnableToService(f) => &f.contact,
            DispositionForm::CallbackRequested(f) => &f.contact,
            DispositionForm::DealWon(f) | DispositionForm::DealLost(f) => &f.contact,
            DispositionForm::DoNotContact(f) => &f.contact,
            DispositionForm::OtherDepartment(f) => &f.contact,
        }
    }

    pub fn context(&self) -> &CallContext {
        match self {
            DispositionForm::Connected(f)
            | DispositionForm::NoAnswer(f)
            | DispositionForm::WrongNumber(f)
            | DispositionForm::Busy(f)
            | DispositionForm::VoicemailLeft(f)
            | DispositionForm::Transferred(f) => &f.context,
            DispositionForm::Booked(f) => &f.context,
            DispositionForm::NotInterested(f) | DispositionForm::UnableToService(f) => &f.context,
            DispositionForm::CallbackRequested(f) => &f.context,
            DispositionForm::DealWon(f) | DispositionForm::DealLost(f) => &f.context,
            DispositionForm::DoNotContact(f) => &f.context,
            DispositionForm::OtherDepartment(f) => &f.context,
        }
    }

    /// Short secondary reason shown in the call note.
    pub fn sub_reason(&self) -> Option<String> {
        let reason = match self {
            DispositionForm::NotInterested(f) | DispositionForm::UnableToService(f) => {
                let reason = f.reason.clone().filter(|r| !r.trim().is_empty());
                match (reason, f.list_flag) {
                    (Some(reason), Some(flag)) => {
                        Some(format!("{} ({})", reason, flag.property()))
                    }
                    (Some(reason), None) => Some(reason),
                    (None, Some(flag)) => Some(flag.property().to_string()),
                    (None, None) => None,
                }
            }
            DispositionForm::DealWon(f) | DispositionForm::DealLost(f) => f.reason.clone(),
            DispositionForm::DoNotContact(f) => f.reason.clone(),
            DispositionForm::OtherDepartment(f) => f.department.clone(),
            DispositionForm::Booked(f) => {
                let when = [f.appointment_date.as_deref(), f.appointment_time.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                (!when.is_empty()).then(|| format!("Appointment {}", when))
            }
            DispositionForm::CallbackRequested(f) => {
                let when = [f.callback_date.as_deref(), f.callback_time.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                (!when.is_empty()).then(|| format!("Call back {}", when))
            }
            _ => None,
        };
        reason.filter(|r| !r.trim().is_empty())
    }

    /// The explicit deal step; only internal sales referrals with
    /// `create_deal` ask for one.
    pub fn deal_request(&self) -> Option<DealRequest> {
        let DispositionForm::OtherDepartment(form) = self else {
            return None;
        };
        if !form.create_deal {
            return None;
        }
        let contact = &form.contact;
        let who = [contact.first_name.as_deref(), contact.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let name = form
            .deal_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                if who.is_empty() {
                    "Internal sales referral".to_string()
                } else {
                    format!("Internal sales referral - {}", who)
                }
            });
        Some(DealRequest {
            name,
            amount: form.deal_amount,
        })
    }
}

/// Accepts either a JSON array or an already-joined `A;B` string.
fn deserialize_multi_select<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(parse_multi_select(&s)),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(de::Error::custom(format!(
                    "expected a string option, got {}",
                    other
                ))),
            })
            .collect(),
        other => Err(de::Error::custom(format!(
            "expected a list of options, got {}",
            other
        ))),
    }
}

pub fn join_multi_select(values: &[String]) -> String {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(&MULTI_SELECT_DELIMITER.to_string())
}

pub fn parse_multi_select(raw: &str) -> Vec<String> {
    raw.split(MULTI_SELECT_DELIMITER)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// CRM date properties hold UTC midnight of the calendar day, in millis.
pub fn local_date_to_epoch_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let date = ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())?;
    Some(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

#[derive(Debug, Clone, Default)]
pub struct FieldBuilder {
    phone: PhoneFormat,
}

impl FieldBuilder {
    pub fn new(phone: PhoneFormat) -> Self {
        Self { phone }
    }

    pub fn build(&self, form: &DispositionForm) -> CrmProperties {
        let mut props = CrmProperties::new();
        self.identity(&mut props, form.contact());
        props.set("last_call_disposition", form.disposition().as_str());
        props.set_if_present("last_call_agent", form.context().agent_name.as_deref());

        match form {
            DispositionForm::Booked(f) => booked(&mut props, f),
            DispositionForm::NotInterested(f) => {
                classified(&mut props, "not_interested_reason", f)
            }
            DispositionForm::UnableToService(f) => {
                classified(&mut props, "unable_to_service_reason", f)
            }
            DispositionForm::CallbackRequested(f) => {
                set_date(&mut props, "callback_date", f.callback_date.as_deref());
                props.set_if_present("callback_time", f.callback_time.as_deref());
            }
            DispositionForm::DealWon(f) => deal(&mut props, "won", f),
            DispositionForm::DealLost(f) => deal(&mut props, "lost", f),
            DispositionForm::DoNotContact(f) => {
                props.set("do_not_contact", "true");
                props.set_if_present("do_not_contact_reason", f.reason.as_deref());
            }
            DispositionForm::OtherDepartment(f) => {
                props.set(
                    "referred_department",
                    f.department
                        .as_deref()
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .unwrap_or("internal_sales"),
                );
            }
            DispositionForm::Connected(_)
            | DispositionForm::NoAnswer(_)
            | DispositionForm::WrongNumber(_)
            | DispositionForm::Busy(_)
            | DispositionForm::VoicemailLeft(_)
            | DispositionForm::Transferred(_) => {}
        }
        props
    }

    fn identity(&self, props: &mut CrmProperties, contact: &ContactDetails) {
        props.set_if_present("firstname", contact.first_name.as_deref());
        props.set_if_present("lastname", contact.last_name.as_deref());
        props.set_if_present("email", contact.email.as_deref());
        let phone = contact
            .phone
            .as_deref()
            .map(|p| self.phone.format(p.trim()));
        props.set_if_present("phone", phone.as_deref());
    }
}

pub fn build_properties(form: &DispositionForm) -> CrmProperties {
    FieldBuilder::default().build(form)
}

fn set_date(props: &mut CrmProperties, key: &str, raw: Option<&str>) {
    if let Some(ms) = raw.and_then(local_date_to_epoch_ms) {
        props.set(key, ms.to_string());
    }
}

fn set_tri_state(props: &mut CrmProperties, key: &str, value: TriState) {
    if let Some(v) = value.to_crm() {
        props.set(key, v);
    }
}

fn booked(props: &mut CrmProperties, form: &BookedForm) {
    set_date(props, "appointment_date", form.appointment_date.as_deref());
    props.set_if_present("appointment_time", form.appointment_time.as_deref());
    props.set_if_present("address", form.address.as_deref());
    let concerns = join_multi_select(&form.water_concerns);
    props.set_if_present("water_concerns", Some(concerns.as_str()));
    set_tri_state(props, "has_water_filter", form.has_water_filter);
    set_tri_state(props, "homeowner", form.homeowner);
}

fn classified(props: &mut CrmProperties, reason_key: &str, form: &ClassifiedForm) {
    props.set_if_present(reason_key, form.reason.as_deref());
    if let Some(flag) = form.list_flag {
        props.set(flag.property(), "true");
    }
}

fn deal(props: &mut CrmProperties, outcome: &str, form: &DealForm) {
    props.set("deal_outcome", outcome);
    if let Some(amount) = form.deal_amount {
        props.set("deal_amount", amount.to_string());
    }
    props.set_if_present("deal_outcome_reason", form.reason.as_deref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(value: Value) -> DispositionForm {
        DispositionForm::from_value(value).unwrap()
    }

    #[test]
    fn test_multi_select_round_trip() {
        let values = vec!["A".to_string(), "B".to_string()];
        let joined = join_multi_select(&values);
        assert_eq!(joined, "A;B");
        assert_eq!(parse_multi_select(&joined), values);
        assert_eq!(parse_multi_select(" Hard water ; Taste;"), vec!["Hard water", "Taste"]);
        assert!(parse_multi_select("").is_empty());
    }

    #[test]
    fn test_local_date_to_epoch_ms() {
        assert_eq!(local_date_to_epoch_ms("2026-01-29"), Some(1_769_644_800_000));
        assert_eq!(local_date_to_epoch_ms("29/01/2026"), Some(1_769_644_800_000));
        assert_eq!(local_date_to_epoch_ms("tomorrow"), None);
    }

    #[test]
    fn test_free_form_disposition_selects_variant() {
        let parsed = form(json!({ "disposition": "Not Intrested", "reason": "price" }));
        assert_eq!(parsed.disposition(), Disposition::NotInterested);
        assert_eq!(parsed.sub_reason().as_deref(), Some("price"));
    }

    #[test]
    fn test_missing_or_unknown_disposition() {
        assert!(matches!(
            DispositionForm::from_value(json!({ "email": "a@b.c" })),
            Err(SyncError::MissingField("disposition"))
        ));
        assert!(matches!(
            DispositionForm::from_value(json!({ "disposition": "sort of" })),
            Err(SyncError::UnknownDisposition(_))
        ));
        assert!(matches!(
            DispositionForm::from_value(json!(["booked"])),
            Err(SyncError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_identity_never_written_blank() {
        let props = build_properties(&form(json!({
            "disposition": "connected",
            "first_name": "Ada",
            "last_name": "",
            "email": "   ",
            "phone": "0412 345 678",
        })));
        assert_eq!(props.get("firstname"), Some("Ada"));
        assert!(!props.contains("lastname"));
        assert!(!props.contains("email"));
        assert_eq!(props.get("phone"), Some("+61412345678"));
        assert_eq!(props.get("last_call_disposition"), Some("connected"));
    }

    #[test]
    fn test_booked_properties() {
        let props = build_properties(&form(json!({
            "disposition": "booked",
            "email": "ada@example.com",
            "appointment_date": "2026-01-29",
            "appointment_time": "10:30",
            "water_concerns": ["Hard water", "Taste"],
            "has_water_filter": "no",
            "homeowner": "",
        })));
        assert_eq!(props.get("appointment_date"), Some("1769644800000"));
        assert_eq!(props.get("appointment_time"), Some("10:30"));
        assert_eq!(props.get("water_concerns"), Some("Hard water;Taste"));

        let joined = form(json!({
            "disposition": "booked",
            "water_concerns": "Hard water; Taste",
        }));
        let DispositionForm::Booked(booked) = joined else {
            panic!("expected booked form");
        };
        assert_eq!(booked.water_concerns, vec!["Hard water", "Taste"]);
        assert_eq!(props.get("has_water_filter"), Some("false"));
        assert!(!props.contains("homeowner"));
    }

    #[test]
    fn test_tri_state_parsing() {
        let parsed = form(json!({
            "disposition": "booked",
            "has_water_filter": true,
            "homeowner": null,
        }));
        let DispositionForm::Booked(booked) = parsed else {
            panic!("expected booked form");
        };
        assert_eq!(booked.has_water_filter, TriState::Yes);
        assert_eq!(booked.homeowner, TriState::Blank);
        assert!(DispositionForm::from_value(json!({
            "disposition": "booked",
            "homeowner": "perhaps",
        }))
        .is_err());
    }

    #[test]
    fn test_list_flags_are_exclusive() {
        for (flag, key) in [
            ("amber", "amber_list"),
            ("grey", "grey_list"),
            ("gray", "grey_list"),
            ("black", "black_list"),
        ] {
            let props = build_properties(&form(json!({
                "disposition": "unable_to_service",
                "list_flag": flag,
            })));
            assert_eq!(props.get(key), Some("true"));
            let set = ["amber_list", "grey_list", "black_list"]
                .iter()
                .filter(|k| props.contains(k))
                .count();
            assert_eq!(set, 1, "flag {}", flag);
        }
        let props = build_properties(&form(json!({ "disposition": "not_interested" })));
        assert!(!props.contains("amber_list"));
        assert!(!props.contains("grey_list"));
        assert!(!props.contains("black_list"));
    }

    #[test]
    fn test_referral_never_builds_deal_properties() {
        let parsed = form(json!({
            "disposition": "Internal Sales",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "create_deal": true,
        }));
        let props = build_properties(&parsed);
        assert_eq!(props.get("referred_department"), Some("internal_sales"));
        assert!(!props.iter().any(|(k, _)| k.starts_with("deal")));
        assert_eq!(
            parsed.deal_request(),
            Some(DealRequest {
                name: "Internal sales referral - Ada Lovelace".to_string(),
                amount: None,
            })
        );

        let no_deal = form(json!({ "disposition": "other_department" }));
        assert_eq!(no_deal.deal_request(), None);
        let booked = form(json!({ "disposition": "booked", "create_deal": true }));
        assert_eq!(booked.deal_request(), None);
    }

    #[test]
    fn test_do_not_contact_and_deal_outcomes() {
        let props = build_properties(&form(json!({
            "disposition": "DNC",
            "reason": "asked to be removed",
        })));
        assert_eq!(props.get("do_not_contact"), Some("true"));
        assert_eq!(props.get("do_not_contact_reason"), Some("asked to be removed"));

        let props = build_properties(&form(json!({
            "disposition": "closed won",
            "deal_amount": 1500.5,
        })));
        assert_eq!(props.get("deal_outcome"), Some("won"));
        assert_eq!(props.get("deal_amount"), Some("1500.5"));
    }
}
