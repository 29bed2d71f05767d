//! Telephony webhook normalization.
//!
//! Providers deliver call status callbacks as flat key/value payloads with
//! inconsistent key spellings. This module turns them into a
//! [`ProviderEvent`] keyed by provider call id, which the attempt tracker
//! and the recording-upload job consume.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ProviderStatus;

const CALL_ID_KEYS: &[&str] = &["CallSid", "Call_Sid", "callId", "call_id", "campid", "Uniqueid"];
const STATUS_KEYS: &[&str] = &["Status", "status"];
const RECORDING_KEYS: &[&str] = &[
    "CallRecordingUrl",
    "Call_Recording_Url",
    "callRecordingUrl",
    "recordingUrl",
];
const DURATION_KEYS: &[&str] = &["Call Duration", "CallDuration", "Call_Duration", "callDuration"];
const FROM_KEYS: &[&str] = &["Dial Whom Number", "DialWhomNumber", "Dial_Whom_Number", "fromNumber", "From"];
const TO_KEYS: &[&str] = &["Source Number", "SourceNumber", "Source_Number", "toNumber", "To"];

/// A normalized provider callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider_call_id: String,
    pub status: ProviderStatus,
    /// Status text as the provider sent it.
    pub raw_status: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub duration_secs: Option<u32>,
    pub recording_url: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl ProviderEvent {
    /// Build an event from webhook query/form parameters.
    pub fn from_params(params: &HashMap<String, String>, received_at: DateTime<Utc>) -> Result<Self> {
        let provider_call_id = first(params, CALL_ID_KEYS)
            .ok_or_else(|| Error::InvalidInput("webhook payload has no call id".to_string()))?;
        let raw_status = first(params, STATUS_KEYS);

        Ok(Self {
            provider_call_id,
            status: normalize_status(raw_status.as_deref()),
            raw_status,
            from_number: first(params, FROM_KEYS),
            to_number: first(params, TO_KEYS),
            duration_secs: first(params, DURATION_KEYS).and_then(|d| d.parse().ok()),
            recording_url: first(params, RECORDING_KEYS),
            received_at,
        })
    }
}

/// Map provider status text to a [`ProviderStatus`].
///
/// Missing or unrecognized statuses (`ringing`, `in-progress`, ...) are
/// stored as `completed`, which settles no attempt; see
/// [`ProviderStatus::attempt_outcome`].
pub fn normalize_status(raw: Option<&str>) -> ProviderStatus {
    let Some(raw) = raw else {
        return ProviderStatus::Completed;
    };
    let s = raw.to_lowercase();
    // "no answer" / "unanswered" must win over the bare "answer" match.
    if s.contains("unans") || s.starts_with("no") {
        ProviderStatus::NoAnswer
    } else if s.contains("answer") {
        ProviderStatus::Answered
    } else if s.contains("busy") {
        ProviderStatus::Busy
    } else if s.contains("cancel") {
        ProviderStatus::Cancelled
    } else if s.contains("fail") {
        ProviderStatus::Failed
    } else {
        ProviderStatus::Completed
    }
}

fn first(params: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn normalizes_status_text() {
        assert_eq!(normalize_status(Some("ANSWER")), ProviderStatus::Answered);
        assert_eq!(normalize_status(Some("NOANSWER")), ProviderStatus::NoAnswer);
        assert_eq!(normalize_status(Some("no-answer")), ProviderStatus::NoAnswer);
        assert_eq!(normalize_status(Some("Unanswered")), ProviderStatus::NoAnswer);
        assert_eq!(normalize_status(Some("BUSY")), ProviderStatus::Busy);
        assert_eq!(normalize_status(Some("Cancelled")), ProviderStatus::Cancelled);
        assert_eq!(normalize_status(Some("FAILED")), ProviderStatus::Failed);
        assert_eq!(normalize_status(Some("weird")), ProviderStatus::Completed);
        assert_eq!(normalize_status(None), ProviderStatus::Completed);
    }

    #[test]
    fn reads_aliased_keys() {
        let event = ProviderEvent::from_params(
            &params(&[
                ("Call_Sid", "abc-123"),
                ("Status", "BUSY"),
                ("Call Duration", "0"),
                ("Call_Recording_Url", "https://rec.example.com/abc.mp3"),
                ("Dial Whom Number", "0801112222"),
                ("Source Number", "9876543210"),
            ]),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(event.provider_call_id, "abc-123");
        assert_eq!(event.status, ProviderStatus::Busy);
        assert_eq!(event.raw_status.as_deref(), Some("BUSY"));
        assert_eq!(
            event.recording_url.as_deref(),
            Some("https://rec.example.com/abc.mp3")
        );
        assert_eq!(event.from_number.as_deref(), Some("0801112222"));
        assert_eq!(event.to_number.as_deref(), Some("9876543210"));
        assert_eq!(event.duration_secs, Some(0));
    }

    #[test]
    fn intermediate_status_settles_no_attempt() {
        for raw in [Some("ringing"), Some("in-progress"), Some("initiated"), None] {
            let status = normalize_status(raw);
            assert_eq!(status, ProviderStatus::Completed);
            assert_eq!(status.attempt_outcome(), None, "{raw:?}");
        }
    }

    #[test]
    fn missing_call_id_is_invalid() {
        let result = ProviderEvent::from_params(&params(&[("Status", "ANSWER")]), Utc::now());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
