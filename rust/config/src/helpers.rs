use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

pub fn deserialize_duration_from_seconds<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(d)?;
    Ok(Duration::from_secs(secs))
}

pub fn serialize_duration_to_seconds<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs().serialize(s)
}

/// Same as [`deserialize_duration_from_seconds`] for fields that may be absent.
pub fn deserialize_optional_duration_from_seconds<'de, D>(
    d: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<u64>::deserialize(d)?;
    Ok(secs.map(Duration::from_secs))
}

pub fn serialize_optional_duration_to_seconds<S>(
    duration: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.map(|d| d.as_secs()).serialize(s)
}
