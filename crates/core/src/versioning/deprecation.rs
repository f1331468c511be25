use chrono::{DateTime, Duration, SecondsFormat, Utc};

use super::resolver::ResolvedVersion;

pub const SUNSET_PERIOD_DAYS: i64 = 90;
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

// Lower-case so they can be used as static HTTP header names.
pub const HEADER_VERSION: &str = "x-version";
pub const HEADER_VERSION_STATUS: &str = "x-version-status";
pub const HEADER_ENVIRONMENT: &str = "x-environment";
pub const HEADER_DEPRECATED: &str = "x-deprecated";
pub const HEADER_DEPRECATED_MESSAGE: &str = "x-deprecated-message";
pub const HEADER_SUNSET_DATE: &str = "x-sunset-date";

pub fn sunset_date(deprecated_at: DateTime<Utc>) -> DateTime<Utc> {
    deprecated_at + Duration::days(SUNSET_PERIOD_DAYS)
}

/// Whole days left, rounded up. Zero or negative once the sunset instant is reached.
pub fn days_until_sunset(sunset: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining = (sunset - now).num_milliseconds();
    if remaining > 0 {
        (remaining + DAY_MILLIS - 1) / DAY_MILLIS
    } else {
        remaining.div_euclid(DAY_MILLIS)
    }
}

pub fn deprecation_message(
    version: u32,
    latest_version: u32,
    sunset: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    let lead = format!("Version {version} is deprecated. Latest version is {latest_version}.");
    let Some(sunset) = sunset else {
        return lead;
    };
    match days_until_sunset(sunset, now) {
        1 => format!("{lead} Sunset in 1 day."),
        days if days > 0 => format!("{lead} Sunset in {days} days."),
        _ => format!("{lead} This version is past its sunset date."),
    }
}

/// Response headers describing the resolved version, in emission order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionHeaders {
    entries: Vec<(&'static str, String)>,
}

impl VersionHeaders {
    pub fn for_resolution(resolved: &ResolvedVersion, now: DateTime<Utc>) -> Self {
        let status = if resolved.is_deprecated { "deprecated" } else { "active" };
        let mut entries = vec![
            (HEADER_VERSION, resolved.version.version.to_string()),
            (HEADER_VERSION_STATUS, status.to_string()),
            (HEADER_ENVIRONMENT, resolved.version.environment.as_str().to_string()),
        ];

        if resolved.is_deprecated {
            entries.push((HEADER_DEPRECATED, "true".to_string()));
            if let Some(message) = resolved.deprecation_message_at(now) {
                entries.push((HEADER_DEPRECATED_MESSAGE, message));
            }
            if let Some(sunset) = resolved.sunset_date {
                entries.push((HEADER_SUNSET_DATE, sunset.to_rfc3339_opts(SecondsFormat::Millis, true)));
            }
        }

        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(name, value)| (*name, value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{
        days_until_sunset, deprecation_message, sunset_date, VersionHeaders, HEADER_DEPRECATED,
        HEADER_DEPRECATED_MESSAGE, HEADER_ENVIRONMENT, HEADER_SUNSET_DATE, HEADER_VERSION,
        HEADER_VERSION_STATUS,
    };
    use crate::domain::process::fixtures::version;
    use crate::domain::process::{Environment, VersionStatus};
    use crate::versioning::ResolvedVersion;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 8, 30, 0).single().expect("valid date")
    }

    #[test]
    fn sunset_is_exactly_ninety_days_after_deprecation() {
        assert_eq!(sunset_date(t()), t() + Duration::days(90));
    }

    #[test]
    fn message_flips_exactly_at_sunset_instant() {
        let sunset = sunset_date(t());

        let just_before = sunset - Duration::milliseconds(1);
        assert_eq!(days_until_sunset(sunset, just_before), 1);
        assert!(deprecation_message(1, 2, Some(sunset), just_before).ends_with("Sunset in 1 day."));

        assert_eq!(days_until_sunset(sunset, sunset), 0);
        assert!(deprecation_message(1, 2, Some(sunset), sunset)
            .ends_with("This version is past its sunset date."));

        let after = sunset + Duration::days(3);
        assert!(days_until_sunset(sunset, after) < 0);
    }

    #[test]
    fn partial_days_round_up() {
        let sunset = sunset_date(t());
        let now = t() + Duration::days(1) + Duration::hours(6);
        assert_eq!(days_until_sunset(sunset, now), 89);
    }

    #[test]
    fn headers_for_active_and_deprecated_versions() {
        let active = ResolvedVersion {
            version: version(2, Environment::Production, VersionStatus::Active, None, t()),
            is_pinned: false,
            is_deprecated: false,
            sunset_date: None,
            latest_version: 2,
        };
        let headers = VersionHeaders::for_resolution(&active, t());
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get(HEADER_VERSION), Some("2"));
        assert_eq!(headers.get(HEADER_VERSION_STATUS), Some("active"));
        assert_eq!(headers.get(HEADER_ENVIRONMENT), Some("production"));
        assert_eq!(headers.get(HEADER_DEPRECATED), None);

        let deprecated = ResolvedVersion {
            version: version(1, Environment::Production, VersionStatus::Deprecated, Some(t()), t()),
            is_pinned: true,
            is_deprecated: true,
            sunset_date: Some(sunset_date(t())),
            latest_version: 2,
        };
        let headers = VersionHeaders::for_resolution(&deprecated, t() + Duration::days(1));
        assert_eq!(headers.get("X-Deprecated"), Some("true"));
        assert_eq!(headers.get(HEADER_VERSION_STATUS), Some("deprecated"));
        assert_eq!(headers.get(HEADER_SUNSET_DATE), Some("2026-04-10T08:30:00.000Z"));
        assert_eq!(
            headers.get(HEADER_DEPRECATED_MESSAGE),
            Some("Version 1 is deprecated. Latest version is 2. Sunset in 89 days.")
        );
    }

    #[test]
    fn deprecated_status_without_timestamp_has_no_sunset_header() {
        let resolved = ResolvedVersion {
            version: version(1, Environment::Sandbox, VersionStatus::Deprecated, None, t()),
            is_pinned: true,
            is_deprecated: true,
            sunset_date: None,
            latest_version: 4,
        };
        let headers = VersionHeaders::for_resolution(&resolved, t());
        assert_eq!(headers.get(HEADER_SUNSET_DATE), None);
        assert_eq!(
            headers.get(HEADER_DEPRECATED_MESSAGE),
            Some("Version 1 is deprecated. Latest version is 4.")
        );
    }
}
