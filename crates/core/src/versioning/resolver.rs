use chrono::{DateTime, Utc};

use super::deprecation::{self, VersionHeaders};
use super::ResolutionError;
use crate::domain::process::{Environment, ProcessVersion, VersionStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionRequest {
    pub environment: Environment,
    pub pinned_version: Option<u32>,
}

impl VersionRequest {
    pub fn latest(environment: Environment) -> Self {
        Self { environment, pinned_version: None }
    }

    pub fn pinned(environment: Environment, version: u32) -> Self {
        Self { environment, pinned_version: Some(version) }
    }
}

/// Outcome of a resolution. Derived per request and never cached.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedVersion {
    pub version: ProcessVersion,
    pub is_pinned: bool,
    pub is_deprecated: bool,
    pub sunset_date: Option<DateTime<Utc>>,
    pub latest_version: u32,
}

impl ResolvedVersion {
    pub fn headers_at(&self, now: DateTime<Utc>) -> VersionHeaders {
        VersionHeaders::for_resolution(self, now)
    }

    pub fn deprecation_message_at(&self, now: DateTime<Utc>) -> Option<String> {
        self.is_deprecated.then(|| {
            deprecation::deprecation_message(
                self.version.version,
                self.latest_version,
                self.sunset_date,
                now,
            )
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VersionResolver;

impl VersionResolver {
    pub fn new() -> Self {
        Self
    }

    /// `Ok(None)` means the environment has nothing servable and no pin was given.
    pub fn resolve(
        &self,
        versions: &[ProcessVersion],
        request: &VersionRequest,
    ) -> Result<Option<ResolvedVersion>, ResolutionError> {
        let latest_version = versions.iter().map(|version| version.version).max().unwrap_or(0);

        let (chosen, is_pinned) = match request.pinned_version {
            Some(pin) => (Self::pinned(versions, pin, request.environment)?, true),
            None => match Self::preferred(versions, request.environment) {
                Some(chosen) => (chosen, false),
                None => return Ok(None),
            },
        };

        let is_deprecated = chosen.is_deprecated();
        let sunset_date = chosen.deprecated_at.map(deprecation::sunset_date);

        Ok(Some(ResolvedVersion {
            version: chosen.clone(),
            is_pinned,
            is_deprecated,
            sunset_date,
            latest_version,
        }))
    }

    pub fn resolve_required(
        &self,
        versions: &[ProcessVersion],
        request: &VersionRequest,
    ) -> Result<ResolvedVersion, ResolutionError> {
        self.resolve(versions, request)?
            .ok_or(ResolutionError::NoActiveVersion { environment: request.environment })
    }

    fn pinned(
        versions: &[ProcessVersion],
        pin: u32,
        environment: Environment,
    ) -> Result<&ProcessVersion, ResolutionError> {
        // Looked up across every environment so a cross-environment pin is
        // reported as a mismatch rather than as missing.
        let Some(found) = versions.iter().find(|version| version.version == pin) else {
            let mut available = versions
                .iter()
                .filter(|version| version.environment == environment)
                .map(|version| version.version)
                .collect::<Vec<_>>();
            available.sort_unstable();
            available.dedup();
            return Err(ResolutionError::VersionNotFound { requested: pin, available, environment });
        };

        if found.environment != environment {
            return Err(ResolutionError::EnvironmentMismatch {
                requested: pin,
                version_environment: found.environment,
                request_environment: environment,
            });
        }

        Ok(found)
    }

    fn preferred(versions: &[ProcessVersion], environment: Environment) -> Option<&ProcessVersion> {
        let in_environment = versions.iter().filter(|version| version.environment == environment);

        let active = newest(in_environment.clone().filter(|version| {
            version.status == VersionStatus::Active && version.deprecated_at.is_none()
        }));
        if active.is_some() || environment != Environment::Sandbox {
            return active;
        }

        newest(in_environment.filter(|version| version.status == VersionStatus::Draft))
    }
}

fn newest<'a>(candidates: impl Iterator<Item = &'a ProcessVersion>) -> Option<&'a ProcessVersion> {
    candidates.max_by(|left, right| {
        left.created_at.cmp(&right.created_at).then(left.version.cmp(&right.version))
    })
}

/// Parses the caller's pin header. Absent means "no pin"; anything present
/// must be a positive integer.
pub fn parse_pin_header(raw: Option<&str>) -> Result<Option<u32>, ResolutionError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u32>() {
        Ok(version) if version > 0 => Ok(Some(version)),
        _ => Err(ResolutionError::InvalidVersionHeader { raw: raw.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{parse_pin_header, VersionRequest, VersionResolver};
    use crate::domain::process::fixtures::version;
    use crate::domain::process::{Environment, ProcessVersion, VersionStatus};
    use crate::versioning::ResolutionError;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().expect("valid date") + Duration::days(n)
    }

    fn production_pair() -> Vec<ProcessVersion> {
        vec![
            version(1, Environment::Production, VersionStatus::Deprecated, Some(day(0)), day(-10)),
            version(2, Environment::Production, VersionStatus::Active, None, day(0)),
        ]
    }

    #[test]
    fn unpinned_request_picks_active_version() {
        let resolved = VersionResolver::new()
            .resolve(&production_pair(), &VersionRequest::latest(Environment::Production))
            .expect("resolution")
            .expect("a version");

        assert_eq!(resolved.version.version, 2);
        assert!(!resolved.is_pinned);
        assert!(!resolved.is_deprecated);
        assert_eq!(resolved.sunset_date, None);
        assert_eq!(resolved.latest_version, 2);
    }

    #[test]
    fn pinned_deprecated_version_is_served_with_sunset() {
        let resolved = VersionResolver::new()
            .resolve(&production_pair(), &VersionRequest::pinned(Environment::Production, 1))
            .expect("resolution")
            .expect("a version");

        assert_eq!(resolved.version.version, 1);
        assert!(resolved.is_pinned);
        assert!(resolved.is_deprecated);
        assert_eq!(resolved.sunset_date, Some(day(90)));
        assert_eq!(
            resolved.deprecation_message_at(day(1)).as_deref(),
            Some("Version 1 is deprecated. Latest version is 2. Sunset in 89 days.")
        );
    }

    #[test]
    fn unknown_pin_lists_available_versions() {
        let error = VersionResolver::new()
            .resolve(&production_pair(), &VersionRequest::pinned(Environment::Production, 99))
            .expect_err("missing pin");

        assert_eq!(
            error,
            ResolutionError::VersionNotFound {
                requested: 99,
                available: vec![1, 2],
                environment: Environment::Production,
            }
        );
        assert_eq!(error.details()["availableVersions"], json!([1, 2]));
        assert_eq!(error.details()["requestedVersion"], json!(99));
    }

    #[test]
    fn cross_environment_pin_is_a_mismatch_regardless_of_status() {
        for status in [VersionStatus::Draft, VersionStatus::Active, VersionStatus::Deprecated] {
            let versions = vec![
                version(1, Environment::Sandbox, status, None, day(0)),
                version(2, Environment::Production, VersionStatus::Active, None, day(1)),
            ];
            let error = VersionResolver::new()
                .resolve(&versions, &VersionRequest::pinned(Environment::Production, 1))
                .expect_err("mismatch");

            let details = error.details();
            assert_eq!(details["versionEnvironment"], json!("SANDBOX"));
            assert_eq!(details["requestEnvironment"], json!("PRODUCTION"));
            assert!(matches!(error, ResolutionError::EnvironmentMismatch { .. }));
        }
    }

    #[test]
    fn newest_active_wins_ties_then_higher_number() {
        let versions = vec![
            version(3, Environment::Production, VersionStatus::Active, None, day(5)),
            version(4, Environment::Production, VersionStatus::Active, None, day(2)),
            version(5, Environment::Production, VersionStatus::Active, None, day(5)),
        ];
        let resolved = VersionResolver::new()
            .resolve(&versions, &VersionRequest::latest(Environment::Production))
            .expect("resolution")
            .expect("a version");
        assert_eq!(resolved.version.version, 5);
    }

    #[test]
    fn active_with_deprecation_timestamp_is_not_preferred() {
        let versions = vec![version(
            1,
            Environment::Production,
            VersionStatus::Active,
            Some(day(0)),
            day(0),
        )];
        let resolver = VersionResolver::new();
        let request = VersionRequest::latest(Environment::Production);

        assert_eq!(resolver.resolve(&versions, &request).expect("resolution"), None);
        assert_eq!(
            resolver.resolve_required(&versions, &request).expect_err("nothing servable"),
            ResolutionError::NoActiveVersion { environment: Environment::Production }
        );
    }

    #[test]
    fn sandbox_falls_back_to_newest_draft_but_production_does_not() {
        let versions = vec![
            version(1, Environment::Sandbox, VersionStatus::Draft, None, day(0)),
            version(2, Environment::Sandbox, VersionStatus::Draft, None, day(3)),
            version(3, Environment::Production, VersionStatus::Draft, None, day(4)),
        ];
        let resolver = VersionResolver::new();

        let sandbox = resolver
            .resolve(&versions, &VersionRequest::latest(Environment::Sandbox))
            .expect("resolution")
            .expect("draft fallback");
        assert_eq!(sandbox.version.version, 2);
        assert_eq!(sandbox.latest_version, 3);

        let production = resolver
            .resolve(&versions, &VersionRequest::latest(Environment::Production))
            .expect("resolution");
        assert_eq!(production, None);
    }

    #[test]
    fn pin_header_must_be_positive_integer() {
        assert_eq!(parse_pin_header(None), Ok(None));
        assert_eq!(parse_pin_header(Some(" 7 ")), Ok(Some(7)));
        for raw in ["0", "-1", "v2", "", "1.5"] {
            assert!(
                matches!(
                    parse_pin_header(Some(raw)),
                    Err(ResolutionError::InvalidVersionHeader { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }
}
