//! Search-filter semantics shared by the client and its tests.
//!
//! The monitoring source only accepts one `type`/`query` pair per request, so
//! the most selective exact filter goes to the server and every filter is
//! re-applied locally with AND semantics.

use recon_core::{Error, Result, SearchFilters, SourceRecord};

/// Reject filter sets with nothing to search on.
pub fn validate_filters(filters: &SearchFilters) -> Result<SearchFilters> {
    let normalized = filters.normalized();
    if normalized.is_empty() {
        return Err(Error::validation(
            "filters",
            "at least one search filter is required",
        ));
    }
    Ok(normalized)
}

/// The `(type, query)` pair sent to `/api/v0/devices`.
///
/// The server matches `os` and `sysName` exactly, so they are sent only when
/// they are the sole filter. Combined, they match by substring and are left
/// to [`matches`].
pub fn server_query(filters: &SearchFilters) -> Option<(&'static str, String)> {
    let alone = filters.active_count() == 1;
    let candidates = [
        ("location", &filters.location, true),
        ("type", &filters.device_type, true),
        ("hostname", &filters.hostname, true),
        ("hardware", &filters.hardware, true),
        ("os", &filters.os, alone),
        ("sysName", &filters.sys_name, alone),
    ];
    candidates
        .into_iter()
        .filter(|(_, _, usable)| *usable)
        .find_map(|(kind, value, _)| value.as_ref().map(|v| (kind, v.clone())))
}

fn exact(field: Option<&str>, wanted: &str) -> bool {
    field == Some(wanted)
}

fn contains(field: Option<&str>, wanted: &str) -> bool {
    field.is_some_and(|f| f.to_lowercase().contains(&wanted.to_lowercase()))
}

/// Whether `record` satisfies every filter. Expects normalized filters.
///
/// OS and system name are exact when they are the only filter and substring
/// when combined with others. Hostname and hardware are always substring.
pub fn matches(filters: &SearchFilters, record: &SourceRecord) -> bool {
    if record.disabled && !filters.include_disabled {
        return false;
    }

    let combined = filters.active_count() > 1;

    if let Some(location) = &filters.location {
        if !exact(record.location(), location) {
            return false;
        }
    }
    if let Some(device_type) = &filters.device_type {
        if !exact(record.device_type.as_deref().map(str::trim), device_type) {
            return false;
        }
    }
    if let Some(os) = &filters.os {
        let ok = if combined {
            contains(record.os(), os)
        } else {
            exact(record.os(), os)
        };
        if !ok {
            return false;
        }
    }
    if let Some(sys_name) = &filters.sys_name {
        let ok = if combined {
            contains(record.sys_name(), sys_name)
        } else {
            exact(record.sys_name(), sys_name)
        };
        if !ok {
            return false;
        }
    }
    if let Some(hostname) = &filters.hostname {
        if !contains(record.hostname(), hostname) {
            return false;
        }
    }
    if let Some(hardware) = &filters.hardware {
        if !contains(record.hardware(), hardware) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> SourceRecord {
        SourceRecord {
            device_id: id,
            hostname: Some("core-01.example.com".into()),
            sys_name: Some("core-01".into()),
            location: Some("New York".into()),
            hardware: Some("Cisco Catalyst 9300-48P".into()),
            os: Some("iosxe".into()),
            device_type: Some("network".into()),
            ip: Some("10.0.0.1".into()),
            serial: None,
            version: None,
            status: true,
            disabled: false,
        }
    }

    fn filters() -> SearchFilters {
        SearchFilters::default()
    }

    #[test]
    fn test_empty_filters_rejected() {
        let err = validate_filters(&SearchFilters {
            hostname: Some("   ".into()),
            include_disabled: true,
            ..filters()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation { field, .. } if field == "filters"));
    }

    #[test]
    fn test_location_is_exact_and_case_sensitive() {
        let rec = record(1);
        let f = |loc: &str| SearchFilters {
            location: Some(loc.into()),
            ..filters()
        };
        assert!(matches(&f("New York"), &rec));
        assert!(!matches(&f("new york"), &rec));
        assert!(!matches(&f("New"), &rec));
    }

    #[test]
    fn test_os_alone_is_exact() {
        let rec = record(1);
        let f = SearchFilters {
            os: Some("ios".into()),
            ..filters()
        };
        assert!(!matches(&f, &rec));
    }

    #[test]
    fn test_os_combined_is_substring() {
        let rec = record(1);
        let f = SearchFilters {
            os: Some("IOS".into()),
            location: Some("New York".into()),
            ..filters()
        };
        assert!(matches(&f, &rec));
    }

    #[test]
    fn test_sys_name_alone_exact_combined_substring() {
        let rec = record(1);
        let alone = SearchFilters {
            sys_name: Some("core".into()),
            ..filters()
        };
        assert!(!matches(&alone, &rec));

        let combined = SearchFilters {
            sys_name: Some("core".into()),
            hostname: Some("example".into()),
            ..filters()
        };
        assert!(matches(&combined, &rec));
    }

    #[test]
    fn test_hostname_and_hardware_are_substring() {
        let rec = record(1);
        let f = SearchFilters {
            hostname: Some("CORE-01".into()),
            hardware: Some("9300".into()),
            ..filters()
        };
        assert!(matches(&f, &rec));
    }

    #[test]
    fn test_filters_combine_with_and() {
        let rec = record(1);
        let f = SearchFilters {
            hostname: Some("core".into()),
            location: Some("Boston".into()),
            ..filters()
        };
        assert!(!matches(&f, &rec));
    }

    #[test]
    fn test_disabled_excluded_unless_requested() {
        let mut rec = record(1);
        rec.disabled = true;
        let mut f = SearchFilters {
            location: Some("New York".into()),
            ..filters()
        };
        assert!(!matches(&f, &rec));
        f.include_disabled = true;
        assert!(matches(&f, &rec));
    }

    #[test]
    fn test_server_query_prefers_location() {
        let f = SearchFilters {
            hostname: Some("core".into()),
            location: Some("New York".into()),
            ..filters()
        };
        assert_eq!(
            server_query(&f),
            Some(("location", "New York".to_string()))
        );

        let f = SearchFilters {
            sys_name: Some("core-01".into()),
            hostname: Some("core".into()),
            ..filters()
        };
        assert_eq!(server_query(&f), Some(("hostname", "core".to_string())));
    }

    #[test]
    fn test_server_query_sends_os_and_sys_name_only_alone() {
        let alone = SearchFilters {
            os: Some("ios".into()),
            ..filters()
        };
        assert_eq!(server_query(&alone), Some(("os", "ios".to_string())));

        let with_hardware = SearchFilters {
            os: Some("ios".into()),
            hardware: Some("9300".into()),
            ..filters()
        };
        assert_eq!(
            server_query(&with_hardware),
            Some(("hardware", "9300".to_string()))
        );

        let os_and_name = SearchFilters {
            os: Some("ios".into()),
            sys_name: Some("core".into()),
            ..filters()
        };
        assert_eq!(server_query(&os_and_name), None);
    }
}
