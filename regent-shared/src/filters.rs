use crate::analysis::AnalysisEntry;
use regex::Regex;
use tracing::debug;

/// Whether any of the configured cluster filters applies to the analysis
/// entry, gating a recovery type.
///
/// Filter forms:
/// - `alias=name` matches the cluster alias exactly;
/// - `alias~=pattern` matches the cluster alias against a regex;
/// - any other non-empty string is a regex matched against the cluster name.
///
/// An empty filter never matches. A filter that fails to compile matches
/// nothing. `skip_filters` bypasses the whole list.
pub fn filters_match(entry: &AnalysisEntry, filters: &[String], skip_filters: bool) -> bool {
    if skip_filters {
        return true;
    }
    for filter in filters {
        if let Some(alias) = filter.strip_prefix("alias=") {
            if alias == entry.cluster_alias {
                return true;
            }
        } else if let Some(alias_pattern) = filter.strip_prefix("alias~=") {
            if regex_matches(alias_pattern, &entry.cluster_alias) {
                return true;
            }
        } else if !filter.is_empty() && regex_matches(filter, &entry.cluster_name) {
            return true;
        }
    }
    false
}

fn regex_matches(pattern: &str, text: &str) -> bool {
    match Regex::new(pattern) {
        Ok(regex) => regex.is_match(text),
        Err(err) => {
            debug!(pattern, %err, "ignoring unparseable cluster filter");
            false
        }
    }
}
