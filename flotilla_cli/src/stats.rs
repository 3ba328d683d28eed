use flotilla_core::protocol::Request;
use flotilla_core::session::{ProgressDelta, SessionStatus};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

pub const STATS_FILE_NAME: &str = "fuzzer_stats";

/// Parses the `key : value` stats file a fuzzer keeps in its output
/// directory. Counters the file does not carry, or carries in a form we
/// cannot read, stay unset in the returned delta.
pub fn parse_fuzzer_stats(text: &str) -> ProgressDelta {
    let fields: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    ProgressDelta {
        execs_done: first_value(&fields, &["execs_done"]),
        execs_per_sec: first_value::<f64>(&fields, &["execs_per_sec"])
            .filter(|rate| rate.is_finite() && *rate >= 0.0),
        paths_total: first_value(&fields, &["paths_total", "corpus_count"]),
        paths_found: first_value(&fields, &["paths_found", "corpus_found"]),
        crashes: first_value(&fields, &["crashes", "saved_crashes", "unique_crashes"]),
        hangs: first_value(&fields, &["hangs", "saved_hangs", "unique_hangs"]),
    }
}

// Older and newer fuzzer releases name the same counter differently, so each
// field lists its aliases in order of preference.
fn first_value<T: FromStr>(fields: &HashMap<&str, &str>, keys: &[&str]) -> Option<T> {
    keys.iter()
        .filter_map(|key| fields.get(key))
        .find_map(|value| value.parse().ok())
}

pub fn read_fuzzer_stats(output_dir: &Path) -> Result<ProgressDelta, anyhow::Error> {
    let path = output_dir.join(STATS_FILE_NAME);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read fuzzer stats at {:?}: {}", path, e))?;
    Ok(parse_fuzzer_stats(&text))
}

pub fn update_request(session_id: &str, status: SessionStatus, delta: ProgressDelta) -> Request {
    Request::UpdateSessionStatus {
        session_id: session_id.to_string(),
        status,
        progress: (!delta.is_empty()).then_some(delta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIC_STATS: &str = "\
start_time        : 1718000000
last_update       : 1718000600
execs_done        : 1234567
execs_per_sec     : 2057.61
paths_total       : 312
paths_found       : 280
unique_crashes    : 3
unique_hangs      : 1
command_line      : afl-fuzz -i in -o out -- ./target @@
";

    #[test]
    fn classic_stats_file_is_mapped() {
        let delta = parse_fuzzer_stats(CLASSIC_STATS);
        assert_eq!(delta.execs_done, Some(1_234_567));
        assert_eq!(delta.execs_per_sec, Some(2057.61));
        assert_eq!(delta.paths_total, Some(312));
        assert_eq!(delta.paths_found, Some(280));
        assert_eq!(delta.crashes, Some(3));
        assert_eq!(delta.hangs, Some(1));
    }

    #[test]
    fn newer_counter_names_are_recognised() {
        let delta = parse_fuzzer_stats(
            "corpus_count : 40\ncorpus_found : 12\nsaved_crashes : 2\nsaved_hangs : 0\n",
        );
        assert_eq!(delta.paths_total, Some(40));
        assert_eq!(delta.paths_found, Some(12));
        assert_eq!(delta.crashes, Some(2));
        assert_eq!(delta.hangs, Some(0));
        assert_eq!(delta.execs_done, None);
    }

    #[test]
    fn unparsable_values_leave_fields_unset() {
        let delta = parse_fuzzer_stats("execs_done : lots\nexecs_per_sec : -4\nno separator here\n");
        assert!(delta.is_empty(), "{delta:?}");
    }

    #[test]
    fn empty_delta_is_omitted_from_request() {
        let request = update_request("s1", SessionStatus::Running, ProgressDelta::default());
        let line = serde_json::to_string(&request).unwrap();
        assert_eq!(
            line,
            r#"{"op":"update_session_status","session_id":"s1","status":"running"}"#
        );
    }

    #[test]
    fn stats_are_read_from_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATS_FILE_NAME), CLASSIC_STATS).unwrap();

        let delta = read_fuzzer_stats(dir.path()).unwrap();
        assert_eq!(delta.crashes, Some(3));

        let missing = read_fuzzer_stats(&dir.path().join("nope")).unwrap_err();
        assert!(missing.to_string().contains("fuzzer_stats"), "{missing}");
    }
}
