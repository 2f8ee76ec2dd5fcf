#![forbid(unsafe_code)]

//! Shared test plumbing: structured JSON run records, fixture digests and
//! the property-test case budget.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const TEST_LOG_SCHEMA_VERSION: &str = "tensorterm.test-log.v1";

const CASES_VAR: &str = "TT_PROPTEST_CASES";
const SEED_VARS: [&str; 2] = ["TT_PROPTEST_SEED", "PROPTEST_RNG_SEED"];
const LOCAL_CASES: u32 = 256;
const CI_CASES: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    /// Deterministic fixtures with exact expectations.
    Exact,
    /// Randomized inputs checked against a property.
    Property,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
}

/// Host facts attached to every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub rustc: String,
    pub target: String,
    pub proptest_cases: u32,
    pub started_unix_ms: u64,
}

impl HostInfo {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            rustc: rustc_version(),
            target: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
            proptest_cases: property_test_case_count(),
            started_unix_ms: unix_ms(),
        }
    }
}

/// Wall time per phase of a logged run, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PhaseMicros {
    pub prepare: u64,
    pub body: u64,
    pub report: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLogV1 {
    pub schema_version: String,
    pub test_id: String,
    /// Sha256 of the fixture's JSON encoding.
    pub fixture_digest: String,
    pub seed: Option<u64>,
    pub mode: TestMode,
    pub host: HostInfo,
    /// Identifiers reported by a passing body, such as case ids or term ids.
    pub observed: Vec<String>,
    pub result: TestResult,
    pub failure: Option<String>,
    pub phases: PhaseMicros,
}

impl TestLogV1 {
    /// A record with no timings or observations yet.
    #[must_use]
    pub fn unit(
        test_id: impl Into<String>,
        fixture_digest: impl Into<String>,
        mode: TestMode,
        result: TestResult,
    ) -> Self {
        Self {
            schema_version: TEST_LOG_SCHEMA_VERSION.to_owned(),
            test_id: test_id.into(),
            fixture_digest: fixture_digest.into(),
            seed: capture_proptest_seed(),
            mode,
            host: HostInfo::capture(),
            observed: Vec::new(),
            result,
            failure: None,
            phases: PhaseMicros::default(),
        }
    }
}

pub fn fixture_id_from_json<T: Serialize>(fixture: &T) -> Result<String, serde_json::Error> {
    let digest = Sha256::digest(serde_json::to_vec(fixture)?);
    Ok(digest.iter().fold(String::with_capacity(64), |mut hex, byte| {
        hex.push_str(&format!("{byte:02x}"));
        hex
    }))
}

/// Case budget for `TestRunner`: `TT_PROPTEST_CASES` when positive, else a
/// larger default under CI.
#[must_use]
pub fn property_test_case_count() -> u32 {
    env_parse::<u32>(CASES_VAR)
        .filter(|cases| *cases > 0)
        .unwrap_or_else(|| {
            if std::env::var_os("CI").is_some() {
                CI_CASES
            } else {
                LOCAL_CASES
            }
        })
}

#[must_use]
pub fn capture_proptest_seed() -> Option<u64> {
    SEED_VARS.iter().find_map(|name| env_parse::<u64>(name))
}

#[must_use]
pub fn test_id(module_path: &str, test_name: &str) -> String {
    format!("{module_path}::{test_name}")
}

/// Directory receiving JSON test logs: `TT_TEST_LOG_DIR`, else a folder
/// under the system temp dir.
#[must_use]
pub fn test_log_dir() -> PathBuf {
    std::env::var_os("TT_TEST_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("tensorterm-test-logs"))
}

/// Runs `body`, records a [`TestLogV1`] for it and re-raises any failure.
///
/// `body` returns observed identifiers on success or a failure detail.
pub fn run_logged_test<Fixture, F>(
    suite_id: &str,
    test_name: &str,
    fixture: &Fixture,
    mode: TestMode,
    body: F,
) where
    Fixture: Serialize,
    F: FnOnce() -> Result<Vec<String>, String>,
{
    let mut clock = Instant::now();
    let digest = fixture_id_from_json(fixture).unwrap_or_else(|_| "<unserializable>".into());
    let id = test_id(suite_id, test_name);
    let mut log = TestLogV1::unit(id.clone(), digest, mode, TestResult::Fail);
    log.phases.prepare = lap(&mut clock);

    let outcome = catch_unwind(AssertUnwindSafe(body));
    log.phases.body = lap(&mut clock);

    let unwound = match outcome {
        Ok(Ok(observed)) => {
            log.result = TestResult::Pass;
            log.observed = observed;
            None
        }
        Ok(Err(detail)) => {
            log.failure = Some(detail);
            None
        }
        Err(payload) => {
            log.failure = Some(describe_panic(payload.as_ref()));
            Some(payload)
        }
    };
    log.phases.report = lap(&mut clock);

    // Persistence is best effort; the verdict comes from `body`.
    let _ = write_log(&id, &log);

    if let Some(payload) = unwound {
        std::panic::resume_unwind(payload);
    }
    if let Some(detail) = log.failure {
        panic!("{id}: {detail}");
    }
}

fn write_log(test_id: &str, log: &TestLogV1) -> std::io::Result<()> {
    let dir = test_log_dir();
    std::fs::create_dir_all(&dir)?;
    let encoded = serde_json::to_vec_pretty(log).map_err(std::io::Error::other)?;
    std::fs::write(dir.join(format!("{}.json", test_id.replace("::", "__"))), encoded)
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|msg| (*msg).to_owned()))
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Microseconds since `clock`, resetting it.
fn lap(clock: &mut Instant) -> u64 {
    let elapsed = clock.elapsed().as_micros();
    *clock = Instant::now();
    u64::try_from(elapsed).unwrap_or(u64::MAX)
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
}

fn rustc_version() -> String {
    Command::new("rustc")
        .arg("--version")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_owned())
        .unwrap_or_else(|| "rustc <unknown>".to_owned())
}

#[cfg(test)]
mod tests {
    use super::{
        TEST_LOG_SCHEMA_VERSION, TestLogV1, TestMode, TestResult, fixture_id_from_json,
        property_test_case_count, run_logged_test, test_id,
    };

    #[test]
    fn fixture_digest_is_stable_hex() {
        let fixture = serde_json::json!({
            "dims": ["i", "j"],
            "shape": [2, 3]
        });
        let first = fixture_id_from_json(&fixture).expect("digest should build");
        assert_eq!(first, fixture_id_from_json(&fixture).expect("digest"));
        assert_eq!(first.len(), 64);
        assert!(first.bytes().all(|b| b.is_ascii_hexdigit()));

        let other = serde_json::json!({ "dims": ["j", "i"], "shape": [2, 3] });
        assert_ne!(first, fixture_id_from_json(&other).expect("digest"));
    }

    #[test]
    fn case_budget_is_positive() {
        assert!(property_test_case_count() >= 1);
    }

    #[test]
    fn record_survives_json() {
        let log = TestLogV1::unit(
            test_id(module_path!(), "record_survives_json"),
            "digest",
            TestMode::Property,
            TestResult::Skip,
        );
        assert_eq!(log.schema_version, TEST_LOG_SCHEMA_VERSION);
        assert_eq!(log.host.proptest_cases, property_test_case_count());
        let encoded = serde_json::to_string(&log).expect("serialize should work");
        let decoded: TestLogV1 = serde_json::from_str(&encoded).expect("deserialize should work");
        assert_eq!(decoded, log);
    }

    #[test]
    fn logged_test_passes_through_success() {
        run_logged_test(
            module_path!(),
            "logged_test_passes_through_success",
            &("fixture", 1_u32),
            TestMode::Exact,
            || Ok(vec!["term#1".to_owned()]),
        );
    }

    #[test]
    #[should_panic(expected = "detail")]
    fn logged_test_reraises_failure_detail() {
        run_logged_test(
            module_path!(),
            "logged_test_reraises_failure_detail",
            &("fixture", 2_u32),
            TestMode::Exact,
            || Err("detail".to_owned()),
        );
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn logged_test_resumes_panics() {
        run_logged_test(
            module_path!(),
            "logged_test_resumes_panics",
            &(),
            TestMode::Exact,
            || panic!("boom"),
        );
    }
}
