//! The notification decision: previous status + new response → alert text and new status.
//!
//! Pure: the same inputs always give the same [`Decision`]. Quiet periods are
//! applied afterwards by the caller and never change the persisted status.

use whatsup_core::types::{Pattern, Response, STATUS_PATTERN_FAILED};

use crate::matcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Alert for the watch owner, if any.
    pub message: Option<String>,
    /// Status to persist on the watch.
    pub status: i32,
}

pub fn decide(url: &str, previous: Option<i32>, res: &Response, patterns: &[Pattern]) -> Decision {
    if !res.is_ok() {
        return Decision {
            message: Some(format!(
                "Error on {url}. Status={} ({})",
                res.status, res.message
            )),
            status: res.status,
        };
    }

    match previous {
        Some(prev) if prev != res.status => check_rules(
            url,
            res,
            patterns,
            format!(
                "Status of {url} changed from {prev} to {} ({})",
                res.status, res.message
            ),
        ),
        None => check_rules(
            url,
            res,
            patterns,
            format!(
                "Started watching {url} — status is {} ({})",
                res.status, res.message
            ),
        ),
        Some(prev) => Decision {
            message: None,
            status: prev,
        },
    }
}

fn check_rules(url: &str, res: &Response, patterns: &[Pattern], default: String) -> Decision {
    match matcher::first_failure(patterns, &res.body) {
        None => Decision {
            message: Some(default),
            status: res.status,
        },
        Some(p) => Decision {
            message: Some(format!(
                "{url} failed to match {} pattern /{}/",
                p.polarity(),
                p.regex
            )),
            status: STATUS_PATTERN_FAILED,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const URL: &str = "http://x/";

    fn res(status: i32, message: &str, body: &str) -> Response {
        Response {
            status,
            message: message.into(),
            elapsed: Duration::from_millis(10),
            body: body.into(),
        }
    }

    fn pattern(id: i64, regex: &str, positive: bool) -> Pattern {
        Pattern {
            id,
            watch_id: 1,
            regex: regex.into(),
            positive,
        }
    }

    #[test]
    fn test_error_status_always_alerts() {
        let d = decide(URL, Some(200), &res(500, "Internal Server Error", ""), &[]);
        assert_eq!(
            d.message.as_deref(),
            Some("Error on http://x/. Status=500 (Internal Server Error)")
        );
        assert_eq!(d.status, 500);
    }

    #[test]
    fn test_fetch_failure_alerts_with_description() {
        let failed = Response::failed("connection refused", Duration::from_millis(3));
        let d = decide(URL, None, &failed, &[pattern(1, "OK", true)]);
        assert_eq!(
            d.message.as_deref(),
            Some("Error on http://x/. Status=-1 (connection refused)")
        );
        assert_eq!(d.status, -1);
    }

    #[test]
    fn test_first_observation_starts_watching() {
        let d = decide(URL, None, &res(200, "OK", "system OK"), &[pattern(1, "OK", true)]);
        assert_eq!(
            d.message.as_deref(),
            Some("Started watching http://x/ — status is 200 (OK)")
        );
        assert_eq!(d.status, 200);
    }

    #[test]
    fn test_change_reports_previous() {
        let d = decide(URL, Some(500), &res(200, "OK", ""), &[]);
        assert_eq!(
            d.message.as_deref(),
            Some("Status of http://x/ changed from 500 to 200 (OK)")
        );
        assert_eq!(d.status, 200);
    }

    #[test]
    fn test_unchanged_is_silent_and_keeps_status() {
        let d = decide(URL, Some(200), &res(200, "OK", "system DOWN"), &[pattern(1, "OK", true)]);
        assert_eq!(d, Decision { message: None, status: 200 });
    }

    #[test]
    fn test_failed_rule_marks_sentinel() {
        let d = decide(URL, Some(-1), &res(200, "OK", "system DOWN"), &[pattern(1, "OK", true)]);
        assert_eq!(
            d.message.as_deref(),
            Some("http://x/ failed to match positive pattern /OK/")
        );
        assert_eq!(d.status, STATUS_PATTERN_FAILED);
    }

    #[test]
    fn test_only_first_failure_reported() {
        let patterns = vec![
            pattern(1, "DOWN", false),
            pattern(2, "OK", true),
            pattern(3, "green", true),
        ];
        let d = decide(URL, None, &res(200, "OK", "system DOWN"), &patterns);
        assert_eq!(
            d.message.as_deref(),
            Some("http://x/ failed to match negative pattern /DOWN/")
        );
        assert_eq!(d.status, -1);
    }

    #[test]
    fn test_sentinel_then_recovery_is_a_change() {
        let d = decide(URL, Some(-1), &res(200, "OK", "system OK"), &[pattern(1, "OK", true)]);
        assert_eq!(
            d.message.as_deref(),
            Some("Status of http://x/ changed from -1 to 200 (OK)")
        );
        assert_eq!(d.status, 200);
    }

    #[test]
    fn test_deterministic() {
        let patterns = vec![pattern(1, "OK", true), pattern(2, "DOWN", false)];
        let r = res(200, "OK", "DOWN");
        let first = decide(URL, Some(301), &r, &patterns);
        for _ in 0..10 {
            assert_eq!(decide(URL, Some(301), &r, &patterns), first);
        }
    }
}
