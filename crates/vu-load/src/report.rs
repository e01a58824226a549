//! Results reporting and formatting.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

use crate::driver::RunReport;

/// Formats run reports for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as a console table.
    pub fn format_table(report: &RunReport) -> String {
        let results = &report.result;
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.target_url)]);

        table.add_row(vec!["Virtual Users:", &results.virtual_users.to_string()]);
        table.add_row(vec!["Duration:", &format!("{:.1}s", results.duration_secs)]);
        table.add_row(vec![
            "Total Requests:",
            &format!("{}", results.total_requests),
        ]);
        table.add_row(vec![
            "Failed Requests:",
            &format!(
                "{} ({:.2}%)",
                results.failed_requests,
                results.failure_rate() * 100.0
            ),
        ]);
        if results.transport_errors > 0 {
            table.add_row(vec![
                "Transport Errors:",
                &format!("{}", results.transport_errors),
            ]);
        }
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", results.requests_per_second),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "min / mean / p95 / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.1} / {:.1} / {:.1} / {:.1}",
                results.latency.min, results.latency.mean, results.latency.p95, results.latency.max
            ),
        ]);

        if !results.status_counts.is_empty() {
            table.add_row(vec!["", ""]);
            let codes = results
                .status_counts
                .iter()
                .map(|(code, count)| format!("{code}: {count}"))
                .collect::<Vec<_>>()
                .join(", ");
            table.add_row(vec!["Status Codes:", &codes]);
        }

        table.add_row(vec!["", ""]);
        let threshold = match report.threshold {
            Some(t) => format!("{:.2}%", t * 100.0),
            None => "none".to_string(),
        };
        table.add_row(vec!["Failure Threshold:", &threshold]);
        table.add_row(vec!["Result:", &report.status.to_string()]);

        table.to_string()
    }

    /// Format results as JSON.
    pub fn format_json(report: &RunReport) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(report: &RunReport) -> String {
        let results = &report.result;
        format!(
            "{},{},{},{:.1},{},{},{:.4},{:.1},{:.1},{:.1},{:.1},{:.1},{}",
            results.timestamp,
            results.target_url,
            results.virtual_users,
            results.duration_secs,
            results.total_requests,
            results.failed_requests,
            results.failure_rate(),
            results.requests_per_second,
            results.latency.min,
            results.latency.mean,
            results.latency.p95,
            results.latency.max,
            if report.status.is_passed() { "PASSED" } else { "FAILED" }
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,target,vus,duration,requests,failed,failure_rate,rps,min,mean,p95,max,status"
    }
}
