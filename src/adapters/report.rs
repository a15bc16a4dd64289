//! Email bodies summarising a run.

use crate::domain::change::{ChangeKind, ChangeRecord, ReconciliationResult};
use std::fmt::Write;

pub struct RenderedReport {
    pub text: String,
    pub html: String,
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn money(amount: f64) -> String {
    format!("${:.2}", amount)
}

/// Signed difference, e.g. `+$1.50` or `-$0.25`.
pub fn signed_difference(old_value: f64, new_value: f64) -> String {
    let diff = new_value - old_value;
    if diff < 0.0 {
        format!("-${:.2}", diff.abs())
    } else {
        format!("+${:.2}", diff)
    }
}

struct Section {
    title: &'static str,
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

fn describe(change: &ChangeRecord) -> (String, String, String) {
    (
        change.key.to_string(),
        change.identifier.clone().unwrap_or_default(),
        change.label.clone().unwrap_or_default(),
    )
}

fn sections(result: &ReconciliationResult, cost_column: &str) -> Vec<Section> {
    let completed = result
        .filled()
        .filter_map(|change| match change.kind {
            ChangeKind::FilledMissing { new_value } => {
                let (key, id, label) = describe(change);
                Some(vec![key, id, label, money(new_value)])
            }
            _ => None,
        })
        .collect();

    let potential = result
        .conflicts()
        .filter_map(|change| match change.kind {
            ChangeKind::ConflictingUpdate {
                old_value,
                new_value,
            } => {
                let (key, id, label) = describe(change);
                Some(vec![
                    key,
                    id,
                    label,
                    money(old_value),
                    money(new_value),
                    signed_difference(old_value, new_value),
                ])
            }
            _ => None,
        })
        .collect();

    let added = result
        .new_records()
        .filter_map(|change| match &change.kind {
            ChangeKind::NewRecord { fields } => {
                let (key, id, label) = describe(change);
                let cost = fields
                    .iter()
                    .find(|(column, _)| column == cost_column)
                    .map(|(_, value)| match value.as_number() {
                        Some(n) => money(n),
                        None => value.to_string(),
                    })
                    .unwrap_or_default();
                Some(vec![key, id, label, cost])
            }
            _ => None,
        })
        .collect();

    vec![
        Section {
            title: "Completed Cost Updates",
            headers: vec!["Key", "SKU", "Name", "New Cost"],
            rows: completed,
        },
        Section {
            title: "Potential COGS Updates",
            headers: vec!["Key", "SKU", "Name", "Current Cost", "Sheet COGS", "Difference"],
            rows: potential,
        },
        Section {
            title: "New Products Added",
            headers: vec!["Key", "SKU", "Name", "Cost"],
            rows: added,
        },
    ]
}

pub const CONFLICT_NOTE: &str = "Note: Potential COGS updates are suggestions only. \
No actual changes have been made to existing items.";

/// Renders the cost-update report. Empty sections are omitted; `None` when all are empty.
pub fn render_cost_report(
    account: &str,
    result: &ReconciliationResult,
    cost_column: &str,
) -> Option<RenderedReport> {
    let sections: Vec<Section> = sections(result, cost_column)
        .into_iter()
        .filter(|s| !s.rows.is_empty())
        .collect();
    if sections.is_empty() {
        return None;
    }

    let mut text = format!("Cost update report for {}\n", account);
    let mut html = format!(
        "<html><body style=\"font-family: Arial, sans-serif\"><h2>Cost update report for {}</h2>",
        escape(account)
    );

    for section in &sections {
        let _ = writeln!(text, "\n{}:", section.title);
        for row in &section.rows {
            let _ = writeln!(text, "- {}", row.join(" | "));
        }

        let _ = write!(
            html,
            "<h3>{}</h3><table border=\"1\" cellpadding=\"4\" cellspacing=\"0\"><tr>",
            section.title
        );
        for header in &section.headers {
            let _ = write!(html, "<th>{}</th>", header);
        }
        html.push_str("</tr>");
        for row in &section.rows {
            html.push_str("<tr>");
            for cell in row {
                let _ = write!(html, "<td>{}</td>", escape(cell));
            }
            html.push_str("</tr>");
        }
        html.push_str("</table>");
    }

    let summary = result.summary();
    let _ = writeln!(text, "\nSummary: {}", summary);
    let _ = writeln!(text, "\n{}", CONFLICT_NOTE);
    let _ = write!(
        html,
        "<p>Summary: {}</p><p style=\"color: #7f8c8d;\">{}</p></body></html>",
        escape(&summary.to_string()),
        CONFLICT_NOTE
    );

    Some(RenderedReport { text, html })
}

pub const DASHBOARD_URL: &str = "https://portal.instant-fulfillment.com/dashboard";

const UPLOAD_STEPS: [&str; 4] = [
    "Click \"Inbound Units\" on the left side",
    "Click \"Amazon ASIN\"",
    "Download the attached file and upload it in the area on the right side",
    "Click submit",
];

const UPLOAD_CHECK: &str = "Units are uploaded once \"Upload Successful\" pops up. To confirm, open \
\"Unit Tracker\" on the left and click \"Upload Date\" twice to sort by the most recent upload; \
the new inventory should be listed there.";

pub fn render_prep_upload(account: &str, rows: usize, filename: &str) -> RenderedReport {
    let mut text = format!(
        "Hello {account},\n\n\
         Attached is {filename} with {rows} new lead(s), ready for upload.\n\n\
         Steps to upload:\n\
         1) Go to {DASHBOARD_URL}\n"
    );
    for (i, step) in UPLOAD_STEPS.iter().enumerate() {
        let _ = writeln!(text, "{}) {}", i + 2, step);
    }
    let _ = writeln!(text, "\n{}", UPLOAD_CHECK);

    let mut html = format!(
        "<html><body style=\"font-family: Arial, sans-serif\">\
         <p>Hello {},</p>\
         <p>Attached is <b>{}</b> with {} new lead(s), ready for upload.</p>\
         <p><strong>Steps to upload:</strong></p><ol>\
         <li>Go to <a href=\"{url}\">Instant Fulfillment Dashboard</a></li>",
        escape(account),
        escape(filename),
        rows,
        url = DASHBOARD_URL
    );
    for step in UPLOAD_STEPS {
        let _ = write!(html, "<li>{}</li>", escape(step));
    }
    let _ = write!(html, "</ol><p>{}</p></body></html>", escape(UPLOAD_CHECK));

    RenderedReport { text, html }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change::{RecordKey, SkipCounts};
    use crate::domain::model::{Table, Value};

    fn change(kind: ChangeKind) -> ChangeRecord {
        ChangeRecord {
            source_row: 0,
            key: RecordKey::single("B001"),
            identifier: Some("AAAA-111111".to_string()),
            label: Some("Widget <XL>".to_string()),
            kind,
        }
    }

    fn result(changes: Vec<ChangeRecord>) -> ReconciliationResult {
        ReconciliationResult {
            target: Table::new("catalog", vec![]),
            changes,
            skipped: SkipCounts::default(),
            conflicts_applied: false,
        }
    }

    #[test]
    fn test_signed_difference() {
        assert_eq!(signed_difference(10.0, 11.5), "+$1.50");
        assert_eq!(signed_difference(10.0, 9.75), "-$0.25");
        assert_eq!(signed_difference(10.0, 10.0), "+$0.00");
    }

    #[test]
    fn test_report_sections() {
        let report = render_cost_report(
            "tevin",
            &result(vec![
                change(ChangeKind::FilledMissing { new_value: 10.0 }),
                change(ChangeKind::ConflictingUpdate {
                    old_value: 10.0,
                    new_value: 12.0,
                }),
                change(ChangeKind::NewRecord {
                    fields: vec![("Cost".to_string(), Value::Number(4.5))],
                }),
            ]),
            "Cost",
        )
        .unwrap();

        assert!(report.text.contains("Completed Cost Updates"));
        assert!(report.text.contains("Potential COGS Updates"));
        assert!(report.text.contains("+$2.00"));
        assert!(report.text.contains("New Products Added"));
        assert!(report.text.contains("$4.50"));
        assert!(report.html.contains("Widget &lt;XL&gt;"));
        assert!(!report.html.contains("Widget <XL>"));
    }

    #[test]
    fn test_report_closes_with_conflict_note() {
        let report = render_cost_report(
            "tevin",
            &result(vec![change(ChangeKind::ConflictingUpdate {
                old_value: 10.0,
                new_value: 9.0,
            })]),
            "Cost",
        )
        .unwrap();

        assert!(report.text.trim_end().ends_with(CONFLICT_NOTE));
        assert!(report.html.contains("suggestions only"));
    }

    #[test]
    fn test_prep_upload_lists_upload_steps() {
        let body = render_prep_upload("aura", 3, "Processed_Instant_Fulfillment_Template.csv");

        assert!(body.text.contains("1) Go to https://portal.instant-fulfillment.com/dashboard"));
        assert!(body.text.contains("3) Click \"Amazon ASIN\""));
        assert!(body.text.contains("5) Click submit"));
        assert!(body.text.contains("Unit Tracker"));
        assert!(body.html.contains(&format!("<a href=\"{}\">", DASHBOARD_URL)));
        assert_eq!(body.html.matches("<li>").count(), 5);
        assert!(body.html.contains("3 new lead(s)"));
    }

    #[test]
    fn test_empty_report_is_none() {
        assert!(render_cost_report("tevin", &result(vec![change(ChangeKind::Unchanged)]), "Cost").is_none());
    }
}
