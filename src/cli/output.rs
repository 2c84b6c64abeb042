//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::error::CherryError;
use crate::planner::Operation;
use crate::reconciler::{PlanReport, ReconcileResult};
use crate::resource::ResourceKind;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Operations")]
    operations: String,
}

/// Inventory row for table display.
#[derive(Tabled)]
struct InventoryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true if output is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats the plans of a manifest.
    #[must_use]
    pub fn format_plan(&self, plans: &[PlanReport]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plans).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plans),
        }
    }

    /// Formats plans as text.
    fn format_plan_text(plans: &[PlanReport]) -> String {
        let changing: Vec<&PlanReport> = plans.iter().filter(|p| p.has_changes()).collect();
        let waiting: Vec<&PlanReport> = plans.iter().filter(|p| p.pending_wait.is_some()).collect();
        if changing.is_empty() && waiting.is_empty() {
            return format!("{} No changes required - infrastructure is up to date.\n", "✓".green());
        }

        let mut output = String::from("\nPlan\n\n");
        for plan in &waiting {
            let _ = writeln!(
                output,
                "{} {} {}: waiting for {}",
                "…".cyan(),
                plan.kind,
                plan.label,
                plan.pending_wait.as_deref().unwrap_or_default()
            );
        }
        if changing.is_empty() {
            return output;
        }

        let rows: Vec<PlanRow> = changing
            .iter()
            .enumerate()
            .map(|(i, p)| PlanRow {
                index: i + 1,
                kind: p.kind.to_string(),
                resource: Self::truncate(&p.label, 30),
                id: p.id.clone().unwrap_or_else(|| String::from("-")),
                operations: p
                    .diff
                    .mutating()
                    .map(Self::format_operation)
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let count = |pred: fn(&Operation) -> bool| -> usize {
            plans
                .iter()
                .map(|p| p.diff.operations.iter().filter(|op| pred(op)).count())
                .sum()
        };
        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to change, {} to destroy",
            count(|op| matches!(op, Operation::Create(_))).to_string().green(),
            count(|op| matches!(op, Operation::Update(_) | Operation::Action { .. }))
                .to_string()
                .yellow(),
            count(|op| matches!(op, Operation::Delete)).to_string().red()
        );

        for plan in plans {
            for warning in &plan.diff.warnings {
                let _ = writeln!(output, "{} {warning}", "⚠".yellow());
            }
        }

        output
    }

    /// Formats the result of one reconciliation.
    #[must_use]
    pub fn format_result(&self, label: &str, result: &ReconcileResult<Value>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(result).unwrap_or_default(),
            OutputFormat::Text => {
                let id = result.id.as_deref().unwrap_or("-");
                let mut output = if result.changed {
                    format!(
                        "{} {} {label} ({id}): {}\n",
                        "✓".green(),
                        result.kind,
                        result.operations.join(", ")
                    )
                } else {
                    format!("{} {} {label} ({id}): up to date\n", "=".dimmed(), result.kind)
                };
                for warning in &result.warnings {
                    let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats a failed reconciliation.
    #[must_use]
    pub fn format_failure(&self, kind: ResourceKind, label: &str, error: &CherryError) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "kind": kind,
                "label": label,
                "error": error.to_string(),
            })
            .to_string(),
            OutputFormat::Text => format!("{} {kind} {label}: {error}\n", "✗".red()),
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })
            .to_string(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Manifest is valid\n", "✓".green())
                } else {
                    let mut output = format!("{} Manifest has {} errors:\n", "✗".red(), result.error_count());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats an inventory listing.
    #[must_use]
    pub fn format_inventory(&self, kind: ResourceKind, items: &[Value]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(items).unwrap_or_default(),
            OutputFormat::Text => {
                if items.is_empty() {
                    return format!("No {kind} resources found.\n");
                }
                let rows: Vec<InventoryRow> = items.iter().map(|item| Self::inventory_row(kind, item)).collect();
                let mut output = Table::new(rows).to_string();
                let _ = write!(output, "\n{} {kind} resources\n", items.len());
                output
            }
        }
    }

    /// Formats a single resource.
    #[must_use]
    pub fn format_resource(&self, item: &Value) -> String {
        match self.format {
            OutputFormat::Json => item.to_string(),
            OutputFormat::Text => serde_json::to_string_pretty(item).unwrap_or_default(),
        }
    }

    /// Builds a table row from a raw resource.
    fn inventory_row(kind: ResourceKind, item: &Value) -> InventoryRow {
        let text = |key: &str| match item.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        };
        let slug = |key: &str| match item.get(key) {
            Some(Value::Object(o)) => o
                .get("slug")
                .or_else(|| o.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => text(key),
        };

        let (name, detail) = match kind {
            ResourceKind::Server => (text("hostname"), slug("plan")),
            ResourceKind::FloatingIp => (text("address"), text("ptr_record")),
            ResourceKind::SshKey => (text("label"), text("fingerprint")),
            ResourceKind::Volume => (text("description"), format!("{} GB", text("size"))),
            ResourceKind::Project => (text("name"), String::new()),
        };

        InventoryRow {
            id: text("id"),
            name: Self::truncate(&name, 30),
            status: text("status"),
            region: slug("region"),
            detail: Self::truncate(&detail, 30),
        }
    }

    /// Formats an operation with color.
    fn format_operation(op: &Operation) -> String {
        let label = op.to_string();
        match op {
            Operation::Create(_) => format!("+{label}").green().to_string(),
            Operation::Update(_) => format!("~{label}").yellow().to_string(),
            Operation::Action { .. } => format!("!{label}").cyan().to_string(),
            Operation::Delete => format!("-{label}").red().to_string(),
            Operation::NoOp => label.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Diff;
    use serde_json::json;

    fn plan(operations: Vec<Operation>) -> PlanReport {
        PlanReport {
            kind: ResourceKind::Project,
            label: String::from("staging"),
            id: Some(String::from("9")),
            diff: Diff {
                operations,
                warnings: vec![String::from("drift")],
            },
            pending_wait: None,
        }
    }

    #[test]
    fn test_plan_up_to_date() {
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&[plan(vec![Operation::NoOp])]);
        assert!(output.contains("up to date"));
    }

    #[test]
    fn test_plan_shows_pending_wait() {
        let mut waiting = plan(vec![Operation::NoOp]);
        waiting.pending_wait = Some(String::from("active status"));
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&[waiting]);
        assert!(!output.contains("up to date"));
        assert!(output.contains("waiting for active status"));
    }

    #[test]
    fn test_plan_lists_operations() {
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&[plan(vec![Operation::Delete])]);
        assert!(output.contains("staging"));
        assert!(output.contains("-delete"));
        assert!(output.contains("drift"));
    }

    #[test]
    fn test_plan_json() {
        let output = OutputFormatter::new(OutputFormat::Json).format_plan(&[plan(vec![Operation::Delete])]);
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["kind"], "project");
        assert_eq!(parsed[0]["diff"]["operations"][0], "delete");
    }

    #[test]
    fn test_inventory_rows() {
        let items = vec![json!({
            "id": 1,
            "hostname": "web-1",
            "status": "deployed",
            "region": {"slug": "LT-Siauliai"},
            "plan": {"slug": "e5_1620v4"}
        })];
        let output = OutputFormatter::new(OutputFormat::Text).format_inventory(ResourceKind::Server, &items);
        assert!(output.contains("web-1"));
        assert!(output.contains("LT-Siauliai"));
        assert!(output.contains("e5_1620v4"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a-very-long-name", 8), "a-ver...");
    }
}
